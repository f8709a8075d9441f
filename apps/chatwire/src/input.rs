use chat_proto::MetadataLevel;

/// One line typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserInput {
    Send(String),
    MetadataLevel(MetadataLevel),
    SelectOrchestrator(String),
    SelectRoute(String),
    ListOrchestrators,
    SpeechToken,
    Help,
    Quit,
}

pub const HELP: &str = "\
/orchestrators          list orchestrators
/use <name>             route prompts to an orchestrator
/route <route>          set the selected route
/metadata <level>       hidden | summary | verbose
/speech                 fetch a speech token
/quit                   leave";

/// Parses a typed line. Blank lines yield `None`; unknown commands are an
/// error message for the user.
pub fn parse_line(line: &str) -> Option<Result<UserInput, String>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Some(Ok(UserInput::Send(line.to_string())));
    };
    let (name, argument) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };
    let parsed = match (name, argument) {
        ("quit" | "exit", _) => Ok(UserInput::Quit),
        ("help", _) => Ok(UserInput::Help),
        ("orchestrators", _) => Ok(UserInput::ListOrchestrators),
        ("speech", _) => Ok(UserInput::SpeechToken),
        ("use", name) if !name.is_empty() => Ok(UserInput::SelectOrchestrator(name.to_string())),
        ("route", route) if !route.is_empty() => Ok(UserInput::SelectRoute(route.to_string())),
        ("metadata", level) => level
            .parse()
            .map(UserInput::MetadataLevel)
            .map_err(|err| err.to_string()),
        _ => Err(format!("unknown command /{name}, try /help")),
    };
    Some(parsed)
}
