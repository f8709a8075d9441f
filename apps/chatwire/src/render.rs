//! Line-oriented terminal renderer.

use std::io::Write;

use chat_proto::{MetadataLevel, Role};
use delta_stream::{Card, CardMetadata};
use tracing::warn;

use crate::conversation::Renderer;

const CLEAR_LINE: &str = "\r\x1b[2K";

pub struct ConsoleRenderer<W> {
    out: W,
    metadata_level: MetadataLevel,
    /// Id of the interim card currently drawn on the last line.
    live_line: Option<String>,
    ansi: bool,
}

impl<W: Write + Send> ConsoleRenderer<W> {
    pub fn new(out: W, metadata_level: MetadataLevel) -> Self {
        Self {
            out,
            metadata_level,
            live_line: None,
            ansi: true,
        }
    }

    /// Disables in-place rewriting of interim lines.
    pub fn plain(mut self) -> Self {
        self.ansi = false;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write(&mut self, text: &str) {
        let result = self
            .out
            .write_all(text.as_bytes())
            .and_then(|_| self.out.flush());
        if let Err(err) = result {
            warn!(target = "chatwire.render", error = %err, "terminal write failed");
        }
    }

    fn end_live_line(&mut self) {
        if self.live_line.take().is_some() && self.ansi {
            self.write("\n");
        }
    }

    fn metadata_lines(&self, metadata: &CardMetadata) -> Vec<String> {
        let mut lines = Vec::new();
        if self.metadata_level == MetadataLevel::Hidden || metadata.is_empty() {
            return lines;
        }
        if !metadata.steps.is_empty() {
            lines.push("  plan:".to_string());
            lines.extend(metadata.steps.iter().map(|step| format!("    - {step}")));
        }
        if let Some(responder) = &metadata.responder {
            lines.push(format!("  responder: {responder}"));
        }
        if !metadata.citations.is_empty() {
            match self.metadata_level {
                MetadataLevel::Verbose => {
                    lines.push("  citations:".to_string());
                    lines.extend(metadata.citations.iter().map(|c| format!("    {c}")));
                }
                _ => lines.push(format!("  citations: {}", metadata.citations.len())),
            }
        }
        if self.metadata_level == MetadataLevel::Verbose {
            lines.extend(
                metadata
                    .other
                    .iter()
                    .map(|(key, value)| format!("  {key}: {value}")),
            );
        }
        lines
    }
}

fn speaker(card: &Card) -> &'static str {
    match card.role {
        Some(Role::User) => "you",
        Some(Role::Bot | Role::Assistant) => "bot",
        _ => "system",
    }
}

impl<W: Write + Send> Renderer for ConsoleRenderer<W> {
    fn show(&mut self, card: &Card) {
        if card.is_interim() {
            if self.ansi {
                let line = format!("{CLEAR_LINE}{}: {}", speaker(card), card.text);
                self.live_line = card.id.clone();
                self.write(&line);
            }
            return;
        }

        let same_card = card.id.is_some() && self.live_line == card.id;
        if same_card && self.ansi {
            self.live_line = None;
            self.write(CLEAR_LINE);
        } else {
            self.end_live_line();
        }

        let mut text = format!("{}: {}\n", speaker(card), card.text);
        for line in self.metadata_lines(&card.metadata) {
            text.push_str(&line);
            text.push('\n');
        }
        if !card.suggested_actions.is_empty() {
            text.push_str(&format!("  [{}]\n", card.suggested_actions.join("] [")));
        }
        self.write(&text);
    }

    fn retract(&mut self, id: &str) {
        if self.live_line.as_deref() == Some(id) {
            self.live_line = None;
            if self.ansi {
                self.write(CLEAR_LINE);
            }
        }
    }

    fn typing(&mut self) {
        if self.live_line.is_none() && self.ansi {
            self.write(&format!("{CLEAR_LINE}bot is typing..."));
        }
    }

    fn set_metadata_level(&mut self, level: MetadataLevel) {
        self.metadata_level = level;
    }
}
