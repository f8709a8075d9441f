use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtoError {
    #[error("unknown metadata level: {0}")]
    UnknownMetadataLevel(String),
}

/// How much response metadata the surface shows. Reference markers such as
/// `[Ref:doc-1]` are only kept in interim text at [`MetadataLevel::Verbose`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataLevel {
    Hidden,
    #[default]
    Summary,
    Verbose,
}

impl MetadataLevel {
    pub fn keeps_references(self) -> bool {
        matches!(self, MetadataLevel::Verbose)
    }
}

impl FromStr for MetadataLevel {
    type Err = ProtoError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hidden" | "none" | "off" => Ok(MetadataLevel::Hidden),
            "summary" | "default" => Ok(MetadataLevel::Summary),
            "verbose" | "full" | "debug" => Ok(MetadataLevel::Verbose),
            other => Err(ProtoError::UnknownMetadataLevel(other.to_string())),
        }
    }
}

impl fmt::Display for MetadataLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MetadataLevel::Hidden => "hidden",
            MetadataLevel::Summary => "summary",
            MetadataLevel::Verbose => "verbose",
        };
        f.write_str(label)
    }
}

/// An orchestrator the backend can route prompts to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Orchestrator {
    pub name: String,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub requirements: Option<Value>,
}

impl Orchestrator {
    /// Entry for an orchestrator the user asked for that the backend did not list.
    pub fn private(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: false,
            description: Some("Private Orchestrator".into()),
            pattern: Some("Custom".into()),
            requirements: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserState {
    pub username: Option<String>,
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_level_parses_aliases() {
        assert_eq!("Verbose".parse(), Ok(MetadataLevel::Verbose));
        assert_eq!(" off ".parse(), Ok(MetadataLevel::Hidden));
        assert_eq!(
            "loud".parse::<MetadataLevel>(),
            Err(ProtoError::UnknownMetadataLevel("loud".into()))
        );
        assert!(!MetadataLevel::default().keeps_references());
    }

    #[test]
    fn orchestrator_tolerates_sparse_entries() {
        let parsed: Orchestrator =
            serde_json::from_str(r#"{"name":"planner"}"#).expect("orchestrator");
        assert_eq!(parsed.name, "planner");
        assert!(!parsed.default);
        assert_eq!(Orchestrator::private("mine").pattern.as_deref(), Some("Custom"));
    }
}
