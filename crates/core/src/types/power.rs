//! Power actions a companion can perform

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Destructive power action routed to the companion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    Shutdown,
    Reboot,
    Sleep,
    Hibernate,
}

impl PowerAction {
    pub const ALL: [PowerAction; 4] = [
        PowerAction::Shutdown,
        PowerAction::Reboot,
        PowerAction::Sleep,
        PowerAction::Hibernate,
    ];

    /// Path segment under `/api/v1`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shutdown => "shutdown",
            Self::Reboot => "reboot",
            Self::Sleep => "sleep",
            Self::Hibernate => "hibernate",
        }
    }

    /// Upper-case label used in response messages and logs
    pub fn label(&self) -> &'static str {
        match self {
            Self::Shutdown => "SHUTDOWN",
            Self::Reboot => "REBOOT",
            Self::Sleep => "SLEEP",
            Self::Hibernate => "HIBERNATE",
        }
    }
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PowerAction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shutdown" => Ok(Self::Shutdown),
            "reboot" => Ok(Self::Reboot),
            "sleep" => Ok(Self::Sleep),
            "hibernate" => Ok(Self::Hibernate),
            other => Err(CoreError::UnknownAction(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_actions() {
        for action in PowerAction::ALL {
            assert_eq!(action.as_str().parse::<PowerAction>().unwrap(), action);
        }
    }

    #[test]
    fn test_parse_unknown_action() {
        let err = "explode".parse::<PowerAction>().unwrap_err();
        assert!(matches!(err, CoreError::UnknownAction(ref s) if s == "explode"));
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&PowerAction::Hibernate).unwrap();
        assert_eq!(json, "\"hibernate\"");
    }

    #[test]
    fn test_label() {
        assert_eq!(PowerAction::Shutdown.label(), "SHUTDOWN");
    }
}
