use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum Importance {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "general")]
    General,
    #[serde(rename = "important")]
    Important,
    #[serde(rename = "very important")]
    VeryImportant,
}

impl Importance {
    pub const ALL: [Importance; 4] = [
        Importance::None,
        Importance::General,
        Importance::Important,
        Importance::VeryImportant,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Importance::None => "none",
            Importance::General => "general",
            Importance::Important => "important",
            Importance::VeryImportant => "very important",
        }
    }
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Accepts the stored labels case-insensitively, with `-` or `_` standing in
/// for the space in `very important`.
impl FromStr for Importance {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s
            .trim()
            .to_ascii_lowercase()
            .replace(['-', '_'], " ");
        let normalized = normalized.split_whitespace().collect::<Vec<_>>().join(" ");

        Importance::ALL
            .into_iter()
            .find(|importance| importance.label() == normalized)
            .ok_or_else(|| anyhow!("unknown importance label: {s}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: u64,

    pub text: String,

    #[serde(default)]
    pub completed: bool,

    #[serde(default)]
    pub importance: Importance,
}

impl Task {
    pub fn new(id: u64, text: String, importance: Importance) -> Self {
        Self {
            id,
            text,
            completed: false,
            importance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Importance, Task};

    #[test]
    fn parses_labels_loosely() {
        assert_eq!("none".parse::<Importance>().expect("none"), Importance::None);
        assert_eq!(
            "General".parse::<Importance>().expect("general"),
            Importance::General
        );
        assert_eq!(
            "very-important".parse::<Importance>().expect("dashed"),
            Importance::VeryImportant
        );
        assert_eq!(
            "very_important".parse::<Importance>().expect("underscored"),
            Importance::VeryImportant
        );
        assert_eq!(
            " very   important ".parse::<Importance>().expect("spaced"),
            Importance::VeryImportant
        );
    }

    #[test]
    fn rejects_unknown_label() {
        let err = "urgent".parse::<Importance>().expect_err("unknown label");
        assert!(err.to_string().contains("urgent"));
    }

    #[test]
    fn serializes_with_display_labels() {
        let task = Task::new(3, "Call mom".to_string(), Importance::VeryImportant);
        let json = serde_json::to_string(&task).expect("serialize");
        assert_eq!(
            json,
            r#"{"id":3,"text":"Call mom","completed":false,"importance":"very important"}"#
        );
    }

    #[test]
    fn missing_fields_take_defaults() {
        let task: Task =
            serde_json::from_str(r#"{"id":1,"text":"Water plants"}"#).expect("deserialize");
        assert!(!task.completed);
        assert_eq!(task.importance, Importance::None);
    }
}
