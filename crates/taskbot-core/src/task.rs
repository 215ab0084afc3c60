//! Task domain vocabulary shared by the store, the HTTP API and the bot.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Words that bump a free-text task to high priority.
const HIGH_MARKERS: &[&str] = &["urgent", "important", "!!!"];
/// Words that demote a free-text task to low priority.
const LOW_MARKERS: &[&str] = &["later", "someday", "maybe"];

#[derive(Debug, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseError {
    kind: &'static str,
    value: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ParseError;

    /// Case-insensitive: the web client sends `High`, the bot stores `high`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(ParseError {
                kind: "priority",
                value: s.to_string(),
            }),
        }
    }
}

impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "inprogress",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(Self::Todo),
            "inprogress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            _ => Err(ParseError {
                kind: "task status",
                value: s.to_string(),
            }),
        }
    }
}

/// Guess a priority from free text. High markers win over low markers.
pub fn infer_priority(text: &str) -> Priority {
    let lowered = text.to_lowercase();
    if HIGH_MARKERS.iter().any(|w| lowered.contains(w)) {
        Priority::High
    } else if LOW_MARKERS.iter().any(|w| lowered.contains(w)) {
        Priority::Low
    } else {
        Priority::Medium
    }
}
