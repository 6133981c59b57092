//! 推理历史中的消息
//!
//! 工具结果以 user 消息写回历史，统一前缀 `Observation from <tool>:`，
//! 推理后端据此区分原始问题与观察结果。

use serde::{Deserialize, Serialize};

pub const OBSERVATION_PREFIX: &str = "Observation from ";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// 工具输出写回历史
    pub fn observation(tool: &str, output: &str) -> Self {
        Self::user(format!("{OBSERVATION_PREFIX}{tool}:\n{output}"))
    }

    pub fn is_observation(&self) -> bool {
        self.role == Role::User && self.content.starts_with(OBSERVATION_PREFIX)
    }

    /// 观察结果对应的工具名
    pub fn observed_tool(&self) -> Option<&str> {
        if !self.is_observation() {
            return None;
        }
        self.content[OBSERVATION_PREFIX.len()..]
            .split_once(':')
            .map(|(tool, _)| tool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observation_round_trip() {
        let obs = Message::observation("search_code", "src/lib.rs:3: fn main");
        assert!(obs.is_observation());
        assert_eq!(obs.observed_tool(), Some("search_code"));
        assert!(!Message::user("Observation only in passing").is_observation());
        assert_eq!(Message::assistant("x").observed_tool(), None);
    }
}
