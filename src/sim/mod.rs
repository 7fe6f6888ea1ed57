//! Simulated hacking session: the turn history, the reveal timer, the
//! display queue, the call limiter and the engine that sequences them.

pub mod banner;
pub mod director;
pub mod engine;
pub mod ratelimit;
pub mod reveal;

use serde::{Deserialize, Serialize};

/// Target platform the simulated attacker goes after
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Linux,
    Windows,
    #[value(name = "macos")]
    MacOs,
    Android,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Linux,
        Platform::Windows,
        Platform::MacOs,
        Platform::Android,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Platform::Linux => "Linux",
            Platform::Windows => "Windows",
            Platform::MacOs => "macOS",
            Platform::Android => "Android",
        }
    }

    /// Longer description used in prompts
    pub fn describe(&self) -> &'static str {
        match self {
            Platform::Linux => "a Linux network (Ubuntu servers, Apache, MySQL)",
            Platform::Windows => "a Windows Active Directory network (domain controller, SMB, RDP)",
            Platform::MacOs => "a macOS fleet (SSH, Bonjour services, developer laptops)",
            Platform::Android => "Android devices reachable over ADB and Wi-Fi",
        }
    }

    pub fn next(&self) -> Platform {
        let idx = Self::ALL.iter().position(|p| p == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }
}

/// One record of the session, kept for display and as prompt context
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTurn {
    pub command: String,
    pub output: String,
    pub thought: String,
    /// GodMode command that steered this turn (empty if none)
    #[serde(rename = "godmode_influence")]
    pub influence: String,
}

/// What a planner decided the hacker does next
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub command: String,
    pub output: String,
    pub thought: String,
    /// Came from the fallback table after a planner failure
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

impl Step {
    pub fn new(command: impl Into<String>, output: impl Into<String>, thought: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            output: output.into(),
            thought: thought.into(),
            degraded: false,
        }
    }

    pub fn into_turn(self, influence: Option<String>) -> SessionTurn {
        SessionTurn {
            command: self.command,
            output: self.output,
            thought: self.thought,
            influence: influence.unwrap_or_default(),
        }
    }
}

/// Ordered, append-only history of the session
#[derive(Debug, Clone, Default)]
pub struct Session {
    turns: Vec<SessionTurn>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: SessionTurn) {
        self.turns.push(turn);
    }

    pub fn last(&self) -> Option<&SessionTurn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> &[SessionTurn] {
        &self.turns
    }

    pub fn issued_commands(&self) -> impl Iterator<Item = &str> {
        self.turns.iter().map(|t| t.command.as_str())
    }

    pub fn has_issued(&self, command: &str) -> bool {
        self.issued_commands().any(|c| c == command)
    }

    /// The last `n` turns, oldest first
    pub fn recent(&self, n: usize) -> &[SessionTurn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }
}

impl From<Vec<SessionTurn>> for Session {
    fn from(turns: Vec<SessionTurn>) -> Self {
        Self { turns }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(command: &str) -> SessionTurn {
        SessionTurn {
            command: command.to_string(),
            ..SessionTurn::default()
        }
    }

    #[test]
    fn test_recent_and_issued() {
        let session = Session::from(vec![turn(""), turn("whoami"), turn("id"), turn("ls")]);

        assert_eq!(session.recent(2).len(), 2);
        assert_eq!(session.recent(2)[0].command, "id");
        assert_eq!(session.recent(10).len(), 4);
        assert!(session.has_issued("whoami"));
        assert!(!session.has_issued("who"));
        assert_eq!(session.last().map(|t| t.command.as_str()), Some("ls"));
    }

    #[test]
    fn test_turn_json_uses_godmode_field() {
        let json = serde_json::to_value(Step::new("ls", "a b", "hm").into_turn(Some("scan".into()))).unwrap();
        assert_eq!(json["godmode_influence"], "scan");
        assert_eq!(json["command"], "ls");
    }

    #[test]
    fn test_platform_cycles() {
        let mut p = Platform::Linux;
        for _ in 0..Platform::ALL.len() {
            p = p.next();
        }
        assert_eq!(p, Platform::Linux);
        assert_eq!(Platform::Windows.next(), Platform::MacOs);
    }
}
