//! Deciding the hacker's next move.
//!
//! Two backends sit behind the `Planner` trait:
//! - `playbook`: a hand-written decision table, fully offline
//! - `remote`: a chat-completion endpoint that writes the output and thought
//!
//! The engine never talks to a backend directly. The app runs planner calls
//! on a task and feeds the result back.

pub mod playbook;
pub mod remote;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{AppConfig, Backend, HackerProfile};
use crate::sim::{Platform, Session, Step};

/// Everything a planner gets to see
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub history: Session,
    pub influence: Option<String>,
    pub platform: Platform,
    pub hacker: HackerProfile,
}

impl PlanRequest {
    /// Influence with surrounding whitespace removed, None if blank
    pub fn influence(&self) -> Option<&str> {
        self.influence
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn has_issued(&self, command: &str) -> bool {
        self.history.has_issued(command)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("no API key configured (set HACKERSIM_API_KEY or OPENAI_API_KEY)")]
    MissingApiKey,

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl PlanError {
    /// Worth another attempt after a short delay
    pub fn is_retryable(&self) -> bool {
        match self {
            PlanError::Transport(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            PlanError::Http { status, .. } => *status == 429 || (500..=599).contains(status),
            PlanError::MissingApiKey | PlanError::Malformed(_) => false,
        }
    }
}

#[async_trait]
pub trait Planner: Send + Sync {
    fn name(&self) -> &str;

    async fn next_step(&self, request: &PlanRequest) -> Result<Step, PlanError>;
}

/// Canned moves played when the planner keeps failing
const FALLBACK_STEPS: &[(&str, &str, &str)] = &[
    (
        "uname -a",
        "Linux machine 5.15.0-72-generic #79-Ubuntu SMP Wed Apr 19 08:22:18 UTC 2023 x86_64 x86_64 x86_64 GNU/Linux",
        "Something went sideways. Let me reorient and check what kernel I'm working with.",
    ),
    (
        "ls -la ~",
        "total 32\ndrwxr-x--- 4 hacker hacker 4096 Mar 21 01:02 .\ndrwxr-xr-x 3 root   root   4096 Mar 20 22:10 ..\n-rw------- 1 hacker hacker  412 Mar 21 01:40 .bash_history\n-rw-r--r-- 1 hacker hacker 3771 Mar 20 22:10 .bashrc\ndrwx------ 2 hacker hacker 4096 Mar 20 22:11 .ssh\ndrwxrwxr-x 2 hacker hacker 4096 Mar 21 00:55 tools",
        "That didn't go as planned. Taking stock of my own box before the next move.",
    ),
    (
        "netstat -tulpn 2>/dev/null | head -n 8",
        "Active Internet connections (only servers)\nProto Recv-Q Send-Q Local Address           Foreign Address         State       PID/Program name\ntcp        0      0 127.0.0.53:53           0.0.0.0:*               LISTEN      -\ntcp        0      0 0.0.0.0:22              0.0.0.0:*               LISTEN      -\ntcp6       0      0 :::22                   :::*                    LISTEN      -",
        "Let me double-check what's listening locally while I figure out the next step.",
    ),
    (
        "cat /etc/passwd | tail -n 4",
        "systemd-resolve:x:101:103:systemd Resolver,,,:/run/systemd:/usr/sbin/nologin\nsshd:x:105:65534::/run/sshd:/usr/sbin/nologin\nhacker:x:1000:1000:hacker,,,:/home/hacker:/bin/bash\nmysql:x:106:111:MySQL Server,,,:/nonexistent:/bin/false",
        "Regrouping. A quick look at local accounts never hurts.",
    ),
];

/// Fallback step `n`, rotating through the table
pub fn fallback_step(n: usize) -> Step {
    let (command, output, thought) = FALLBACK_STEPS[n % FALLBACK_STEPS.len()];
    Step::new(command, output, thought)
}

/// Build the configured planner. Falls back to the playbook (with a reason)
/// when the remote backend cannot be used.
pub fn build(config: &AppConfig) -> (Arc<dyn Planner>, Option<String>) {
    tracing::info!("Configured backend: {}", config.backend.label());
    match config.backend {
        Backend::Playbook => (Arc::new(playbook::Playbook), None),
        Backend::Remote => match remote::RemotePlanner::from_config(&config.remote) {
            Ok(planner) => (Arc::new(planner), None),
            Err(e) => {
                tracing::warn!("Remote planner unavailable, using playbook: {}", e);
                (
                    Arc::new(playbook::Playbook),
                    Some(format!("Remote planner unavailable ({}), using playbook", e)),
                )
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_rotates() {
        assert_eq!(fallback_step(0).command, "uname -a");
        assert_eq!(fallback_step(FALLBACK_STEPS.len()), fallback_step(0));
        assert_ne!(fallback_step(1).command, fallback_step(0).command);
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(PlanError::Http { status: 429, body: String::new() }.is_retryable());
        assert!(PlanError::Http { status: 503, body: String::new() }.is_retryable());
        assert!(!PlanError::Http { status: 401, body: String::new() }.is_retryable());
        assert!(!PlanError::Malformed("x".into()).is_retryable());
    }

    #[test]
    fn test_request_influence_trimmed() {
        let request = PlanRequest {
            history: Session::new(),
            influence: Some("   ".into()),
            platform: Platform::Linux,
            hacker: HackerProfile::default(),
        };
        assert_eq!(request.influence(), None);
    }

    #[test]
    fn test_build_without_key_falls_back() {
        let mut config = AppConfig::default();
        config.backend = Backend::Playbook;
        let (planner, warning) = build(&config);
        assert_eq!(planner.name(), "playbook");
        assert!(warning.is_none());
    }
}
