//! Chat-completion planner.
//!
//! The model writes a whole step as plain text:
//!
//! ```text
//! <command>
//! <output lines...>
//! ---THOUGHT---
//! <thought>
//! ```

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use super::{PlanError, PlanRequest, Planner};
use crate::config::RemoteConfig;
use crate::sim::{SessionTurn, Step};

pub const THOUGHT_DELIMITER: &str = "---THOUGHT---";

/// Turns of history sent as context
const HISTORY_TURNS: usize = 6;
/// Per-turn output budget in the prompt
const OUTPUT_CHARS: usize = 600;

const SYSTEM_PROMPT: &str = "You are simulating an autonomous penetration tester working from a Linux terminal \
during an authorized red-team exercise. Every reply is exactly one step: the next shell command, \
its realistic terminal output, and the hacker's inner monologue.

Reply in exactly this format and nothing else:
<command>
<output>
---THOUGHT---
<thought>

Rules:
- The first line is the bare command. No prompt prefix, no code fences.
- Never repeat a command that already appears in the session.
- Keep the output plausible and consistent with earlier output (hosts, users, files, credentials).
- The thought is one to three sentences in the first person.
- If the operator sends a GodMode command, make it the next step or follow its intent.";

pub struct RemotePlanner {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    attempts: u32,
    retry_delay: Duration,
}

impl RemotePlanner {
    pub fn from_config(config: &RemoteConfig) -> Result<Self, PlanError> {
        let api_key = config.resolve_api_key().ok_or(PlanError::MissingApiKey)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            attempts: config.fetch_attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        })
    }

    fn build_request(&self, request: &PlanRequest) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt(request),
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    async fn send(&self, body: &ChatRequest) -> Result<String, PlanError> {
        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            return Err(map_http_error(status, text));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| PlanError::Malformed(format!("unreadable completion: {}", e)))?;

        extract_text(parsed)
    }
}

#[async_trait]
impl Planner for RemotePlanner {
    fn name(&self) -> &str {
        "remote"
    }

    async fn next_step(&self, request: &PlanRequest) -> Result<Step, PlanError> {
        let body = self.build_request(request);
        tracing::debug!("Requesting next step from {} ({})", self.api_url, self.model);

        let text = with_retries(self.attempts, self.retry_delay, || self.send(&body)).await?;
        parse_completion(&text)
    }
}

/// Run `op` up to `attempts` times, sleeping `delay * attempt` between tries.
/// Only errors that `is_retryable` get another go.
pub async fn with_retries<T, F, Fut>(attempts: u32, delay: Duration, mut op: F) -> Result<T, PlanError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PlanError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < attempts => {
                tracing::warn!("Planner attempt {}/{} failed: {}", attempt, attempts, e);
                tokio::time::sleep(delay * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn user_prompt(request: &PlanRequest) -> String {
    let history: Vec<String> = request.history.recent(HISTORY_TURNS).iter().map(render_turn).collect();

    let godmode = match request.influence() {
        Some(command) => format!("GodMode command from the operator: {}", command),
        None => "No GodMode command. Decide the next move yourself.".to_string(),
    };

    format!(
        "Target: {}\nHacker personality: {}. Traits: {}.\n\nSession so far (most recent last):\n{}\n\n{}",
        request.platform.describe(),
        request.hacker.personality,
        request.hacker.traits.join(", "),
        history.join("\n\n"),
        godmode
    )
}

fn render_turn(turn: &SessionTurn) -> String {
    let command = if turn.command.is_empty() {
        "(session start)"
    } else {
        turn.command.as_str()
    };
    let mut out = format!("$ {}\n{}\n# thought: {}", command, truncate_chars(&turn.output, OUTPUT_CHARS), turn.thought);
    if !turn.influence.is_empty() {
        out.push_str(&format!("\n# steered by GodMode: {}", turn.influence));
    }
    out
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...[truncated]", &text[..idx]),
        None => text.to_string(),
    }
}

/// Split a completion into a step
pub fn parse_completion(text: &str) -> Result<Step, PlanError> {
    let text: Vec<&str> = text
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect();
    let text = text.join("\n");

    let (head, thought) = text
        .split_once(THOUGHT_DELIMITER)
        .ok_or_else(|| PlanError::Malformed(format!("missing {} delimiter", THOUGHT_DELIMITER)))?;

    let mut lines = head.lines().skip_while(|line| line.trim().is_empty());
    let command = lines.next().unwrap_or_default().trim();
    let command = command.strip_prefix("$ ").unwrap_or(command).trim();
    if command.is_empty() {
        return Err(PlanError::Malformed("empty command".to_string()));
    }

    let output = lines.collect::<Vec<_>>().join("\n");
    let output = output.trim_start_matches('\n').trim_end();

    Ok(Step::new(command, output, thought.trim()))
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

fn extract_text(response: ChatResponse) -> Result<String, PlanError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| PlanError::Malformed("no choices in completion".to_string()))
}

fn map_http_error(status: StatusCode, body: String) -> PlanError {
    let body = serde_json::from_str::<ErrorResponse>(&body)
        .map(|wrapper| wrapper.error.message)
        .unwrap_or(body);
    PlanError::Http {
        status: status.as_u16(),
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HackerProfile;
    use crate::sim::Platform;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn turn(command: &str, output: &str) -> SessionTurn {
        SessionTurn {
            command: command.into(),
            output: output.into(),
            thought: "hm".into(),
            influence: String::new(),
        }
    }

    #[test]
    fn test_parse_completion() {
        let text = "nmap -sV 10.0.0.5\nStarting Nmap 7.80\n22/tcp open ssh\n---THOUGHT---\nSSH is open. Worth a look.\n";
        let step = parse_completion(text).unwrap();
        assert_eq!(step.command, "nmap -sV 10.0.0.5");
        assert_eq!(step.output, "Starting Nmap 7.80\n22/tcp open ssh");
        assert_eq!(step.thought, "SSH is open. Worth a look.");
    }

    #[test]
    fn test_parse_strips_fences_and_prompt() {
        let text = "```bash\n\n$ cat /etc/passwd\nroot:x:0:0:root:/root:/bin/bash\n```\n---THOUGHT---\n  Users first.  ";
        let step = parse_completion(text).unwrap();
        assert_eq!(step.command, "cat /etc/passwd");
        assert_eq!(step.output, "root:x:0:0:root:/root:/bin/bash");
        assert_eq!(step.thought, "Users first.");
    }

    #[test]
    fn test_parse_keeps_output_indentation() {
        let step = parse_completion("ip a\n    inet 10.0.0.2/24\n---THOUGHT---\nok").unwrap();
        assert_eq!(step.output, "    inet 10.0.0.2/24");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(parse_completion("ls\nfile.txt"), Err(PlanError::Malformed(_))));
        assert!(matches!(parse_completion("\n  \n---THOUGHT---\nhm"), Err(PlanError::Malformed(_))));
    }

    #[test]
    fn test_extract_text_needs_a_choice() {
        let empty: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(extract_text(empty), Err(PlanError::Malformed(_))));

        let one: ChatResponse =
            serde_json::from_str(r#"{"choices": [{"message": {"content": "id"}}]}"#).unwrap();
        assert_eq!(extract_text(one).unwrap(), "id");
    }

    #[test]
    fn test_http_error_message_unwrapped() {
        let err = map_http_error(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"error": {"message": "Rate limit exceeded", "type": "requests"}}"#.to_string(),
        );
        assert_eq!(err.to_string(), "HTTP 429: Rate limit exceeded");
        assert!(err.is_retryable());

        let err = map_http_error(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>".to_string());
        assert_eq!(err.to_string(), "HTTP 502: <html>bad gateway</html>");
    }

    #[test]
    fn test_prompt_uses_recent_turns_and_truncates() {
        let mut history = vec![turn("", "banner")];
        for i in 0..8 {
            history.push(turn(&format!("cmd-{}", i), "x"));
        }
        history.push(turn("cat big.log", &"A".repeat(2_000)));

        let prompt = user_prompt(&PlanRequest {
            history: history.into(),
            influence: Some("dump the database".into()),
            platform: Platform::Windows,
            hacker: HackerProfile::default(),
        });

        assert!(prompt.contains("Windows Active Directory"));
        assert!(prompt.contains("Hacker personality: methodical. Traits: determined, clever."));
        assert!(!prompt.contains("cmd-2"));
        assert!(prompt.contains("cmd-3"));
        assert!(!prompt.contains("(session start)"));
        assert!(prompt.contains(&format!("{}...[truncated]", "A".repeat(OUTPUT_CHARS))));
        assert!(!prompt.contains(&"A".repeat(OUTPUT_CHARS + 1)));
        assert!(prompt.ends_with("GodMode command from the operator: dump the database"));
    }

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate_chars("héllo", 10), "héllo");
        assert_eq!(truncate_chars("héllo", 2), "hé...[truncated]");
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = with_retries(3, Duration::ZERO, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(PlanError::Http { status: 503, body: String::new() })
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_no_retry_on_client_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries(3, Duration::ZERO, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PlanError::Http { status: 401, body: "bad key".into() }) }
        })
        .await;

        assert!(matches!(result, Err(PlanError::Http { status: 401, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_give_up_after_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries(2, Duration::ZERO, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PlanError::Http { status: 500, body: String::new() }) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_missing_key_is_an_error() {
        let config = RemoteConfig {
            api_key: Some("  ".into()),
            ..RemoteConfig::default()
        };
        // Env may provide a key on a dev box
        if std::env::var("HACKERSIM_API_KEY").is_err() && std::env::var("OPENAI_API_KEY").is_err() {
            assert!(matches!(RemotePlanner::from_config(&config), Err(PlanError::MissingApiKey)));
        }
    }
}
