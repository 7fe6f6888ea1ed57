use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::sim::Platform;

/// Where the next simulated step comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Hand-written decision table, works offline
    #[default]
    Playbook,
    /// Chat-completion endpoint
    Remote,
}

impl Backend {
    pub fn label(&self) -> &'static str {
        match self {
            Backend::Playbook => "playbook",
            Backend::Remote => "remote",
        }
    }
}

/// Reveal speeds and delays between simulated steps (milliseconds)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Pacing {
    pub thought_ms: u64,
    pub typing_ms: u64,
    pub output_ms: u64,
    pub boot_delay_ms: u64,
    pub next_step_min_ms: u64,
    pub next_step_jitter_ms: u64,
    pub restart_delay_ms: u64,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            thought_ms: 20,
            typing_ms: 30,
            output_ms: 1,
            boot_delay_ms: 1000,
            next_step_min_ms: 10_000,
            next_step_jitter_ms: 5_000,
            restart_delay_ms: 10_000,
        }
    }
}

impl Pacing {
    /// Scale every interval by `factor` (2.0 = twice as slow)
    pub fn scaled(&self, factor: f64) -> Self {
        let factor = if factor.is_finite() && factor >= 0.0 { factor } else { 1.0 };
        let scale = |ms: u64| (ms as f64 * factor).round() as u64;
        Self {
            thought_ms: scale(self.thought_ms),
            typing_ms: scale(self.typing_ms),
            output_ms: scale(self.output_ms),
            boot_delay_ms: scale(self.boot_delay_ms),
            next_step_min_ms: scale(self.next_step_min_ms),
            next_step_jitter_ms: scale(self.next_step_jitter_ms),
            restart_delay_ms: scale(self.restart_delay_ms),
        }
    }

    /// No reveal pacing and no gaps between steps
    pub fn instant() -> Self {
        Self::default().scaled(0.0)
    }

    pub fn thought(&self) -> Duration { Duration::from_millis(self.thought_ms) }
    pub fn typing(&self) -> Duration { Duration::from_millis(self.typing_ms) }
    pub fn output(&self) -> Duration { Duration::from_millis(self.output_ms) }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Minimum gap between two planner calls
    pub delay_ms: u64,
    /// The delay never relaxes below this
    pub floor_ms: u64,
    /// Calls allowed per window before the hacker takes a break
    pub max_calls: u32,
    pub window_secs: u64,
    pub break_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            delay_ms: 15_000,
            floor_ms: 15_000,
            max_calls: 18,
            window_secs: 300,
            break_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub api_url: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub fetch_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            temperature: 0.8,
            max_tokens: 800,
            timeout_secs: 30,
            fetch_attempts: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl RemoteConfig {
    /// API key lookup: config file, then HACKERSIM_API_KEY, then OPENAI_API_KEY
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("HACKERSIM_API_KEY").ok())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
    }
}

/// Who the simulated attacker is (sent as prompt context)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HackerProfile {
    pub personality: String,
    pub traits: Vec<String>,
}

impl Default for HackerProfile {
    fn default() -> Self {
        Self {
            personality: "methodical".to_string(),
            traits: vec!["determined".to_string(), "clever".to_string()],
        }
    }
}

/// Optional hex overrides for the palette, e.g. `terminal = "#33ff33"`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ThemeOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub godmode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub border: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub danger: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_dim: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: Backend,

    /// Target platform the attacker is going after
    pub platform: Platform,

    /// Ring the terminal bell after each typed command
    pub sound: bool,

    /// Desktop notification when a GodMode command is accepted
    pub notifications: bool,

    /// Show the debug log pane on startup
    pub show_debug_log: bool,

    pub pacing: Pacing,
    pub rate_limit: RateLimitConfig,
    pub remote: RemoteConfig,
    pub hacker: HackerProfile,
    pub theme: ThemeOverrides,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Playbook,
            platform: Platform::Linux,
            sound: true,
            notifications: false,
            show_debug_log: false,
            pacing: Pacing::default(),
            rate_limit: RateLimitConfig::default(),
            remote: RemoteConfig::default(),
            hacker: HackerProfile::default(),
            theme: ThemeOverrides::default(),
        }
    }
}

impl AppConfig {
    /// Get the config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?
            .join("hackersim");

        if let Err(e) = std::fs::create_dir_all(&config_dir) {
            tracing::warn!("Could not create config directory: {}", e);
        }

        Ok(config_dir.join("config.toml"))
    }

    /// Load config from file, or create default
    pub fn load() -> Result<Self> {
        let path = match Self::config_path() {
            Ok(p) => p,
            Err(_) => return Ok(AppConfig::default()),
        };

        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(content) => match Self::parse(&content) {
                    Ok(config) => return Ok(config),
                    Err(e) => tracing::warn!("Failed to parse config: {}", e),
                },
                Err(e) => tracing::warn!("Failed to read config: {}", e),
            }
            // Leave a broken file alone so the user can fix it
            return Ok(AppConfig::default());
        }

        let config = AppConfig::default();
        let _ = config.save();
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut config: AppConfig = toml::from_str(content)?;
        config.sanitize();
        Ok(config)
    }

    /// Clamp values that would stall or spin the session loop
    fn sanitize(&mut self) {
        if self.rate_limit.max_calls == 0 {
            self.rate_limit.max_calls = 1;
        }
        if self.rate_limit.window_secs == 0 {
            self.rate_limit.window_secs = RateLimitConfig::default().window_secs;
        }
        if self.remote.fetch_attempts == 0 {
            self.remote.fetch_attempts = 1;
        }
        if self.hacker.personality.trim().is_empty() {
            self.hacker.personality = HackerProfile::default().personality;
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
