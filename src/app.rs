use anyhow::Result;
use chrono::Utc;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::task::JoinHandle;

use crate::config::{AppConfig, Pacing};
use crate::planner::{self, PlanError, Planner};
use crate::sim::director::{Effect, Pane};
use crate::sim::engine::Engine;
use crate::sim::{Platform, Step};

/// Characters kept per pane before the oldest text is dropped
const PANE_CAP: usize = 200_000;

/// Lines moved per PageUp/PageDown
const SCROLL_STEP: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Popup {
    None,
    Help,
    Platform,
}

/// Planner call running on its own task
struct InFlight {
    rx: oneshot::Receiver<Result<Step, PlanError>>,
    handle: JoinHandle<()>,
}

pub struct App {
    pub popup: Popup,
    pub config: AppConfig,
    pub engine: Engine,
    planner: Arc<dyn Planner>,
    in_flight: Option<InFlight>,

    // Pane contents
    pub terminal: String,
    pub thoughts: String,

    // GodMode input buffer
    pub input: String,

    pub sound: bool,
    pub show_debug: bool,

    /// Terminal pane lines scrolled back from the tail (0 = follow)
    pub scroll: usize,

    /// Highlighted row in the platform picker
    pub platform_selected: usize,

    // Status message (shown in info line, auto-clears after timeout)
    pub status_message: Option<String>,
    pub status_message_time: Option<Instant>,
}

impl App {
    pub fn new(config: AppConfig, pacing: Pacing) -> Self {
        let (planner, warning) = planner::build(&config);
        let mut engine = Engine::new(&config, pacing);
        engine.boot(Instant::now(), Utc::now());

        let mut app = Self {
            popup: Popup::None,
            sound: config.sound,
            show_debug: config.show_debug_log,
            platform_selected: 0,
            config,
            engine,
            planner,
            in_flight: None,
            terminal: String::new(),
            thoughts: String::new(),
            input: String::new(),
            scroll: 0,
            status_message: None,
            status_message_time: None,
        };

        if let Some(warning) = warning {
            app.engine.log(warning.clone());
            app.set_status(warning);
        }
        if app.engine.platform() != Platform::Linux && app.planner.name() == "playbook" {
            app.engine.log("Playbook targets Linux only. Platform selection is cosmetic.");
        }
        app.apply_effects();
        app
    }

    pub fn backend_name(&self) -> &str {
        self.planner.name()
    }

    /// Set a status message (auto-clears after 3 seconds)
    fn set_status(&mut self, msg: impl Into<String>) {
        self.status_message = Some(msg.into());
        self.status_message_time = Some(Instant::now());
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Result<()> {
        // Handle popups first
        if self.popup != Popup::None {
            return self.handle_popup_key(key);
        }

        self.handle_normal_key(key)
    }

    fn handle_normal_key(&mut self, key: KeyEvent) -> Result<()> {
        match key.code {
            KeyCode::F(1) => self.popup = Popup::Help,
            KeyCode::Char('?') if self.input.is_empty() => self.popup = Popup::Help,
            KeyCode::F(2) => {
                self.sound = !self.sound;
                self.engine.set_sound(self.sound);
                self.set_status(if self.sound { "Sound on" } else { "Sound off" });
            }
            KeyCode::F(3) => self.show_debug = !self.show_debug,
            KeyCode::F(4) => {
                self.platform_selected = Platform::ALL
                    .iter()
                    .position(|p| *p == self.engine.platform())
                    .unwrap_or(0);
                self.popup = Popup::Platform;
            }

            KeyCode::PageUp => self.scroll = self.scroll.saturating_add(SCROLL_STEP),
            KeyCode::PageDown => self.scroll = self.scroll.saturating_sub(SCROLL_STEP),
            KeyCode::End => self.scroll = 0,

            KeyCode::Enter if key.modifiers.contains(KeyModifiers::ALT) => self.input.push('\n'),
            KeyCode::Enter => self.submit_godmode()?,
            KeyCode::Esc => self.input.clear(),
            KeyCode::Backspace => {
                self.input.pop();
            }
            KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => self.input.push(c),
            _ => {}
        }
        Ok(())
    }

    fn handle_popup_key(&mut self, key: KeyEvent) -> Result<()> {
        match self.popup {
            Popup::Help => {
                if matches!(
                    key.code,
                    KeyCode::Esc | KeyCode::Enter | KeyCode::F(1) | KeyCode::Char('?') | KeyCode::Char('q')
                ) {
                    self.popup = Popup::None;
                }
            }
            Popup::Platform => match key.code {
                KeyCode::Esc | KeyCode::F(4) => self.popup = Popup::None,
                KeyCode::Up | KeyCode::Char('k') => {
                    self.platform_selected = self.platform_selected.saturating_sub(1);
                }
                KeyCode::Down | KeyCode::Char('j') => {
                    self.platform_selected = (self.platform_selected + 1).min(Platform::ALL.len() - 1);
                }
                KeyCode::Tab => {
                    let next = Platform::ALL[self.platform_selected].next();
                    self.platform_selected = Platform::ALL.iter().position(|p| *p == next).unwrap_or(0);
                }
                KeyCode::Enter => {
                    let platform = Platform::ALL[self.platform_selected];
                    self.engine.set_platform(platform);
                    self.config.platform = platform;
                    self.set_status(format!("Target platform: {}", platform.label()));
                    self.popup = Popup::None;
                }
                _ => {}
            },
            Popup::None => {}
        }
        Ok(())
    }

    fn submit_godmode(&mut self) -> Result<()> {
        let command = std::mem::take(&mut self.input);
        if !self.engine.submit_godmode(&command, Instant::now()) {
            return Ok(());
        }

        self.set_status("GodMode command received");
        if self.config.notifications {
            tokio::task::spawn_blocking(|| {
                if let Err(e) = notify(
                    "GodMode Command Received",
                    "Your command will influence the hacker's next action.",
                ) {
                    tracing::warn!("Notification failed: {}", e);
                }
            });
        }
        self.apply_effects();
        Ok(())
    }

    pub fn tick(&mut self) -> Result<()> {
        let now = Instant::now();

        self.poll_planner(now);
        self.engine.tick(now);
        if let Some(request) = self.engine.take_request() {
            self.spawn_planner(request);
        }
        self.apply_effects();

        // Clear status message after 3 seconds
        if let Some(time) = self.status_message_time {
            if time.elapsed().as_secs() >= 3 {
                self.status_message = None;
                self.status_message_time = None;
            }
        }

        Ok(())
    }

    fn spawn_planner(&mut self, request: planner::PlanRequest) {
        let planner = Arc::clone(&self.planner);
        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let result = planner.next_step(&request).await;
            // Receiver is gone only when the app is shutting down
            let _ = tx.send(result);
        });
        self.in_flight = Some(InFlight { rx, handle });
    }

    fn poll_planner(&mut self, now: Instant) {
        let Some(flight) = self.in_flight.as_mut() else {
            return;
        };

        let result = match flight.rx.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return,
            Err(TryRecvError::Closed) => {
                tracing::error!("Planner task ended without an answer");
                Err(PlanError::Malformed("planner task ended without an answer".to_string()))
            }
        };
        self.in_flight = None;
        self.engine.complete(result, now);
    }

    fn apply_effects(&mut self) {
        for effect in self.engine.drain_effects() {
            match effect {
                Effect::Append { pane: Pane::Terminal, text } => push_capped(&mut self.terminal, &text),
                Effect::Append { pane: Pane::Thoughts, text } => push_capped(&mut self.thoughts, &text),
                Effect::Bell => ring_bell(),
            }
        }
    }

    /// Abort the in-flight planner task, if any
    pub fn shutdown(&mut self) {
        if let Some(flight) = self.in_flight.take() {
            flight.handle.abort();
        }
    }
}

fn push_capped(pane: &mut String, text: &str) {
    pane.push_str(text);
    if pane.len() > PANE_CAP {
        let mut cut = pane.len() - PANE_CAP;
        while !pane.is_char_boundary(cut) {
            cut += 1;
        }
        pane.drain(..cut);
    }
}

fn ring_bell() {
    let mut stdout = std::io::stdout();
    if let Err(e) = stdout.write_all(b"\x07").and_then(|_| stdout.flush()) {
        tracing::debug!("Bell failed: {}", e);
    }
}

fn notify(summary: &str, body: &str) -> Result<()> {
    notify_rust::Notification::new()
        .summary(summary)
        .body(body)
        .appname("hackersim")
        .icon("utilities-terminal")
        .show()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn fast_app() -> App {
        let mut config = AppConfig::default();
        config.sound = false;
        config.rate_limit.delay_ms = 0;
        config.rate_limit.floor_ms = 0;
        config.pacing = Pacing::instant();
        let pacing = config.pacing.clone();
        App::new(config, pacing)
    }

    fn type_text(app: &mut App, text: &str) {
        for c in text.chars() {
            app.handle_key(key(KeyCode::Char(c))).unwrap();
        }
    }

    #[tokio::test]
    async fn test_boot_fills_terminal() {
        let app = fast_app();
        assert!(app.terminal.starts_with("Welcome to Ubuntu 22.04.2 LTS"));
        assert!(app.terminal.ends_with("hacker@machine:~$ "));
        assert_eq!(app.backend_name(), "playbook");
    }

    #[tokio::test]
    async fn test_session_runs_through_planner_task() {
        let mut app = fast_app();
        for _ in 0..500 {
            app.tick().unwrap();
            tokio::task::yield_now().await;
            if app.engine.session().len() >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        assert!(app.engine.session().len() >= 3, "session stuck at {:?}", app.engine.phase());
        assert!(app.terminal.contains("whoami && hostname\nhacker\nmachine"));
        assert!(app.thoughts.contains("First, let me identify who I am"));
        app.shutdown();
        assert!(app.in_flight.is_none());
    }

    #[tokio::test]
    async fn test_godmode_input_submits() {
        let mut app = fast_app();
        type_text(&mut app, "ls -la");
        assert_eq!(app.input, "ls -la");

        app.handle_key(key(KeyCode::Enter)).unwrap();
        assert!(app.input.is_empty());
        assert_eq!(app.engine.influence(), Some("ls -la"));
        assert_eq!(app.status_message.as_deref(), Some("GodMode command received"));
    }

    #[tokio::test]
    async fn test_blank_godmode_is_ignored() {
        let mut app = fast_app();
        type_text(&mut app, "   ");
        app.handle_key(key(KeyCode::Enter)).unwrap();
        assert_eq!(app.engine.influence(), None);
        assert!(app.status_message.is_none());
    }

    #[tokio::test]
    async fn test_input_editing_keys() {
        let mut app = fast_app();
        type_text(&mut app, "cat");
        app.handle_key(KeyEvent::new(KeyCode::Enter, KeyModifiers::ALT)).unwrap();
        type_text(&mut app, "id?");
        assert_eq!(app.input, "cat\nid?");
        assert_eq!(app.popup, Popup::None);

        app.handle_key(key(KeyCode::Backspace)).unwrap();
        assert_eq!(app.input, "cat\nid");

        app.handle_key(key(KeyCode::Esc)).unwrap();
        assert!(app.input.is_empty());

        app.handle_key(key(KeyCode::Char('?'))).unwrap();
        assert_eq!(app.popup, Popup::Help);
        app.handle_key(key(KeyCode::Esc)).unwrap();
        assert_eq!(app.popup, Popup::None);
    }

    #[tokio::test]
    async fn test_toggles_and_scroll() {
        let mut app = fast_app();
        app.handle_key(key(KeyCode::F(2))).unwrap();
        assert!(app.sound);
        app.handle_key(key(KeyCode::F(3))).unwrap();
        assert!(app.show_debug);

        app.handle_key(key(KeyCode::PageUp)).unwrap();
        app.handle_key(key(KeyCode::PageUp)).unwrap();
        app.handle_key(key(KeyCode::PageDown)).unwrap();
        assert_eq!(app.scroll, SCROLL_STEP);
        app.handle_key(key(KeyCode::End)).unwrap();
        assert_eq!(app.scroll, 0);
    }

    #[tokio::test]
    async fn test_platform_picker() {
        let mut app = fast_app();
        app.handle_key(key(KeyCode::F(4))).unwrap();
        assert_eq!(app.popup, Popup::Platform);
        assert_eq!(app.platform_selected, 0);

        app.handle_key(key(KeyCode::Down)).unwrap();
        app.handle_key(key(KeyCode::Enter)).unwrap();
        assert_eq!(app.popup, Popup::None);
        assert_eq!(app.engine.platform(), Platform::Windows);
        assert!(app.engine.debug_log().any(|l| l.ends_with("Target platform set to Windows.")));
    }

    #[test]
    fn test_push_capped_keeps_tail() {
        let mut pane = "é".repeat(PANE_CAP / 2);
        push_capped(&mut pane, "tail");
        assert!(pane.len() <= PANE_CAP);
        assert!(pane.ends_with("tail"));
    }
}
