//! The autonomous session loop.
//!
//! I/O-free: the app ticks it, drains effects into the panes, takes planner
//! requests out of it and hands the results back. Time always comes in as
//! an argument so the whole loop can be driven from tests.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, Utc};

use super::banner::{self, INPUT_PROMPT, OPENING_THOUGHT};
use super::director::{Action, Director, Effect, Pane};
use super::ratelimit::RateLimiter;
use super::{Platform, Session, SessionTurn, Step};
use crate::config::{AppConfig, HackerProfile, Pacing};
use crate::planner::{fallback_step, PlanError, PlanRequest};

/// Consecutive failures retried before the session restarts
pub const MAX_RETRIES: u32 = 3;

/// Debug log lines kept in memory
const DEBUG_LOG_CAP: usize = 500;

const BREAK_START_THOUGHT: &str =
    "Hmm, I've been going pretty fast. Maybe I should take a quick break to avoid detection.";
const BREAK_END_THOUGHT: &str = "Alright, break's over. Let's get back to work.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Boot banner and opening thought still playing
    Booting,
    /// Waiting for the next step to be due
    Idle { until: Instant },
    /// Waiting out the rate limiter
    Throttled { until: Instant, needs_break: bool },
    /// Break thoughts and pause are playing
    Breaking,
    /// A planner request is out
    Planning,
    /// The decided step is being revealed
    Playing { step: Step, influence: Option<String> },
}

pub struct Engine {
    session: Session,
    director: Director,
    limiter: RateLimiter,
    pacing: Pacing,
    platform: Platform,
    hacker: HackerProfile,
    phase: Phase,
    influence: Option<String>,
    in_flight_influence: Option<String>,
    retries: u32,
    fallback_cursor: usize,
    outbox: Option<PlanRequest>,
    effects: VecDeque<Effect>,
    debug_log: VecDeque<String>,
    jitter_state: u64,
}

impl Engine {
    pub fn new(config: &AppConfig, pacing: Pacing) -> Self {
        // Seed for next-step jitter, same trick as picking a random endpoint
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::SystemTime::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9E37_79B9_7F4A_7C15);

        Self {
            session: Session::new(),
            director: Director::new(pacing.clone(), config.sound),
            limiter: RateLimiter::new(&config.rate_limit),
            pacing,
            platform: config.platform,
            hacker: config.hacker.clone(),
            phase: Phase::Booting,
            influence: None,
            in_flight_influence: None,
            retries: 0,
            fallback_cursor: 0,
            outbox: None,
            effects: VecDeque::new(),
            debug_log: VecDeque::new(),
            jitter_state: seed | 1,
        }
    }

    #[cfg(test)]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.jitter_state = seed | 1;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    #[cfg(test)]
    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn set_platform(&mut self, platform: Platform) {
        if self.platform != platform {
            self.platform = platform;
            self.log(format!("Target platform set to {}.", platform.label()));
        }
    }

    pub fn set_sound(&mut self, sound: bool) {
        self.director.set_sound(sound);
    }

    pub fn influence(&self) -> Option<&str> {
        self.influence.as_deref()
    }

    pub fn debug_log(&self) -> impl Iterator<Item = &str> {
        self.debug_log.iter().map(|s| s.as_str())
    }

    pub fn thought_streaming(&self) -> bool {
        self.director.thought_streaming()
    }

    /// Append a timestamped line to the debug log
    pub fn log(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!("{}", message);
        let stamp = Local::now().format("%H:%M:%S");
        self.debug_log.push_back(format!("[{}] {}", stamp, message));
        while self.debug_log.len() > DEBUG_LOG_CAP {
            self.debug_log.pop_front();
        }
    }

    /// Open the shell: banner, prompt, opening thought
    pub fn boot(&mut self, now: Instant, wall_clock: DateTime<Utc>) {
        self.log("HackerSim initialized. Hacker beginning autonomous session.");

        let motd = banner::motd(wall_clock);
        self.effects.push_back(Effect::Append {
            pane: Pane::Terminal,
            text: format!("{}{}", motd, INPUT_PROMPT),
        });

        self.session.push(SessionTurn {
            command: String::new(),
            output: motd,
            thought: OPENING_THOUGHT.to_string(),
            influence: String::new(),
        });

        self.director.push(Action::Thought(OPENING_THOUGHT.to_string()));
        self.phase = Phase::Booting;
        self.tick(now);
    }

    /// Drain what the UI should apply since the last call
    pub fn drain_effects(&mut self) -> Vec<Effect> {
        self.effects.drain(..).collect()
    }

    /// Planner request ready to be sent, if any
    pub fn take_request(&mut self) -> Option<PlanRequest> {
        self.outbox.take()
    }

    pub fn tick(&mut self, now: Instant) {
        let effects = self.director.tick(now);
        self.effects.extend(effects);

        let idle = self.director.is_idle();
        match self.phase {
            Phase::Booting if idle => {
                self.phase = Phase::Idle {
                    until: now + Duration::from_millis(self.pacing.boot_delay_ms),
                };
            }
            Phase::Idle { until } if idle && now >= until => self.begin_cycle(now),
            Phase::Throttled { .. } => self.leave_throttle(now),
            Phase::Breaking if idle => {
                self.limiter.finish_break(now);
                self.dispatch(now);
            }
            Phase::Playing { .. } if idle => {
                if let Phase::Playing { step, influence } = std::mem::replace(&mut self.phase, Phase::Booting) {
                    self.finish_turn(step, influence, now);
                }
            }
            _ => {}
        }
    }

    fn begin_cycle(&mut self, now: Instant) {
        self.log("Hacker contemplating next move...");

        let admission = self.limiter.admit(now);
        if !admission.wait.is_zero() {
            self.log(format!(
                "Waiting {} seconds before next hacker action",
                admission.wait.as_secs_f64()
            ));
        }
        self.phase = Phase::Throttled {
            until: now + admission.wait,
            needs_break: admission.needs_break,
        };
        // A zero wait goes straight through on this tick
        self.leave_throttle(now);
    }

    fn leave_throttle(&mut self, now: Instant) {
        if let Phase::Throttled { until, needs_break } = self.phase {
            if now >= until {
                if needs_break {
                    self.start_break();
                } else {
                    self.dispatch(now);
                }
            }
        }
    }

    fn start_break(&mut self) {
        self.log("Rate limit reached. Hacker taking a short break.");
        self.director.extend([
            Action::Thought(BREAK_START_THOUGHT.to_string()),
            Action::Pause(self.limiter.break_duration()),
            Action::Thought(BREAK_END_THOUGHT.to_string()),
        ]);
        self.phase = Phase::Breaking;
    }

    fn dispatch(&mut self, now: Instant) {
        self.limiter.record_call(now);
        self.in_flight_influence = self.influence.clone();
        self.outbox = Some(PlanRequest {
            history: self.session.clone(),
            influence: self.in_flight_influence.clone(),
            platform: self.platform,
            hacker: self.hacker.clone(),
        });
        self.phase = Phase::Planning;
    }

    /// Hand back the planner's answer for the request taken last
    pub fn complete(&mut self, result: Result<Step, PlanError>, now: Instant) {
        if !matches!(self.phase, Phase::Planning) {
            tracing::warn!("Planner result arrived outside of planning, dropped");
            return;
        }

        let influence = self.in_flight_influence.take();
        match result {
            Ok(step) => {
                self.retries = 0;
                self.limiter.relax();
                self.log("Hacker decided on next action.");
                self.play(step, influence);
            }
            Err(e) => self.fail(e, influence, now),
        }
    }

    fn play(&mut self, step: Step, influence: Option<String>) {
        self.director.extend([
            Action::Thought(step.thought.clone()),
            Action::Type(step.command.clone()),
            Action::Stream(step.output.clone()),
            Action::Prompt,
        ]);
        self.phase = Phase::Playing { step, influence };
    }

    fn fail(&mut self, error: PlanError, influence: Option<String>, now: Instant) {
        tracing::warn!("Planner failed: {}", error);
        self.director.extend([
            Action::Append(Pane::Terminal, format!("\n[!] Command failed: {}", error)),
            Action::Prompt,
        ]);

        if self.retries < MAX_RETRIES {
            self.retries += 1;
            self.log(format!("Retrying hacker session (Attempt {})", self.retries));
            self.phase = Phase::Idle {
                until: now + self.limiter.delay(),
            };
            return;
        }

        self.log(format!("Error in hacker session: {}. Restarting...", error));
        self.retries = 0;
        let mut step = fallback_step(self.fallback_cursor);
        self.fallback_cursor += 1;
        step.degraded = true;
        self.play(step, influence);
    }

    fn finish_turn(&mut self, step: Step, influence: Option<String>, now: Instant) {
        let degraded = step.degraded;
        // A newer GodMode command submitted mid-step stays for the next one
        if self.influence == influence {
            self.influence = None;
        }
        self.session.push(step.into_turn(influence));
        if let Some(turn) = self.session.last() {
            tracing::info!(command = %turn.command, degraded, "Turn recorded");
        }

        let delay = if degraded {
            Duration::from_millis(self.pacing.restart_delay_ms)
        } else {
            Duration::from_millis(self.pacing.next_step_min_ms + self.jitter(self.pacing.next_step_jitter_ms))
        };
        self.phase = Phase::Idle { until: now + delay };
    }

    /// GodMode: steer the next step. Returns false for blank input.
    pub fn submit_godmode(&mut self, command: &str, now: Instant) -> bool {
        let command = command.trim();
        if command.is_empty() {
            return false;
        }

        self.influence = Some(command.to_string());
        if let Some(effect) = self.director.note_godmode(command) {
            self.effects.push_back(effect);
        }
        self.log("GodMode command received. Influencing hacker's next action.");

        // Respond soon instead of waiting out the usual gap
        if let Phase::Idle { until } = self.phase {
            let soon = now + Duration::from_secs(1);
            if until > soon {
                self.phase = Phase::Idle { until: soon };
            }
        }
        true
    }

    /// When the session next moves on its own: the end of a step gap, a
    /// throttle or a break pause. None while something is ready to run.
    pub fn next_deadline(&self) -> Option<Instant> {
        match &self.phase {
            Phase::Idle { until } | Phase::Throttled { until, .. } => Some(*until),
            Phase::Breaking => self.director.paused_until(),
            _ => None,
        }
    }

    /// Skip the remaining reveal pacing of the current step. Break pauses
    /// are kept.
    pub fn fast_forward(&mut self, now: Instant) {
        let effects = self.director.flush(now);
        self.effects.extend(effects);
    }

    /// Human readable summary for the info line
    pub fn status(&self, now: Instant) -> String {
        match &self.phase {
            Phase::Booting => "Connecting...".to_string(),
            Phase::Idle { .. } if !self.director.is_idle() => "Working...".to_string(),
            Phase::Idle { until } => {
                format!("Next move in {}s", until.saturating_duration_since(now).as_secs())
            }
            Phase::Throttled { until, .. } => {
                format!("Throttled for {}s", until.saturating_duration_since(now).as_secs())
            }
            Phase::Breaking => "Taking a break".to_string(),
            Phase::Planning => "Contemplating next move...".to_string(),
            Phase::Playing { .. } => "Hacking...".to_string(),
        }
    }

    /// xorshift64, enough for a few seconds of jitter
    fn jitter(&mut self, max_ms: u64) -> u64 {
        if max_ms == 0 {
            return 0;
        }
        let mut x = self.jitter_state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.jitter_state = x;
        x % (max_ms + 1)
    }
}
