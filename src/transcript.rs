//! Headless session: no reveal pacing, one JSON line per finished step.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::io::Write;
use std::time::Instant;

use crate::config::{AppConfig, Pacing};
use crate::planner::Planner;
use crate::sim::engine::Engine;

/// Time source for the headless loop
#[async_trait]
pub trait Clock: Send {
    fn now(&self) -> Instant;

    async fn sleep_until(&mut self, deadline: Instant);
}

pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        tokio::time::sleep_until(deadline.into()).await;
    }
}

/// Booted engine for a headless run. Only a remote endpoint needs
/// protecting from bursts, so the playbook runs with the limiter zeroed.
pub fn engine_for(config: &AppConfig, planner: &dyn Planner, now: Instant) -> Engine {
    let mut config = config.clone();
    if planner.name() == "playbook" {
        config.rate_limit.delay_ms = 0;
        config.rate_limit.floor_ms = 0;
        config.rate_limit.break_secs = 0;
    }

    let mut engine = Engine::new(&config, Pacing::instant());
    engine.boot(now, Utc::now());
    engine
}

/// Play `steps` steps and write each finished turn to `out` as a JSON line
pub async fn run<W: Write, C: Clock>(
    engine: &mut Engine,
    planner: &dyn Planner,
    steps: usize,
    out: &mut W,
    clock: &mut C,
) -> Result<()> {
    // The boot turn is not a step
    let mut printed = engine.session().len();
    let target = printed + steps;

    while printed < target {
        let now = clock.now();
        engine.fast_forward(now);
        engine.tick(now);
        engine.drain_effects();

        if let Some(request) = engine.take_request() {
            let result = planner.next_step(&request).await;
            engine.complete(result, clock.now());
            continue;
        }

        let turns = engine.session().turns();
        for turn in &turns[printed..turns.len().min(target)] {
            writeln!(out, "{}", serde_json::to_string(turn)?)?;
        }
        out.flush()?;
        printed = engine.session().len();

        match engine.next_deadline() {
            Some(until) if until > now => {
                tracing::info!("Waiting {:?} before the next step", until - now);
                clock.sleep_until(until).await;
            }
            _ => tokio::task::yield_now().await,
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{playbook, PlanError, PlanRequest};
    use crate::sim::{SessionTurn, Step};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Moves only when the loop sleeps
    #[derive(Clone)]
    struct ManualClock(Arc<Mutex<Instant>>);

    #[async_trait]
    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.0.lock().unwrap()
        }

        async fn sleep_until(&mut self, deadline: Instant) {
            let mut now = self.0.lock().unwrap();
            if deadline > *now {
                *now = deadline;
            }
        }
    }

    /// Playbook answers, with the clock reading at every call
    struct Recorder {
        name: &'static str,
        clock: ManualClock,
        calls: Mutex<Vec<Instant>>,
    }

    #[async_trait]
    impl Planner for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn next_step(&self, request: &PlanRequest) -> Result<Step, PlanError> {
            self.calls.lock().unwrap().push(self.clock.now());
            Ok(playbook::decide(request))
        }
    }

    fn setup(name: &'static str) -> (ManualClock, Recorder, Instant) {
        let start = Instant::now();
        let clock = ManualClock(Arc::new(Mutex::new(start)));
        let recorder = Recorder {
            name,
            clock: clock.clone(),
            calls: Mutex::new(Vec::new()),
        };
        (clock, recorder, start)
    }

    fn lines(out: &[u8]) -> Vec<SessionTurn> {
        String::from_utf8(out.to_vec())
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_playbook_transcript_runs_unthrottled() {
        let (mut clock, planner, start) = setup("playbook");
        let mut engine = engine_for(&AppConfig::default(), &planner, start);
        let mut out = Vec::new();

        run(&mut engine, &planner, 4, &mut out, &mut clock).await.unwrap();

        let turns = lines(&out);
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[0].command, "whoami && hostname");
        assert!(turns.iter().all(|t| !t.command.is_empty()));
        // Never had to wait for anything
        assert_eq!(clock.now(), start);
        assert_eq!(planner.calls.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_remote_transcript_waits_out_limiter_and_break() {
        let (mut clock, planner, start) = setup("remote");
        let mut config = AppConfig::default();
        config.rate_limit.max_calls = 2;
        let mut engine = engine_for(&config, &planner, start);
        let mut out = Vec::new();

        run(&mut engine, &planner, 3, &mut out, &mut clock).await.unwrap();

        assert_eq!(lines(&out).len(), 3);
        let calls = planner.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 3);
        assert!(calls[1] - calls[0] >= Duration::from_secs(15));
        // Budget of two spent: the third call also sits out the break
        assert!(calls[2] - calls[1] >= Duration::from_secs(15 + 60));
        assert!(engine
            .debug_log()
            .any(|l| l.ends_with("Rate limit reached. Hacker taking a short break.")));
    }
}
