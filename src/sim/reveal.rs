//! Fixed-interval, character-by-character reveal of a string.
//!
//! The UI loop does not tick once per character, so each `advance` hands
//! back every character that has come due since the previous call.

use std::time::{Duration, Instant};

/// Characters revealed by one `advance` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
    pub chunk: String,
    /// True exactly once: on the call that revealed the last character
    pub finished: bool,
}

#[derive(Debug, Clone)]
pub struct Reveal {
    chars: Vec<char>,
    shown: usize,
    interval: Duration,
    started: Instant,
    done: bool,
}

impl Reveal {
    pub fn new(text: &str, interval: Duration, now: Instant) -> Self {
        Self {
            chars: text.chars().collect(),
            shown: 0,
            interval,
            started: now,
            done: false,
        }
    }

    /// Number of characters that should be visible at `now`
    fn due(&self, now: Instant) -> usize {
        if self.interval.is_zero() {
            return self.chars.len();
        }
        let elapsed = now.saturating_duration_since(self.started).as_nanos();
        let steps = elapsed / self.interval.as_nanos();
        steps.min(self.chars.len() as u128) as usize
    }

    pub fn advance(&mut self, now: Instant) -> Progress {
        if self.done {
            return Progress::default();
        }

        let due = self.due(now).max(self.shown);
        let chunk: String = self.chars[self.shown..due].iter().collect();
        self.shown = due;

        let finished = self.shown == self.chars.len();
        self.done = finished;
        Progress { chunk, finished }
    }

    /// Reveal the rest immediately
    pub fn flush(&mut self) -> Progress {
        if self.done {
            return Progress::default();
        }
        let chunk: String = self.chars[self.shown..].iter().collect();
        self.shown = self.chars.len();
        self.done = true;
        Progress { chunk, finished: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reveals_in_order_and_finishes_once() {
        let start = Instant::now();
        let text = "nmap -A 192.168.1.50";
        let mut reveal = Reveal::new(text, Duration::from_millis(30), start);

        let mut collected = String::new();
        let mut finishes = 0;
        // Irregular tick spacing, like a real frame loop
        for step in [0u64, 5, 29, 30, 31, 95, 200, 201, 450, 599, 600, 601, 900, 2000] {
            let progress = reveal.advance(start + Duration::from_millis(step));
            collected.push_str(&progress.chunk);
            if progress.finished {
                finishes += 1;
            }
        }

        assert_eq!(collected, text);
        assert_eq!(finishes, 1);
        assert!(reveal.done);
    }

    #[test]
    fn test_one_char_per_interval() {
        let start = Instant::now();
        let mut reveal = Reveal::new("abc", Duration::from_millis(20), start);

        assert_eq!(reveal.advance(start + Duration::from_millis(10)).chunk, "");
        assert_eq!(reveal.advance(start + Duration::from_millis(20)).chunk, "a");
        let last = reveal.advance(start + Duration::from_millis(65));
        assert_eq!(last.chunk, "bc");
        assert!(last.finished);
    }

    #[test]
    fn test_empty_and_zero_interval() {
        let now = Instant::now();

        let mut empty = Reveal::new("", Duration::from_millis(20), now);
        let progress = empty.advance(now);
        assert!(progress.finished);
        assert!(progress.chunk.is_empty());
        assert!(!empty.advance(now).finished);

        let mut instant = Reveal::new("root@server:~#", Duration::ZERO, now);
        let progress = instant.advance(now);
        assert_eq!(progress.chunk, "root@server:~#");
        assert!(progress.finished);
    }

    #[test]
    fn test_multibyte_and_flush() {
        let now = Instant::now();
        let mut reveal = Reveal::new("↓ü✓", Duration::from_millis(10), now);
        assert_eq!(reveal.advance(now + Duration::from_millis(10)).chunk, "↓");
        let rest = reveal.flush();
        assert_eq!(rest.chunk, "ü✓");
        assert!(rest.finished);
        assert!(!reveal.flush().finished);
    }
}
