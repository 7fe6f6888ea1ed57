//! Display queue: runs one reveal or pause at a time and reports what
//! should be appended to which pane.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::banner::INPUT_PROMPT;
use super::reveal::Reveal;
use crate::config::Pacing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pane {
    Terminal,
    Thoughts,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Stream into the thought pane
    Thought(String),
    /// Type a command into the terminal (rings the bell when done)
    Type(String),
    /// Stream command output into the terminal
    Stream(String),
    /// Fresh input prompt in the terminal
    Prompt,
    Append(Pane, String),
    Pause(Duration),
}

/// Something the UI has to apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Append { pane: Pane, text: String },
    Bell,
}

#[derive(Debug)]
enum Running {
    Reveal { pane: Pane, reveal: Reveal, bell: bool },
    Pause { until: Instant },
}

pub struct Director {
    queue: VecDeque<Action>,
    running: Option<Running>,
    pacing: Pacing,
    sound: bool,
    pending_godmode: Option<String>,
    /// Thought pane ends with a newline (or is empty)
    thoughts_at_line_start: bool,
}

impl Director {
    pub fn new(pacing: Pacing, sound: bool) -> Self {
        Self {
            queue: VecDeque::new(),
            running: None,
            pacing,
            sound,
            pending_godmode: None,
            thoughts_at_line_start: true,
        }
    }

    pub fn set_sound(&mut self, sound: bool) {
        self.sound = sound;
    }

    pub fn push(&mut self, action: Action) {
        self.queue.push_back(action);
    }

    pub fn extend(&mut self, actions: impl IntoIterator<Item = Action>) {
        self.queue.extend(actions);
    }

    pub fn is_idle(&self) -> bool {
        self.running.is_none() && self.queue.is_empty()
    }

    pub fn thought_streaming(&self) -> bool {
        matches!(self.running, Some(Running::Reveal { pane: Pane::Thoughts, .. }))
    }

    /// Note a GodMode command in the thought pane, deferred while a thought streams.
    /// Returns the effect to apply right away, if any.
    pub fn note_godmode(&mut self, command: &str) -> Option<Effect> {
        if self.thought_streaming() {
            self.pending_godmode = Some(command.to_string());
            None
        } else {
            Some(self.godmode_note(command))
        }
    }

    fn godmode_note(&mut self, command: &str) -> Effect {
        let lead = if self.thoughts_at_line_start { "" } else { "\n" };
        self.thoughts_at_line_start = true;
        Effect::Append {
            pane: Pane::Thoughts,
            text: format!("{}[GodMode Command: {}]\n", lead, command),
        }
    }

    fn track_thoughts(&mut self, text: &str) {
        if !text.is_empty() {
            self.thoughts_at_line_start = text.ends_with('\n');
        }
    }

    /// End of the pause currently holding the queue, if any
    pub fn paused_until(&self) -> Option<Instant> {
        match self.running {
            Some(Running::Pause { until }) => Some(until),
            _ => None,
        }
    }

    /// Skip reveal pacing: finish the running reveal and drain the queue up
    /// to the next pause. Pauses still have to be waited out with `tick`.
    pub fn flush(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        loop {
            match self.running.as_mut() {
                Some(Running::Reveal { reveal, .. }) => {
                    let rest = reveal.flush();
                    self.emit_reveal(rest.chunk, rest.finished, &mut effects);
                    self.running = None;
                }
                Some(Running::Pause { .. }) => break,
                None => {}
            }
            match self.queue.pop_front() {
                Some(action) => self.start(action, now, &mut effects),
                None => break,
            }
        }
        effects
    }

    pub fn tick(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();

        loop {
            match self.running.as_mut() {
                Some(Running::Reveal { reveal, .. }) => {
                    let progress = reveal.advance(now);
                    self.emit_reveal(progress.chunk, progress.finished, &mut effects);
                    if !progress.finished {
                        break;
                    }
                    self.running = None;
                }
                Some(Running::Pause { until }) => {
                    if now < *until {
                        break;
                    }
                    self.running = None;
                }
                None => match self.queue.pop_front() {
                    Some(action) => self.start(action, now, &mut effects),
                    None => break,
                },
            }
        }

        effects
    }

    fn emit_reveal(&mut self, chunk: String, finished: bool, effects: &mut Vec<Effect>) {
        let Some(Running::Reveal { pane, bell, .. }) = self.running.as_ref() else {
            return;
        };
        let (pane, bell) = (*pane, *bell);

        if pane == Pane::Thoughts {
            self.track_thoughts(&chunk);
        }
        if !chunk.is_empty() {
            effects.push(Effect::Append { pane, text: chunk });
        }
        if !finished {
            return;
        }
        if bell && self.sound {
            effects.push(Effect::Bell);
        }
        if pane == Pane::Thoughts {
            if let Some(command) = self.pending_godmode.take() {
                let note = self.godmode_note(&command);
                effects.push(note);
            }
        }
    }

    fn start(&mut self, action: Action, now: Instant, effects: &mut Vec<Effect>) {
        let reveal = |pane, text: &str, interval, bell| Running::Reveal {
            pane,
            reveal: Reveal::new(text, interval, now),
            bell,
        };

        match action {
            Action::Thought(text) => {
                // Thoughts stack up in the pane, one per paragraph
                let text = format!("{}\n", text);
                self.running = Some(reveal(Pane::Thoughts, &text, self.pacing.thought(), false));
            }
            Action::Type(text) => {
                self.running = Some(reveal(Pane::Terminal, &text, self.pacing.typing(), true));
            }
            Action::Stream(text) => {
                // Output starts on the line below the command
                let text = format!("\n{}", text);
                self.running = Some(reveal(Pane::Terminal, &text, self.pacing.output(), false));
            }
            Action::Prompt => effects.push(Effect::Append {
                pane: Pane::Terminal,
                text: INPUT_PROMPT.to_string(),
            }),
            Action::Append(pane, text) => {
                if pane == Pane::Thoughts {
                    self.track_thoughts(&text);
                }
                effects.push(Effect::Append { pane, text });
            }
            Action::Pause(duration) => {
                self.running = Some(Running::Pause { until: now + duration });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> Pacing {
        Pacing {
            thought_ms: 10,
            typing_ms: 10,
            output_ms: 1,
            ..Pacing::default()
        }
    }

    fn collect(effects: &[Effect], pane: Pane) -> String {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Append { pane: p, text } if *p == pane => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn run_to_idle(director: &mut Director, start: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        let mut now = start;
        for _ in 0..10_000 {
            effects.extend(director.tick(now));
            if director.is_idle() {
                break;
            }
            now += Duration::from_millis(7);
        }
        effects
    }

    #[test]
    fn test_plays_actions_in_order() {
        let start = Instant::now();
        let mut director = Director::new(fast(), true);
        director.extend([
            Action::Thought("Let me look around.".into()),
            Action::Type("whoami".into()),
            Action::Stream("hacker".into()),
            Action::Prompt,
        ]);

        let effects = run_to_idle(&mut director, start);

        assert_eq!(collect(&effects, Pane::Thoughts), "Let me look around.\n");
        assert_eq!(collect(&effects, Pane::Terminal), format!("whoami\nhacker{}", INPUT_PROMPT));
        assert_eq!(effects.iter().filter(|e| **e == Effect::Bell).count(), 1);
        assert!(director.is_idle());
    }

    #[test]
    fn test_no_bell_when_muted() {
        let mut director = Director::new(fast(), false);
        director.push(Action::Type("id".into()));
        let effects = run_to_idle(&mut director, Instant::now());
        assert!(!effects.contains(&Effect::Bell));
    }

    #[test]
    fn test_godmode_note_deferred_while_thought_streams() {
        let start = Instant::now();
        let mut director = Director::new(fast(), true);
        director.push(Action::Thought("Thinking about ports".into()));

        director.tick(start);
        assert!(director.thought_streaming());
        assert!(director.note_godmode("scan the network").is_none());
        // Newest pending note wins
        assert!(director.note_godmode("try brute force").is_none());

        let effects = run_to_idle(&mut director, start);
        let thoughts = collect(&effects, Pane::Thoughts);
        assert!(thoughts.ends_with("Thinking about ports\n[GodMode Command: try brute force]\n"));
        assert!(!thoughts.contains("scan the network"));
    }

    #[test]
    fn test_godmode_note_immediate_when_idle() {
        let mut director = Director::new(fast(), true);
        let effect = director.note_godmode("ls");
        assert_eq!(
            effect,
            Some(Effect::Append {
                pane: Pane::Thoughts,
                text: "[GodMode Command: ls]\n".into()
            })
        );
    }

    #[test]
    fn test_godmode_note_breaks_unfinished_line() {
        let mut director = Director::new(fast(), true);
        director.push(Action::Append(Pane::Thoughts, "half a thought".into()));
        director.tick(Instant::now());

        let note = director.note_godmode("id");
        assert_eq!(
            note,
            Some(Effect::Append {
                pane: Pane::Thoughts,
                text: "\n[GodMode Command: id]\n".into()
            })
        );
        // Right after a note the pane is at a line start again
        let again = director.note_godmode("pwd");
        assert_eq!(
            again,
            Some(Effect::Append {
                pane: Pane::Thoughts,
                text: "[GodMode Command: pwd]\n".into()
            })
        );
    }

    #[test]
    fn test_pause_blocks_queue() {
        let start = Instant::now();
        let mut director = Director::new(fast(), true);
        director.extend([
            Action::Pause(Duration::from_secs(5)),
            Action::Append(Pane::Thoughts, "after".into()),
        ]);

        assert!(director.tick(start + Duration::from_secs(4)).is_empty());
        assert!(director.tick(start + Duration::from_millis(4_999)).is_empty());
        assert_eq!(
            collect(&director.tick(start + Duration::from_secs(10)), Pane::Thoughts),
            "after"
        );
    }

    #[test]
    fn test_flush_drains_everything() {
        let start = Instant::now();
        let mut director = Director::new(fast(), true);
        director.extend([
            Action::Thought("Reading hosts".into()),
            Action::Type("cat /etc/hosts".into()),
            Action::Stream("127.0.0.1 localhost".into()),
            Action::Prompt,
        ]);
        director.tick(start);

        let effects = director.flush(start);
        assert_eq!(collect(&effects, Pane::Thoughts), "Reading hosts\n");
        assert_eq!(
            collect(&effects, Pane::Terminal),
            format!("cat /etc/hosts\n127.0.0.1 localhost{}", INPUT_PROMPT)
        );
        assert!(director.is_idle());
    }

    #[test]
    fn test_flush_stops_at_pause() {
        let start = Instant::now();
        let mut director = Director::new(fast(), true);
        director.extend([
            Action::Thought("Taking a break".into()),
            Action::Pause(Duration::from_secs(60)),
            Action::Thought("Back to work".into()),
        ]);

        let effects = director.flush(start);
        assert_eq!(collect(&effects, Pane::Thoughts), "Taking a break\n");
        assert_eq!(director.paused_until(), Some(start + Duration::from_secs(60)));
        assert!(!director.is_idle());

        // Flushing again does not skip the pause
        assert!(director.flush(start + Duration::from_secs(30)).is_empty());

        let later = start + Duration::from_secs(60);
        let mut effects = director.tick(later);
        effects.extend(director.flush(later));
        assert_eq!(collect(&effects, Pane::Thoughts), "Back to work\n");
        assert!(director.is_idle());
        assert_eq!(director.paused_until(), None);
    }
}
