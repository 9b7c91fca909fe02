//! Bounded state history with stuck-state and oscillation detection.
//!
//! Both heuristics are tunable: a state repeated `repeat_threshold` times in
//! a row, or the last `alternating_window` states splitting into two equal
//! halves (`A,B,A,B`), count as a livelock.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivelockConfig {
    pub history_size: usize,
    pub repeat_threshold: usize,
    /// Even window length; 0 disables oscillation detection
    pub alternating_window: usize,
}

impl Default for LivelockConfig {
    fn default() -> Self {
        Self {
            history_size: 16,
            repeat_threshold: 3,
            alternating_window: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Livelock {
    Stuck { state: String, repeats: usize },
    Alternating { pattern: Vec<String> },
}

impl std::fmt::Display for Livelock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Livelock::Stuck { state, repeats } => {
                write!(f, "state {state} repeated {repeats} times")
            }
            Livelock::Alternating { pattern } => {
                write!(f, "alternating pattern {}", pattern.join(","))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct LivelockDetector {
    config: LivelockConfig,
    history: VecDeque<String>,
}

impl LivelockDetector {
    pub fn new(config: LivelockConfig) -> Self {
        Self {
            history: VecDeque::with_capacity(config.history_size),
            config,
        }
    }

    pub fn history(&self) -> impl Iterator<Item = &str> {
        self.history.iter().map(String::as_str)
    }

    /// Record a visited state and report whether the history now looks stuck
    pub fn record(&mut self, state: &str) -> Option<Livelock> {
        if self.config.history_size == 0 {
            return None;
        }
        if self.history.len() == self.config.history_size {
            self.history.pop_front();
        }
        self.history.push_back(state.to_string());
        self.detect()
    }

    pub fn detect(&self) -> Option<Livelock> {
        let len = self.history.len();

        let threshold = self.config.repeat_threshold;
        if threshold >= 2 && len >= threshold {
            let last = &self.history[len - 1];
            if self.history.iter().rev().take(threshold).all(|s| s == last) {
                return Some(Livelock::Stuck {
                    state: last.clone(),
                    repeats: threshold,
                });
            }
        }

        let window = self.config.alternating_window;
        if window >= 4 && window % 2 == 0 && len >= window {
            let tail: Vec<&String> = self.history.iter().skip(len - window).collect();
            let (first, second) = tail.split_at(window / 2);
            let distinct = first.iter().any(|s| *s != first[0]);
            if distinct && first == second {
                return Some(Livelock::Alternating {
                    pattern: tail.into_iter().cloned().collect(),
                });
            }
        }
        None
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stuck_state_detected_at_threshold() {
        let mut detector = LivelockDetector::new(LivelockConfig::default());
        assert_eq!(detector.record("A"), None);
        assert_eq!(detector.record("A"), None);
        assert_eq!(
            detector.record("A"),
            Some(Livelock::Stuck {
                state: "A".into(),
                repeats: 3
            })
        );
    }

    #[test]
    fn test_alternating_pattern_detected() {
        let mut detector = LivelockDetector::new(LivelockConfig::default());
        for state in ["START", "A", "B", "A"] {
            assert_eq!(detector.record(state), None);
        }
        let found = detector.record("B");
        assert_eq!(
            found,
            Some(Livelock::Alternating {
                pattern: vec!["A".into(), "B".into(), "A".into(), "B".into()]
            })
        );
    }

    #[test]
    fn test_linear_progress_is_not_a_livelock() {
        let mut detector = LivelockDetector::new(LivelockConfig::default());
        for state in ["A", "B", "C", "D", "E", "COMPLETED"] {
            assert_eq!(detector.record(state), None);
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let mut detector = LivelockDetector::new(LivelockConfig {
            history_size: 3,
            repeat_threshold: 0,
            alternating_window: 0,
        });
        for state in ["A", "B", "C", "D"] {
            detector.record(state);
        }
        assert_eq!(detector.history().collect::<Vec<_>>(), vec!["B", "C", "D"]);
    }
}
