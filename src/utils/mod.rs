//! Small helpers for progress reporting and display

use std::time::{Duration, Instant};

/// Format a duration as `1h 2m 3s`, `2m 3s` or `3s`
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Hide the middle of an API key for display
pub fn mask_api_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.is_empty() {
        return String::new();
    }
    if chars.len() <= 10 {
        return "***".to_string();
    }

    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}***{}", head, tail)
}

/// Running estimate of the remaining time of a sequence of steps
#[derive(Debug, Clone)]
pub struct EtaTracker {
    started: Instant,
    total_steps: usize,
    durations: Vec<Duration>,
}

/// Progress figures after a step completed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EtaSnapshot {
    pub last: Duration,
    pub average: Duration,
    pub elapsed: Duration,
    pub remaining: Duration,
    pub total_estimate: Duration,
    pub percent: f64,
}

impl EtaTracker {
    pub fn new(total_steps: usize) -> Self {
        Self {
            started: Instant::now(),
            total_steps,
            durations: Vec::with_capacity(total_steps),
        }
    }

    /// Record how long the latest step took
    pub fn record(&mut self, step: Duration) -> EtaSnapshot {
        self.snapshot_with(step, self.started.elapsed())
    }

    fn snapshot_with(&mut self, step: Duration, elapsed: Duration) -> EtaSnapshot {
        self.durations.push(step);
        let completed = self.durations.len();
        let sum: Duration = self.durations.iter().sum();
        let average = sum / completed as u32;
        let left = self.total_steps.saturating_sub(completed) as u32;
        let remaining = average * left;

        EtaSnapshot {
            last: step,
            average,
            elapsed,
            remaining,
            total_estimate: elapsed + remaining,
            percent: if self.total_steps == 0 {
                100.0
            } else {
                completed as f64 / self.total_steps as f64 * 100.0
            },
        }
    }
}
