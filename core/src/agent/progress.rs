//! Progress messages
//!
//! Long runs post a short line at turn 3 and every 5 turns after, prefixed
//! with a hint of what the task is. Lines come from a pre-materialized
//! pool with a random draw; the fallback rotation is deterministic so a
//! cold pool still varies.

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Task hint length prefixing each progress line
pub const TASK_HINT_CHARS: usize = 60;

const FALLBACK_LINES: &[&str] = &[
    "still on it",
    "making progress, a few more steps",
    "working through it",
    "chipping away at this",
    "getting closer",
];

/// Pre-materialized progress lines with deterministic fallback
#[derive(Default)]
pub struct ProgressPool {
    lines: Mutex<Vec<String>>,
    fallback_cursor: AtomicUsize,
}

impl ProgressPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refresh(&self, lines: Vec<String>) {
        *self.lines.lock() = lines;
    }

    pub fn draw(&self) -> String {
        let lines = self.lines.lock();
        if let Some(line) = lines.choose(&mut rand::thread_rng()) {
            return line.clone();
        }
        let idx = self.fallback_cursor.fetch_add(1, Ordering::Relaxed);
        FALLBACK_LINES[idx % FALLBACK_LINES.len()].to_string()
    }
}

/// Progress posts happen at turn 3, 8, 13, ...
pub fn should_post_progress(turn: usize) -> bool {
    turn == 3 || (turn > 3 && (turn - 3) % 5 == 0)
}

/// Render one progress line for a task
pub fn progress_line(pool: &ProgressPool, user_message: &str) -> String {
    let hint: String = user_message.chars().take(TASK_HINT_CHARS).collect();
    format!("{} ({})", pool.draw(), hint.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cadence_is_three_then_every_five() {
        let posts: Vec<usize> = (1..=20).filter(|&t| should_post_progress(t)).collect();
        assert_eq!(posts, vec![3, 8, 13, 18]);
    }

    #[test]
    fn cold_pool_rotates_fallbacks() {
        let pool = ProgressPool::new();
        let a = pool.draw();
        let b = pool.draw();
        assert_ne!(a, b);
    }

    #[test]
    fn warm_pool_draws_from_lines() {
        let pool = ProgressPool::new();
        pool.refresh(vec!["one sec".to_string()]);
        assert_eq!(pool.draw(), "one sec");
    }

    #[test]
    fn hint_is_clipped() {
        let pool = ProgressPool::new();
        let long = "x".repeat(200);
        let line = progress_line(&pool, &long);
        assert!(line.len() < 200);
    }
}
