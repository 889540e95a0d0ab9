//! Detects repetitive tool-calling loops and provides steering injection.

use std::collections::VecDeque;

/// Detects when an agent falls into a repetitive tool-calling loop.
pub struct LoopDetector {
    window_size: usize,
    /// Recent tool call signatures: (name, hash_of_args)
    recent_calls: VecDeque<String>,
}

impl LoopDetector {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size,
            recent_calls: VecDeque::new(),
        }
    }

    /// Record a tool call and check if we're in a loop.
    /// Returns true if a loop is detected.
    pub fn record_and_check(&mut self, tool_name: &str, arguments: &serde_json::Value) -> bool {
        let signature = format!("{}:{}", tool_name, Self::hash_args(arguments));
        self.recent_calls.push_back(signature);

        // Keep window bounded
        while self.recent_calls.len() > self.window_size {
            self.recent_calls.pop_front();
        }

        // Check if all entries in the window are identical
        if self.recent_calls.len() >= self.window_size {
            let first = &self.recent_calls[0];
            self.recent_calls.iter().all(|s| s == first)
        } else {
            false
        }
    }

    /// Reset the detector (e.g., after steering injection).
    pub fn reset(&mut self) {
        self.recent_calls.clear();
    }

    /// Simple hash of arguments for comparison.
    fn hash_args(args: &serde_json::Value) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let s = args.to_string();
        let mut hasher = DefaultHasher::new();
        s.hash(&mut hasher);
        hasher.finish()
    }
}

/// Steering messages that can be injected when issues are detected.
pub struct SteeringInjector;

impl SteeringInjector {
    /// Generate a steering message for a detected loop.
    pub fn loop_detected_message(tool_name: &str, window_size: usize) -> String {
        format!(
            "WARNING: You have called the '{}' tool {} times in a row with the same arguments. \
             This appears to be a loop. Please try a different approach or tool.",
            tool_name, window_size
        )
    }

    /// Generate a steering message to refocus on the task.
    pub fn refocus_message(goal: &str) -> String {
        format!(
            "Please refocus on the current goal: {}. \
             Consider what steps are still needed and take a different approach.",
            goal
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
