//! Short-term turn memory.
//!
//! A bounded FIFO of the most recent (user, assistant) pairs, rendered as a
//! text block that is placed into future generation requests.

use std::collections::VecDeque;

use crate::types::Turn;

/// Sliding window over the last `max_turns` conversation turns.
#[derive(Debug, Clone)]
pub struct TurnMemory {
    turns: VecDeque<Turn>,
    max_turns: usize,
    total_turns_seen: usize,
}

impl TurnMemory {
    /// A memory holding at most `max_turns` turns. With `max_turns == 0`
    /// nothing is ever stored.
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(max_turns),
            max_turns,
            total_turns_seen: 0,
        }
    }

    /// Append a turn, evicting the oldest ones while over capacity.
    pub fn add_turn(&mut self, user_text: impl Into<String>, assistant_text: impl Into<String>) {
        self.total_turns_seen += 1;
        if self.max_turns == 0 {
            return;
        }
        self.turns.push_back(Turn::new(user_text, assistant_text));
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
    }

    /// Render the stored turns, oldest first, one `User:` / `Assistant:` pair
    /// per turn. Empty when nothing is stored.
    pub fn render(&self) -> String {
        self.turns
            .iter()
            .map(|t| format!("User: {}\nAssistant: {}", t.user_text, t.assistant_text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// The assistant texts of the newest `n` turns, newest last.
    pub fn recent_responses(&self, n: usize) -> impl Iterator<Item = &str> {
        let skip = self.turns.len().saturating_sub(n);
        self.turns.iter().skip(skip).map(|t| t.assistant_text.as_str())
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.back()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Turns ever added, including evicted and cleared ones.
    pub fn total_turns_seen(&self) -> usize {
        self.total_turns_seen
    }
}

impl Default for TurnMemory {
    fn default() -> Self {
        Self::new(5)
    }
}
