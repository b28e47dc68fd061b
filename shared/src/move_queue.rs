//! Indexed queue of moves awaiting delivery confirmation

use crate::moves::Move;
use std::collections::VecDeque;

/// Moves not yet confirmed delivered, oldest first.
///
/// Indices are contiguous: the front move has index `first_move_index` and
/// the back move has `end_index() - 1`.
#[derive(Debug, Clone, Default)]
pub struct MoveQueue {
    moves: VecDeque<Move>,
    first_move_index: u32,
}

impl MoveQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn first_move_index(&self) -> u32 {
        self.first_move_index
    }

    /// Index the next appended move will receive
    pub fn end_index(&self) -> u32 {
        self.first_move_index + self.moves.len() as u32
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    pub fn append(&mut self, mv: Move) {
        self.moves.push_back(mv);
    }

    /// Drops every move with index below `upto`. Returns how many were removed.
    pub fn retire(&mut self, upto: u32) -> usize {
        let count = (upto.saturating_sub(self.first_move_index) as usize).min(self.moves.len());
        self.moves.drain(..count);
        self.first_move_index += count as u32;
        count
    }

    /// Moves from `index` to the end. Indices before the front are clamped.
    pub fn range_from(&self, index: u32) -> impl Iterator<Item = &Move> + '_ {
        let skip = (index.saturating_sub(self.first_move_index) as usize).min(self.moves.len());
        self.moves.range(skip..)
    }

    pub fn get(&self, index: u32) -> Option<&Move> {
        index
            .checked_sub(self.first_move_index)
            .and_then(|offset| self.moves.get(offset as usize))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Move> + '_ {
        self.moves.iter()
    }
}
