use std::collections::HashMap;

use crate::models::{PositionChange, RankingEntry, RowDirection};

/// Previous-position snapshot owned by one ranking view.
///
/// Each view keeps its own tracker; nothing is shared across instances.
/// Call [`PositionTracker::reset`] when the view goes away.
#[derive(Debug, Default)]
pub struct PositionTracker {
    previous: HashMap<i64, u32>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Annotates `entries` with their movement since the last call, then
    /// replaces the snapshot with the current positions.
    pub fn apply(&mut self, entries: Vec<RankingEntry>) -> Vec<RankingEntry> {
        let annotated: Vec<RankingEntry> = entries
            .into_iter()
            .map(|mut entry| {
                let previous = self.previous.get(&entry.participant_id).copied().unwrap_or(0);
                let (direction, change) = movement(previous, entry.position);
                entry.direction = direction;
                entry.change = change;
                entry
            })
            .collect();

        self.previous = annotated
            .iter()
            .map(|entry| (entry.participant_id, entry.position))
            .collect();

        annotated
    }

    pub fn previous_position(&self, participant_id: i64) -> Option<u32> {
        self.previous.get(&participant_id).copied()
    }

    pub fn reset(&mut self) {
        self.previous.clear();
    }

    /// Whether a move is worth a highlight: more than one place, or a move
    /// that lands on the podium.
    pub fn is_significant(previous: u32, entry: &RankingEntry) -> bool {
        matches!(entry.direction, RowDirection::Up | RowDirection::Down)
            && (previous.abs_diff(entry.position) > 1 || entry.position <= 3)
    }
}

fn movement(previous: u32, current: u32) -> (RowDirection, PositionChange) {
    if previous == 0 {
        (RowDirection::New, PositionChange::Same)
    } else if previous > current {
        (RowDirection::Up, PositionChange::Better)
    } else if previous < current {
        (RowDirection::Down, PositionChange::Worse)
    } else {
        (RowDirection::None, PositionChange::Same)
    }
}
