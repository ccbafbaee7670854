use crate::models::visit::{LedgerEntry, VisitEvent};
use chrono::{DateTime, FixedOffset};
use std::collections::BTreeMap;

/// Per-box last visit and visit history. Mutated only by recording visits,
/// dropping a removed box, and a full reset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisitLedger {
    entries: BTreeMap<u32, LedgerEntry>,
}

impl VisitLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: BTreeMap<u32, LedgerEntry>) -> Self {
        Self { entries }
    }

    pub fn entry(&self, box_id: u32) -> Option<&LedgerEntry> {
        self.entries.get(&box_id)
    }

    pub fn last_visit(&self, box_id: u32) -> Option<DateTime<FixedOffset>> {
        self.entries.get(&box_id).and_then(|e| e.last_visit)
    }

    pub fn history(&self, box_id: u32) -> &[VisitEvent] {
        self.entries
            .get(&box_id)
            .map(|e| e.history.as_slice())
            .unwrap_or_default()
    }

    /// Append a visit and move the last-visit timestamp to it.
    pub fn record_visit(&mut self, box_id: u32, event: VisitEvent) {
        let entry = self.entries.entry(box_id).or_default();
        entry.last_visit = Some(event.date);
        entry.history.push(event);
    }

    pub fn remove(&mut self, box_id: u32) -> Option<LedgerEntry> {
        self.entries.remove(&box_id)
    }

    /// Clear every entry; returns how many boxes had a recorded visit.
    pub fn reset(&mut self) -> usize {
        let visited = self.visited_count();
        self.entries.clear();
        visited
    }

    /// Drop entries whose box is not in `known`; returns the dropped ids.
    pub fn retain_boxes(&mut self, known: impl Fn(u32) -> bool) -> Vec<u32> {
        let stale: Vec<u32> = self.entries.keys().copied().filter(|id| !known(*id)).collect();
        for id in &stale {
            self.entries.remove(id);
        }
        stale
    }

    pub fn visited_count(&self) -> usize {
        self.entries.values().filter(|e| e.last_visit.is_some()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &LedgerEntry)> {
        self.entries.iter().map(|(id, entry)| (*id, entry))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
