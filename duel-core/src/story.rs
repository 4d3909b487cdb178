//! Story reassembly for the guest side.
//!
//! Story segments travel as independent reliable messages, so they can
//! arrive in any order and any number of times. The assembler places each
//! segment by its index and reports which indices are still missing.

use std::collections::BTreeMap;

use duel_types::BattleStorySegment;

/// Collects indexed story segments until the story is complete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoryAssembler {
    /// Expected number of segments, once announced.
    total: Option<u32>,
    /// Received segments keyed by index.
    segments: BTreeMap<u32, BattleStorySegment>,
}

impl StoryAssembler {
    /// Create an empty assembler with no announced length.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the announced story length.
    ///
    /// The first announcement wins; segments beyond it are discarded.
    pub fn set_total(&mut self, total: u32) {
        if self.total.is_none() {
            self.total = Some(total);
            self.segments.retain(|index, _| *index < total);
        }
    }

    /// Announced story length, if known.
    pub fn total(&self) -> Option<u32> {
        self.total
    }

    /// Insert a segment at `index`.
    ///
    /// Returns `false` if the segment was a duplicate or out of range.
    pub fn insert(&mut self, index: u32, total: u32, segment: BattleStorySegment) -> bool {
        self.set_total(total);
        if self.total.is_some_and(|t| index >= t) {
            return false;
        }
        if self.segments.contains_key(&index) {
            return false;
        }
        self.segments.insert(index, segment);
        true
    }

    /// Number of distinct segments held.
    pub fn received(&self) -> usize {
        self.segments.len()
    }

    /// Whether every announced segment has arrived.
    pub fn is_complete(&self) -> bool {
        match self.total {
            Some(total) => self.segments.len() == total as usize,
            None => false,
        }
    }

    /// Indices not yet received.
    pub fn missing(&self) -> Vec<u32> {
        match self.total {
            Some(total) => (0..total)
                .filter(|i| !self.segments.contains_key(i))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Segments in index order, regardless of arrival order.
    pub fn ordered(&self) -> Vec<BattleStorySegment> {
        self.segments.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(text: &str) -> BattleStorySegment {
        BattleStorySegment {
            text: text.into(),
            is_local_action: true,
            damage_dealt: None,
        }
    }

    #[test]
    fn empty_assembler_is_incomplete() {
        let asm = StoryAssembler::new();
        assert!(!asm.is_complete());
        assert!(asm.missing().is_empty());
        assert_eq!(asm.total(), None);
    }

    #[test]
    fn reassembles_by_index_not_arrival() {
        let mut asm = StoryAssembler::new();
        assert!(asm.insert(2, 3, seg("c")));
        assert!(asm.insert(0, 3, seg("a")));
        assert_eq!(asm.missing(), vec![1]);
        assert!(asm.insert(1, 3, seg("b")));
        assert!(asm.is_complete());

        let texts: Vec<_> = asm.ordered().into_iter().map(|s| s.text).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[test]
    fn duplicates_are_ignored() {
        let mut asm = StoryAssembler::new();
        assert!(asm.insert(0, 2, seg("first")));
        assert!(!asm.insert(0, 2, seg("second")));
        assert_eq!(asm.ordered()[0].text, "first");
        assert_eq!(asm.received(), 1);
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let mut asm = StoryAssembler::new();
        asm.set_total(2);
        assert!(!asm.insert(5, 2, seg("x")));
        assert_eq!(asm.received(), 0);
    }

    #[test]
    fn first_total_wins() {
        let mut asm = StoryAssembler::new();
        asm.set_total(2);
        asm.insert(0, 9, seg("a"));
        asm.insert(1, 9, seg("b"));
        assert_eq!(asm.total(), Some(2));
        assert!(asm.is_complete());
    }
}
