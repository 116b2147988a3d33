use core::iter::FusedIterator;

use crate::LongId;

/// A block of consecutive identifiers reserved by
/// [`crate::LongIdAllocator::create_many`].
///
/// Every identifier in the range shares the same type, shard and reserved
/// byte; only the sequence differs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LongIdRange {
    next: u64,
    remaining: u64,
}

impl LongIdRange {
    pub(crate) const fn new(first: LongId, count: u32) -> Self {
        Self {
            next: first.to_raw(),
            remaining: count as u64,
        }
    }

    /// A range yielding nothing.
    pub const fn empty() -> Self {
        Self {
            next: 0,
            remaining: 0,
        }
    }

    /// The next identifier the range will yield, if any.
    pub fn first_id(&self) -> Option<LongId> {
        (self.remaining > 0).then(|| LongId::from_raw(self.next))
    }

    /// The final identifier of the range, if any.
    pub fn last_id(&self) -> Option<LongId> {
        (self.remaining > 0).then(|| LongId::from_raw(self.next + (self.remaining - 1)))
    }

    pub const fn is_empty(&self) -> bool {
        self.remaining == 0
    }
}

impl Iterator for LongIdRange {
    type Item = LongId;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let id = LongId::from_raw(self.next);
        self.remaining -= 1;
        if self.remaining > 0 {
            self.next += 1;
        }
        Some(id)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = usize::try_from(self.remaining).unwrap_or(usize::MAX);
        (len, Some(len))
    }
}

impl DoubleEndedIterator for LongIdRange {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(LongId::from_raw(self.next + self.remaining))
    }
}

impl ExactSizeIterator for LongIdRange {}

impl FusedIterator for LongIdRange {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_consecutive_sequences() {
        let first = LongId::from_components(3, 1, 0, 10);
        let range = LongIdRange::new(first, 3);

        assert_eq!(range.len(), 3);
        assert_eq!(range.first_id(), Some(first));
        assert_eq!(range.last_id().map(|id| id.sequence()), Some(12));

        let sequences: Vec<u32> = range.map(|id| id.sequence()).collect();
        assert_eq!(sequences, vec![10, 11, 12]);
    }

    #[test]
    fn iterates_from_both_ends() {
        let mut range = LongIdRange::new(LongId::from_components(3, 0, 0, 1), 3);

        assert_eq!(range.next_back().map(|id| id.sequence()), Some(3));
        assert_eq!(range.next().map(|id| id.sequence()), Some(1));
        assert_eq!(range.next().map(|id| id.sequence()), Some(2));
        assert_eq!(range.next(), None);
        assert_eq!(range.next_back(), None);
    }

    #[test]
    fn ending_at_the_top_of_the_id_space_does_not_overflow() {
        let top = LongId::from_raw(u64::MAX - 1);
        let ids: Vec<LongId> = LongIdRange::new(top, 2).collect();
        assert_eq!(ids, vec![top, LongId::from_raw(u64::MAX)]);
    }

    #[test]
    fn empty_range() {
        let mut range = LongIdRange::empty();
        assert!(range.is_empty());
        assert_eq!(range.first_id(), None);
        assert_eq!(range.last_id(), None);
        assert_eq!(range.next(), None);
    }
}
