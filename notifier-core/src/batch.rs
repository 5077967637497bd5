//! Batch assembly for the log consumer.
//!
//! Each worker owns one [`Batch`]: parsed transfers plus the log
//! positions they came from. A batch flushes when it reaches the
//! configured size, when the flush ticker fires, or when the input
//! channel closes during shutdown.

use std::collections::BTreeMap;

use crate::sink::LargeTransfer;

/// Position of a consumed record on the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogPosition {
    pub partition: i32,
    pub offset: i64,
}

/// Accumulator of parsed transfers and their covered offsets.
#[derive(Debug, Default)]
pub struct Batch {
    transfers: Vec<LargeTransfer>,
    positions: Vec<LogPosition>,
}

impl Batch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            transfers: Vec::with_capacity(capacity),
            positions: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, transfer: LargeTransfer, position: LogPosition) {
        self.transfers.push(transfer);
        self.positions.push(position);
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    pub fn is_full(&self, batch_size: usize) -> bool {
        self.transfers.len() >= batch_size
    }

    /// Drain the accumulator, leaving it empty for the next batch.
    pub fn take(&mut self) -> (Vec<LargeTransfer>, Vec<LogPosition>) {
        (
            std::mem::take(&mut self.transfers),
            std::mem::take(&mut self.positions),
        )
    }
}

/// The next-to-consume offset per partition: one past the highest covered
/// offset, which is what an offset commit acknowledges.
pub fn high_watermarks(positions: &[LogPosition]) -> Vec<(i32, i64)> {
    let mut highest: BTreeMap<i32, i64> = BTreeMap::new();
    for position in positions {
        let entry = highest.entry(position.partition).or_insert(position.offset);
        if position.offset > *entry {
            *entry = position.offset;
        }
    }
    highest.into_iter().map(|(p, o)| (p, o + 1)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::STATUS_PROCESSED;
    use bson::DateTime;
    use wallet_sdk::objects::{Currency, TransferKind};

    fn transfer(user_id: i64) -> LargeTransfer {
        LargeTransfer {
            id: None,
            user_id,
            kind: TransferKind::Deposit,
            from_currency: Currency::USD,
            to_currency: Currency::USD,
            amount: 50_000.0,
            timestamp: DateTime::now(),
            processed_at: DateTime::now(),
            status: STATUS_PROCESSED.to_string(),
            error_message: None,
        }
    }

    fn position(partition: i32, offset: i64) -> LogPosition {
        LogPosition { partition, offset }
    }

    #[test]
    fn fills_up_to_the_batch_size() {
        let mut batch = Batch::with_capacity(3);
        assert!(batch.is_empty());

        for offset in 0..3 {
            assert!(!batch.is_full(3));
            batch.push(transfer(offset), position(0, offset));
        }
        assert!(batch.is_full(3));
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn take_drains_and_resets() {
        let mut batch = Batch::with_capacity(2);
        batch.push(transfer(1), position(0, 10));
        batch.push(transfer(2), position(0, 11));

        let (transfers, positions) = batch.take();
        assert_eq!(transfers.len(), 2);
        assert_eq!(positions, vec![position(0, 10), position(0, 11)]);
        assert!(batch.is_empty());

        // Ready for the next round.
        batch.push(transfer(3), position(0, 12));
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn watermarks_are_one_past_the_highest_offset_per_partition() {
        let positions = [
            position(0, 5),
            position(0, 7),
            position(1, 3),
            position(0, 6),
            position(1, 2),
        ];
        assert_eq!(high_watermarks(&positions), vec![(0, 8), (1, 4)]);
    }

    #[test]
    fn watermarks_of_nothing_are_empty() {
        assert!(high_watermarks(&[]).is_empty());
    }

    #[test]
    fn single_position_watermark() {
        assert_eq!(high_watermarks(&[position(2, 0)]), vec![(2, 1)]);
    }
}
