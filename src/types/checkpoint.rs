use std::fmt;

use serde::{Deserialize, Serialize};

/// Orders event kinds that share a block/transaction coordinate. Block
/// markers sort before the transactions they contain, transactions before
/// their logs, logs before call traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventType {
    Block = 0,
    Transaction = 1,
    Log = 2,
    CallTrace = 3,
}

impl EventType {
    fn from_digit(digit: u8) -> Option<Self> {
        match digit {
            0 => Some(Self::Block),
            1 => Some(Self::Transaction),
            2 => Some(Self::Log),
            3 => Some(Self::CallTrace),
            _ => None,
        }
    }
}

/// The global total order over every indexable event.
///
/// Encoded as a fixed-width zero-padded decimal string so that byte
/// comparison of two encodings equals tuple comparison of the checkpoints.
/// Stored encoded in the sync tables, which makes `ORDER BY checkpoint`
/// correct on both database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Checkpoint {
    pub block_timestamp: u64,
    pub chain_id: u64,
    pub block_number: u64,
    pub transaction_index: u64,
    pub event_type: EventType,
    pub event_index: u64,
}

const TIMESTAMP_DIGITS: usize = 10;
const CHAIN_ID_DIGITS: usize = 16;
const BLOCK_NUMBER_DIGITS: usize = 16;
const TRANSACTION_INDEX_DIGITS: usize = 16;
const EVENT_TYPE_DIGITS: usize = 1;
const EVENT_INDEX_DIGITS: usize = 16;

/// Total width of an encoded checkpoint.
pub const CHECKPOINT_WIDTH: usize = TIMESTAMP_DIGITS
    + CHAIN_ID_DIGITS
    + BLOCK_NUMBER_DIGITS
    + TRANSACTION_INDEX_DIGITS
    + EVENT_TYPE_DIGITS
    + EVENT_INDEX_DIGITS;

// u64 maxes out at 20 digits; the 16-digit fields assume values below
// 10^16, which holds for chain ids, block numbers, and index positions on
// every EVM chain. Timestamps fit 10 digits until the year 2286.
const MAX_FIELD_16: u64 = 9_999_999_999_999_999;
const MAX_FIELD_10: u64 = 9_999_999_999;

impl Checkpoint {
    /// The lowest checkpoint; sorts before any real event.
    pub const ZERO: Checkpoint = Checkpoint {
        block_timestamp: 0,
        chain_id: 0,
        block_number: 0,
        transaction_index: 0,
        event_type: EventType::Block,
        event_index: 0,
    };

    /// The highest encodable checkpoint; sorts after any real event.
    pub const MAX: Checkpoint = Checkpoint {
        block_timestamp: MAX_FIELD_10,
        chain_id: MAX_FIELD_16,
        block_number: MAX_FIELD_16,
        transaction_index: MAX_FIELD_16,
        event_type: EventType::CallTrace,
        event_index: MAX_FIELD_16,
    };

    /// Checkpoint of a block marker: the first position within a block.
    pub fn block(block_timestamp: u64, chain_id: u64, block_number: u64) -> Self {
        Self {
            block_timestamp,
            chain_id,
            block_number,
            transaction_index: 0,
            event_type: EventType::Block,
            event_index: 0,
        }
    }

    /// The highest checkpoint within a block, used as an inclusive upper
    /// bound when draining a finalized range.
    pub fn block_end(block_timestamp: u64, chain_id: u64, block_number: u64) -> Self {
        Self {
            block_timestamp,
            chain_id,
            block_number,
            transaction_index: MAX_FIELD_16,
            event_type: EventType::CallTrace,
            event_index: MAX_FIELD_16,
        }
    }

    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(CHECKPOINT_WIDTH);
        out.push_str(&format!("{:0width$}", self.block_timestamp, width = TIMESTAMP_DIGITS));
        out.push_str(&format!("{:0width$}", self.chain_id, width = CHAIN_ID_DIGITS));
        out.push_str(&format!("{:0width$}", self.block_number, width = BLOCK_NUMBER_DIGITS));
        out.push_str(&format!(
            "{:0width$}",
            self.transaction_index,
            width = TRANSACTION_INDEX_DIGITS
        ));
        out.push_str(&format!("{}", self.event_type as u8));
        out.push_str(&format!("{:0width$}", self.event_index, width = EVENT_INDEX_DIGITS));
        out
    }

    pub fn decode(encoded: &str) -> Option<Self> {
        if encoded.len() != CHECKPOINT_WIDTH || !encoded.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let mut offset = 0;
        let mut take = |width: usize| {
            let field = &encoded[offset..offset + width];
            offset += width;
            field.parse::<u64>().ok()
        };

        let block_timestamp = take(TIMESTAMP_DIGITS)?;
        let chain_id = take(CHAIN_ID_DIGITS)?;
        let block_number = take(BLOCK_NUMBER_DIGITS)?;
        let transaction_index = take(TRANSACTION_INDEX_DIGITS)?;
        let event_type = EventType::from_digit(take(EVENT_TYPE_DIGITS)? as u8)?;
        let event_index = take(EVENT_INDEX_DIGITS)?;

        Some(Self {
            block_timestamp,
            chain_id,
            block_number,
            transaction_index,
            event_type,
            event_index,
        })
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{:?}:{}",
            self.block_timestamp,
            self.chain_id,
            self.block_number,
            self.transaction_index,
            self.event_type,
            self.event_index
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cp(
        ts: u64,
        chain: u64,
        block: u64,
        tx: u64,
        event_type: EventType,
        idx: u64,
    ) -> Checkpoint {
        Checkpoint {
            block_timestamp: ts,
            chain_id: chain,
            block_number: block,
            transaction_index: tx,
            event_type,
            event_index: idx,
        }
    }

    #[test]
    fn encode_has_fixed_width() {
        assert_eq!(Checkpoint::ZERO.encode().len(), CHECKPOINT_WIDTH);
        assert_eq!(Checkpoint::MAX.encode().len(), CHECKPOINT_WIDTH);
        assert_eq!(
            cp(1700000000, 1, 19_000_000, 42, EventType::Log, 3).encode().len(),
            CHECKPOINT_WIDTH
        );
    }

    #[test]
    fn decode_round_trips() {
        let original = cp(1700000000, 8453, 19_000_000, 42, EventType::Log, 3);
        let decoded = Checkpoint::decode(&original.encode()).unwrap();
        assert_eq!(decoded, original);

        assert_eq!(Checkpoint::decode(&Checkpoint::ZERO.encode()), Some(Checkpoint::ZERO));
        assert_eq!(Checkpoint::decode(&Checkpoint::MAX.encode()), Some(Checkpoint::MAX));
    }

    #[test]
    fn decode_rejects_malformed() {
        assert_eq!(Checkpoint::decode(""), None);
        assert_eq!(Checkpoint::decode("abc"), None);
        let mut bad = Checkpoint::ZERO.encode();
        bad.push('0');
        assert_eq!(Checkpoint::decode(&bad), None);
        // Event type digit out of range.
        let mut digits = cp(1, 1, 1, 0, EventType::Block, 0).encode();
        let type_offset = TIMESTAMP_DIGITS + CHAIN_ID_DIGITS + BLOCK_NUMBER_DIGITS + TRANSACTION_INDEX_DIGITS;
        digits.replace_range(type_offset..type_offset + 1, "7");
        assert_eq!(Checkpoint::decode(&digits), None);
    }

    #[test]
    fn string_order_matches_tuple_order() {
        let ordered = [
            Checkpoint::ZERO,
            cp(100, 1, 5, 0, EventType::Block, 0),
            cp(100, 1, 5, 0, EventType::Transaction, 0),
            cp(100, 1, 5, 0, EventType::Log, 0),
            cp(100, 1, 5, 0, EventType::Log, 1),
            cp(100, 1, 5, 0, EventType::CallTrace, 0),
            cp(100, 1, 5, 1, EventType::Log, 0),
            cp(100, 2, 0, 0, EventType::Block, 0),
            cp(101, 1, 6, 0, EventType::Block, 0),
            Checkpoint::MAX,
        ];

        for pair in ordered.windows(2) {
            assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
            assert!(
                pair[0].encode() < pair[1].encode(),
                "encoding broke order between {} and {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn block_end_bounds_block_contents() {
        let marker = Checkpoint::block(100, 1, 5);
        let end = Checkpoint::block_end(100, 1, 5);
        let log = cp(100, 1, 5, 3, EventType::Log, 7);
        assert!(marker < log && log < end);
        assert!(end < Checkpoint::block(100, 1, 6));
    }
}
