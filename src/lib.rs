//! chainsync: an EVM event indexer's synchronization engine.
//!
//! Decomposes user-declared filters into per-chain work, drives historical
//! back-fill through a cached interval index, merges heterogeneous event
//! streams into one checkpoint-ordered cursor, follows each chain's head
//! with reorg handling, and persists everything in a deduplicated raw-data
//! store (SQLite or PostgreSQL).

pub mod db;
pub mod indexing;
pub mod rpc;
pub mod store;
pub mod sync;
pub mod types;
