//! # Votes Ranker Shared
//! This crate defines shared data structures and types used across the votes ranker ecosystem.
//! It includes common definitions for vote records, delta events, aggregate counters,
//! ledger transitions and ranking snapshots.
pub mod types;
