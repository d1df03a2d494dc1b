//! The consistency core: streak/points decisions, weekly tag rotation, and
//! the like/point transaction engine.
//!
//! Every operation here is a short-lived transactional unit of work; there
//! is no long-running loop besides the rotation scheduler's timer. Lost
//! races surface from the store as `Conflict` and are retried with fresh
//! reads, bounded by [`MAX_TXN_RETRIES`].

pub mod likes;
pub mod rotation;
pub mod streak;
pub mod sweep;

/// How many times an engine re-reads and re-applies after a lost race
/// before giving up and surfacing the conflict.
pub const MAX_TXN_RETRIES: usize = 3;
