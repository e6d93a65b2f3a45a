//! Per-representative vote bookkeeping inside an election.

use orv_types::BlockHash;
use std::time::Instant;

/// The latest accepted vote of one representative.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VoteInfo {
    /// When the vote was accepted. Drives the cooldown.
    pub time: Instant,
    pub sequence: u64,
    pub hash: BlockHash,
}

impl VoteInfo {
    pub fn new(time: Instant, sequence: u64, hash: BlockHash) -> Self {
        Self {
            time,
            sequence,
            hash,
        }
    }

    /// Whether `(sequence, hash)` strictly supersedes this vote.
    pub fn is_superseded_by(&self, sequence: u64, hash: &BlockHash) -> bool {
        (sequence, *hash) > (self.sequence, self.hash)
    }
}

/// Outcome of offering a vote to an election. Both false means the vote was
/// ignored (too light, or still inside the representative's cooldown).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VoteResult {
    pub replay: bool,
    pub processed: bool,
}

impl VoteResult {
    pub const IGNORED: Self = Self {
        replay: false,
        processed: false,
    };
    pub const REPLAY: Self = Self {
        replay: true,
        processed: false,
    };
    pub const PROCESSED: Self = Self {
        replay: false,
        processed: true,
    };
}
