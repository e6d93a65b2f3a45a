//! Representative votes.

use crate::CONFIRM_ACK_HASHES_MAX;
use orv_crypto::{blake2b_256_multi, sign_message, verify_signature};
use orv_types::{Account, Block, BlockHash, KeyPair, Signature};
use std::sync::Arc;

const VOTE_PREFIX: &[u8] = b"vote ";

/// What a vote points at: just a hash, or the full block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VoteEntry {
    Hash(BlockHash),
    Block(Arc<Block>),
}

impl VoteEntry {
    pub fn hash(&self) -> BlockHash {
        match self {
            VoteEntry::Hash(hash) => *hash,
            VoteEntry::Block(block) => block.hash(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vote {
    pub account: Account,
    /// Strictly increasing per representative. Later votes supersede earlier ones.
    pub sequence: u64,
    pub entries: Vec<VoteEntry>,
    pub signature: Signature,
}

impl Vote {
    /// Signs a hash-only vote. At most [`CONFIRM_ACK_HASHES_MAX`] hashes.
    pub fn new(keys: &KeyPair, sequence: u64, hashes: Vec<BlockHash>) -> Self {
        debug_assert!(hashes.len() <= CONFIRM_ACK_HASHES_MAX);
        let entries = hashes.into_iter().map(VoteEntry::Hash).collect();
        Self::signed(keys, sequence, entries)
    }

    pub fn with_block(keys: &KeyPair, sequence: u64, block: Arc<Block>) -> Self {
        Self::signed(keys, sequence, vec![VoteEntry::Block(block)])
    }

    fn signed(keys: &KeyPair, sequence: u64, entries: Vec<VoteEntry>) -> Self {
        let mut vote = Self {
            account: keys.account(),
            sequence,
            entries,
            signature: Signature::ZERO,
        };
        vote.signature = sign_message(&vote.signing_hash(), &keys.private);
        vote
    }

    pub fn hashes(&self) -> impl Iterator<Item = BlockHash> + '_ {
        self.entries.iter().map(VoteEntry::hash)
    }

    /// Blake2b-256 over the prefix, every voted hash and the sequence.
    pub fn signing_hash(&self) -> [u8; 32] {
        let hashes: Vec<BlockHash> = self.hashes().collect();
        let sequence = self.sequence.to_le_bytes();
        let mut parts: Vec<&[u8]> = Vec::with_capacity(hashes.len() + 2);
        parts.push(VOTE_PREFIX);
        parts.extend(hashes.iter().map(|h| h.as_bytes().as_slice()));
        parts.push(&sequence);
        blake2b_256_multi(&parts)
    }

    pub fn validate(&self) -> bool {
        verify_signature(&self.signing_hash(), &self.signature, &self.account.public_key())
    }
}
