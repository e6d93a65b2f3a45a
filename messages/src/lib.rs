//! Consensus messages exchanged between nodes and the interface the core
//! uses to send them. Framing and transport live outside this workspace.

pub mod transport;
pub mod vote;

pub use transport::{Channel, Network, RepresentativeChannel};
pub use vote::{Vote, VoteEntry};

use orv_types::{Block, BlockHash, Root};
use std::sync::Arc;

/// Hashes one `confirm_ack` may carry. Larger vote sets are split.
pub const CONFIRM_ACK_HASHES_MAX: usize = 12;

/// (hash, root) pairs one `confirm_req` may carry.
pub const CONFIRM_REQ_HASHES_MAX: usize = 7;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    Publish,
    ConfirmReq,
    ConfirmAck,
}

/// Announce a block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Publish {
    pub block: Arc<Block>,
}

/// Ask a representative to vote on each (hash, root) pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfirmReq {
    pub roots_hashes: Vec<(BlockHash, Root)>,
}

/// A representative's vote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfirmAck {
    pub vote: Arc<Vote>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Publish(Publish),
    ConfirmReq(ConfirmReq),
    ConfirmAck(ConfirmAck),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Publish(_) => MessageType::Publish,
            Message::ConfirmReq(_) => MessageType::ConfirmReq,
            Message::ConfirmAck(_) => MessageType::ConfirmAck,
        }
    }

    pub fn publish(block: Arc<Block>) -> Self {
        Message::Publish(Publish { block })
    }

    pub fn confirm_ack(vote: Arc<Vote>) -> Self {
        Message::ConfirmAck(ConfirmAck { vote })
    }

    pub fn confirm_req(roots_hashes: Vec<(BlockHash, Root)>) -> Self {
        Message::ConfirmReq(ConfirmReq { roots_hashes })
    }
}
