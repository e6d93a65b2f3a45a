//! Blocks of the block-lattice.
//!
//! Each account owns a chain of blocks. The legacy variants (send, receive,
//! open, change) each carry only what their operation needs, while state blocks
//! carry the full account state and encode the operation in `link`.

use crate::account::Account;
use crate::amount::Amount;
use crate::root::{QualifiedRoot, Root};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

type Blake2b256 = Blake2b<U32>;

/// A 32-byte block hash. Identifies a block in an account's chain.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
    pub const ZERO: Self = Self([0u8; 32]);

    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

/// Places the integer big-endian in the low bytes. Handy for test fixtures.
impl From<u64> for BlockHash {
    fn from(value: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }
}

impl From<Account> for BlockHash {
    fn from(account: Account) -> Self {
        Self(*account.as_bytes())
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({}\u{2026})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockType {
    Send,
    Receive,
    Open,
    Change,
    State,
}

impl BlockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Send => "send",
            Self::Receive => "receive",
            Self::Open => "open",
            Self::Change => "change",
            Self::State => "state",
        }
    }

    fn tag(&self) -> u8 {
        match self {
            Self::Send => 2,
            Self::Receive => 3,
            Self::Open => 4,
            Self::Change => 5,
            Self::State => 6,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendBlock {
    pub previous: BlockHash,
    pub destination: Account,
    /// Balance of the sending account after the send.
    pub balance: Amount,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveBlock {
    pub previous: BlockHash,
    pub source: BlockHash,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenBlock {
    pub source: BlockHash,
    pub representative: Account,
    pub account: Account,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBlock {
    pub previous: BlockHash,
    pub representative: Account,
}

/// Universal block. `link` holds the destination account for sends, the
/// source hash for receives, an epoch marker for upgrades, or zero.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateBlock {
    pub account: Account,
    pub previous: BlockHash,
    pub representative: Account,
    pub balance: Amount,
    pub link: BlockHash,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Block {
    Send(SendBlock),
    Receive(ReceiveBlock),
    Open(OpenBlock),
    Change(ChangeBlock),
    State(StateBlock),
}

impl Block {
    pub fn block_type(&self) -> BlockType {
        match self {
            Block::Send(_) => BlockType::Send,
            Block::Receive(_) => BlockType::Receive,
            Block::Open(_) => BlockType::Open,
            Block::Change(_) => BlockType::Change,
            Block::State(_) => BlockType::State,
        }
    }

    /// Blake2b-256 over the block type tag followed by every field.
    pub fn hash(&self) -> BlockHash {
        let mut hasher = Blake2b256::new();
        hasher.update([self.block_type().tag()]);
        match self {
            Block::Send(b) => {
                hasher.update(b.previous.as_bytes());
                hasher.update(b.destination.as_bytes());
                hasher.update(b.balance.number().to_be_bytes());
            }
            Block::Receive(b) => {
                hasher.update(b.previous.as_bytes());
                hasher.update(b.source.as_bytes());
            }
            Block::Open(b) => {
                hasher.update(b.source.as_bytes());
                hasher.update(b.representative.as_bytes());
                hasher.update(b.account.as_bytes());
            }
            Block::Change(b) => {
                hasher.update(b.previous.as_bytes());
                hasher.update(b.representative.as_bytes());
            }
            Block::State(b) => {
                hasher.update(b.account.as_bytes());
                hasher.update(b.previous.as_bytes());
                hasher.update(b.representative.as_bytes());
                hasher.update(b.balance.number().to_be_bytes());
                hasher.update(b.link.as_bytes());
            }
        }
        BlockHash(hasher.finalize().into())
    }

    /// Zero for open blocks and for state blocks that open an account.
    pub fn previous(&self) -> BlockHash {
        match self {
            Block::Send(b) => b.previous,
            Block::Receive(b) => b.previous,
            Block::Open(_) => BlockHash::ZERO,
            Block::Change(b) => b.previous,
            Block::State(b) => b.previous,
        }
    }

    /// The account named in the block itself. Only open and state blocks carry one.
    pub fn account_field(&self) -> Option<Account> {
        match self {
            Block::Open(b) => Some(b.account),
            Block::State(b) => Some(b.account),
            _ => None,
        }
    }

    pub fn representative_field(&self) -> Option<Account> {
        match self {
            Block::Open(b) => Some(b.representative),
            Block::Change(b) => Some(b.representative),
            Block::State(b) => Some(b.representative),
            _ => None,
        }
    }

    pub fn balance_field(&self) -> Option<Amount> {
        match self {
            Block::Send(b) => Some(b.balance),
            Block::State(b) => Some(b.balance),
            _ => None,
        }
    }

    /// Source hash of legacy receive and open blocks, zero otherwise.
    pub fn source_field(&self) -> BlockHash {
        match self {
            Block::Receive(b) => b.source,
            Block::Open(b) => b.source,
            _ => BlockHash::ZERO,
        }
    }

    /// Link of state blocks, zero otherwise.
    pub fn link_field(&self) -> BlockHash {
        match self {
            Block::State(b) => b.link,
            _ => BlockHash::ZERO,
        }
    }

    /// Whichever of source or link this block carries.
    pub fn source_or_link(&self) -> BlockHash {
        match self {
            Block::State(b) => b.link,
            other => other.source_field(),
        }
    }

    pub fn root(&self) -> Root {
        let previous = self.previous();
        if !previous.is_zero() {
            return Root::from(previous);
        }
        match self.account_field() {
            Some(account) => Root::from(account),
            None => Root::ZERO,
        }
    }

    pub fn qualified_root(&self) -> QualifiedRoot {
        QualifiedRoot::new(self.root(), self.previous())
    }

    pub fn is_open(&self) -> bool {
        self.previous().is_zero()
    }
}

/// Ledger metadata stored alongside a block once it is part of the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSideband {
    pub account: Account,
    /// 1-based position in the account chain.
    pub height: u64,
    /// Next block in the account chain, zero while this block is the head.
    pub successor: BlockHash,
    pub balance: Amount,
}

/// A block as stored in the ledger, with its sideband and a cached hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SavedBlock {
    block: Block,
    hash: BlockHash,
    sideband: BlockSideband,
}

impl SavedBlock {
    pub fn new(block: Block, sideband: BlockSideband) -> Self {
        let hash = block.hash();
        Self {
            block,
            hash,
            sideband,
        }
    }

    pub fn hash(&self) -> BlockHash {
        self.hash
    }

    pub fn account(&self) -> Account {
        self.sideband.account
    }

    pub fn height(&self) -> u64 {
        self.sideband.height
    }

    pub fn successor(&self) -> BlockHash {
        self.sideband.successor
    }

    pub fn balance(&self) -> Amount {
        self.sideband.balance
    }

    pub fn sideband(&self) -> &BlockSideband {
        &self.sideband
    }

    pub fn set_successor(&mut self, successor: BlockHash) {
        self.sideband.successor = successor;
    }

    pub fn block(&self) -> &Block {
        &self.block
    }
}

impl Deref for SavedBlock {
    type Target = Block;

    fn deref(&self) -> &Block {
        &self.block
    }
}

impl From<SavedBlock> for Block {
    fn from(saved: SavedBlock) -> Self {
        saved.block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(previous: BlockHash, link: BlockHash) -> Block {
        Block::State(StateBlock {
            account: Account::from(1),
            previous,
            representative: Account::from(2),
            balance: Amount::raw(10),
            link,
        })
    }

    #[test]
    fn hash_covers_every_field() {
        let a = state(BlockHash::from(5), BlockHash::ZERO);
        let b = state(BlockHash::from(5), BlockHash::from(9));
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.hash(), a.clone().hash());
    }

    #[test]
    fn root_is_previous_or_account() {
        let open = state(BlockHash::ZERO, BlockHash::from(3));
        assert_eq!(open.root(), Root::from(Account::from(1)));
        assert!(open.is_open());

        let next = state(BlockHash::from(7), BlockHash::ZERO);
        assert_eq!(next.root(), Root::from(BlockHash::from(7)));
        assert_eq!(next.qualified_root().previous, BlockHash::from(7));
    }

    #[test]
    fn legacy_receive_exposes_source() {
        let receive = Block::Receive(ReceiveBlock {
            previous: BlockHash::from(1),
            source: BlockHash::from(2),
        });
        assert_eq!(receive.source_or_link(), BlockHash::from(2));
        assert_eq!(receive.account_field(), None);
    }
}
