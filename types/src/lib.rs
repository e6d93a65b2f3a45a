//! Fundamental types for the ORV consensus core.
//!
//! This crate defines the core types shared across every other crate in the workspace:
//! accounts, hashes, roots, amounts, blocks, keys, timestamps and network parameters.

pub mod account;
pub mod amount;
pub mod block;
pub mod error;
pub mod keys;
pub mod network;
pub mod params;
pub mod root;
pub mod time;

pub use account::Account;
pub use amount::Amount;
pub use block::{
    Block, BlockHash, BlockSideband, BlockType, ChangeBlock, OpenBlock, ReceiveBlock,
    SavedBlock, SendBlock, StateBlock,
};
pub use error::TypesError;
pub use keys::{KeyPair, PrivateKey, PublicKey, Signature};
pub use network::NetworkId;
pub use params::{ConfirmationHeightInfo, Epochs, NetworkParams};
pub use root::{QualifiedRoot, Root};
pub use time::Timestamp;
