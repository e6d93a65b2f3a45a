//! Network-wide constants shared by ledger queries and consensus.

use crate::account::Account;
use crate::block::BlockHash;
use crate::network::NetworkId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Marker links that identify epoch upgrade blocks. An epoch block's link is
/// not a source, so it never makes a state block a receive.
#[derive(Clone, Debug)]
pub struct Epochs {
    links: Vec<BlockHash>,
}

impl Epochs {
    pub fn new(links: Vec<BlockHash>) -> Self {
        Self { links }
    }

    pub fn is_epoch_link(&self, link: &BlockHash) -> bool {
        self.links.contains(link)
    }

    pub fn links(&self) -> &[BlockHash] {
        &self.links
    }
}

impl Default for Epochs {
    fn default() -> Self {
        Self::new(vec![epoch_link(b"epoch v1 block"), epoch_link(b"epoch v2 block")])
    }
}

/// ASCII label, zero-padded on the right.
fn epoch_link(label: &[u8]) -> BlockHash {
    let mut bytes = [0u8; 32];
    bytes[..label.len()].copy_from_slice(label);
    BlockHash::new(bytes)
}

#[derive(Clone, Debug)]
pub struct NetworkParams {
    pub network: NetworkId,
    pub epochs: Epochs,
    /// Placeholder voter used to seed every election's tally. Has no weight.
    pub not_an_account: Account,
}

impl NetworkParams {
    pub fn new(network: NetworkId) -> Self {
        Self {
            network,
            epochs: Epochs::default(),
            not_an_account: Account::new([0xff; 32]),
        }
    }

    pub fn is_test_network(&self) -> bool {
        self.network.is_test_network()
    }

    pub fn base_latency(&self) -> Duration {
        self.network.base_latency()
    }
}

/// Highest cemented height of an account and the hash at that height.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationHeightInfo {
    pub height: u64,
    pub frontier: BlockHash,
}

impl ConfirmationHeightInfo {
    pub fn new(height: u64, frontier: BlockHash) -> Self {
        Self { height, frontier }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_links_are_recognised() {
        let params = NetworkParams::new(NetworkId::Test);
        let link = params.epochs.links()[0];
        assert!(params.epochs.is_epoch_link(&link));
        assert!(!params.epochs.is_epoch_link(&BlockHash::from(1)));
    }

    #[test]
    fn test_network_uses_short_latency() {
        assert_eq!(NetworkParams::new(NetworkId::Test).base_latency(), Duration::from_millis(25));
        assert_eq!(NetworkParams::new(NetworkId::Live).base_latency(), Duration::from_secs(1));
    }
}
