//! Nullable network: record messages without sending them.

use orv_messages::{Channel, Message, Network, RepresentativeChannel, Vote};
use orv_types::{Account, Block, BlockHash};
use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// A channel that keeps every message it was asked to send.
pub struct NullChannel {
    endpoint: SocketAddr,
    sent: Mutex<Vec<Message>>,
    saturated: AtomicBool,
}

impl NullChannel {
    pub fn new(endpoint: SocketAddr) -> Self {
        Self {
            endpoint,
            sent: Mutex::new(Vec::new()),
            saturated: AtomicBool::new(false),
        }
    }

    /// Loopback endpoint on `port`.
    pub fn with_port(port: u16) -> Self {
        Self::new(SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::LOCALHOST, port, 0, 0)))
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Votes from every `confirm_ack` sent so far.
    pub fn sent_votes(&self) -> Vec<Arc<Vote>> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| match m {
                Message::ConfirmAck(ack) => Some(Arc::clone(&ack.vote)),
                _ => None,
            })
            .collect()
    }

    pub fn set_saturated(&self, saturated: bool) {
        self.saturated.store(saturated, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl Channel for NullChannel {
    fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    fn send(&self, message: &Message) {
        self.sent.lock().unwrap().push(message.clone());
    }

    fn is_saturated(&self) -> bool {
        self.saturated.load(Ordering::Relaxed)
    }
}

/// A network that records floods and filter clears and serves a fixed list of
/// representative channels.
#[derive(Default)]
pub struct NullNetwork {
    flooded_blocks: Mutex<Vec<Arc<Block>>>,
    flooded_votes: Mutex<Vec<Arc<Vote>>>,
    cleared_filters: Mutex<Vec<BlockHash>>,
    representatives: Mutex<Vec<RepresentativeChannel>>,
}

impl NullNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_representative(&self, account: Account, channel: Arc<NullChannel>) {
        self.representatives
            .lock()
            .unwrap()
            .push(RepresentativeChannel { account, channel });
    }

    pub fn flooded_blocks(&self) -> Vec<Arc<Block>> {
        self.flooded_blocks.lock().unwrap().clone()
    }

    pub fn flooded_votes(&self) -> Vec<Arc<Vote>> {
        self.flooded_votes.lock().unwrap().clone()
    }

    pub fn cleared_filters(&self) -> Vec<BlockHash> {
        self.cleared_filters.lock().unwrap().clone()
    }
}

impl Network for NullNetwork {
    fn flood_block(&self, block: &Arc<Block>) {
        self.flooded_blocks.lock().unwrap().push(Arc::clone(block));
    }

    fn flood_vote(&self, vote: &Arc<Vote>) {
        self.flooded_votes.lock().unwrap().push(Arc::clone(vote));
    }

    fn clear_publish_filter(&self, block: &Block) {
        self.cleared_filters.lock().unwrap().push(block.hash());
    }

    fn representatives(&self) -> Vec<RepresentativeChannel> {
        self.representatives.lock().unwrap().clone()
    }

    fn fanout(&self) -> usize {
        self.representatives.lock().unwrap().len().max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orv_messages::Publish;
    use orv_types::{Amount, StateBlock};

    fn block() -> Arc<Block> {
        Arc::new(Block::State(StateBlock {
            account: Account::from(1),
            previous: BlockHash::ZERO,
            representative: Account::from(1),
            balance: Amount::raw(1),
            link: BlockHash::ZERO,
        }))
    }

    #[test]
    fn channel_records_messages() {
        let channel = NullChannel::with_port(7075);
        channel.send(&Message::Publish(Publish { block: block() }));
        assert_eq!(channel.sent_count(), 1);
        assert!(channel.sent_votes().is_empty());
        assert_eq!(channel.endpoint().port(), 7075);
    }

    #[test]
    fn network_records_floods_and_filter_clears() {
        let network = NullNetwork::new();
        let block = block();
        network.flood_block(&block);
        network.clear_publish_filter(&block);
        assert_eq!(network.flooded_blocks().len(), 1);
        assert_eq!(network.cleared_filters(), vec![block.hash()]);
    }
}
