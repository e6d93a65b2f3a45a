//! The network as seen by the consensus core.

use crate::vote::Vote;
use crate::Message;
use orv_types::{Account, Block};
use std::net::SocketAddr;
use std::sync::Arc;

/// A connection to one peer.
pub trait Channel: Send + Sync {
    fn endpoint(&self) -> SocketAddr;

    fn send(&self, message: &Message);

    /// True when the outbound queue is full and further traffic would be dropped.
    fn is_saturated(&self) -> bool {
        false
    }
}

/// A principal representative together with the channel it was last seen on.
#[derive(Clone)]
pub struct RepresentativeChannel {
    pub account: Account,
    pub channel: Arc<dyn Channel>,
}

pub trait Network: Send + Sync {
    fn flood_block(&self, block: &Arc<Block>);

    fn flood_vote(&self, vote: &Arc<Vote>);

    /// Forget that `block` was seen so a later publish of it is not filtered.
    fn clear_publish_filter(&self, block: &Block);

    /// Principal representatives ordered by descending weight.
    fn representatives(&self) -> Vec<RepresentativeChannel>;

    /// How many peers a directed broadcast should reach.
    fn fanout(&self) -> usize;
}
