//! Batches confirmation requests and winner rebroadcasts for one pass of the
//! request loop.
//!
//! `prepare` takes the current principal representatives, elections then add
//! themselves through `add` / `broadcast`, and `flush` sends everything as
//! `confirm_req` messages of at most [`CONFIRM_REQ_HASHES_MAX`] pairs.

use crate::election::Election;
use orv_messages::{Channel, Message, Network, RepresentativeChannel, CONFIRM_REQ_HASHES_MAX};
use orv_types::{BlockHash, Root};
use orv_utils::{DetailType, Direction, StatType, Stats};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

/// Representatives asked per election and pass.
const MAX_ELECTION_REQUESTS: usize = 50;

struct ChannelRequests {
    channel: Arc<dyn Channel>,
    roots_hashes: Vec<(BlockHash, Root)>,
}

pub struct ConfirmationSolicitor {
    network: Arc<dyn Network>,
    stats: Arc<Stats>,
    max_block_broadcasts: usize,
    max_channel_requests: usize,
    max_election_broadcasts: usize,
    /// Reps can be dropped from this list once their queue is full.
    representatives_requests: Vec<RepresentativeChannel>,
    representatives_broadcasts: Vec<RepresentativeChannel>,
    requests: HashMap<SocketAddr, ChannelRequests>,
    rebroadcasted: usize,
}

impl ConfirmationSolicitor {
    pub fn new(network: Arc<dyn Network>, stats: Arc<Stats>, is_test_network: bool) -> Self {
        let confirm_req_batches_max = if is_test_network { 1 } else { 2 };
        Self {
            network,
            stats,
            max_block_broadcasts: if is_test_network { 4 } else { 30 },
            max_channel_requests: confirm_req_batches_max * CONFIRM_REQ_HASHES_MAX,
            max_election_broadcasts: 1,
            representatives_requests: Vec::new(),
            representatives_broadcasts: Vec::new(),
            requests: HashMap::new(),
            rebroadcasted: 0,
        }
    }

    /// Start a pass. Saturated channels are left out.
    pub fn prepare(&mut self, representatives: &[RepresentativeChannel]) {
        self.requests.clear();
        self.rebroadcasted = 0;
        self.max_election_broadcasts = (self.network.fanout() / 2).max(1);
        let usable: Vec<RepresentativeChannel> = representatives
            .iter()
            .filter(|r| !r.channel.is_saturated())
            .cloned()
            .collect();
        self.representatives_requests = usable.clone();
        self.representatives_broadcasts = usable;
    }

    /// Rebroadcast the election's winner to representatives that have not
    /// voted for it, then flood it. `false` once this pass's budget is spent.
    pub fn broadcast(&mut self, election: &Election) -> bool {
        if self.rebroadcasted >= self.max_block_broadcasts {
            return false;
        }
        self.rebroadcasted += 1;

        let winner = election.winner();
        let hash = winner.hash();
        let message = Message::publish(Arc::clone(winner));
        let mut count = 0;
        for rep in &self.representatives_broadcasts {
            if count >= self.max_election_broadcasts {
                break;
            }
            let last = election.last_votes().get(&rep.account);
            let different = last.is_some_and(|v| v.hash != hash);
            if last.is_none() || different {
                rep.channel.send(&message);
                self.stats
                    .inc_dir(StatType::Solicitor, DetailType::Publish, Direction::Out);
                if !different {
                    count += 1;
                }
            }
        }
        self.network.flood_block(winner);
        true
    }

    /// Queue a confirmation request for the winner with every representative
    /// that has not voted for it. `false` if no request could be queued.
    pub fn add(&mut self, election: &Election) -> bool {
        let winner = election.winner();
        let hash = winner.hash();
        let root = winner.root();
        let mut queued = false;
        let mut count = 0;
        let mut i = 0;
        while i < self.representatives_requests.len() && count < MAX_ELECTION_REQUESTS {
            let rep = &self.representatives_requests[i];
            let last = election.last_votes().get(&rep.account);
            let different = last.is_some_and(|v| v.hash != hash);
            let mut full = false;
            if last.is_none() || different {
                let endpoint = rep.channel.endpoint();
                let requests = self
                    .requests
                    .entry(endpoint)
                    .or_insert_with(|| ChannelRequests {
                        channel: Arc::clone(&rep.channel),
                        roots_hashes: Vec::new(),
                    });
                if requests.roots_hashes.len() < self.max_channel_requests {
                    requests.roots_hashes.push((hash, root));
                    queued = true;
                    if !different {
                        count += 1;
                    }
                } else {
                    full = true;
                }
            }
            if full {
                self.representatives_requests.remove(i);
            } else {
                i += 1;
            }
        }
        queued
    }

    /// Send the queued requests.
    pub fn flush(&mut self) {
        for requests in self.requests.values() {
            for chunk in requests.roots_hashes.chunks(CONFIRM_REQ_HASHES_MAX) {
                requests.channel.send(&Message::confirm_req(chunk.to_vec()));
                self.stats
                    .inc_dir(StatType::Solicitor, DetailType::ConfirmReq, Direction::Out);
            }
        }
        self.requests.clear();
    }
}
