//! Integration tests exercising the full consensus pipeline:
//! election → local vote → confirmation → cementing → readback.
//!
//! These tests wire together components that are normally only connected
//! inside `node.rs`, verifying the system works end-to-end and not just
//! in isolation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use orv_consensus::VoteCode;
use orv_crypto::keypair_from_seed;
use orv_messages::{Channel, Vote};
use orv_node::{ConsensusNode, NodeConfig, NodeError, PROCESS_CONFIRMED_ATTEMPTS};
use orv_nullables::{NullChannel, NullNetwork, NullStore};
use orv_types::{Account, Amount, Block, BlockHash, KeyPair, NetworkId, SavedBlock, StateBlock};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const REP_SEED: [u8; 32] = [7u8; 32];
const REP_WEIGHT: u128 = 10_000;

struct Harness {
    store: Arc<NullStore>,
    network: Arc<NullNetwork>,
    node: ConsensusNode,
    rep: Account,
    genesis: SavedBlock,
}

fn test_config() -> NodeConfig {
    let mut config = NodeConfig::for_network(NetworkId::Test);
    config.elections.online_weight_minimum = Amount::raw(1000);
    config
}

/// A node on the test network voting with a single representative that
/// holds all the weight.
fn harness() -> Harness {
    let store = Arc::new(NullStore::new());
    let network = Arc::new(NullNetwork::new());
    let node = ConsensusNode::new(test_config(), store.clone(), network.clone())
        .expect("valid config");
    let keys = rep_keys();
    let rep = keys.account();
    let genesis = store.open_genesis(rep, Amount::raw(1_000_000));
    store.set_weight(rep, REP_WEIGHT);
    node.add_representative(keys);
    Harness {
        store,
        network,
        node,
        rep,
        genesis,
    }
}

fn rep_keys() -> KeyPair {
    keypair_from_seed(&REP_SEED)
}

fn unsaved(block: &SavedBlock) -> Arc<Block> {
    Arc::new(block.block().clone())
}

/// A send off the genesis head that the ledger has not processed yet.
fn unprocessed_send(h: &Harness) -> Block {
    Block::State(StateBlock {
        account: h.rep,
        previous: h.genesis.hash(),
        representative: h.rep,
        balance: Amount::raw(999_999),
        link: BlockHash::from(Account::from(2)),
    })
}

/// Confirm `block` with a full-weight vote from the local representative.
fn confirm_with_vote(h: &Harness, block: &Block) {
    h.node.block_confirm(Arc::new(block.clone()), None).unwrap();
    let vote = Vote::new(&rep_keys(), 1, vec![block.hash()]);
    assert_eq!(h.node.process_vote(&vote).unwrap(), VoteCode::Vote);
    h.node.dispatch_pending();
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn local_vote_confirms_and_cements() {
    let h = harness();
    let send = h.store.send(h.rep, Account::from(2), Amount::raw(1));

    h.node.block_confirm(unsaved(&send), None).unwrap();
    h.node.vote_generator.flush();
    assert!(h.node.dispatch_pending() >= 2); // local vote, then the confirmation
    h.node.cementing.flush();

    assert!(h.node.ledger.block_confirmed(&send.hash()));
    assert_eq!(h.store.confirmation_height(&h.rep).height, 2);
    assert!(h.node.winners.is_empty());
    assert_eq!(h.network.flooded_votes().len(), 1);
}

#[test]
fn confirmation_action_runs_with_winner() {
    let h = harness();
    let send = h.store.send(h.rep, Account::from(2), Amount::raw(1));
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();

    h.node
        .block_confirm(
            unsaved(&send),
            Some(Arc::new(move |block: &Arc<Block>| {
                sink.lock().unwrap().push(block.hash())
            })),
        )
        .unwrap();
    h.node.vote_generator.flush();
    h.node.dispatch_pending();

    assert_eq!(*seen.lock().unwrap(), vec![send.hash()]);
}

#[test]
fn running_node_confirms_in_background() {
    let h = harness();
    let send = h.store.send(h.rep, Account::from(2), Amount::raw(1));
    h.node.start().unwrap();
    h.node.block_confirm(unsaved(&send), None).unwrap();

    let ledger = h.node.ledger.clone();
    let hash = send.hash();
    let cemented = wait_until(Duration::from_secs(5), || ledger.block_confirmed(&hash));
    h.node.stop();
    assert!(cemented);
}

#[test]
fn winner_confirmed_before_the_ledger_has_it_is_cemented_later() {
    let h = harness();
    let block = unprocessed_send(&h);
    let hash = block.hash();
    confirm_with_vote(&h, &block);
    assert!(h.node.winners.contains(&hash));
    assert_eq!(h.node.confirmed.deferred_len(), 1);

    h.store.process(block);
    h.node.dispatch_pending();
    h.node.cementing.flush();

    assert!(h.node.ledger.block_confirmed(&hash));
    assert!(!h.node.winners.contains(&hash));
    assert_eq!(h.store.confirmation_height(&h.rep).height, 2);
}

#[test]
fn winner_that_never_arrives_is_released() {
    let h = harness();
    let block = unprocessed_send(&h);
    let hash = block.hash();
    confirm_with_vote(&h, &block);

    // Manual dispatch retries every deferred lookup once per call.
    for _ in 0..PROCESS_CONFIRMED_ATTEMPTS {
        assert!(h.node.winners.contains(&hash));
        h.node.dispatch_pending();
    }
    assert!(!h.node.winners.contains(&hash));
    assert_eq!(h.node.confirmed.deferred_len(), 0);
}

#[test]
fn confirm_req_is_answered_with_a_vote() {
    let h = harness();
    h.store.cement(&h.genesis.hash());
    let send = h.store.send(h.rep, Account::from(2), Amount::raw(1));
    let channel = Arc::new(NullChannel::with_port(7100));

    let request = [(send.hash(), send.block().root())];
    assert!(h.node.process_confirm_req(channel.clone() as Arc<dyn Channel>, &request));
    assert_eq!(h.node.aggregator.flush(), 1);

    let votes = channel.sent_votes();
    assert_eq!(votes.len(), 1);
    assert_eq!(votes[0].account, h.rep);
    assert_eq!(votes[0].hashes().collect::<Vec<_>>(), vec![send.hash()]);
}

#[test]
fn remote_vote_is_routed_to_its_election() {
    let h = harness();
    let send = h.store.send(h.rep, Account::from(2), Amount::raw(1));
    h.node.block_confirm(unsaved(&send), None).unwrap();

    let vote = Vote::new(&rep_keys(), 1, vec![send.hash()]);
    assert_eq!(h.node.process_vote(&vote).unwrap(), VoteCode::Vote);
}

#[test]
fn forged_vote_is_rejected() {
    let h = harness();
    let send = h.store.send(h.rep, Account::from(2), Amount::raw(1));
    let mut vote = Vote::new(&rep_keys(), 1, vec![send.hash()]);
    vote.account = Account::from(99);

    let err = h.node.process_vote(&vote).unwrap_err();
    assert!(matches!(err, NodeError::InvalidVote(account) if account == Account::from(99)));
}

#[test]
fn metrics_reflect_cemented_blocks() {
    let h = harness();
    let send = h.store.send(h.rep, Account::from(2), Amount::raw(1));
    h.node.block_confirm(unsaved(&send), None).unwrap();
    h.node.vote_generator.flush();
    h.node.dispatch_pending();
    h.node.cementing.flush();

    h.node.update_metrics();
    let text = h.node.metrics.encode().unwrap();
    assert!(text.contains("orv_cemented_count 2"));
    assert!(text.contains("orv_block_count 2"));
    assert!(text.contains("blocks_confirmed"));
}

#[test]
fn invalid_config_is_rejected() {
    let mut config = test_config();
    config.elections.online_weight_quorum = 120;
    let result = ConsensusNode::new(
        config,
        Arc::new(NullStore::new()),
        Arc::new(NullNetwork::new()),
    );
    assert!(matches!(result, Err(NodeError::Consensus(_))));
}
