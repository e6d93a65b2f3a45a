//! Bounded-memory cementing.
//!
//! Cementing a block means cementing every uncemented ancestor first, in its
//! own account and, through receives, in the accounts it received from. The
//! walk goes upwards from each account's cemented frontier and dives into a
//! receive's source chain before the receive itself. Every container involved
//! is capped, so pathological chains cost extra re-walking instead of memory.

use super::batch_write_size::BatchWriteSize;
use crate::config::CementingConfig;
use crate::error::CementError;
use bounded_vec_deque::BoundedVecDeque;
use orv_ledger::Ledger;
use orv_store::{ReadTxn, Table, WriteGuard, WriteQueue, WriteTxn, Writer};
use orv_types::{Account, BlockHash, ConfirmationHeightInfo, SavedBlock};
use orv_utils::{DetailType, StatType, Stats};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Default cap on every container the walk keeps.
pub const MAX_ITEMS: usize = 131072;

/// Blocks read between refreshes of the read transaction.
pub const BATCH_READ_SIZE: u64 = 65536;

/// Hooks into the owner of the processor.
pub struct CementCallbacks<'a> {
    pub block_cemented: &'a mut dyn FnMut(&[SavedBlock]),
    pub block_already_cemented: &'a mut dyn FnMut(BlockHash),
    pub awaiting_processing_count: &'a dyn Fn() -> usize,
}

/// A contiguous run of one account's blocks ready to be cemented.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteDetails {
    pub account: Account,
    /// Lowest block of the run, one above the frontier at queueing time.
    pub bottom_height: u64,
    pub bottom_hash: BlockHash,
    /// Desired cemented frontier.
    pub top_height: u64,
    pub top_hash: BlockHash,
}

impl WriteDetails {
    fn block_count(&self) -> u64 {
        self.top_height - self.bottom_height + 1
    }
}

/// Height and frontier an account will have once pending writes land.
#[derive(Clone, Copy, Debug)]
struct ConfirmedInfo {
    confirmed_height: u64,
    iterated_frontier: BlockHash,
}

#[derive(Clone, Debug)]
struct ReceiveChainDetails {
    account: Account,
    height: u64,
    hash: BlockHash,
    top_level: BlockHash,
    next: Option<BlockHash>,
    bottom_height: u64,
    bottom_most: BlockHash,
}

#[derive(Clone, Debug, Default)]
struct TopAndNextHash {
    top: BlockHash,
    next: Option<BlockHash>,
    next_height: u64,
}

#[derive(Clone, Debug)]
struct ReceiveSourcePair {
    receive_details: ReceiveChainDetails,
    source_hash: BlockHash,
}

struct Preparation<'a> {
    top_most_non_receive_block_hash: BlockHash,
    already_cemented: bool,
    checkpoints: &'a mut BoundedVecDeque<BlockHash>,
    confirmation_height_info: ConfirmationHeightInfo,
    account: Account,
    bottom_height: u64,
    bottom_most: BlockHash,
    receive_details: Option<ReceiveChainDetails>,
    next_in_receive_chain: &'a mut Option<TopAndNextHash>,
}

pub struct ConfirmationHeightBounded {
    ledger: Arc<Ledger>,
    write_queue: Arc<WriteQueue>,
    stats: Arc<Stats>,
    stopped: Arc<AtomicBool>,
    batch_write_size: Arc<BatchWriteSize>,
    batch_separate_pending_min_time: Duration,
    enable_timing_logging: bool,
    max_items: usize,
    pending_writes: VecDeque<WriteDetails>,
    accounts_confirmed_info: HashMap<Account, ConfirmedInfo>,
    timer: Instant,
}

impl ConfirmationHeightBounded {
    pub fn new(
        ledger: Arc<Ledger>,
        write_queue: Arc<WriteQueue>,
        stats: Arc<Stats>,
        stopped: Arc<AtomicBool>,
        batch_write_size: Arc<BatchWriteSize>,
        config: &CementingConfig,
    ) -> Self {
        Self {
            ledger,
            write_queue,
            stats,
            stopped,
            batch_write_size,
            batch_separate_pending_min_time: config.batch_separate_pending_min_time(),
            enable_timing_logging: config.enable_timing_logging,
            max_items: config.max_items.max(2),
            pending_writes: VecDeque::new(),
            accounts_confirmed_info: HashMap::new(),
            timer: Instant::now(),
        }
    }

    pub fn pending_empty(&self) -> bool {
        self.pending_writes.is_empty()
    }

    pub fn pending_writes_len(&self) -> usize {
        self.pending_writes.len()
    }

    pub fn batch_write_size(&self) -> &Arc<BatchWriteSize> {
        &self.batch_write_size
    }

    pub fn clear_process_vars(&mut self) {
        self.accounts_confirmed_info.clear();
    }

    /// Walk from the lowest uncemented ancestor up to `original_block`, queueing
    /// write ranges and flushing them when a batch fills up or the walk ends.
    pub fn process(
        &mut self,
        original_block: &SavedBlock,
        callbacks: &mut CementCallbacks,
    ) -> Result<(), CementError> {
        if self.pending_empty() {
            self.clear_process_vars();
            self.timer = Instant::now();
        }

        let original_hash = original_block.hash();
        let mut next_in_receive_chain: Option<TopAndNextHash> = None;
        let mut checkpoints: BoundedVecDeque<BlockHash> = BoundedVecDeque::new(self.max_items);
        let mut receive_source_pairs: BoundedVecDeque<ReceiveSourcePair> =
            BoundedVecDeque::new(self.max_items);
        let mut first_iter = true;

        let ledger = Arc::clone(&self.ledger);
        let mut txn = ledger.store().tx_begin_read();

        loop {
            let mut receive_details = None;
            let hash_to_process = Self::next_block(
                &next_in_receive_chain,
                &checkpoints,
                &receive_source_pairs,
                &mut receive_details,
                original_hash,
            );
            let mut current = hash_to_process.top;
            let top_level_hash = current;

            let block = if first_iter {
                Some(original_block.clone())
            } else {
                self.ledger.block(&current)
            };
            let Some(block) = block else {
                return Err(self.ledger_mismatch(current));
            };
            let account = block.account();

            let confirmation_height_info = match self.accounts_confirmed_info.get(&account) {
                Some(info) => {
                    ConfirmationHeightInfo::new(info.confirmed_height, info.iterated_frontier)
                }
                None => {
                    let info = self.ledger.confirmation_height(&account);
                    if first_iter && info.height >= block.height() && current == original_hash {
                        (callbacks.block_already_cemented)(original_hash);
                    }
                    info
                }
            };

            let mut block_height = block.height();
            let already_cemented = confirmation_height_info.height >= block_height;

            // Find the bottom of the uncemented part of this chain unless we
            // are already standing on it.
            if !already_cemented && block_height - confirmation_height_info.height > 1 {
                if block_height - confirmation_height_info.height == 2 {
                    current = block.previous();
                    block_height -= 1;
                } else {
                    match (&next_in_receive_chain, hash_to_process.next) {
                        (Some(_), Some(next)) => {
                            current = next;
                            block_height = hash_to_process.next_height;
                        }
                        _ => {
                            current = self.least_unconfirmed_hash_from_top_level(
                                current,
                                &account,
                                &confirmation_height_info,
                                &mut block_height,
                            )?;
                        }
                    }
                }
            }

            let mut top_most_non_receive_block_hash = current;
            let mut hit_receive = false;
            if !already_cemented {
                hit_receive = self.iterate(
                    txn.as_mut(),
                    block_height,
                    current,
                    &mut checkpoints,
                    &mut top_most_non_receive_block_hash,
                    top_level_hash,
                    &mut receive_source_pairs,
                    account,
                )?;
            }

            if self.stopped.load(Ordering::SeqCst) {
                break;
            }

            let is_set = next_in_receive_chain.is_some();
            next_in_receive_chain = None;

            // A receive right above the sends we walked still lets those
            // sends be cemented.
            if !hit_receive
                || (receive_source_pairs.len() == 1 && top_most_non_receive_block_hash != current)
            {
                self.prepare_iterated_blocks_for_cementing(Preparation {
                    top_most_non_receive_block_hash,
                    already_cemented,
                    checkpoints: &mut checkpoints,
                    confirmation_height_info,
                    account,
                    bottom_height: block_height,
                    bottom_most: current,
                    receive_details,
                    next_in_receive_chain: &mut next_in_receive_chain,
                })?;

                // The top level was used, so the pair stays.
                if !is_set && !receive_source_pairs.is_empty() {
                    receive_source_pairs.pop_back();
                }

                let total_pending_write_block_count: u64 =
                    self.pending_writes.iter().map(WriteDetails::block_count).sum();
                let max_batch_write_size_reached =
                    total_pending_write_block_count >= self.batch_write_size.current();
                // Many hashes waiting means bigger, cheaper batches.
                let min_time_exceeded = self.timer.elapsed() >= self.batch_separate_pending_min_time;
                let finished_iterating = current == original_hash;
                let non_awaiting_processing = (callbacks.awaiting_processing_count)() == 0;
                let should_output =
                    finished_iterating && (non_awaiting_processing || min_time_exceeded);
                let force_write = self.pending_writes.len() >= self.max_items
                    || self.accounts_confirmed_info.len() >= self.max_items;

                if (max_batch_write_size_reached || should_output || force_write)
                    && !self.pending_writes.is_empty()
                {
                    // Write only when nobody else holds the lock, unless forced.
                    if self.write_queue.process(Writer::ConfirmationHeight) {
                        let mut guard = self.write_queue.pop();
                        self.cement_blocks(&mut guard, callbacks)?;
                    } else if force_write {
                        let mut guard = self.write_queue.wait(Writer::ConfirmationHeight);
                        self.cement_blocks(&mut guard, callbacks)?;
                    }
                }
            }

            first_iter = false;
            txn.refresh();

            let done = receive_source_pairs.is_empty() && current == original_hash;
            if done || self.stopped.load(Ordering::SeqCst) {
                break;
            }
        }
        Ok(())
    }

    /// Priority: the rest of a just-finished receive chain, then the source
    /// of the receive closest to genesis, then the last checkpoint, then the
    /// block we were asked to cement.
    fn next_block(
        next_in_receive_chain: &Option<TopAndNextHash>,
        checkpoints: &BoundedVecDeque<BlockHash>,
        receive_source_pairs: &BoundedVecDeque<ReceiveSourcePair>,
        receive_details: &mut Option<ReceiveChainDetails>,
        original_hash: BlockHash,
    ) -> TopAndNextHash {
        if let Some(next_in_chain) = next_in_receive_chain {
            next_in_chain.clone()
        } else if let Some(pair) = receive_source_pairs.back() {
            *receive_details = Some(pair.receive_details.clone());
            TopAndNextHash {
                top: pair.source_hash,
                next: pair.receive_details.next,
                next_height: pair.receive_details.height + 1,
            }
        } else if let Some(checkpoint) = checkpoints.back() {
            TopAndNextHash {
                top: *checkpoint,
                ..Default::default()
            }
        } else {
            TopAndNextHash {
                top: original_hash,
                ..Default::default()
            }
        }
    }

    fn least_unconfirmed_hash_from_top_level(
        &mut self,
        current: BlockHash,
        account: &Account,
        confirmation_height_info: &ConfirmationHeightInfo,
        block_height: &mut u64,
    ) -> Result<BlockHash, CementError> {
        if confirmation_height_info.height != 0 {
            if *block_height > confirmation_height_info.height {
                let Some(frontier) = self.ledger.block(&confirmation_height_info.frontier) else {
                    return Err(self.ledger_mismatch(confirmation_height_info.frontier));
                };
                *block_height = frontier.height() + 1;
                return Ok(frontier.successor());
            }
            Ok(current)
        } else {
            // Nothing cemented yet, so the open block is the bottom.
            let Some(info) = self.ledger.account_info(account) else {
                return Err(self.ledger_mismatch(current));
            };
            *block_height = 1;
            Ok(info.open_block)
        }
    }

    /// Walk up from `bottom_hash` until `top_level_hash` or the first receive
    /// whose source still needs cementing. Returns whether a receive stopped
    /// the walk.
    #[allow(clippy::too_many_arguments)]
    fn iterate(
        &mut self,
        txn: &mut dyn ReadTxn,
        bottom_height: u64,
        bottom_hash: BlockHash,
        checkpoints: &mut BoundedVecDeque<BlockHash>,
        top_most_non_receive_block_hash: &mut BlockHash,
        top_level_hash: BlockHash,
        receive_source_pairs: &mut BoundedVecDeque<ReceiveSourcePair>,
        account: Account,
    ) -> Result<bool, CementError> {
        let mut reached_target = false;
        let mut hit_receive = false;
        let mut hash = bottom_hash;
        let mut num_blocks = 0u64;
        while !hash.is_zero() && !reached_target && !self.stopped.load(Ordering::SeqCst) {
            num_blocks += 1;
            let Some(block) = self.ledger.block(&hash) else {
                return Err(self.ledger_mismatch(hash));
            };
            if let Some(source) = self.ledger.receive_source(block.block()) {
                hit_receive = true;
                reached_target = true;
                let successor = block.successor();
                let next = (!successor.is_zero() && successor != top_level_hash).then_some(successor);
                receive_source_pairs.push_back(ReceiveSourcePair {
                    receive_details: ReceiveChainDetails {
                        account,
                        height: block.height(),
                        hash,
                        top_level: top_level_hash,
                        next,
                        bottom_height,
                        bottom_most: bottom_hash,
                    },
                    source_hash: source,
                });

                // Lets a walk through more accounts than fit in the buffer
                // find its way back.
                if receive_source_pairs.len() % self.max_items == 0 {
                    checkpoints.push_back(top_level_hash);
                }
            } else {
                *top_most_non_receive_block_hash = hash;
                if hash == top_level_hash {
                    reached_target = true;
                } else {
                    hash = block.successor();
                }
            }

            if num_blocks % BATCH_READ_SIZE == 0 {
                txn.refresh();
            }
        }
        Ok(hit_receive)
    }

    /// Queue the non-receive run just walked and, when a receive chain was
    /// being resolved, the receive on top of it.
    fn prepare_iterated_blocks_for_cementing(
        &mut self,
        preparation: Preparation,
    ) -> Result<(), CementError> {
        if !preparation.already_cemented {
            let top_hash = preparation.top_most_non_receive_block_hash;
            let Some(top) = self.ledger.block(&top_hash) else {
                return Err(self.ledger_mismatch(top_hash));
            };
            let block_height = top.height();
            if block_height > preparation.confirmation_height_info.height {
                self.accounts_confirmed_info.insert(
                    preparation.account,
                    ConfirmedInfo {
                        confirmed_height: block_height,
                        iterated_frontier: top_hash,
                    },
                );
                truncate_after(preparation.checkpoints, &top_hash);
                self.pending_writes.push_back(WriteDetails {
                    account: preparation.account,
                    bottom_height: preparation.bottom_height,
                    bottom_hash: preparation.bottom_most,
                    top_height: block_height,
                    top_hash,
                });
            }
        }

        if let Some(receive) = preparation.receive_details {
            self.accounts_confirmed_info.insert(
                receive.account,
                ConfirmedInfo {
                    confirmed_height: receive.height,
                    iterated_frontier: receive.hash,
                },
            );
            match receive.next {
                Some(next) => {
                    *preparation.next_in_receive_chain = Some(TopAndNextHash {
                        top: receive.top_level,
                        next: Some(next),
                        next_height: receive.height + 1,
                    });
                }
                None => truncate_after(preparation.checkpoints, &receive.hash),
            }
            self.pending_writes.push_back(WriteDetails {
                account: receive.account,
                bottom_height: receive.bottom_height,
                bottom_hash: receive.bottom_most,
                top_height: receive.height,
                top_hash: receive.hash,
            });
        }
        Ok(())
    }

    /// Block until the write lock is free and cement everything pending.
    pub fn write_pending_blocks(
        &mut self,
        callbacks: &mut CementCallbacks,
    ) -> Result<(), CementError> {
        if self.pending_writes.is_empty() {
            return Ok(());
        }
        let mut guard = self.write_queue.wait(Writer::ConfirmationHeight);
        self.cement_blocks(&mut guard, callbacks)
    }

    /// Persist all pending writes in FIFO order. Long runs are split into
    /// batches of about [`BatchWriteSize::with_tolerance`] blocks, releasing
    /// the write lock and notifying observers between batches.
    pub fn cement_blocks(
        &mut self,
        guard: &mut WriteGuard,
        callbacks: &mut CementCallbacks,
    ) -> Result<(), CementError> {
        let ledger = Arc::clone(&self.ledger);
        let mut txn = ledger.store().tx_begin_write(&[Table::ConfirmationHeight]);
        let mut txn_open = true;
        let mut cemented_blocks: Vec<SavedBlock> = Vec::new();
        let mut missing: Option<BlockHash> = None;
        let mut cemented_batch_timer = Instant::now();

        while let Some(pending) = self.pending_writes.front().cloned() {
            let confirmation_height_info = ledger.confirmation_height(&pending.account);

            // The frontier may have moved since this range was queued.
            if pending.top_height > confirmation_height_info.height {
                let (mut new_cemented_frontier, num_blocks_confirmed, start_height) =
                    if pending.bottom_height > confirmation_height_info.height {
                        debug_assert_eq!(pending.bottom_height, confirmation_height_info.height + 1);
                        (
                            pending.bottom_hash,
                            pending.top_height - pending.bottom_height + 1,
                            pending.bottom_height,
                        )
                    } else {
                        let Some(frontier) = ledger.block(&confirmation_height_info.frontier)
                        else {
                            missing = Some(confirmation_height_info.frontier);
                            break;
                        };
                        (
                            frontier.successor(),
                            pending.top_height - confirmation_height_info.height,
                            confirmation_height_info.height + 1,
                        )
                    };

                let mut total_blocks_cemented = 0u64;
                let mut block = ledger.block(&new_cemented_frontier);
                let mut num_blocks_iterated = 0u64;
                while num_blocks_confirmed - num_blocks_iterated != 0 {
                    let Some(current) = block.take() else {
                        // Drop what this range added to the unpublished batch.
                        let unpublished = (num_blocks_iterated - total_blocks_cemented) as usize;
                        cemented_blocks.truncate(cemented_blocks.len().saturating_sub(unpublished));
                        missing = Some(new_cemented_frontier);
                        break;
                    };

                    let last_iteration = num_blocks_confirmed - num_blocks_iterated == 1;
                    let successor = current.successor();
                    cemented_blocks.push(current);

                    if cemented_blocks.len() as u64 > self.batch_write_size.with_tolerance() {
                        let num_blocks_cemented = num_blocks_iterated - total_blocks_cemented + 1;
                        total_blocks_cemented += num_blocks_cemented;
                        self.write_confirmation_height(
                            txn.as_mut(),
                            &pending.account,
                            num_blocks_cemented,
                            start_height + total_blocks_cemented - 1,
                            new_cemented_frontier,
                        )?;
                        txn.commit()?;
                        txn_open = false;
                        self.batch_write_size.adjust(cemented_batch_timer.elapsed());

                        guard.release();
                        (callbacks.block_cemented)(&cemented_blocks);
                        cemented_blocks.clear();

                        if !(last_iteration && self.pending_writes.len() == 1) {
                            *guard = self.write_queue.wait(Writer::ConfirmationHeight);
                            txn.renew()?;
                            txn_open = true;
                        }
                        cemented_batch_timer = Instant::now();
                    }

                    if last_iteration {
                        debug_assert_eq!(new_cemented_frontier, pending.top_hash);
                    } else {
                        new_cemented_frontier = successor;
                        block = ledger.block(&new_cemented_frontier);
                    }
                    num_blocks_iterated += 1;
                }

                if missing.is_some() {
                    break;
                }

                let num_blocks_cemented = num_blocks_confirmed - total_blocks_cemented;
                if num_blocks_cemented > 0 {
                    self.write_confirmation_height(
                        txn.as_mut(),
                        &pending.account,
                        num_blocks_cemented,
                        pending.top_height,
                        new_cemented_frontier,
                    )?;
                }
            }

            if self
                .accounts_confirmed_info
                .get(&pending.account)
                .is_some_and(|info| info.confirmed_height == pending.top_height)
            {
                self.accounts_confirmed_info.remove(&pending.account);
            }
            self.pending_writes.pop_front();
        }

        if txn_open {
            txn.commit()?;
        }
        drop(txn);

        let time_spent_cementing = cemented_batch_timer.elapsed();
        if self.enable_timing_logging && time_spent_cementing > Duration::from_millis(50) {
            info!(
                count = cemented_blocks.len(),
                elapsed_ms = time_spent_cementing.as_millis() as u64,
                "cemented blocks (bounded processor)"
            );
        }

        if !cemented_blocks.is_empty() {
            guard.release();
            (callbacks.block_cemented)(&cemented_blocks);
        }

        if let Some(hash) = missing {
            return Err(self.ledger_mismatch(hash));
        }

        self.batch_write_size.reduce_if_slow(time_spent_cementing);
        self.timer = Instant::now();
        Ok(())
    }

    fn write_confirmation_height(
        &self,
        txn: &mut dyn WriteTxn,
        account: &Account,
        num_blocks_cemented: u64,
        height: u64,
        frontier: BlockHash,
    ) -> Result<(), CementError> {
        self.ledger.write_confirmation_height(
            txn,
            account,
            num_blocks_cemented,
            &ConfirmationHeightInfo::new(height, frontier),
        )?;
        self.stats.add(
            StatType::ConfirmationHeight,
            DetailType::BlocksConfirmedBounded,
            num_blocks_cemented,
        );
        Ok(())
    }

    /// The ledger lost a block the walk relies on. Continuing would corrupt
    /// the cemented heights, so only test networks survive this.
    fn ledger_mismatch(&mut self, hash: BlockHash) -> CementError {
        error!(%hash, "ledger mismatch trying to set confirmation height (bounded processor)");
        self.stats
            .inc(StatType::ConfirmationHeight, DetailType::InvalidBlock);
        assert!(
            self.ledger.is_test_network(),
            "ledger mismatch trying to set confirmation height for block {hash}"
        );
        self.pending_writes.clear();
        self.accounts_confirmed_info.clear();
        CementError::MissingBlock(hash)
    }
}

/// Drop `hash` and every entry after it.
pub fn truncate_after(buffer: &mut BoundedVecDeque<BlockHash>, hash: &BlockHash) {
    if let Some(index) = buffer.iter().position(|h| h == hash) {
        buffer.truncate(index);
    }
}
