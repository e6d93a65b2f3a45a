use super::batch_write_size::BatchWriteSize;
use super::bounded::{CementCallbacks, ConfirmationHeightBounded};
use crate::config::CementingConfig;
use crate::error::CementError;
use orv_ledger::Ledger;
use orv_store::WriteQueue;
use orv_types::{BlockHash, SavedBlock};
use orv_utils::{DetailType, StatType, Stats};
use std::collections::{HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

pub type BlockCementedObserver = Box<dyn Fn(&SavedBlock) + Send + Sync>;
pub type AlreadyCementedObserver = Box<dyn Fn(&BlockHash) + Send + Sync>;

#[derive(Default)]
struct AwaitingProcessing {
    blocks: VecDeque<SavedBlock>,
    hashes: HashSet<BlockHash>,
    /// Hashes taken off the queue whose cementing has not been flushed yet.
    original_hashes_pending: HashSet<BlockHash>,
}

/// Queues confirmed blocks and cements them on a worker thread.
pub struct ConfirmationHeightProcessor {
    awaiting: Mutex<AwaitingProcessing>,
    condition: Condvar,
    /// Only the worker, or a caller flushing synchronously, locks this.
    bounded: Mutex<ConfirmationHeightBounded>,
    stopped: Arc<AtomicBool>,
    stats: Arc<Stats>,
    cemented_observers: RwLock<Vec<BlockCementedObserver>>,
    already_cemented_observers: RwLock<Vec<AlreadyCementedObserver>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ConfirmationHeightProcessor {
    pub fn new(
        ledger: Arc<Ledger>,
        write_queue: Arc<WriteQueue>,
        stats: Arc<Stats>,
        config: &CementingConfig,
    ) -> Self {
        let stopped = Arc::new(AtomicBool::new(false));
        let batch_write_size = Arc::new(BatchWriteSize::new(!ledger.is_test_network()));
        let bounded = ConfirmationHeightBounded::new(
            ledger,
            write_queue,
            stats.clone(),
            stopped.clone(),
            batch_write_size,
            config,
        );
        Self {
            awaiting: Mutex::new(AwaitingProcessing::default()),
            condition: Condvar::new(),
            bounded: Mutex::new(bounded),
            stopped,
            stats,
            cemented_observers: RwLock::new(Vec::new()),
            already_cemented_observers: RwLock::new(Vec::new()),
            thread: Mutex::new(None),
        }
    }

    pub fn add_cemented_observer(&self, observer: BlockCementedObserver) {
        self.cemented_observers.write().unwrap().push(observer);
    }

    pub fn add_already_cemented_observer(&self, observer: AlreadyCementedObserver) {
        self.already_cemented_observers.write().unwrap().push(observer);
    }

    /// Queue `block` for cementing. A block already queued is not added twice.
    pub fn add(&self, block: SavedBlock) -> Result<(), CementError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(CementError::Stopped);
        }
        {
            let mut awaiting = self.awaiting.lock().unwrap();
            if awaiting.hashes.insert(block.hash()) {
                awaiting.blocks.push_back(block);
            }
        }
        self.condition.notify_one();
        Ok(())
    }

    pub fn awaiting_processing_size(&self) -> usize {
        self.awaiting.lock().unwrap().blocks.len()
    }

    /// Queued, or taken off the queue but not yet written.
    pub fn is_processing_block(&self, hash: &BlockHash) -> bool {
        let awaiting = self.awaiting.lock().unwrap();
        awaiting.hashes.contains(hash) || awaiting.original_hashes_pending.contains(hash)
    }

    /// Cement one queued block. Returns `false` when the queue is empty.
    fn process_next(&self) -> bool {
        let mut bounded = self.bounded.lock().unwrap();
        let block = {
            let mut awaiting = self.awaiting.lock().unwrap();
            let Some(block) = awaiting.blocks.pop_front() else {
                return false;
            };
            let hash = block.hash();
            awaiting.hashes.remove(&hash);
            if bounded.pending_empty() {
                awaiting.original_hashes_pending.clear();
            }
            awaiting.original_hashes_pending.insert(hash);
            block
        };

        let mut on_cemented = |blocks: &[SavedBlock]| self.notify_cemented(blocks);
        let mut on_already_cemented = |hash: BlockHash| self.notify_already_cemented(&hash);
        let awaiting_processing_count = || self.awaiting_processing_size();
        let mut callbacks = CementCallbacks {
            block_cemented: &mut on_cemented,
            block_already_cemented: &mut on_already_cemented,
            awaiting_processing_count: &awaiting_processing_count,
        };
        if let Err(e) = bounded.process(&block, &mut callbacks) {
            error!(hash = %block.hash(), error = %e, "cementing failed");
        }
        true
    }

    /// Write whatever the bounded processor still holds and forget the run.
    fn write_pending(&self) {
        let mut bounded = self.bounded.lock().unwrap();
        if !bounded.pending_empty() {
            let mut on_cemented = |blocks: &[SavedBlock]| self.notify_cemented(blocks);
            let mut on_already_cemented = |hash: BlockHash| self.notify_already_cemented(&hash);
            let awaiting_processing_count = || self.awaiting_processing_size();
            let mut callbacks = CementCallbacks {
                block_cemented: &mut on_cemented,
                block_already_cemented: &mut on_already_cemented,
                awaiting_processing_count: &awaiting_processing_count,
            };
            if let Err(e) = bounded.write_pending_blocks(&mut callbacks) {
                error!(error = %e, "writing pending confirmation heights failed");
            }
        }
        bounded.clear_process_vars();
        self.awaiting.lock().unwrap().original_hashes_pending.clear();
    }

    /// Cement everything queued on the calling thread.
    pub fn flush(&self) {
        while self.process_next() {}
        self.write_pending();
    }

    fn notify_cemented(&self, blocks: &[SavedBlock]) {
        self.stats.add(
            StatType::ConfirmationHeight,
            DetailType::BlocksConfirmed,
            blocks.len() as u64,
        );
        let observers = self.cemented_observers.read().unwrap();
        for block in blocks {
            for observer in observers.iter() {
                observer(block);
            }
        }
    }

    fn notify_already_cemented(&self, hash: &BlockHash) {
        self.stats
            .inc(StatType::ConfirmationHeight, DetailType::AlreadyCemented);
        for observer in self.already_cemented_observers.read().unwrap().iter() {
            observer(hash);
        }
    }

    pub fn start(self: &Arc<Self>) -> io::Result<()> {
        let processor = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("Conf height".to_string())
            .spawn(move || processor.run())?;
        *self.thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    fn run(&self) {
        debug!("confirmation height processor started");
        while !self.stopped.load(Ordering::SeqCst) {
            if self.process_next() {
                continue;
            }
            self.write_pending();
            let awaiting = self.awaiting.lock().unwrap();
            if awaiting.blocks.is_empty() && !self.stopped.load(Ordering::SeqCst) {
                drop(self.condition.wait(awaiting).unwrap());
            }
        }
        debug!("confirmation height processor stopped");
    }

    pub fn stop(&self) {
        {
            let _awaiting = self.awaiting.lock().unwrap();
            self.stopped.store(true, Ordering::SeqCst);
        }
        self.condition.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orv_nullables::NullStore;
    use orv_types::{Account, Amount, NetworkId, NetworkParams};
    use std::sync::mpsc;
    use std::time::Duration;

    fn setup() -> (Arc<NullStore>, Arc<ConfirmationHeightProcessor>) {
        let store = Arc::new(NullStore::new());
        let ledger = Arc::new(Ledger::new(
            store.clone(),
            NetworkParams::new(NetworkId::Test),
        ));
        let processor = Arc::new(ConfirmationHeightProcessor::new(
            ledger,
            Arc::new(WriteQueue::new(false)),
            Arc::new(Stats::new()),
            &CementingConfig::default(),
        ));
        (store, processor)
    }

    fn record_cemented(processor: &ConfirmationHeightProcessor) -> Arc<Mutex<Vec<BlockHash>>> {
        let cemented = Arc::new(Mutex::new(Vec::new()));
        let sink = cemented.clone();
        processor.add_cemented_observer(Box::new(move |block| {
            sink.lock().unwrap().push(block.hash())
        }));
        cemented
    }

    #[test]
    fn queued_blocks_are_deduplicated() {
        let (store, processor) = setup();
        let open = store.open_genesis(Account::from(1), Amount::raw(10));
        processor.add(open.clone()).unwrap();
        processor.add(open.clone()).unwrap();
        assert_eq!(processor.awaiting_processing_size(), 1);
        assert!(processor.is_processing_block(&open.hash()));

        let cemented = record_cemented(&processor);
        processor.flush();
        assert_eq!(*cemented.lock().unwrap(), vec![open.hash()]);
        assert!(!processor.is_processing_block(&open.hash()));
        assert_eq!(processor.awaiting_processing_size(), 0);
    }

    #[test]
    fn already_cemented_observers_fire() {
        let (store, processor) = setup();
        let open = store.open_genesis(Account::from(1), Amount::raw(10));
        store.cement(&open.hash());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        processor.add_already_cemented_observer(Box::new(move |hash| {
            sink.lock().unwrap().push(*hash)
        }));
        processor.add(open.clone()).unwrap();
        processor.flush();
        assert_eq!(*seen.lock().unwrap(), vec![open.hash()]);
    }

    #[test]
    fn worker_cements_in_background() {
        let (store, processor) = setup();
        let genesis = Account::from(1);
        store.open_genesis(genesis, Amount::raw(10));
        let send = store.send(genesis, Account::from(2), Amount::raw(1));

        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        processor.add_cemented_observer(Box::new(move |block| {
            let _ = tx.lock().unwrap().send(block.hash());
        }));
        processor.start().unwrap();
        processor.add(send.clone()).unwrap();

        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        processor.stop();
        assert_eq!(second, send.hash());
        assert_ne!(first, second);
        assert_eq!(store.confirmation_height(&genesis).height, 2);
    }

    #[test]
    fn add_after_stop_fails() {
        let (store, processor) = setup();
        processor.stop();
        let open = store.open_genesis(Account::from(1), Amount::raw(10));
        assert!(matches!(processor.add(open), Err(CementError::Stopped)));
    }
}
