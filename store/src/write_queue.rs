//! The single, system-wide write coordinator.
//!
//! Writers line up in a FIFO. The writer at the front owns the right to open a
//! write transaction until its [`WriteGuard`] is released or dropped. Writers
//! may either block for their turn ([`WriteQueue::wait`]) or enqueue and check
//! opportunistically ([`WriteQueue::process`]), keeping their place in line.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

/// Components that write to the ledger. Order is irrelevant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Writer {
    ConfirmationHeight,
    ProcessBatch,
    Pruning,
    /// Lets tests hold the write lock to simulate contention.
    Testing,
}

struct QueueState {
    queue: Mutex<VecDeque<Writer>>,
    condition: Condvar,
}

impl QueueState {
    fn release_front(&self) {
        self.queue.lock().unwrap().pop_front();
        self.condition.notify_all();
    }
}

/// Ownership of the write lock. Releases on drop.
pub struct WriteGuard {
    state: Option<Arc<QueueState>>,
}

impl WriteGuard {
    /// A guard that owns nothing, for queues created without locking.
    pub fn null() -> Self {
        Self { state: None }
    }

    pub fn is_owned(&self) -> bool {
        self.state.is_some()
    }

    pub fn release(&mut self) {
        if let Some(state) = self.state.take() {
            state.release_front();
        }
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        self.release();
    }
}

pub struct WriteQueue {
    state: Arc<QueueState>,
    use_noops: bool,
}

impl WriteQueue {
    /// With `use_noops` every call succeeds immediately and guards own nothing.
    pub fn new(use_noops: bool) -> Self {
        Self {
            state: Arc::new(QueueState {
                queue: Mutex::new(VecDeque::new()),
                condition: Condvar::new(),
            }),
            use_noops,
        }
    }

    /// Blocks until `writer` reaches the front of the queue.
    pub fn wait(&self, writer: Writer) -> WriteGuard {
        if self.use_noops {
            return WriteGuard::null();
        }
        let mut queue = self.state.queue.lock().unwrap();
        if !queue.contains(&writer) {
            queue.push_back(writer);
        }
        let _queue = self
            .state
            .condition
            .wait_while(queue, |q| q.front() != Some(&writer))
            .unwrap();
        self.guard()
    }

    /// Enqueues `writer` if absent and reports whether it is now at the front.
    /// A writer that is not at the front keeps its place in line.
    pub fn process(&self, writer: Writer) -> bool {
        if self.use_noops {
            return true;
        }
        let mut queue = self.state.queue.lock().unwrap();
        if !queue.contains(&writer) {
            queue.push_back(writer);
        }
        queue.front() == Some(&writer)
    }

    /// Takes the lock only if `writer` can have it right away.
    pub fn try_lock(&self, writer: Writer) -> Option<WriteGuard> {
        if self.process(writer) {
            Some(self.pop())
        } else {
            None
        }
    }

    /// Guard for the writer at the front. The entry leaves the queue when the
    /// guard is released, not here.
    pub fn pop(&self) -> WriteGuard {
        if self.use_noops {
            return WriteGuard::null();
        }
        self.guard()
    }

    pub fn contains(&self, writer: Writer) -> bool {
        self.state.queue.lock().unwrap().contains(&writer)
    }

    fn guard(&self) -> WriteGuard {
        WriteGuard {
            state: Some(Arc::clone(&self.state)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn first_writer_gets_the_lock() {
        let queue = WriteQueue::new(false);
        let guard = queue.try_lock(Writer::ConfirmationHeight);
        assert!(guard.as_ref().is_some_and(|g| g.is_owned()));
        assert!(queue.contains(Writer::ConfirmationHeight));
        drop(guard);
        assert!(!queue.contains(Writer::ConfirmationHeight));
    }

    #[test]
    fn second_writer_keeps_its_place() {
        let queue = WriteQueue::new(false);
        let mut testing = queue.wait(Writer::Testing);
        assert!(!queue.process(Writer::ConfirmationHeight));
        assert!(queue.contains(Writer::ConfirmationHeight));
        testing.release();
        assert!(queue.process(Writer::ConfirmationHeight));
    }

    #[test]
    fn wait_blocks_until_release() {
        let queue = Arc::new(WriteQueue::new(false));
        let held = queue.wait(Writer::Testing);
        let (tx, rx) = mpsc::channel();
        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let _guard = queue.wait(Writer::ConfirmationHeight);
                tx.send(()).unwrap();
            })
        };
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        drop(held);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }

    #[test]
    fn noop_queue_never_blocks() {
        let queue = WriteQueue::new(true);
        let _a = queue.wait(Writer::Testing);
        let b = queue.wait(Writer::ConfirmationHeight);
        assert!(!b.is_owned());
    }
}
