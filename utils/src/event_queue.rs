//! Blocking FIFO used to hand events from producers to a dispatcher thread.
//!
//! Producers never block beyond the queue mutex. Consumers block in
//! [`EventQueue::next_blocking`] until an event arrives or the queue is stopped.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

pub struct EventQueue<T> {
    data: Mutex<QueueData<T>>,
    condition: Condvar,
}

struct QueueData<T> {
    events: VecDeque<T>,
    stopped: bool,
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(QueueData {
                events: VecDeque::new(),
                stopped: false,
            }),
            condition: Condvar::new(),
        }
    }

    /// Events posted after `stop` are discarded.
    pub fn post(&self, event: T) {
        let mut data = self.data.lock().unwrap();
        if data.stopped {
            return;
        }
        data.events.push_back(event);
        drop(data);
        self.condition.notify_one();
    }

    /// `None` once the queue has been stopped.
    pub fn next_blocking(&self) -> Option<T> {
        let mut data = self.data.lock().unwrap();
        loop {
            if data.stopped {
                return None;
            }
            if let Some(event) = data.events.pop_front() {
                return Some(event);
            }
            data = self.condition.wait(data).unwrap();
        }
    }

    pub fn drain(&self) -> Vec<T> {
        self.data.lock().unwrap().events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stop(&self) {
        self.data.lock().unwrap().stopped = true;
        self.condition.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn events_come_out_in_order() {
        let queue = EventQueue::new();
        queue.post(1);
        queue.post(2);
        assert_eq!(queue.next_blocking(), Some(1));
        assert_eq!(queue.drain(), vec![2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn stop_wakes_a_blocked_consumer() {
        let queue = Arc::new(EventQueue::<u32>::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.next_blocking())
        };
        queue.stop();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn posting_after_stop_is_ignored() {
        let queue = EventQueue::new();
        queue.stop();
        queue.post("late");
        assert!(queue.is_empty());
    }
}
