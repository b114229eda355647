//! Command Queue
//!
//! Unbounded FIFO of commands received from peers between two ticks.
//! Many producers (peer tasks), one consumer (the tick loop).

use parking_lot::Mutex;

use crate::sim::command::Command;

/// Result of an enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Appended to the tail.
    Accepted,
    /// Queue is closed; the command was discarded.
    Dropped,
}

#[derive(Debug, Default)]
struct Inner {
    pending: Vec<Command>,
    closed: bool,
}

/// Thread-safe, ordered command buffer.
///
/// `drain` swaps the whole buffer out under the lock, so a drain never
/// observes half of a concurrent burst and no command is returned twice.
#[derive(Debug, Default)]
pub struct CommandQueue {
    inner: Mutex<Inner>,
}

impl CommandQueue {
    /// Create an empty, open queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command. Dropped if the queue is closed.
    pub fn enqueue(&self, command: Command) -> Enqueued {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Enqueued::Dropped;
        }
        inner.pending.push(command);
        Enqueued::Accepted
    }

    /// Remove and return everything queued, in arrival order.
    pub fn drain(&self) -> Vec<Command> {
        std::mem::take(&mut self.inner.lock().pending)
    }

    /// Refuse further commands. Already queued ones can still be drained.
    pub fn close(&self) {
        self.inner.lock().closed = true;
    }

    /// Check if the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Number of commands waiting.
    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Check if nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn move_cmd(i: usize) -> Command {
        Command::Move { entity: format!("E{i}"), dx: i as f64, dy: 0.0 }
    }

    #[test]
    fn test_drain_preserves_arrival_order() {
        let queue = CommandQueue::new();
        for i in 0..5 {
            assert_eq!(queue.enqueue(move_cmd(i)), Enqueued::Accepted);
        }
        let drained = queue.drain();
        assert_eq!(drained, (0..5).map(move_cmd).collect::<Vec<_>>());
    }

    #[test]
    fn test_second_drain_is_empty() {
        let queue = CommandQueue::new();
        queue.enqueue(Command::Noop);
        assert_eq!(queue.drain().len(), 1);
        assert!(queue.drain().is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_closed_queue_drops() {
        let queue = CommandQueue::new();
        queue.enqueue(move_cmd(1));
        queue.close();

        assert!(queue.is_closed());
        assert_eq!(queue.enqueue(move_cmd(2)), Enqueued::Dropped);
        assert_eq!(queue.drain(), vec![move_cmd(1)]);
    }

    #[test]
    fn test_concurrent_producers_deliver_exactly_once() {
        let queue = Arc::new(CommandQueue::new());
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..250 {
                        queue.enqueue(move_cmd(p * 1000 + i));
                    }
                })
            })
            .collect();

        let mut seen = Vec::new();
        while seen.len() < 1000 {
            seen.extend(queue.drain());
            thread::yield_now();
        }
        for producer in producers {
            producer.join().unwrap();
        }
        seen.extend(queue.drain());

        assert_eq!(seen.len(), 1000);

        // Per-producer order survives interleaving.
        for p in 0..4 {
            let from_p: Vec<usize> = seen
                .iter()
                .filter_map(|c| match c {
                    Command::Move { dx, .. } if (*dx as usize) / 1000 == p => Some(*dx as usize),
                    _ => None,
                })
                .collect();
            assert_eq!(from_p, (0..250).map(|i| p * 1000 + i).collect::<Vec<_>>());
        }
    }
}
