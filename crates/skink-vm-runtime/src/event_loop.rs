//! Event loop
//!
//! Macro-events for the VM: a timer heap (min-deadline, FIFO among equal
//! deadlines) and an immediate queue. The loop owner drains the VM's job
//! queue (microtasks) to exhaustion after every callback, which gives the
//! ordering guarantees the engine promises: FIFO delivery of resumptions
//! and full microtask drain between macro-events.

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

use skink_vm_core::value::Value;

/// A scheduled callback
pub struct Timer {
    /// Timer id (as handed back to script)
    pub id: u64,
    /// When it fires
    pub deadline: Instant,
    /// Registration sequence, for FIFO among equal deadlines
    pub sequence: u64,
    /// Script callback
    pub callback: Value,
    /// Arguments passed through to the callback
    pub args: Vec<Value>,
    /// Repeat interval (`setInterval`)
    pub interval: Option<Duration>,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.sequence == other.sequence
    }
}
impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse for earliest-deadline-first,
        // then lowest sequence first
        other
            .deadline
            .cmp(&self.deadline)
            .then(other.sequence.cmp(&self.sequence))
    }
}

/// Timer heap and immediate queue
pub struct EventLoop {
    timers: Mutex<BinaryHeap<Timer>>,
    immediates: Mutex<VecDeque<Timer>>,
    cancelled: Mutex<HashSet<u64>>,
    next_id: AtomicU64,
    next_sequence: AtomicU64,
}

impl EventLoop {
    /// Create an empty loop
    pub fn new() -> Self {
        Self {
            timers: Mutex::new(BinaryHeap::new()),
            immediates: Mutex::new(VecDeque::new()),
            cancelled: Mutex::new(HashSet::new()),
            next_id: AtomicU64::new(1),
            next_sequence: AtomicU64::new(0),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, AtomicOrdering::Relaxed)
    }

    fn next_sequence(&self) -> u64 {
        self.next_sequence.fetch_add(1, AtomicOrdering::Relaxed)
    }

    /// Schedule a one-shot timeout
    pub fn set_timeout(&self, callback: Value, args: Vec<Value>, delay: Duration) -> u64 {
        let id = self.next_id();
        self.timers.lock().push(Timer {
            id,
            deadline: Instant::now() + delay,
            sequence: self.next_sequence(),
            callback,
            args,
            interval: None,
        });
        id
    }

    /// Schedule a repeating interval
    pub fn set_interval(&self, callback: Value, args: Vec<Value>, interval: Duration) -> u64 {
        let id = self.next_id();
        self.timers.lock().push(Timer {
            id,
            deadline: Instant::now() + interval,
            sequence: self.next_sequence(),
            callback,
            args,
            interval: Some(interval),
        });
        id
    }

    /// Post a callback for the next loop turn
    pub fn set_immediate(&self, callback: Value, args: Vec<Value>) -> u64 {
        let id = self.next_id();
        self.immediates.lock().push_back(Timer {
            id,
            deadline: Instant::now(),
            sequence: self.next_sequence(),
            callback,
            args,
            interval: None,
        });
        id
    }

    /// Cancel a timer or immediate
    pub fn clear(&self, id: u64) {
        self.cancelled.lock().insert(id);
    }

    /// Whether anything remains scheduled
    pub fn is_idle(&self) -> bool {
        let cancelled = self.cancelled.lock();
        let timers_alive = self
            .timers
            .lock()
            .iter()
            .any(|t| !cancelled.contains(&t.id));
        let immediates_alive = self
            .immediates
            .lock()
            .iter()
            .any(|t| !cancelled.contains(&t.id));
        !(timers_alive || immediates_alive)
    }

    /// Take the next runnable event: an immediate, or a timer once due.
    /// Blocks (sleeps) until the nearest timer's deadline when nothing is
    /// immediately runnable. `None` when the loop is idle.
    pub fn next_event(&self) -> Option<Timer> {
        loop {
            // Immediates drain first, in posting order
            loop {
                let candidate = self.immediates.lock().pop_front();
                match candidate {
                    Some(timer) => {
                        if self.cancelled.lock().remove(&timer.id) {
                            continue;
                        }
                        return Some(timer);
                    }
                    None => break,
                }
            }

            let now = Instant::now();
            let mut timers = self.timers.lock();
            match timers.peek() {
                None => return None,
                Some(timer) if self.cancelled.lock().contains(&timer.id) => {
                    let timer = timers.pop().expect("peeked");
                    self.cancelled.lock().remove(&timer.id);
                }
                Some(timer) if timer.deadline <= now => {
                    let mut timer = timers.pop().expect("peeked");
                    // Intervals rearm before running
                    if let Some(interval) = timer.interval {
                        timers.push(Timer {
                            id: timer.id,
                            deadline: now + interval,
                            sequence: self.next_sequence(),
                            callback: timer.callback.clone(),
                            args: timer.args.clone(),
                            interval: Some(interval),
                        });
                        timer.interval = None;
                    }
                    return Some(timer);
                }
                Some(timer) => {
                    let wait = timer.deadline - now;
                    drop(timers);
                    std::thread::sleep(wait.min(Duration::from_millis(50)));
                }
            }
        }
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_for_equal_deadlines() {
        let event_loop = EventLoop::new();
        let a = event_loop.set_timeout(Value::number(1.0), Vec::new(), Duration::ZERO);
        let b = event_loop.set_timeout(Value::number(2.0), Vec::new(), Duration::ZERO);
        assert_ne!(a, b);

        let first = event_loop.next_event().unwrap();
        let second = event_loop.next_event().unwrap();
        assert_eq!(first.callback, Value::number(1.0));
        assert_eq!(second.callback, Value::number(2.0));
        assert!(event_loop.next_event().is_none());
    }

    #[test]
    fn test_immediates_run_before_timers() {
        let event_loop = EventLoop::new();
        event_loop.set_timeout(Value::number(1.0), Vec::new(), Duration::ZERO);
        event_loop.set_immediate(Value::number(2.0), Vec::new());

        let first = event_loop.next_event().unwrap();
        assert_eq!(first.callback, Value::number(2.0));
    }

    #[test]
    fn test_clear_cancels() {
        let event_loop = EventLoop::new();
        let id = event_loop.set_timeout(Value::number(1.0), Vec::new(), Duration::ZERO);
        event_loop.clear(id);
        assert!(event_loop.is_idle());
        assert!(event_loop.next_event().is_none());
    }

    #[test]
    fn test_interval_rearms() {
        let event_loop = EventLoop::new();
        let id = event_loop.set_interval(Value::number(1.0), Vec::new(), Duration::ZERO);
        let first = event_loop.next_event().unwrap();
        assert_eq!(first.id, id);
        assert!(!event_loop.is_idle());
        event_loop.clear(id);
        assert!(event_loop.next_event().is_none());
    }
}
