// crates/sd_forcing/src/broker.rs

//! Timestep queue broker
//!
//! One keyed queue per forcing variable. Producers `put` grids in
//! chronological order; the consumer `get`s them by key, blocking until the
//! matching put has happened. There is no timeout on either side.
//!
//! # Flow
//!
//! ```text
//! producer[var] ──put(key, grid)──> DateQueue[var] ──get(key)──> consumer
//!                                        ^                          │
//!                                        └── QueueCleaner <── ack(key)
//! ```
//!
//! A queue holds at most `max_ahead` keys; a producer that runs further
//! ahead blocks until the consumer acknowledges a timestep and the cleaner
//! evicts every key up to it. `close()` wakes every waiter with an error and
//! is the only way a blocked call returns early.

use std::collections::BTreeMap;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use sd_foundation::grid::Grid;
use sd_foundation::TimestepKey;
use tracing::debug;

use crate::error::{ForcingError, ForcingResult};
use crate::variables::ForcingVariable;

/// Capacity of the acknowledgment channel
pub const ACK_CAPACITY: usize = 64;

struct QueueState {
    items: BTreeMap<TimestepKey, Option<Grid>>,
    closed: bool,
}

/// Keyed queue of one forcing variable
pub struct DateQueue {
    variable: ForcingVariable,
    max_ahead: usize,
    state: Mutex<QueueState>,
    /// Signalled when an item arrives
    available: Condvar,
    /// Signalled when items are evicted
    space: Condvar,
}

impl DateQueue {
    /// Queue buffering at most `max_ahead` keys
    pub fn new(variable: ForcingVariable, max_ahead: usize) -> Self {
        Self {
            variable,
            max_ahead: max_ahead.max(1),
            state: Mutex::new(QueueState {
                items: BTreeMap::new(),
                closed: false,
            }),
            available: Condvar::new(),
            space: Condvar::new(),
        }
    }

    /// Variable carried by this queue
    pub fn variable(&self) -> ForcingVariable {
        self.variable
    }

    /// Publish a grid (`None` = no data), blocking while the queue is full
    pub fn put(&self, key: TimestepKey, value: Option<Grid>) -> ForcingResult<()> {
        let mut state = self.state.lock();
        while state.items.len() >= self.max_ahead && !state.closed {
            self.space.wait(&mut state);
        }
        if state.closed {
            return Err(ForcingError::BrokerClosed {
                variable: self.variable,
                key,
            });
        }
        state.items.insert(key, value);
        self.available.notify_all();
        Ok(())
    }

    /// Grid published for `key`, blocking until it is available
    ///
    /// The item stays buffered until evicted, so a repeated `get` of the
    /// same key returns the same value.
    pub fn get(&self, key: &TimestepKey) -> ForcingResult<Option<Grid>> {
        let mut state = self.state.lock();
        loop {
            if let Some(value) = state.items.get(key) {
                return Ok(value.clone());
            }
            if state.closed {
                return Err(ForcingError::BrokerClosed {
                    variable: self.variable,
                    key: *key,
                });
            }
            self.available.wait(&mut state);
        }
    }

    /// Drop every buffered key `<= key`, returns how many were dropped
    pub fn evict_through(&self, key: &TimestepKey) -> usize {
        let mut state = self.state.lock();
        let before = state.items.len();
        state.items.retain(|k, _| k > key);
        let evicted = before - state.items.len();
        if evicted > 0 {
            self.space.notify_all();
        }
        evicted
    }

    /// Number of buffered keys
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Nothing buffered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wake all waiters with an error
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.available.notify_all();
        self.space.notify_all();
    }
}

// ============================================================================
// TimestepBroker
// ============================================================================

/// One `DateQueue` per forcing variable
pub struct TimestepBroker {
    queues: BTreeMap<ForcingVariable, DateQueue>,
}

impl TimestepBroker {
    /// Broker for `variables`
    pub fn new(variables: &[ForcingVariable], max_ahead: usize) -> Self {
        let queues = variables
            .iter()
            .map(|&v| (v, DateQueue::new(v, max_ahead)))
            .collect();
        Self { queues }
    }

    /// Variables with a queue
    pub fn variables(&self) -> impl Iterator<Item = ForcingVariable> + '_ {
        self.queues.keys().copied()
    }

    /// Queue of one variable
    pub fn queue(&self, variable: ForcingVariable) -> ForcingResult<&DateQueue> {
        self.queues
            .get(&variable)
            .ok_or(ForcingError::NoQueue(variable))
    }

    /// Producer side
    pub fn put(
        &self,
        variable: ForcingVariable,
        key: TimestepKey,
        value: Option<Grid>,
    ) -> ForcingResult<()> {
        self.queue(variable)?.put(key, value)
    }

    /// Consumer side
    pub fn get(&self, variable: ForcingVariable, key: &TimestepKey) -> ForcingResult<Option<Grid>> {
        self.queue(variable)?.get(key)
    }

    /// Evict every key `<= key` from all queues
    pub fn evict_through(&self, key: &TimestepKey) -> usize {
        self.queues.values().map(|q| q.evict_through(key)).sum()
    }

    /// Close every queue
    pub fn close(&self) {
        for queue in self.queues.values() {
            queue.close();
        }
    }
}

// ============================================================================
// Acknowledgment / cleaner
// ============================================================================

/// Acknowledgment channel between the consumer and the cleaner
pub fn ack_channel() -> (Sender<TimestepKey>, Receiver<TimestepKey>) {
    bounded(ACK_CAPACITY)
}

/// Evicts consumed timesteps from the broker
///
/// Runs until every acknowledgment sender has been dropped.
pub struct QueueCleaner<'a> {
    broker: &'a TimestepBroker,
    acks: Receiver<TimestepKey>,
}

impl<'a> QueueCleaner<'a> {
    /// Cleaner for `broker` fed by `acks`
    pub fn new(broker: &'a TimestepBroker, acks: Receiver<TimestepKey>) -> Self {
        Self { broker, acks }
    }

    /// Process acknowledgments, returns the number of acknowledged keys
    pub fn run(self) -> usize {
        let mut acknowledged = 0;
        for key in self.acks.iter() {
            let evicted = self.broker.evict_through(&key);
            debug!(key = %key, evicted, "queue cleaner evicted consumed timestep");
            acknowledged += 1;
        }
        acknowledged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use sd_foundation::grid::{self, Shape};
    use std::thread;
    use std::time::Duration;

    fn key(h: u32) -> TimestepKey {
        NaiveDate::from_ymd_opt(2018, 1, 1)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_put_then_get() {
        let q = DateQueue::new(ForcingVariable::AirTemp, 4);
        q.put(key(0), Some(grid::filled(Shape::new(1, 1), 2.0))).unwrap();
        q.put(key(1), None).unwrap();
        assert_eq!(q.get(&key(0)).unwrap().unwrap()[[0, 0]], 2.0);
        assert!(q.get(&key(1)).unwrap().is_none());
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_evict_through() {
        let q = DateQueue::new(ForcingVariable::Precip, 4);
        for h in 0..4 {
            q.put(key(h), None).unwrap();
        }
        assert_eq!(q.evict_through(&key(1)), 2);
        assert_eq!(q.len(), 2);
        assert_eq!(q.evict_through(&key(1)), 0);
    }

    #[test]
    fn test_get_blocks_until_put() {
        let q = DateQueue::new(ForcingVariable::WindSpeed, 2);
        thread::scope(|s| {
            let consumer = s.spawn(|| q.get(&key(3)));
            thread::sleep(Duration::from_millis(20));
            q.put(key(3), Some(grid::filled(Shape::new(1, 1), 7.0))).unwrap();
            let value = consumer.join().unwrap().unwrap().unwrap();
            assert_eq!(value[[0, 0]], 7.0);
        });
    }

    #[test]
    fn test_put_blocks_when_full() {
        let q = DateQueue::new(ForcingVariable::Thermal, 1);
        q.put(key(0), None).unwrap();
        thread::scope(|s| {
            let producer = s.spawn(|| q.put(key(1), None));
            thread::sleep(Duration::from_millis(20));
            assert_eq!(q.len(), 1);
            q.evict_through(&key(0));
            producer.join().unwrap().unwrap();
        });
        assert_eq!(q.len(), 1);
        assert!(q.get(&key(1)).is_ok());
    }

    #[test]
    fn test_close_wakes_waiters() {
        let q = DateQueue::new(ForcingVariable::NetSolar, 1);
        thread::scope(|s| {
            let consumer = s.spawn(|| q.get(&key(0)));
            thread::sleep(Duration::from_millis(20));
            q.close();
            let err = consumer.join().unwrap().unwrap_err();
            assert!(err.is_closed());
        });
        assert!(q.put(key(0), None).is_err());
    }

    #[test]
    fn test_cleaner_drains_acknowledged() {
        let broker = TimestepBroker::new(&[ForcingVariable::AirTemp, ForcingVariable::Precip], 4);
        for h in 0..3 {
            broker.put(ForcingVariable::AirTemp, key(h), None).unwrap();
            broker.put(ForcingVariable::Precip, key(h), None).unwrap();
        }
        let (tx, rx) = ack_channel();
        thread::scope(|s| {
            let cleaner = s.spawn(|| QueueCleaner::new(&broker, rx).run());
            tx.send(key(0)).unwrap();
            tx.send(key(1)).unwrap();
            drop(tx);
            assert_eq!(cleaner.join().unwrap(), 2);
        });
        assert_eq!(broker.queue(ForcingVariable::AirTemp).unwrap().len(), 1);
        assert_eq!(broker.queue(ForcingVariable::Precip).unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_queue() {
        let broker = TimestepBroker::new(&[ForcingVariable::AirTemp], 1);
        assert!(matches!(
            broker.get(ForcingVariable::Thermal, &key(0)),
            Err(ForcingError::NoQueue(_))
        ));
    }
}
