//! Bounded priority queue for pending transactions.
//!
//! Ordered by descending fee rate, FIFO among equal rates. The length
//! check and the insert happen under one lock, so the queue can never
//! exceed its capacity; at capacity the incoming item is dropped and
//! counted, producers are never blocked.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use scout_core::PendingTransaction;
use tracing::warn;

struct QueuedTransaction {
    tx: PendingTransaction,
    seq: u64,
}

impl PartialEq for QueuedTransaction {
    fn eq(&self, other: &Self) -> bool {
        self.tx.fee_rate == other.tx.fee_rate && self.seq == other.seq
    }
}

impl Eq for QueuedTransaction {}

impl PartialOrd for QueuedTransaction {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTransaction {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Max-heap: higher fee rate wins, earlier arrival breaks ties.
        self.tx
            .fee_rate
            .cmp(&other.tx.fee_rate)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

pub struct TransactionQueue {
    heap: Mutex<BinaryHeap<QueuedTransaction>>,
    capacity: usize,
    next_seq: AtomicU64,
    dropped: AtomicU64,
}

impl TransactionQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::with_capacity(capacity)),
            capacity,
            next_seq: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a transaction. Returns false when the queue is full and the
    /// item was dropped.
    pub fn push(&self, tx: PendingTransaction) -> bool {
        let Ok(mut heap) = self.heap.lock() else {
            return false;
        };
        if heap.len() >= self.capacity {
            drop(heap);
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                signature = %tx.signature,
                capacity = self.capacity,
                total_dropped = total,
                "transaction queue full, dropping incoming transaction"
            );
            return false;
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        heap.push(QueuedTransaction { tx, seq });
        true
    }

    /// Non-blocking pop of the highest-priority transaction.
    pub fn pop(&self) -> Option<PendingTransaction> {
        self.heap.lock().ok()?.pop().map(|q| q.tx)
    }

    /// Pop up to `max` transactions in priority order.
    pub fn pop_batch(&self, max: usize) -> Vec<PendingTransaction> {
        let Ok(mut heap) = self.heap.lock() else {
            return Vec::new();
        };
        let mut batch = Vec::with_capacity(max.min(heap.len()));
        for _ in 0..max {
            match heap.pop() {
                Some(q) => batch.push(q.tx),
                None => break,
            }
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.heap.lock().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn utilization(&self) -> f64 {
        (self.len() as f64 / self.capacity as f64) * 100.0
    }

    pub fn clear(&self) {
        if let Ok(mut heap) = self.heap.lock() {
            heap.clear();
        }
    }
}
