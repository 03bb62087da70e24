use cm_chat::MessageId;
use std::collections::{HashSet, VecDeque};

/// Bounded set of message ids that already produced (or were passed over
/// alongside) a dispatched action.
///
/// Capacity policy: ids are kept in insertion order; once the ledger grows
/// past twice its capacity it compacts down to the newest `capacity` entries
/// in one batch. While an id is present, `contains` never lies — a seen
/// message is never reprocessed. An id evicted by compaction that later
/// resurfaces in a page WILL be reprocessed; under an unbounded session
/// lifetime that imprecision is tolerated rather than fixed.
#[derive(Debug)]
pub struct DedupLedger {
    seen: HashSet<MessageId>,
    order: VecDeque<MessageId>,
    capacity: usize,
}

impl DedupLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Record a batch of ids as actioned, then compact if the ledger has
    /// overflowed. Re-inserting a present id is a no-op.
    pub fn commit<I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = MessageId>,
    {
        for id in ids {
            if self.seen.insert(id.clone()) {
                self.order.push_back(id);
            }
        }
        self.compact();
    }

    fn compact(&mut self) {
        if self.order.len() <= self.capacity * 2 {
            return;
        }
        let drop_count = self.order.len() - self.capacity;
        for _ in 0..drop_count {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        tracing::debug!(
            dropped = drop_count,
            retained = self.order.len(),
            "compacted dedup ledger"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::DedupLedger;
    use cm_chat::MessageId;

    fn id(n: usize) -> MessageId {
        MessageId::new(format!("msg-{n}"))
    }

    #[test]
    fn remembers_committed_ids() {
        let mut ledger = DedupLedger::new(10);
        ledger.commit([id(1), id(2)]);
        assert!(ledger.contains(&id(1)));
        assert!(ledger.contains(&id(2)));
        assert!(!ledger.contains(&id(3)));
    }

    #[test]
    fn recommit_of_present_id_does_not_grow_ledger() {
        let mut ledger = DedupLedger::new(10);
        ledger.commit([id(1)]);
        ledger.commit([id(1), id(1)]);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn size_never_exceeds_twice_capacity() {
        let capacity = 8;
        let mut ledger = DedupLedger::new(capacity);
        for batch in 0..20 {
            let start = batch * 5;
            ledger.commit((start..start + 5).map(id));
            assert!(
                ledger.len() <= capacity * 2,
                "ledger grew to {} after batch {batch}",
                ledger.len()
            );
        }
    }

    #[test]
    fn compaction_drops_oldest_and_keeps_newest() {
        let capacity = 4;
        let mut ledger = DedupLedger::new(capacity);
        // One oversized batch: 0..=8 pushes len to 9 > 2*4, compacts to 4.
        ledger.commit((0..9).map(id));
        assert_eq!(ledger.len(), capacity);
        for n in 0..5 {
            assert!(!ledger.contains(&id(n)), "expected msg-{n} evicted");
        }
        for n in 5..9 {
            assert!(ledger.contains(&id(n)), "expected msg-{n} retained");
        }
    }
}
