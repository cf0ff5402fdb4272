use etl_api::DomainEvent;

/// Ordered, size-bounded group of events handed to the loader as one insert.
#[derive(Debug, Clone)]
pub struct Batch {
    events: Vec<DomainEvent>,
    capacity: usize,
}

impl Batch {
    /// `capacity` of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Vec::with_capacity(capacity.min(65536)),
            capacity,
        }
    }

    pub fn push(&mut self, event: DomainEvent) {
        self.events.push(event);
    }

    pub fn is_full(&self) -> bool {
        self.events.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn events(&self) -> &[DomainEvent] {
        &self.events
    }

    /// Highest event time in the batch.
    pub fn high_water(&self) -> Option<i64> {
        self.events.iter().map(|e| e.event_time).max()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn event(ts: i64) -> DomainEvent {
        DomainEvent {
            actor_id: Uuid::nil(),
            subject_id: Uuid::nil(),
            metric: 1,
            event_time: ts,
        }
    }

    #[test]
    fn fills_up_to_capacity() {
        let mut b = Batch::new(2);
        assert!(b.is_empty());
        b.push(event(5));
        assert!(!b.is_full());
        b.push(event(3));
        assert!(b.is_full());
        assert_eq!(b.high_water(), Some(5));
        b.clear();
        assert!(b.is_empty());
        assert_eq!(b.high_water(), None);
    }

    #[test]
    fn zero_capacity_behaves_as_one() {
        let mut b = Batch::new(0);
        b.push(event(1));
        assert!(b.is_full());
    }
}
