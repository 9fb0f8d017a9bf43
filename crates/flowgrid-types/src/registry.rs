//! Per-converter scratch registry populated by the host on demand.

use std::rc::Rc;

use crate::{ConsumerReport, ConverterId, ProducerReport, ResourceId};

/// Scratch container a host fills out when asked to describe its
/// converter's resource behavior for the current refresh window.
///
/// Every report created here is stamped with the owning converter's
/// endpoint id. The registry retains its records between refreshes so the
/// adapter can partition them into results after each tick; the broker
/// indexes the same records by `Rc` and writes results into them in place.
#[derive(Debug)]
pub struct ReportRegistry {
    endpoint_id: ConverterId,
    producers: Vec<Rc<ProducerReport>>,
    consumers: Vec<Rc<ConsumerReport>>,
}

impl ReportRegistry {
    /// Create an empty registry owned by `endpoint_id`.
    pub const fn new(endpoint_id: ConverterId) -> Self {
        Self {
            endpoint_id,
            producers: Vec::new(),
            consumers: Vec::new(),
        }
    }

    /// The converter every report in this registry belongs to.
    pub const fn endpoint_id(&self) -> ConverterId {
        self.endpoint_id
    }

    /// Drop every report, keeping allocated capacity for the next refresh.
    pub fn clear(&mut self) {
        self.producers.clear();
        self.consumers.clear();
    }

    /// Create and retain a production offer for `resource_id`.
    ///
    /// Returns a shared handle to the new record so the host can keep one
    /// for its own bookkeeping.
    pub fn add_producer(
        &mut self,
        resource_id: ResourceId,
        offered_per_sec: f64,
    ) -> Rc<ProducerReport> {
        let report = Rc::new(ProducerReport::new(
            self.endpoint_id,
            resource_id,
            offered_per_sec,
        ));
        self.producers.push(Rc::clone(&report));
        report
    }

    /// Create and retain a consumption request for `resource_id`.
    pub fn add_consumer(
        &mut self,
        resource_id: ResourceId,
        requested_per_sec: f64,
        optional: bool,
    ) -> Rc<ConsumerReport> {
        let report = Rc::new(ConsumerReport::new(
            self.endpoint_id,
            resource_id,
            requested_per_sec,
            optional,
        ));
        self.consumers.push(Rc::clone(&report));
        report
    }

    /// Production offers registered in this window, in creation order.
    pub fn producers(&self) -> &[Rc<ProducerReport>] {
        &self.producers
    }

    /// Consumption requests registered in this window, in creation order.
    pub fn consumers(&self) -> &[Rc<ConsumerReport>] {
        &self.consumers
    }

    /// Total number of reports currently held.
    pub fn len(&self) -> usize {
        self.producers.len() + self.consumers.len()
    }

    /// Whether the registry holds no reports.
    pub fn is_empty(&self) -> bool {
        self.producers.is_empty() && self.consumers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_are_stamped_with_owner() {
        let endpoint = ConverterId::new();
        let mut registry = ReportRegistry::new(endpoint);

        let producer = registry.add_producer(ResourceId::new(1), 10.0);
        let consumer = registry.add_consumer(ResourceId::new(2), 5.0, true);

        assert_eq!(producer.endpoint_id(), endpoint);
        assert_eq!(consumer.endpoint_id(), endpoint);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn returned_handle_aliases_stored_record() {
        let mut registry = ReportRegistry::new(ConverterId::new());
        let handle = registry.add_producer(ResourceId::new(1), 3.0);
        assert!(Rc::ptr_eq(&handle, &registry.producers()[0]));
    }

    #[test]
    fn clear_keeps_capacity() {
        let mut registry = ReportRegistry::new(ConverterId::new());
        for raw in 0..8 {
            registry.add_consumer(ResourceId::new(raw), 1.0, false);
        }
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.consumers.capacity() >= 8);
    }
}
