//! Per-converter, per-tick results handed to the host after balancing.

use std::rc::Rc;

use crate::{ConsumerReport, ProducerReport};

/// The outcome of one broker tick for a single converter.
///
/// Reports are partitioned by their brokered flag: brokered reports took
/// part in a resource network and carry broker-decided amounts, unbrokered
/// reports belong to isolated resources and the host is free to satisfy
/// them against local storage however it likes.
///
/// One instance is owned by each converter adapter and reused across
/// ticks; [`clear`] drops the previous tick's partitions while keeping
/// allocated capacity.
///
/// [`clear`]: ConversionResults::clear
#[derive(Debug, Default)]
pub struct ConversionResults {
    delta_time: f64,
    brokered_producers: Vec<Rc<ProducerReport>>,
    unbrokered_producers: Vec<Rc<ProducerReport>>,
    brokered_consumers: Vec<Rc<ConsumerReport>>,
    unbrokered_consumers: Vec<Rc<ConsumerReport>>,
}

impl ConversionResults {
    /// Create an empty results container.
    pub fn new() -> Self {
        Self::default()
    }

    /// The delta time the amounts in this container were computed with.
    pub const fn delta_time(&self) -> f64 {
        self.delta_time
    }

    /// Record the delta time for the tick being partitioned.
    pub fn set_delta_time(&mut self, delta_time: f64) {
        self.delta_time = delta_time;
    }

    /// Drop all partitions, keeping allocated capacity.
    pub fn clear(&mut self) {
        self.delta_time = 0.0;
        self.brokered_producers.clear();
        self.unbrokered_producers.clear();
        self.brokered_consumers.clear();
        self.unbrokered_consumers.clear();
    }

    /// File a producer report under the partition its brokered flag selects.
    pub fn push_producer(&mut self, report: Rc<ProducerReport>) {
        if report.is_brokered() {
            self.brokered_producers.push(report);
        } else {
            self.unbrokered_producers.push(report);
        }
    }

    /// File a consumer report under the partition its brokered flag selects.
    pub fn push_consumer(&mut self, report: Rc<ConsumerReport>) {
        if report.is_brokered() {
            self.brokered_consumers.push(report);
        } else {
            self.unbrokered_consumers.push(report);
        }
    }

    /// Producer reports that took part in a resource network this tick.
    pub fn brokered_producers(&self) -> &[Rc<ProducerReport>] {
        &self.brokered_producers
    }

    /// Producer reports on isolated resources.
    pub fn unbrokered_producers(&self) -> &[Rc<ProducerReport>] {
        &self.unbrokered_producers
    }

    /// Consumer reports that took part in a resource network this tick.
    pub fn brokered_consumers(&self) -> &[Rc<ConsumerReport>] {
        &self.brokered_consumers
    }

    /// Consumer reports on isolated resources.
    pub fn unbrokered_consumers(&self) -> &[Rc<ConsumerReport>] {
        &self.unbrokered_consumers
    }

    /// Total number of reports across all four partitions.
    pub fn len(&self) -> usize {
        self.brokered_producers.len()
            + self.unbrokered_producers.len()
            + self.brokered_consumers.len()
            + self.unbrokered_consumers.len()
    }

    /// Whether the container holds no reports.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
