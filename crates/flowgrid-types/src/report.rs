//! Participation report records shared between a converter and the broker.
//!
//! A report is one (converter, resource, role) row for a refresh window:
//! the host declares a rate when the record is created, and the broker
//! writes the per-tick result back into the same record during balancing.
//! Records are shared by `Rc` between the owning converter's registry and
//! the broker's per-resource index, so the broker-written fields live in
//! [`Cell`]s -- the whole engine is single-threaded by contract, and every
//! mutable field is `Copy`.

use std::cell::Cell;

use crate::{ConverterId, ResourceId};

/// A production offer for one (converter, resource) pair.
#[derive(Debug)]
pub struct ProducerReport {
    endpoint_id: ConverterId,
    resource_id: ResourceId,
    offered_per_sec: f64,
    used_per_tick: Cell<f64>,
    brokered: Cell<bool>,
}

impl ProducerReport {
    /// Create a report offering `offered_per_sec` units of `resource_id`
    /// on behalf of `endpoint_id`.
    ///
    /// The rate must be non-negative and finite; the broker's arithmetic
    /// does not guard against violations of that contract.
    pub fn new(endpoint_id: ConverterId, resource_id: ResourceId, offered_per_sec: f64) -> Self {
        Self {
            endpoint_id,
            resource_id,
            offered_per_sec,
            used_per_tick: Cell::new(0.0),
            brokered: Cell::new(false),
        }
    }

    /// The producing converter.
    pub const fn endpoint_id(&self) -> ConverterId {
        self.endpoint_id
    }

    /// The resource being offered.
    pub const fn resource_id(&self) -> ResourceId {
        self.resource_id
    }

    /// Host-declared production rate, in units per second.
    pub const fn offered_per_sec(&self) -> f64 {
        self.offered_per_sec
    }

    /// How much of the offer the broker actually drew this tick.
    pub fn used_per_tick(&self) -> f64 {
        self.used_per_tick.get()
    }

    /// Broker-written: record the amount drawn from this offer.
    pub fn set_used_per_tick(&self, amount: f64) {
        self.used_per_tick.set(amount);
    }

    /// Whether this report was part of a brokered resource network at the
    /// most recent ledger refresh.
    pub fn is_brokered(&self) -> bool {
        self.brokered.get()
    }

    /// Broker-written: flag the report as brokered or isolated.
    pub fn set_brokered(&self, brokered: bool) {
        self.brokered.set(brokered);
    }
}

/// A consumption request for one (converter, resource) pair.
///
/// Optional requests are only eligible for surplus left after every
/// required request on the same resource has been served.
#[derive(Debug)]
pub struct ConsumerReport {
    endpoint_id: ConverterId,
    resource_id: ResourceId,
    requested_per_sec: f64,
    optional: bool,
    granted_per_tick: Cell<f64>,
    brokered: Cell<bool>,
}

impl ConsumerReport {
    /// Create a report requesting `requested_per_sec` units of
    /// `resource_id` on behalf of `endpoint_id`.
    pub fn new(
        endpoint_id: ConverterId,
        resource_id: ResourceId,
        requested_per_sec: f64,
        optional: bool,
    ) -> Self {
        Self {
            endpoint_id,
            resource_id,
            requested_per_sec,
            optional,
            granted_per_tick: Cell::new(0.0),
            brokered: Cell::new(false),
        }
    }

    /// The consuming converter.
    pub const fn endpoint_id(&self) -> ConverterId {
        self.endpoint_id
    }

    /// The resource being requested.
    pub const fn resource_id(&self) -> ResourceId {
        self.resource_id
    }

    /// Host-declared consumption rate, in units per second.
    pub const fn requested_per_sec(&self) -> f64 {
        self.requested_per_sec
    }

    /// Whether this request is surplus-only.
    pub const fn is_optional(&self) -> bool {
        self.optional
    }

    /// How much the broker granted this tick.
    pub fn granted_per_tick(&self) -> f64 {
        self.granted_per_tick.get()
    }

    /// Broker-written: record the amount granted to this request.
    pub fn set_granted_per_tick(&self, amount: f64) {
        self.granted_per_tick.set(amount);
    }

    /// Whether this report was part of a brokered resource network at the
    /// most recent ledger refresh.
    pub fn is_brokered(&self) -> bool {
        self.brokered.get()
    }

    /// Broker-written: flag the report as brokered or isolated.
    pub fn set_brokered(&self, brokered: bool) {
        self.brokered.set(brokered);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn producer_report_starts_inert() {
        let report = ProducerReport::new(ConverterId::new(), ResourceId::new(1), 10.0);
        assert_eq!(report.offered_per_sec(), 10.0);
        assert_eq!(report.used_per_tick(), 0.0);
        assert!(!report.is_brokered());
    }

    #[test]
    fn producer_results_write_through_shared_handle() {
        let report = std::rc::Rc::new(ProducerReport::new(
            ConverterId::new(),
            ResourceId::new(1),
            10.0,
        ));
        let alias = std::rc::Rc::clone(&report);

        alias.set_used_per_tick(6.5);
        alias.set_brokered(true);

        assert_eq!(report.used_per_tick(), 6.5);
        assert!(report.is_brokered());
    }

    #[test]
    fn consumer_report_carries_optional_flag() {
        let endpoint = ConverterId::new();
        let required = ConsumerReport::new(endpoint, ResourceId::new(2), 4.0, false);
        let optional = ConsumerReport::new(endpoint, ResourceId::new(2), 4.0, true);

        assert!(!required.is_optional());
        assert!(optional.is_optional());
        assert_eq!(required.granted_per_tick(), 0.0);
    }

    #[test]
    fn consumer_results_are_rewritable() {
        let report = ConsumerReport::new(ConverterId::new(), ResourceId::new(3), 8.0, false);
        report.set_granted_per_tick(8.0);
        report.set_granted_per_tick(2.0);
        assert_eq!(report.granted_per_tick(), 2.0);
    }
}
