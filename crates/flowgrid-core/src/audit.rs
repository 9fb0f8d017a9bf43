//! Post-tick structural verification of the broker ledger.
//!
//! Every invariant checked here holds by construction after a normal
//! tick; the verifier exists as defense-in-depth against future bugs and
//! as an anchor for the property test suites. It recomputes totals
//! independently from the indexed reports rather than trusting the
//! broker's accumulators, and it never runs on the hot path.
//!
//! The checks, per brokered resource:
//!
//! 1. The network criterion still holds (a producer, a consumer, at
//!    least two distinct endpoints).
//! 2. Every indexed report is flagged brokered.
//! 3. The endpoint set equals the union of endpoints over both report
//!    sequences.
//! 4. Grants across consumers do not exceed production (within
//!    [`TOLERANCE`]).
//! 5. No producer is drawn beyond its offer ceiling (within
//!    [`TOLERANCE`]).

use flowgrid_types::{ConverterId, ResourceId};

use crate::broker::FlowBroker;

/// Absolute tolerance for floating-point comparisons.
pub const TOLERANCE: f64 = 1e-6;

/// A structural invariant violation found in the broker ledger.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerViolation {
    /// A resource survived culling without forming a network.
    #[error(
        "resource {resource_id} is indexed but isolated: \
         {producers} producer(s), {consumers} consumer(s), {endpoints} endpoint(s)"
    )]
    IsolatedResourceRetained {
        /// The offending resource.
        resource_id: ResourceId,
        /// Indexed producer reports.
        producers: usize,
        /// Indexed consumer reports.
        consumers: usize,
        /// Distinct endpoints recorded.
        endpoints: usize,
    },

    /// A report sequence exists for a resource the broker does not track.
    #[error("resource {resource_id} has indexed reports but is not tracked")]
    StrayResourceIndexed {
        /// The offending resource.
        resource_id: ResourceId,
    },

    /// An indexed report was not flagged brokered after the refresh.
    #[error("indexed {role} report for resource {resource_id} from {endpoint_id} is not flagged brokered")]
    UnbrokeredReportIndexed {
        /// The resource the report is filed under.
        resource_id: ResourceId,
        /// The report's owner.
        endpoint_id: ConverterId,
        /// `"producer"` or `"consumer"`.
        role: &'static str,
    },

    /// The endpoint set disagrees with the report sequences.
    #[error("endpoint set for resource {resource_id} is out of step with its report sequences")]
    EndpointSetMismatch {
        /// The offending resource.
        resource_id: ResourceId,
    },

    /// Consumers of a resource were granted more than was produced.
    #[error("resource {resource_id} grants {granted} exceed production {produced}")]
    OverCommittedResource {
        /// The offending resource.
        resource_id: ResourceId,
        /// Sum of grants across its consumer reports.
        granted: f64,
        /// Production for the audited tick.
        produced: f64,
    },

    /// A producer was drawn beyond what it offered for the tick.
    #[error("producer {endpoint_id} used {used} of resource {resource_id}, above its ceiling {ceiling}")]
    OverdrawnProducer {
        /// The report's owner.
        endpoint_id: ConverterId,
        /// The resource being overdrawn.
        resource_id: ResourceId,
        /// Amount recorded as used this tick.
        used: f64,
        /// `offered_per_sec * delta_time` for the audited tick.
        ceiling: f64,
    },
}

/// Verify the ledger's structural invariants for the most recent tick.
///
/// `delta_time` must be the delta time that tick was balanced with; the
/// per-tick amount checks are meaningless against any other value.
///
/// # Errors
///
/// Returns the first violation found, in the order the checks are listed
/// in the module docs.
pub fn verify_ledger(broker: &FlowBroker, delta_time: f64) -> Result<(), LedgerViolation> {
    // Index keys that escaped the known set.
    for &resource_id in broker.producer_index().keys() {
        if !broker.known_resource_ids().contains(&resource_id) {
            return Err(LedgerViolation::StrayResourceIndexed { resource_id });
        }
    }
    for &resource_id in broker.consumer_index().keys() {
        if !broker.known_resource_ids().contains(&resource_id) {
            return Err(LedgerViolation::StrayResourceIndexed { resource_id });
        }
    }

    for &resource_id in broker.known_resource_ids() {
        let producers = broker.producer_index().get(&resource_id);
        let consumers = broker.consumer_index().get(&resource_id);
        let endpoints = broker.endpoint_index().get(&resource_id);

        if !broker.is_networked(resource_id) {
            return Err(LedgerViolation::IsolatedResourceRetained {
                resource_id,
                producers: producers.map_or(0, Vec::len),
                consumers: consumers.map_or(0, Vec::len),
                endpoints: endpoints.map_or(0, std::collections::HashSet::len),
            });
        }

        let mut seen_endpoints = std::collections::HashSet::new();
        let mut produced = 0.0;
        let mut granted = 0.0;

        if let Some(reports) = producers {
            for report in reports {
                if !report.is_brokered() {
                    return Err(LedgerViolation::UnbrokeredReportIndexed {
                        resource_id,
                        endpoint_id: report.endpoint_id(),
                        role: "producer",
                    });
                }
                let ceiling = report.offered_per_sec() * delta_time;
                if report.used_per_tick() > ceiling + TOLERANCE {
                    return Err(LedgerViolation::OverdrawnProducer {
                        endpoint_id: report.endpoint_id(),
                        resource_id,
                        used: report.used_per_tick(),
                        ceiling,
                    });
                }
                produced += ceiling;
                seen_endpoints.insert(report.endpoint_id());
            }
        }

        if let Some(reports) = consumers {
            for report in reports {
                if !report.is_brokered() {
                    return Err(LedgerViolation::UnbrokeredReportIndexed {
                        resource_id,
                        endpoint_id: report.endpoint_id(),
                        role: "consumer",
                    });
                }
                granted += report.granted_per_tick();
                seen_endpoints.insert(report.endpoint_id());
            }
        }

        let endpoints_match = endpoints.is_some_and(|recorded| *recorded == seen_endpoints);
        if !endpoints_match {
            return Err(LedgerViolation::EndpointSetMismatch { resource_id });
        }

        if granted > produced + TOLERANCE {
            return Err(LedgerViolation::OverCommittedResource {
                resource_id,
                granted,
                produced,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use flowgrid_types::ResourceId;

    use crate::broker::FlowBroker;
    use crate::converter::ResourceConverter;
    use crate::host::StaticFlowHost;

    use super::*;

    struct Fixture {
        broker: FlowBroker,
        producer: Rc<RefCell<ResourceConverter>>,
        consumer: Rc<RefCell<ResourceConverter>>,
        _hosts: Vec<Rc<RefCell<StaticFlowHost>>>,
    }

    fn balanced_pair(resource: ResourceId) -> Fixture {
        let mut broker = FlowBroker::new();

        let generator = Rc::new(RefCell::new(StaticFlowHost::new().produce(resource, 10.0)));
        let producer = Rc::new(RefCell::new(ResourceConverter::new()));
        producer.borrow_mut().initialize(&broker, &generator);
        assert!(broker.register_converter(&producer));

        let engine = Rc::new(RefCell::new(StaticFlowHost::new().consume(resource, 5.0)));
        let consumer = Rc::new(RefCell::new(ResourceConverter::new()));
        consumer.borrow_mut().initialize(&broker, &engine);
        assert!(broker.register_converter(&consumer));

        broker.run_converters(1.0);
        Fixture {
            broker,
            producer,
            consumer,
            _hosts: vec![generator, engine],
        }
    }

    #[test]
    fn clean_ledger_passes() {
        let fixture = balanced_pair(ResourceId::new(1));
        assert!(verify_ledger(&fixture.broker, 1.0).is_ok());
    }

    #[test]
    fn empty_broker_passes() {
        let broker = FlowBroker::new();
        assert!(verify_ledger(&broker, 1.0).is_ok());
    }

    #[test]
    fn tampered_brokered_flag_is_caught() {
        let fixture = balanced_pair(ResourceId::new(1));
        fixture.producer.borrow().registry().producers()[0].set_brokered(false);

        let violation = verify_ledger(&fixture.broker, 1.0);
        assert!(matches!(
            violation,
            Err(LedgerViolation::UnbrokeredReportIndexed { role: "producer", .. })
        ));
    }

    #[test]
    fn overdrawn_producer_is_caught() {
        let fixture = balanced_pair(ResourceId::new(1));
        fixture.producer.borrow().registry().producers()[0].set_used_per_tick(99.0);

        let violation = verify_ledger(&fixture.broker, 1.0);
        assert!(matches!(
            violation,
            Err(LedgerViolation::OverdrawnProducer { .. })
        ));
    }

    #[test]
    fn overcommitted_resource_is_caught() {
        let fixture = balanced_pair(ResourceId::new(1));
        fixture.consumer.borrow().registry().consumers()[0].set_granted_per_tick(99.0);

        let violation = verify_ledger(&fixture.broker, 1.0);
        assert!(matches!(
            violation,
            Err(LedgerViolation::OverCommittedResource { .. })
        ));
    }

    #[test]
    fn violation_messages_name_the_resource() {
        let violation = LedgerViolation::StrayResourceIndexed {
            resource_id: ResourceId::new(17),
        };
        assert!(violation.to_string().contains("17"));
    }
}
