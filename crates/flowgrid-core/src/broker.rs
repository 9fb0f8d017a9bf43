//! The flow broker: ledger lifecycle, per-tick balancing, result dispatch.
//!
//! Once per simulation tick the broker walks its ledger in four phases:
//!
//! 1. **Refresh** -- if the ledger is dirty, rebuild it by asking every
//!    live converter to re-register its reports, then cull resources that
//!    fail the network criterion (a producer, a consumer, and at least two
//!    distinct endpoints).
//! 2. **Totals** -- accumulate per-resource produced / required / optional
//!    amounts for this tick's delta time.
//! 3. **Allocation** -- per resource, serve required demand first and
//!    split any surplus across optional demand, proportionally within
//!    each class; write the amounts into the retained report records.
//! 4. **Dispatch** -- hand every live converter its partitioned results.
//!
//! Balancing is memoryless across ticks: unsatisfied demand never accrues.
//! In steady state (no refresh) the whole tick performs no heap
//! allocation -- totals maps and scratch vectors are cleared in place and
//! reuse their capacity; only a rebuild may allocate, bounded by the
//! current report count.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::rc::{Rc, Weak};

use flowgrid_types::{ConsumerReport, ConverterId, ProducerReport, ResourceId};
use tracing::{debug, info, trace};

use crate::converter::ResourceConverter;
use crate::snapshot::{LedgerSnapshot, ResourceSnapshot};

// ---------------------------------------------------------------------------
// Refresh flag
// ---------------------------------------------------------------------------

/// Shared handle to a broker's rebuild-request flag.
///
/// Clones refer to the same flag. The broker hands one to each converter
/// adapter at initialization; any holder may request a rebuild, and the
/// broker clears the flag once the rebuild has run. The handle is the
/// adapter's only link back to the broker, which keeps the
/// host / converter / broker ownership graph acyclic.
#[derive(Debug, Clone, Default)]
pub struct RefreshFlag(Rc<Cell<bool>>);

impl RefreshFlag {
    /// Create a flag that is initially clear.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value.
    pub fn get(&self) -> bool {
        self.0.get()
    }

    /// Set the value. `true` requests a rebuild at the next tick.
    pub fn set(&self, value: bool) {
        self.0.set(value);
    }
}

// ---------------------------------------------------------------------------
// Tick report
// ---------------------------------------------------------------------------

/// Summary of a single [`FlowBroker::run_converters`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    /// Tick number (1-based, counted by the broker).
    pub tick: u64,
    /// The delta time the tick was balanced with.
    pub delta_time: f64,
    /// Whether the ledger was rebuilt at the start of this tick.
    pub rebuilt: bool,
    /// Number of brokered resources that went through allocation.
    pub resources_balanced: usize,
    /// Converters that received results.
    pub converters_dispatched: usize,
    /// Registered slots whose converter no longer resolves.
    pub converters_lost: usize,
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

/// The central coordinator metering resource flow across all converters.
///
/// Converter references are non-owning: the host governs converter
/// lifetime, and the broker tolerates a converter vanishing between ticks
/// by silently skipping its slot.
#[derive(Debug, Default)]
pub struct FlowBroker {
    /// Registered converters, keyed by endpoint id. `BTreeMap` so result
    /// dispatch order is deterministic and stable across ticks.
    converters: BTreeMap<ConverterId, Weak<RefCell<ResourceConverter>>>,

    /// Resources that survived culling at the last refresh.
    known_resource_ids: BTreeSet<ResourceId>,
    /// Distinct converters touching each resource, in either role.
    endpoints_by_resource: HashMap<ResourceId, HashSet<ConverterId>>,
    /// Indexed production offers per resource.
    producer_reports_by_resource: HashMap<ResourceId, Vec<Rc<ProducerReport>>>,
    /// Indexed consumption requests per resource.
    consumer_reports_by_resource: HashMap<ResourceId, Vec<Rc<ConsumerReport>>>,

    /// Per-tick accumulators, cleared in place and rebuilt every tick.
    /// Zero sums are omitted; a missing key reads as zero.
    total_produced: HashMap<ResourceId, f64>,
    total_required: HashMap<ResourceId, f64>,
    total_optional: HashMap<ResourceId, f64>,

    needs_refresh: RefreshFlag,

    /// Scratch sequences reused across refreshes.
    scratch_producers: Vec<Rc<ProducerReport>>,
    scratch_consumers: Vec<Rc<ConsumerReport>>,

    tick: u64,
    last_delta_time: f64,
}

impl FlowBroker {
    /// Create an empty broker with a clean ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// A shared handle to the rebuild-request flag.
    pub fn refresh_flag(&self) -> RefreshFlag {
        self.needs_refresh.clone()
    }

    /// Whether a ledger rebuild is pending for the next tick.
    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh.get()
    }

    /// Request (or withdraw a request for) a ledger rebuild. Any external
    /// actor may set this; the broker clears it after rebuilding.
    pub fn set_needs_refresh(&self, value: bool) {
        self.needs_refresh.set(value);
    }

    /// Ticks run so far.
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Number of registered converter slots (live or not).
    pub fn converter_count(&self) -> usize {
        self.converters.len()
    }

    /// Resources currently part of the brokered network.
    pub fn known_resource_ids(&self) -> &BTreeSet<ResourceId> {
        &self.known_resource_ids
    }

    /// This tick's accumulated production for `resource_id`.
    /// Unknown resources read as zero.
    pub fn total_produced(&self, resource_id: ResourceId) -> f64 {
        self.total_produced.get(&resource_id).copied().unwrap_or(0.0)
    }

    /// This tick's accumulated required demand for `resource_id`.
    /// Unknown resources read as zero.
    pub fn total_required(&self, resource_id: ResourceId) -> f64 {
        self.total_required.get(&resource_id).copied().unwrap_or(0.0)
    }

    /// This tick's accumulated optional demand for `resource_id`.
    /// Unknown resources read as zero.
    pub fn total_optional(&self, resource_id: ResourceId) -> f64 {
        self.total_optional.get(&resource_id).copied().unwrap_or(0.0)
    }

    /// Add a converter to the ledger under its id.
    ///
    /// The converter's reports are installed immediately so the ledger
    /// stays queryable, and a rebuild is requested for the next tick.
    /// Returns `false` (and does nothing) if the id is already
    /// registered.
    pub fn register_converter(&mut self, converter: &Rc<RefCell<ResourceConverter>>) -> bool {
        let id = converter.borrow().id();
        if self.converters.contains_key(&id) {
            debug!(converter = %id, "duplicate registration ignored");
            return false;
        }
        self.converters.insert(id, Rc::downgrade(converter));

        self.scratch_producers.clear();
        self.scratch_consumers.clear();
        converter
            .borrow_mut()
            .register_reports(&mut self.scratch_consumers, &mut self.scratch_producers);
        self.install_scratch_reports();

        self.needs_refresh.set(true);
        info!(converter = %id, "converter registered");
        true
    }

    /// Remove a converter and every report it contributed.
    ///
    /// Reports stripped from the index are flagged unbrokered so the
    /// departing converter still classifies them correctly. Empty
    /// per-resource entries are dropped and a rebuild is requested.
    pub fn unregister_converter(&mut self, id: ConverterId) {
        if self.converters.remove(&id).is_none() {
            return;
        }

        self.producer_reports_by_resource.retain(|_, reports| {
            reports.retain(|report| {
                let keep = report.endpoint_id() != id;
                if !keep {
                    report.set_brokered(false);
                }
                keep
            });
            !reports.is_empty()
        });
        self.consumer_reports_by_resource.retain(|_, reports| {
            reports.retain(|report| {
                let keep = report.endpoint_id() != id;
                if !keep {
                    report.set_brokered(false);
                }
                keep
            });
            !reports.is_empty()
        });
        for endpoints in self.endpoints_by_resource.values_mut() {
            endpoints.remove(&id);
        }
        self.endpoints_by_resource.retain(|_, endpoints| !endpoints.is_empty());

        let producer_index = &self.producer_reports_by_resource;
        let consumer_index = &self.consumer_reports_by_resource;
        self.known_resource_ids.retain(|resource_id| {
            producer_index.contains_key(resource_id) || consumer_index.contains_key(resource_id)
        });

        self.needs_refresh.set(true);
        info!(converter = %id, "converter unregistered");
    }

    /// The tick entry point: refresh if dirty, build totals, allocate per
    /// resource, dispatch results. Returns a summary of the tick.
    ///
    /// `delta_time` must be non-negative; zero is legal and yields zero
    /// transfers while preserving brokered flags.
    pub fn run_converters(&mut self, delta_time: f64) -> TickReport {
        self.tick += 1;
        self.last_delta_time = delta_time;

        let rebuilt = self.needs_refresh.get();
        if rebuilt {
            self.rebuild_ledger();
        }

        self.build_totals(delta_time);

        for &resource_id in &self.known_resource_ids {
            self.allocate(resource_id, delta_time);
        }

        let mut dispatched = 0_usize;
        let mut lost = 0_usize;
        for (id, slot) in &self.converters {
            match slot.upgrade() {
                Some(converter) => {
                    converter.borrow_mut().on_broker_result(delta_time);
                    dispatched += 1;
                }
                None => {
                    trace!(converter = %id, "skipping dead converter slot");
                    lost += 1;
                }
            }
        }

        debug!(
            tick = self.tick,
            delta_time,
            rebuilt,
            resources = self.known_resource_ids.len(),
            dispatched,
            lost,
            "tick balanced"
        );

        TickReport {
            tick: self.tick,
            delta_time,
            rebuilt,
            resources_balanced: self.known_resource_ids.len(),
            converters_dispatched: dispatched,
            converters_lost: lost,
        }
    }

    /// Accumulate per-resource totals for this tick.
    ///
    /// Previous totals are cleared first. Offers sum into the produced
    /// total, requests into the required or optional total according to
    /// their flag. Zero sums are omitted from the maps.
    pub fn build_totals(&mut self, delta_time: f64) {
        self.total_produced.clear();
        self.total_required.clear();
        self.total_optional.clear();

        for (&resource_id, reports) in &self.producer_reports_by_resource {
            let mut produced = 0.0;
            for report in reports {
                produced += report.offered_per_sec() * delta_time;
            }
            if produced > 0.0 {
                self.total_produced.insert(resource_id, produced);
            }
        }

        for (&resource_id, reports) in &self.consumer_reports_by_resource {
            let mut required = 0.0;
            let mut optional = 0.0;
            for report in reports {
                let requested = report.requested_per_sec() * delta_time;
                if report.is_optional() {
                    optional += requested;
                } else {
                    required += requested;
                }
            }
            if required > 0.0 {
                self.total_required.insert(resource_id, required);
            }
            if optional > 0.0 {
                self.total_optional.insert(resource_id, optional);
            }
        }
    }

    /// Full ledger rebuild from the current converter set.
    ///
    /// Every live converter re-registers its reports, isolated resources
    /// are culled (their reports flagged unbrokered before the sequences
    /// are discarded), and every surviving report is flagged brokered.
    fn rebuild_ledger(&mut self) {
        self.known_resource_ids.clear();
        self.endpoints_by_resource.clear();
        self.producer_reports_by_resource.clear();
        self.consumer_reports_by_resource.clear();

        self.scratch_producers.clear();
        self.scratch_consumers.clear();
        for (id, slot) in &self.converters {
            let Some(converter) = slot.upgrade() else {
                trace!(converter = %id, "skipping dead converter during rebuild");
                continue;
            };
            converter
                .borrow_mut()
                .register_reports(&mut self.scratch_consumers, &mut self.scratch_producers);
        }
        self.install_scratch_reports();

        self.cull_isolated_resources();

        for reports in self.producer_reports_by_resource.values() {
            for report in reports {
                report.set_brokered(true);
            }
        }
        for reports in self.consumer_reports_by_resource.values() {
            for report in reports {
                report.set_brokered(true);
            }
        }

        self.needs_refresh.set(false);
        debug!(
            resources = self.known_resource_ids.len(),
            converters = self.converters.len(),
            "ledger rebuilt"
        );
    }

    /// Move scratch reports into the per-resource index, tracking
    /// endpoints and known resources along the way.
    fn install_scratch_reports(&mut self) {
        for report in self.scratch_producers.drain(..) {
            let resource_id = report.resource_id();
            self.known_resource_ids.insert(resource_id);
            self.endpoints_by_resource
                .entry(resource_id)
                .or_default()
                .insert(report.endpoint_id());
            self.producer_reports_by_resource
                .entry(resource_id)
                .or_default()
                .push(report);
        }
        for report in self.scratch_consumers.drain(..) {
            let resource_id = report.resource_id();
            self.known_resource_ids.insert(resource_id);
            self.endpoints_by_resource
                .entry(resource_id)
                .or_default()
                .insert(report.endpoint_id());
            self.consumer_reports_by_resource
                .entry(resource_id)
                .or_default()
                .push(report);
        }
    }

    /// Drop every resource that fails the network criterion.
    ///
    /// A resource is brokered only when it has at least one producer, at
    /// least one consumer, and at least two distinct endpoints -- a single
    /// converter both producing and consuming the same resource alone is
    /// not a network. Dropped reports are flagged unbrokered first so the
    /// owning converter still classifies them correctly.
    fn cull_isolated_resources(&mut self) {
        let culled: Vec<ResourceId> = self
            .known_resource_ids
            .iter()
            .copied()
            .filter(|&resource_id| !self.is_networked(resource_id))
            .collect();

        for resource_id in culled {
            if let Some(reports) = self.producer_reports_by_resource.remove(&resource_id) {
                for report in &reports {
                    report.set_brokered(false);
                }
            }
            if let Some(reports) = self.consumer_reports_by_resource.remove(&resource_id) {
                for report in &reports {
                    report.set_brokered(false);
                }
            }
            self.endpoints_by_resource.remove(&resource_id);
            self.known_resource_ids.remove(&resource_id);
            debug!(resource = %resource_id, "culled isolated resource");
        }
    }

    /// The network criterion for a single resource.
    pub(crate) fn is_networked(&self, resource_id: ResourceId) -> bool {
        let producers = self
            .producer_reports_by_resource
            .get(&resource_id)
            .map_or(0, Vec::len);
        let consumers = self
            .consumer_reports_by_resource
            .get(&resource_id)
            .map_or(0, Vec::len);
        let endpoints = self
            .endpoints_by_resource
            .get(&resource_id)
            .map_or(0, HashSet::len);
        producers > 0 && consumers > 0 && endpoints >= 2
    }

    /// Balance one resource for this tick, writing results into the
    /// retained report records.
    ///
    /// Required demand is served before any optional demand sees a unit
    /// of surplus; within each class the split is proportional to the
    /// declared rates, so there are no ordering effects.
    fn allocate(&self, resource_id: ResourceId, delta_time: f64) {
        let produced = self.total_produced(resource_id);
        let required = self.total_required(resource_id);
        let optional = self.total_optional(resource_id);

        let surplus = (produced - required).max(0.0);
        let optional_granted_total = optional.min(surplus);
        let satisfaction_ratio = if required <= 0.0 {
            1.0
        } else {
            (produced / required).min(1.0)
        };
        let optional_satisfaction_ratio = if optional > 0.0 {
            optional_granted_total / optional
        } else {
            0.0
        };

        if let Some(reports) = self.consumer_reports_by_resource.get(&resource_id) {
            for report in reports {
                let requested = report.requested_per_sec() * delta_time;
                let ratio = if report.is_optional() {
                    optional_satisfaction_ratio
                } else {
                    satisfaction_ratio
                };
                report.set_granted_per_tick(requested * ratio);
            }
        }

        let required_served = required * satisfaction_ratio;
        let total_used = required_served + optional_granted_total;
        let usage_ratio = if produced > 0.0 {
            total_used / produced
        } else {
            0.0
        };
        if let Some(reports) = self.producer_reports_by_resource.get(&resource_id) {
            for report in reports {
                report.set_used_per_tick(report.offered_per_sec() * delta_time * usage_ratio);
            }
        }
    }

    /// Produce a serializable diagnostic view of the ledger.
    pub fn snapshot(&self) -> LedgerSnapshot {
        let mut resources = BTreeMap::new();
        for &resource_id in &self.known_resource_ids {
            let mut endpoint_ids: Vec<ConverterId> = self
                .endpoints_by_resource
                .get(&resource_id)
                .map(|endpoints| endpoints.iter().copied().collect())
                .unwrap_or_default();
            endpoint_ids.sort_unstable();

            resources.insert(
                resource_id,
                ResourceSnapshot {
                    endpoint_ids,
                    producer_reports: self
                        .producer_reports_by_resource
                        .get(&resource_id)
                        .map_or(0, Vec::len),
                    consumer_reports: self
                        .consumer_reports_by_resource
                        .get(&resource_id)
                        .map_or(0, Vec::len),
                    total_produced: self.total_produced(resource_id),
                    total_required: self.total_required(resource_id),
                    total_optional: self.total_optional(resource_id),
                },
            );
        }
        LedgerSnapshot {
            tick: self.tick,
            needs_refresh: self.needs_refresh.get(),
            resources,
        }
    }

    /// Verify the ledger's structural invariants (see [`crate::audit`]).
    ///
    /// # Errors
    ///
    /// Returns the first [`crate::audit::LedgerViolation`] found.
    pub fn audit(&self) -> Result<(), crate::audit::LedgerViolation> {
        crate::audit::verify_ledger(self, self.last_delta_time)
    }

    pub(crate) fn producer_index(&self) -> &HashMap<ResourceId, Vec<Rc<ProducerReport>>> {
        &self.producer_reports_by_resource
    }

    pub(crate) fn consumer_index(&self) -> &HashMap<ResourceId, Vec<Rc<ConsumerReport>>> {
        &self.consumer_reports_by_resource
    }

    pub(crate) fn endpoint_index(&self) -> &HashMap<ResourceId, HashSet<ConverterId>> {
        &self.endpoints_by_resource
    }
}
