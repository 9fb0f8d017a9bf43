//! Host context contract and stub host.
//!
//! The broker never talks to the game directly. Each converter adapter
//! reaches its host through the two-operation [`FlowHost`] capability:
//! describe your resource behavior when asked, and apply broker-decided
//! amounts when a tick completes. The host could be a game part, a
//! scripted fixture, or a perf harness -- the broker cannot tell them
//! apart.
//!
//! [`StaticFlowHost`] is the stub implementation: fixed rates, grants and
//! draws accumulated into per-resource tank levels. It exists so the tick
//! loop can be exercised end-to-end without a game behind it.

use std::collections::BTreeMap;

use flowgrid_types::{ConversionResults, ReportRegistry, ResourceId};

/// The capability a game host implements per converter.
pub trait FlowHost {
    /// Fully describe this converter's current resource behavior.
    ///
    /// Called at most once per ledger refresh. The registry passed in has
    /// already been cleared; the host adds one producer report per offer
    /// and one consumer report per request. Rates must be non-negative
    /// and finite -- the broker's arithmetic does not guard against
    /// contract violations.
    fn register_reports(&mut self, registry: &mut ReportRegistry);

    /// Apply broker-decided amounts to host-side state.
    ///
    /// Called once per tick per converter, after balancing. Brokered
    /// reports carry the metered amounts; unbrokered reports belong to
    /// isolated resources and are the host's own business.
    fn on_conversion_result(&mut self, results: &ConversionResults);
}

/// A single fixed flow declared by a [`StaticFlowHost`].
#[derive(Debug, Clone, Copy, PartialEq)]
struct DeclaredFlow {
    resource_id: ResourceId,
    rate_per_sec: f64,
    optional: bool,
}

/// A stub host with fixed production and consumption rates.
///
/// Granted amounts flow into per-resource tank levels and used amounts
/// drain them, so a test can watch material move without any game state.
/// Rates can be edited between ticks; callers are responsible for setting
/// `needs_refresh` on the converter afterwards, exactly as a real host
/// would be.
#[derive(Debug, Clone, Default)]
pub struct StaticFlowHost {
    productions: Vec<DeclaredFlow>,
    consumptions: Vec<DeclaredFlow>,
    tanks: BTreeMap<ResourceId, f64>,
    ticks_seen: u64,
}

impl StaticFlowHost {
    /// Create a host with no declared flows.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style: declare a production offer.
    #[must_use]
    pub fn produce(mut self, resource_id: ResourceId, rate_per_sec: f64) -> Self {
        self.add_production(resource_id, rate_per_sec);
        self
    }

    /// Builder-style: declare a required consumption request.
    #[must_use]
    pub fn consume(mut self, resource_id: ResourceId, rate_per_sec: f64) -> Self {
        self.add_consumption(resource_id, rate_per_sec, false);
        self
    }

    /// Builder-style: declare a surplus-only consumption request.
    #[must_use]
    pub fn consume_optional(mut self, resource_id: ResourceId, rate_per_sec: f64) -> Self {
        self.add_consumption(resource_id, rate_per_sec, true);
        self
    }

    /// Declare a production offer.
    pub fn add_production(&mut self, resource_id: ResourceId, rate_per_sec: f64) {
        self.productions.push(DeclaredFlow {
            resource_id,
            rate_per_sec,
            optional: false,
        });
    }

    /// Declare a consumption request.
    pub fn add_consumption(&mut self, resource_id: ResourceId, rate_per_sec: f64, optional: bool) {
        self.consumptions.push(DeclaredFlow {
            resource_id,
            rate_per_sec,
            optional,
        });
    }

    /// Drop every declared flow. Tank levels are kept.
    pub fn clear_flows(&mut self) {
        self.productions.clear();
        self.consumptions.clear();
    }

    /// Net accumulated level for `resource_id` (granted minus used).
    pub fn tank_level(&self, resource_id: ResourceId) -> f64 {
        self.tanks.get(&resource_id).copied().unwrap_or(0.0)
    }

    /// Number of result callbacks this host has received.
    pub const fn ticks_seen(&self) -> u64 {
        self.ticks_seen
    }
}

impl FlowHost for StaticFlowHost {
    fn register_reports(&mut self, registry: &mut ReportRegistry) {
        for flow in &self.productions {
            registry.add_producer(flow.resource_id, flow.rate_per_sec);
        }
        for flow in &self.consumptions {
            registry.add_consumer(flow.resource_id, flow.rate_per_sec, flow.optional);
        }
    }

    fn on_conversion_result(&mut self, results: &ConversionResults) {
        self.ticks_seen += 1;
        for report in results.brokered_consumers() {
            *self.tanks.entry(report.resource_id()).or_insert(0.0) += report.granted_per_tick();
        }
        for report in results.brokered_producers() {
            *self.tanks.entry(report.resource_id()).or_insert(0.0) -= report.used_per_tick();
        }
    }
}
