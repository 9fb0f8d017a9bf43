//! Serializable diagnostic views of the broker ledger.

use std::collections::BTreeMap;

use flowgrid_types::{ConverterId, ResourceId};
use serde::{Deserialize, Serialize};

/// The ledger's shape for a single resource.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    /// Distinct converters touching the resource, sorted.
    pub endpoint_ids: Vec<ConverterId>,
    /// Number of indexed production offers.
    pub producer_reports: usize,
    /// Number of indexed consumption requests.
    pub consumer_reports: usize,
    /// Accumulated production for the most recent tick.
    pub total_produced: f64,
    /// Accumulated required demand for the most recent tick.
    pub total_required: f64,
    /// Accumulated optional demand for the most recent tick.
    pub total_optional: f64,
}

/// A point-in-time diagnostic view of the whole ledger.
///
/// Assembled on demand by [`FlowBroker::snapshot`]; nothing in the broker
/// is derived from it.
///
/// [`FlowBroker::snapshot`]: crate::broker::FlowBroker::snapshot
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    /// Ticks run so far.
    pub tick: u64,
    /// Whether a rebuild is pending.
    pub needs_refresh: bool,
    /// Per-resource shape, keyed by resource id.
    pub resources: BTreeMap<ResourceId, ResourceSnapshot>,
}
