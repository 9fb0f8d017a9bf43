//! Converter adapter: the glue between one host context and the broker.
//!
//! The adapter owns an identity, a scratch [`ReportRegistry`], and a
//! reusable [`ConversionResults`] instance. Everything else it touches is
//! non-owning: the host is a weak link (the game decides when parts die),
//! and the broker is reached only through the shared refresh flag handed
//! over at [`initialize`]. A vanished host is tolerated silently -- the
//! adapter simply stops contributing reports and results.
//!
//! [`initialize`]: ResourceConverter::initialize

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use flowgrid_types::{ConsumerReport, ConversionResults, ConverterId, ProducerReport, ReportRegistry};
use tracing::trace;

use crate::broker::{FlowBroker, RefreshFlag};
use crate::host::FlowHost;

/// Adapter tying one host-owned converter into the broker.
#[derive(Debug)]
pub struct ResourceConverter {
    id: ConverterId,
    host: Option<Weak<RefCell<dyn FlowHost>>>,
    refresh: RefreshFlag,
    registry: ReportRegistry,
    results: ConversionResults,
}

impl ResourceConverter {
    /// Create an adapter with a freshly assigned [`ConverterId`].
    pub fn new() -> Self {
        Self::with_id(ConverterId::new())
    }

    /// Create an adapter with an explicit id (state restoration, tests).
    pub fn with_id(id: ConverterId) -> Self {
        Self {
            id,
            host: None,
            refresh: RefreshFlag::new(),
            registry: ReportRegistry::new(id),
            results: ConversionResults::new(),
        }
    }

    /// This converter's endpoint identity.
    pub const fn id(&self) -> ConverterId {
        self.id
    }

    /// Store the broker link (its refresh flag) and the host link.
    ///
    /// Neither reference is owning: the adapter cannot keep the host or
    /// the broker alive, and tolerates either disappearing.
    pub fn initialize<H: FlowHost + 'static>(
        &mut self,
        broker: &FlowBroker,
        host: &Rc<RefCell<H>>,
    ) {
        let shared: Rc<RefCell<dyn FlowHost>> = host.clone();
        self.host = Some(Rc::downgrade(&shared));
        self.refresh = broker.refresh_flag();
    }

    /// Re-enumerate this converter's reports into the broker's scratch
    /// sequences.
    ///
    /// Called by the broker during a ledger refresh. The registry is
    /// cleared, the host repopulates it, and shared handles to the fresh
    /// records are appended to the provided sequences. A dead host
    /// contributes nothing.
    pub fn register_reports(
        &mut self,
        out_consumers: &mut Vec<Rc<ConsumerReport>>,
        out_producers: &mut Vec<Rc<ProducerReport>>,
    ) {
        self.registry.clear();
        let Some(host) = self.host.as_ref().and_then(Weak::upgrade) else {
            trace!(converter = %self.id, "host gone, registering no reports");
            return;
        };
        host.borrow_mut().register_reports(&mut self.registry);
        out_producers.extend(self.registry.producers().iter().cloned());
        out_consumers.extend(self.registry.consumers().iter().cloned());
    }

    /// Partition this converter's reports into results and deliver them.
    ///
    /// Called by the broker after allocation. The amounts are already in
    /// the report records; this only splits them by brokered flag, stamps
    /// the delta time, and invokes the host callback.
    pub fn on_broker_result(&mut self, delta_time: f64) {
        self.results.clear();
        self.results.set_delta_time(delta_time);
        for report in self.registry.producers() {
            self.results.push_producer(Rc::clone(report));
        }
        for report in self.registry.consumers() {
            self.results.push_consumer(Rc::clone(report));
        }

        let Some(host) = self.host.as_ref().and_then(Weak::upgrade) else {
            trace!(converter = %self.id, "host gone, dropping tick results");
            return;
        };
        host.borrow_mut().on_conversion_result(&self.results);
    }

    /// Whether a ledger rebuild is pending.
    ///
    /// This reads through to the broker's flag; the adapter keeps no
    /// private copy.
    pub fn needs_refresh(&self) -> bool {
        self.refresh.get()
    }

    /// Request (or withdraw a request for) a ledger rebuild at the next
    /// tick. Hosts call this when a converter's behavior changes.
    pub fn set_needs_refresh(&self, value: bool) {
        self.refresh.set(value);
    }

    /// The reports this converter currently has on file.
    pub const fn registry(&self) -> &ReportRegistry {
        &self.registry
    }

    /// The most recently delivered results.
    pub const fn results(&self) -> &ConversionResults {
        &self.results
    }
}

impl Default for ResourceConverter {
    fn default() -> Self {
        Self::new()
    }
}
