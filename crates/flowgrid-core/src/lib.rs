//! Net-metered resource flow broker for tick-stepped simulations.
//!
//! Once per simulation tick the [`FlowBroker`] collects the production
//! offers and consumption requests of a population of converters,
//! balances them per resource, and returns to each converter exactly how
//! much it produced and consumed. Required demand is served before any
//! optional demand sees a unit of surplus, shortages are shared
//! proportionally within each class, and nothing carries over between
//! ticks.
//!
//! # Modules
//!
//! - [`broker`] -- The [`FlowBroker`]: ledger lifecycle, per-tick
//!   balancing, result dispatch.
//! - [`converter`] -- The [`ResourceConverter`] adapter between one
//!   host-owned converter and the broker.
//! - [`host`] -- The [`FlowHost`] capability contract and the
//!   [`StaticFlowHost`] stub.
//! - [`audit`] -- Defense-in-depth verification of the ledger's
//!   structural invariants.
//! - [`snapshot`] -- Serializable diagnostic views of the ledger.
//!
//! # Design Principles
//!
//! - Single-threaded and cooperative: a tick runs to completion
//!   synchronously, with no suspension points and no locks.
//! - Non-owning links everywhere the host governs lifetime: a vanished
//!   converter or host is skipped silently, never an error.
//! - Steady-state ticks perform no heap allocation; only a ledger
//!   rebuild may allocate, bounded by the current report count.
//!
//! # Usage
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use flowgrid_core::{FlowBroker, ResourceConverter, StaticFlowHost};
//! use flowgrid_types::ResourceId;
//!
//! let fuel = ResourceId::new(7);
//! let mut broker = FlowBroker::new();
//!
//! // A generator part offering 10 units/s, and an engine needing 5 units/s.
//! let generator = Rc::new(RefCell::new(StaticFlowHost::new().produce(fuel, 10.0)));
//! let engine = Rc::new(RefCell::new(StaticFlowHost::new().consume(fuel, 5.0)));
//!
//! let producer = Rc::new(RefCell::new(ResourceConverter::new()));
//! producer.borrow_mut().initialize(&broker, &generator);
//! assert!(broker.register_converter(&producer));
//!
//! let consumer = Rc::new(RefCell::new(ResourceConverter::new()));
//! consumer.borrow_mut().initialize(&broker, &engine);
//! assert!(broker.register_converter(&consumer));
//!
//! let report = broker.run_converters(1.0);
//! assert!(report.rebuilt);
//! assert_eq!(report.resources_balanced, 1);
//! assert!((engine.borrow().tank_level(fuel) - 5.0).abs() < 1e-6);
//! ```

pub mod audit;
pub mod broker;
pub mod converter;
pub mod host;
pub mod snapshot;

// Re-export primary types at crate root.
pub use audit::{verify_ledger, LedgerViolation};
pub use broker::{FlowBroker, RefreshFlag, TickReport};
pub use converter::ResourceConverter;
pub use host::{FlowHost, StaticFlowHost};
pub use snapshot::{LedgerSnapshot, ResourceSnapshot};
