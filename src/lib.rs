//! # EPS Event Bus & System Health Core
//!
//! The event-driven runtime of a small-satellite electrical power
//! system: a cooperative publish/subscribe bus coupling every EPS
//! service, and the redundancy manager that fuses their fault reports
//! into one authoritative system-health verdict.
//!
//! ## Features
//!
//! - **Cooperative event bus**: namespaced event ids, fixed-capacity
//!   queue, generation-bounded dispatch, drop-on-full backpressure
//! - **Fault aggregation**: deduplicated active-fault table with
//!   severity-driven `Ok / Degraded / Fault` health derivation
//! - **Query protocol**: health, per-component status, and chunked
//!   fault-list responses over the bus
//! - **Component fail-over signaling**: degradation and recovery
//!   notices consumed by the log transport router
//! - **Embedded-friendly**: no heap allocation in the core data path,
//!   bounded work per dispatch cycle
//!
//! ## Quick Start
//!
//! ```rust
//! use epsbus::bus::{EventBus, EventSink};
//! use epsbus::clock::SystemClock;
//! use epsbus::events::EVENT_SYSTICK;
//! use epsbus::redundancy::RedundancyManager;
//! use std::rc::Rc;
//!
//! let mut bus: EventBus = EventBus::new();
//! let clock = Rc::new(SystemClock::new());
//! let _manager = RedundancyManager::register(&mut bus, clock).unwrap();
//!
//! // The timer glue publishes the tick; everything else follows.
//! bus.publish(EVENT_SYSTICK, &[]);
//! while bus.process() > 0 {}
//! ```
//!
//! ## Architecture
//!
//! - [`bus`] - event dispatcher and handler traits
//! - [`events`] - event identifiers and the event value type
//! - [`messages`] - payload types shared across services
//! - [`redundancy`] - fault table and health state machine
//! - [`services`] - battery, rails, MPPT, UART link, profiles, log
//!   routing
//! - [`policy`] - application-layer power policy client
//! - [`clock`] - millisecond time source

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod bus;
pub mod clock;
pub mod events;
pub mod messages;
pub mod policy;
pub mod redundancy;
pub mod services;

// Re-export the main public types for convenience
pub use bus::{BusError, BusStats, EventBus, EventHandler, EventSink};
pub use events::{Event, EventId};
pub use messages::{ComponentId, FaultSeverity, FaultSource, SystemHealth};
pub use redundancy::RedundancyManager;
