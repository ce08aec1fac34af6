//! EPS services: independent clients of the event bus.
//!
//! Each service subscribes during registration and is driven by the
//! system tick; none of them knows about any other service. Sensing is
//! behind per-service traits so hosts and tests inject their own
//! sources.

pub mod battery;
pub mod log_router;
pub mod mppt;
pub mod profiles;
pub mod rails;
pub mod uart_link;

pub use battery::{BatteryReading, BatterySensor, BatteryService};
pub use log_router::{LogRouter, LogTransport};
pub use mppt::{MpptController, MpptReading, MpptSensor, NUM_MPPT_CHANNELS};
pub use profiles::{PowerProfile, PowerProfiles};
pub use rails::{RailConfig, RailController, RailReading, RailSensor, RAIL_CONFIGS};
pub use uart_link::{LinkMonitor, UartLink};
