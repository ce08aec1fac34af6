//! Event identifiers and the event value type.
//!
//! Every event on the bus is identified by a 32-bit id composed of a
//! 16-bit service UID and a 16-bit opcode local to that service.
//! Namespacing lets each service enumerate its opcodes from zero without
//! coordinating with any other service; the opcode is recoverable with
//! [`EventId::opcode`].
//!
//! Identifiers are fixed at build time. Payloads are size-bounded byte
//! buffers; typed payloads are encoded with postcard via
//! [`encode_payload`] / [`decode_payload`].

use heapless::Vec;
use serde::de::DeserializeOwned;
use serde::Serialize;
use static_assertions::const_assert;

/// Maximum payload size of a single event, in bytes.
///
/// Sized to hold the largest response payload (a four-record fault-list
/// chunk) with headroom. Publishing a larger payload is a programming
/// error and is rejected, never truncated.
pub const MAX_EVENT_PAYLOAD: usize = 128;

const_assert!(MAX_EVENT_PAYLOAD >= 96);

/// A namespaced event identifier: `service UID << 16 | opcode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(u32);

impl EventId {
    pub const fn new(service: u16, opcode: u16) -> Self {
        Self(((service as u32) << 16) | opcode as u32)
    }

    /// The owning service's UID.
    pub const fn service(self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// The service-local opcode.
    pub const fn opcode(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for EventId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

// Service UIDs. One per publishing service; request events from the
// application layer share a single UID.
pub const CORE_SERVICE_UID: u16 = 0x0010;
pub const BATTERY_SERVICE_UID: u16 = 0x0020;
pub const MPPT_SERVICE_UID: u16 = 0x0030;
pub const RAIL_SERVICE_UID: u16 = 0x0040;
pub const UART_SERVICE_UID: u16 = 0x0050;
pub const REDUNDANCY_SERVICE_UID: u16 = 0x0060;
pub const APP_SERVICE_UID: u16 = 0x0A00;

/// The periodic system tick. Published by the timer glue at a fixed
/// nominal rate (100 Hz in the simulator); every periodic behavior in
/// the system is prescaled from this single event.
pub const EVENT_SYSTICK: EventId = EventId::new(CORE_SERVICE_UID, 0x00);

// Battery service events.
pub const BATTERY_EVENT_SELF_CHECK_PASSED: EventId = EventId::new(BATTERY_SERVICE_UID, 0x00);
pub const BATTERY_EVENT_SELF_CHECK_FAILED: EventId = EventId::new(BATTERY_SERVICE_UID, 0x01);
pub const BATTERY_EVENT_CRITICAL_LOW: EventId = EventId::new(BATTERY_SERVICE_UID, 0x02);
pub const BATTERY_EVENT_FAULT_DETECTED: EventId = EventId::new(BATTERY_SERVICE_UID, 0x03);
pub const BATTERY_EVENT_CHARGING_CHANGE: EventId = EventId::new(BATTERY_SERVICE_UID, 0x04);
pub const BATTERY_EVENT_FULLY_CHARGED: EventId = EventId::new(BATTERY_SERVICE_UID, 0x05);
pub const BATTERY_EVENT_TELEMETRY: EventId = EventId::new(BATTERY_SERVICE_UID, 0x06);

// MPPT controller events.
pub const MPPT_EVENT_FAULT_DETECTED: EventId = EventId::new(MPPT_SERVICE_UID, 0x00);
pub const MPPT_EVENT_POWER_LOW: EventId = EventId::new(MPPT_SERVICE_UID, 0x01);
pub const MPPT_EVENT_TELEMETRY: EventId = EventId::new(MPPT_SERVICE_UID, 0x02);

// Rail controller events.
pub const RAIL_EVENT_OVERCURRENT: EventId = EventId::new(RAIL_SERVICE_UID, 0x00);
pub const RAIL_EVENT_UNDERVOLTAGE: EventId = EventId::new(RAIL_SERVICE_UID, 0x01);
pub const RAIL_EVENT_OVERVOLTAGE: EventId = EventId::new(RAIL_SERVICE_UID, 0x02);
pub const RAIL_EVENT_TELEMETRY: EventId = EventId::new(RAIL_SERVICE_UID, 0x03);

// UART link events.
pub const UART_EVENT_ERROR_DETECTED: EventId = EventId::new(UART_SERVICE_UID, 0x00);

// Redundancy manager events.
pub const REDUNDANCY_EVENT_CRITICAL_HEALTH: EventId = EventId::new(REDUNDANCY_SERVICE_UID, 0x00);
pub const REDUNDANCY_EVENT_HEALTH_DEGRADED: EventId = EventId::new(REDUNDANCY_SERVICE_UID, 0x01);
pub const REDUNDANCY_EVENT_HEALTH_RECOVERED: EventId = EventId::new(REDUNDANCY_SERVICE_UID, 0x02);
pub const REDUNDANCY_EVENT_COMPONENT_DEGRADED: EventId = EventId::new(REDUNDANCY_SERVICE_UID, 0x03);
pub const REDUNDANCY_EVENT_COMPONENT_RECOVERED: EventId = EventId::new(REDUNDANCY_SERVICE_UID, 0x04);
pub const REDUNDANCY_EVENT_HEALTH_RESPONSE: EventId = EventId::new(REDUNDANCY_SERVICE_UID, 0x05);
pub const REDUNDANCY_EVENT_COMPONENT_STATUS_RESPONSE: EventId =
    EventId::new(REDUNDANCY_SERVICE_UID, 0x06);
pub const REDUNDANCY_EVENT_FAULT_LIST_RESPONSE: EventId = EventId::new(REDUNDANCY_SERVICE_UID, 0x07);
pub const REDUNDANCY_EVENT_TELEMETRY: EventId = EventId::new(REDUNDANCY_SERVICE_UID, 0x08);

// Application-layer request events.
pub const APP_EVENT_REQUEST_POWER_PROFILE_NOMINAL: EventId = EventId::new(APP_SERVICE_UID, 0x10);
pub const APP_EVENT_REQUEST_POWER_PROFILE_SAFE: EventId = EventId::new(APP_SERVICE_UID, 0x11);
pub const APP_EVENT_REQUEST_MPPT_ENABLE_CHANNEL: EventId = EventId::new(APP_SERVICE_UID, 0x12);
pub const APP_EVENT_REQUEST_MPPT_DISABLE_CHANNEL: EventId = EventId::new(APP_SERVICE_UID, 0x13);
pub const APP_EVENT_REQUEST_RAIL_ENABLE: EventId = EventId::new(APP_SERVICE_UID, 0x14);
pub const APP_EVENT_REQUEST_RAIL_DISABLE: EventId = EventId::new(APP_SERVICE_UID, 0x15);
pub const APP_EVENT_REQUEST_LOGGING_FLUSH: EventId = EventId::new(APP_SERVICE_UID, 0x16);
pub const APP_EVENT_REQUEST_REDUNDANCY_HEALTH: EventId = EventId::new(APP_SERVICE_UID, 0x17);
pub const APP_EVENT_REQUEST_REDUNDANCY_COMPONENT_STATUS: EventId =
    EventId::new(APP_SERVICE_UID, 0x18);
pub const APP_EVENT_REQUEST_REDUNDANCY_FAULT_LIST: EventId = EventId::new(APP_SERVICE_UID, 0x19);
pub const APP_EVENT_REQUEST_REDUNDANCY_CLEAR_FAULT: EventId = EventId::new(APP_SERVICE_UID, 0x1A);
pub const APP_EVENT_REQUEST_REDUNDANCY_CLEAR_ALL: EventId = EventId::new(APP_SERVICE_UID, 0x1B);

/// An event: identifier plus a size-bounded payload.
///
/// Events are value types. `publish` copies the payload into the queue;
/// the publisher may reuse its buffer immediately after the call.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: EventId,
    pub payload: Vec<u8, MAX_EVENT_PAYLOAD>,
}

impl Event {
    /// An event with no payload.
    pub fn new(id: EventId) -> Self {
        Self {
            id,
            payload: Vec::new(),
        }
    }

    /// An event carrying a copy of `bytes`. Returns `None` when the
    /// payload exceeds [`MAX_EVENT_PAYLOAD`].
    pub fn with_payload(id: EventId, bytes: &[u8]) -> Option<Self> {
        let payload = Vec::from_slice(bytes).ok()?;
        Some(Self { id, payload })
    }
}

/// Encode a typed payload into an event-sized byte buffer.
///
/// Returns `None` when the encoded form would exceed
/// [`MAX_EVENT_PAYLOAD`].
pub fn encode_payload<T: Serialize>(value: &T) -> Option<Vec<u8, MAX_EVENT_PAYLOAD>> {
    let mut buf = [0u8; MAX_EVENT_PAYLOAD];
    let used = postcard::to_slice(value, &mut buf).ok()?.len();
    Vec::from_slice(&buf[..used]).ok()
}

/// Decode a typed payload from an event.
///
/// Returns `None` for malformed or wrong-typed payloads; request
/// handlers ignore such events without responding.
pub fn decode_payload<T: DeserializeOwned>(event: &Event) -> Option<T> {
    postcard::from_bytes(&event.payload).ok()
}
