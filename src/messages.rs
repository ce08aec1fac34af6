//! Shared vocabulary and event payload types.
//!
//! Every event that carries data uses one of these serde structs,
//! encoded with postcard into the fixed-size event payload. Severity is
//! implied by the event identifier, never carried in a fault payload.

use heapless::Vec;
use serde::{Deserialize, Serialize};

/// Where a fault originated. Part of a fault's identity together with
/// its code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultSource {
    Battery,
    Mppt,
    Rail,
    Uart,
    Sensor,
}

/// Fault severity for health aggregation. Ordering is
/// `Critical > Degraded > Warning > Info`; `Warning` and `Info` are
/// tracked and reported but never raise system health above `Ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FaultSeverity {
    Info,
    Warning,
    Degraded,
    Critical,
}

/// The aggregate system-health verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemHealth {
    Ok,
    Degraded,
    Fault,
}

/// Hardware components tracked for fail-over signaling, independent of
/// the fault table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentId {
    UartPrimary,
    UartSecondary,
    I2cBus1,
    I2cBus2,
    SolarStringA,
    SolarStringB,
}

pub const COMPONENT_COUNT: usize = 6;

impl ComponentId {
    pub const ALL: [ComponentId; COMPONENT_COUNT] = [
        ComponentId::UartPrimary,
        ComponentId::UartSecondary,
        ComponentId::I2cBus1,
        ComponentId::I2cBus2,
        ComponentId::SolarStringA,
        ComponentId::SolarStringB,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    /// Bit position in the degraded-components mask.
    pub const fn mask_bit(self) -> u32 {
        1 << (self as u32)
    }
}

/// The EPS power rails, in hardware order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RailId {
    Obc,
    Radio,
    Gps,
    Payload1,
    Payload2,
    Bus5V,
    Bus3V3,
}

pub const NUM_POWER_RAILS: usize = 7;

impl RailId {
    pub const ALL: [RailId; NUM_POWER_RAILS] = [
        RailId::Obc,
        RailId::Radio,
        RailId::Gps,
        RailId::Payload1,
        RailId::Payload2,
        RailId::Bus5V,
        RailId::Bus3V3,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RailStatus {
    Ok,
    Disabled,
    Overcurrent,
    Undervoltage,
    Overvoltage,
}

/// Physical UART ports available for the ground/OBC link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UartPort {
    Primary,
    Secondary,
}

impl UartPort {
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn component(self) -> ComponentId {
        match self {
            UartPort::Primary => ComponentId::UartPrimary,
            UartPort::Secondary => ComponentId::UartSecondary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UartErrorKind {
    Framing,
    Overrun,
    Parity,
    Noise,
}

// ── Fault and health payloads ────────────────────────────────────────

/// Identity of one fault; payload of the clear-fault request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultKey {
    pub source: FaultSource,
    pub code: u32,
}

/// Payload of the three health-transition events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthChanged {
    pub health: SystemHealth,
}

/// Response to a health query. Both fields are computed fresh from the
/// fault table at query time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub health: SystemHealth,
    pub active_fault_count: u32,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentStatusRequest {
    pub component: ComponentId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentStatusResponse {
    pub component: ComponentId,
    pub is_ok: bool,
    /// Fault source responsible for the degradation, when degraded.
    pub fault_source: Option<FaultSource>,
    pub timestamp_ms: u64,
}

/// Records per fault-list response chunk.
pub const FAULT_LIST_CHUNK_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultEntry {
    pub source: FaultSource,
    pub code: u32,
    pub severity: FaultSeverity,
    pub first_seen_ms: u64,
    pub count: u32,
}

/// One chunk of the streamed fault list. `total_faults` repeats in
/// every chunk; `chunk_index` increases strictly; the final chunk may
/// hold fewer than [`FAULT_LIST_CHUNK_SIZE`] records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultListResponse {
    pub total_faults: u32,
    pub chunk_index: u8,
    pub faults: Vec<FaultEntry, FAULT_LIST_CHUNK_SIZE>,
}

impl FaultListResponse {
    pub fn faults_in_chunk(&self) -> u8 {
        self.faults.len() as u8
    }
}

/// A component went degraded; consumed by fail-over logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDegradation {
    pub component: ComponentId,
    pub fault_source: FaultSource,
    pub fallback_available: bool,
}

/// A previously degraded component is healthy again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRecovery {
    pub component: ComponentId,
}

/// Periodic redundancy-manager snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedundancyTelemetry {
    pub health: SystemHealth,
    pub active_fault_count: u32,
    pub total_faults_since_boot: u32,
    /// Bitmask over [`ComponentId::mask_bit`] of degraded components.
    pub degraded_components: u32,
    pub timestamp_ms: u64,
}

// ── Domain service payloads ──────────────────────────────────────────

/// Battery pack snapshot; payload of every battery event that carries
/// data, including periodic telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatteryStatus {
    pub voltage_mv: u16,
    /// Charge (+) or discharge (-).
    pub current_ma: i16,
    /// Average pack temperature, deci-degrees Celsius.
    pub temperature_dc: i16,
    pub soc_percent: u8,
    pub charging: bool,
    pub protection: bool,
}

/// Payload of rail fault events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RailFaultReport {
    pub rail: RailId,
    pub voltage_mv: u16,
    pub current_ma: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RailTelemetry {
    pub rail: RailId,
    pub voltage_mv: u16,
    pub current_ma: u16,
    pub status: RailStatus,
    pub enabled: bool,
}

/// Payload of rail enable/disable requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RailRequest {
    pub rail: RailId,
}

/// Payload of MPPT channel enable/disable requests and fault events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MpptChannelReport {
    pub channel: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MpptTelemetry {
    pub channel: u8,
    pub input_mv: u16,
    pub output_mv: u16,
    pub power_mw: u32,
    pub enabled: bool,
}

/// Payload of UART error events; the port identifies which physical
/// link failed so the redundancy manager can flag the right component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UartErrorReport {
    pub port: UartPort,
    pub kind: UartErrorKind,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{encode_payload, MAX_EVENT_PAYLOAD};

    #[test]
    fn test_severity_ordering() {
        assert!(FaultSeverity::Critical > FaultSeverity::Degraded);
        assert!(FaultSeverity::Degraded > FaultSeverity::Warning);
        assert!(FaultSeverity::Warning > FaultSeverity::Info);
    }

    #[test]
    fn test_component_mask_bits_are_distinct() {
        let mut mask = 0u32;
        for component in ComponentId::ALL {
            assert_eq!(mask & component.mask_bit(), 0);
            mask |= component.mask_bit();
        }
        assert_eq!(mask.count_ones() as usize, COMPONENT_COUNT);
    }

    #[test]
    fn test_full_fault_list_chunk_fits_event_payload() {
        // Worst-case chunk: every varint field at maximum width.
        let entry = FaultEntry {
            source: FaultSource::Sensor,
            code: u32::MAX,
            severity: FaultSeverity::Critical,
            first_seen_ms: u64::MAX,
            count: u32::MAX,
        };
        let mut faults = Vec::new();
        for _ in 0..FAULT_LIST_CHUNK_SIZE {
            faults.push(entry).unwrap();
        }
        let response = FaultListResponse {
            total_faults: u32::MAX,
            chunk_index: u8::MAX,
            faults,
        };
        let bytes = encode_payload(&response).expect("chunk must fit an event payload");
        assert!(bytes.len() <= MAX_EVENT_PAYLOAD);
    }
}
