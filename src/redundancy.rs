//! Redundancy manager: fault aggregation and the system-health state
//! machine.
//!
//! The only component authorized to declare system-wide health. It
//! subscribes to every service's fault events, maintains the
//! active-fault table, derives the `Ok / Degraded / Fault` verdict, and
//! republishes health transitions, component degradation notices, query
//! responses, and a periodic telemetry snapshot.
//!
//! Health is derived, never commanded: `Fault` iff any active record is
//! `Critical`, else `Degraded` iff any active record is `Degraded`,
//! else `Ok`. `Warning` and `Info` records are tracked and visible in
//! fault-list queries but never raise health above `Ok`.
//!
//! The read-modify-publish sequence in each fault handler is atomic by
//! construction: handlers run to completion before the bus drains the
//! next event.

use std::cell::RefCell;
use std::rc::Rc;

use heapless::Vec;
use tracing::{error, info, warn};

use crate::bus::{publish_msg, BusError, EventBus, EventHandler, EventSink, HandlerRef};
use crate::clock::Clock;
use crate::events::{
    decode_payload, Event, APP_EVENT_REQUEST_REDUNDANCY_CLEAR_ALL,
    APP_EVENT_REQUEST_REDUNDANCY_CLEAR_FAULT, APP_EVENT_REQUEST_REDUNDANCY_COMPONENT_STATUS,
    APP_EVENT_REQUEST_REDUNDANCY_FAULT_LIST, APP_EVENT_REQUEST_REDUNDANCY_HEALTH,
    BATTERY_EVENT_CRITICAL_LOW, BATTERY_EVENT_FAULT_DETECTED, BATTERY_EVENT_SELF_CHECK_FAILED,
    EVENT_SYSTICK, MPPT_EVENT_FAULT_DETECTED, MPPT_EVENT_POWER_LOW, RAIL_EVENT_OVERCURRENT,
    RAIL_EVENT_OVERVOLTAGE, RAIL_EVENT_UNDERVOLTAGE, REDUNDANCY_EVENT_COMPONENT_DEGRADED,
    REDUNDANCY_EVENT_COMPONENT_RECOVERED, REDUNDANCY_EVENT_COMPONENT_STATUS_RESPONSE,
    REDUNDANCY_EVENT_CRITICAL_HEALTH, REDUNDANCY_EVENT_FAULT_LIST_RESPONSE,
    REDUNDANCY_EVENT_HEALTH_DEGRADED, REDUNDANCY_EVENT_HEALTH_RECOVERED,
    REDUNDANCY_EVENT_HEALTH_RESPONSE, REDUNDANCY_EVENT_TELEMETRY, UART_EVENT_ERROR_DETECTED,
};
use crate::messages::{
    ComponentDegradation, ComponentId, ComponentRecovery, ComponentStatusRequest,
    ComponentStatusResponse, FaultEntry, FaultKey, FaultListResponse, FaultSeverity, FaultSource,
    HealthChanged, HealthResponse, MpptChannelReport, RailFaultReport, RedundancyTelemetry,
    SystemHealth, UartErrorReport, UartPort, COMPONENT_COUNT, FAULT_LIST_CHUNK_SIZE,
};

/// Active-fault table capacity. A table saturated with 16 independent
/// fault identities already implies systemic failure; overflow drops
/// the new fault and logs an error rather than evicting an active one.
pub const FAULT_TABLE_CAPACITY: usize = 16;

/// Telemetry snapshot cadence, in system ticks.
const TELEMETRY_INTERVAL_TICKS: u32 = 300;

/// One tracked fault. Identity is `(source, code)`; repeat reports of
/// the same identity increment `count` instead of creating a new row.
#[derive(Debug, Clone, Copy)]
pub struct FaultRecord {
    pub source: FaultSource,
    pub code: u32,
    pub severity: FaultSeverity,
    pub first_seen_ms: u64,
    pub count: u32,
    pub active: bool,
}

pub struct RedundancyManager {
    faults: Vec<FaultRecord, FAULT_TABLE_CAPACITY>,
    /// Last published health, kept only to detect transitions.
    health: SystemHealth,
    component_ok: [bool; COMPONENT_COUNT],
    total_fault_count: u32,
    dropped_fault_count: u32,
    telemetry_ticks: u32,
    clock: Rc<dyn Clock>,
}

impl RedundancyManager {
    /// Construct the manager, subscribe it to every fault and request
    /// event, and announce the initial `Ok` state so application-layer
    /// observers start from a known verdict.
    pub fn register<const Q: usize, const S: usize>(
        bus: &mut EventBus<Q, S>,
        clock: Rc<dyn Clock>,
    ) -> Result<Rc<RefCell<Self>>, BusError> {
        let manager = Rc::new(RefCell::new(Self::new(clock)));
        let handler: HandlerRef = manager.clone();

        let subscriptions = [
            EVENT_SYSTICK,
            APP_EVENT_REQUEST_REDUNDANCY_HEALTH,
            APP_EVENT_REQUEST_REDUNDANCY_COMPONENT_STATUS,
            APP_EVENT_REQUEST_REDUNDANCY_FAULT_LIST,
            APP_EVENT_REQUEST_REDUNDANCY_CLEAR_FAULT,
            APP_EVENT_REQUEST_REDUNDANCY_CLEAR_ALL,
            BATTERY_EVENT_CRITICAL_LOW,
            BATTERY_EVENT_FAULT_DETECTED,
            BATTERY_EVENT_SELF_CHECK_FAILED,
            MPPT_EVENT_FAULT_DETECTED,
            MPPT_EVENT_POWER_LOW,
            RAIL_EVENT_OVERCURRENT,
            RAIL_EVENT_UNDERVOLTAGE,
            RAIL_EVENT_OVERVOLTAGE,
            UART_EVENT_ERROR_DETECTED,
        ];
        for id in subscriptions {
            bus.subscribe(id, handler.clone())?;
        }

        info!("redundancy manager initialized");
        publish_msg(
            bus,
            REDUNDANCY_EVENT_HEALTH_RECOVERED,
            &HealthChanged {
                health: SystemHealth::Ok,
            },
        );

        Ok(manager)
    }

    fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            faults: Vec::new(),
            health: SystemHealth::Ok,
            component_ok: [true; COMPONENT_COUNT],
            total_fault_count: 0,
            dropped_fault_count: 0,
            telemetry_ticks: 0,
            clock,
        }
    }

    // ── Fault table ──────────────────────────────────────────────────

    /// Add a fault or bump the occurrence count of an existing one.
    /// When the table is full the fault is dropped and logged; no
    /// active record is ever evicted.
    fn add_fault(&mut self, source: FaultSource, code: u32, severity: FaultSeverity) {
        if let Some(existing) = self
            .faults
            .iter_mut()
            .find(|f| f.active && f.source == source && f.code == code)
        {
            existing.count = existing.count.saturating_add(1);
            return;
        }

        let record = FaultRecord {
            source,
            code,
            severity,
            first_seen_ms: self.clock.now_ms(),
            count: 1,
            active: true,
        };

        if let Some(slot) = self.faults.iter_mut().find(|f| !f.active) {
            *slot = record;
            self.total_fault_count += 1;
            return;
        }

        if self.faults.push(record).is_ok() {
            self.total_fault_count += 1;
            return;
        }

        self.dropped_fault_count += 1;
        error!(?source, code, "fault table full, cannot add fault");
    }

    /// Deactivate a fault by identity. Returns `false` when no active
    /// record matches.
    fn remove_fault(&mut self, source: FaultSource, code: u32) -> bool {
        match self
            .faults
            .iter_mut()
            .find(|f| f.active && f.source == source && f.code == code)
        {
            Some(record) => {
                record.active = false;
                true
            }
            None => false,
        }
    }

    /// Derive health from the active records. Any critical record
    /// forces `Fault` and ends the scan early.
    fn evaluate_health(&self) -> SystemHealth {
        let mut has_degraded = false;

        for fault in self.faults.iter().filter(|f| f.active) {
            match fault.severity {
                FaultSeverity::Critical => return SystemHealth::Fault,
                FaultSeverity::Degraded => has_degraded = true,
                FaultSeverity::Warning | FaultSeverity::Info => {}
            }
        }

        if has_degraded {
            SystemHealth::Degraded
        } else {
            SystemHealth::Ok
        }
    }

    fn publish_health_if_changed(&mut self, sink: &mut dyn EventSink) {
        let new_health = self.evaluate_health();
        if new_health == self.health {
            return;
        }
        self.health = new_health;

        let event_id = match new_health {
            SystemHealth::Fault => REDUNDANCY_EVENT_CRITICAL_HEALTH,
            SystemHealth::Degraded => REDUNDANCY_EVENT_HEALTH_DEGRADED,
            SystemHealth::Ok => REDUNDANCY_EVENT_HEALTH_RECOVERED,
        };

        info!(health = ?new_health, "system health changed");
        publish_msg(sink, event_id, &HealthChanged { health: new_health });
    }

    fn report_fault(
        &mut self,
        source: FaultSource,
        code: u32,
        severity: FaultSeverity,
        sink: &mut dyn EventSink,
    ) {
        self.add_fault(source, code, severity);
        self.publish_health_if_changed(sink);
    }

    // ── Component status ─────────────────────────────────────────────

    /// The component a fault degrades, if any. UART faults carry the
    /// port in the upper code byte, MPPT hard faults the channel.
    fn fault_component(source: FaultSource, code: u32) -> Option<ComponentId> {
        match source {
            FaultSource::Uart => match code >> 8 {
                0 => Some(ComponentId::UartPrimary),
                1 => Some(ComponentId::UartSecondary),
                _ => None,
            },
            FaultSource::Mppt if code & 0xFF == MPPT_EVENT_FAULT_DETECTED.opcode() as u32 => {
                match code >> 8 {
                    0 => Some(ComponentId::SolarStringA),
                    1 => Some(ComponentId::SolarStringB),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn degrade_component(
        &mut self,
        component: ComponentId,
        fault_source: FaultSource,
        fallback_available: bool,
        sink: &mut dyn EventSink,
    ) {
        if !self.component_ok[component.index()] {
            return;
        }
        self.component_ok[component.index()] = false;

        warn!(?component, ?fault_source, "component degraded");
        publish_msg(
            sink,
            REDUNDANCY_EVENT_COMPONENT_DEGRADED,
            &ComponentDegradation {
                component,
                fault_source,
                fallback_available,
            },
        );
    }

    fn restore_component(&mut self, component: ComponentId, sink: &mut dyn EventSink) {
        if self.component_ok[component.index()] {
            return;
        }
        self.component_ok[component.index()] = true;

        info!(?component, "component recovered");
        publish_msg(
            sink,
            REDUNDANCY_EVENT_COMPONENT_RECOVERED,
            &ComponentRecovery { component },
        );
    }

    /// Restore `component` unless another active fault still maps to it.
    fn restore_component_if_clear(&mut self, component: ComponentId, sink: &mut dyn EventSink) {
        let still_degraded = self
            .faults
            .iter()
            .filter(|f| f.active)
            .any(|f| Self::fault_component(f.source, f.code) == Some(component));
        if !still_degraded {
            self.restore_component(component, sink);
        }
    }

    // ── Event handlers ───────────────────────────────────────────────

    fn on_tick(&mut self, sink: &mut dyn EventSink) {
        self.telemetry_ticks += 1;
        if self.telemetry_ticks >= TELEMETRY_INTERVAL_TICKS {
            self.telemetry_ticks = 0;
            self.publish_telemetry(sink);
        }
    }

    fn on_battery_fault(&mut self, event: &Event, sink: &mut dyn EventSink) {
        let severity = if event.id == BATTERY_EVENT_FAULT_DETECTED {
            FaultSeverity::Degraded
        } else {
            // Critical-low and a failed self-check both threaten the bus.
            FaultSeverity::Critical
        };
        let code = event.id.opcode() as u32;

        warn!(code, ?severity, "battery fault");
        self.report_fault(FaultSource::Battery, code, severity, sink);
    }

    fn on_mppt_fault(&mut self, event: &Event, sink: &mut dyn EventSink) {
        let Some(report) = decode_payload::<MpptChannelReport>(event) else {
            return;
        };
        let code = (report.channel as u32) << 8 | event.id.opcode() as u32;
        let severity = if event.id == MPPT_EVENT_FAULT_DETECTED {
            FaultSeverity::Degraded
        } else {
            FaultSeverity::Warning
        };

        warn!(channel = report.channel, ?severity, "mppt fault");
        self.report_fault(FaultSource::Mppt, code, severity, sink);

        if event.id == MPPT_EVENT_FAULT_DETECTED {
            if let Some(component) = Self::fault_component(FaultSource::Mppt, code) {
                self.degrade_component(component, FaultSource::Mppt, true, sink);
            }
        }
    }

    fn on_rail_fault(&mut self, event: &Event, sink: &mut dyn EventSink) {
        let Some(report) = decode_payload::<RailFaultReport>(event) else {
            return;
        };
        let code = (report.rail.index() as u32) << 8 | event.id.opcode() as u32;

        warn!(
            rail = ?report.rail,
            voltage_mv = report.voltage_mv,
            current_ma = report.current_ma,
            "rail fault"
        );
        self.report_fault(FaultSource::Rail, code, FaultSeverity::Degraded, sink);
    }

    fn on_uart_fault(&mut self, event: &Event, sink: &mut dyn EventSink) {
        let Some(report) = decode_payload::<UartErrorReport>(event) else {
            return;
        };
        let code = (report.port.index() as u32) << 8 | report.kind as u32;

        warn!(port = ?report.port, kind = ?report.kind, "uart fault");
        self.report_fault(FaultSource::Uart, code, FaultSeverity::Degraded, sink);

        let component = report.port.component();
        let fallback = match report.port {
            UartPort::Primary => self.component_ok[ComponentId::UartSecondary.index()],
            UartPort::Secondary => self.component_ok[ComponentId::UartPrimary.index()],
        };
        self.degrade_component(component, FaultSource::Uart, fallback, sink);
    }

    fn on_health_request(&mut self, sink: &mut dyn EventSink) {
        // Computed fresh from the table, never from the cached verdict.
        let response = HealthResponse {
            health: self.evaluate_health(),
            active_fault_count: self.active_fault_count(),
            timestamp_ms: self.clock.now_ms(),
        };
        publish_msg(sink, REDUNDANCY_EVENT_HEALTH_RESPONSE, &response);
    }

    fn on_component_status_request(&mut self, event: &Event, sink: &mut dyn EventSink) {
        let Some(request) = decode_payload::<ComponentStatusRequest>(event) else {
            return;
        };

        let is_ok = self.component_ok[request.component.index()];
        let fault_source = if is_ok {
            None
        } else {
            self.faults
                .iter()
                .filter(|f| f.active)
                .find(|f| Self::fault_component(f.source, f.code) == Some(request.component))
                .map(|f| f.source)
        };

        let response = ComponentStatusResponse {
            component: request.component,
            is_ok,
            fault_source,
            timestamp_ms: self.clock.now_ms(),
        };
        publish_msg(sink, REDUNDANCY_EVENT_COMPONENT_STATUS_RESPONSE, &response);
    }

    fn on_fault_list_request(&mut self, sink: &mut dyn EventSink) {
        let total_faults = self.active_fault_count();
        let mut response = FaultListResponse {
            total_faults,
            chunk_index: 0,
            faults: Vec::new(),
        };

        for record in self.faults.iter().filter(|f| f.active) {
            let entry = FaultEntry {
                source: record.source,
                code: record.code,
                severity: record.severity,
                first_seen_ms: record.first_seen_ms,
                count: record.count,
            };
            // Capacity equals the chunk size, so the push cannot fail.
            let _ = response.faults.push(entry);

            if response.faults.len() == FAULT_LIST_CHUNK_SIZE {
                publish_msg(sink, REDUNDANCY_EVENT_FAULT_LIST_RESPONSE, &response);
                response.chunk_index += 1;
                response.faults.clear();
            }
        }

        if !response.faults.is_empty() {
            publish_msg(sink, REDUNDANCY_EVENT_FAULT_LIST_RESPONSE, &response);
        }
    }

    fn on_clear_fault_request(&mut self, event: &Event, sink: &mut dyn EventSink) {
        let Some(key) = decode_payload::<FaultKey>(event) else {
            return;
        };

        if !self.remove_fault(key.source, key.code) {
            warn!(
                source = ?key.source,
                code = key.code,
                "clear requested for unknown fault"
            );
            return;
        }

        info!(source = ?key.source, code = key.code, "fault cleared");
        if let Some(component) = Self::fault_component(key.source, key.code) {
            self.restore_component_if_clear(component, sink);
        }
        self.publish_health_if_changed(sink);
    }

    fn on_clear_all_request(&mut self, sink: &mut dyn EventSink) {
        for fault in self.faults.iter_mut() {
            fault.active = false;
        }
        for component in ComponentId::ALL {
            self.restore_component(component, sink);
        }

        warn!("all faults cleared (manual)");
        self.publish_health_if_changed(sink);
    }

    fn publish_telemetry(&mut self, sink: &mut dyn EventSink) {
        let mut degraded_components = 0u32;
        for component in ComponentId::ALL {
            if !self.component_ok[component.index()] {
                degraded_components |= component.mask_bit();
            }
        }

        let snapshot = RedundancyTelemetry {
            health: self.evaluate_health(),
            active_fault_count: self.active_fault_count(),
            total_faults_since_boot: self.total_fault_count,
            degraded_components,
            timestamp_ms: self.clock.now_ms(),
        };
        publish_msg(sink, REDUNDANCY_EVENT_TELEMETRY, &snapshot);
    }

    // ── Introspection ────────────────────────────────────────────────

    /// Current health, derived fresh from the fault table.
    pub fn health(&self) -> SystemHealth {
        self.evaluate_health()
    }

    pub fn active_fault_count(&self) -> u32 {
        self.faults.iter().filter(|f| f.active).count() as u32
    }

    pub fn active_faults(&self) -> impl Iterator<Item = &FaultRecord> {
        self.faults.iter().filter(|f| f.active)
    }

    pub fn total_faults_since_boot(&self) -> u32 {
        self.total_fault_count
    }

    /// Faults dropped because the table was full.
    pub fn dropped_fault_count(&self) -> u32 {
        self.dropped_fault_count
    }

    pub fn component_is_ok(&self, component: ComponentId) -> bool {
        self.component_ok[component.index()]
    }
}

impl EventHandler for RedundancyManager {
    fn handle_event(&mut self, event: &Event, sink: &mut dyn EventSink) {
        match event.id {
            EVENT_SYSTICK => self.on_tick(sink),
            BATTERY_EVENT_CRITICAL_LOW
            | BATTERY_EVENT_FAULT_DETECTED
            | BATTERY_EVENT_SELF_CHECK_FAILED => self.on_battery_fault(event, sink),
            MPPT_EVENT_FAULT_DETECTED | MPPT_EVENT_POWER_LOW => self.on_mppt_fault(event, sink),
            RAIL_EVENT_OVERCURRENT | RAIL_EVENT_UNDERVOLTAGE | RAIL_EVENT_OVERVOLTAGE => {
                self.on_rail_fault(event, sink)
            }
            UART_EVENT_ERROR_DETECTED => self.on_uart_fault(event, sink),
            APP_EVENT_REQUEST_REDUNDANCY_HEALTH => self.on_health_request(sink),
            APP_EVENT_REQUEST_REDUNDANCY_COMPONENT_STATUS => {
                self.on_component_status_request(event, sink)
            }
            APP_EVENT_REQUEST_REDUNDANCY_FAULT_LIST => self.on_fault_list_request(sink),
            APP_EVENT_REQUEST_REDUNDANCY_CLEAR_FAULT => self.on_clear_fault_request(event, sink),
            APP_EVENT_REQUEST_REDUNDANCY_CLEAR_ALL => self.on_clear_all_request(sink),
            _ => {}
        }
    }
}
