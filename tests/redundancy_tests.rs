//! Redundancy manager behavior, driven entirely through the event bus:
//! health transitions, dedup, clearing, chunked fault-list queries,
//! component status, and telemetry cadence.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{run_ticks, tick, Recorder};
use epsbus::bus::{publish_msg, EventBus, EventSink};
use epsbus::clock::ManualClock;
use epsbus::events::{
    APP_EVENT_REQUEST_REDUNDANCY_CLEAR_ALL, APP_EVENT_REQUEST_REDUNDANCY_CLEAR_FAULT,
    APP_EVENT_REQUEST_REDUNDANCY_COMPONENT_STATUS, APP_EVENT_REQUEST_REDUNDANCY_FAULT_LIST,
    APP_EVENT_REQUEST_REDUNDANCY_HEALTH, BATTERY_EVENT_CRITICAL_LOW, MPPT_EVENT_POWER_LOW,
    RAIL_EVENT_OVERCURRENT, REDUNDANCY_EVENT_COMPONENT_DEGRADED,
    REDUNDANCY_EVENT_COMPONENT_RECOVERED, REDUNDANCY_EVENT_COMPONENT_STATUS_RESPONSE,
    REDUNDANCY_EVENT_CRITICAL_HEALTH, REDUNDANCY_EVENT_FAULT_LIST_RESPONSE,
    REDUNDANCY_EVENT_HEALTH_DEGRADED, REDUNDANCY_EVENT_HEALTH_RECOVERED,
    REDUNDANCY_EVENT_HEALTH_RESPONSE, REDUNDANCY_EVENT_TELEMETRY, UART_EVENT_ERROR_DETECTED,
};
use epsbus::messages::{
    ComponentId, ComponentStatusRequest, ComponentStatusResponse, FaultKey, FaultListResponse,
    FaultSource, HealthResponse, MpptChannelReport, RailFaultReport, RailId, RedundancyTelemetry,
    SystemHealth, UartErrorKind, UartErrorReport, UartPort,
};
use epsbus::redundancy::{RedundancyManager, FAULT_TABLE_CAPACITY};

const REDUNDANCY_OUTPUTS: [epsbus::EventId; 9] = [
    REDUNDANCY_EVENT_CRITICAL_HEALTH,
    REDUNDANCY_EVENT_HEALTH_DEGRADED,
    REDUNDANCY_EVENT_HEALTH_RECOVERED,
    REDUNDANCY_EVENT_COMPONENT_DEGRADED,
    REDUNDANCY_EVENT_COMPONENT_RECOVERED,
    REDUNDANCY_EVENT_HEALTH_RESPONSE,
    REDUNDANCY_EVENT_COMPONENT_STATUS_RESPONSE,
    REDUNDANCY_EVENT_FAULT_LIST_RESPONSE,
    REDUNDANCY_EVENT_TELEMETRY,
];

/// Battery critical-low fault identity as tracked by the manager.
const BATTERY_CRITICAL_CODE: u32 = BATTERY_EVENT_CRITICAL_LOW.opcode() as u32;
/// Radio rail overcurrent: rail index in the upper byte.
const RADIO_OVERCURRENT_CODE: u32 = (RailId::Radio.index() as u32) << 8;

struct Harness {
    bus: EventBus,
    manager: Rc<RefCell<RedundancyManager>>,
    recorder: Rc<RefCell<Recorder>>,
    clock: Rc<ManualClock>,
}

fn setup() -> Harness {
    let mut bus: EventBus = EventBus::new();
    let clock = Rc::new(ManualClock::new());
    let manager = RedundancyManager::register(&mut bus, clock.clone()).unwrap();
    let recorder = Recorder::subscribe(&mut bus, &REDUNDANCY_OUTPUTS);

    // Deliver the startup announce, then forget it.
    bus.drain();
    recorder.borrow_mut().clear();

    Harness {
        bus,
        manager,
        recorder,
        clock,
    }
}

fn publish_battery_critical(bus: &mut EventBus) {
    assert!(bus.publish(BATTERY_EVENT_CRITICAL_LOW, &[]));
    bus.drain();
}

fn publish_rail_overcurrent(bus: &mut EventBus) {
    publish_msg(
        bus,
        RAIL_EVENT_OVERCURRENT,
        &RailFaultReport {
            rail: RailId::Radio,
            voltage_mv: 4900,
            current_ma: 2400,
        },
    );
    bus.drain();
}

fn clear_fault(bus: &mut EventBus, source: FaultSource, code: u32) {
    publish_msg(
        bus,
        APP_EVENT_REQUEST_REDUNDANCY_CLEAR_FAULT,
        &FaultKey { source, code },
    );
    bus.drain();
}

#[test]
fn test_startup_announces_ok() {
    let mut bus: EventBus = EventBus::new();
    let clock = Rc::new(ManualClock::new());
    let manager = RedundancyManager::register(&mut bus, clock).unwrap();
    let recorder = Recorder::subscribe(&mut bus, &REDUNDANCY_OUTPUTS);

    bus.drain();

    assert_eq!(recorder.borrow().count(REDUNDANCY_EVENT_HEALTH_RECOVERED), 1);
    assert_eq!(manager.borrow().health(), SystemHealth::Ok);
    assert_eq!(manager.borrow().active_fault_count(), 0);
}

#[test]
fn test_single_critical_fault_yields_one_transition() {
    let mut h = setup();

    publish_battery_critical(&mut h.bus);

    let recorder = h.recorder.borrow();
    assert_eq!(recorder.count(REDUNDANCY_EVENT_CRITICAL_HEALTH), 1);
    assert_eq!(h.manager.borrow().health(), SystemHealth::Fault);
    assert_eq!(h.manager.borrow().active_fault_count(), 1);
}

#[test]
fn test_duplicate_fault_increments_count_without_retriggering() {
    let mut h = setup();

    publish_battery_critical(&mut h.bus);
    publish_battery_critical(&mut h.bus);

    let manager = h.manager.borrow();
    assert_eq!(manager.active_fault_count(), 1);
    let record = manager.active_faults().next().unwrap();
    assert_eq!(record.count, 2);

    // Health did not change the second time, so no second event.
    assert_eq!(h.recorder.borrow().count(REDUNDANCY_EVENT_CRITICAL_HEALTH), 1);
}

#[test]
fn test_clearing_only_fault_yields_one_recovery() {
    let mut h = setup();

    publish_battery_critical(&mut h.bus);
    clear_fault(&mut h.bus, FaultSource::Battery, BATTERY_CRITICAL_CODE);

    let recorder = h.recorder.borrow();
    assert_eq!(recorder.count(REDUNDANCY_EVENT_HEALTH_RECOVERED), 1);
    assert_eq!(h.manager.borrow().health(), SystemHealth::Ok);
    assert_eq!(h.manager.borrow().active_fault_count(), 0);
}

#[test]
fn test_clearing_unknown_fault_changes_nothing() {
    let mut h = setup();

    publish_battery_critical(&mut h.bus);
    h.recorder.borrow_mut().clear();

    clear_fault(&mut h.bus, FaultSource::Rail, 0xDEAD);

    assert!(h.recorder.borrow().events.is_empty());
    assert_eq!(h.manager.borrow().health(), SystemHealth::Fault);
    assert_eq!(h.manager.borrow().active_fault_count(), 1);
}

#[test]
fn test_no_false_recovery_while_critical_remains() {
    let mut h = setup();

    publish_battery_critical(&mut h.bus);
    publish_rail_overcurrent(&mut h.bus);
    h.recorder.borrow_mut().clear();

    // Clearing the degraded fault must not lift the critical verdict.
    clear_fault(&mut h.bus, FaultSource::Rail, RADIO_OVERCURRENT_CODE);

    assert!(h.recorder.borrow().events.is_empty());
    assert_eq!(h.manager.borrow().health(), SystemHealth::Fault);
    assert_eq!(h.manager.borrow().active_fault_count(), 1);
}

#[test]
fn test_fault_cascade_scenario() {
    let mut h = setup();

    // Battery critical: one transition to FAULT.
    publish_battery_critical(&mut h.bus);
    assert_eq!(h.recorder.borrow().count(REDUNDANCY_EVENT_CRITICAL_HEALTH), 1);
    assert_eq!(h.manager.borrow().active_fault_count(), 1);

    // A second, degraded fault: already FAULT, no new transition.
    publish_rail_overcurrent(&mut h.bus);
    assert_eq!(h.recorder.borrow().count(REDUNDANCY_EVENT_CRITICAL_HEALTH), 1);
    assert_eq!(h.recorder.borrow().count(REDUNDANCY_EVENT_HEALTH_DEGRADED), 0);
    assert_eq!(h.manager.borrow().active_fault_count(), 2);

    // Clearing the battery fault demotes to DEGRADED, not OK.
    clear_fault(&mut h.bus, FaultSource::Battery, BATTERY_CRITICAL_CODE);
    assert_eq!(h.recorder.borrow().count(REDUNDANCY_EVENT_HEALTH_DEGRADED), 1);
    assert_eq!(h.recorder.borrow().count(REDUNDANCY_EVENT_HEALTH_RECOVERED), 0);
    assert_eq!(h.manager.borrow().health(), SystemHealth::Degraded);
    assert_eq!(h.manager.borrow().active_fault_count(), 1);
}

#[test]
fn test_warning_faults_never_raise_health() {
    let mut h = setup();

    publish_msg(&mut h.bus, MPPT_EVENT_POWER_LOW, &MpptChannelReport { channel: 0 });
    h.bus.drain();

    let recorder = h.recorder.borrow();
    assert_eq!(recorder.count(REDUNDANCY_EVENT_CRITICAL_HEALTH), 0);
    assert_eq!(recorder.count(REDUNDANCY_EVENT_HEALTH_DEGRADED), 0);
    assert_eq!(h.manager.borrow().health(), SystemHealth::Ok);
    // Tracked nonetheless, and visible to queries.
    assert_eq!(h.manager.borrow().active_fault_count(), 1);
}

#[test]
fn test_health_query_reports_fresh_state() {
    let mut h = setup();

    h.clock.set(5000);
    publish_battery_critical(&mut h.bus);
    assert!(h.bus.publish(APP_EVENT_REQUEST_REDUNDANCY_HEALTH, &[]));
    h.bus.drain();

    let responses: Vec<HealthResponse> =
        h.recorder.borrow().decoded(REDUNDANCY_EVENT_HEALTH_RESPONSE);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].health, SystemHealth::Fault);
    assert_eq!(responses[0].active_fault_count, 1);
    assert_eq!(responses[0].timestamp_ms, 5000);
}

#[test]
fn test_fault_list_chunking() {
    let mut h = setup();

    // Nine distinct warning faults (one per MPPT channel code).
    for channel in 0..9u8 {
        publish_msg(&mut h.bus, MPPT_EVENT_POWER_LOW, &MpptChannelReport { channel });
        h.bus.drain();
    }
    assert_eq!(h.manager.borrow().active_fault_count(), 9);

    assert!(h.bus.publish(APP_EVENT_REQUEST_REDUNDANCY_FAULT_LIST, &[]));
    h.bus.drain();

    let chunks: Vec<FaultListResponse> = h
        .recorder
        .borrow()
        .decoded(REDUNDANCY_EVENT_FAULT_LIST_RESPONSE);
    assert_eq!(chunks.len(), 3);

    let sizes: Vec<u8> = chunks.iter().map(FaultListResponse::faults_in_chunk).collect();
    assert_eq!(sizes, vec![4, 4, 1]);

    for (index, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.total_faults, 9);
        assert_eq!(chunk.chunk_index, index as u8);
    }
}

#[test]
fn test_empty_fault_list_yields_no_chunks() {
    let mut h = setup();

    assert!(h.bus.publish(APP_EVENT_REQUEST_REDUNDANCY_FAULT_LIST, &[]));
    h.bus.drain();

    assert_eq!(h.recorder.borrow().count(REDUNDANCY_EVENT_FAULT_LIST_RESPONSE), 0);
}

#[test]
fn test_full_table_drops_new_fault_but_keeps_verdict() {
    let mut h = setup();

    for channel in 0..FAULT_TABLE_CAPACITY as u8 {
        publish_msg(&mut h.bus, MPPT_EVENT_POWER_LOW, &MpptChannelReport { channel });
        h.bus.drain();
    }
    assert_eq!(
        h.manager.borrow().active_fault_count(),
        FAULT_TABLE_CAPACITY as u32
    );

    // The seventeenth identity is dropped: no row, no transition.
    publish_battery_critical(&mut h.bus);

    let manager = h.manager.borrow();
    assert_eq!(manager.active_fault_count(), FAULT_TABLE_CAPACITY as u32);
    assert_eq!(manager.dropped_fault_count(), 1);
    assert_eq!(manager.health(), SystemHealth::Ok);
    assert_eq!(h.recorder.borrow().count(REDUNDANCY_EVENT_CRITICAL_HEALTH), 0);
}

#[test]
fn test_uart_fault_degrades_component_once() {
    let mut h = setup();

    let report = UartErrorReport {
        port: UartPort::Primary,
        kind: UartErrorKind::Framing,
    };
    publish_msg(&mut h.bus, UART_EVENT_ERROR_DETECTED, &report);
    h.bus.drain();
    publish_msg(&mut h.bus, UART_EVENT_ERROR_DETECTED, &report);
    h.bus.drain();

    // Repeat errors bump the record, not the notification.
    assert_eq!(h.recorder.borrow().count(REDUNDANCY_EVENT_COMPONENT_DEGRADED), 1);
    assert!(!h.manager.borrow().component_is_ok(ComponentId::UartPrimary));
    assert_eq!(h.manager.borrow().health(), SystemHealth::Degraded);
}

#[test]
fn test_component_status_query() {
    let mut h = setup();

    publish_msg(
        &mut h.bus,
        UART_EVENT_ERROR_DETECTED,
        &UartErrorReport {
            port: UartPort::Primary,
            kind: UartErrorKind::Overrun,
        },
    );
    h.bus.drain();

    publish_msg(
        &mut h.bus,
        APP_EVENT_REQUEST_REDUNDANCY_COMPONENT_STATUS,
        &ComponentStatusRequest {
            component: ComponentId::UartPrimary,
        },
    );
    publish_msg(
        &mut h.bus,
        APP_EVENT_REQUEST_REDUNDANCY_COMPONENT_STATUS,
        &ComponentStatusRequest {
            component: ComponentId::I2cBus1,
        },
    );
    h.bus.drain();

    let responses: Vec<ComponentStatusResponse> = h
        .recorder
        .borrow()
        .decoded(REDUNDANCY_EVENT_COMPONENT_STATUS_RESPONSE);
    assert_eq!(responses.len(), 2);

    assert_eq!(responses[0].component, ComponentId::UartPrimary);
    assert!(!responses[0].is_ok);
    assert_eq!(responses[0].fault_source, Some(FaultSource::Uart));

    assert_eq!(responses[1].component, ComponentId::I2cBus1);
    assert!(responses[1].is_ok);
    assert_eq!(responses[1].fault_source, None);
}

#[test]
fn test_malformed_component_status_request_is_ignored() {
    let mut h = setup();

    assert!(h
        .bus
        .publish(APP_EVENT_REQUEST_REDUNDANCY_COMPONENT_STATUS, &[0xFF, 0xFF]));
    h.bus.drain();

    assert_eq!(
        h.recorder
            .borrow()
            .count(REDUNDANCY_EVENT_COMPONENT_STATUS_RESPONSE),
        0
    );
}

#[test]
fn test_clearing_uart_fault_recovers_component() {
    let mut h = setup();

    publish_msg(
        &mut h.bus,
        UART_EVENT_ERROR_DETECTED,
        &UartErrorReport {
            port: UartPort::Primary,
            kind: UartErrorKind::Framing,
        },
    );
    h.bus.drain();

    // Uart fault identity: port in the upper byte, error kind below.
    clear_fault(&mut h.bus, FaultSource::Uart, 0x0000);

    let recorder = h.recorder.borrow();
    assert_eq!(recorder.count(REDUNDANCY_EVENT_COMPONENT_RECOVERED), 1);
    assert_eq!(recorder.count(REDUNDANCY_EVENT_HEALTH_RECOVERED), 1);
    assert!(h.manager.borrow().component_is_ok(ComponentId::UartPrimary));
}

#[test]
fn test_clear_all_recovers_everything() {
    let mut h = setup();

    publish_battery_critical(&mut h.bus);
    publish_rail_overcurrent(&mut h.bus);
    publish_msg(
        &mut h.bus,
        UART_EVENT_ERROR_DETECTED,
        &UartErrorReport {
            port: UartPort::Secondary,
            kind: UartErrorKind::Noise,
        },
    );
    h.bus.drain();
    h.recorder.borrow_mut().clear();

    assert!(h.bus.publish(APP_EVENT_REQUEST_REDUNDANCY_CLEAR_ALL, &[]));
    h.bus.drain();

    let recorder = h.recorder.borrow();
    assert_eq!(recorder.count(REDUNDANCY_EVENT_HEALTH_RECOVERED), 1);
    assert_eq!(recorder.count(REDUNDANCY_EVENT_COMPONENT_RECOVERED), 1);

    let manager = h.manager.borrow();
    assert_eq!(manager.health(), SystemHealth::Ok);
    assert_eq!(manager.active_fault_count(), 0);
    assert!(manager.component_is_ok(ComponentId::UartSecondary));
}

#[test]
fn test_telemetry_cadence_and_content() {
    let mut h = setup();

    publish_msg(
        &mut h.bus,
        UART_EVENT_ERROR_DETECTED,
        &UartErrorReport {
            port: UartPort::Primary,
            kind: UartErrorKind::Framing,
        },
    );
    h.bus.drain();
    h.clock.set(42_000);

    run_ticks(&mut h.bus, 299);
    assert_eq!(h.recorder.borrow().count(REDUNDANCY_EVENT_TELEMETRY), 0);

    tick(&mut h.bus);
    let snapshots: Vec<RedundancyTelemetry> =
        h.recorder.borrow().decoded(REDUNDANCY_EVENT_TELEMETRY);
    assert_eq!(snapshots.len(), 1);

    let snapshot = snapshots[0];
    assert_eq!(snapshot.health, SystemHealth::Degraded);
    assert_eq!(snapshot.active_fault_count, 1);
    assert_eq!(snapshot.total_faults_since_boot, 1);
    assert_eq!(
        snapshot.degraded_components,
        ComponentId::UartPrimary.mask_bit()
    );
    assert_eq!(snapshot.timestamp_ms, 42_000);
}
