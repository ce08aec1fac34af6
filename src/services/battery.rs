//! Battery management service.
//!
//! Reads the pack through an injected [`BatterySensor`] on a prescaled
//! tick, latches protect mode below the critical voltage threshold, and
//! publishes battery events plus periodic telemetry. The charging
//! hardware itself is outside this service; it only tracks and
//! publishes the commanded state.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{info, warn};

use crate::bus::{publish_msg, BusError, EventBus, EventHandler, EventSink, HandlerRef};
use crate::events::{
    Event, BATTERY_EVENT_CHARGING_CHANGE, BATTERY_EVENT_CRITICAL_LOW, BATTERY_EVENT_FAULT_DETECTED,
    BATTERY_EVENT_FULLY_CHARGED, BATTERY_EVENT_SELF_CHECK_FAILED, BATTERY_EVENT_SELF_CHECK_PASSED,
    BATTERY_EVENT_TELEMETRY, EVENT_SYSTICK,
};
use crate::messages::BatteryStatus;

/// Battery logic runs every N system ticks (10 Hz at a 100 Hz tick).
const UPDATE_INTERVAL_TICKS: u32 = 10;
/// Telemetry snapshot every N update cycles.
const TELEMETRY_INTERVAL_CYCLES: u32 = 600;

const CRITICAL_VOLTAGE_MV: u16 = 3300;
/// Protect mode releases above critical + hysteresis.
const RECOVERY_HYSTERESIS_MV: u16 = 200;
const FULL_VOLTAGE_MV: u16 = 4150;

/// Plausibility window for the power-on self check.
const SELF_CHECK_MIN_MV: u16 = 2500;
const SELF_CHECK_MAX_MV: u16 = 4500;

/// Voltage window used for the coarse state-of-charge estimate.
const SOC_EMPTY_MV: u16 = 3000;
const SOC_FULL_MV: u16 = 4200;

#[derive(Debug, Clone, Copy)]
pub struct BatteryReading {
    pub voltage_mv: u16,
    pub current_ma: i16,
    pub temperature_dc: i16,
}

/// Pack measurement source. Flight builds wire this to the fuel-gauge
/// driver; tests and the simulator inject scripted readings.
pub trait BatterySensor {
    fn read(&mut self) -> BatteryReading;
}

pub struct BatteryService {
    status: BatteryStatus,
    sensor: Box<dyn BatterySensor>,
    tick_counter: u32,
    telemetry_cycles: u32,
    reported_full: bool,
    initialized: bool,
}

impl BatteryService {
    /// Run the power-on self check, publish its outcome, and subscribe
    /// to the system tick. A failed self check leaves the service inert
    /// (and the self-check event lets the redundancy manager track it).
    pub fn register<const Q: usize, const S: usize>(
        bus: &mut EventBus<Q, S>,
        sensor: Box<dyn BatterySensor>,
    ) -> Result<Rc<RefCell<Self>>, BusError> {
        let mut service = Self {
            status: BatteryStatus {
                voltage_mv: 0,
                current_ma: 0,
                temperature_dc: 0,
                soc_percent: 0,
                charging: false,
                protection: false,
            },
            sensor,
            tick_counter: 0,
            telemetry_cycles: 0,
            reported_full: false,
            initialized: false,
        };

        let healthy = service.run_diagnostics();
        service.initialized = healthy;

        if healthy {
            info!("battery self check passed");
            publish_msg(bus, BATTERY_EVENT_SELF_CHECK_PASSED, &service.status);
        } else {
            warn!(
                voltage_mv = service.status.voltage_mv,
                "battery self check failed"
            );
            publish_msg(bus, BATTERY_EVENT_SELF_CHECK_FAILED, &service.status);
        }

        let service = Rc::new(RefCell::new(service));
        let handler: HandlerRef = service.clone();
        bus.subscribe(EVENT_SYSTICK, handler)?;

        Ok(service)
    }

    fn run_diagnostics(&mut self) -> bool {
        let reading = self.sensor.read();
        self.apply_reading(reading);
        (SELF_CHECK_MIN_MV..=SELF_CHECK_MAX_MV).contains(&reading.voltage_mv)
    }

    fn apply_reading(&mut self, reading: BatteryReading) {
        self.status.voltage_mv = reading.voltage_mv;
        self.status.current_ma = reading.current_ma;
        self.status.temperature_dc = reading.temperature_dc;
        self.status.soc_percent = soc_from_voltage(reading.voltage_mv);
        self.status.charging = !self.status.protection && reading.current_ma > 0;
    }

    fn perform_update(&mut self, sink: &mut dyn EventSink) {
        let reading = self.sensor.read();
        self.apply_reading(reading);

        if self.status.voltage_mv < CRITICAL_VOLTAGE_MV && !self.status.protection {
            self.enter_protect_mode(sink);
        } else if self.status.protection
            && self.status.voltage_mv >= CRITICAL_VOLTAGE_MV + RECOVERY_HYSTERESIS_MV
        {
            self.status.protection = false;
            info!(
                voltage_mv = self.status.voltage_mv,
                "battery protect mode released"
            );
            publish_msg(sink, BATTERY_EVENT_CHARGING_CHANGE, &self.status);
        }

        if self.status.voltage_mv >= FULL_VOLTAGE_MV && !self.status.protection {
            if !self.reported_full {
                self.reported_full = true;
                publish_msg(sink, BATTERY_EVENT_FULLY_CHARGED, &self.status);
            }
        } else {
            self.reported_full = false;
        }

        self.telemetry_cycles += 1;
        if self.telemetry_cycles >= TELEMETRY_INTERVAL_CYCLES {
            self.telemetry_cycles = 0;
            publish_msg(sink, BATTERY_EVENT_TELEMETRY, &self.status);
        }
    }

    /// Latch protect mode: stop charging, report the pack fault, then
    /// the critical-low condition. The latch only releases after the
    /// voltage recovers past the hysteresis band.
    fn enter_protect_mode(&mut self, sink: &mut dyn EventSink) {
        self.status.protection = true;
        let was_charging = self.status.charging;
        self.status.charging = false;

        warn!(
            voltage_mv = self.status.voltage_mv,
            "battery critical low, entering protect mode"
        );

        if was_charging {
            publish_msg(sink, BATTERY_EVENT_CHARGING_CHANGE, &self.status);
        }
        publish_msg(sink, BATTERY_EVENT_FAULT_DETECTED, &self.status);
        publish_msg(sink, BATTERY_EVENT_CRITICAL_LOW, &self.status);
    }

    pub fn status(&self) -> BatteryStatus {
        self.status
    }

    pub fn in_protect_mode(&self) -> bool {
        self.status.protection
    }
}

fn soc_from_voltage(voltage_mv: u16) -> u8 {
    let clamped = voltage_mv.clamp(SOC_EMPTY_MV, SOC_FULL_MV);
    let range = (SOC_FULL_MV - SOC_EMPTY_MV) as u32;
    (((clamped - SOC_EMPTY_MV) as u32 * 100) / range) as u8
}

impl EventHandler for BatteryService {
    fn handle_event(&mut self, event: &Event, sink: &mut dyn EventSink) {
        if event.id != EVENT_SYSTICK || !self.initialized {
            return;
        }

        self.tick_counter += 1;
        if self.tick_counter >= UPDATE_INTERVAL_TICKS {
            self.tick_counter = 0;
            self.perform_update(sink);
        }
    }
}
