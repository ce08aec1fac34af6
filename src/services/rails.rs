//! Power rail controller.
//!
//! Seven switched rails, each with a fixed configuration row (nominal
//! voltage window and current limit). Rails are enabled and disabled
//! through application request events; an enabled rail is checked every
//! update cycle against its window and latched off on the first
//! violation, with the matching fault event published for the
//! redundancy manager.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{info, warn};

use crate::bus::{publish_msg, BusError, EventBus, EventHandler, EventSink, HandlerRef};
use crate::events::{
    decode_payload, Event, APP_EVENT_REQUEST_RAIL_DISABLE, APP_EVENT_REQUEST_RAIL_ENABLE,
    EVENT_SYSTICK, RAIL_EVENT_OVERCURRENT, RAIL_EVENT_OVERVOLTAGE, RAIL_EVENT_TELEMETRY,
    RAIL_EVENT_UNDERVOLTAGE,
};
use crate::messages::{
    RailFaultReport, RailId, RailRequest, RailStatus, RailTelemetry, NUM_POWER_RAILS,
};

const UPDATE_INTERVAL_TICKS: u32 = 10;
const TELEMETRY_INTERVAL_TICKS: u32 = 600;

/// Static configuration of one rail.
#[derive(Debug, Clone, Copy)]
pub struct RailConfig {
    pub rail: RailId,
    pub nominal_mv: u16,
    pub min_mv: u16,
    pub max_mv: u16,
    pub current_limit_ma: u16,
    pub name: &'static str,
}

/// Hardware rail table. Indexed by [`RailId::index`].
pub const RAIL_CONFIGS: [RailConfig; NUM_POWER_RAILS] = [
    RailConfig {
        rail: RailId::Obc,
        nominal_mv: 3300,
        min_mv: 3000,
        max_mv: 3600,
        current_limit_ma: 2000,
        name: "OBC",
    },
    RailConfig {
        rail: RailId::Radio,
        nominal_mv: 5000,
        min_mv: 4750,
        max_mv: 5250,
        current_limit_ma: 1500,
        name: "Radio",
    },
    RailConfig {
        rail: RailId::Gps,
        nominal_mv: 3300,
        min_mv: 3000,
        max_mv: 3600,
        current_limit_ma: 500,
        name: "GPS",
    },
    RailConfig {
        rail: RailId::Payload1,
        nominal_mv: 5000,
        min_mv: 4750,
        max_mv: 5250,
        current_limit_ma: 3000,
        name: "Payload 1",
    },
    RailConfig {
        rail: RailId::Payload2,
        nominal_mv: 5000,
        min_mv: 4750,
        max_mv: 5250,
        current_limit_ma: 3000,
        name: "Payload 2",
    },
    RailConfig {
        rail: RailId::Bus5V,
        nominal_mv: 5000,
        min_mv: 4750,
        max_mv: 5250,
        current_limit_ma: 5000,
        name: "5V Bus",
    },
    RailConfig {
        rail: RailId::Bus3V3,
        nominal_mv: 3300,
        min_mv: 3000,
        max_mv: 3600,
        current_limit_ma: 4000,
        name: "3.3V Bus",
    },
];

#[derive(Debug, Clone, Copy)]
pub struct RailReading {
    pub voltage_mv: u16,
    pub current_ma: u16,
}

/// Per-rail measurement source (ADC channels on real hardware).
pub trait RailSensor {
    fn read(&mut self, rail: RailId) -> RailReading;
}

#[derive(Debug, Clone, Copy)]
struct RailState {
    voltage_mv: u16,
    current_ma: u16,
    status: RailStatus,
    enabled: bool,
}

pub struct RailController {
    rails: [RailState; NUM_POWER_RAILS],
    sensor: Box<dyn RailSensor>,
    tick_counter: u32,
    telemetry_counter: u32,
}

impl RailController {
    pub fn register<const Q: usize, const S: usize>(
        bus: &mut EventBus<Q, S>,
        sensor: Box<dyn RailSensor>,
    ) -> Result<Rc<RefCell<Self>>, BusError> {
        let service = Rc::new(RefCell::new(Self {
            rails: [RailState {
                voltage_mv: 0,
                current_ma: 0,
                status: RailStatus::Disabled,
                enabled: false,
            }; NUM_POWER_RAILS],
            sensor,
            tick_counter: 0,
            telemetry_counter: 0,
        }));

        let handler: HandlerRef = service.clone();
        bus.subscribe(EVENT_SYSTICK, handler.clone())?;
        bus.subscribe(APP_EVENT_REQUEST_RAIL_ENABLE, handler.clone())?;
        bus.subscribe(APP_EVENT_REQUEST_RAIL_DISABLE, handler)?;

        info!("rail controller initialized, all rails disabled");
        Ok(service)
    }

    fn enable(&mut self, rail: RailId) {
        let state = &mut self.rails[rail.index()];
        if !state.enabled {
            info!(rail = RAIL_CONFIGS[rail.index()].name, "rail enabled");
        }
        state.enabled = true;
        state.status = RailStatus::Ok;
    }

    fn disable(&mut self, rail: RailId) {
        let state = &mut self.rails[rail.index()];
        if state.enabled {
            info!(rail = RAIL_CONFIGS[rail.index()].name, "rail disabled");
        }
        state.enabled = false;
        state.status = RailStatus::Disabled;
    }

    fn perform_update(&mut self, sink: &mut dyn EventSink) {
        for config in &RAIL_CONFIGS {
            let reading = self.sensor.read(config.rail);
            let state = &mut self.rails[config.rail.index()];
            state.voltage_mv = reading.voltage_mv;
            state.current_ma = reading.current_ma;

            if !state.enabled {
                continue;
            }

            let violation = if reading.current_ma > config.current_limit_ma {
                Some((RailStatus::Overcurrent, RAIL_EVENT_OVERCURRENT))
            } else if reading.voltage_mv < config.min_mv {
                Some((RailStatus::Undervoltage, RAIL_EVENT_UNDERVOLTAGE))
            } else if reading.voltage_mv > config.max_mv {
                Some((RailStatus::Overvoltage, RAIL_EVENT_OVERVOLTAGE))
            } else {
                None
            };

            if let Some((new_status, event_id)) = violation {
                warn!(
                    rail = config.name,
                    voltage_mv = reading.voltage_mv,
                    current_ma = reading.current_ma,
                    status = ?new_status,
                    "rail fault, latching off"
                );
                // Latch the rail off; re-enable requires an explicit
                // request after the cause is resolved.
                state.status = new_status;
                state.enabled = false;
                publish_msg(
                    sink,
                    event_id,
                    &RailFaultReport {
                        rail: config.rail,
                        voltage_mv: reading.voltage_mv,
                        current_ma: reading.current_ma,
                    },
                );
            }
        }
    }

    fn publish_telemetry(&self, sink: &mut dyn EventSink) {
        for config in &RAIL_CONFIGS {
            let state = &self.rails[config.rail.index()];
            publish_msg(
                sink,
                RAIL_EVENT_TELEMETRY,
                &RailTelemetry {
                    rail: config.rail,
                    voltage_mv: state.voltage_mv,
                    current_ma: state.current_ma,
                    status: state.status,
                    enabled: state.enabled,
                },
            );
        }
    }

    pub fn is_enabled(&self, rail: RailId) -> bool {
        self.rails[rail.index()].enabled
    }

    pub fn status(&self, rail: RailId) -> RailStatus {
        self.rails[rail.index()].status
    }
}

impl EventHandler for RailController {
    fn handle_event(&mut self, event: &Event, sink: &mut dyn EventSink) {
        match event.id {
            EVENT_SYSTICK => {
                self.tick_counter += 1;
                if self.tick_counter >= UPDATE_INTERVAL_TICKS {
                    self.tick_counter = 0;
                    self.perform_update(sink);
                }

                self.telemetry_counter += 1;
                if self.telemetry_counter >= TELEMETRY_INTERVAL_TICKS {
                    self.telemetry_counter = 0;
                    self.publish_telemetry(sink);
                }
            }
            APP_EVENT_REQUEST_RAIL_ENABLE => {
                if let Some(request) = decode_payload::<RailRequest>(event) {
                    self.enable(request.rail);
                }
            }
            APP_EVENT_REQUEST_RAIL_DISABLE => {
                if let Some(request) = decode_payload::<RailRequest>(event) {
                    self.disable(request.rail);
                }
            }
            _ => {}
        }
    }
}
