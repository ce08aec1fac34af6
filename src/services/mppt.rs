//! MPPT (solar string) controller.
//!
//! Tracks the power-good and output state of each solar string
//! converter through an injected [`MpptSensor`]. Channels are enabled
//! and disabled by application requests; a lost power-good latches a
//! fault event, a sagging output while power-good publishes a
//! low-power warning.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{info, warn};

use crate::bus::{publish_msg, BusError, EventBus, EventHandler, EventSink, HandlerRef};
use crate::events::{
    decode_payload, Event, APP_EVENT_REQUEST_MPPT_DISABLE_CHANNEL,
    APP_EVENT_REQUEST_MPPT_ENABLE_CHANNEL, EVENT_SYSTICK, MPPT_EVENT_FAULT_DETECTED,
    MPPT_EVENT_POWER_LOW, MPPT_EVENT_TELEMETRY,
};
use crate::messages::{MpptChannelReport, MpptTelemetry};

pub const NUM_MPPT_CHANNELS: usize = 2;

const UPDATE_INTERVAL_TICKS: u32 = 10;
const TELEMETRY_INTERVAL_TICKS: u32 = 600;

/// Output power below this while power-good counts as a low-power
/// condition (string shadowed or panel degradation).
const POWER_LOW_THRESHOLD_MW: u32 = 250;

#[derive(Debug, Clone, Copy)]
pub struct MpptReading {
    pub input_mv: u16,
    pub output_mv: u16,
    pub power_mw: u32,
    pub pgood: bool,
}

/// Converter measurement source, one reading per channel.
pub trait MpptSensor {
    fn read(&mut self, channel: u8) -> MpptReading;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelStatus {
    Ok,
    Disabled,
    Fault,
    PowerLow,
}

#[derive(Debug, Clone, Copy)]
struct Channel {
    status: ChannelStatus,
    enabled: bool,
    last: MpptReading,
}

pub struct MpptController {
    channels: [Channel; NUM_MPPT_CHANNELS],
    sensor: Box<dyn MpptSensor>,
    tick_counter: u32,
    telemetry_counter: u32,
}

impl MpptController {
    pub fn register<const Q: usize, const S: usize>(
        bus: &mut EventBus<Q, S>,
        sensor: Box<dyn MpptSensor>,
    ) -> Result<Rc<RefCell<Self>>, BusError> {
        let service = Rc::new(RefCell::new(Self {
            channels: [Channel {
                status: ChannelStatus::Disabled,
                enabled: false,
                last: MpptReading {
                    input_mv: 0,
                    output_mv: 0,
                    power_mw: 0,
                    pgood: false,
                },
            }; NUM_MPPT_CHANNELS],
            sensor,
            tick_counter: 0,
            telemetry_counter: 0,
        }));

        let handler: HandlerRef = service.clone();
        bus.subscribe(EVENT_SYSTICK, handler.clone())?;
        bus.subscribe(APP_EVENT_REQUEST_MPPT_ENABLE_CHANNEL, handler.clone())?;
        bus.subscribe(APP_EVENT_REQUEST_MPPT_DISABLE_CHANNEL, handler)?;

        info!("mppt controller initialized");
        Ok(service)
    }

    fn set_enabled(&mut self, channel: u8, enabled: bool) {
        let Some(state) = self.channels.get_mut(channel as usize) else {
            // Out-of-range channel in a request: ignore it.
            return;
        };
        state.enabled = enabled;
        state.status = if enabled {
            ChannelStatus::Ok
        } else {
            ChannelStatus::Disabled
        };
        info!(channel, enabled, "mppt channel state changed");
    }

    fn perform_update(&mut self, sink: &mut dyn EventSink) {
        for index in 0..NUM_MPPT_CHANNELS {
            let channel = index as u8;
            if !self.channels[index].enabled {
                continue;
            }

            let reading = self.sensor.read(channel);
            self.channels[index].last = reading;

            let new_status = if !reading.pgood {
                ChannelStatus::Fault
            } else if reading.power_mw < POWER_LOW_THRESHOLD_MW {
                ChannelStatus::PowerLow
            } else {
                ChannelStatus::Ok
            };

            if new_status == self.channels[index].status {
                continue;
            }
            self.channels[index].status = new_status;

            match new_status {
                ChannelStatus::Fault => {
                    warn!(channel, "mppt power-good lost");
                    publish_msg(sink, MPPT_EVENT_FAULT_DETECTED, &MpptChannelReport { channel });
                }
                ChannelStatus::PowerLow => {
                    warn!(channel, power_mw = reading.power_mw, "mppt output low");
                    publish_msg(sink, MPPT_EVENT_POWER_LOW, &MpptChannelReport { channel });
                }
                ChannelStatus::Ok | ChannelStatus::Disabled => {}
            }
        }
    }

    fn publish_telemetry(&self, sink: &mut dyn EventSink) {
        for (index, state) in self.channels.iter().enumerate() {
            if !state.enabled {
                continue;
            }
            publish_msg(
                sink,
                MPPT_EVENT_TELEMETRY,
                &MpptTelemetry {
                    channel: index as u8,
                    input_mv: state.last.input_mv,
                    output_mv: state.last.output_mv,
                    power_mw: state.last.power_mw,
                    enabled: state.enabled,
                },
            );
        }
    }

    pub fn is_enabled(&self, channel: u8) -> bool {
        self.channels
            .get(channel as usize)
            .map(|c| c.enabled)
            .unwrap_or(false)
    }

    pub fn total_power_mw(&self) -> u32 {
        self.channels
            .iter()
            .filter(|c| c.enabled)
            .map(|c| c.last.power_mw)
            .sum()
    }
}

impl EventHandler for MpptController {
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
            APP_EVENT_REQUEST_MPPT_ENABLE_CHANNEL => {
                if let Some(request) = decode_payload::<MpptChannelReport>(event) {
                    self.set_enabled(request.channel, true);
                }
            }
            APP_EVENT_REQUEST_MPPT_DISABLE_CHANNEL => {
                if let Some(request) = decode_payload::<MpptChannelReport>(event) {
                    self.set_enabled(request.channel, false);
                }
            }
            _ => {}
        }
    }
}
