//! Application-layer power policy.
//!
//! The reactive half of the application state machine: battery and
//! system-health events drive power-profile requests. A critical
//! battery or a system-wide fault pulls the bus down to the safe
//! profile; recovery or a fully charged pack requests nominal. The
//! command-driven half (ground commands over the packet link) lives
//! outside this crate.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::info;

use crate::bus::{BusError, EventBus, EventHandler, EventSink, HandlerRef};
use crate::events::{
    Event, APP_EVENT_REQUEST_POWER_PROFILE_NOMINAL, APP_EVENT_REQUEST_POWER_PROFILE_SAFE,
    BATTERY_EVENT_CRITICAL_LOW, BATTERY_EVENT_FULLY_CHARGED, REDUNDANCY_EVENT_CRITICAL_HEALTH,
    REDUNDANCY_EVENT_HEALTH_RECOVERED,
};

pub struct PowerPolicy {
    safe_mode_requests: u32,
    nominal_requests: u32,
    /// Set once a fault has been seen, so the startup health announce
    /// does not read as a recovery and lift the boot-time safe profile.
    saw_fault: bool,
}

impl PowerPolicy {
    pub fn register<const Q: usize, const S: usize>(
        bus: &mut EventBus<Q, S>,
    ) -> Result<Rc<RefCell<Self>>, BusError> {
        let service = Rc::new(RefCell::new(Self {
            safe_mode_requests: 0,
            nominal_requests: 0,
            saw_fault: false,
        }));

        let handler: HandlerRef = service.clone();
        bus.subscribe(BATTERY_EVENT_CRITICAL_LOW, handler.clone())?;
        bus.subscribe(BATTERY_EVENT_FULLY_CHARGED, handler.clone())?;
        bus.subscribe(REDUNDANCY_EVENT_CRITICAL_HEALTH, handler.clone())?;
        bus.subscribe(REDUNDANCY_EVENT_HEALTH_RECOVERED, handler)?;

        Ok(service)
    }

    pub fn safe_mode_requests(&self) -> u32 {
        self.safe_mode_requests
    }

    pub fn nominal_requests(&self) -> u32 {
        self.nominal_requests
    }
}

impl EventHandler for PowerPolicy {
    fn handle_event(&mut self, event: &Event, sink: &mut dyn EventSink) {
        match event.id {
            BATTERY_EVENT_CRITICAL_LOW | REDUNDANCY_EVENT_CRITICAL_HEALTH => {
                self.saw_fault = true;
                self.safe_mode_requests += 1;
                info!(trigger = %event.id, "requesting safe power profile");
                sink.publish(APP_EVENT_REQUEST_POWER_PROFILE_SAFE, &[]);
            }
            REDUNDANCY_EVENT_HEALTH_RECOVERED => {
                if !self.saw_fault {
                    return;
                }
                self.saw_fault = false;
                self.nominal_requests += 1;
                info!(trigger = %event.id, "requesting nominal power profile");
                sink.publish(APP_EVENT_REQUEST_POWER_PROFILE_NOMINAL, &[]);
            }
            BATTERY_EVENT_FULLY_CHARGED => {
                self.nominal_requests += 1;
                info!(trigger = %event.id, "requesting nominal power profile");
                sink.publish(APP_EVENT_REQUEST_POWER_PROFILE_NOMINAL, &[]);
            }
            _ => {}
        }
    }
}
