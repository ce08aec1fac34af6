//! Power profile selection.
//!
//! A profile is a fixed set of rails that should be energized. The
//! service owns the profile tables and switches between them on
//! application request events by publishing rail enable/disable
//! requests; the rail controller does the actual switching. Boot
//! starts in the safe profile for gradual bring-up.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::info;

use crate::bus::{publish_msg, BusError, EventBus, EventHandler, EventSink, HandlerRef};
use crate::events::{
    Event, APP_EVENT_REQUEST_POWER_PROFILE_NOMINAL, APP_EVENT_REQUEST_POWER_PROFILE_SAFE,
    APP_EVENT_REQUEST_RAIL_DISABLE, APP_EVENT_REQUEST_RAIL_ENABLE,
};
use crate::messages::{RailId, RailRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerProfile {
    Nominal,
    Safe,
}

const NOMINAL_RAILS: &[RailId] = &[RailId::Obc, RailId::Radio, RailId::Gps, RailId::Payload1];
const SAFE_RAILS: &[RailId] = &[RailId::Obc];

fn profile_rails(profile: PowerProfile) -> &'static [RailId] {
    match profile {
        PowerProfile::Nominal => NOMINAL_RAILS,
        PowerProfile::Safe => SAFE_RAILS,
    }
}

pub struct PowerProfiles {
    current: PowerProfile,
}

impl PowerProfiles {
    /// Subscribe to profile requests and bring up the safe profile's
    /// rails.
    pub fn register<const Q: usize, const S: usize>(
        bus: &mut EventBus<Q, S>,
    ) -> Result<Rc<RefCell<Self>>, BusError> {
        let service = Rc::new(RefCell::new(Self {
            current: PowerProfile::Safe,
        }));

        let handler: HandlerRef = service.clone();
        bus.subscribe(APP_EVENT_REQUEST_POWER_PROFILE_NOMINAL, handler.clone())?;
        bus.subscribe(APP_EVENT_REQUEST_POWER_PROFILE_SAFE, handler)?;

        for &rail in SAFE_RAILS {
            publish_msg(bus, APP_EVENT_REQUEST_RAIL_ENABLE, &RailRequest { rail });
        }
        info!(profile = ?PowerProfile::Safe, "power profile service initialized");

        Ok(service)
    }

    pub fn current(&self) -> PowerProfile {
        self.current
    }

    fn switch_to(&mut self, requested: PowerProfile, sink: &mut dyn EventSink) {
        if self.current == requested {
            return;
        }

        let old_rails = profile_rails(self.current);
        let new_rails = profile_rails(requested);

        // Only touch the difference so rails shared by both profiles
        // never glitch through a disable/enable cycle.
        for &rail in old_rails {
            if !new_rails.contains(&rail) {
                publish_msg(sink, APP_EVENT_REQUEST_RAIL_DISABLE, &RailRequest { rail });
            }
        }
        for &rail in new_rails {
            if !old_rails.contains(&rail) {
                publish_msg(sink, APP_EVENT_REQUEST_RAIL_ENABLE, &RailRequest { rail });
            }
        }

        info!(from = ?self.current, to = ?requested, "power profile switched");
        self.current = requested;
    }
}

impl EventHandler for PowerProfiles {
    fn handle_event(&mut self, event: &Event, sink: &mut dyn EventSink) {
        match event.id {
            APP_EVENT_REQUEST_POWER_PROFILE_NOMINAL => {
                self.switch_to(PowerProfile::Nominal, sink);
            }
            APP_EVENT_REQUEST_POWER_PROFILE_SAFE => {
                self.switch_to(PowerProfile::Safe, sink);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_rails_are_subset_of_nominal() {
        for rail in SAFE_RAILS {
            assert!(NOMINAL_RAILS.contains(rail));
        }
    }
}
