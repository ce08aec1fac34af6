//! Log transport fail-over.
//!
//! Logs leave the EPS over one of two UART ports. This service watches
//! the redundancy manager's component degradation and recovery notices
//! and keeps the active transport pointed at a healthy port, preferring
//! the primary whenever it is usable. It only *selects* the transport;
//! the flush path that moves bytes is outside this crate.

use std::cell::RefCell;
use std::rc::Rc;

use arrayvec::ArrayString;
use tracing::{info, warn};

use crate::bus::{BusError, EventBus, EventHandler, EventSink, HandlerRef};
use crate::events::{
    decode_payload, Event, APP_EVENT_REQUEST_LOGGING_FLUSH, REDUNDANCY_EVENT_COMPONENT_DEGRADED,
    REDUNDANCY_EVENT_COMPONENT_RECOVERED,
};
use crate::messages::{ComponentDegradation, ComponentId, ComponentRecovery};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTransport {
    PrimaryUart,
    AuxUart,
}

impl LogTransport {
    fn label(self) -> ArrayString<16> {
        let mut label = ArrayString::new();
        let _ = label.try_push_str(match self {
            LogTransport::PrimaryUart => "primary-uart",
            LogTransport::AuxUart => "aux-uart",
        });
        label
    }
}

pub struct LogRouter {
    active: LogTransport,
    primary_ok: bool,
    aux_ok: bool,
    failover_count: u32,
    flush_requests: u32,
}

impl LogRouter {
    pub fn register<const Q: usize, const S: usize>(
        bus: &mut EventBus<Q, S>,
    ) -> Result<Rc<RefCell<Self>>, BusError> {
        let service = Rc::new(RefCell::new(Self {
            active: LogTransport::PrimaryUart,
            primary_ok: true,
            aux_ok: true,
            failover_count: 0,
            flush_requests: 0,
        }));

        let handler: HandlerRef = service.clone();
        bus.subscribe(REDUNDANCY_EVENT_COMPONENT_DEGRADED, handler.clone())?;
        bus.subscribe(REDUNDANCY_EVENT_COMPONENT_RECOVERED, handler.clone())?;
        bus.subscribe(APP_EVENT_REQUEST_LOGGING_FLUSH, handler)?;

        Ok(service)
    }

    pub fn active_transport(&self) -> LogTransport {
        self.active
    }

    pub fn failover_count(&self) -> u32 {
        self.failover_count
    }

    pub fn flush_requests(&self) -> u32 {
        self.flush_requests
    }

    fn reselect(&mut self) {
        let preferred = if self.primary_ok {
            LogTransport::PrimaryUart
        } else if self.aux_ok {
            LogTransport::AuxUart
        } else {
            // Both links degraded: stay put, nothing better to pick.
            self.active
        };

        if preferred != self.active {
            self.failover_count += 1;
            warn!(
                from = self.active.label().as_str(),
                to = preferred.label().as_str(),
                "log transport fail-over"
            );
            self.active = preferred;
        }
    }

    fn on_component_change(&mut self, component: ComponentId, is_ok: bool) {
        match component {
            ComponentId::UartPrimary => self.primary_ok = is_ok,
            ComponentId::UartSecondary => self.aux_ok = is_ok,
            _ => return,
        }
        self.reselect();
    }
}

impl EventHandler for LogRouter {
    fn handle_event(&mut self, event: &Event, _sink: &mut dyn EventSink) {
        match event.id {
            REDUNDANCY_EVENT_COMPONENT_DEGRADED => {
                if let Some(notice) = decode_payload::<ComponentDegradation>(event) {
                    self.on_component_change(notice.component, false);
                }
            }
            REDUNDANCY_EVENT_COMPONENT_RECOVERED => {
                if let Some(notice) = decode_payload::<ComponentRecovery>(event) {
                    self.on_component_change(notice.component, true);
                }
            }
            APP_EVENT_REQUEST_LOGGING_FLUSH => {
                self.flush_requests += 1;
                info!(
                    transport = self.active.label().as_str(),
                    "log flush requested"
                );
            }
            _ => {}
        }
    }
}
