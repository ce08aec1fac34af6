//! UART link supervisor.
//!
//! One instance per physical port. The byte-level packet codec lives
//! outside this crate; the supervisor's job is the failure-propagation
//! contract: poll the injected [`LinkMonitor`] each tick and turn
//! detected link errors into `UART_EVENT_ERROR_DETECTED` events
//! carrying the port, so the redundancy manager can flag the component
//! and fail-over logic can react.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::warn;

use crate::bus::{publish_msg, BusError, EventBus, EventHandler, EventSink, HandlerRef};
use crate::events::{Event, EVENT_SYSTICK, UART_EVENT_ERROR_DETECTED};
use crate::messages::{UartErrorKind, UartErrorReport, UartPort};

/// Link health source: the HAL error callback on hardware, a script in
/// tests and the simulator. Polled once per tick so a noisy link cannot
/// extend a dispatch cycle unboundedly.
pub trait LinkMonitor {
    fn poll(&mut self) -> Option<UartErrorKind>;
}

pub struct UartLink {
    port: UartPort,
    monitor: Box<dyn LinkMonitor>,
    error_count: u32,
}

impl UartLink {
    pub fn register<const Q: usize, const S: usize>(
        bus: &mut EventBus<Q, S>,
        port: UartPort,
        monitor: Box<dyn LinkMonitor>,
    ) -> Result<Rc<RefCell<Self>>, BusError> {
        let service = Rc::new(RefCell::new(Self {
            port,
            monitor,
            error_count: 0,
        }));

        let handler: HandlerRef = service.clone();
        bus.subscribe(EVENT_SYSTICK, handler)?;

        Ok(service)
    }

    pub fn port(&self) -> UartPort {
        self.port
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }
}

impl EventHandler for UartLink {
    fn handle_event(&mut self, event: &Event, sink: &mut dyn EventSink) {
        if event.id != EVENT_SYSTICK {
            return;
        }

        if let Some(kind) = self.monitor.poll() {
            self.error_count = self.error_count.saturating_add(1);
            warn!(port = ?self.port, ?kind, "uart link error");
            publish_msg(
                sink,
                UART_EVENT_ERROR_DETECTED,
                &UartErrorReport {
                    port: self.port,
                    kind,
                },
            );
        }
    }
}
