//! Shared test fixtures: an event-recording subscriber, scripted
//! sensors, and tick helpers.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use epsbus::bus::{EventBus, EventHandler, EventSink};
use epsbus::events::{decode_payload, Event, EventId, EVENT_SYSTICK};
use epsbus::messages::{RailId, UartErrorKind, NUM_POWER_RAILS};
use epsbus::services::{
    BatteryReading, BatterySensor, LinkMonitor, MpptReading, MpptSensor, RailReading, RailSensor,
    NUM_MPPT_CHANNELS,
};
use serde::de::DeserializeOwned;

/// Captures every event it is subscribed to, in dispatch order.
pub struct Recorder {
    pub events: Vec<Event>,
}

impl Recorder {
    /// Subscribe a fresh recorder to each id in `ids`.
    pub fn subscribe<const Q: usize, const S: usize>(
        bus: &mut EventBus<Q, S>,
        ids: &[EventId],
    ) -> Rc<RefCell<Self>> {
        let recorder = Rc::new(RefCell::new(Self { events: Vec::new() }));
        for &id in ids {
            bus.subscribe(id, recorder.clone()).expect("subscribe recorder");
        }
        recorder
    }

    pub fn count(&self, id: EventId) -> usize {
        self.events.iter().filter(|e| e.id == id).count()
    }

    /// Decoded payloads of every captured event with `id`.
    pub fn decoded<T: DeserializeOwned>(&self, id: EventId) -> Vec<T> {
        self.events
            .iter()
            .filter(|e| e.id == id)
            .filter_map(|e| decode_payload(e))
            .collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl EventHandler for Recorder {
    fn handle_event(&mut self, event: &Event, _sink: &mut dyn EventSink) {
        self.events.push(event.clone());
    }
}

/// Publish one system tick and let the resulting cascade settle.
pub fn tick<const Q: usize, const S: usize>(bus: &mut EventBus<Q, S>) {
    assert!(bus.publish(EVENT_SYSTICK, &[]));
    bus.drain();
}

/// Run `n` system ticks.
pub fn run_ticks<const Q: usize, const S: usize>(bus: &mut EventBus<Q, S>, n: u32) {
    for _ in 0..n {
        tick(bus);
    }
}

// ── Scripted sensors ─────────────────────────────────────────────────

#[derive(Clone)]
pub struct ScriptedBattery {
    reading: Rc<Cell<BatteryReading>>,
}

impl ScriptedBattery {
    pub fn new(voltage_mv: u16) -> Self {
        Self {
            reading: Rc::new(Cell::new(BatteryReading {
                voltage_mv,
                current_ma: 150,
                temperature_dc: 215,
            })),
        }
    }

    pub fn set_voltage(&self, voltage_mv: u16) {
        let mut reading = self.reading.get();
        reading.voltage_mv = voltage_mv;
        self.reading.set(reading);
    }

    pub fn set_current(&self, current_ma: i16) {
        let mut reading = self.reading.get();
        reading.current_ma = current_ma;
        self.reading.set(reading);
    }
}

impl BatterySensor for ScriptedBattery {
    fn read(&mut self) -> BatteryReading {
        self.reading.get()
    }
}

#[derive(Clone)]
pub struct ScriptedRails {
    readings: Rc<RefCell<[RailReading; NUM_POWER_RAILS]>>,
}

impl ScriptedRails {
    /// All rails reading nominal voltage under a light load.
    pub fn nominal() -> Self {
        let reading = |mv| RailReading {
            voltage_mv: mv,
            current_ma: 100,
        };
        Self {
            readings: Rc::new(RefCell::new([
                reading(3300),
                reading(5000),
                reading(3300),
                reading(5000),
                reading(5000),
                reading(5000),
                reading(3300),
            ])),
        }
    }

    pub fn set(&self, rail: RailId, voltage_mv: u16, current_ma: u16) {
        self.readings.borrow_mut()[rail.index()] = RailReading {
            voltage_mv,
            current_ma,
        };
    }
}

impl RailSensor for ScriptedRails {
    fn read(&mut self, rail: RailId) -> RailReading {
        self.readings.borrow()[rail.index()]
    }
}

#[derive(Clone)]
pub struct ScriptedMppt {
    readings: Rc<RefCell<[MpptReading; NUM_MPPT_CHANNELS]>>,
}

impl ScriptedMppt {
    pub fn sunlit() -> Self {
        let reading = MpptReading {
            input_mv: 16200,
            output_mv: 8100,
            power_mw: 5600,
            pgood: true,
        };
        Self {
            readings: Rc::new(RefCell::new([reading; NUM_MPPT_CHANNELS])),
        }
    }

    pub fn set(&self, channel: u8, reading: MpptReading) {
        self.readings.borrow_mut()[channel as usize] = reading;
    }
}

impl MpptSensor for ScriptedMppt {
    fn read(&mut self, channel: u8) -> MpptReading {
        self.readings.borrow()[channel as usize]
    }
}

#[derive(Clone)]
pub struct ScriptedLink {
    errors: Rc<RefCell<VecDeque<UartErrorKind>>>,
}

impl ScriptedLink {
    pub fn healthy() -> Self {
        Self {
            errors: Rc::new(RefCell::new(VecDeque::new())),
        }
    }

    pub fn inject(&self, kind: UartErrorKind) {
        self.errors.borrow_mut().push_back(kind);
    }
}

impl LinkMonitor for ScriptedLink {
    fn poll(&mut self) -> Option<UartErrorKind> {
        self.errors.borrow_mut().pop_front()
    }
}
