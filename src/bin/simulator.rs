//! Host simulator for the EPS core.
//!
//! Builds the full runtime (bus, redundancy manager, every service),
//! drives it with a scripted tick source, and injects fault scenarios
//! so the health state machine and fail-over paths can be watched from
//! a terminal.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use clap::{App, Arg};
use colored::Colorize;
use tracing::info;

use epsbus::bus::{publish_msg, EventBus, EventHandler, EventSink};
use epsbus::clock::SystemClock;
use epsbus::events::{
    decode_payload, Event, APP_EVENT_REQUEST_MPPT_ENABLE_CHANNEL,
    APP_EVENT_REQUEST_POWER_PROFILE_NOMINAL, APP_EVENT_REQUEST_REDUNDANCY_CLEAR_ALL,
    APP_EVENT_REQUEST_REDUNDANCY_HEALTH, EVENT_SYSTICK,
    REDUNDANCY_EVENT_COMPONENT_DEGRADED, REDUNDANCY_EVENT_COMPONENT_RECOVERED,
    REDUNDANCY_EVENT_CRITICAL_HEALTH, REDUNDANCY_EVENT_HEALTH_DEGRADED,
    REDUNDANCY_EVENT_HEALTH_RECOVERED, REDUNDANCY_EVENT_HEALTH_RESPONSE,
    REDUNDANCY_EVENT_TELEMETRY,
};
use epsbus::messages::{
    ComponentDegradation, ComponentRecovery, HealthChanged, HealthResponse, MpptChannelReport,
    RailId, RedundancyTelemetry, SystemHealth, UartErrorKind, UartPort, NUM_POWER_RAILS,
};
use epsbus::policy::PowerPolicy;
use epsbus::redundancy::RedundancyManager;
use epsbus::services::{
    BatteryReading, BatterySensor, BatteryService, LinkMonitor, LogRouter, MpptController,
    MpptReading, MpptSensor, PowerProfiles, RailController, RailReading, RailSensor, UartLink,
    NUM_MPPT_CHANNELS,
};

const HEALTH_QUERY_INTERVAL_TICKS: u64 = 1000;

// ── Scripted sensors ─────────────────────────────────────────────────

#[derive(Clone)]
struct SimBattery {
    reading: Rc<Cell<BatteryReading>>,
}

impl SimBattery {
    fn new() -> Self {
        Self {
            reading: Rc::new(Cell::new(BatteryReading {
                voltage_mv: 3700,
                current_ma: 150,
                temperature_dc: 215,
            })),
        }
    }

    fn set_voltage(&self, voltage_mv: u16) {
        let mut reading = self.reading.get();
        reading.voltage_mv = voltage_mv;
        self.reading.set(reading);
    }
}

impl BatterySensor for SimBattery {
    fn read(&mut self) -> BatteryReading {
        self.reading.get()
    }
}

#[derive(Clone)]
struct SimRails {
    readings: Rc<RefCell<[RailReading; NUM_POWER_RAILS]>>,
}

impl SimRails {
    fn new() -> Self {
        // Every rail sits at its nominal voltage under a light load.
        let nominal = |mv| RailReading {
            voltage_mv: mv,
            current_ma: 120,
        };
        Self {
            readings: Rc::new(RefCell::new([
                nominal(3300),
                nominal(5000),
                nominal(3300),
                nominal(5000),
                nominal(5000),
                nominal(5000),
                nominal(3300),
            ])),
        }
    }

    fn set(&self, rail: RailId, reading: RailReading) {
        self.readings.borrow_mut()[rail.index()] = reading;
    }
}

impl RailSensor for SimRails {
    fn read(&mut self, rail: RailId) -> RailReading {
        self.readings.borrow()[rail.index()]
    }
}

#[derive(Clone)]
struct SimMppt {
    readings: Rc<RefCell<[MpptReading; NUM_MPPT_CHANNELS]>>,
}

impl SimMppt {
    fn new() -> Self {
        let sunlit = MpptReading {
            input_mv: 16200,
            output_mv: 8100,
            power_mw: 5600,
            pgood: true,
        };
        Self {
            readings: Rc::new(RefCell::new([sunlit; NUM_MPPT_CHANNELS])),
        }
    }
}

impl MpptSensor for SimMppt {
    fn read(&mut self, channel: u8) -> MpptReading {
        self.readings.borrow()[channel as usize]
    }
}

#[derive(Clone)]
struct SimLink {
    errors: Rc<RefCell<VecDeque<UartErrorKind>>>,
}

impl SimLink {
    fn new() -> Self {
        Self {
            errors: Rc::new(RefCell::new(VecDeque::new())),
        }
    }

    fn inject(&self, kind: UartErrorKind) {
        self.errors.borrow_mut().push_back(kind);
    }
}

impl LinkMonitor for SimLink {
    fn poll(&mut self) -> Option<UartErrorKind> {
        self.errors.borrow_mut().pop_front()
    }
}

// ── Console observer ─────────────────────────────────────────────────

struct ConsoleObserver;

impl EventHandler for ConsoleObserver {
    fn handle_event(&mut self, event: &Event, _sink: &mut dyn EventSink) {
        match event.id {
            REDUNDANCY_EVENT_CRITICAL_HEALTH
            | REDUNDANCY_EVENT_HEALTH_DEGRADED
            | REDUNDANCY_EVENT_HEALTH_RECOVERED => {
                if let Some(change) = decode_payload::<HealthChanged>(event) {
                    let label = match change.health {
                        SystemHealth::Ok => "OK".bright_green(),
                        SystemHealth::Degraded => "DEGRADED".bright_yellow(),
                        SystemHealth::Fault => "FAULT".bright_red(),
                    };
                    println!("{} system health -> {}", "[health]".bright_blue(), label);
                }
            }
            REDUNDANCY_EVENT_COMPONENT_DEGRADED => {
                if let Some(notice) = decode_payload::<ComponentDegradation>(event) {
                    println!(
                        "{} {:?} degraded by {:?} (fallback: {})",
                        "[component]".bright_yellow(),
                        notice.component,
                        notice.fault_source,
                        if notice.fallback_available { "yes" } else { "no" }
                    );
                }
            }
            REDUNDANCY_EVENT_COMPONENT_RECOVERED => {
                if let Some(notice) = decode_payload::<ComponentRecovery>(event) {
                    println!(
                        "{} {:?} recovered",
                        "[component]".bright_green(),
                        notice.component
                    );
                }
            }
            REDUNDANCY_EVENT_HEALTH_RESPONSE => {
                if let Some(response) = decode_payload::<HealthResponse>(event) {
                    println!(
                        "{} health={:?} active_faults={} t={}ms",
                        "[query]".bright_white(),
                        response.health,
                        response.active_fault_count,
                        response.timestamp_ms
                    );
                }
            }
            REDUNDANCY_EVENT_TELEMETRY => {
                if let Some(snapshot) = decode_payload::<RedundancyTelemetry>(event) {
                    if let Ok(json) = serde_json::to_string(&snapshot) {
                        println!("{} {}", "[telemetry]".dimmed(), json);
                    }
                }
            }
            _ => {}
        }
    }
}

// ── Scenarios ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scenario {
    Nominal,
    BatteryBrownout,
    UartFailover,
    RailOvercurrent,
}

impl Scenario {
    fn parse(name: &str) -> Self {
        match name {
            "battery-brownout" => Scenario::BatteryBrownout,
            "uart-failover" => Scenario::UartFailover,
            "rail-overcurrent" => Scenario::RailOvercurrent,
            _ => Scenario::Nominal,
        }
    }
}

struct ScenarioDriver {
    scenario: Scenario,
    battery: SimBattery,
    rails: SimRails,
    primary_link: SimLink,
}

impl ScenarioDriver {
    fn apply<const Q: usize, const S: usize>(&self, tick: u64, bus: &mut EventBus<Q, S>) {
        match self.scenario {
            Scenario::Nominal => {}
            Scenario::BatteryBrownout => {
                if tick == 500 {
                    println!("{} battery sags to 3.1 V", "[scenario]".bright_magenta());
                    self.battery.set_voltage(3100);
                } else if tick == 1500 {
                    println!("{} battery recovers to 3.7 V", "[scenario]".bright_magenta());
                    self.battery.set_voltage(3700);
                } else if tick == 2000 {
                    println!(
                        "{} ground clears all faults",
                        "[scenario]".bright_magenta()
                    );
                    bus.publish(APP_EVENT_REQUEST_REDUNDANCY_CLEAR_ALL, &[]);
                }
            }
            Scenario::UartFailover => {
                if tick == 500 {
                    println!(
                        "{} primary uart framing errors",
                        "[scenario]".bright_magenta()
                    );
                    self.primary_link.inject(UartErrorKind::Framing);
                    self.primary_link.inject(UartErrorKind::Framing);
                } else if tick == 2000 {
                    println!(
                        "{} ground clears all faults",
                        "[scenario]".bright_magenta()
                    );
                    bus.publish(APP_EVENT_REQUEST_REDUNDANCY_CLEAR_ALL, &[]);
                }
            }
            Scenario::RailOvercurrent => {
                if tick == 100 {
                    println!(
                        "{} requesting nominal power profile",
                        "[scenario]".bright_magenta()
                    );
                    bus.publish(APP_EVENT_REQUEST_POWER_PROFILE_NOMINAL, &[]);
                } else if tick == 500 {
                    println!(
                        "{} radio rail draws 2.4 A",
                        "[scenario]".bright_magenta()
                    );
                    self.rails.set(
                        RailId::Radio,
                        RailReading {
                            voltage_mv: 4900,
                            current_ma: 2400,
                        },
                    );
                } else if tick == 600 {
                    // The rail latched off, so the sense line reads idle.
                    self.rails.set(
                        RailId::Radio,
                        RailReading {
                            voltage_mv: 0,
                            current_ma: 0,
                        },
                    );
                }
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt::init();

    let matches = App::new("epsbus-sim")
        .version("0.1.0")
        .about("EPS event bus and system health simulator")
        .arg(
            Arg::with_name("ticks")
                .long("ticks")
                .value_name("N")
                .help("Number of system ticks to run (0 = until Ctrl+C)")
                .takes_value(true)
                .default_value("3000"),
        )
        .arg(
            Arg::with_name("tick-hz")
                .long("tick-hz")
                .value_name("HZ")
                .help("System tick rate")
                .takes_value(true)
                .default_value("100"),
        )
        .arg(
            Arg::with_name("scenario")
                .long("scenario")
                .value_name("NAME")
                .help("Fault scenario to inject")
                .takes_value(true)
                .possible_values(&[
                    "nominal",
                    "battery-brownout",
                    "uart-failover",
                    "rail-overcurrent",
                ])
                .default_value("nominal"),
        )
        .get_matches();

    let max_ticks: u64 = matches.value_of("ticks").unwrap().parse().unwrap_or(3000);
    let tick_hz: u64 = matches
        .value_of("tick-hz")
        .unwrap()
        .parse()
        .unwrap_or(100)
        .max(1);
    let scenario = Scenario::parse(matches.value_of("scenario").unwrap());

    println!(
        "{} scenario={:?} tick_hz={} ticks={}",
        "EPS core simulator".bright_blue().bold(),
        scenario,
        tick_hz,
        if max_ticks == 0 {
            "unbounded".to_string()
        } else {
            max_ticks.to_string()
        }
    );

    let mut bus: EventBus = EventBus::new();
    let clock = Rc::new(SystemClock::new());

    let battery_sensor = SimBattery::new();
    let rail_sensor = SimRails::new();
    let mppt_sensor = SimMppt::new();
    let primary_link = SimLink::new();
    let secondary_link = SimLink::new();

    let manager = RedundancyManager::register(&mut bus, clock).expect("register redundancy");
    let _battery = BatteryService::register(&mut bus, Box::new(battery_sensor.clone()))
        .expect("register battery");
    let _rails =
        RailController::register(&mut bus, Box::new(rail_sensor.clone())).expect("register rails");
    let _mppt =
        MpptController::register(&mut bus, Box::new(mppt_sensor.clone())).expect("register mppt");
    let _uart_primary =
        UartLink::register(&mut bus, UartPort::Primary, Box::new(primary_link.clone()))
            .expect("register primary uart");
    let _uart_secondary =
        UartLink::register(&mut bus, UartPort::Secondary, Box::new(secondary_link))
            .expect("register secondary uart");
    let _profiles = PowerProfiles::register(&mut bus).expect("register profiles");
    let log_router = LogRouter::register(&mut bus).expect("register log router");
    let _policy = PowerPolicy::register(&mut bus).expect("register policy");

    let observer = Rc::new(RefCell::new(ConsoleObserver));
    for id in [
        REDUNDANCY_EVENT_CRITICAL_HEALTH,
        REDUNDANCY_EVENT_HEALTH_DEGRADED,
        REDUNDANCY_EVENT_HEALTH_RECOVERED,
        REDUNDANCY_EVENT_COMPONENT_DEGRADED,
        REDUNDANCY_EVENT_COMPONENT_RECOVERED,
        REDUNDANCY_EVENT_HEALTH_RESPONSE,
        REDUNDANCY_EVENT_TELEMETRY,
    ] {
        bus.subscribe(id, observer.clone()).expect("observer");
    }

    // Bring both solar strings online.
    for channel in 0..NUM_MPPT_CHANNELS as u8 {
        publish_msg(
            &mut bus,
            APP_EVENT_REQUEST_MPPT_ENABLE_CHANNEL,
            &MpptChannelReport { channel },
        );
    }

    let driver = ScenarioDriver {
        scenario,
        battery: battery_sensor,
        rails: rail_sensor,
        primary_link,
    };

    info!("initialization complete");

    let mut interval = tokio::time::interval(Duration::from_micros(1_000_000 / tick_hz));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut tick: u64 = 0;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                tick += 1;
                driver.apply(tick, &mut bus);

                bus.publish(EVENT_SYSTICK, &[]);
                bus.drain();

                if tick % HEALTH_QUERY_INTERVAL_TICKS == 0 {
                    bus.publish(APP_EVENT_REQUEST_REDUNDANCY_HEALTH, &[]);
                    bus.drain();
                }

                if max_ticks != 0 && tick >= max_ticks {
                    break;
                }
            }
            _ = &mut ctrl_c => {
                println!();
                break;
            }
        }
    }

    let stats = bus.stats();
    let manager = manager.borrow();
    println!(
        "{} ticks={} published={} dispatched={} dropped={}",
        "bus".bright_white().bold(),
        tick,
        stats.published,
        stats.dispatched,
        stats.dropped
    );
    println!(
        "{} health={:?} active_faults={} total_faults={} log_transport={:?}",
        "final".bright_white().bold(),
        manager.health(),
        manager.active_fault_count(),
        manager.total_faults_since_boot(),
        log_router.borrow().active_transport()
    );
}
