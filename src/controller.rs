// controller.rs

use std::time::Instant;

use embedded_hal::delay::DelayNs;
use log::*;

use crate::{measure::settle, *};

/// Milliseconds since some fixed point, monotonic.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

pub struct SystemClock {
    boot: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            boot: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.boot.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Ready,
    Acquiring,
    Publishing,
}

#[derive(Debug)]
pub enum CycleOutcome {
    NotDue,
    Published { devices: usize },
    Aborted(AcquireError),
    PayloadFailed(PayloadError),
    PublishFailed(ConnectivityError),
}

/// Everything the firmware owns: the connectivity state machine, the
/// sensor bus and the cadence timer. Nothing lives in globals.
pub struct Station<L, S, B, D, C> {
    name: String,
    publish_topic: String,
    publish_interval_ms: u64,
    loop_idle_ms: u64,
    connectivity: ConnectivityManager<L, S, D>,
    reader: BusReader<B, D>,
    delay: D,
    clock: C,
    last_cycle_ms: Option<u64>,
    phase: CyclePhase,
}

impl<L, S, B, D, C> Station<L, S, B, D, C>
where
    L: NetworkLink,
    S: MessageSession,
    B: TemperatureBus,
    D: DelayNs + Clone,
    C: Clock,
{
    pub fn new(config: &MyConfig, link: L, session: S, bus: B, delay: D, clock: C) -> Self {
        Self {
            name: config.name.clone(),
            publish_topic: config.publish_topic.clone(),
            publish_interval_ms: config.publish_interval_ms,
            loop_idle_ms: config.loop_idle_ms,
            connectivity: ConnectivityManager::new(link, session, delay.clone(), config.into()),
            reader: BusReader::new(bus, delay.clone(), config.resolution_bits, config.into()),
            delay,
            clock,
            last_cycle_ms: None,
            phase: CyclePhase::Idle,
        }
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn connectivity(&self) -> &ConnectivityManager<L, S, D> {
        &self.connectivity
    }

    pub fn connectivity_mut(&mut self) -> &mut ConnectivityManager<L, S, D> {
        &mut self.connectivity
    }

    pub fn bus_mut(&mut self) -> &mut B {
        self.reader.bus_mut()
    }

    fn cycle_due(&self, now_ms: u64) -> bool {
        match self.last_cycle_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.publish_interval_ms,
        }
    }

    /// One pass of the main loop. Blocks while connectivity is being
    /// restored; errors only when a retry ceiling is configured and hit.
    pub fn tick(&mut self) -> Result<CycleOutcome, ConnectivityError> {
        self.phase = CyclePhase::Idle;

        if !self.connectivity.link_is_up() {
            self.connectivity.ensure_link()?;
        }
        if !self.connectivity.session_is_up() {
            self.connectivity.ensure_session()?;
        }
        self.connectivity.pump_session();
        self.phase = CyclePhase::Ready;

        let now = self.clock.now_ms();
        if !self.cycle_due(now) {
            return Ok(CycleOutcome::NotDue);
        }
        // a faulted cycle waits for the next tick too
        self.last_cycle_ms = Some(now);

        let outcome = self.run_cycle();
        self.phase = CyclePhase::Idle;
        Ok(outcome)
    }

    fn run_cycle(&mut self) -> CycleOutcome {
        self.phase = CyclePhase::Acquiring;
        let readings = match self.reader.acquire() {
            Ok(r) => r,
            Err(e) => {
                error!("Cycle aborted, nothing published: {e}");
                return CycleOutcome::Aborted(e);
            }
        };

        self.phase = CyclePhase::Publishing;
        let ip = self.connectivity.local_address();
        let mac = self.connectivity.hardware_address();
        let json = match crate::payload::build(&self.name, &readings, ip, mac) {
            Ok(j) => j,
            Err(e) => {
                error!("Payload error: {e}");
                return CycleOutcome::PayloadFailed(e);
            }
        };

        match self.connectivity.publish(&self.publish_topic, json.as_bytes()) {
            Ok(()) => {
                info!("MQTT sent to {}: {json}", self.publish_topic);
                CycleOutcome::Published {
                    devices: readings.len(),
                }
            }
            Err(e) => {
                error!("MQTT send error: {e}");
                CycleOutcome::PublishFailed(e)
            }
        }
    }

    pub fn run(&mut self) -> ! {
        info!("Entering main loop...");
        loop {
            if let Err(e) = self.tick() {
                error!("Main loop: {e}");
            }
            // lets the idle task feed the watchdog
            settle(&mut self.delay, self.loop_idle_ms);
        }
    }
}


// EOF
