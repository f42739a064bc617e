// measure.rs

use embedded_hal::delay::DelayNs;
use log::*;
use thiserror::Error;

use crate::*;

/// Value the bus driver reports for a device that did not answer,
/// usually a disconnected sensor or faulty wiring.
pub const DEVICE_DISCONNECTED_C: f32 = -127.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reading {
    pub address: DeviceAddress,
    pub celsius: f32,
}

impl Reading {
    pub fn new(address: DeviceAddress, celsius: f32) -> Self {
        Self { address, celsius }
    }

    pub fn is_fault(&self) -> bool {
        self.celsius == DEVICE_DISCONNECTED_C || !self.celsius.is_finite()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("no device at bus index {0}")]
    NoDevice(usize),
    #[error("unsupported resolution {0} bits")]
    Resolution(u8),
    #[error("one-wire driver error: {0}")]
    Driver(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AcquireError {
    #[error("sensor {address} returned {celsius}, connection faulty?")]
    Fault { address: DeviceAddress, celsius: f32 },
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// The one-wire temperature bus as seen by the acquisition cycle.
pub trait TemperatureBus {
    /// (Re)initialize the bus and scan for devices.
    fn begin(&mut self) -> Result<(), BusError>;

    /// Devices found by the last `begin()`.
    fn device_count(&self) -> usize;

    fn address_at(&self, index: usize) -> Result<DeviceAddress, BusError>;

    fn set_resolution(&mut self, address: &DeviceAddress, bits: u8) -> Result<(), BusError>;

    /// Start a temperature conversion on every device and wait for it to finish.
    fn request_conversions(&mut self) -> Result<(), BusError>;

    /// Last converted temperature, or [`DEVICE_DISCONNECTED_C`] if the device did not answer.
    fn temperature_of(&mut self, address: &DeviceAddress) -> f32;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BusTiming {
    pub bus_settle_ms: u64,
    pub scan_settle_ms: u64,
    pub device_settle_ms: u64,
}

impl From<&MyConfig> for BusTiming {
    fn from(c: &MyConfig) -> Self {
        Self {
            bus_settle_ms: c.bus_settle_ms,
            scan_settle_ms: c.scan_settle_ms,
            device_settle_ms: c.device_settle_ms,
        }
    }
}

pub struct BusReader<B, D> {
    bus: B,
    delay: D,
    resolution_bits: u8,
    timing: BusTiming,
}

impl<B, D> BusReader<B, D>
where
    B: TemperatureBus,
    D: DelayNs,
{
    pub fn new(bus: B, delay: D, resolution_bits: u8, timing: BusTiming) -> Self {
        Self {
            bus,
            delay,
            resolution_bits,
            timing,
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Rescan the bus, returning addresses in scan order.
    /// The order is not stable across scans.
    pub fn enumerate(&mut self) -> Result<Vec<DeviceAddress>, BusError> {
        self.bus.begin()?;
        settle(&mut self.delay, self.timing.bus_settle_ms);

        let count = self.bus.device_count();
        info!("{count} devices found on one-wire bus");
        settle(&mut self.delay, self.timing.scan_settle_ms);

        let mut addresses = Vec::with_capacity(count);
        for i in 0..count {
            let address = self.bus.address_at(i)?;
            if !address.crc_is_valid() {
                warn!("Sensor {n}: address {address} fails CRC check", n = i + 1);
            }
            addresses.push(address);
        }
        Ok(addresses)
    }

    pub fn read_temperature(&mut self, address: &DeviceAddress) -> Result<Reading, BusError> {
        let step = self.timing.device_settle_ms;

        self.bus.set_resolution(address, self.resolution_bits)?;
        settle(&mut self.delay, step);
        self.bus.request_conversions()?;
        settle(&mut self.delay, step);

        info!("Reading from device {address}");
        settle(&mut self.delay, step);
        Ok(Reading::new(*address, self.bus.temperature_of(address)))
    }

    /// One full pass over the bus. The first fault aborts the pass,
    /// a partial set of readings is never returned.
    pub fn acquire(&mut self) -> Result<Vec<Reading>, AcquireError> {
        let addresses = self.enumerate()?;
        let mut readings = Vec::with_capacity(addresses.len());

        for (i, address) in addresses.iter().enumerate() {
            let reading = self.read_temperature(address)?;
            if reading.is_fault() {
                error!(
                    "Sensor {n}: {address} temperature {t}, sensor connection faulty?",
                    n = i + 1,
                    t = reading.celsius
                );
                return Err(AcquireError::Fault {
                    address: *address,
                    celsius: reading.celsius,
                });
            }
            info!(
                "Sensor {n}: {address} temperature {t:.2}",
                n = i + 1,
                t = reading.celsius
            );
            readings.push(reading);
        }
        Ok(readings)
    }
}

pub(crate) fn settle<D: DelayNs>(delay: &mut D, ms: u64) {
    if ms > 0 {
        delay.delay_ms(u32::try_from(ms).unwrap_or(u32::MAX));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;

    fn reader(bus: FakeBus, time: &VirtualTime) -> BusReader<FakeBus, FakeDelay> {
        BusReader::new(
            bus,
            time.delay(),
            12,
            BusTiming::from(&MyConfig::default()),
        )
    }

    #[test]
    fn test_acquire_reads_every_device_in_scan_order() {
        let time = VirtualTime::new();
        let bus = FakeBus::with_devices(&[(addr(0x3a), 21.37), (addr(0x5b), 19.80)]);
        let mut r = reader(bus, &time);

        let readings = r.acquire().unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0], Reading::new(addr(0x3a), 21.37));
        assert_eq!(readings[1], Reading::new(addr(0x5b), 19.80));
        assert_eq!(r.bus().begin_calls, 1);
    }

    #[test]
    fn test_resolution_applied_to_the_device_being_read() {
        let time = VirtualTime::new();
        let bus = FakeBus::with_devices(&[(addr(0x3a), 21.0), (addr(0x5b), 22.0)]);
        let mut r = reader(bus, &time);
        r.acquire().unwrap();

        assert_eq!(
            r.bus().resolution_log,
            vec![(addr(0x3a), 12), (addr(0x5b), 12)]
        );
        assert_eq!(r.bus().conversion_requests, 2);
    }

    #[test]
    fn test_fault_aborts_remaining_devices() {
        let time = VirtualTime::new();
        let bus = FakeBus::with_devices(&[
            (addr(0x3a), DEVICE_DISCONNECTED_C),
            (addr(0x5b), 19.80),
        ]);
        let mut r = reader(bus, &time);

        let err = r.acquire().unwrap_err();
        assert_eq!(
            err,
            AcquireError::Fault {
                address: addr(0x3a),
                celsius: DEVICE_DISCONNECTED_C
            }
        );
        // second sensor never touched
        assert_eq!(r.bus().read_log, vec![addr(0x3a)]);
    }

    #[test]
    fn test_zero_devices_is_not_an_error() {
        let time = VirtualTime::new();
        let mut r = reader(FakeBus::with_devices(&[]), &time);
        assert!(r.acquire().unwrap().is_empty());
    }

    #[test]
    fn test_bus_error_aborts() {
        let time = VirtualTime::new();
        let mut bus = FakeBus::with_devices(&[(addr(0x3a), 20.0)]);
        bus.fail_conversion = true;
        let mut r = reader(bus, &time);
        assert!(matches!(
            r.acquire(),
            Err(AcquireError::Bus(BusError::Driver(_)))
        ));
    }

    #[test]
    fn test_settle_times_follow_bus_timing() {
        let time = VirtualTime::new();
        let bus = FakeBus::with_devices(&[(addr(0x3a), 20.0), (addr(0x5b), 20.5)]);
        let mut r = reader(bus, &time);
        r.acquire().unwrap();
        // 1000 after begin, 500 after scan, 3 x 100 per device
        assert_eq!(time.now_ms(), 1000 + 500 + 2 * 300);
    }

    #[test]
    fn test_reading_fault_detection() {
        let a = addr(0x01);
        assert!(Reading::new(a, DEVICE_DISCONNECTED_C).is_fault());
        assert!(Reading::new(a, f32::NAN).is_fault());
        assert!(!Reading::new(a, -126.99).is_fault());
        assert!(!Reading::new(a, 85.0).is_fault());
    }
}

// EOF
