// testutil.rs
//
// In-memory stand-ins for the WiFi, MQTT and one-wire drivers.
// Delays advance a shared virtual time base instead of sleeping.

use std::{cell::Cell, collections::VecDeque, net::Ipv4Addr, rc::Rc};

use crc::{Crc, CRC_8_MAXIM_DOW};
use embedded_hal::delay::DelayNs;

use crate::*;

/// DS18B20 address with a valid CRC, distinguished by one serial byte.
pub fn addr(serial: u8) -> DeviceAddress {
    let mut bytes = [FAMILY_DS18B20, serial, 0x11, 0x22, 0x33, 0x44, 0x55, 0];
    bytes[7] = Crc::<u8>::new(&CRC_8_MAXIM_DOW).checksum(&bytes[..7]);
    DeviceAddress::new(bytes)
}

#[derive(Clone, Default)]
pub struct VirtualTime(Rc<Cell<u64>>);

impl VirtualTime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delay(&self) -> FakeDelay {
        FakeDelay(self.clone())
    }

    pub fn clock(&self) -> FakeClock {
        FakeClock(self.clone())
    }

    pub fn now_ms(&self) -> u64 {
        self.0.get() / 1_000_000
    }

    pub fn advance_ms(&self, ms: u64) {
        self.0.set(self.0.get() + ms * 1_000_000);
    }
}

#[derive(Clone)]
pub struct FakeDelay(VirtualTime);

impl DelayNs for FakeDelay {
    fn delay_ns(&mut self, ns: u32) {
        let t = &self.0 .0;
        t.set(t.get() + u64::from(ns));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.0.advance_ms(u64::from(ms));
    }
}

pub struct FakeClock(VirtualTime);

impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        self.0.now_ms()
    }
}

#[derive(Default)]
pub struct FakeBus {
    devices: Vec<(DeviceAddress, f32)>,
    scanned: usize,
    pub fail_conversion: bool,
    pub begin_calls: usize,
    pub conversion_requests: usize,
    pub resolution_log: Vec<(DeviceAddress, u8)>,
    pub read_log: Vec<DeviceAddress>,
}

impl FakeBus {
    pub fn with_devices(devices: &[(DeviceAddress, f32)]) -> Self {
        Self {
            devices: devices.to_vec(),
            ..Default::default()
        }
    }

    /// Takes effect at the next `begin()`, like a rewired bus.
    pub fn set_devices(&mut self, devices: &[(DeviceAddress, f32)]) {
        self.devices = devices.to_vec();
    }
}

impl TemperatureBus for FakeBus {
    fn begin(&mut self) -> Result<(), BusError> {
        self.begin_calls += 1;
        self.scanned = self.devices.len();
        Ok(())
    }

    fn device_count(&self) -> usize {
        self.scanned
    }

    fn address_at(&self, index: usize) -> Result<DeviceAddress, BusError> {
        if index >= self.scanned {
            return Err(BusError::NoDevice(index));
        }
        self.devices
            .get(index)
            .map(|(a, _)| *a)
            .ok_or(BusError::NoDevice(index))
    }

    fn set_resolution(&mut self, address: &DeviceAddress, bits: u8) -> Result<(), BusError> {
        self.resolution_log.push((*address, bits));
        Ok(())
    }

    fn request_conversions(&mut self) -> Result<(), BusError> {
        if self.fail_conversion {
            return Err(BusError::Driver("bus stuck low".into()));
        }
        self.conversion_requests += 1;
        Ok(())
    }

    fn temperature_of(&mut self, address: &DeviceAddress) -> f32 {
        self.read_log.push(*address);
        self.devices
            .iter()
            .find(|(a, _)| a == address)
            .map(|(_, t)| *t)
            .unwrap_or(DEVICE_DISCONNECTED_C)
    }
}

pub struct FakeLink {
    connect_after: usize,
    connected: bool,
    pub connect_calls: usize,
}

impl FakeLink {
    /// Link comes up on the `n`th connect call.
    pub fn connects_after(n: usize) -> Self {
        Self {
            connect_after: n,
            connected: false,
            connect_calls: 0,
        }
    }

    pub fn drop_link(&mut self) {
        self.connected = false;
    }
}

impl NetworkLink for FakeLink {
    fn connect(&mut self, _ssid: &str, _password: &str) -> Result<(), LinkError> {
        self.connect_calls += 1;
        if self.connect_calls >= self.connect_after {
            self.connected = true;
            Ok(())
        } else {
            Err(LinkError::Driver("no AP in range".into()))
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn local_address(&self) -> Ipv4Addr {
        if self.connected {
            Ipv4Addr::new(192, 168, 1, 42)
        } else {
            Ipv4Addr::UNSPECIFIED
        }
    }

    fn hardware_address(&self) -> MacAddress {
        MacAddress([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff])
    }
}

pub struct FakeSession {
    accept_after: usize,
    connected: bool,
    generation: u32,
    inbox: VecDeque<InboundMessage>,
    pub failing_subscribes: usize,
    pub drop_on_next_poll: bool,
    pub connect_calls: usize,
    pub client_ids: Vec<String>,
    pub subscriptions: Vec<String>,
    pub published: Vec<(String, String)>,
}

impl FakeSession {
    pub fn new() -> Self {
        Self::accepts_after(1)
    }

    /// Broker accepts the `n`th connect call.
    pub fn accepts_after(n: usize) -> Self {
        Self {
            accept_after: n,
            connected: false,
            generation: 0,
            inbox: VecDeque::new(),
            failing_subscribes: 0,
            drop_on_next_poll: false,
            connect_calls: 0,
            client_ids: Vec::new(),
            subscriptions: Vec::new(),
            published: Vec::new(),
        }
    }

    pub fn drop_session(&mut self) {
        self.connected = false;
        self.subscriptions.clear();
    }

    /// Broker connection replaced while the status stays up, as the ESP
    /// client does when it reconnects by itself. Subscriptions are lost.
    pub fn reconnect_silently(&mut self) {
        self.generation += 1;
        self.subscriptions.clear();
    }

    pub fn deliver(&mut self, topic: &str, payload: &[u8]) {
        self.inbox.push_back(InboundMessage {
            topic: topic.into(),
            payload: payload.to_vec(),
        });
    }
}

impl MessageSession for FakeSession {
    fn connect(&mut self, client_id: &str) -> Result<(), SessionError> {
        self.connect_calls += 1;
        self.client_ids.push(client_id.into());
        if self.connect_calls >= self.accept_after {
            if !self.connected {
                self.generation += 1;
            }
            self.connected = true;
            Ok(())
        } else {
            Err(SessionError::Refused("rc=-2".into()))
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), SessionError> {
        if self.failing_subscribes > 0 {
            self.failing_subscribes -= 1;
            return Err(SessionError::Subscribe {
                topic: topic.into(),
                reason: "not authorized".into(),
            });
        }
        self.subscriptions.push(topic.into());
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), SessionError> {
        if !self.connected {
            return Err(SessionError::NotConnected);
        }
        self.published
            .push((topic.into(), String::from_utf8_lossy(payload).into_owned()));
        Ok(())
    }

    fn poll(&mut self) -> Option<InboundMessage> {
        let msg = self.inbox.pop_front();
        if msg.is_none() && self.drop_on_next_poll {
            self.drop_on_next_poll = false;
            self.connected = false;
        }
        msg
    }

    fn connection_generation(&self) -> u32 {
        self.generation
    }
}

// EOF
