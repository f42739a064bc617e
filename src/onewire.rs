// onewire.rs

use ds18b20::{Ds18b20, Resolution};
use esp_idf_hal::{
    delay::{Ets, FreeRtos},
    gpio::{AnyIOPin, InputOutput, PinDriver, Pull},
};
use log::*;
use one_wire_bus::{Address, OneWire, OneWireError};

use crate::*;

type OneWirePin = PinDriver<'static, AnyIOPin, InputOutput>;

/// DS18B20 sensors on one open-drain GPIO.
pub struct OneWireBus {
    bus: OneWire<OneWirePin>,
    devices: Vec<Address>,
    resolution: Resolution,
}

fn driver_error<E: core::fmt::Debug>(e: OneWireError<E>) -> BusError {
    BusError::Driver(format!("{e:?}"))
}

fn to_resolution(bits: u8) -> Result<Resolution, BusError> {
    match bits {
        9 => Ok(Resolution::Bits9),
        10 => Ok(Resolution::Bits10),
        11 => Ok(Resolution::Bits11),
        12 => Ok(Resolution::Bits12),
        b => Err(BusError::Resolution(b)),
    }
}

impl OneWireBus {
    pub fn new(pin: AnyIOPin) -> anyhow::Result<Self> {
        let mut pin_drv = PinDriver::input_output_od(pin)?;
        pin_drv.set_pull(Pull::Up)?;
        let bus = match OneWire::new(pin_drv) {
            Ok(b) => b,
            Err(e) => anyhow::bail!("Cannot open one-wire bus: {e:?}"),
        };
        Ok(Self {
            bus,
            devices: Vec::new(),
            resolution: Resolution::Bits12,
        })
    }

    fn sensor(address: &DeviceAddress) -> Result<Ds18b20, BusError> {
        let address = Address(u64::from_le_bytes(*address.bytes()));
        Ds18b20::new::<esp_idf_sys::EspError>(address).map_err(driver_error)
    }
}

impl TemperatureBus for OneWireBus {
    fn begin(&mut self) -> Result<(), BusError> {
        self.devices.clear();
        let mut state = None;
        loop {
            match self
                .bus
                .device_search(state.as_ref(), false, &mut Ets)
                .map_err(driver_error)?
            {
                None => break,
                Some((device_address, s)) => {
                    if device_address.family_code() == ds18b20::FAMILY_CODE {
                        self.devices.push(device_address);
                    } else {
                        warn!("Skipping non-DS18B20 device {device_address:?}");
                    }
                    state = Some(s);
                }
            }
        }
        Ok(())
    }

    fn device_count(&self) -> usize {
        self.devices.len()
    }

    fn address_at(&self, index: usize) -> Result<DeviceAddress, BusError> {
        self.devices
            .get(index)
            .map(|a| DeviceAddress::new(a.0.to_le_bytes()))
            .ok_or(BusError::NoDevice(index))
    }

    fn set_resolution(&mut self, address: &DeviceAddress, bits: u8) -> Result<(), BusError> {
        let resolution = to_resolution(bits)?;
        let sensor = Self::sensor(address)?;
        // keep the alarm thresholds already stored on the sensor
        let data = sensor
            .read_data(&mut self.bus, &mut Ets)
            .map_err(driver_error)?;
        if data.resolution != resolution {
            sensor
                .set_config(
                    data.alarm_temp_low,
                    data.alarm_temp_high,
                    resolution,
                    &mut self.bus,
                    &mut Ets,
                )
                .map_err(driver_error)?;
        }
        self.resolution = resolution;
        Ok(())
    }

    fn request_conversions(&mut self) -> Result<(), BusError> {
        ds18b20::start_simultaneous_temp_measurement(&mut self.bus, &mut Ets)
            .map_err(driver_error)?;
        self.resolution.delay_for_measurement_time(&mut FreeRtos);
        Ok(())
    }

    fn temperature_of(&mut self, address: &DeviceAddress) -> f32 {
        let data = Self::sensor(address)
            .and_then(|s| s.read_data(&mut self.bus, &mut Ets).map_err(driver_error));
        match data {
            Ok(d) => d.temperature,
            Err(e) => {
                error!("Reading {address} failed: {e}");
                DEVICE_DISCONNECTED_C
            }
        }
    }
}

// EOF
