// payload.rs

use std::net::Ipv4Addr;

use serde::{ser::SerializeMap, Serialize, Serializer};
use serde_json::value::RawValue;
use thiserror::Error;

use crate::*;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("temperature {celsius} of {address} is not a JSON number")]
    Temperature { address: DeviceAddress, celsius: f32 },
    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// One acquisition cycle, as published.
/// Fixed header fields first, then one `"<address>": <celsius>` entry per device.
#[derive(Debug)]
pub struct Payload<'a> {
    pub name: &'a str,
    pub ip: Ipv4Addr,
    pub mac: MacAddress,
    temperatures: Vec<(String, Box<RawValue>)>,
}

impl<'a> Payload<'a> {
    pub fn new(
        name: &'a str,
        ip: Ipv4Addr,
        mac: MacAddress,
        readings: &[Reading],
    ) -> Result<Self, PayloadError> {
        let mut temperatures = Vec::with_capacity(readings.len());
        for r in readings {
            let value = RawValue::from_string(format_celsius(r.celsius)).map_err(|_| {
                PayloadError::Temperature {
                    address: r.address,
                    celsius: r.celsius,
                }
            })?;
            temperatures.push((r.address.encode(), value));
        }
        Ok(Self {
            name,
            ip,
            mac,
            temperatures,
        })
    }

    pub fn field_count(&self) -> usize {
        3 + self.temperatures.len()
    }

    pub fn to_json(&self) -> Result<String, PayloadError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl Serialize for Payload<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.field_count()))?;
        map.serialize_entry("name", self.name)?;
        map.serialize_entry("ip", &self.ip.to_string())?;
        map.serialize_entry("mac", &self.mac.to_string())?;
        for (address, celsius) in self.temperatures.iter() {
            map.serialize_entry(address, celsius)?;
        }
        map.end()
    }
}

/// Fixed-point with two fractional digits, never exponent notation.
pub fn format_celsius(celsius: f32) -> String {
    format!("{celsius:.2}")
}

pub fn build(
    name: &str,
    readings: &[Reading],
    ip: Ipv4Addr,
    mac: MacAddress,
) -> Result<String, PayloadError> {
    Payload::new(name, ip, mac, readings)?.to_json()
}


// EOF
