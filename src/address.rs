// address.rs

use std::{fmt, str::FromStr};

use crc::{Crc, CRC_8_MAXIM_DOW};
use thiserror::Error;

pub const ADDRESS_LEN: usize = 8;
pub const ADDRESS_HEX_LEN: usize = ADDRESS_LEN * 2;

/// DS18B20 family code, the first byte of every DS18B20 ROM code.
pub const FAMILY_DS18B20: u8 = 0x28;

const DALLAS_CRC: Crc<u8> = Crc::<u8>::new(&CRC_8_MAXIM_DOW);

/// 64-bit ROM code of a one-wire device, in bus (LSB first) byte order:
/// family code, 48-bit serial, CRC.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAddress(pub [u8; ADDRESS_LEN]);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressParseError {
    #[error("device address must be {ADDRESS_HEX_LEN} hex digits, got {0}")]
    Length(usize),
    #[error("invalid hex digit in device address at position {0}")]
    Digit(usize),
}

impl DeviceAddress {
    pub const fn new(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    pub fn family_code(&self) -> u8 {
        self.0[0]
    }

    pub fn crc_is_valid(&self) -> bool {
        DALLAS_CRC.checksum(&self.0[..ADDRESS_LEN - 1]) == self.0[ADDRESS_LEN - 1]
    }

    /// Canonical form: every byte as two uppercase hex digits, no separators.
    pub fn encode(&self) -> String {
        encode(self)
    }
}

pub fn encode(address: &DeviceAddress) -> String {
    address.0.iter().map(|b| format!("{b:02X}")).collect()
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.iter() {
            write!(f, "{b:02X}")?;
        }
        Ok(())
    }
}

impl FromStr for DeviceAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != ADDRESS_HEX_LEN {
            return Err(AddressParseError::Length(s.len()));
        }
        // from_str_radix alone would take a leading '+'
        if let Some(pos) = s.bytes().position(|b| !b.is_ascii_hexdigit()) {
            return Err(AddressParseError::Digit(pos));
        }
        let mut bytes = [0u8; ADDRESS_LEN];
        for (i, b) in bytes.iter_mut().enumerate() {
            let pos = i * 2;
            *b = u8::from_str_radix(&s[pos..pos + 2], 16)
                .map_err(|_| AddressParseError::Digit(pos))?;
        }
        Ok(Self(bytes))
    }
}

/// Station MAC of the network interface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MacAddress(pub [u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            m[0], m[1], m[2], m[3], m[4], m[5],
        )
    }
}


// EOF
