//! Hardware addresses.

use core::fmt;
use core::str::FromStr;

use thiserror::Error;

/// A 48-bit IEEE MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const fn octets(self) -> [u8; 6] {
        self.0
    }

    /// True when the locally-administered bit is set, as it is on every
    /// spoofed address this crate generates.
    pub const fn is_local(self) -> bool {
        self.0[0] & 0x02 != 0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed MAC address {0:?}")]
pub struct ParseMacError(pub String);

impl FromStr for MacAddr {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(|| ParseMacError(s.to_string()))?;
            if part.len() != 2 {
                return Err(ParseMacError(s.to_string()));
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| ParseMacError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(ParseMacError(s.to_string()));
        }
        Ok(MacAddr(octets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_formats() {
        let mac: MacAddr = "a0:b1:c2:d3:e4:f5".parse().unwrap();
        assert_eq!(mac.octets(), [0xa0, 0xb1, 0xc2, 0xd3, 0xe4, 0xf5]);
        assert_eq!(mac.to_string(), "a0:b1:c2:d3:e4:f5");
    }

    #[test]
    fn rejects_malformed() {
        assert!("a0:b1:c2:d3:e4".parse::<MacAddr>().is_err());
        assert!("a0:b1:c2:d3:e4:f5:06".parse::<MacAddr>().is_err());
        assert!("a0:b1:c2:d3:e4:zz".parse::<MacAddr>().is_err());
        assert!("a0b1c2d3e4f5".parse::<MacAddr>().is_err());
    }
}
