//! Radio configuration.
//!
//! The configuration dictionary is produced by the Supervisor's loader; this
//! module only models and validates it.

use std::time::Duration;

use thiserror::Error;

use dyskt_nic::{Channel, HwAddr};

/// Configuration of one radio controller.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RadioConfig {
    /// Role this radio plays for the Supervisor (reconnaissance, collection).
    pub role: String,
    /// Physical NIC to take over.
    pub nic: String,
    /// Time to stay on each channel before hopping.
    pub dwell: Duration,
    /// Requested scan pattern. Filtered against card capabilities and `pass`
    /// at setup.
    pub scan: Vec<Channel>,
    /// Channels to skip even if scannable.
    #[cfg_attr(feature = "serde", serde(default))]
    pub pass: Vec<Channel>,
    /// Preferred first channel. Falls back to the head of the filtered
    /// pattern when absent or filtered out.
    #[cfg_attr(feature = "serde", serde(default))]
    pub scan_start: Option<Channel>,
    /// Start in the paused state.
    #[cfg_attr(feature = "serde", serde(default))]
    pub paused: bool,
    /// Replace the hardware address before monitoring.
    #[cfg_attr(feature = "serde", serde(default))]
    pub spoofed: Option<HwAddr>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub antennas: AntennaConfig,
    #[cfg_attr(feature = "serde", serde(default))]
    pub desc: String,
}

/// Antenna block as it appears in the configuration dictionary: a count and
/// parallel per-antenna lists.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AntennaConfig {
    pub num: usize,
    #[cfg_attr(feature = "serde", serde(rename = "type", default))]
    pub kind: Vec<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub gain: Vec<f64>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub loss: Vec<f64>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub xyz: Vec<(f64, f64, f64)>,
}

impl AntennaConfig {
    /// Checks the parallel lists against `num` and folds them into one
    /// record per antenna. `num == 0` requires all lists empty.
    pub fn validate(&self) -> Result<Vec<Antenna>, ConfigError> {
        for (field, len) in [
            ("type", self.kind.len()),
            ("gain", self.gain.len()),
            ("loss", self.loss.len()),
            ("xyz", self.xyz.len()),
        ] {
            if len != self.num {
                return Err(ConfigError::Antennas(format!(
                    "{field} has {len} entries for {} antennas",
                    self.num
                )));
            }
        }
        Ok((0..self.num)
            .map(|i| Antenna {
                kind: self.kind[i].clone(),
                gain: self.gain[i],
                loss: self.loss[i],
                xyz: self.xyz[i],
            })
            .collect())
    }
}

/// One physical antenna on the radio.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Antenna {
    pub kind: String,
    pub gain: f64,
    pub loss: f64,
    pub xyz: (f64, f64, f64),
}

/// Configuration rejected at setup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{role}: {nic}: not found")]
    NicNotFound { role: String, nic: String },
    #[error("{role}: error getting interfaces for {nic}")]
    NoInterfaces { role: String, nic: String },
    #[error("empty scan pattern")]
    EmptyScanPattern,
    #[error("dwell must be positive")]
    Dwell,
    #[error("antenna block: {0}")]
    Antennas(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_antenna_block_is_valid() {
        assert_eq!(AntennaConfig::default().validate().unwrap(), vec![]);
    }

    #[test]
    fn antenna_lists_fold_per_antenna() {
        let cfg = AntennaConfig {
            num: 2,
            kind: vec!["omni".to_string(), "panel".to_string()],
            gain: vec![2.14, 9.0],
            loss: vec![0.5, 1.0],
            xyz: vec![(0.0, 0.0, 1.0), (1.0, 0.0, 1.5)],
        };
        let antennas = cfg.validate().unwrap();
        assert_eq!(antennas.len(), 2);
        assert_eq!(antennas[1].kind, "panel");
        assert_eq!(antennas[1].gain, 9.0);
        assert_eq!(antennas[1].xyz, (1.0, 0.0, 1.5));
    }

    #[test]
    fn mismatched_antenna_lists_are_rejected() {
        let cfg = AntennaConfig {
            num: 2,
            kind: vec!["omni".to_string(), "panel".to_string()],
            gain: vec![2.14],
            loss: vec![0.5, 1.0],
            xyz: vec![(0.0, 0.0, 1.0), (1.0, 0.0, 1.5)],
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Antennas(_))));
    }
}
