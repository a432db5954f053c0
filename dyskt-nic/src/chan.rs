//! Channel specifications.

use core::fmt;
use core::str::FromStr;

use thiserror::Error;

/// Channel width / HT operation mode of a tuning request.
///
/// The textual spellings below are the wire spellings used in control-token
/// parameters and status payloads. They deliberately contain no `-` so that
/// every width survives the `-`-separated parameter list of a `listen` token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChannelWidth {
    NoHt,
    Ht20,
    Ht20Minus,
    Ht20Plus,
    Ht40Minus,
    Ht40Plus,
}

impl ChannelWidth {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelWidth::NoHt => "NOHT",
            ChannelWidth::Ht20 => "HT20",
            ChannelWidth::Ht20Minus => "HT20MINUS",
            ChannelWidth::Ht20Plus => "HT20PLUS",
            ChannelWidth::Ht40Minus => "HT40MINUS",
            ChannelWidth::Ht40Plus => "HT40PLUS",
        }
    }
}

impl fmt::Display for ChannelWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized channel width {0:?}")]
pub struct ParseWidthError(pub String);

impl FromStr for ChannelWidth {
    type Err = ParseWidthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOHT" => Ok(ChannelWidth::NoHt),
            "HT20" => Ok(ChannelWidth::Ht20),
            "HT20MINUS" => Ok(ChannelWidth::Ht20Minus),
            "HT20PLUS" => Ok(ChannelWidth::Ht20Plus),
            "HT40MINUS" => Ok(ChannelWidth::Ht40Minus),
            "HT40PLUS" => Ok(ChannelWidth::Ht40Plus),
            other => Err(ParseWidthError(other.to_string())),
        }
    }
}

/// A tunable channel: number plus width. Comparison is structural, so the
/// same channel number at two widths is two distinct scan entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Channel {
    pub ch: u16,
    pub width: ChannelWidth,
}

impl Channel {
    pub const fn new(ch: u16, width: ChannelWidth) -> Self {
        Self { ch, width }
    }
}

impl fmt::Display for Channel {
    /// Formats as `ch:width`, the payload spelling of status events.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ch, self.width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_round_trips_through_wire_spelling() {
        for w in [
            ChannelWidth::NoHt,
            ChannelWidth::Ht20,
            ChannelWidth::Ht20Minus,
            ChannelWidth::Ht20Plus,
            ChannelWidth::Ht40Minus,
            ChannelWidth::Ht40Plus,
        ] {
            assert_eq!(w.as_str().parse::<ChannelWidth>(), Ok(w));
        }
    }

    #[test]
    fn width_rejects_unknown_spellings() {
        assert!("HT40+".parse::<ChannelWidth>().is_err());
        assert!("ht20".parse::<ChannelWidth>().is_err());
        assert!("".parse::<ChannelWidth>().is_err());
    }

    #[test]
    fn channel_display_uses_colon() {
        let ch = Channel::new(11, ChannelWidth::Ht20);
        assert_eq!(ch.to_string(), "11:HT20");
    }

    #[test]
    fn channel_comparison_is_structural() {
        assert_eq!(
            Channel::new(6, ChannelWidth::NoHt),
            Channel::new(6, ChannelWidth::NoHt)
        );
        assert_ne!(
            Channel::new(6, ChannelWidth::NoHt),
            Channel::new(6, ChannelWidth::Ht40Plus)
        );
    }
}
