//! Tuning parameter types and their SAT>IP token forms.
//!
//! Every enum here maps one RTSP transport parameter from the SAT>IP
//! query grammar. Parsers are total where the protocol allows it: an
//! unknown token is coerced to the `Auto` variant with a warning (for
//! `fec=`, to `None`) — a malformed parameter never fails a request.
//! `Display` produces the same token the parser accepts, so a parsed
//! parameter set re-serializes to an equivalent query string.

use std::fmt;

/// Delivery system requested with `msys=`.
///
/// Capability checks (`Frontend::capable_of`) and tune dispatch pattern
/// match on this; there is no class hierarchy behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverySystem {
    Dvbs,
    Dvbs2,
    Dvbt,
    Dvbt2,
    Dvbc,
    Dvbc2,
}

impl DeliverySystem {
    /// Parse an `msys=` token. Unknown systems are a hard error upstream
    /// (the stream must refuse what the frontend cannot tune), so this
    /// one returns `None` instead of coercing.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "dvbs" => Some(Self::Dvbs),
            "dvbs2" => Some(Self::Dvbs2),
            "dvbt" => Some(Self::Dvbt),
            "dvbt2" => Some(Self::Dvbt2),
            "dvbc" => Some(Self::Dvbc),
            "dvbc2" => Some(Self::Dvbc2),
            _ => None,
        }
    }

    /// Whether this is a satellite system (needs polarization + DiSEqC).
    pub fn is_satellite(self) -> bool {
        matches!(self, Self::Dvbs | Self::Dvbs2)
    }

    /// Whether this is a terrestrial system.
    pub fn is_terrestrial(self) -> bool {
        matches!(self, Self::Dvbt | Self::Dvbt2)
    }
}

impl fmt::Display for DeliverySystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            Self::Dvbs => "dvbs",
            Self::Dvbs2 => "dvbs2",
            Self::Dvbt => "dvbt",
            Self::Dvbt2 => "dvbt2",
            Self::Dvbc => "dvbc",
            Self::Dvbc2 => "dvbc2",
        };
        f.write_str(token)
    }
}

/// LNB polarization, `pol=h` / `pol=v`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarization {
    Horizontal,
    Vertical,
}

impl Polarization {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "h" => Some(Self::Horizontal),
            "v" => Some(Self::Vertical),
            _ => None,
        }
    }
}

impl fmt::Display for Polarization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Horizontal => "h",
            Self::Vertical => "v",
        })
    }
}

/// Pilot tones, `plts=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pilot {
    On,
    Off,
    Auto,
}

impl Pilot {
    pub fn from_token(token: &str) -> Self {
        match token {
            "on" => Self::On,
            "off" => Self::Off,
            "auto" => Self::Auto,
            other => {
                tracing::warn!(token = other, "unknown pilot tone token, using auto");
                Self::Auto
            }
        }
    }
}

impl fmt::Display for Pilot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::On => "on",
            Self::Off => "off",
            Self::Auto => "auto",
        })
    }
}

/// Roll-off factor, `ro=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollOff {
    R0_35,
    R0_25,
    R0_20,
    Auto,
}

impl RollOff {
    pub fn from_token(token: &str) -> Self {
        match token {
            "0.35" => Self::R0_35,
            "0.25" => Self::R0_25,
            "0.20" => Self::R0_20,
            "auto" => Self::Auto,
            other => {
                tracing::warn!(token = other, "unknown rolloff token, using auto");
                Self::Auto
            }
        }
    }
}

impl fmt::Display for RollOff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::R0_35 => "0.35",
            Self::R0_25 => "0.25",
            Self::R0_20 => "0.20",
            Self::Auto => "auto",
        })
    }
}

/// Inner FEC rate, `fec=`. The token is the rate with the slash removed
/// (`fec=34` is 3/4); `999` means auto, anything else falls back to none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FecCode {
    F1_2,
    F2_3,
    F3_4,
    F3_5,
    F4_5,
    F5_6,
    F6_7,
    F7_8,
    F8_9,
    F9_10,
    Auto,
    None,
}

impl FecCode {
    pub fn from_token(token: &str) -> Self {
        match token {
            "12" => Self::F1_2,
            "23" => Self::F2_3,
            "34" => Self::F3_4,
            "35" => Self::F3_5,
            "45" => Self::F4_5,
            "56" => Self::F5_6,
            "67" => Self::F6_7,
            "78" => Self::F7_8,
            "89" => Self::F8_9,
            "910" => Self::F9_10,
            "999" => Self::Auto,
            other => {
                tracing::warn!(token = other, "unknown FEC token, using none");
                Self::None
            }
        }
    }
}

impl fmt::Display for FecCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::F1_2 => "12",
            Self::F2_3 => "23",
            Self::F3_4 => "34",
            Self::F3_5 => "35",
            Self::F4_5 => "45",
            Self::F5_6 => "56",
            Self::F6_7 => "67",
            Self::F7_8 => "78",
            Self::F8_9 => "89",
            Self::F9_10 => "910",
            Self::Auto => "999",
            Self::None => "none",
        })
    }
}

/// Constellation, `mtype=`. When the request omits it, the stream infers
/// one from the delivery system via [`Modulation::implied_by`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modulation {
    Qpsk,
    Psk8,
    Qam16,
    Qam64,
    Qam256,
    QamAuto,
}

impl Modulation {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "qpsk" => Some(Self::Qpsk),
            "8psk" => Some(Self::Psk8),
            "16qam" => Some(Self::Qam16),
            "64qam" => Some(Self::Qam64),
            "256qam" => Some(Self::Qam256),
            _ => None,
        }
    }

    /// Default modulation for a delivery system when `mtype=` is absent.
    pub fn implied_by(system: DeliverySystem) -> Self {
        match system {
            DeliverySystem::Dvbs => Self::Qpsk,
            DeliverySystem::Dvbs2 => Self::Psk8,
            DeliverySystem::Dvbt
            | DeliverySystem::Dvbt2
            | DeliverySystem::Dvbc
            | DeliverySystem::Dvbc2 => Self::QamAuto,
        }
    }
}

impl fmt::Display for Modulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Qpsk => "qpsk",
            Self::Psk8 => "8psk",
            Self::Qam16 => "16qam",
            Self::Qam64 => "64qam",
            Self::Qam256 => "256qam",
            Self::QamAuto => "auto",
        })
    }
}

/// OFDM transmission mode, `tmode=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmissionMode {
    M1k,
    M2k,
    M4k,
    M8k,
    M16k,
    M32k,
    Auto,
}

impl TransmissionMode {
    pub fn from_token(token: &str) -> Self {
        match token {
            "1k" => Self::M1k,
            "2k" => Self::M2k,
            "4k" => Self::M4k,
            "8k" => Self::M8k,
            "16k" => Self::M16k,
            "32k" => Self::M32k,
            "auto" => Self::Auto,
            other => {
                tracing::warn!(token = other, "unknown transmission mode token, using auto");
                Self::Auto
            }
        }
    }
}

impl fmt::Display for TransmissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::M1k => "1k",
            Self::M2k => "2k",
            Self::M4k => "4k",
            Self::M8k => "8k",
            Self::M16k => "16k",
            Self::M32k => "32k",
            Self::Auto => "auto",
        })
    }
}

/// OFDM guard interval, `gi=`. Token is the fraction with the slash
/// removed (`gi=19128` is 19/128).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardInterval {
    G1_4,
    G1_8,
    G1_16,
    G1_32,
    G1_128,
    G19_128,
    G19_256,
    Auto,
}

impl GuardInterval {
    pub fn from_token(token: &str) -> Self {
        match token {
            "14" => Self::G1_4,
            "18" => Self::G1_8,
            "116" => Self::G1_16,
            "132" => Self::G1_32,
            "1128" => Self::G1_128,
            "19128" => Self::G19_128,
            "19256" => Self::G19_256,
            other => {
                tracing::warn!(token = other, "unknown guard interval token, using auto");
                Self::Auto
            }
        }
    }
}

impl fmt::Display for GuardInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::G1_4 => "14",
            Self::G1_8 => "18",
            Self::G1_16 => "116",
            Self::G1_32 => "132",
            Self::G1_128 => "1128",
            Self::G19_128 => "19128",
            Self::G19_256 => "19256",
            Self::Auto => "auto",
        })
    }
}
