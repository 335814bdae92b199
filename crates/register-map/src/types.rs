use crate::RegisterError;
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// Which byte of a 16-bit register a rule reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteHalf {
    /// Bits 8..=15
    High,
    /// Bits 0..=7
    Low,
}

impl ByteHalf {
    pub fn extract(self, word: u16) -> u8 {
        match self {
            ByteHalf::High => (word >> 8) as u8,
            ByteHalf::Low => (word & 0x00FF) as u8,
        }
    }
}

/// Half of the packed four-word version block a metric reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionPart {
    Software,
    Hardware,
}

/// Static code tables for enum-valued registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnumTable {
    BatteryType,
    ChargingState,
}

/// Part of the register holding an enum code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnumMask {
    #[default]
    Word,
    LowByte,
}

impl EnumMask {
    pub fn apply(self, word: u16) -> u16 {
        match self {
            EnumMask::Word => word,
            EnumMask::LowByte => word & 0x00FF,
        }
    }
}

/// How raw register words become a typed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecodeKind {
    /// One word, unsigned.
    RawUint,
    /// One byte of one word, unsigned.
    UnsignedByte { half: ByteHalf },
    /// One byte of one word; bit 7 is a sign flag over a 7-bit magnitude.
    SignedMagnitude8 { half: ByteHalf },
    /// One word divided by a power of ten.
    ScaledFloat { scale: u16 },
    /// Four words: software then hardware `V{major}.{minor}.{patch}`.
    PackedVersion { part: VersionPart },
    /// Two words rendered as concatenated decimal strings.
    PackedSerial,
    /// Two ASCII characters per word, big-endian.
    Ascii { words: u16 },
    /// A single bit of one byte.
    Flag { half: ByteHalf, bit: u8 },
    EnumLookup {
        table: EnumTable,
        #[serde(default)]
        mask: EnumMask,
    },
    /// Words passed through undecoded.
    Raw { words: u16 },
}

impl DecodeKind {
    /// Number of words a response must carry for this rule.
    pub fn word_count(&self) -> u16 {
        match self {
            DecodeKind::RawUint
            | DecodeKind::UnsignedByte { .. }
            | DecodeKind::SignedMagnitude8 { .. }
            | DecodeKind::ScaledFloat { .. }
            | DecodeKind::Flag { .. }
            | DecodeKind::EnumLookup { .. } => 1,
            DecodeKind::PackedSerial => 2,
            DecodeKind::PackedVersion { .. } => 4,
            DecodeKind::Ascii { words } | DecodeKind::Raw { words } => *words,
        }
    }

    /// Digits after the decimal point for `ScaledFloat`, if the scale is a power of ten.
    pub fn decimals(&self) -> Option<u8> {
        match self {
            DecodeKind::ScaledFloat { scale } => scale_decimals(*scale),
            _ => None,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        match self {
            DecodeKind::ScaledFloat { scale } if scale_decimals(*scale).is_none() => {
                Err(format!("scale {scale} is not a power of ten"))
            }
            DecodeKind::Flag { bit, .. } if *bit > 7 => Err(format!("bit {bit} out of range")),
            DecodeKind::Ascii { words: 0 } | DecodeKind::Raw { words: 0 } => {
                Err("word count must be positive".to_string())
            }
            _ => Ok(()),
        }
    }
}

fn scale_decimals(scale: u16) -> Option<u8> {
    match scale {
        1 => Some(0),
        10 => Some(1),
        100 => Some(2),
        1000 => Some(3),
        10000 => Some(4),
        _ => None,
    }
}

/// Named metric groups read together in one snapshot pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricGroup {
    ControllerInfo,
    TodayHistorical,
    LifetimeHistorical,
    Battery,
    Load,
    SolarPanel,
}

impl MetricGroup {
    pub const ALL: [MetricGroup; 6] = [
        MetricGroup::ControllerInfo,
        MetricGroup::TodayHistorical,
        MetricGroup::LifetimeHistorical,
        MetricGroup::Battery,
        MetricGroup::Load,
        MetricGroup::SolarPanel,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MetricGroup::ControllerInfo => "controller-info",
            MetricGroup::TodayHistorical => "today-historical",
            MetricGroup::LifetimeHistorical => "lifetime-historical",
            MetricGroup::Battery => "battery",
            MetricGroup::Load => "load",
            MetricGroup::SolarPanel => "solar-panel",
        }
    }
}

impl fmt::Display for MetricGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricGroup {
    type Err = RegisterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_lowercase().replace('_', "-");
        MetricGroup::ALL
            .into_iter()
            .find(|g| g.as_str() == norm)
            .ok_or_else(|| RegisterError::UnknownGroup(s.to_string()))
    }
}

/// Where one metric lives in the controller address space and how to decode it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSpec {
    pub name: String,
    pub address: u16,
    /// Defaults to the rule's own word count when omitted in a schema file.
    #[serde(default)]
    pub words: u16,
    pub decode: DecodeKind,
    pub group: MetricGroup,
    /// Noisy reads that are retried instead of degraded.
    #[serde(default, skip_serializing_if = "is_false")]
    pub volatile: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl RegisterSpec {
    pub fn new(name: &str, address: u16, decode: DecodeKind, group: MetricGroup) -> Self {
        Self {
            name: name.to_string(),
            address,
            words: decode.word_count(),
            decode,
            group,
            volatile: false,
        }
    }

    pub fn volatile(mut self) -> Self {
        self.volatile = true;
        self
    }

    /// Fill defaults and check the register layout is self-consistent.
    pub(crate) fn normalized(mut self) -> Result<Self, RegisterError> {
        let invalid = |reason: String| RegisterError::InvalidSpec {
            metric: self.name.clone(),
            reason,
        };
        if self.name.trim().is_empty() {
            return Err(invalid("empty metric name".to_string()));
        }
        self.decode.validate().map_err(invalid)?;
        let expected = self.decode.word_count();
        if self.words == 0 {
            self.words = expected;
        } else if self.words != expected {
            return Err(invalid(format!(
                "word count {} does not match rule ({expected})",
                self.words
            )));
        }
        if u32::from(self.address) + u32::from(self.words) > 0x1_0000 {
            return Err(invalid("register block runs past 0xFFFF".to_string()));
        }
        Ok(self)
    }
}
