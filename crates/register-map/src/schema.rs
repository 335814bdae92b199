use crate::{
    ByteHalf, DecodeKind, EnumMask, EnumTable, MetricGroup, RegisterError, RegisterSpec, Result,
    VersionPart,
};
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The register map of one controller model. Read-only once built.
#[derive(Debug, Clone)]
pub struct RegisterSchema {
    model: String,
    table: String,
    specs: Vec<RegisterSpec>,
    index: HashMap<String, usize>,
}

impl RegisterSchema {
    /// Build a schema, rejecting duplicate names and inconsistent specs.
    pub fn new(
        model: impl Into<String>,
        table: impl Into<String>,
        specs: Vec<RegisterSpec>,
    ) -> Result<Self> {
        let mut out = Vec::with_capacity(specs.len());
        let mut index = HashMap::with_capacity(specs.len());
        for spec in specs {
            let spec = spec.normalized()?;
            if index.insert(spec.name.clone(), out.len()).is_some() {
                return Err(RegisterError::DuplicateMetric(spec.name));
            }
            out.push(spec);
        }
        Ok(Self {
            model: model.into(),
            table: table.into(),
            specs: out,
            index,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Storage table the persistence side writes this model's rows to.
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn lookup(&self, name: &str) -> Result<&RegisterSpec> {
        self.index
            .get(name)
            .map(|i| &self.specs[*i])
            .ok_or_else(|| RegisterError::UnknownMetric(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All specs in declaration order.
    pub fn specs(&self) -> &[RegisterSpec] {
        &self.specs
    }

    pub fn group(&self, group: MetricGroup) -> impl Iterator<Item = &RegisterSpec> {
        self.specs.iter().filter(move |s| s.group == group)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// Supported controller hardware. Each variant selects a register table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControllerModel {
    /// Renogy Rover Li / Rover Elite (full map).
    RenogyRoverLi,
    /// Early Rover firmware; the subset the first driver generation read.
    RenogyRover,
}

impl ControllerModel {
    pub const ALL: [ControllerModel; 2] = [ControllerModel::RenogyRoverLi, ControllerModel::RenogyRover];

    pub fn as_str(self) -> &'static str {
        match self {
            ControllerModel::RenogyRoverLi => "renogy-rover-li",
            ControllerModel::RenogyRover => "renogy-rover",
        }
    }

    pub fn table_name(self) -> &'static str {
        match self {
            ControllerModel::RenogyRoverLi => "renogy_rover_li",
            ControllerModel::RenogyRover => "renogy_rover",
        }
    }

    pub fn schema(self) -> Result<RegisterSchema> {
        let rows: Vec<RegisterSpec> = match self {
            ControllerModel::RenogyRoverLi => ROVER_LI.iter().map(Row::to_spec).collect(),
            ControllerModel::RenogyRover => ROVER_LI
                .iter()
                .filter(|r| ROVER_LEGACY.contains(&r.name))
                .map(Row::to_spec)
                .collect(),
        };
        RegisterSchema::new(self.as_str(), self.table_name(), rows)
    }
}

impl fmt::Display for ControllerModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControllerModel {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_lowercase().replace('_', "-");
        ControllerModel::ALL
            .into_iter()
            .find(|m| m.as_str() == norm)
            .ok_or_else(|| format!("unknown controller model: {s}"))
    }
}

struct Row {
    name: &'static str,
    address: u16,
    decode: DecodeKind,
    group: MetricGroup,
    volatile: bool,
}

impl Row {
    const fn new(name: &'static str, address: u16, decode: DecodeKind, group: MetricGroup) -> Self {
        Self {
            name,
            address,
            decode,
            group,
            volatile: false,
        }
    }

    const fn volatile(mut self) -> Self {
        self.volatile = true;
        self
    }

    fn to_spec(&self) -> RegisterSpec {
        let spec = RegisterSpec::new(self.name, self.address, self.decode, self.group);
        if self.volatile {
            spec.volatile()
        } else {
            spec
        }
    }
}

use DecodeKind as K;
use MetricGroup as G;

const fn scaled(scale: u16) -> DecodeKind {
    K::ScaledFloat { scale }
}

const fn byte(half: ByteHalf) -> DecodeKind {
    K::UnsignedByte { half }
}

const fn temp(half: ByteHalf) -> DecodeKind {
    K::SignedMagnitude8 { half }
}

// Two-word cumulative counters are passed through raw: their word order is
// unconfirmed on real hardware.
const ROVER_LI: &[Row] = &[
    // controller information, 0x000A..=0x0019
    Row::new("system_voltage", 0x000A, byte(ByteHalf::High), G::ControllerInfo).volatile(),
    Row::new("system_current", 0x000A, byte(ByteHalf::Low), G::ControllerInfo).volatile(),
    Row::new("model", 0x000C, K::Ascii { words: 8 }, G::ControllerInfo),
    Row::new(
        "software_version",
        0x0014,
        K::PackedVersion {
            part: VersionPart::Software,
        },
        G::ControllerInfo,
    ),
    Row::new(
        "hardware_version",
        0x0014,
        K::PackedVersion {
            part: VersionPart::Hardware,
        },
        G::ControllerInfo,
    ),
    Row::new("serial_number", 0x0018, K::PackedSerial, G::ControllerInfo),
    Row::new("controller_temperature", 0x0103, temp(ByteHalf::High), G::ControllerInfo),
    Row::new("controller_faults", 0x0121, K::Raw { words: 2 }, G::ControllerInfo),
    // battery
    Row::new("battery_percentage", 0x0100, byte(ByteHalf::Low), G::Battery),
    Row::new("battery_voltage", 0x0101, scaled(10), G::Battery),
    Row::new("battery_charging_current", 0x0102, scaled(100), G::Battery),
    Row::new("battery_temperature", 0x0103, temp(ByteHalf::Low), G::Battery).volatile(),
    Row::new(
        "charging_status",
        0x0120,
        K::EnumLookup {
            table: EnumTable::ChargingState,
            mask: EnumMask::LowByte,
        },
        G::Battery,
    ),
    Row::new("battery_capacity", 0xE002, K::RawUint, G::Battery),
    Row::new("voltage_setting", 0xE003, byte(ByteHalf::High), G::Battery),
    Row::new("recognized_voltage", 0xE003, byte(ByteHalf::Low), G::Battery),
    Row::new(
        "battery_type",
        0xE004,
        K::EnumLookup {
            table: EnumTable::BatteryType,
            mask: EnumMask::Word,
        },
        G::Battery,
    ),
    // load
    Row::new("load_voltage", 0x0104, scaled(10), G::Load),
    Row::new("load_current", 0x0105, scaled(100), G::Load),
    Row::new("load_power", 0x0106, K::RawUint, G::Load),
    Row::new(
        "load_status",
        0x0120,
        K::Flag {
            half: ByteHalf::High,
            bit: 7,
        },
        G::Load,
    ),
    // solar panel
    Row::new("solar_voltage", 0x0107, scaled(10), G::SolarPanel),
    Row::new("solar_current", 0x0108, scaled(100), G::SolarPanel),
    Row::new("solar_power", 0x0109, K::RawUint, G::SolarPanel),
    // today
    Row::new("battery_min_voltage_today", 0x010B, scaled(10), G::TodayHistorical),
    Row::new("battery_max_voltage_today", 0x010C, scaled(10), G::TodayHistorical),
    Row::new("max_charging_current_today", 0x010D, scaled(100), G::TodayHistorical),
    Row::new("max_discharging_current_today", 0x010E, scaled(100), G::TodayHistorical),
    Row::new("max_charging_power_today", 0x010F, K::RawUint, G::TodayHistorical),
    Row::new("max_discharging_power_today", 0x0110, K::RawUint, G::TodayHistorical),
    Row::new("charging_amp_hours_today", 0x0111, K::RawUint, G::TodayHistorical),
    Row::new("discharging_amp_hours_today", 0x0112, K::RawUint, G::TodayHistorical),
    Row::new("power_generation_today", 0x0113, K::RawUint, G::TodayHistorical),
    Row::new("power_consumption_today", 0x0114, K::RawUint, G::TodayHistorical),
    // lifetime
    Row::new("total_operating_days", 0x0115, K::RawUint, G::LifetimeHistorical),
    Row::new("total_battery_over_discharges", 0x0116, K::RawUint, G::LifetimeHistorical),
    Row::new("total_battery_full_charges", 0x0117, K::RawUint, G::LifetimeHistorical),
    Row::new("total_charging_amp_hours", 0x0118, K::Raw { words: 2 }, G::LifetimeHistorical),
    Row::new("total_discharging_amp_hours", 0x011A, K::Raw { words: 2 }, G::LifetimeHistorical),
    Row::new("cumulative_power_generation", 0x011C, K::Raw { words: 2 }, G::LifetimeHistorical),
    Row::new("cumulative_power_consumption", 0x011E, K::Raw { words: 2 }, G::LifetimeHistorical),
];

const ROVER_LEGACY: &[&str] = &[
    "system_voltage",
    "system_current",
    "model",
    "software_version",
    "hardware_version",
    "serial_number",
    "controller_temperature",
    "battery_percentage",
    "battery_voltage",
    "battery_temperature",
    "charging_status",
    "battery_capacity",
    "voltage_setting",
    "recognized_voltage",
    "battery_type",
    "load_voltage",
    "load_current",
    "load_power",
    "solar_voltage",
    "solar_current",
    "solar_power",
    "charging_amp_hours_today",
    "discharging_amp_hours_today",
    "power_generation_today",
];
