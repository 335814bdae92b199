use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Exact decimal: `units / 10^decimals`.
///
/// Scaled register values are kept in this form so that `10.1` stays `10.1`
/// all the way to storage; [`FixedPoint::to_f64`] is for presentation only.
#[derive(Clone, Copy, Debug)]
pub struct FixedPoint {
    units: i64,
    decimals: u8,
}

impl FixedPoint {
    pub const MAX_DECIMALS: u8 = 9;

    pub fn new(units: i64, decimals: u8) -> Self {
        Self {
            units,
            decimals: decimals.min(Self::MAX_DECIMALS),
        }
    }

    pub fn units(&self) -> i64 {
        self.units
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    pub fn to_f64(&self) -> f64 {
        // One correctly rounded division, so 101 / 10 yields the same f64 as the literal 10.1.
        self.units as f64 / 10f64.powi(i32::from(self.decimals))
    }

    fn scaled_to(&self, decimals: u8) -> i128 {
        i128::from(self.units) * 10i128.pow(u32::from(decimals.saturating_sub(self.decimals)))
    }
}

impl PartialEq for FixedPoint {
    fn eq(&self, other: &Self) -> bool {
        let d = self.decimals.max(other.decimals);
        self.scaled_to(d) == other.scaled_to(d)
    }
}

impl Eq for FixedPoint {}

impl fmt::Display for FixedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.decimals == 0 {
            return write!(f, "{}", self.units);
        }
        let div = 10u64.pow(u32::from(self.decimals));
        let abs = self.units.unsigned_abs();
        let sign = if self.units < 0 { "-" } else { "" };
        write!(
            f,
            "{sign}{int}.{frac:0width$}",
            int = abs / div,
            frac = abs % div,
            width = usize::from(self.decimals)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFixedPointError(String);

impl fmt::Display for ParseFixedPointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid decimal: {}", self.0)
    }
}

impl std::error::Error for ParseFixedPointError {}

impl FromStr for FixedPoint {
    type Err = ParseFixedPointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        let err = || ParseFixedPointError(t.to_string());
        let (neg, body) = match t.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, t),
        };
        let (int, frac) = body.split_once('.').unwrap_or((body, ""));
        if int.is_empty() && frac.is_empty() {
            return Err(err());
        }
        if frac.len() > usize::from(Self::MAX_DECIMALS)
            || !int.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit())
        {
            return Err(err());
        }
        let digits = format!("{int}{frac}");
        let mag = digits.parse::<i64>().map_err(|_| err())?;
        let units = if neg { -mag } else { mag };
        Ok(Self::new(units, frac.len() as u8))
    }
}

/// Stored form: integer units and decimal places, so `2.50` reloads as `2.50`.
#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct FixedPointRepr {
    units: i64,
    decimals: u8,
}

impl Serialize for FixedPoint {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        FixedPointRepr {
            units: self.units,
            decimals: self.decimals,
        }
        .serialize(s)
    }
}

impl<'de> Deserialize<'de> for FixedPoint {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let repr = FixedPointRepr::deserialize(d)?;
        if repr.decimals > Self::MAX_DECIMALS {
            return Err(serde::de::Error::custom(format!(
                "too many decimal places: {}",
                repr.decimals
            )));
        }
        Ok(Self::new(repr.units, repr.decimals))
    }
}

/// A decoded register value.
///
/// `None` means the sensor or feature is unsupported, the code was not in
/// its lookup table, or the read failed. It is an expected value and flows
/// into snapshots like any other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DecodedValue {
    None,
    Bool(bool),
    Int(i64),
    Decimal(FixedPoint),
    Text(String),
    Words(Vec<u16>),
}

impl DecodedValue {
    pub fn is_none(&self) -> bool {
        matches!(self, DecodedValue::None)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DecodedValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DecodedValue::Int(v) => Some(*v as f64),
            DecodedValue::Decimal(d) => Some(d.to_f64()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DecodedValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DecodedValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedValue::None => f.write_str("-"),
            DecodedValue::Bool(b) => write!(f, "{}", if *b { "on" } else { "off" }),
            DecodedValue::Int(v) => write!(f, "{v}"),
            DecodedValue::Decimal(d) => write!(f, "{d}"),
            DecodedValue::Text(s) => f.write_str(s),
            DecodedValue::Words(words) => {
                let mut first = true;
                for w in words {
                    if !first {
                        f.write_str(",")?;
                    }
                    write!(f, "{w}")?;
                    first = false;
                }
                Ok(())
            }
        }
    }
}
