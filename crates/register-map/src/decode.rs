use crate::{
    ByteHalf, DecodeKind, DecodedValue, EnumMask, EnumTable, FixedPoint, RegisterError, Result,
    VersionPart,
};
use std::collections::BTreeMap;

/// Knobs for lookups that have no single right answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    fallbacks: BTreeMap<EnumTable, String>,
}

impl DecodeOptions {
    /// Label to report when a code is missing from `table`, instead of `None`.
    pub fn with_fallback(mut self, table: EnumTable, label: impl Into<String>) -> Self {
        self.fallbacks.insert(table, label.into());
        self
    }

    pub fn fallback(&self, table: EnumTable) -> Option<&str> {
        self.fallbacks.get(&table).map(String::as_str)
    }
}

/// Decode raw register words with default options.
pub fn decode(raw: &[u16], kind: &DecodeKind) -> Result<DecodedValue> {
    decode_with(raw, kind, &DecodeOptions::default())
}

/// Decode raw register words. Pure; fails when the rule itself is invalid or
/// the word count is wrong.
pub fn decode_with(raw: &[u16], kind: &DecodeKind, opts: &DecodeOptions) -> Result<DecodedValue> {
    kind.validate().map_err(RegisterError::InvalidRule)?;
    let expected = usize::from(kind.word_count());
    if raw.len() != expected {
        return Err(RegisterError::MalformedResponse {
            expected,
            actual: raw.len(),
        });
    }
    let value = match *kind {
        DecodeKind::RawUint => DecodedValue::Int(i64::from(raw[0])),
        DecodeKind::UnsignedByte { half } => DecodedValue::Int(i64::from(half.extract(raw[0]))),
        DecodeKind::SignedMagnitude8 { half } => {
            DecodedValue::Int(i64::from(signed_magnitude(half.extract(raw[0]))))
        }
        DecodeKind::ScaledFloat { scale } => decode_scaled(raw[0], scale)?,
        DecodeKind::PackedVersion { part } => {
            let (software, hardware) = unpack_versions(raw);
            DecodedValue::Text(match part {
                VersionPart::Software => software,
                VersionPart::Hardware => hardware,
            })
        }
        // Observed behavior: no separator and no zero padding between the halves.
        DecodeKind::PackedSerial => DecodedValue::Text(format!("{}{}", raw[0], raw[1])),
        DecodeKind::Ascii { .. } => decode_ascii(raw),
        DecodeKind::Flag { half, bit } => DecodedValue::Bool((half.extract(raw[0]) >> bit) & 1 == 1),
        DecodeKind::EnumLookup { table, mask } => decode_enum(raw[0], table, mask, opts),
        DecodeKind::Raw { .. } => DecodedValue::Words(raw.to_vec()),
    };
    Ok(value)
}

/// Both halves of the packed version block: `(software, hardware)`.
pub fn decode_versions(raw: &[u16]) -> Result<(String, String)> {
    if raw.len() != 4 {
        return Err(RegisterError::MalformedResponse {
            expected: 4,
            actual: raw.len(),
        });
    }
    Ok(unpack_versions(raw))
}

fn unpack_versions(raw: &[u16]) -> (String, String) {
    let fmt = |major: u16, minor_patch: u16| {
        format!(
            "V{}.{}.{}",
            ByteHalf::Low.extract(major),
            ByteHalf::High.extract(minor_patch),
            ByteHalf::Low.extract(minor_patch)
        )
    };
    (fmt(raw[0], raw[1]), fmt(raw[2], raw[3]))
}

/// Sign flag in bit 7, magnitude in bits 0..=6. Not two's complement.
fn signed_magnitude(byte: u8) -> i16 {
    let magnitude = i16::from(byte & 0x7F);
    if byte & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

fn decode_scaled(word: u16, scale: u16) -> Result<DecodedValue> {
    let decimals = DecodeKind::ScaledFloat { scale }
        .decimals()
        .ok_or_else(|| RegisterError::InvalidRule(format!("scale {scale} is not a power of ten")))?;
    Ok(DecodedValue::Decimal(FixedPoint::new(i64::from(word), decimals)))
}

fn decode_ascii(raw: &[u16]) -> DecodedValue {
    let bytes: Vec<u8> = raw
        .iter()
        .flat_map(|w| w.to_be_bytes())
        .filter(|b| b.is_ascii_graphic() || *b == b' ')
        .collect();
    let text = String::from_utf8_lossy(&bytes).trim().to_string();
    if text.is_empty() {
        DecodedValue::None
    } else {
        DecodedValue::Text(text)
    }
}

fn decode_enum(word: u16, table: EnumTable, mask: EnumMask, opts: &DecodeOptions) -> DecodedValue {
    let code = mask.apply(word);
    match table.label(code) {
        Some(label) => DecodedValue::Text(label.to_string()),
        None => match opts.fallback(table) {
            Some(label) => DecodedValue::Text(label.to_string()),
            None => DecodedValue::None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sm(byte: u8) -> i64 {
        decode(
            &[u16::from(byte)],
            &DecodeKind::SignedMagnitude8 {
                half: ByteHalf::Low,
            },
        )
        .unwrap()
        .as_i64()
        .unwrap()
    }

    #[test]
    fn raw_uint_is_full_word() {
        assert_eq!(
            decode(&[0xFFFF], &DecodeKind::RawUint).unwrap(),
            DecodedValue::Int(65535)
        );
    }

    #[test]
    fn signed_magnitude_table() {
        assert_eq!(sm(0x00), 0);
        assert_eq!(sm(0x7F), 127);
        assert_eq!(sm(0x80), 0);
        assert_eq!(sm(0xFF), -127);
        assert_eq!(sm(0x8A), -10);
        assert_eq!(sm(0x19), 25);
    }

    #[test]
    fn signed_magnitude_picks_requested_half() {
        // controller 0x9E (-30) in the high byte, battery 0x14 (20) in the low byte
        let word = 0x9E14;
        let hi = decode(
            &[word],
            &DecodeKind::SignedMagnitude8 {
                half: ByteHalf::High,
            },
        )
        .unwrap();
        let lo = decode(
            &[word],
            &DecodeKind::SignedMagnitude8 {
                half: ByteHalf::Low,
            },
        )
        .unwrap();
        assert_eq!(hi, DecodedValue::Int(-30));
        assert_eq!(lo, DecodedValue::Int(20));
    }

    #[test]
    fn scaled_values_are_exact() {
        let volts = decode(&[101], &DecodeKind::ScaledFloat { scale: 10 }).unwrap();
        assert_eq!(volts.as_f64(), Some(10.1));
        assert_eq!(volts.to_string(), "10.1");
        let amps = decode(&[250], &DecodeKind::ScaledFloat { scale: 100 }).unwrap();
        assert_eq!(amps.as_f64(), Some(2.5));
        assert_eq!(amps.to_string(), "2.50");
    }

    #[test]
    fn packed_version_halves() {
        let raw = [0x0001, 0x0203, 0x0004, 0x0506];
        assert_eq!(
            decode_versions(&raw).unwrap(),
            ("V1.2.3".to_string(), "V4.5.6".to_string())
        );
        let hw = decode(
            &raw,
            &DecodeKind::PackedVersion {
                part: VersionPart::Hardware,
            },
        )
        .unwrap();
        assert_eq!(hw.as_str(), Some("V4.5.6"));
        // high byte of the major words is ignored
        let sw = decode(
            &[0xFF01, 0x0203, 0, 0],
            &DecodeKind::PackedVersion {
                part: VersionPart::Software,
            },
        )
        .unwrap();
        assert_eq!(sw.as_str(), Some("V1.2.3"));
    }

    #[test]
    fn packed_serial_concatenates() {
        let v = decode(&[1803, 27], &DecodeKind::PackedSerial).unwrap();
        assert_eq!(v.as_str(), Some("180327"));
    }

    #[test]
    fn enum_lookup_hits_and_misses() {
        let kind = DecodeKind::EnumLookup {
            table: EnumTable::BatteryType,
            mask: EnumMask::Word,
        };
        assert_eq!(decode(&[4], &kind).unwrap().as_str(), Some("lithium"));
        assert!(decode(&[9], &kind).unwrap().is_none());
    }

    #[test]
    fn enum_lookup_low_byte_mask() {
        let kind = DecodeKind::EnumLookup {
            table: EnumTable::ChargingState,
            mask: EnumMask::LowByte,
        };
        assert_eq!(decode(&[0x8002], &kind).unwrap().as_str(), Some("mppt"));
    }

    #[test]
    fn enum_fallback_is_opt_in() {
        let kind = DecodeKind::EnumLookup {
            table: EnumTable::ChargingState,
            mask: EnumMask::LowByte,
        };
        assert!(decode(&[0x0042], &kind).unwrap().is_none());
        let opts = DecodeOptions::default().with_fallback(EnumTable::ChargingState, "deactivated");
        assert_eq!(
            decode_with(&[0x0042], &kind, &opts).unwrap().as_str(),
            Some("deactivated")
        );
        // other tables are unaffected
        let battery = DecodeKind::EnumLookup {
            table: EnumTable::BatteryType,
            mask: EnumMask::Word,
        };
        assert!(decode_with(&[9], &battery, &opts).unwrap().is_none());
    }

    #[test]
    fn ascii_model_string() {
        // "  RNG-CTRL-RVR40" padded
        let words = [
            0x2020, 0x524E, 0x472D, 0x4354, 0x524C, 0x2D52, 0x5652, 0x3430,
        ];
        let v = decode(&words, &DecodeKind::Ascii { words: 8 }).unwrap();
        assert_eq!(v.as_str(), Some("RNG-CTRL-RVR40"));
        let blank = decode(&[0, 0], &DecodeKind::Ascii { words: 2 }).unwrap();
        assert!(blank.is_none());
    }

    #[test]
    fn flag_bit() {
        let kind = DecodeKind::Flag {
            half: ByteHalf::High,
            bit: 7,
        };
        assert_eq!(decode(&[0x8002], &kind).unwrap(), DecodedValue::Bool(true));
        assert_eq!(decode(&[0x0002], &kind).unwrap(), DecodedValue::Bool(false));
    }

    #[test]
    fn raw_passes_through() {
        let v = decode(&[0, 12], &DecodeKind::Raw { words: 2 }).unwrap();
        assert_eq!(v, DecodedValue::Words(vec![0, 12]));
    }

    #[test]
    fn out_of_range_flag_bit_is_an_error() {
        let kind = DecodeKind::Flag {
            half: ByteHalf::Low,
            bit: 8,
        };
        assert!(matches!(
            decode(&[1], &kind),
            Err(RegisterError::InvalidRule(_))
        ));
    }

    #[test]
    fn non_decimal_scale_is_an_error() {
        let err = decode(&[250], &DecodeKind::ScaledFloat { scale: 4 }).unwrap_err();
        assert!(matches!(err, RegisterError::InvalidRule(_)));
        assert!(err.is_fatal());
        assert!(decode(&[], &DecodeKind::Raw { words: 0 }).is_err());
    }

    #[test]
    fn wrong_word_count_is_malformed() {
        let err = decode(&[1, 2, 3], &DecodeKind::PackedSerial).unwrap_err();
        assert_eq!(
            err,
            RegisterError::MalformedResponse {
                expected: 2,
                actual: 3
            }
        );
        assert!(decode(&[], &DecodeKind::RawUint).is_err());
        assert!(decode_versions(&[1, 2]).is_err());
    }

    #[test]
    fn decode_is_total_for_documented_lengths() {
        let kinds = [
            DecodeKind::RawUint,
            DecodeKind::UnsignedByte {
                half: ByteHalf::High,
            },
            DecodeKind::SignedMagnitude8 {
                half: ByteHalf::Low,
            },
            DecodeKind::ScaledFloat { scale: 100 },
            DecodeKind::PackedVersion {
                part: VersionPart::Software,
            },
            DecodeKind::PackedSerial,
            DecodeKind::Ascii { words: 3 },
            DecodeKind::Flag {
                half: ByteHalf::Low,
                bit: 0,
            },
            DecodeKind::EnumLookup {
                table: EnumTable::ChargingState,
                mask: EnumMask::LowByte,
            },
            DecodeKind::Raw { words: 2 },
        ];
        for kind in &kinds {
            for fill in [0u16, 1, 0x7FFF, 0x8000, 0xFFFF] {
                let raw = vec![fill; usize::from(kind.word_count())];
                let a = decode(&raw, kind).unwrap();
                let b = decode(&raw, kind).unwrap();
                assert_eq!(a, b, "{kind:?} not deterministic");
            }
        }
    }
}
