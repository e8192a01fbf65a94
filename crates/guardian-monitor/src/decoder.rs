//! Sensor datagram decoder.
//!
//! # Wire format
//!
//! One UTF-8 line per datagram, comma-separated, at least 11 fields:
//!
//! ```text
//! Index  Field    Type
//! -----  -------  -----
//! 0      ax       float
//! 1      ay       float
//! 2      az       float
//! 3      gx       float
//! 4      gy       float
//! 5      gz       float
//! 6      light    float
//! 7      battery  integer
//! 8      sos      integer (0 none, 1 raised, 2 false-positive ack)
//! 9      lat      float
//! 10     lon      float
//! ```
//!
//! Float columns must be finite: `nan`, `inf` and friends are rejected like
//! any other unparseable value. Extra trailing fields are ignored. A frame either decodes completely or
//! returns a [`DecodeError`]; nothing is recovered from a partial frame.

use std::str::FromStr;

use crate::error::DecodeError;
use crate::sample::Sample;

/// Number of fields the wire format requires.
pub const FIELD_COUNT: usize = 11;

const FIELD_NAMES: [&str; FIELD_COUNT] = [
    "ax", "ay", "az", "gx", "gy", "gz", "light", "battery", "sos", "lat", "lon",
];

/// Decoder for comma-separated sensor datagrams.
pub struct SampleDecoder;

impl SampleDecoder {
    /// Decode one datagram payload.
    pub fn decode(payload: &[u8]) -> Result<Sample, DecodeError> {
        let text = std::str::from_utf8(payload).map_err(|_| DecodeError::NotUtf8)?;
        Self::decode_str(text)
    }

    /// Decode an already-validated text line.
    pub fn decode_str(text: &str) -> Result<Sample, DecodeError> {
        let fields: Vec<&str> = text.trim().split(',').collect();
        if fields.len() < FIELD_COUNT {
            return Err(DecodeError::TooFewFields {
                needed: FIELD_COUNT,
                got: fields.len(),
            });
        }

        Ok(Sample {
            ax: float_field(&fields, 0)?,
            ay: float_field(&fields, 1)?,
            az: float_field(&fields, 2)?,
            gx: float_field(&fields, 3)?,
            gy: float_field(&fields, 4)?,
            gz: float_field(&fields, 5)?,
            light: float_field(&fields, 6)?,
            battery: field(&fields, 7)?,
            sos: field(&fields, 8)?,
            lat: float_field(&fields, 9)?,
            lon: float_field(&fields, 10)?,
        })
    }
}

fn field<T: FromStr>(fields: &[&str], index: usize) -> Result<T, DecodeError> {
    let raw = fields[index].trim();
    raw.parse::<T>().map_err(|_| invalid(index, raw))
}

fn float_field(fields: &[&str], index: usize) -> Result<f64, DecodeError> {
    let value: f64 = field(fields, index)?;
    if !value.is_finite() {
        return Err(invalid(index, fields[index].trim()));
    }
    Ok(value)
}

fn invalid(index: usize, raw: &str) -> DecodeError {
    DecodeError::InvalidField {
        index,
        name: FIELD_NAMES[index],
        value: raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const VALID: &str = "0.12,-0.40,9.81,0.01,0.02,-0.03,350.5,76,0,39.9042,116.4074";

    #[test]
    fn decodes_valid_line() {
        let s = SampleDecoder::decode(VALID.as_bytes()).unwrap();
        assert_abs_diff_eq!(s.ax, 0.12, epsilon = 1e-12);
        assert_abs_diff_eq!(s.az, 9.81, epsilon = 1e-12);
        assert_abs_diff_eq!(s.gz, -0.03, epsilon = 1e-12);
        assert_abs_diff_eq!(s.light, 350.5, epsilon = 1e-12);
        assert_eq!(s.battery, 76);
        assert_eq!(s.sos, 0);
        assert_abs_diff_eq!(s.lat, 39.9042, epsilon = 1e-12);
        assert_abs_diff_eq!(s.lon, 116.4074, epsilon = 1e-12);
    }

    #[test]
    fn tolerates_newline_whitespace_and_extra_fields() {
        let line = " 0, 0 ,9.8,0,0,0,0,100, 1 ,0,0,extra,fields\n";
        let s = SampleDecoder::decode(line.as_bytes()).unwrap();
        assert_eq!(s.sos, 1);
        assert_eq!(s.battery, 100);
    }

    #[test]
    fn wire_round_trip() {
        let original = Sample {
            ax: -3.25,
            ay: 0.0625,
            az: 9.80665,
            gx: 1.5,
            gy: -0.75,
            gz: 0.001,
            light: 12.0,
            battery: 55,
            sos: 2,
            lat: -33.8688,
            lon: 151.2093,
        };
        let decoded = SampleDecoder::decode(original.to_wire().as_bytes()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn rejects_short_payload() {
        let err = SampleDecoder::decode(b"1,2,3,4,5,6,7,8,9,10").unwrap_err();
        assert_eq!(err, DecodeError::TooFewFields { needed: 11, got: 10 });

        let err = SampleDecoder::decode(b"").unwrap_err();
        assert_eq!(err, DecodeError::TooFewFields { needed: 11, got: 1 });
    }

    #[test]
    fn rejects_non_numeric_field() {
        let err = SampleDecoder::decode(b"0,0,abc,0,0,0,0,100,0,0,0").unwrap_err();
        assert_eq!(
            err,
            DecodeError::InvalidField {
                index: 2,
                name: "az",
                value: "abc".to_string(),
            }
        );
    }

    #[test]
    fn rejects_fractional_integer_columns() {
        let err = SampleDecoder::decode(b"0,0,9.8,0,0,0,0,99.5,0,0,0").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidField { index: 7, name: "battery", .. }));

        let err = SampleDecoder::decode(b"0,0,9.8,0,0,0,0,99,1.0,0,0").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidField { index: 8, name: "sos", .. }));
    }

    #[test]
    fn rejects_non_finite_floats() {
        let err = SampleDecoder::decode(b"nan,0,9.8,0,0,0,0,80,0,0,0").unwrap_err();
        assert_eq!(
            err,
            DecodeError::InvalidField {
                index: 0,
                name: "ax",
                value: "nan".to_string(),
            }
        );

        let err = SampleDecoder::decode(b"0,0,inf,0,0,0,0,80,0,0,0").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidField { index: 2, name: "az", .. }));

        let err = SampleDecoder::decode(b"0,0,9.8,0,0,-inf,0,80,0,0,0").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidField { index: 5, name: "gz", .. }));

        let err = SampleDecoder::decode(b"0,0,9.8,0,0,0,0,80,0,NaN,Infinity").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidField { index: 9, name: "lat", .. }));
    }

    #[test]
    fn rejects_invalid_utf8() {
        let err = SampleDecoder::decode(&[0xFF, 0xFE, b',', 0x80]).unwrap_err();
        assert_eq!(err, DecodeError::NotUtf8);
    }

    #[test]
    fn empty_field_is_invalid() {
        let err = SampleDecoder::decode(b"0,0,9.8,0,0,0,0,100,0,,0").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidField { index: 9, name: "lat", .. }));
    }
}
