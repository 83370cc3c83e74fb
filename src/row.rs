//! Row value materialization.
//!
//! Column values arrive from the server as text; this module turns them
//! into typed [`Value`]s keyed by the column's data type oid.
use time::{
    Date, OffsetDateTime,
    format_description::{BorrowedFormatItem as I, Component as C, modifier},
};

use crate::protocol::ColType;

/// A decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(Date),
    Timestamp(OffsetDateTime),
}

impl Value {
    /// Returns the integral value, converting where the column arrived as
    /// a different numeric shape.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// An error when decoding a column value.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("server sent non utf8 text: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("malformed integer: {0}")]
    Int(#[from] std::num::ParseIntError),
    #[error("malformed number: {0}")]
    Float(#[from] std::num::ParseFloatError),
    #[error("malformed timestamp: {0}")]
    Time(#[from] time::error::Parse),
    #[error("timestamp out of range: {0}")]
    Range(#[from] time::error::ComponentRange),
    #[error("infinite dates are not supported")]
    Infinite,
}

/// Decode one column from its wire text.
///
/// `raw` is `None` for a NULL column (wire length -1); it is not parsed.
/// `tz_offset` is the session timezone offset applied to Timestamp and
/// Time columns, which arrive without one.
pub fn decode_column(
    col_type: ColType,
    raw: Option<&[u8]>,
    tz_offset: &str,
) -> Result<Value, DecodeError> {
    let Some(raw) = raw else {
        return Ok(Value::Null);
    };

    let value = match col_type {
        ColType::Boolean => Value::Bool(raw.first() == Some(&b't')),
        ColType::Int64 => Value::Int(std::str::from_utf8(raw)?.parse()?),
        ColType::Float64 | ColType::Numeric => Value::Float(std::str::from_utf8(raw)?.parse()?),
        ColType::Date => parse_date(std::str::from_utf8(raw)?)?,
        ColType::Timestamp => {
            let text = format!("{}{tz_offset}", std::str::from_utf8(raw)?);
            Value::Timestamp(parse_timestamptz(&text)?)
        }
        ColType::TimestampTz => Value::Timestamp(parse_timestamptz(std::str::from_utf8(raw)?)?),
        ColType::Time => {
            let text = format!("0000-01-01 {}{tz_offset}", std::str::from_utf8(raw)?);
            Value::Timestamp(parse_timestamptz(&text)?)
        }
        ColType::TimeTz => {
            let text = format!("0000-01-01 {}", std::str::from_utf8(raw)?);
            Value::Timestamp(parse_timestamptz(&text)?)
        }
        ColType::VarBinary | ColType::LongVarBinary | ColType::Binary => {
            Value::String(hex::encode(raw))
        }
        // char-likes, uuid, intervals and anything unknown pass through as text
        _ => Value::String(std::str::from_utf8(raw)?.to_string()),
    };

    Ok(value)
}

/// Parse `YYYY-MM-DD[ BC]`; the BC suffix negates the year.
fn parse_date(text: &str) -> Result<Value, DecodeError> {
    let (text, bc) = strip_bc(text);
    reject_infinite(text)?;

    let date = Date::parse(text, &DATE)?;
    let date = if bc { date.replace_year(-date.year())? } else { date };
    Ok(Value::Date(date))
}

/// Parse `YYYY-MM-DD HH:MM:SS[.frac]±HH[:MM][ BC]` into a timestamp with
/// explicit offset.
///
/// The server omits pieces the parser needs, so the text is normalized
/// first: a missing fractional part becomes `.000000`, a short one is
/// right-padded to six digits, and a bare `±HH` offset gains `:00`.
pub(crate) fn parse_timestamptz(text: &str) -> Result<OffsetDateTime, DecodeError> {
    let (text, bc) = strip_bc(text);
    reject_infinite(text)?;

    let (base, offset) = split_offset(text);

    let mut normalized = String::with_capacity(32);
    match base.find('.') {
        Some(dot) => {
            let frac = &base[dot + 1..];
            normalized.push_str(&base[..dot + 1]);
            if frac.len() >= 6 {
                normalized.push_str(&frac[..6]);
            } else {
                normalized.push_str(frac);
                for _ in frac.len()..6 {
                    normalized.push('0');
                }
            }
        }
        None => {
            normalized.push_str(base);
            normalized.push_str(".000000");
        }
    }
    normalized.push_str(offset);
    if !offset.is_empty() && !offset.contains(':') {
        normalized.push_str(":00");
    }

    let parsed = OffsetDateTime::parse(&normalized, &TIMESTAMPTZ)?;
    if bc {
        return Ok(parsed.replace_year(-parsed.year())?);
    }
    Ok(parsed)
}

fn strip_bc(text: &str) -> (&str, bool) {
    match text.strip_suffix(" BC") {
        Some(stripped) => (stripped, true),
        None => (text, false),
    }
}

fn reject_infinite(text: &str) -> Result<(), DecodeError> {
    if matches!(text, "infinity" | "-infinity") {
        return Err(DecodeError::Infinite);
    }
    Ok(())
}

/// Split the trailing `±HH[:MM]` offset off the timestamp body.
///
/// The minus signs of the date part live before index 10, so only signs
/// past the day field qualify.
fn split_offset(text: &str) -> (&str, &str) {
    const DAY_END: usize = "YYYY-MM-DD".len();
    match text[DAY_END.min(text.len())..]
        .rfind(['+', '-'])
        .map(|i| i + DAY_END.min(text.len()))
    {
        Some(at) => (&text[..at], &text[at..]),
        None => (text, ""),
    }
}

const DATE: &[I<'_>] = &[
    I::Component {
        0: C::Year(modifier::Year::default()),
    },
    I::Literal { 0: b"-" },
    I::Component {
        0: C::Month(modifier::Month::default()),
    },
    I::Literal { 0: b"-" },
    I::Component {
        0: C::Day(modifier::Day::default()),
    },
];

const OFFSET_HOUR: modifier::OffsetHour = {
    let mut m = modifier::OffsetHour::default();
    m.sign_is_mandatory = true;
    m
};

const SUBSECOND: modifier::Subsecond = {
    let mut m = modifier::Subsecond::default();
    m.digits = modifier::SubsecondDigits::Six;
    m
};

const TIMESTAMPTZ: &[I<'_>] = &[
    I::Component {
        0: C::Year(modifier::Year::default()),
    },
    I::Literal { 0: b"-" },
    I::Component {
        0: C::Month(modifier::Month::default()),
    },
    I::Literal { 0: b"-" },
    I::Component {
        0: C::Day(modifier::Day::default()),
    },
    I::Literal { 0: b" " },
    I::Component {
        0: C::Hour(modifier::Hour::default()),
    },
    I::Literal { 0: b":" },
    I::Component {
        0: C::Minute(modifier::Minute::default()),
    },
    I::Literal { 0: b":" },
    I::Component {
        0: C::Second(modifier::Second::default()),
    },
    I::Literal { 0: b"." },
    I::Component { 0: C::Subsecond(SUBSECOND) },
    I::Component { 0: C::OffsetHour(OFFSET_HOUR) },
    I::Literal { 0: b":" },
    I::Component {
        0: C::OffsetMinute(modifier::OffsetMinute::default()),
    },
];

#[cfg(test)]
mod test {
    use time::macros::{datetime, offset};

    use super::*;

    fn ts(text: &str) -> OffsetDateTime {
        parse_timestamptz(text).unwrap()
    }

    #[test]
    fn timestamp_fraction_padding() {
        let parsed = ts("2018-02-01 21:09:33.1234+00");
        assert_eq!(parsed, datetime!(2018-02-01 21:09:33.123400 UTC));
        assert_eq!(parsed.microsecond(), 123_400);
    }

    #[test]
    fn timestamp_without_fraction() {
        assert_eq!(ts("2020-01-02 15:04:05+01"), datetime!(2020-01-02 15:04:05 +01));
        assert_eq!(
            ts("2020-01-02 15:04:05.000000-07"),
            datetime!(2020-01-02 15:04:05 -07)
        );
    }

    #[test]
    fn timestamp_half_hour_offset() {
        assert_eq!(
            ts("2020-01-02 05:04:05+05:30"),
            datetime!(2020-01-02 05:04:05 +05:30)
        );
        assert_eq!(
            ts("2020-01-02 05:04:05.000+05:30"),
            datetime!(2020-01-02 05:04:05 +05:30)
        );
    }

    #[test]
    fn timestamp_bc_negates_year() {
        let parsed = ts("2018-01-27 21:09:44+10 BC");
        assert_eq!(parsed.year(), -2018);
        assert_eq!(parsed.offset(), offset!(+10));
    }

    #[test]
    fn timestamp_infinity_errors() {
        assert!(matches!(
            parse_timestamptz("infinity"),
            Err(DecodeError::Infinite)
        ));
        assert!(matches!(
            parse_timestamptz("-infinity"),
            Err(DecodeError::Infinite)
        ));
    }

    #[test]
    fn date_column() {
        let v = decode_column(ColType::Date, Some(b"2024-02-29"), "+00").unwrap();
        assert_eq!(v, Value::Date(time::macros::date!(2024-02-29)));

        let v = decode_column(ColType::Date, Some(b"0044-03-15 BC"), "+00").unwrap();
        let Value::Date(d) = v else { panic!("expected date") };
        assert_eq!(d.year(), -44);
    }

    #[test]
    fn plain_timestamp_uses_session_offset() {
        let v = decode_column(ColType::Timestamp, Some(b"2020-06-01 10:30:00"), "+02").unwrap();
        assert_eq!(v, Value::Timestamp(datetime!(2020-06-01 10:30:00 +02)));
    }

    #[test]
    fn time_columns_borrow_epoch_date() {
        let v = decode_column(ColType::Time, Some(b"21:09:33"), "+00").unwrap();
        let Value::Timestamp(t) = v else { panic!("expected timestamp") };
        assert_eq!((t.year(), t.hour(), t.minute(), t.second()), (0, 21, 9, 33));

        let v = decode_column(ColType::TimeTz, Some(b"21:09:33+05:30"), "+00").unwrap();
        let Value::Timestamp(t) = v else { panic!("expected timestamp") };
        assert_eq!(t.offset(), offset!(+05:30));
    }

    #[test]
    fn scalar_columns() {
        assert_eq!(decode_column(ColType::Boolean, Some(b"t"), "").unwrap(), Value::Bool(true));
        assert_eq!(decode_column(ColType::Boolean, Some(b"f"), "").unwrap(), Value::Bool(false));
        assert_eq!(decode_column(ColType::Int64, Some(b"-42"), "").unwrap(), Value::Int(-42));
        assert_eq!(
            decode_column(ColType::Numeric, Some(b"123.45"), "").unwrap(),
            Value::Float(123.45)
        );
        assert_eq!(
            decode_column(ColType::VarChar, Some(b"hello"), "").unwrap(),
            Value::String("hello".into())
        );
    }

    #[test]
    fn binary_hex_encodes() {
        assert_eq!(
            decode_column(ColType::VarBinary, Some(&[0xde, 0xad, 0xbe, 0xef]), "").unwrap(),
            Value::String("deadbeef".into())
        );
    }

    #[test]
    fn interval_and_unknown_pass_through() {
        assert_eq!(
            decode_column(ColType::Interval, Some(b"1 day 02:03:04"), "").unwrap(),
            Value::String("1 day 02:03:04".into())
        );
        assert_eq!(
            decode_column(ColType::Unknown(4242), Some(b"whatever"), "").unwrap(),
            Value::String("whatever".into())
        );
    }

    #[test]
    fn null_is_not_parsed() {
        assert_eq!(decode_column(ColType::Int64, None, "").unwrap(), Value::Null);
        assert!(decode_column(ColType::Int64, None, "").unwrap().is_null());
    }
}
