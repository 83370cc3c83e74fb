//! Input parameter values.
use time::{
    OffsetDateTime,
    format_description::{BorrowedFormatItem as I, Component as C, modifier},
};

/// An argument value accepted at the query interface.
///
/// The set is closed on purpose: every variant has a defined text form on
/// both execution paths, so no unknown kind can reach the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Time(OffsetDateTime),
}

impl Param {
    /// Text form for the Bind message; `None` is the wire NULL (length -1).
    pub fn bind_text(&self) -> Option<String> {
        match self {
            Param::Null => None,
            Param::Bool(true) => Some("t".into()),
            Param::Bool(false) => Some("f".into()),
            Param::Int(i) => Some(itoa::Buffer::new().format(*i).into()),
            Param::Float(f) => Some(f.to_string()),
            Param::Str(s) => Some(s.clone()),
            Param::Time(t) => Some(t.format(&TIME_LITERAL).expect("format is statically known")),
        }
    }

    /// Literal form for direct interpolation into simple-query SQL.
    pub fn literal(&self) -> String {
        match self {
            Param::Null => "NULL".into(),
            Param::Bool(true) => "true".into(),
            Param::Bool(false) => "false".into(),
            Param::Int(i) => itoa::Buffer::new().format(*i).into(),
            Param::Float(f) => f.to_string(),
            Param::Str(s) => format!("'{}'", clean_quotes(s)),
            Param::Time(t) => t.format(&TIME_LITERAL).expect("format is statically known"),
        }
    }
}

/// Double every unpaired single quote so the value embeds safely in a
/// literal. Already-doubled quotes are preserved, so the operation is
/// idempotent.
pub(crate) fn clean_quotes(val: &str) -> String {
    let mut out = String::with_capacity(val.len());
    let mut chars = val.chars().peekable();
    while let Some(c) = chars.next() {
        out.push(c);
        if c == '\'' {
            match chars.peek() {
                Some('\'') => out.push(chars.next().unwrap()),
                _ => out.push('\''),
            }
        }
    }
    out
}

const TIME_LITERAL: &[I<'_>] = &[
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
];

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Param {
            fn from($pat: $ty) -> Self {
                $body
            }
        }
    };
}

from!(<i16>i => Param::Int(i as i64));
from!(<i32>i => Param::Int(i as i64));
from!(<i64>i => Param::Int(i));
from!(<f32>f => Param::Float(f as f64));
from!(<f64>f => Param::Float(f));
from!(<bool>b => Param::Bool(b));
from!(<&str>s => Param::Str(s.to_string()));
from!(<String>s => Param::Str(s));
from!(<OffsetDateTime>t => Param::Time(t));

impl<T> From<Option<T>> for Param
where
    T: Into<Param>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => Param::Null,
        }
    }
}
