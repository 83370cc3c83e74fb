//! Protocol level errors.
use bytes::{Buf, Bytes};

use super::BufExt;

/// An error when translating buffer from the backend.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unexpected backend message {found:?} (expected {expect:?}, phase {phase:?})")]
    Unexpected {
        expect: Option<&'static str>,
        found: char,
        phase: Option<&'static str>,
    },
    #[error("unknown authentication method ({auth})")]
    UnknownAuth { auth: u32 },
    #[error("backend sent non utf8 string: {0}")]
    NonUtf8(std::str::Utf8Error),
    #[error("framing violation: {detail}")]
    Framing { detail: &'static str },
}

impl ProtocolError {
    pub(crate) fn unknown(found: u8) -> ProtocolError {
        Self::Unexpected {
            expect: None,
            found: found as char,
            phase: None,
        }
    }

    pub(crate) fn unexpected(expect: &'static str, _msgtype: u8, found: u8) -> ProtocolError {
        Self::Unexpected {
            expect: Some(expect),
            found: found as char,
            phase: None,
        }
    }

    pub(crate) fn unexpected_phase(found: u8, phase: &'static str) -> ProtocolError {
        Self::Unexpected {
            expect: None,
            found: found as char,
            phase: Some(phase),
        }
    }

    pub(crate) fn unknown_auth(auth: u32) -> ProtocolError {
        Self::UnknownAuth { auth }
    }
}

/// A structured error reported by the server through ErrorResponse.
///
/// Fields the driver does not recognize are skipped, per protocol advice.
#[derive(Debug, Default)]
pub struct DatabaseError {
    pub severity: String,
    pub sqlstate: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    pub position: Option<String>,
    pub routine: String,
    pub file: Option<String>,
    pub line: Option<String>,
    /// Server-specific numeric error code, distinct from the sqlstate.
    pub error_code: i64,
}

impl DatabaseError {
    /// Parse the identified-field body of an ErrorResponse or NoticeResponse.
    pub fn from_error_response(mut body: Bytes) -> DatabaseError {
        let mut err = DatabaseError::default();

        while body.has_remaining() {
            let code = body.get_u8();
            if code == 0 {
                break;
            }
            let Ok(value) = body.get_nul_string() else { break };
            match code {
                b'S' => err.severity = value,
                b'C' => err.sqlstate = value,
                b'M' => err.message = value,
                b'D' => err.detail = Some(value),
                b'H' => err.hint = Some(value),
                b'P' => err.position = Some(value),
                b'R' => err.routine = value,
                b'F' => err.file = Some(value),
                b'L' => err.line = Some(value),
                b'E' => err.error_code = value.parse().unwrap_or_default(),
                _ => {}
            }
        }

        err
    }
}

impl std::error::Error for DatabaseError {}

impl std::fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)?;
        if !self.sqlstate.is_empty() {
            write!(f, " (SQLSTATE {})", self.sqlstate)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::protocol::BufMutExt;

    #[test]
    fn parse_error_fields() {
        let mut buf = BytesMut::new();
        for (code, value) in [
            (b'S', "ERROR"),
            (b'C', "42601"),
            (b'M', "Syntax error at or near \"FROM\""),
            (b'R', "base_yyerror"),
            (b'E', "4856"),
            (b'X', "ignored-unknown-field"),
        ] {
            buf.put_u8(code);
            buf.put_nul_string(value);
        }
        buf.put_u8(0);

        let err = DatabaseError::from_error_response(buf.freeze());
        assert_eq!(err.severity, "ERROR");
        assert_eq!(err.sqlstate, "42601");
        assert_eq!(err.message, "Syntax error at or near \"FROM\"");
        assert_eq!(err.routine, "base_yyerror");
        assert_eq!(err.error_code, 4856);
        assert_eq!(
            err.to_string(),
            "ERROR: Syntax error at or near \"FROM\" (SQLSTATE 42601)"
        );
    }
}
