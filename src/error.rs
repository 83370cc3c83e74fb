//! `vertro` error types.
use std::{backtrace::Backtrace, fmt, io};

use crate::{
    connection::ParseError,
    protocol::{DatabaseError, ProtocolError},
    row::DecodeError,
};

/// A specialized [`Result`] type for `vertro` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from `vertro` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// The structured server error, when this is one.
    pub fn as_database_error(&self) -> Option<&DatabaseError> {
        match &self.kind {
            ErrorKind::Database(db) => Some(db),
            _ => None,
        }
    }

    pub(crate) fn empty_statement() -> Error {
        ErrorKind::EmptyStatement.into()
    }

    pub(crate) fn cancelled() -> Error {
        ErrorKind::Cancelled.into()
    }

    pub(crate) fn protocol_desync(detail: &'static str) -> Error {
        ErrorKind::Protocol(ProtocolError::Framing { detail }).into()
    }

    /// EOF from the server mid-request, reported verbatim to distinguish
    /// it from an auth denial.
    pub(crate) fn unexpected_eof() -> Error {
        ErrorKind::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "EOF")).into()
    }
}

/// All possible error kind from `vertro` library.
#[derive(Debug)]
pub enum ErrorKind {
    /// Connection string rejected.
    Config(ParseError),
    /// The backend sent something the framer cannot make sense of.
    Protocol(ProtocolError),
    /// Transport level failure; fatal to the connection.
    Io(io::Error),
    /// TLS negotiation or handshake failure.
    Tls(rustls::Error),
    /// Structured error reported by the server.
    Database(DatabaseError),
    /// A column value failed to materialize.
    Decode(DecodeError),
    /// The server requested an authentication method the driver does not speak.
    UnsupportedAuth(u32),
    /// Statement text was empty; reported before any network I/O.
    EmptyStatement,
    /// The per-call deadline elapsed or the caller cancelled.
    Cancelled,
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ParseError>e => ErrorKind::Config(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<io::Error>e => ErrorKind::Io(e));
from!(<rustls::Error>e => ErrorKind::Tls(e));
from!(<DatabaseError>e => ErrorKind::Database(e));
from!(<DecodeError>e => ErrorKind::Decode(e));

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind {}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
            Self::Tls(e) => e.fmt(f),
            Self::Database(e) => e.fmt(f),
            Self::Decode(e) => e.fmt(f),
            Self::UnsupportedAuth(method) => write!(f, "unsupported authentication method ({method})"),
            Self::EmptyStatement => f.write_str("empty statement"),
            Self::Cancelled => f.write_str("operation cancelled"),
        }
    }
}
