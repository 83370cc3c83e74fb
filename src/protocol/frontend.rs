//! Frontend messages.
//!
//! All struct fields here mirror the actual message sent to the server.
use bytes::{BufMut, BytesMut};

use super::{BufMutExt, FrontendProtocol, Oid, nul_string_len, wire_count, wire_len};

/// The protocol version number: major 3, minor 0.
const PROTOCOL_VERSION: u32 = 196608;

/// Magic "version" announcing an SSLRequest rather than a startup.
const SSL_REQUEST_CODE: u32 = 80877103;

/// Magic "version" announcing a CancelRequest rather than a startup.
const CANCEL_REQUEST_CODE: u32 = 80877102;

/// Startup frontend message.
///
/// For historical reasons, the very first message sent by the client (the startup message)
/// has no initial message-type byte.
///
/// Thus, [`Startup`] does not implement [`FrontendProtocol`]
#[derive(Debug)]
pub struct Startup<'a> {
    /// The database user name to connect as. Required; there is no default.
    pub user: &'a str,
    /// The database to connect to. Defaults to the user name.
    pub database: Option<&'a str>,
}

impl Startup<'_> {
    pub fn write(self, buf: &mut BytesMut) {
        let offset = buf.len();

        // Length of message contents in bytes, including self.
        // reserve 4 bytes for length
        buf.put_u32(0);

        buf.put_u32(PROTOCOL_VERSION);

        // The protocol version number is followed by one or more pairs of
        // parameter name and value strings.

        buf.put_nul_string("user");
        buf.put_nul_string(self.user);

        if let Some(db) = self.database {
            buf.put_nul_string("database");
            buf.put_nul_string(db);
        }

        // Session defaults the driver depends on: all row values arrive as
        // UTF-8 text and timestamps in ISO date style.
        buf.put_nul_string("client_encoding");
        buf.put_nul_string("UTF8");
        buf.put_nul_string("DateStyle");
        buf.put_nul_string("ISO");

        // A zero byte is required as a terminator after the last name/value pair.
        buf.put_u8(b'\0');

        // write the length
        let mut written_buf = &mut buf[offset..];
        written_buf.put_u32(wire_len(written_buf.len()));
    }
}

/// Requests the connection be upgraded to TLS.
///
/// The server answers with a single byte, `'S'` to proceed with the
/// handshake or `'N'` to stay in cleartext. No type byte, like [`Startup`].
#[derive(Debug)]
pub struct SslRequest;

impl SslRequest {
    pub fn write(self, buf: &mut BytesMut) {
        buf.put_u32(8);
        buf.put_u32(SSL_REQUEST_CODE);
    }
}

/// Requests cancellation of a query running on another connection.
///
/// Sent on a fresh socket instead of a typed message. No type byte,
/// like [`Startup`].
#[derive(Debug)]
pub struct CancelRequest {
    /// The process ID of the target backend.
    pub process_id: i32,
    /// The secret key for the target backend.
    pub secret_key: i32,
}

impl CancelRequest {
    pub fn write(self, buf: &mut BytesMut) {
        buf.put_u32(16);
        buf.put_u32(CANCEL_REQUEST_CODE);
        buf.put_i32(self.process_id);
        buf.put_i32(self.secret_key);
    }
}

/// The password (encrypted, if requested).
#[derive(Debug)]
pub struct PasswordMessage<'a> {
    pub password: &'a str,
}

impl FrontendProtocol for PasswordMessage<'_> {
    const MSGTYPE: u8 = b'p';

    fn size_hint(&self) -> u32 {
        nul_string_len(self.password)
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.password);
    }
}

/// Identifies the message as a simple query.
pub struct Query<'a> {
    /// the query string itself
    pub sql: &'a str,
}

impl FrontendProtocol for Query<'_> {
    const MSGTYPE: u8 = b'Q';

    fn size_hint(&self) -> u32 {
        nul_string_len(self.sql)
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.sql);
    }
}

/// Identifies the message as a Parse command.
pub struct Parse<'a> {
    /// prepared statement name (an empty string selects the unnamed prepared statement).
    pub prepare_name: &'a str,
    /// The query string to be parsed.
    pub sql: &'a str,
    /// Parameter data types to prespecify. Leaving this empty leaves every
    /// type unspecified; the server infers them and reports back through
    /// ParameterDescription.
    pub param_oids: &'a [Oid],
}

impl FrontendProtocol for Parse<'_> {
    const MSGTYPE: u8 = b'P';

    fn size_hint(&self) -> u32 {
        nul_string_len(self.prepare_name)
            + nul_string_len(self.sql)
            + 2
            + wire_len(self.param_oids.len()) * 4
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.prepare_name);
        buf.put_nul_string(self.sql);
        buf.put_u16(wire_count(self.param_oids.len()));
        for oid in self.param_oids {
            buf.put_u32(*oid);
        }
    }
}

/// Identifies the message as a Bind command.
///
/// Parameters travel as text (format code 0) only; a `None` argument is
/// written as length `-1` with no value bytes, the wire form of NULL.
/// The described parameter type oids are echoed back between the argument
/// count and the argument values, which is where this server family
/// departs from stock postgres.
pub struct Bind<'a> {
    /// The name of the destination portal (an empty string selects the unnamed portal).
    pub portal_name: &'a str,
    /// The name of the source prepared statement.
    pub stmt_name: &'a str,
    /// Parameter type oids captured from ParameterDescription.
    pub param_oids: &'a [Oid],
    /// Text-rendered arguments; `None` is NULL.
    pub args: &'a [Option<String>],
}

impl FrontendProtocol for Bind<'_> {
    const MSGTYPE: u8 = b'B';

    fn size_hint(&self) -> u32 {
        nul_string_len(self.portal_name)
            + nul_string_len(self.stmt_name)
            // parameter format code count (none, all text)
            + 2
            // argument count
            + 2
            + wire_len(self.param_oids.len()) * 4
            + self
                .args
                .iter()
                .map(|arg| 4 + arg.as_ref().map_or(0, |a| wire_len(a.len())))
                .sum::<u32>()
            // result format code count (none, all text)
            + 2
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.portal_name);
        buf.put_nul_string(self.stmt_name);

        buf.put_u16(0);
        buf.put_u16(wire_count(self.args.len()));

        for oid in self.param_oids {
            buf.put_u32(*oid);
        }

        for arg in self.args {
            match arg {
                Some(text) => {
                    buf.put_u32(wire_len(text.len()));
                    buf.put_slice(text.as_bytes());
                }
                // As a special case, -1 indicates a NULL parameter value.
                // No value bytes follow in the NULL case.
                None => buf.put_i32(-1),
            }
        }

        buf.put_u16(0);
    }
}

/// Identifies the message as an Execute command.
pub struct Execute<'a> {
    /// The name of the portal to execute (an empty string selects the unnamed portal).
    pub portal_name: &'a str,
    /// Maximum number of rows to return, if portal contains a query that returns rows
    /// (ignored otherwise). Zero denotes "no limit".
    pub max_row: u32,
}

impl FrontendProtocol for Execute<'_> {
    const MSGTYPE: u8 = b'E';

    fn size_hint(&self) -> u32 {
        nul_string_len(self.portal_name) + 4
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.portal_name);
        buf.put_u32(self.max_row);
    }
}

/// Identifies the message as a Describe command.
pub struct Describe<'a> {
    /// 'S' to describe a prepared statement; or 'P' to describe a portal.
    pub kind: u8,
    /// The name of the prepared statement or portal to describe.
    pub name: &'a str,
}

impl FrontendProtocol for Describe<'_> {
    const MSGTYPE: u8 = b'D';

    fn size_hint(&self) -> u32 {
        1 + nul_string_len(self.name)
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_u8(self.kind);
        buf.put_nul_string(self.name);
    }
}

/// Identifies the message as a Close command.
pub struct Close<'a> {
    /// 'S' to close a prepared statement; or 'P' to close a portal.
    pub variant: u8,
    /// The name of the prepared statement or portal to close.
    pub name: &'a str,
}

impl FrontendProtocol for Close<'_> {
    const MSGTYPE: u8 = b'C';

    fn size_hint(&self) -> u32 {
        1 + nul_string_len(self.name)
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_u8(self.variant);
        buf.put_nul_string(self.name);
    }
}

/// A block of data streamed to the server during `COPY FROM STDIN`.
pub struct CopyData<'a> {
    pub data: &'a [u8],
}

impl FrontendProtocol for CopyData<'_> {
    const MSGTYPE: u8 = b'd';

    fn size_hint(&self) -> u32 {
        wire_len(self.data.len())
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_slice(self.data);
    }
}

/// Announces the copy input stream completed normally.
pub struct CopyDone;

impl FrontendProtocol for CopyDone {
    const MSGTYPE: u8 = b'c';

    fn size_hint(&self) -> u32 {
        0
    }

    fn encode(self, _: impl BufMut) {}
}

/// Aborts the copy with an error reported by the client side.
pub struct CopyFail<'a> {
    /// An error message to report as the cause of failure.
    pub message: &'a str,
}

impl FrontendProtocol for CopyFail<'_> {
    const MSGTYPE: u8 = b'f';

    fn size_hint(&self) -> u32 {
        nul_string_len(self.message)
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.message);
    }
}

/// Identifies the message as a Sync command.
pub struct Sync;

impl FrontendProtocol for Sync {
    const MSGTYPE: u8 = b'S';

    fn size_hint(&self) -> u32 {
        0
    }

    fn encode(self, _: impl BufMut) {}
}

/// Identifies the message as a Flush command.
pub struct Flush;

impl FrontendProtocol for Flush {
    const MSGTYPE: u8 = b'H';

    fn size_hint(&self) -> u32 {
        0
    }

    fn encode(self, _: impl BufMut) {}
}

/// Identifies the message as a termination; the server closes the connection.
pub struct Terminate;

impl FrontendProtocol for Terminate {
    const MSGTYPE: u8 = b'X';

    fn size_hint(&self) -> u32 {
        0
    }

    fn encode(self, _: impl BufMut) {}
}

#[cfg(test)]
mod test {
    use bytes::BytesMut;

    use super::*;
    use crate::protocol::write;

    #[test]
    fn bind_null_argument() {
        let args = [
            Some("13".to_string()),
            None,
            Some("t".to_string()),
            Some("123.45".to_string()),
            Some("2024-05-01 10:00:00".to_string()),
        ];
        let mut buf = BytesMut::new();
        write(
            Bind {
                portal_name: "",
                stmt_name: "",
                param_oids: &[],
                args: &args,
            },
            &mut buf,
        );

        assert_eq!(buf[0], b'B');
        // skip type + length + two empty nul strings + format count
        let body = &buf[5 + 1 + 1 + 2..];
        assert_eq!(&body[..2], &5u16.to_be_bytes());
        // first arg: [len 2]["13"], second arg: length -1, nothing follows
        assert_eq!(&body[2..6], &2u32.to_be_bytes());
        assert_eq!(&body[6..8], b"13");
        assert_eq!(&body[8..12], &(-1i32).to_be_bytes());
        assert_eq!(&body[12..16], &1u32.to_be_bytes());
        assert_eq!(&body[16..17], b"t");
    }

    #[test]
    fn bind_matches_wire_layout() {
        // single int argument, no described oids
        let args = [Some("123".to_string())];
        let mut buf = BytesMut::new();
        write(
            Bind { portal_name: "", stmt_name: "", param_oids: &[], args: &args },
            &mut buf,
        );
        // two empty names, zero format codes, one argument,
        // [len 3]["123"], zero result format codes
        assert_eq!(
            &buf[5..],
            &[0x0, 0x0, 0x0, 0x0, 0x0, 0x1, 0x0, 0x0, 0x0, 0x3, 0x31, 0x32, 0x33, 0x0, 0x0]
        );
    }

    #[test]
    fn startup_carries_session_defaults() {
        let mut buf = BytesMut::new();
        Startup { user: "dbadmin", database: Some("vmart") }.write(&mut buf);

        let len = u32::from_be_bytes(buf[..4].try_into().unwrap());
        assert_eq!(len as usize, buf.len());
        assert_eq!(&buf[4..8], &PROTOCOL_VERSION.to_be_bytes());

        let body = String::from_utf8_lossy(&buf[8..]);
        for expect in ["user\0dbadmin\0", "database\0vmart\0", "client_encoding\0UTF8\0", "DateStyle\0ISO\0"] {
            assert!(body.contains(expect), "missing {expect:?}");
        }
        assert_eq!(buf[buf.len() - 1], 0);
    }

    #[test]
    fn cancel_request_frame() {
        let mut buf = BytesMut::new();
        CancelRequest { process_id: 42, secret_key: 7 }.write(&mut buf);
        assert_eq!(buf.len(), 16);
        assert_eq!(&buf[..4], &16u32.to_be_bytes());
        assert_eq!(&buf[4..8], &CANCEL_REQUEST_CODE.to_be_bytes());
        assert_eq!(&buf[8..12], &42i32.to_be_bytes());
        assert_eq!(&buf[12..16], &7i32.to_be_bytes());
    }

    #[test]
    fn copy_frames() {
        let mut buf = BytesMut::new();
        write(CopyData { data: b"1,foo\n" }, &mut buf);
        write(CopyDone, &mut buf);
        assert_eq!(buf[0], b'd');
        assert_eq!(&buf[5..11], b"1,foo\n");
        assert_eq!(buf[11], b'c');
        assert_eq!(&buf[12..16], &4u32.to_be_bytes());
    }
}
