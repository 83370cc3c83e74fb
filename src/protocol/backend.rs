//! Backend messages.
use bytes::{Buf, Bytes};

use super::{BackendProtocol, BufExt, DatabaseError, Oid, ProtocolError};

/// All backend messages the driver understands.
#[derive(Debug)]
pub enum BackendMessage {
    Authentication(Authentication),
    BackendKeyData(BackendKeyData),
    BindComplete(BindComplete),
    CloseComplete(CloseComplete),
    CommandComplete(CommandComplete),
    CommandDescription(CommandDescription),
    CopyInResponse(CopyInResponse),
    CopyOutResponse(CopyOutResponse),
    DataRow(DataRow),
    EmptyQueryResponse(EmptyQueryResponse),
    ErrorResponse(ErrorResponse),
    NoData(NoData),
    NoticeResponse(NoticeResponse),
    ParameterDescription(ParameterDescription),
    ParameterStatus(ParameterStatus),
    ParseComplete(ParseComplete),
    PortalSuspended(PortalSuspended),
    ReadyForQuery(ReadyForQuery),
    RowDescription(RowDescription),
}

macro_rules! match_backend {
    ($($name:ident,)*) => {
        impl BackendMessage {
            pub fn msgtype(&self) -> u8 {
                match self {
                    $(Self::$name(_) => $name::MSGTYPE,)*
                }
            }
        }
        impl BackendProtocol for BackendMessage {
            fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
                let message = match msgtype {
                    $($name::MSGTYPE => Self::$name(<$name as BackendProtocol>::decode(msgtype, body)?),)*
                    _ => return Err(ProtocolError::unknown(msgtype)),
                };
                Ok(message)
            }
        }
    };
}

match_backend! {
    Authentication,
    BackendKeyData,
    BindComplete,
    CloseComplete,
    CommandComplete,
    CommandDescription,
    CopyInResponse,
    CopyOutResponse,
    DataRow,
    EmptyQueryResponse,
    ErrorResponse,
    NoData,
    NoticeResponse,
    ParameterDescription,
    ParameterStatus,
    ParseComplete,
    PortalSuspended,
    ReadyForQuery,
    RowDescription,
}

impl BackendMessage {
    /// Turn an out-of-place message into a protocol error for `phase`.
    pub fn unexpected(&self, phase: &'static str) -> ProtocolError {
        ProtocolError::unexpected_phase(self.msgtype(), phase)
    }
}

macro_rules! assert_msgtype {
    ($self:ident,$typ:ident) => {
        if $self::MSGTYPE != $typ {
            return Err(ProtocolError::unexpected(stringify!($self), $self::MSGTYPE, $typ));
        }
    };
}

/// Identifies the message as an authentication request.
#[derive(Debug)]
pub enum Authentication {
    /// Int32(0) Specifies that the authentication was successful.
    Ok,
    /// Int32(3) Specifies that a clear-text password is required.
    CleartextPassword,
    /// Int32(5) Specifies that an MD5-encrypted password is required.
    /// Byte4 The salt to use when encrypting the password.
    MD5Password { salt: [u8; 4] },
    /// Int32(66048) Specifies that a SHA-512-hashed password is required.
    ///
    /// The challenge carries the 4-byte session salt followed by the
    /// per-user salt stored in the server catalog.
    Sha512Password { salt: [u8; 4], user_salt: Bytes },
}

impl Authentication {
    pub const MSGTYPE: u8 = b'R';

    const OK: i32 = 0;
    const CLEARTEXT: i32 = 3;
    const MD5: i32 = 5;
    const SHA512: i32 = 66048;
}

impl BackendProtocol for Authentication {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(Authentication, msgtype);
        let auth = match body.get_i32() {
            Self::OK => Authentication::Ok,
            Self::CLEARTEXT => Authentication::CleartextPassword,
            Self::MD5 => {
                let mut salt = [0u8; 4];
                body.copy_to_slice(&mut salt);
                Authentication::MD5Password { salt }
            }
            Self::SHA512 => {
                let mut salt = [0u8; 4];
                body.copy_to_slice(&mut salt);
                Authentication::Sha512Password { salt, user_salt: body }
            }
            auth => return Err(ProtocolError::unknown_auth(auth as u32)),
        };
        Ok(auth)
    }
}

/// Identifies the message as cancellation key data.
///
/// The frontend must save these values if it wishes to be able to issue
/// CancelRequest messages later.
#[derive(Debug, Clone, Copy)]
pub struct BackendKeyData {
    /// The process ID of this backend.
    pub process_id: i32,
    /// The secret key of this backend.
    pub secret_key: i32,
}

impl BackendKeyData {
    pub const MSGTYPE: u8 = b'K';
}

impl BackendProtocol for BackendKeyData {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(BackendKeyData, msgtype);
        Ok(Self {
            process_id: body.get_i32(),
            secret_key: body.get_i32(),
        })
    }
}

/// Identifies the message as a run-time parameter status report.
#[derive(Debug)]
pub struct ParameterStatus {
    /// The name of the run-time parameter being reported
    pub name: String,
    /// The current value of the parameter
    pub value: String,
}

impl ParameterStatus {
    pub const MSGTYPE: u8 = b'S';
}

impl BackendProtocol for ParameterStatus {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(ParameterStatus, msgtype);
        Ok(Self {
            name: body.get_nul_string()?,
            value: body.get_nul_string()?,
        })
    }
}

/// A warning message. The frontend should display the message.
///
/// Same field layout as [`ErrorResponse`].
#[derive(Debug)]
pub struct NoticeResponse {
    pub body: Bytes,
}

impl NoticeResponse {
    pub const MSGTYPE: u8 = b'N';

    pub fn to_db_error(self) -> DatabaseError {
        DatabaseError::from_error_response(self.body)
    }
}

impl BackendProtocol for NoticeResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(NoticeResponse, msgtype);
        Ok(NoticeResponse { body })
    }
}

impl std::fmt::Display for NoticeResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        DatabaseError::from_error_response(self.body.clone()).fmt(f)
    }
}

/// Identifies the message as an error.
///
/// The message body consists of one or more identified fields, followed by
/// a zero byte as a terminator. Fields can appear in any order.
///
/// For each field there is the following:
///
/// `Byte1` A code identifying the field type; if zero, this is the message
/// terminator and no string follows.
///
/// `String` The field value.
#[derive(Debug)]
pub struct ErrorResponse {
    pub body: Bytes,
}

impl ErrorResponse {
    pub const MSGTYPE: u8 = b'E';

    pub fn to_db_error(self) -> DatabaseError {
        DatabaseError::from_error_response(self.body)
    }
}

impl BackendProtocol for ErrorResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(ErrorResponse, msgtype);
        Ok(Self { body })
    }
}

/// One column descriptor inside a [`RowDescription`].
#[derive(Debug, Clone)]
pub struct ColumnDesc {
    /// The field name.
    pub field_name: String,
    /// If the field can be identified as a column of a specific table,
    /// the object ID of the column; otherwise zero.
    pub column_oid: Oid,
    /// The object ID of the field's data type.
    pub type_oid: Oid,
    /// The data type size. Negative values denote variable-width types.
    pub length: i16,
    /// The type modifier; the meaning is type-specific.
    pub type_modifier: i32,
    /// Whether the column may hold NULL.
    pub nullable: bool,
}

impl ColumnDesc {
    pub fn col_type(&self) -> super::ColType {
        super::ColType::from_oid(self.type_oid)
    }
}

/// Identifies the message as a row description.
///
/// Indicates that rows are about to be returned. The contents of this
/// message describe the column layout of the rows, one descriptor per
/// column.
#[derive(Debug, Clone, Default)]
pub struct RowDescription {
    pub columns: Vec<ColumnDesc>,
}

impl RowDescription {
    pub const MSGTYPE: u8 = b'T';
}

impl BackendProtocol for RowDescription {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(RowDescription, msgtype);

        let field_len = body.get_u16();
        let mut columns = Vec::with_capacity(field_len as usize);

        for _ in 0..field_len {
            columns.push(ColumnDesc {
                field_name: body.get_nul_string()?,
                column_oid: body.get_u32(),
                type_oid: body.get_u32(),
                length: body.get_i16(),
                type_modifier: body.get_i32(),
                nullable: body.get_u8() != 0,
            });
        }

        Ok(Self { columns })
    }
}

/// Identifies the message as a data row.
///
/// The column values are decoded lazily; the row buffer travels as one
/// opaque frame until materialization.
#[derive(Clone)]
pub struct DataRow {
    body: Bytes,
}

impl std::fmt::Debug for DataRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataRow")
            .field("num_cols", &self.num_cols())
            .field("body", &String::from_utf8_lossy(&self.body[2..]))
            .finish()
    }
}

impl DataRow {
    pub const MSGTYPE: u8 = b'D';

    /// Rebuild a row from a frame previously taken with [`into_bytes`][1].
    ///
    /// [1]: DataRow::into_bytes
    pub fn from_bytes(body: Bytes) -> Self {
        Self { body }
    }

    /// The raw frame, as stored by the row cache.
    pub fn into_bytes(self) -> Bytes {
        self.body
    }

    /// The number of column values in the row.
    pub fn num_cols(&self) -> u16 {
        (&self.body[..]).get_u16()
    }

    /// Iterate the per-column byte slices without allocating.
    pub fn chunks(&self) -> RowChunks {
        let mut body = self.body.clone();
        let num_cols = body.get_u16();
        RowChunks { remaining: num_cols, body }
    }
}

impl BackendProtocol for DataRow {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(DataRow, msgtype);
        Ok(Self { body })
    }
}

/// Cursor over the column values of one [`DataRow`].
///
/// Each column is `[i32 length][bytes]` with length `-1` denoting NULL;
/// the yielded [`Bytes`] are zero-copy slices of the row frame.
#[derive(Debug)]
pub struct RowChunks {
    remaining: u16,
    body: Bytes,
}

impl RowChunks {
    pub fn num_remaining(&self) -> u16 {
        self.remaining
    }
}

impl Iterator for RowChunks {
    /// `None` column value is NULL, distinct from an empty slice.
    type Item = Option<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let len = self.body.get_i32();
        if len < 0 {
            return Some(None);
        }
        Some(Some(self.body.split_to(len as usize)))
    }
}

/// Identifies the message as a command-completed response.
#[derive(Debug)]
pub struct CommandComplete {
    /// The command tag. This is usually a single word that identifies which
    /// SQL command was completed.
    pub tag: String,
}

impl CommandComplete {
    pub const MSGTYPE: u8 = b'C';
}

impl BackendProtocol for CommandComplete {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(CommandComplete, msgtype);
        Ok(Self { tag: body.get_nul_string()? })
    }
}

/// Reports the kind of command a just-bound portal will run.
///
/// Sent by this server family after Bind; the driver has no use for it
/// beyond skipping it.
#[derive(Debug)]
pub struct CommandDescription {
    pub body: Bytes,
}

impl CommandDescription {
    pub const MSGTYPE: u8 = b'm';
}

impl BackendProtocol for CommandDescription {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(CommandDescription, msgtype);
        Ok(Self { body })
    }
}

/// Identifies the message as a parameter description.
#[derive(Debug)]
pub struct ParameterDescription {
    /// The object ID of each parameter data type, in parameter order.
    pub oids: Vec<Oid>,
}

impl ParameterDescription {
    pub const MSGTYPE: u8 = b't';
}

impl BackendProtocol for ParameterDescription {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(ParameterDescription, msgtype);
        let param_len = body.get_u16();
        let mut oids = Vec::with_capacity(param_len as usize);
        for _ in 0..param_len {
            oids.push(body.get_u32());
        }
        Ok(Self { oids })
    }
}

/// The server is ready to receive copy-in data.
///
/// The body reports the overall format and per-column format codes;
/// they are always text for this driver.
#[derive(Debug)]
pub struct CopyInResponse {
    pub body: Bytes,
}

impl CopyInResponse {
    pub const MSGTYPE: u8 = b'G';
}

impl BackendProtocol for CopyInResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(CopyInResponse, msgtype);
        Ok(Self { body })
    }
}

/// The server is about to stream copy-out data.
#[derive(Debug)]
pub struct CopyOutResponse {
    pub body: Bytes,
}

impl CopyOutResponse {
    pub const MSGTYPE: u8 = b'H';
}

impl BackendProtocol for CopyOutResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(CopyOutResponse, msgtype);
        Ok(Self { body })
    }
}

macro_rules! unit_msg {
    ($(
        $(#[$doc:meta])* struct $name:ident, $ty:literal;
    )*) => {$(
            $(#[$doc])*
            #[derive(Debug)]
            pub struct $name;

            impl $name {
                pub const MSGTYPE: u8 = $ty;
            }

            impl BackendProtocol for $name {
                fn decode(msgtype: u8, _: Bytes) -> Result<Self,ProtocolError> {
                    if $name::MSGTYPE != msgtype {
                        return Err(ProtocolError::unexpected(stringify!($name),$name::MSGTYPE,msgtype))
                    }
                    Ok(Self)
                }
            }
    )*};
}

unit_msg! {
    /// Identifies the message as a Bind-complete indicator.
    struct BindComplete, b'2';

    /// Identifies the message as a Close-complete indicator.
    struct CloseComplete, b'3';

    /// Identifies the message as a response to an empty query string.
    ///
    /// This substitutes for CommandComplete.
    struct EmptyQueryResponse, b'I';

    /// Identifies the message as a no-data indicator.
    struct NoData, b'n';

    /// Identifies the message as a Parse-complete indicator.
    struct ParseComplete, b'1';

    /// Identifies the message as a portal-suspended indicator.
    ///
    /// Note this only appears if an Execute message's row-count limit was reached.
    struct PortalSuspended, b's';

    /// ReadyForQuery is sent whenever the backend is ready for a new query cycle.
    struct ReadyForQuery, b'Z';
}

#[cfg(test)]
mod test {
    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::protocol::BufMutExt;

    fn mock_row() -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_i16(4);
        buf.put_i32(3);
        buf.put_slice(b"123");
        buf.put_i32(5);
        buf.put_slice(b"hello");
        buf.put_i32(-1);
        buf.put_i32(3);
        buf.put_slice(b"456");
        buf.freeze()
    }

    #[test]
    fn row_chunks_in_order() {
        let row = DataRow::decode(b'D', mock_row()).unwrap();
        assert_eq!(row.num_cols(), 4);

        let mut chunks = row.chunks();
        assert_eq!(chunks.next().unwrap().as_deref(), Some(&b"123"[..]));
        assert_eq!(chunks.next().unwrap().as_deref(), Some(&b"hello"[..]));
        assert_eq!(chunks.next().unwrap(), None, "null column");
        assert_eq!(chunks.next().unwrap().as_deref(), Some(&b"456"[..]));
        assert!(chunks.next().is_none());
    }

    #[test]
    fn null_differs_from_empty() {
        let mut buf = BytesMut::new();
        buf.put_i16(2);
        buf.put_i32(0);
        buf.put_i32(-1);
        let row = DataRow::decode(b'D', buf.freeze()).unwrap();

        let mut chunks = row.chunks();
        let empty = chunks.next().unwrap();
        assert_eq!(empty.as_deref(), Some(&b""[..]));
        assert_eq!(chunks.next().unwrap(), None);
    }

    #[test]
    fn row_frame_survives_round_trip() {
        let frame = mock_row();
        let row = DataRow::decode(b'D', frame.clone()).unwrap();
        let back = DataRow::from_bytes(row.into_bytes());
        assert_eq!(back.into_bytes(), frame);
    }

    #[test]
    fn row_description_decode() {
        let mut buf = BytesMut::new();
        buf.put_u16(2);
        buf.put_nul_string("id");
        buf.put_u32(1);
        buf.put_u32(6);
        buf.put_i16(8);
        buf.put_i32(-1);
        buf.put_u8(0);
        buf.put_nul_string("name");
        buf.put_u32(2);
        buf.put_u32(9);
        buf.put_i16(-1);
        buf.put_i32(260);
        buf.put_u8(1);

        let desc = RowDescription::decode(b'T', buf.freeze()).unwrap();
        assert_eq!(desc.columns.len(), 2);
        assert_eq!(desc.columns[0].field_name, "id");
        assert_eq!(desc.columns[0].col_type(), crate::protocol::ColType::Int64);
        assert!(!desc.columns[0].nullable);
        assert_eq!(desc.columns[1].field_name, "name");
        assert_eq!(desc.columns[1].col_type(), crate::protocol::ColType::VarChar);
        assert!(desc.columns[1].nullable);
    }

    #[test]
    fn authentication_variants() {
        let mut buf = BytesMut::new();
        buf.put_i32(0);
        assert!(matches!(
            Authentication::decode(b'R', buf.freeze()).unwrap(),
            Authentication::Ok
        ));

        let mut buf = BytesMut::new();
        buf.put_i32(5);
        buf.put_slice(&[1, 2, 3, 4]);
        let Authentication::MD5Password { salt } = Authentication::decode(b'R', buf.freeze()).unwrap() else {
            panic!("expected md5 challenge")
        };
        assert_eq!(salt, [1, 2, 3, 4]);

        let mut buf = BytesMut::new();
        buf.put_i32(66048);
        buf.put_slice(&[9, 9, 9, 9]);
        buf.put_slice(b"usersalt");
        let Authentication::Sha512Password { salt, user_salt } =
            Authentication::decode(b'R', buf.freeze()).unwrap()
        else {
            panic!("expected sha512 challenge")
        };
        assert_eq!(salt, [9, 9, 9, 9]);
        assert_eq!(&user_salt[..], b"usersalt");

        let mut buf = BytesMut::new();
        buf.put_i32(2);
        assert!(Authentication::decode(b'R', buf.freeze()).is_err());
    }

    #[test]
    fn dispatch_by_msgtype() {
        let mut buf = BytesMut::new();
        buf.put_nul_string("SELECT 3");
        let msg = BackendMessage::decode(b'C', buf.freeze()).unwrap();
        let BackendMessage::CommandComplete(cmd) = msg else {
            panic!("expected command complete")
        };
        assert_eq!(cmd.tag, "SELECT 3");

        assert!(BackendMessage::decode(b'@', Bytes::new()).is_err());
    }
}
