/// Server object identifier naming a data type in the catalog.
///
/// The oid type is implemented as an unsigned four-byte integer.
pub type Oid = u32;

/// Column data types reported by the server, keyed by [`Oid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColType {
    Boolean,
    Int64,
    Float64,
    Char,
    VarChar,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Interval,
    TimeTz,
    Numeric,
    VarBinary,
    Uuid,
    IntervalYM,
    LongVarChar,
    LongVarBinary,
    Binary,
    /// Any oid the driver does not recognize; values pass through as text.
    Unknown(Oid),
}

macro_rules! col_type {
    ($($name:ident = $oid:literal, $label:literal;)*) => {
        impl ColType {
            pub const fn from_oid(oid: Oid) -> ColType {
                match oid {
                    $($oid => ColType::$name,)*
                    other => ColType::Unknown(other),
                }
            }

            pub const fn oid(self) -> Oid {
                match self {
                    $(ColType::$name => $oid,)*
                    ColType::Unknown(other) => other,
                }
            }

            /// Type name as the standard sql layer reports it.
            pub const fn database_type_name(self) -> &'static str {
                match self {
                    $(ColType::$name => $label,)*
                    ColType::Unknown(_) => "UNKNOWN",
                }
            }
        }
    };
}

col_type! {
    Boolean = 5, "BOOL";
    Int64 = 6, "INT";
    Float64 = 7, "FLOAT";
    Char = 8, "CHAR";
    VarChar = 9, "VARCHAR";
    Date = 10, "DATE";
    Time = 11, "TIME";
    Timestamp = 12, "TIMESTAMP";
    TimestampTz = 13, "TIMESTAMPTZ";
    Interval = 14, "INTERVAL";
    TimeTz = 15, "TIMETZ";
    Numeric = 16, "NUMERIC";
    VarBinary = 17, "VARBINARY";
    Uuid = 20, "UUID";
    IntervalYM = 114, "INTERVALYM";
    LongVarChar = 115, "LONG VARCHAR";
    LongVarBinary = 116, "LONG VARBINARY";
    Binary = 117, "BINARY";
}
