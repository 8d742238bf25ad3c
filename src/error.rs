use thiserror::Error;

/// Error codes carried by `Error` replies.
pub const ERR_UNKNOWN: i32 = 1;
pub const ERR_2BIG: i32 = 2;
pub const ERR_TYPE: i32 = 3;
pub const ERR_ARG: i32 = 4;

/// A frame or reply that cannot be decoded. Fatal for the connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("message of {len} bytes exceeds the frame limit")]
    TooLong { len: usize },

    #[error("too many arguments: {argc}")]
    TooManyArgs { argc: usize },

    #[error("truncated message")]
    Truncated,

    #[error("{extra} trailing bytes after message")]
    TrailingBytes { extra: usize },

    #[error("unknown reply tag 0x{0:02x}")]
    UnknownTag(u8),

    #[error("arrays nested deeper than {limit}")]
    TooDeep { limit: usize },
}

/// A command the dispatcher refuses. Reported to the client, the
/// connection stays open.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command")]
    Unknown,

    #[error("{0}")]
    BadArg(&'static str),

    #[error("{0}")]
    WrongType(&'static str),
}

impl CommandError {
    pub fn code(&self) -> i32 {
        match self {
            CommandError::Unknown => ERR_UNKNOWN,
            CommandError::BadArg(_) => ERR_ARG,
            CommandError::WrongType(_) => ERR_TYPE,
        }
    }
}
