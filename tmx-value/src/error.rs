use thiserror::Error;

/// POSIX-compatible numeric aliases carried in the `code` field of a
/// [`TmxError`] so that errors survive a trip across the bus unchanged.
pub mod codes {
    pub const EINVAL: i32 = 22;
    pub const ENOTSUP: i32 = 95;
    pub const EPROTO: i32 = 71;
    pub const EBADMSG: i32 = 74;
    pub const EILSEQ: i32 = 84;
    pub const EMSGSIZE: i32 = 90;
    pub const ECONNRESET: i32 = 104;
    pub const ENOTCONN: i32 = 107;
    pub const ETIMEDOUT: i32 = 110;
    pub const ECANCELED: i32 = 125;
    pub const EIO: i32 = 5;
    pub const EAGAIN: i32 = 11;
}

/// The error currency of the bus.
///
/// Every fallible operation in the runtime resolves to one of these; codecs
/// and brokers convert their internal failures into a `TmxError` before the
/// value crosses a component boundary. A zero code means success and is only
/// ever seen inside completion notifications.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{code}] {message}")]
pub struct TmxError {
    pub code: i32,
    pub message: String,
}

pub type TmxResult<T> = Result<T, TmxError>;

impl TmxError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// A success marker for completion notifications.
    pub fn none() -> Self {
        Self {
            code: 0,
            message: String::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(codes::EINVAL, message)
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::new(codes::ENOTSUP, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(codes::EILSEQ, message)
    }

    pub fn bad_message(message: impl Into<String>) -> Self {
        Self::new(codes::EBADMSG, message)
    }

    pub fn message_size(message: impl Into<String>) -> Self {
        Self::new(codes::EMSGSIZE, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(codes::EPROTO, message)
    }

    pub fn connection_reset(message: impl Into<String>) -> Self {
        Self::new(codes::ECONNRESET, message)
    }

    pub fn not_connected(message: impl Into<String>) -> Self {
        Self::new(codes::ENOTCONN, message)
    }

    pub fn timed_out(message: impl Into<String>) -> Self {
        Self::new(codes::ETIMEDOUT, message)
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(codes::ECANCELED, message)
    }
}

impl From<std::io::Error> for TmxError {
    fn from(err: std::io::Error) -> Self {
        let code = err.raw_os_error().unwrap_or(codes::EIO);
        Self::new(code, err.to_string())
    }
}
