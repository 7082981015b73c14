use std::{error, fmt, io};

/// Stage of endpoint setup or polling that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Resolve,
    Socket,
    Bind,
    Listen,
    Connect,
    Accept,
    Register,
    Poll,
}

impl Op {
    fn as_str(self) -> &'static str {
        match self {
            Self::Resolve => "resolve",
            Self::Socket => "socket",
            Self::Bind => "bind",
            Self::Listen => "listen",
            Self::Connect => "connect",
            Self::Accept => "accept",
            Self::Register => "register",
            Self::Poll => "poll",
        }
    }
}

/// A failed driver operation.
///
/// Setup and poll failures are returned to the caller and also recorded as
/// the driver's sticky last error, where embedders polling the C-style
/// surface can pick them up between cycles.
#[derive(Clone, Debug)]
pub struct DriverError {
    op: Op,
    code: i32,
    detail: String,
}

impl DriverError {
    pub(crate) fn os(op: Op, err: &io::Error) -> Self {
        Self {
            op,
            code: err.raw_os_error().unwrap_or(-1),
            detail: err.to_string(),
        }
    }

    pub(crate) fn detail(op: Op, detail: impl Into<String>) -> Self {
        Self {
            op,
            code: -1,
            detail: detail.into(),
        }
    }

    /// Stage that failed.
    pub fn op(&self) -> Op {
        self.op
    }

    /// Raw OS error code, or -1 where none applies.
    pub fn code(&self) -> i32 {
        self.code
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.op.as_str(), self.detail)
    }
}

impl error::Error for DriverError {}
