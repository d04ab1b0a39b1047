// We want a few things here:
// 1. A way to create a new error with a backtrace
// 2. A way to centralize setting a breakpoint to trap any error in the system fairly soon
//    after it's created (or at least when it's propagated from a library we use back to us)
// 3. Same but for logging / emitting error messages into the tracing/logging system
// 4. A place to carry the stable integer codes the query state machine reports (spec §7)

use std::borrow::Cow;
use backtrace_error::DynBacktraceError;
use tracing::error;

#[cfg(test)]
use test_log::test;

pub mod codes {
    //! Stable integer codes returned by the query state machine (spec §7).
    pub const NIL_PARTITION: i32 = -1;
    pub const BAD_SELECT_EMPTY: i32 = -2;
    pub const BAD_SELECT_UNKNOWN_COLUMN: i32 = -3;
    pub const BAD_WHERE_PARSE: i32 = -4;
    pub const BAD_WHERE_UNKNOWN_COLUMN: i32 = -5;
    pub const BAD_WHERE_TYPE_MISMATCH: i32 = -6;
    pub const EMPTY_RIDS: i32 = -7;
    pub const NEITHER_RIDS_NOR_WHERE: i32 = -8;
    pub const RUNTIME_EXCEPTION: i32 = -9;
    pub const NO_CACHE_DIR: i32 = -10;
    pub const NOT_FULLY_EVALUATED: i32 = -11;
}

#[derive(Debug)]
#[allow(dead_code)]
pub struct Error {
    inner: DynBacktraceError,
    code: Option<i32>,
}
pub type Result<T> = std::result::Result<T, Error>;

struct SimpleErr(Cow<'static, str>);
impl std::fmt::Debug for SimpleErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::fmt::Display for SimpleErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for SimpleErr {
    fn description(&self) -> &str {
        &self.0
    }
}

impl<E: std::error::Error + Send + Sync + 'static> From<E> for Error {
    fn from(err: E) -> Error {
        Error::new(err)
    }
}

impl Error {
    pub fn new<E: std::error::Error + Send + Sync + 'static>(err: E) -> Error {
        error!(target: "colbase", "{:?}", err);
        let dbe = DynBacktraceError::from(err);
        Error { inner: dbe, code: None }
    }

    /// The stable integer code this error should be reported to callers as
    /// (spec §7), if one applies. Errors that originate from ordinary I/O or
    /// logic failures (rather than a query-state-machine transition) carry
    /// no code.
    pub fn code(&self) -> Option<i32> {
        self.code
    }

    pub fn with_code(mut self, code: i32) -> Error {
        self.code = Some(code);
        self
    }
}

pub fn err(msg: impl Into<Cow<'static, str>>) -> Error {
    let err = SimpleErr(msg.into());
    Error::new(err)
}

/// Construct an error already tagged with one of the stable codes in
/// [`codes`]; used at query-state-machine transition points (spec §7).
pub fn err_code(msg: impl Into<Cow<'static, str>>, code: i32) -> Error {
    err(msg).with_code(code)
}

#[test]
fn test_error() {
    let e = err("test error");
    assert_eq!(e.code(), None);
}

#[test]
fn test_error_with_code() {
    let e = err_code("nil partition", codes::NIL_PARTITION);
    assert_eq!(e.code(), Some(codes::NIL_PARTITION));
}
