/*!
Welcome to `cmafuzz`

`cmafuzz` generates test suites for C programs by treating input synthesis as
black-box optimization: an evolution strategy searches a box of real vectors,
each vector is truncated to a byte string and piped to an instrumented target,
and the gcov coverage percentage is the only feedback.

The moving parts, leaves first:

* [`inputs`] - encode a real-valued [`inputs::Sample`] into an [`inputs::EncodedInput`]
* [`executors`] - the [`executors::Harness`] that compiles, runs and measures a target
* [`observers`] - parsing of coverage reports
* [`optimizers`] - the ask/tell [`optimizers::Optimizer`] capability and a separable CMA-ES
* [`driver`] - the generation loop with population escalation
* [`corpus`] - the sample collector that builds the test suite
* [`fuzzer`] - the orchestrator, [`fuzzer::Fuzzer::generate_testsuite`]
*/

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(
    clippy::unreadable_literal,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::similar_names
)]
#![cfg_attr(not(test), warn(
    missing_debug_implementations,
    missing_docs,
    //trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
    //unused_results
))]
#![cfg_attr(test, deny(
    missing_debug_implementations,
    missing_docs,
    //trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_must_use,
    //unused_results
))]

#[cfg(feature = "cli")]
pub mod cli;
pub mod corpus;
pub mod driver;
pub mod executors;
pub mod fuzzer;
pub mod inputs;
pub mod monitors;
pub mod observers;
pub mod optimizers;

use core::{
    fmt,
    num::{ParseFloatError, ParseIntError},
};
use std::io;

pub use fuzzer::{FuzzReport, Fuzzer, StopReason};

#[cfg(feature = "errors_backtrace")]
/// Error Backtrace type when `errors_backtrace` feature is enabled (== [`backtrace::Backtrace`])
pub type ErrorBacktrace = backtrace::Backtrace;

#[cfg(not(feature = "errors_backtrace"))]
#[derive(Debug, Default)]
/// Empty struct to use when `errors_backtrace` is disabled
pub struct ErrorBacktrace {}
#[cfg(not(feature = "errors_backtrace"))]
impl ErrorBacktrace {
    /// Nop
    #[must_use]
    pub fn new() -> Self {
        Self {}
    }
}

#[cfg(feature = "errors_backtrace")]
fn display_error_backtrace(f: &mut fmt::Formatter, err: &ErrorBacktrace) -> fmt::Result {
    write!(f, "\nBacktrace: {err:?}")
}
#[cfg(not(feature = "errors_backtrace"))]
#[allow(clippy::unnecessary_wraps)]
fn display_error_backtrace(_f: &mut fmt::Formatter, _err: &ErrorBacktrace) -> fmt::Result {
    fmt::Result::Ok(())
}

/// Main error struct for `cmafuzz`
#[derive(Debug)]
pub enum Error {
    /// Serialization error
    Serialize(String, ErrorBacktrace),
    /// File related error
    File(io::Error, ErrorBacktrace),
    /// The target could not be built. Fatal for the target.
    Compile(String, ErrorBacktrace),
    /// A coverage report could not be parsed
    Parse(String, ErrorBacktrace),
    /// You're holding it wrong
    IllegalState(String, ErrorBacktrace),
    /// The argument passed to this method or function is not valid
    IllegalArgument(String, ErrorBacktrace),
    /// Something else happened
    Unknown(String, ErrorBacktrace),
}

impl Error {
    /// Serialization error
    #[must_use]
    pub fn serialize<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::Serialize(arg.into(), ErrorBacktrace::new())
    }
    /// File related error
    #[must_use]
    pub fn file(arg: io::Error) -> Self {
        Error::File(arg, ErrorBacktrace::new())
    }
    /// The target could not be built
    #[must_use]
    pub fn compile<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::Compile(arg.into(), ErrorBacktrace::new())
    }
    /// A coverage report could not be parsed
    #[must_use]
    pub fn parse<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::Parse(arg.into(), ErrorBacktrace::new())
    }
    /// You're holding it wrong
    #[must_use]
    pub fn illegal_state<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::IllegalState(arg.into(), ErrorBacktrace::new())
    }
    /// The argument passed to this method or function is not valid
    #[must_use]
    pub fn illegal_argument<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::IllegalArgument(arg.into(), ErrorBacktrace::new())
    }
    /// Something else happened
    #[must_use]
    pub fn unknown<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::Unknown(arg.into(), ErrorBacktrace::new())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Serialize(s, b) => {
                write!(f, "Error in Serialization: `{0}`", &s)?;
                display_error_backtrace(f, b)
            }
            Self::File(err, b) => {
                write!(f, "File IO failed: {:?}", &err)?;
                display_error_backtrace(f, b)
            }
            Self::Compile(s, b) => {
                write!(f, "Compilation failed: {0}", &s)?;
                display_error_backtrace(f, b)
            }
            Self::Parse(s, b) => {
                write!(f, "Could not parse coverage report: {0}", &s)?;
                display_error_backtrace(f, b)
            }
            Self::IllegalState(s, b) => {
                write!(f, "Illegal state: {0}", &s)?;
                display_error_backtrace(f, b)
            }
            Self::IllegalArgument(s, b) => {
                write!(f, "Illegal argument: {0}", &s)?;
                display_error_backtrace(f, b)
            }
            Self::Unknown(s, b) => {
                write!(f, "Unknown error: {0}", &s)?;
                display_error_backtrace(f, b)
            }
        }
    }
}

/// Stringify the json serializer error
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialize(format!("{err:?}"))
    }
}

/// Create a `cmafuzz` Error from io Error
impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::file(err)
    }
}

impl From<ParseFloatError> for Error {
    fn from(err: ParseFloatError) -> Self {
        Self::parse(format!("Failed to parse float: {err:?}"))
    }
}

impl From<ParseIntError> for Error {
    fn from(err: ParseIntError) -> Self {
        Self::illegal_argument(format!("Failed to parse Int: {err:?}"))
    }
}

impl From<cmafuzz_cc::Error> for Error {
    fn from(err: cmafuzz_cc::Error) -> Self {
        match err {
            cmafuzz_cc::Error::Io(err) => Self::compile(format!("could not run compiler: {err}")),
            err => Self::compile(err.to_string()),
        }
    }
}

impl std::error::Error for Error {}
