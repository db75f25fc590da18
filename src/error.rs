use thiserror::Error;

use crate::metadata::host::HResult;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! host_error {
    ($operation:expr, $hresult:expr) => {
        crate::Error::HostCall {
            operation: $operation,
            hresult: $hresult,
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// None of these errors ever cross the callback boundary towards the runtime. The profiler
/// swallows them at module or method scope and only reports them through the `log` facade, so
/// the monitored process keeps running when instrumentation fails.
///
/// # Error Categories
///
/// ## Decoding Errors
/// - [`Error::Malformed`] - Corrupted method body, signature or instruction stream
/// - [`Error::OutOfBounds`] - Attempted to read beyond the provided buffer
/// - [`Error::NotSupported`] - Encoding that is valid but not handled (e.g. unknown opcodes)
/// - [`Error::Empty`] - Empty input provided
///
/// ## Rewriting Errors
/// - [`Error::InvalidState`] - Rewriter operation called in the wrong lifecycle state
/// - [`Error::MethodTooLarge`] - Re-encoded method exceeds the runtime's limits
/// - [`Error::InvalidInstruction`] - Cursor or branch target does not refer to a live instruction
///
/// ## Host and Environment Errors
/// - [`Error::HostCall`] - A call into the runtime's metadata or profiling interfaces failed
/// - [`Error::Config`] - Invalid or missing configuration
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::Json`] - Integration definition files could not be deserialized
/// - [`Error::AttachFailed`] - The profiler declined to attach to the process
///
/// # Examples
///
/// ```rust
/// use dotweave::{Error, assembly::ILRewriter};
///
/// let mut rewriter = ILRewriter::new();
/// match rewriter.export() {
///     Err(Error::InvalidState(message)) => eprintln!("rewriter misuse: {}", message),
///     Err(e) => eprintln!("Other error: {}", e),
///     Ok(_) => unreachable!(),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The input is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected for
    /// debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// The encoding is valid but not handled by this library.
    #[error("This encoding is not supported")]
    NotSupported,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// A rewriter operation was requested in a state that does not allow it.
    ///
    /// Exporting before importing, or editing after the body has been exported, both end up
    /// here.
    #[error("Invalid rewriter state - {0}")]
    InvalidState(&'static str),

    /// A referenced instruction id is not part of the instruction list.
    #[error("Invalid instruction reference - {0}")]
    InvalidInstruction(usize),

    /// The re-encoded method body exceeds the maximum size accepted by the runtime.
    #[error("Method body too large - {0} bytes of code")]
    MethodTooLarge(usize),

    /// A call into the runtime's profiling or metadata interfaces reported a failure.
    ///
    /// # Fields
    ///
    /// * `operation` - Name of the host operation that failed
    /// * `hresult` - The status code returned by the host
    #[error("Host call {operation} failed with {hresult}")]
    HostCall {
        /// The host operation that failed
        operation: &'static str,
        /// The status code returned
        hresult: HResult,
    },

    /// Invalid or missing configuration value.
    #[error("Configuration error - {0}")]
    Config(String),

    /// The profiler decided not to attach to this process.
    #[error("Profiler not attached - {0}")]
    AttachFailed(String),

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Integration definitions could not be deserialized.
    #[error("{0}")]
    Json(#[from] serde_json::Error),

    /// Reached the maximum nesting depth while parsing a signature.
    #[error("Reach the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),

    /// Failed to acquire a lock.
    #[error("Failed to lock target")]
    LockError,

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}
