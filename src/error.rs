//! Error kinds surfaced by the APX core to callers.
//!
//! A single error type threaded through every public `Result`, derived with
//! `thiserror` rather than built on libc errno codes — there is no kernel ABI
//! underneath this protocol.

use std::fmt;

/// Convenience alias used throughout the crate in place of `std::result::Result`.
pub type Result<T> = std::result::Result<T, Error>;

/// Every fallible outcome the APX core can report.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Null or missing required input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Malformed frame, address header, or command.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Offset+len exceeds a buffer, or size mismatch on routing.
    #[error("value length error: offset {offset} len {len} exceeds bound {bound}")]
    ValueLengthError {
        offset: usize,
        len: usize,
        bound: usize,
    },

    /// Write to an offset that is not a port boundary.
    #[error("invalid write at offset {offset}: not a port boundary")]
    InvalidWrite { offset: usize },

    /// Allocation failure.
    #[error("memory allocation failed: {0}")]
    Memory(String),

    /// File auto-assignment failed (region full) or name duplicate.
    #[error("cannot create file {name:?}: {reason}")]
    FileCreate { name: String, reason: &'static str },

    /// Write requested on a file whose remote end has not opened it.
    #[error("file at address {address:#x} is not open")]
    FileNotOpen { address: u32 },

    /// File opened without an owner notification handler.
    #[error("file at address {address:#x} has no notification handler installed")]
    InvalidOpenHandler { address: u32 },

    /// Unknown command type or feature.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Feature acknowledged by the protocol but not yet implemented.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// The transport reported a buffer overflow.
    #[error("transmit handler buffer overflow: requested {requested}, available {available}")]
    TransmitHandlerOverflow { requested: usize, available: usize },

    /// The transport rejected an argument (e.g. a zero-length reservation).
    #[error("transmit handler invalid argument: {0}")]
    TransmitHandlerInvalidArgument(String),

    /// Underlying transport I/O failure.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unreachable invariant violation.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }
}

/// The numeric error code carried by the wire `Error` command.
///
/// Distinct from [`Error`] itself: this is the small, stable, wire-level encoding sent
/// to a remote peer, not the rich local diagnostic type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::IntoPrimitive, num_enum::TryFromPrimitive)]
#[repr(u32)]
pub enum WireErrorCode {
    InvalidArgument = 1,
    ParseError = 2,
    ValueLengthError = 3,
    InvalidWrite = 4,
    Memory = 5,
    FileCreate = 6,
    FileNotOpen = 7,
    InvalidOpenHandler = 8,
    Unsupported = 9,
    NotImplemented = 10,
    Internal = 11,
}

impl From<&Error> for WireErrorCode {
    fn from(e: &Error) -> Self {
        match e {
            Error::InvalidArgument(_) => WireErrorCode::InvalidArgument,
            Error::ParseError(_) => WireErrorCode::ParseError,
            Error::ValueLengthError { .. } => WireErrorCode::ValueLengthError,
            Error::InvalidWrite { .. } => WireErrorCode::InvalidWrite,
            Error::Memory(_) => WireErrorCode::Memory,
            Error::FileCreate { .. } => WireErrorCode::FileCreate,
            Error::FileNotOpen { .. } => WireErrorCode::FileNotOpen,
            Error::InvalidOpenHandler { .. } => WireErrorCode::InvalidOpenHandler,
            Error::Unsupported(_) => WireErrorCode::Unsupported,
            Error::NotImplemented(_) => WireErrorCode::NotImplemented,
            Error::TransmitHandlerOverflow { .. }
            | Error::TransmitHandlerInvalidArgument(_)
            | Error::Io(_) => WireErrorCode::Internal,
            Error::Internal(_) => WireErrorCode::Internal,
        }
    }
}

impl fmt::Display for WireErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_error_code_round_trips_through_u32() {
        let code = WireErrorCode::FileNotOpen;
        let raw: u32 = code.into();
        assert_eq!(raw, 7);
        assert_eq!(WireErrorCode::try_from(raw).unwrap(), WireErrorCode::FileNotOpen);
    }

    #[test]
    fn every_error_variant_maps_to_a_wire_code() {
        let err = Error::FileNotOpen { address: 0x10 };
        let code = WireErrorCode::from(&err);
        assert_eq!(code, WireErrorCode::FileNotOpen);
    }
}
