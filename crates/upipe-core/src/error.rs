//! Closed error set shared by every runtime operation.
//!
//! Control commands, buffer operations and allocations all answer with one
//! of these codes. Data-path failures additionally surface as an `Error`
//! event on the probe chain; the pipe stays alive but degraded.

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error codes returned by runtime operations.
///
/// The set is closed: modules never invent new variants. OS-level failures
/// travel as [`Error::External`] wrapping the errno-like value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// The command or event was not handled by this component.
    #[error("unhandled")]
    Unhandled,
    /// Invalid argument or command for the component's current state.
    #[error("invalid argument")]
    Invalid,
    /// Allocation failed.
    #[error("allocation failure")]
    Alloc,
    /// External (OS) failure, carrying the errno-like value.
    #[error("external error (errno {0})")]
    External(i32),
    /// The resource is shared or otherwise busy; retry after duplicating
    /// or once the obstruction clears.
    #[error("resource busy")]
    Busy,
    /// Event-loop failure (pump allocation or arming).
    #[error("event loop error")]
    Upump,
}

impl Error {
    /// Shorthand for "did this operation succeed".
    pub fn is_unhandled(&self) -> bool {
        matches!(self, Error::Unhandled)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::External(err.raw_os_error().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_maps_to_external() {
        let io = std::io::Error::from_raw_os_error(libc::EAGAIN);
        assert_eq!(Error::from(io), Error::External(libc::EAGAIN));
    }

    #[test]
    fn test_display_is_stable() {
        assert_eq!(Error::Busy.to_string(), "resource busy");
        assert_eq!(Error::External(2).to_string(), "external error (errno 2)");
    }
}
