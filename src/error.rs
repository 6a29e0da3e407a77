//! Error types used by multiple modules.
//!
//! The most important type is [`Failed`]. This error indicates that an
//! operation on a single object had to be abandoned, that all diagnostic
//! information has been logged already, and that the caller need not do
//! anything further with the object.
//!
//! Secondly, [`ExitError`] is used when the owning process should be
//! terminated, e.g., because it ran out of a vital resource.

use log::error;


//------------ Failed --------------------------------------------------------

/// An operation has failed to complete.
///
/// This error type is used to indicate that an operation has failed,
/// diagnostic information has been printed or logged, and the caller can’t
/// really do anything to recover.
#[derive(Clone, Copy, Debug)]
pub struct Failed;


//------------ ExitError -----------------------------------------------------

/// An error happened that should lead to terminating the process.
#[derive(Clone, Copy, Debug)]
pub enum ExitError {
    /// Something has happened.
    ///
    /// This should be exit status 1.
    Generic,
}

impl From<Failed> for ExitError {
    fn from(_: Failed) -> ExitError {
        error!("Fatal error. Exiting.");
        ExitError::Generic
    }
}
