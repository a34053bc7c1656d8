use std::{collections::TryReserveError, error, fmt};

// -------------------------------------------------------------------------------------------------

/// Provides an enumeration of all possible errors reported by graincloud.
///
/// Errors are only ever reported on the control side: the render path degrades to silence or
/// dropped grains instead.
#[derive(Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    ParameterError(String),
    TrackNotFoundError(usize),
    BufferAllocationError(String),
    SendError(String),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParameterError(str) => write!(f, "Invalid parameter: {str}"),
            Self::TrackNotFoundError(track) => write!(f, "Track with id {track} not found"),
            Self::BufferAllocationError(str) => {
                write!(f, "Failed to allocate sample buffer memory: {str}")
            }
            Self::SendError(str) => write!(f, "Failed to send engine message: {str}"),
        }
    }
}

impl From<TryReserveError> for Error {
    fn from(err: TryReserveError) -> Self {
        Error::BufferAllocationError(err.to_string())
    }
}
