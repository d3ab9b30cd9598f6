//! Status codes for Detour operations

use recast_common::Error;

/// Status enum for Detour operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Operation was successful
    Success,
    /// Operation failed due to an unknown reason
    Failure,
    /// Provided parameter was invalid
    InvalidParam,
    /// Operation ran out of memory
    OutOfMemory,
    /// Pathfinding failed; no valid path found
    PathInvalid,
    /// Value already exists
    AlreadyExists,
    /// Value does not exist or is not found
    NotFound,
    /// Operation partially succeeded
    PartialResult,
    /// Navigation mesh tile is out of bounds
    TileOutOfBounds,
    /// Input data is corrupted or invalid
    DataCorrupted,
    /// File has wrong magic number
    WrongMagic,
    /// File has wrong version
    WrongVersion,
}

impl Status {
    /// Checks if the status is a failure
    pub fn is_failure(&self) -> bool {
        *self != Status::Success && *self != Status::PartialResult
    }

    /// Checks if the status is a success
    pub fn is_success(&self) -> bool {
        *self == Status::Success || *self == Status::PartialResult
    }

    /// Converts status to a result
    pub fn to_result<T>(self, value: T) -> recast_common::Result<T> {
        if self.is_success() {
            Ok(value)
        } else {
            Err(self.into())
        }
    }
}

impl std::error::Error for Status {}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Success => write!(f, "Success"),
            Status::Failure => write!(f, "Failure"),
            Status::InvalidParam => write!(f, "Invalid parameter"),
            Status::OutOfMemory => write!(f, "Out of memory"),
            Status::PathInvalid => write!(f, "Invalid path"),
            Status::AlreadyExists => write!(f, "Value already exists"),
            Status::NotFound => write!(f, "Value not found"),
            Status::PartialResult => write!(f, "Partial result"),
            Status::TileOutOfBounds => write!(f, "Tile out of bounds"),
            Status::DataCorrupted => write!(f, "Data corrupted"),
            Status::WrongMagic => write!(f, "Wrong magic number"),
            Status::WrongVersion => write!(f, "Wrong version"),
        }
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        match status {
            Status::OutOfMemory => Error::ResourceExhaustion(status.to_string()),
            _ => Error::Detour(status.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_to_result() {
        assert_eq!(Status::Success.to_result(3).unwrap(), 3);
        assert!(Status::PartialResult.to_result(()).is_ok());
        let err = Status::WrongMagic.to_result(()).unwrap_err();
        assert!(matches!(err, Error::Detour(ref m) if m == "Wrong magic number"));
    }

    #[test]
    fn test_out_of_memory_is_resource_exhaustion() {
        let err: Error = Status::OutOfMemory.into();
        assert!(err.is_resource_exhaustion());
    }
}
