//! Common utilities and data structures shared by the Recast build pipeline, the Detour
//! runtime navmesh and the crowd layers.

mod geometry;
mod math;

pub use geometry::*;
pub use math::*;

/// Represents a 3D position (y is up)
pub type Vec3 = glam::Vec3;

/// Error types for the library
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input mesh: {0}")]
    InvalidMesh(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("resource exhausted: {0}")]
    ResourceExhaustion(String),

    #[error("navigation mesh generation failed: {0}")]
    NavMeshGeneration(String),

    #[error("recast error: {0}")]
    Recast(String),

    #[error("detour error: {0}")]
    Detour(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error means the input or settings were rejected before any work was done
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::InvalidMesh(_) | Error::Configuration(_))
    }

    /// Whether this error means a size or memory ceiling was hit mid-build
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, Error::ResourceExhaustion(_))
    }
}

/// Result type for navmesh operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert!(Error::InvalidMesh("empty".to_string()).is_configuration());
        assert!(Error::Configuration("cs".to_string()).is_configuration());
        assert!(Error::ResourceExhaustion("verts".to_string()).is_resource_exhaustion());
        assert!(!Error::Recast("x".to_string()).is_configuration());
    }

    #[test]
    fn test_io_error_conversion() {
        fn open() -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "missing"))?;
            Ok(())
        }
        let err = open().unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("missing"));
    }
}
