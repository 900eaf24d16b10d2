use std::path::PathBuf;

/// Error types for the command-line driver
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Clustering error: {0}")]
    Cluster(#[from] clustered_map_lib::ClusterError),

    #[error("Invalid region {0:?}: expected lat,lon,lat_delta,lon_delta")]
    InvalidRegion(String),

    #[error("Output error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;
