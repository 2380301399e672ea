use railworld_common::ClusterId;

/// Errors reported by the cluster index.
///
/// Missing data is not an error here: lookups return `Option`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndexError {
    #[error("data exists in {cluster}")]
    DataExists { cluster: ClusterId },
    #[error("invalid scale range: min_scale {min_scale} exceeds max_scale {max_scale}")]
    InvalidScaleRange { min_scale: i32, max_scale: i32 },
    #[error("scale {scale} is outside -{limit}..={limit}")]
    ScaleOutOfBounds { scale: i32, limit: i32 },
    #[error("unknown cluster {0}")]
    UnknownCluster(ClusterId),
    #[error("the root cluster {0} cannot be deleted")]
    RootIsPermanent(ClusterId),
}
