use serde::{Deserialize, Serialize};

use crate::IndexError;

/// Scale bounds of the cluster tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Scale of the root cluster. The world spans `2^max_scale` units per side.
    pub max_scale: i32,
    /// Finest scale. Clusters at this scale never subdivide.
    pub min_scale: i32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_scale: 16,
            min_scale: 2,
        }
    }
}

impl IndexConfig {
    /// Largest magnitude either scale may have. `2^scale` and the child
    /// offset `2^(scale - 2)` stay finite and nonzero inside it.
    pub const SCALE_LIMIT: i32 = 1000;

    pub fn validate(&self) -> Result<(), IndexError> {
        for scale in [self.max_scale, self.min_scale] {
            if !(-Self::SCALE_LIMIT..=Self::SCALE_LIMIT).contains(&scale) {
                return Err(IndexError::ScaleOutOfBounds {
                    scale,
                    limit: Self::SCALE_LIMIT,
                });
            }
        }
        if self.min_scale > self.max_scale {
            return Err(IndexError::InvalidScaleRange {
                min_scale: self.min_scale,
                max_scale: self.max_scale,
            });
        }
        Ok(())
    }

    /// Number of levels between the root and the finest clusters, inclusive.
    pub fn depth(&self) -> usize {
        (i64::from(self.max_scale) - i64::from(self.min_scale) + 1).max(0) as usize
    }
}
