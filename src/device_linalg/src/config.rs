//! Layer configuration carried by each device handle bundle.

use serde::{Deserialize, Serialize};

/// Configuration for device linear-algebra operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinalgConfig {
    /// Verify that every matrix/vector argument of an operation was created
    /// against the same handle bundle as the primary argument.
    ///
    /// Mixing bundles is a caller error either way; with the check off it is
    /// not detected.
    pub check_device_affinity: bool,

    /// Make workspace queries for operations this backend does not implement
    /// (LQ factorization, LQ orthogonal factor) raise `UnimplementedOperation`
    /// instead of answering zero.
    pub strict_workspace_queries: bool,
}

impl Default for LinalgConfig {
    fn default() -> Self {
        Self {
            check_device_affinity: cfg!(debug_assertions),
            strict_workspace_queries: false,
        }
    }
}

impl LinalgConfig {
    pub fn with_device_affinity_check(mut self, enabled: bool) -> Self {
        self.check_device_affinity = enabled;
        self
    }

    pub fn with_strict_workspace_queries(mut self, enabled: bool) -> Self {
        self.strict_workspace_queries = enabled;
        self
    }
}
