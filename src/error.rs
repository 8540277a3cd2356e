//! Error taxonomy for the radiosity solver.
//!
//! Recoverable conditions (bad config, an empty scene, too many shaft-culling
//! exceptions) are returned as [`RadiosityError`]. Conditions that indicate a
//! broken invariant in the caller or in this crate itself (subdividing a
//! cluster, a non-triangle/quad patch, an unsupported cubature node count)
//! panic instead, per the contract documented in `SPEC_FULL.md` section 7 -
//! they can only be reached by violating a documented precondition, never by
//! adversarial scene data.

use thiserror::Error;

/// Errors returned by the public solver API.
#[derive(Debug, Error)]
pub enum RadiosityError {
    // === Configuration errors ===
    #[error("relative_min_element_area must be > 0, got {0}")]
    InvalidMinElementArea(f32),

    #[error("relative_link_error_threshold must be > 0, got {0}")]
    InvalidLinkErrorThreshold(f32),

    #[error("scratch_frame_buffer_size must be > 0, got {0}")]
    InvalidScratchFrameBufferSize(u32),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // === Scene errors ===
    #[error("scene has no root geometry to build a cluster hierarchy from")]
    EmptyScene,

    #[error("patch {0} has {1} vertices; only triangles and quads are supported")]
    UnsupportedPatchValence(u64, usize),

    // === Shaft culling ===
    #[error("shaft culling omit list exceeded its capacity of {cap} entries")]
    TooManyOmitEntries { cap: usize },

    #[error("shaft culling don't-open list exceeded its capacity of {cap} entries")]
    TooManyDontOpenEntries { cap: usize },
}

impl RadiosityError {
    /// True for errors that originate from a malformed or unusable `Config`.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            RadiosityError::InvalidMinElementArea(_)
                | RadiosityError::InvalidLinkErrorThreshold(_)
                | RadiosityError::InvalidScratchFrameBufferSize(_)
                | RadiosityError::InvalidConfig(_)
        )
    }

    /// True for errors caused by the scene itself rather than configuration.
    pub fn is_scene_error(&self) -> bool {
        matches!(
            self,
            RadiosityError::EmptyScene | RadiosityError::UnsupportedPatchValence(_, _)
        )
    }
}

/// Convenience alias used throughout the crate.
pub type RadiosityResult<T> = Result<T, RadiosityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_categorized() {
        let e = RadiosityError::InvalidMinElementArea(-1.0);
        assert!(e.is_config_error());
        assert!(!e.is_scene_error());
        assert!(e.to_string().contains("relative_min_element_area"));
    }

    #[test]
    fn scene_errors_are_categorized() {
        let e = RadiosityError::EmptyScene;
        assert!(e.is_scene_error());
        assert!(!e.is_config_error());
    }

    #[test]
    fn unsupported_valence_message_includes_count() {
        let e = RadiosityError::UnsupportedPatchValence(7, 5);
        let msg = e.to_string();
        assert!(msg.contains('7'));
        assert!(msg.contains('5'));
    }

    #[test]
    fn shaft_cap_errors_report_capacity() {
        let e = RadiosityError::TooManyOmitEntries { cap: 2 };
        assert!(e.to_string().contains('2'));
    }
}
