//! Solver configuration.
//!
//! `Config` is constructed once (`Config::default()`, optionally overridden)
//! and validated by [`Config::validate`] before a solve starts. Defaults
//! mirror the reference implementation's option table rather than guessing;
//! see `SPEC_FULL.md` section 3a for the source of each value.

use serde::{Deserialize, Serialize};

use crate::error::RadiosityError;

/// Gathering (Jacobi/Gauss-Seidel) vs. shooting (Southwell) iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IterationMethod {
    Jacobi,
    GaussSeidel,
    Southwell,
}

impl IterationMethod {
    pub fn is_shooting(&self) -> bool {
        matches!(self, IterationMethod::Southwell)
    }
}

/// Polynomial order of the radiance basis used on surface elements.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BasisType {
    Constant,
    Linear,
    Quadratic,
    Cubic,
}

impl BasisType {
    /// Number of basis coefficients on a surface element of this type.
    /// Clusters always use a single (constant) coefficient regardless of
    /// this setting.
    pub fn basis_size(&self) -> usize {
        match self {
            BasisType::Constant => 1,
            BasisType::Linear => 3,
            BasisType::Quadratic => 6,
            BasisType::Cubic => 10,
        }
    }
}

/// Cubature rule degree, chosen independently for receiver and source sides.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CubatureDegree {
    Degree1,
    Degree2,
    Degree3,
    Degree4,
    Degree5,
    Degree6,
    Degree7,
    Degree8,
    Degree9,
}

impl CubatureDegree {
    pub fn as_order(&self) -> u32 {
        match self {
            CubatureDegree::Degree1 => 1,
            CubatureDegree::Degree2 => 2,
            CubatureDegree::Degree3 => 3,
            CubatureDegree::Degree4 => 4,
            CubatureDegree::Degree5 => 5,
            CubatureDegree::Degree6 => 6,
            CubatureDegree::Degree7 => 7,
            CubatureDegree::Degree8 => 8,
            CubatureDegree::Degree9 => 9,
        }
    }
}

/// Whether the refinement error threshold scales with radiance or power.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorNorm {
    Radiance,
    Power,
}

/// How a cluster's radiance toward a sample point is approximated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusteringStrategy {
    Isotropic,
    Oriented,
    ZVisibility,
}

/// When to consult shaft culling during refinement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShaftCullMode {
    ForRefinement,
    Always,
}

/// How shaft culling treats geometries overlapping the shaft.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShaftCullStrategy {
    KeepClosed,
    OverlapOpen,
    AlwaysOpen,
}

/// Full solver configuration. See `SPEC_FULL.md` section 3a for the
/// semantics of every field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub iteration_method: IterationMethod,
    pub hierarchical: bool,
    pub clustered: bool,
    pub lazy_linking: bool,
    pub importance_driven: bool,
    pub use_ambient_radiance: bool,
    pub basis_type: BasisType,
    pub receiver_cubature_degree: CubatureDegree,
    pub source_cubature_degree: CubatureDegree,
    pub relative_min_element_area: f32,
    pub relative_link_error_threshold: f32,
    pub error_norm: ErrorNorm,
    pub clustering_strategy: ClusteringStrategy,
    pub shaft_cull_mode: ShaftCullMode,
    pub shaft_cull_strategy: ShaftCullStrategy,
    pub exact_visibility: bool,
    pub multi_resolution_visibility: bool,
    pub scratch_frame_buffer_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            iteration_method: IterationMethod::Jacobi,
            hierarchical: true,
            clustered: true,
            lazy_linking: true,
            importance_driven: false,
            use_ambient_radiance: false,
            basis_type: BasisType::Linear,
            receiver_cubature_degree: CubatureDegree::Degree5,
            source_cubature_degree: CubatureDegree::Degree4,
            relative_min_element_area: 1e-6,
            relative_link_error_threshold: 1e-5,
            error_norm: ErrorNorm::Power,
            clustering_strategy: ClusteringStrategy::Isotropic,
            shaft_cull_mode: ShaftCullMode::ForRefinement,
            shaft_cull_strategy: ShaftCullStrategy::OverlapOpen,
            exact_visibility: true,
            multi_resolution_visibility: false,
            scratch_frame_buffer_size: 200,
        }
    }
}

impl Config {
    /// Validates the configuration, returning an error rather than panicking
    /// since this runs before any element exists.
    pub fn validate(&self) -> Result<(), RadiosityError> {
        if self.relative_min_element_area <= 0.0 {
            return Err(RadiosityError::InvalidMinElementArea(
                self.relative_min_element_area,
            ));
        }
        if self.relative_link_error_threshold <= 0.0 {
            return Err(RadiosityError::InvalidLinkErrorThreshold(
                self.relative_link_error_threshold,
            ));
        }
        if self.scratch_frame_buffer_size == 0 {
            return Err(RadiosityError::InvalidScratchFrameBufferSize(
                self.scratch_frame_buffer_size,
            ));
        }
        Ok(())
    }

    /// True when a link on this endpoint pair should prefer the exact
    /// polygon-to-polygon visibility test over multi-resolution visibility.
    /// Exact visibility always wins on surface-to-surface shafts; MRV is used
    /// whenever either endpoint is a cluster (open question resolved in
    /// `SPEC_FULL.md` section 9).
    pub fn prefer_exact_visibility(&self, rcv_is_cluster: bool, src_is_cluster: bool) -> bool {
        self.exact_visibility && !rcv_is_cluster && !src_is_cluster
    }
}
