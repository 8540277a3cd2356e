/*!
# radiant-hierarchy

A hierarchical Galerkin finite-element radiosity core: element hierarchy
(surface + cluster), a link/interaction store, a form-factor kernel with
shaft culling and multi-resolution visibility, a refinement oracle, and
push-pull transport, driven by an iteration [`Engine`] that supports
Jacobi/Gauss-Seidel gathering and Southwell shooting.

## Modules

- [`config`]: every solver toggle (`Config`) and the enums it is built from.
- [`cubature`]: static cubature-rule tables on the unit triangle/quad.
- [`basis`]: per-element basis evaluation and the regular-subdivision
  coefficient push used when a surface element is split.
- [`color`]: the RGB `Color` newtype used throughout for radiance/power.
- [`scene`]: the external scene contract (`Patch`, `SceneGeometry`,
  `RayCaster`) the core consumes, plus a minimal test scene.
- [`element`]: the element arena (surface + cluster elements, regular and
  irregular subdivision, hierarchy traversal).
- [`link`]: the link (interaction) arena and its duplicate/shared-storage
  ownership model.
- [`shaft`]: shaft construction and candidate-list culling.
- [`mrvisibility`]: the multi-resolution visibility transmittance model.
- [`scratchbuffer`]: the intra-cluster z-visibility software rasteriser.
- [`formfactor`]: the area-to-area form-factor kernel.
- [`cluster`]: cluster radiance strategies and receiver-cluster gather
  distribution.
- [`refine`]: the refinement oracle and recursive subdivision driver.
- [`transport`]: bottom-up pull / top-down push reconciliation.
- [`iteration`]: the `Engine` that ties all of the above into a
  `step()`-at-a-time solve.
- [`stats`]: the `EngineStats` snapshot returned by `Engine::stats`.
- [`error`]: `RadiosityError` and the crate-wide `RadiosityResult` alias.

Everything outside this core (scene loading, CLI/options plumbing, tone
mapping, image output, GUI/raytracing renderers) is out of scope: hosts
implement [`scene::Patch`], [`scene::SceneGeometry`] and [`scene::RayCaster`]
over their own scene representation and drive the engine from there.
*/

pub mod basis;
pub mod cluster;
pub mod color;
pub mod config;
pub mod cubature;
pub mod element;
pub mod error;
pub mod formfactor;
pub mod iteration;
pub mod link;
pub mod mrvisibility;
pub mod refine;
pub mod scene;
pub mod scratchbuffer;
pub mod shaft;
pub mod stats;
pub mod transport;

pub use color::Color;
pub use config::{
    BasisType, ClusteringStrategy, Config, CubatureDegree, ErrorNorm, IterationMethod,
    ShaftCullMode, ShaftCullStrategy,
};
pub use element::{Element, ElementArena, ElementId, ElementKind};
pub use error::{RadiosityError, RadiosityResult};
pub use iteration::{init, Engine, StepResult};
pub use link::{InteractionCounters, Link, LinkArena, LinkId};
pub use scene::{Aabb, Hit, Patch, Ray, RayCaster, SceneGeometry, SceneStats};
pub use stats::EngineStats;
