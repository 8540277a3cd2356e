//! The iteration driver: ties configuration, the element hierarchy, the link
//! store and the refinement oracle together into a `step()`-at-a-time
//! engine, mirroring the reference renderer's `GalerkinRadiosity.cpp`
//! outer loop (shooter/receiver selection, one pass of refinement, then
//! push-pull) without committing to any particular host render loop.

use std::rc::Rc;
use std::time::Instant;

use crate::color::Color;
use crate::config::Config;
use crate::element::{ElementArena, ElementId};
use crate::error::{RadiosityError, RadiosityResult};
use crate::link::LinkArena;
use crate::mrvisibility::ShadowCache;
use crate::refine::{self, RefineOutcome};
use crate::scene::{Patch, RayCaster, SceneGeometry, SceneStats};
use crate::stats::EngineStats;
use crate::transport;

/// One iteration's outcome: whether the solve has converged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepResult {
    Continue,
    Done,
}

/// Owns a solve end-to-end: the element hierarchy, the link store, solve-wide
/// caches and the scene collaborators. Created once per solve by [`init`];
/// callers drive it with repeated calls to [`Engine::step`].
pub struct Engine<'s> {
    config: Config,
    arena: ElementArena,
    links: LinkArena,
    world_root: ElementId,
    top_level_surfaces: Vec<ElementId>,
    scene_stats: SceneStats,
    caster: &'s dyn RayCaster,
    shadow_cache: ShadowCache,
    iteration_number: u64,
    touched: Vec<bool>,
    ambient_radiance: Color,
    started: Instant,
}

/// Builds the element hierarchy for `scene` and returns a ready-to-step
/// engine. `root` is the scene's top-level geometry (used to build the
/// cluster hierarchy when `config.clustered` is set) and `patches` is the
/// flat list of every patch in the scene (used for the non-clustered,
/// flat top-level element set and for computing [`SceneStats`]).
pub fn init<'s>(
    root: &Rc<dyn SceneGeometry>,
    patches: &[Rc<dyn Patch>],
    config: Config,
    caster: &'s dyn RayCaster,
) -> RadiosityResult<Engine<'s>> {
    config.validate()?;
    if patches.is_empty() {
        return Err(RadiosityError::EmptyScene);
    }

    let mut arena = ElementArena::new();
    let scene_stats = compute_scene_stats(patches, config.relative_link_error_threshold);

    // The cluster hierarchy is always built to give refinement a single
    // traversal root and shaft-culling something to walk; `config.clustered`
    // instead governs whether the oracle is willing to *stop* at a cluster
    // endpoint rather than expand it (see `refine::refine_interaction`'s
    // `must_expand_cluster`).
    let world_root = arena.create_cluster_hierarchy(root, &config)?;

    let mut top_level_surfaces = Vec::with_capacity(patches.len());
    for p in patches {
        if let Some(id) = arena.element_for_patch(p.id()) {
            top_level_surfaces.push(id);
        }
    }
    let touched = vec![false; top_level_surfaces.len()];

    Ok(Engine {
        config,
        arena,
        links: LinkArena::new(),
        world_root,
        top_level_surfaces,
        scene_stats,
        caster,
        shadow_cache: ShadowCache::new(),
        iteration_number: 0,
        touched,
        ambient_radiance: Color::BLACK,
        started: Instant::now(),
    })
}

fn compute_scene_stats(patches: &[Rc<dyn Patch>], _relative_link_error_threshold: f32) -> SceneStats {
    let mut total_area = 0.0f32;
    let mut max_radiance = Color::BLACK;
    let mut max_power = Color::BLACK;
    let mut max_direct_potential = 0.0f32;

    for p in patches {
        let area = p.area();
        total_area += area;
        let radiance = p.self_emitted_radiance();
        if radiance.max_component() > max_radiance.max_component() {
            max_radiance = radiance;
        }
        let power = radiance.scale(std::f32::consts::PI * area);
        if power.max_component() > max_power.max_component() {
            max_power = power;
        }
        max_direct_potential = max_direct_potential.max(p.direct_potential());
    }

    SceneStats {
        total_area: total_area.max(1e-12),
        max_self_emitted_radiance: max_radiance,
        max_self_emitted_power: max_power,
        max_direct_potential: max_direct_potential.max(1e-12),
        max_direct_importance: 0.0,
    }
}

impl<'s> Engine<'s> {
    /// Runs one iteration: for gathering, refines every receiver's link set
    /// and reconciles; for shooting, picks the element with the most
    /// un-shot power, seeding its initial links on first touch, refines and
    /// transports, then reconciles. Returns [`StepResult::Done`] once no
    /// further energy remains to distribute.
    pub fn step(&mut self) -> StepResult {
        self.iteration_number += 1;

        if self.config.iteration_method.is_shooting() {
            self.step_shooting()
        } else {
            self.step_gathering()
        }
    }

    fn step_gathering(&mut self) -> StepResult {
        let receivers = self.top_level_surfaces.clone();
        let mut any_refined = false;
        for (idx, &receiver) in receivers.iter().enumerate() {
            if !self.touched[idx] {
                self.touched[idx] = true;
                for &source in &receivers {
                    if source == receiver {
                        continue;
                    }
                    refine::seed_link(
                        &mut self.arena,
                        &mut self.links,
                        receiver,
                        source,
                        &self.config,
                        &self.scene_stats,
                        self.world_root,
                        self.caster,
                        &mut self.shadow_cache,
                    );
                }
                any_refined = true;
            }
            refine::refine_subtree(
                &mut self.arena,
                &mut self.links,
                receiver,
                &self.config,
                &self.scene_stats,
                self.world_root,
                self.caster,
                &mut self.shadow_cache,
            );
        }

        transport::reconcile(&mut self.arena, self.world_root, &self.config);
        self.update_ambient_radiance();

        if any_refined || self.has_significant_received_radiance() {
            StepResult::Continue
        } else {
            StepResult::Done
        }
    }

    fn step_shooting(&mut self) -> StepResult {
        let Some(shooter_idx) = self.select_shooter() else {
            return StepResult::Done;
        };
        let shooter = self.top_level_surfaces[shooter_idx];

        if !self.touched[shooter_idx] {
            self.touched[shooter_idx] = true;
            let others: Vec<ElementId> = self.top_level_surfaces.clone();
            for &receiver in &others {
                if receiver == shooter {
                    continue;
                }
                refine::seed_link(
                    &mut self.arena,
                    &mut self.links,
                    receiver,
                    shooter,
                    &self.config,
                    &self.scene_stats,
                    self.world_root,
                    self.caster,
                    &mut self.shadow_cache,
                );
            }
        }

        refine::refine_subtree(
            &mut self.arena,
            &mut self.links,
            shooter,
            &self.config,
            &self.scene_stats,
            self.world_root,
            self.caster,
            &mut self.shadow_cache,
        );

        transport::reconcile(&mut self.arena, self.world_root, &self.config);

        let elem = self.arena.get_mut(shooter);
        if let Some(u) = elem.unshot_radiance.as_mut() {
            for c in u.iter_mut() {
                *c = Color::BLACK;
            }
        }
        elem.unshot_potential = 0.0;

        self.update_ambient_radiance();

        if self.total_unshot_power() > 1e-9 {
            StepResult::Continue
        } else {
            StepResult::Done
        }
    }

    /// Southwell shooter selection: the element with the largest
    /// `area * sum(|unshot_radiance|)`, modulated by `potential -
    /// direct_potential` when importance-driven.
    fn select_shooter(&self) -> Option<usize> {
        let mut best_idx = None;
        let mut best_score = 0.0f32;
        for (idx, &id) in self.top_level_surfaces.iter().enumerate() {
            let elem = self.arena.get(id);
            let Some(unshot) = &elem.unshot_radiance else { continue };
            let power: f32 = unshot.iter().map(|c| c.abs_max_component()).sum::<f32>() * elem.area;
            let score = if self.config.importance_driven {
                power * (elem.potential - elem.direct_potential).max(0.0).max(1e-6)
            } else {
                power
            };
            if score > best_score {
                best_score = score;
                best_idx = Some(idx);
            }
        }
        if best_score > 1e-9 {
            best_idx
        } else {
            None
        }
    }

    fn total_unshot_power(&self) -> f32 {
        self.top_level_surfaces
            .iter()
            .map(|&id| {
                let elem = self.arena.get(id);
                elem.unshot_radiance
                    .as_ref()
                    .map(|u| u.iter().map(|c| c.abs_max_component()).sum::<f32>() * elem.area)
                    .unwrap_or(0.0)
            })
            .sum()
    }

    fn has_significant_received_radiance(&self) -> bool {
        self.top_level_surfaces.iter().any(|&id| {
            self.arena.get(id).received_radiance.iter().any(|c| c.abs_max_component() > 1e-9)
        })
    }

    /// Scene-wide un-shot power divided by total area, used only to give a
    /// host something reasonable to show for the parts of the scene that
    /// have not yet received any direct or indirect light.
    fn update_ambient_radiance(&mut self) {
        if !self.config.use_ambient_radiance {
            return;
        }
        let power = self.total_unshot_power();
        self.ambient_radiance = Color::gray(power / (std::f32::consts::PI * self.scene_stats.total_area));
    }

    /// Samples the radiance at `(u, v)` on `patch`, descending to the leaf
    /// regular element containing that point and evaluating its basis.
    pub fn radiance_at(&self, patch_id: u64, u: f32, v: f32) -> Color {
        let Some(top) = self.arena.element_for_patch(patch_id) else {
            return self.ambient_radiance;
        };
        let (leaf, lu, lv) = self.arena.regular_leaf_at(top, u, v);
        let elem = self.arena.get(leaf);
        let domain = elem.domain();
        let mut sum = Color::BLACK;
        for (i, &c) in elem.radiance.iter().enumerate() {
            sum += c * crate::basis::eval_basis(elem.basis_type, domain, i, lu, lv);
        }
        sum
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            elements: self.arena.len(),
            surface_elements: self.arena.surface_count(),
            clusters: self.arena.cluster_count(),
            interactions: self.links.counters(),
            iteration_number: self.iteration_number,
            cpu_seconds: self.started.elapsed().as_secs_f32(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

fn _assert_refine_outcome_is_exhaustive(o: RefineOutcome) -> RefineOutcome {
    match o {
        RefineOutcome::Accurate | RefineOutcome::Dropped => o,
    }
}
