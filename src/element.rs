//! The element hierarchy: surface elements (rooted at a patch) and cluster
//! elements (rooted at an aggregate geometry), unified behind one arena.
//!
//! Back-edges (parent pointers) and the element graph in general are
//! realized as indices into `ElementArena::elements` rather than owning
//! pointers, so the whole hierarchy can be dropped by dropping the arena.

use std::collections::HashMap;
use std::rc::Rc;

use glam::Vec3;

use crate::basis::{push_coefficients, Domain, Matrix2x2, QUAD_UP_TRANSFORMS, TRIANGLE_UP_TRANSFORMS};
use crate::color::Color;
use crate::config::{BasisType, Config, IterationMethod};
use crate::error::{RadiosityError, RadiosityResult};
use crate::link::LinkId;
use crate::scene::{Aabb, Patch, SceneGeometry};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub u32);

/// What an element is rooted at: a concrete patch, or an aggregate geometry.
#[derive(Clone)]
pub enum ElementKind {
    Surface(Rc<dyn Patch>),
    Cluster(Rc<dyn SceneGeometry>),
}

impl std::fmt::Debug for ElementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElementKind::Surface(p) => write!(f, "Surface(patch={})", p.id()),
            ElementKind::Cluster(g) => write!(f, "Cluster(geom={})", g.id()),
        }
    }
}

/// One node of the radiosity hierarchy. See `SPEC_FULL.md` section 3 for
/// the full field-by-field rationale.
#[derive(Debug)]
pub struct Element {
    pub id: ElementId,
    pub kind: ElementKind,
    pub parent: Option<ElementId>,
    pub regular_children: Option<[ElementId; 4]>,
    pub irregular_children: Vec<ElementId>,
    pub up_transform: Option<Matrix2x2>,
    pub child_number: Option<u8>,

    pub area: f32,
    pub minimum_area: f32,
    pub blocker_size: f32,

    pub rd: Color,
    pub ed: Color,
    pub is_light_source: bool,

    pub basis_type: BasisType,
    pub basis_size: usize,
    pub used_basis: usize,
    pub radiance: Vec<Color>,
    pub received_radiance: Vec<Color>,
    pub unshot_radiance: Option<Vec<Color>>,

    pub potential: f32,
    pub received_potential: f32,
    pub unshot_potential: f32,
    pub direct_potential: f32,

    /// Links anchored here: on the source for shooting, on the receiver for
    /// gathering. A growable `Vec` stands in for the reference
    /// implementation's linked list (`SPEC_FULL.md` section 9).
    pub interactions: Vec<LinkId>,

    /// Scratch accumulator used by the scratch z-buffer and by intra-cluster
    /// pixel counting; callers must reset to 0 after consuming it.
    pub scratch: i64,
}

impl Element {
    pub fn is_cluster(&self) -> bool {
        matches!(self.kind, ElementKind::Cluster(_))
    }

    pub fn patch(&self) -> Option<&Rc<dyn Patch>> {
        match &self.kind {
            ElementKind::Surface(p) => Some(p),
            ElementKind::Cluster(_) => None,
        }
    }

    /// The reference domain basis functions are evaluated on. Clusters have
    /// no patch and no domain-dependent basis function above index 0 (their
    /// `basis_size` is always 1), so `Domain::Quad` is an arbitrary but safe
    /// default for them.
    pub fn domain(&self) -> Domain {
        match self.patch() {
            Some(p) if p.num_vertices() == 3 => Domain::Triangle,
            _ => Domain::Quad,
        }
    }

    pub fn geometry(&self) -> Option<&Rc<dyn SceneGeometry>> {
        match &self.kind {
            ElementKind::Surface(_) => None,
            ElementKind::Cluster(g) => Some(g),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.regular_children.is_none() && self.irregular_children.is_empty()
    }
}

fn blocker_size_from_area(area: f32) -> f32 {
    2.0 * (area / std::f32::consts::PI).sqrt()
}

/// Owns the whole element hierarchy. Mutated only by the solver while a
/// solve is in progress (`SPEC_FULL.md` section 5).
#[derive(Debug, Default)]
pub struct ElementArena {
    elements: Vec<Element>,
    patch_to_element: HashMap<u64, ElementId>,
    geometry_to_element: HashMap<u64, ElementId>,
}

impl ElementArena {
    pub fn new() -> Self {
        ElementArena::default()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn get(&self, id: ElementId) -> &Element {
        &self.elements[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: ElementId) -> &mut Element {
        &mut self.elements[id.0 as usize]
    }

    pub fn element_for_patch(&self, patch_id: u64) -> Option<ElementId> {
        self.patch_to_element.get(&patch_id).copied()
    }

    pub fn element_for_geometry(&self, geom_id: u64) -> Option<ElementId> {
        self.geometry_to_element.get(&geom_id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter()
    }

    pub fn surface_count(&self) -> usize {
        self.elements.iter().filter(|e| !e.is_cluster()).count()
    }

    pub fn cluster_count(&self) -> usize {
        self.elements.iter().filter(|e| e.is_cluster()).count()
    }

    fn push_new(&mut self, element: Element) -> ElementId {
        let id = ElementId(self.elements.len() as u32);
        self.elements.push(element);
        id
    }

    fn coefficient_vec(n: usize) -> Vec<Color> {
        vec![Color::BLACK; n]
    }

    /// `create_top_level(patch)`: the surface element rooted at `patch`.
    pub fn create_top_level(&mut self, patch: Rc<dyn Patch>, config: &Config) -> RadiosityResult<ElementId> {
        let nv = patch.num_vertices();
        if nv != 3 && nv != 4 {
            return Err(RadiosityError::UnsupportedPatchValence(patch.id(), nv));
        }
        let area = patch.area();
        let basis_size = config.basis_type.basis_size();
        let is_light_source = patch.is_light_source();
        let ed = if is_light_source { patch.self_emitted_radiance() } else { Color::BLACK };

        let mut radiance = Self::coefficient_vec(basis_size);
        let unshot_radiance = if config.iteration_method.is_shooting() {
            let mut u = Self::coefficient_vec(basis_size);
            u[0] = ed;
            Some(u)
        } else {
            None
        };
        // Radiosity starts at self-emission (B = E before anything has been
        // gathered); the shooting path tracks the same quantity separately
        // via `unshot_radiance` above.
        radiance[0] = ed;

        let id = self.push_new(Element {
            id: ElementId(0), // patched below
            kind: ElementKind::Surface(patch.clone()),
            parent: None,
            regular_children: None,
            irregular_children: Vec::new(),
            up_transform: None,
            child_number: None,
            area,
            minimum_area: area,
            blocker_size: blocker_size_from_area(area),
            rd: patch.diffuse_reflectance(),
            ed,
            is_light_source,
            basis_type: config.basis_type,
            basis_size,
            used_basis: 1,
            radiance,
            received_radiance: Self::coefficient_vec(basis_size),
            unshot_radiance,
            potential: 0.0,
            received_potential: 0.0,
            unshot_potential: 0.0,
            direct_potential: patch.direct_potential(),
            interactions: Vec::new(),
            scratch: 0,
        });
        self.get_mut(id).id = id;
        self.patch_to_element.insert(patch.id(), id);
        Ok(id)
    }

    /// `regular_subdivide(parent)`: idempotent, returns the 4 children,
    /// creating them on first call. Panics on a cluster per `SPEC_FULL.md`
    /// section 4.1 (programming error, not recoverable scene data).
    pub fn regular_subdivide(&mut self, parent: ElementId, config: &Config) -> [ElementId; 4] {
        let p = self.get(parent);
        assert!(!p.is_cluster(), "cannot regularly subdivide a cluster element");
        if let Some(children) = p.regular_children {
            return children;
        }

        let patch = p.patch().expect("surface element always has a patch").clone();
        let nv = patch.num_vertices();
        let transforms = if nv == 3 { TRIANGLE_UP_TRANSFORMS } else { QUAD_UP_TRANSFORMS };
        let domain = p.domain();

        let parent_area = p.area;
        let parent_rd = p.rd;
        let parent_ed = p.ed;
        let parent_is_light_source = p.is_light_source;
        let parent_potential = p.potential;
        let parent_direct_potential = p.direct_potential;
        let parent_radiance = p.radiance.clone();
        let parent_unshot = p.unshot_radiance.clone();
        let parent_unshot_potential = p.unshot_potential;
        let basis_type = p.basis_type;
        let basis_size = p.basis_size;

        let mut children = [ElementId(0); 4];
        for i in 0..4 {
            let up = transforms[i];
            let area = 0.25 * parent_area;

            let radiance_f32 = project_coeffs(basis_type, domain, &up, &parent_radiance);
            let unshot_f32 = parent_unshot.as_ref().map(|u| project_coeffs(basis_type, domain, &up, u));

            let child_id = self.push_new(Element {
                id: ElementId(0),
                kind: ElementKind::Surface(patch.clone()),
                parent: Some(parent),
                regular_children: None,
                irregular_children: Vec::new(),
                up_transform: Some(up),
                child_number: Some(i as u8),
                area,
                minimum_area: area,
                blocker_size: blocker_size_from_area(area),
                rd: parent_rd,
                ed: parent_ed,
                is_light_source: parent_is_light_source,
                basis_type,
                basis_size,
                used_basis: 1,
                radiance: radiance_f32,
                received_radiance: Self::coefficient_vec(basis_size),
                unshot_radiance: unshot_f32,
                potential: parent_potential,
                received_potential: 0.0,
                unshot_potential: parent_unshot_potential,
                direct_potential: parent_direct_potential,
                interactions: Vec::new(),
                scratch: 0,
            });
            self.get_mut(child_id).id = child_id;
            children[i] = child_id;
        }

        self.get_mut(parent).regular_children = Some(children);
        children
    }

    /// `create_cluster_hierarchy(geometry)`: recursively builds one cluster
    /// element per inner node, attaching surface elements for primitive
    /// children, then initializes bottom-up.
    pub fn create_cluster_hierarchy(&mut self, geometry: &Rc<dyn SceneGeometry>, config: &Config) -> RadiosityResult<ElementId> {
        let id = self.build_cluster_node(geometry, config)?;
        self.initialize_cluster_bottom_up(id, config);
        Ok(id)
    }

    fn build_cluster_node(&mut self, geometry: &Rc<dyn SceneGeometry>, config: &Config) -> RadiosityResult<ElementId> {
        if !geometry.is_compound() {
            // Primitive: one surface top-level element per patch, wrapped by
            // an implicit single-child cluster so callers always get a
            // cluster id back for a geometry node (mirrors the reference
            // implementation treating a primitive's patches directly as the
            // cluster's irregular children when there is exactly one patch).
            let patches = geometry.patches();
            if patches.len() == 1 {
                return self.create_top_level(patches[0].clone(), config);
            }
            let mut surface_ids = Vec::with_capacity(patches.len());
            for p in patches {
                surface_ids.push(self.create_top_level(p, config)?);
            }
            let id = self.push_new(blank_cluster(geometry.clone()));
            self.get_mut(id).id = id;
            self.get_mut(id).irregular_children = surface_ids.clone();
            for c in surface_ids {
                self.get_mut(c).parent = Some(id);
            }
            self.geometry_to_element.insert(geometry.id(), id);
            return Ok(id);
        }

        let id = self.push_new(blank_cluster(geometry.clone()));
        self.get_mut(id).id = id;
        self.geometry_to_element.insert(geometry.id(), id);

        let mut children = Vec::new();
        for child_geom in geometry.children() {
            let child_id = self.build_cluster_node(&child_geom, config)?;
            self.get_mut(child_id).parent = Some(id);
            children.push(child_id);
        }
        self.get_mut(id).irregular_children = children;
        Ok(id)
    }

    fn initialize_cluster_bottom_up(&mut self, id: ElementId, config: &Config) {
        if !self.get(id).is_cluster() {
            return;
        }
        let children: Vec<ElementId> = self.get(id).irregular_children.clone();
        for &c in &children {
            self.initialize_cluster_bottom_up(c, config);
        }

        let mut area = 0.0f32;
        let mut radiance = Color::BLACK;
        let mut ed = Color::BLACK;
        let mut unshot = Color::BLACK;
        let mut is_light_source = false;
        let mut min_area = f32::MAX;
        let mut bounds = Aabb::EMPTY;

        for &c in &children {
            let child = self.get(c);
            area += child.area;
            radiance += child.radiance[0] * child.area;
            ed += child.ed * child.area;
            if let Some(u) = &child.unshot_radiance {
                unshot += u[0] * child.area;
            }
            is_light_source |= child.is_light_source;
            min_area = min_area.min(child.minimum_area);
            bounds = bounds.union(&self.bounds_of(c));
        }

        if area > 0.0 {
            radiance = radiance * (1.0 / area);
            ed = ed * (1.0 / area);
            unshot = unshot * (1.0 / area);
        }

        let basis_size = 1;
        let has_unshot = config.iteration_method.is_shooting();
        let cluster = self.get_mut(id);
        cluster.area = area;
        cluster.minimum_area = if min_area.is_finite() { min_area } else { 0.0 };
        cluster.blocker_size = bounds.largest_axis_length();
        cluster.is_light_source = is_light_source;
        cluster.ed = ed;
        cluster.radiance = vec![radiance];
        cluster.received_radiance = vec![Color::BLACK];
        cluster.unshot_radiance = if has_unshot { Some(vec![unshot]) } else { None };
        cluster.basis_size = basis_size;
        cluster.used_basis = 1;
    }

    /// `regular_leaf_at(top, u, v)`: descends through regular children,
    /// remapping `(u, v)` at each step, returning the leaf containing the
    /// point and the point's coordinates in the leaf's own domain.
    pub fn regular_leaf_at(&self, top: ElementId, mut u: f32, mut v: f32) -> (ElementId, f32, f32) {
        let mut current = top;
        loop {
            let elem = self.get(current);
            let Some(children) = elem.regular_children else {
                return (current, u, v);
            };
            let is_triangle = elem.patch().map(|p| p.num_vertices() == 3).unwrap_or(false);
            let (child_index, nu, nv) = locate_child(is_triangle, u, v);
            current = children[child_index];
            u = nu;
            v = nv;
        }
    }

    /// `vertices(element)`: 3/4 world-space vertices for a surface element
    /// (composing up-transforms up to the patch), or the 8 AABB corners for
    /// a cluster.
    pub fn vertices(&self, id: ElementId) -> Vec<Vec3> {
        let elem = self.get(id);
        match &elem.kind {
            ElementKind::Cluster(_) => self.bounds_of(id).corners().to_vec(),
            ElementKind::Surface(patch) => {
                let corners = reference_corners(patch.num_vertices() == 3);
                corners
                    .into_iter()
                    .map(|(u, v)| {
                        let (pu, pv) = self.compose_up_to_top(id, u, v);
                        patch.uniform_point(pu, pv)
                    })
                    .collect()
            }
        }
    }

    /// World-space position of `(u, v)` in a surface element's own reference
    /// domain: composes up-transforms to the patch's top-level domain, then
    /// evaluates the patch's own parameterisation.
    pub fn world_point(&self, id: ElementId, u: f32, v: f32) -> Vec3 {
        let patch = self.get(id).patch().expect("world_point is only defined on surface elements").clone();
        let (pu, pv) = self.compose_up_to_top(id, u, v);
        patch.uniform_point(pu, pv)
    }

    fn compose_up_to_top(&self, id: ElementId, mut u: f32, mut v: f32) -> (f32, f32) {
        let mut current = id;
        loop {
            let elem = self.get(current);
            match elem.up_transform {
                Some(xf) => {
                    let (nu, nv) = xf.apply(u, v);
                    u = nu;
                    v = nv;
                    current = elem.parent.expect("element with up-transform has a parent");
                }
                None => return (u, v),
            }
        }
    }

    /// Axis-aligned bounds of any element (patch vertices for surfaces,
    /// union of children for clusters).
    pub fn bounds_of(&self, id: ElementId) -> Aabb {
        let elem = self.get(id);
        match &elem.kind {
            ElementKind::Surface(patch) => {
                let pts: Vec<Vec3> = (0..patch.num_vertices()).map(|i| patch.vertex(i)).collect();
                Aabb::from_points(&pts)
            }
            ElementKind::Cluster(geom) => geom.bounds(),
        }
    }

    /// `for_each_leaf(root, f)`: depth-first visit of leaves only.
    pub fn for_each_leaf(&self, root: ElementId, f: &mut impl FnMut(ElementId)) {
        let elem = self.get(root);
        if elem.is_leaf() {
            f(root);
            return;
        }
        for &c in &elem.irregular_children {
            self.for_each_leaf(c, f);
        }
        if let Some(children) = elem.regular_children {
            for c in children {
                self.for_each_leaf(c, f);
            }
        }
    }

    /// Visits every surface element (leaf or not) rooted at `root`,
    /// irregular children before regular, depth-first. Used by the
    /// clustering strategies that need every surface element in a cluster's
    /// subtree rather than only leaves.
    pub fn for_each_surface_in_subtree(&self, root: ElementId, f: &mut impl FnMut(ElementId)) {
        let elem = self.get(root);
        if !elem.is_cluster() {
            f(root);
        }
        for &c in &elem.irregular_children {
            self.for_each_surface_in_subtree(c, f);
        }
        if let Some(children) = elem.regular_children {
            for c in children {
                self.for_each_surface_in_subtree(c, f);
            }
        }
    }
}

fn blank_cluster(geometry: Rc<dyn SceneGeometry>) -> Element {
    Element {
        id: ElementId(0),
        kind: ElementKind::Cluster(geometry),
        parent: None,
        regular_children: None,
        irregular_children: Vec::new(),
        up_transform: None,
        child_number: None,
        area: 0.0,
        minimum_area: f32::MAX,
        blocker_size: 0.0,
        rd: Color::WHITE,
        ed: Color::BLACK,
        is_light_source: false,
        basis_type: BasisType::Constant,
        basis_size: 1,
        used_basis: 1,
        radiance: vec![Color::BLACK],
        received_radiance: vec![Color::BLACK],
        unshot_radiance: None,
        potential: 0.0,
        received_potential: 0.0,
        unshot_potential: 0.0,
        direct_potential: 0.0,
        interactions: Vec::new(),
        scratch: 0,
    }
}

pub(crate) fn project_coeffs(basis_type: BasisType, domain: Domain, up: &Matrix2x2, parent: &[Color]) -> Vec<Color> {
    let n = parent.len();
    let mut per_channel = [vec![0.0f32; n], vec![0.0f32; n], vec![0.0f32; n]];
    for (i, c) in parent.iter().enumerate() {
        per_channel[0][i] = c.0.x;
        per_channel[1][i] = c.0.y;
        per_channel[2][i] = c.0.z;
    }
    let projected: Vec<Vec<f32>> =
        per_channel.iter().map(|ch| push_coefficients(basis_type, domain, up, ch)).collect();
    (0..n).map(|i| Color::new(projected[0][i], projected[1][i], projected[2][i])).collect()
}

fn reference_corners(is_triangle: bool) -> Vec<(f32, f32)> {
    if is_triangle {
        vec![(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)]
    } else {
        vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]
    }
}

/// Given a point in a parent's reference domain, finds which regular child
/// contains it and the point remapped into the child's own domain.
fn locate_child(is_triangle: bool, u: f32, v: f32) -> (usize, f32, f32) {
    if is_triangle {
        let w = 1.0 - u - v;
        if u >= 0.5 {
            (1, (u - 0.5) * 2.0, v * 2.0)
        } else if v >= 0.5 {
            (2, u * 2.0, (v - 0.5) * 2.0)
        } else if w >= 0.5 {
            (0, u * 2.0, v * 2.0)
        } else {
            // Middle, inverted child.
            (3, 1.0 - u * 2.0, 1.0 - v * 2.0)
        }
    } else if u < 0.5 && v < 0.5 {
        (0, u * 2.0, v * 2.0)
    } else if u >= 0.5 && v < 0.5 {
        (1, (u - 0.5) * 2.0, v * 2.0)
    } else if u < 0.5 && v >= 0.5 {
        (2, u * 2.0, (v - 0.5) * 2.0)
    } else {
        (3, (u - 0.5) * 2.0, (v - 0.5) * 2.0)
    }
}
