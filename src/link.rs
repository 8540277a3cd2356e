//! The link (interaction) store: directed couplings between two elements,
//! cached coupling coefficients, error estimate and visibility.
//!
//! A link's coefficient storage is reference counted (`Rc<[f32]>`):
//! `duplicate_link` creates a second arena entry that shares the same
//! buffer as its origin, so "destroying a duplicate must not free storage"
//! (`SPEC_FULL.md` section 4.2) falls out of ordinary `Rc` drop semantics
//! rather than needing a manual ownership flag.

use std::rc::Rc;

use crate::element::ElementId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u32);

/// A directed coupling from `source` to `receiver`.
#[derive(Debug, Clone)]
pub struct Link {
    pub receiver: ElementId,
    pub source: ElementId,
    /// Row-major `n_receiver x n_source` coupling coefficients (length 1 in
    /// the common constant-constant case).
    pub k: Rc<[f32]>,
    /// Single error-estimation scalar (the reference implementation's
    /// `deltaK`; not a matrix even in the higher-order case).
    pub delta_k: f32,
    pub n_receiver: u8,
    pub n_source: u8,
    /// Number of receiver cubature positions; always 1 in this design.
    pub n_receiver_cubature: u8,
    /// 0 = fully occluded, 255 = fully unoccluded, 254 = tested-but-total
    /// under exact visibility.
    pub visibility: u8,
    pub is_duplicate: bool,
}

impl Link {
    pub fn carries_energy(&self) -> bool {
        self.visibility > 0
    }

    pub fn coefficient(&self, alpha: usize, beta: usize) -> f32 {
        if self.k.len() == 1 {
            self.k[0]
        } else {
            self.k[alpha * self.n_source as usize + beta]
        }
    }
}

/// 2x2 breakdown of link counts by endpoint kind, used as a regression-test
/// invariant (`SPEC_FULL.md` section 4.2/8).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InteractionCounters {
    pub total: u64,
    pub cluster_to_cluster: u64,
    pub cluster_to_surface: u64,
    pub surface_to_cluster: u64,
    pub surface_to_surface: u64,
}

impl InteractionCounters {
    fn bump(&mut self, rcv_is_cluster: bool, src_is_cluster: bool, delta: i64) {
        self.total = (self.total as i64 + delta) as u64;
        let bucket = match (rcv_is_cluster, src_is_cluster) {
            (true, true) => &mut self.cluster_to_cluster,
            (true, false) => &mut self.cluster_to_surface,
            (false, true) => &mut self.surface_to_cluster,
            (false, false) => &mut self.surface_to_surface,
        };
        *bucket = (*bucket as i64 + delta) as u64;
    }
}

/// Owns all links created during a solve.
#[derive(Debug, Default)]
pub struct LinkArena {
    links: Vec<Option<Link>>,
    counters: InteractionCounters,
}

impl LinkArena {
    pub fn new() -> Self {
        LinkArena::default()
    }

    pub fn counters(&self) -> InteractionCounters {
        self.counters
    }

    pub fn get(&self, id: LinkId) -> &Link {
        self.links[id.0 as usize].as_ref().expect("use of a destroyed link")
    }

    pub fn get_mut(&mut self, id: LinkId) -> &mut Link {
        self.links[id.0 as usize].as_mut().expect("use of a destroyed link")
    }

    /// `new_link`: allocates owned coefficient storage. `n_receiver_cubature`
    /// must be 1 (higher-order receiver cubature is not implemented; the
    /// reference implementation treats anything else as fatal).
    #[allow(clippy::too_many_arguments)]
    pub fn new_link(
        &mut self,
        receiver: ElementId,
        source: ElementId,
        rcv_is_cluster: bool,
        src_is_cluster: bool,
        k: Vec<f32>,
        delta_k: f32,
        n_receiver: u8,
        n_source: u8,
        n_receiver_cubature: u8,
        visibility: u8,
    ) -> LinkId {
        assert_eq!(n_receiver_cubature, 1, "higher-order receiver cubature is not implemented");
        assert_eq!(
            k.len(),
            (n_receiver as usize * n_source as usize).max(1),
            "coefficient count must match n_receiver * n_source"
        );
        let link = Link {
            receiver,
            source,
            k: Rc::from(k.into_boxed_slice()),
            delta_k,
            n_receiver,
            n_source,
            n_receiver_cubature,
            visibility,
            is_duplicate: false,
        };
        let id = LinkId(self.links.len() as u32);
        self.links.push(Some(link));
        self.counters.bump(rcv_is_cluster, src_is_cluster, 1);
        id
    }

    /// `duplicate_link`: a new arena entry sharing the origin's coefficient
    /// buffer, marked as a duplicate.
    pub fn duplicate_link(&mut self, id: LinkId, rcv_is_cluster: bool, src_is_cluster: bool) -> LinkId {
        let mut copy = self.get(id).clone();
        copy.is_duplicate = true;
        let new_id = LinkId(self.links.len() as u32);
        self.links.push(Some(copy));
        self.counters.bump(rcv_is_cluster, src_is_cluster, 1);
        new_id
    }

    /// `destroy`: removes the arena entry; the underlying coefficient
    /// buffer is freed only once its last `Rc` (original or duplicate)
    /// drops.
    pub fn destroy(&mut self, id: LinkId, rcv_is_cluster: bool, src_is_cluster: bool) {
        if self.links[id.0 as usize].take().is_some() {
            self.counters.bump(rcv_is_cluster, src_is_cluster, -1);
        }
    }

    pub fn len(&self) -> usize {
        self.links.iter().filter(|l| l.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
