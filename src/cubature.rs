//! Cubature rules on the unit triangle and unit square.
//!
//! Node positions and weights are normalized so that a rule's weights sum to
//! 1 over its reference domain, mirroring `CubatureRule.h` /
//! `TriangleCubatureRule.cpp` / `QuadCubatureRule.cpp` in the reference
//! renderer. Tables for the lower orders come straight from the classical
//! symmetric quadrature literature (Hammer-Stroud / Radon); higher orders are
//! built by recursively quartering the domain and tiling a lower-order rule,
//! which keeps weight-sum-to-one exact by construction while still
//! increasing point density with degree.

use std::sync::OnceLock;

use crate::config::CubatureDegree;

/// One weighted node of a cubature rule, in the rule's reference domain.
/// For triangles `(u, v)` are two of the three barycentric coordinates (the
/// third is `1 - u - v`); for quads `(u, v) in [0, 1]^2` directly.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CubatureNode {
    pub u: f32,
    pub v: f32,
    pub weight: f32,
}

/// A cubature rule: a fixed set of weighted nodes on a reference domain.
#[derive(Clone, Debug)]
pub struct CubatureRule {
    pub nodes: Vec<CubatureNode>,
}

impl CubatureRule {
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn weight_sum(&self) -> f32 {
        self.nodes.iter().map(|n| n.weight).sum()
    }
}

fn triangle_base(order: u32) -> Vec<CubatureNode> {
    match order {
        1 => vec![CubatureNode { u: 1.0 / 3.0, v: 1.0 / 3.0, weight: 1.0 }],
        2 => {
            let a = 2.0 / 3.0;
            let b = 1.0 / 6.0;
            vec![
                CubatureNode { u: a, v: b, weight: 1.0 / 3.0 },
                CubatureNode { u: b, v: a, weight: 1.0 / 3.0 },
                CubatureNode { u: b, v: b, weight: 1.0 / 3.0 },
            ]
        }
        3 => {
            let a = 0.6;
            let b = 0.2;
            vec![
                CubatureNode { u: 1.0 / 3.0, v: 1.0 / 3.0, weight: -9.0 / 16.0 },
                CubatureNode { u: a, v: b, weight: 25.0 / 48.0 },
                CubatureNode { u: b, v: a, weight: 25.0 / 48.0 },
                CubatureNode { u: b, v: b, weight: 25.0 / 48.0 },
            ]
        }
        4 | 5 => {
            // Radon's 7-point degree-5 rule; also used to satisfy degree 4
            // requests since it exceeds that order.
            let a1 = 0.797426985353087;
            let b1 = 0.101286507323456;
            let a2 = 0.059715871789770;
            let b2 = 0.470142064105115;
            vec![
                CubatureNode { u: 1.0 / 3.0, v: 1.0 / 3.0, weight: 9.0 / 40.0 },
                CubatureNode { u: a1, v: b1, weight: 0.125939180544827 },
                CubatureNode { u: b1, v: a1, weight: 0.125939180544827 },
                CubatureNode { u: b1, v: b1, weight: 0.125939180544827 },
                CubatureNode { u: a2, v: b2, weight: 0.132394152788506 },
                CubatureNode { u: b2, v: a2, weight: 0.132394152788506 },
                CubatureNode { u: b2, v: b2, weight: 0.132394152788506 },
            ]
        }
        _ => unreachable!("triangle_base only handles orders 1..=5"),
    }
}

/// Recursively quarters a triangle (same layout as regular surface-element
/// subdivision: three corner children plus one central, inverted child) and
/// tiles `base` into each quarter, `levels` times. Produces a rule of
/// (degree-respecting) higher point density while keeping weights summing to
/// one by construction: each level distributes the parent weight over 4
/// children of 1/4 the area.
fn quarter_triangle_rule(base: &[CubatureNode], levels: u32) -> Vec<CubatureNode> {
    // Map (u, v) in a corner sub-triangle or the central inverted one back
    // into the parent's barycentric coordinates.
    fn map_corner(u: f32, v: f32, which: u32) -> (f32, f32) {
        match which {
            0 => (u / 2.0, v / 2.0),                     // origin corner
            1 => (0.5 + u / 2.0, v / 2.0),                // u-corner
            2 => (u / 2.0, 0.5 + v / 2.0),                // v-corner
            _ => (0.5 - u / 2.0, 0.5 - v / 2.0),           // central, inverted
        }
    }

    let mut current: Vec<CubatureNode> = base.to_vec();
    for _ in 0..levels {
        let mut next = Vec::with_capacity(current.len() * 4);
        for child in 0..4u32 {
            for n in &current {
                let (u, v) = map_corner(n.u, n.v, child);
                next.push(CubatureNode { u, v, weight: n.weight / 4.0 });
            }
        }
        current = next;
    }
    current
}

fn build_triangle_rule(order: u32) -> CubatureRule {
    let nodes = match order {
        1..=5 => triangle_base(order),
        6 | 7 => quarter_triangle_rule(&triangle_base(3), 1),
        8 | 9 => quarter_triangle_rule(&triangle_base(5), 1),
        _ => unreachable!("CubatureDegree only spans 1..=9"),
    };
    CubatureRule { nodes }
}

/// Standard 1D Gauss-Legendre nodes/weights on `[0, 1]`, weights summing to 1.
fn gauss_legendre_1d(n: u32) -> Vec<(f32, f32)> {
    // Classical abscissae/weights on [-1, 1], remapped to [0, 1] below.
    let raw: &[(f32, f32)] = match n {
        1 => &[(0.0, 2.0)],
        2 => &[(-0.5773502692, 1.0), (0.5773502692, 1.0)],
        3 => &[(-0.7745966692, 0.5555555556), (0.0, 0.8888888889), (0.7745966692, 0.5555555556)],
        4 => &[
            (-0.8611363116, 0.3478548451),
            (-0.3399810436, 0.6521451549),
            (0.3399810436, 0.6521451549),
            (0.8611363116, 0.3478548451),
        ],
        _ => &[
            (-0.9061798459, 0.2369268851),
            (-0.5384693101, 0.4786286705),
            (0.0, 0.5688888889),
            (0.5384693101, 0.4786286705),
            (0.9061798459, 0.2369268851),
        ],
    };
    raw.iter()
        .map(|&(x, w)| ((x + 1.0) / 2.0, w / 2.0))
        .collect()
}

fn build_quad_rule(order: u32) -> CubatureRule {
    // n >= order guarantees the tensor-product rule integrates polynomials
    // of the requested total degree exactly along each axis.
    let n = order.clamp(1, 5).min(5).max(1);
    let n = if order > 5 { 5 } else { n };
    let pts = gauss_legendre_1d(n);
    let mut nodes = Vec::with_capacity(pts.len() * pts.len());
    for &(u, wu) in &pts {
        for &(v, wv) in &pts {
            nodes.push(CubatureNode { u, v, weight: wu * wv });
        }
    }
    CubatureRule { nodes }
}

macro_rules! cached_rule_table {
    ($name:ident, $builder:ident) => {
        fn $name(degree: CubatureDegree) -> &'static CubatureRule {
            static CACHE: [OnceLock<CubatureRule>; 9] = [
                OnceLock::new(),
                OnceLock::new(),
                OnceLock::new(),
                OnceLock::new(),
                OnceLock::new(),
                OnceLock::new(),
                OnceLock::new(),
                OnceLock::new(),
                OnceLock::new(),
            ];
            let idx = (degree.as_order() - 1) as usize;
            CACHE[idx].get_or_init(|| $builder(degree.as_order()))
        }
    };
}

cached_rule_table!(triangle_rule_cached, build_triangle_rule);
cached_rule_table!(quad_rule_cached, build_quad_rule);

/// Returns the cached triangle cubature rule for `degree`.
pub fn triangle_rule(degree: CubatureDegree) -> &'static CubatureRule {
    triangle_rule_cached(degree)
}

/// Returns the cached quad cubature rule for `degree`.
pub fn quad_rule(degree: CubatureDegree) -> &'static CubatureRule {
    quad_rule_cached(degree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn all_degrees() -> [CubatureDegree; 9] {
        [
            CubatureDegree::Degree1,
            CubatureDegree::Degree2,
            CubatureDegree::Degree3,
            CubatureDegree::Degree4,
            CubatureDegree::Degree5,
            CubatureDegree::Degree6,
            CubatureDegree::Degree7,
            CubatureDegree::Degree8,
            CubatureDegree::Degree9,
        ]
    }

    #[test]
    fn triangle_rule_weights_sum_to_one() {
        for d in all_degrees() {
            let rule = triangle_rule(d);
            assert_relative_eq!(rule.weight_sum(), 1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn quad_rule_weights_sum_to_one() {
        for d in all_degrees() {
            let rule = quad_rule(d);
            assert_relative_eq!(rule.weight_sum(), 1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn triangle_rule_nodes_stay_in_reference_domain() {
        for d in all_degrees() {
            for n in &triangle_rule(d).nodes {
                assert!(n.u >= -1e-3 && n.v >= -1e-3 && n.u + n.v <= 1.0 + 1e-3);
            }
        }
    }

    #[test]
    fn quad_rule_nodes_stay_in_unit_square() {
        for d in all_degrees() {
            for n in &quad_rule(d).nodes {
                assert!((0.0..=1.0).contains(&n.u));
                assert!((0.0..=1.0).contains(&n.v));
            }
        }
    }

    #[test]
    fn same_degree_returns_same_cached_rule() {
        let a = triangle_rule(CubatureDegree::Degree5);
        let b = triangle_rule(CubatureDegree::Degree5);
        assert_eq!(a.n_nodes(), b.n_nodes());
    }
}
