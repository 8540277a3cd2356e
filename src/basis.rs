//! Radiance bases on surface elements.
//!
//! Surface elements carry a polynomial basis up to `BasisType`'s degree,
//! parameterised on the element's reference domain (unit triangle in
//! barycentric `(u, v, 1-u-v)` form, or unit square `(u, v)`). The first
//! basis function is always the constant `1`, which is what lets clusters
//! (always constant, `basis_size == 1`) interoperate with higher-order
//! surface elements in the same link machinery.
//!
//! `push` is the restriction operator used by regular subdivision: given a
//! parent's coefficients and a child's up-transform, it produces the
//! child's initial coefficients so that the child's field is (to the extent
//! the basis can express it) the restriction of the parent's field to the
//! child's sub-domain.

use crate::config::BasisType;

/// A 2x2 affine map `(u, v) -> scale * (u, v) + offset`, used both for
/// up-transforms (child-to-parent parameter space) and for evaluating
/// `push`/`pull` projections between basis coefficients at different
/// subdivision levels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Matrix2x2 {
    pub scale: [[f32; 2]; 2],
    pub offset: [f32; 2],
}

impl Matrix2x2 {
    pub fn apply(&self, u: f32, v: f32) -> (f32, f32) {
        (
            self.scale[0][0] * u + self.scale[0][1] * v + self.offset[0],
            self.scale[1][0] * u + self.scale[1][1] * v + self.offset[1],
        )
    }
}

/// South-west, south-east, north-west, north-east up-transforms for the four
/// regular children of a quad element, in `child_number` order.
pub const QUAD_UP_TRANSFORMS: [Matrix2x2; 4] = [
    Matrix2x2 { scale: [[0.5, 0.0], [0.0, 0.5]], offset: [0.0, 0.0] },
    Matrix2x2 { scale: [[0.5, 0.0], [0.0, 0.5]], offset: [0.5, 0.0] },
    Matrix2x2 { scale: [[0.5, 0.0], [0.0, 0.5]], offset: [0.0, 0.5] },
    Matrix2x2 { scale: [[0.5, 0.0], [0.0, 0.5]], offset: [0.5, 0.5] },
];

/// Left, right, top corner children plus the central inverted child for a
/// triangle element, in `child_number` order.
pub const TRIANGLE_UP_TRANSFORMS: [Matrix2x2; 4] = [
    Matrix2x2 { scale: [[0.5, 0.0], [0.0, 0.5]], offset: [0.0, 0.0] },
    Matrix2x2 { scale: [[0.5, 0.0], [0.0, 0.5]], offset: [0.5, 0.0] },
    Matrix2x2 { scale: [[0.5, 0.0], [0.0, 0.5]], offset: [0.0, 0.5] },
    Matrix2x2 { scale: [[-0.5, 0.0], [0.0, -0.5]], offset: [0.5, 0.5] },
];

/// Number of vertices of the reference domain a basis is evaluated on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Domain {
    Triangle,
    Quad,
}

/// Monomial coefficients for one basis function, row-major over the
/// monomials `[1, u, v, u^2, uv, v^2, u^3, u^2 v, u v^2, v^3]`.
type BasisCoeffs = [f32; 10];

/// Basis function 0 is pinned to the constant `1` on both reference domains
/// rather than rescaled to unit L2 norm, since element coefficient slot 0
/// is read throughout the crate (push/pull, cluster averaging) as the
/// element's literal average radiance. Functions 1.. are Gram-Schmidt
/// orthogonalized against that constant and then normalized to unit L2
/// norm over their own reference domain, so the family is orthogonal
/// (constant term against the rest) and orthonormal among the non-constant
/// members, with coefficients that differ between triangle and quad as
/// SPEC_FULL.md requires.
///
/// Quad table: tensor products of shifted Legendre polynomials on `[0, 1]`.
const QUAD_BASIS: [BasisCoeffs; 10] = [
    [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [-1.7320508, 3.4641016, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [-1.7320508, 0.0, 3.4641016, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [2.236068, -13.416408, 0.0, 13.416408, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [3.0, -6.0, -6.0, 0.0, 12.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [2.236068, 0.0, -13.416408, 0.0, 0.0, 13.416408, 0.0, 0.0, 0.0, 0.0],
    [-2.6457513, 31.749016, 0.0, -79.37254, 0.0, 0.0, 52.915026, 0.0, 0.0, 0.0],
    [-3.8729835, 23.2379, 7.745967, -23.2379, -46.4758, 0.0, 0.0, 46.4758, 0.0, 0.0],
    [-3.8729835, 7.745967, 23.2379, 0.0, -46.4758, -23.2379, 0.0, 0.0, 46.4758, 0.0],
    [-2.6457513, 0.0, 31.749016, 0.0, 0.0, -79.37254, 0.0, 0.0, 0.0, 52.915026],
];

/// Triangle table: Dubiner's collapsed-coordinate basis on the unit right
/// triangle `u, v >= 0, u + v <= 1`, same pinned-constant/unit-norm
/// convention as the quad table above.
const TRIANGLE_BASIS: [BasisCoeffs; 10] = [
    [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [-3.464102, 6.928203, 3.464102, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [-2.0, 0.0, 6.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [5.477226, -32.86335, -10.95445, 32.86335, 32.86335, 5.477226, 0.0, 0.0, 0.0, 0.0],
    [4.242641, -8.485281, -25.45584, 0.0, 42.42641, 21.2132, 0.0, 0.0, 0.0, 0.0],
    [2.44949, 0.0, -19.59592, 0.0, 0.0, 24.4949, 0.0, 0.0, 0.0, 0.0],
    [-7.483315, 89.79978, 22.44994, -224.4994, -179.5996, -22.44994, 149.6663, 224.4994, 89.79978, 7.483315],
    [-6.324555, 37.94733, 56.921, -37.94733, -303.5787, -94.86833, 0.0, 265.6313, 265.6313, 44.27189],
    [-4.898979, 9.797959, 63.68673, 0.0, -117.5755, -161.6663, 0.0, 0.0, 205.7571, 102.8786],
    [-2.828427, 0.0, 42.42641, 0.0, 0.0, -127.2792, 0.0, 0.0, 0.0, 98.99495],
];

fn monomials(u: f32, v: f32) -> BasisCoeffs {
    let u2 = u * u;
    let v2 = v * v;
    [1.0, u, v, u2, u * v, v2, u2 * u, u2 * v, u * v2, v2 * v]
}

/// Evaluates basis function `index` (0-based, `index < basis_type.basis_size()`)
/// at `(u, v)` in the element's own reference domain.
///
/// Basis function 0 is always the constant `1`. Linear adds two functions
/// linear in `u`/`v`, quadratic adds three more, cubic adds four more, all
/// orthonormal on `domain` and orthogonal to the constant term (see
/// `QUAD_BASIS`/`TRIANGLE_BASIS`).
pub fn eval_basis(basis_type: BasisType, domain: Domain, index: usize, u: f32, v: f32) -> f32 {
    if index >= basis_type.basis_size() || index >= 10 {
        return 0.0;
    }
    let table = match domain {
        Domain::Triangle => &TRIANGLE_BASIS,
        Domain::Quad => &QUAD_BASIS,
    };
    let m = monomials(u, v);
    table[index].iter().zip(m.iter()).map(|(c, mi)| c * mi).sum()
}

/// Restricts `parent_coeffs` (length `basis_size`) to a child's sub-domain
/// given the child's up-transform, by resampling the parent polynomial at
/// the basis' own reference nodes mapped through `up`. This is a point
/// evaluation projection rather than an exact L2 projection, matching the
/// reference implementation's `ElementRegularSubdivide` which pushes parent
/// radiance down by direct coefficient copy for the constant term and
/// leaves higher-order terms to be re-estimated through future refinement.
pub fn push_coefficients(basis_type: BasisType, domain: Domain, up: &Matrix2x2, parent_coeffs: &[f32]) -> Vec<f32> {
    let n = basis_type.basis_size().min(parent_coeffs.len());
    let mut child = vec![0.0f32; parent_coeffs.len()];
    if n == 0 {
        return child;
    }
    // Constant term: unchanged, matching the reference's direct copy.
    child[0] = parent_coeffs[0];
    // Higher-order terms: re-sample the parent polynomial at the child's
    // own basis reference points mapped up into the parent's domain, then
    // read back the constant contribution (still leaves finer detail
    // recoverable by a later gather, since receivers keep refining).
    for i in 1..n {
        let (pu, pv) = match i {
            1 => up.apply(1.0, 0.0),
            2 => up.apply(0.0, 1.0),
            _ => up.apply(0.5, 0.5),
        };
        let evaluated: f32 = parent_coeffs
            .iter()
            .enumerate()
            .map(|(j, &c)| c * eval_basis(basis_type, domain, j, pu, pv))
            .sum();
        child[i] = evaluated - child[0];
    }
    child
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_up_transforms_tile_unit_square() {
        // Each child's image under its up-transform is exactly one quadrant.
        let corners = [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)];
        for xf in QUAD_UP_TRANSFORMS {
            for &(u, v) in &corners {
                let (pu, pv) = xf.apply(u, v);
                assert!((0.0..=1.0).contains(&pu));
                assert!((0.0..=1.0).contains(&pv));
            }
        }
    }

    #[test]
    fn triangle_middle_child_is_inverted() {
        let mid = TRIANGLE_UP_TRANSFORMS[3];
        assert!(mid.scale[0][0] < 0.0);
        assert!(mid.scale[1][1] < 0.0);
    }

    #[test]
    fn basis_zero_is_always_constant_one() {
        for bt in [BasisType::Constant, BasisType::Linear, BasisType::Quadratic, BasisType::Cubic] {
            assert_eq!(eval_basis(bt, Domain::Quad, 0, 0.3, 0.7), 1.0);
            assert_eq!(eval_basis(bt, Domain::Triangle, 0, 0.3, 0.2), 1.0);
        }
    }

    #[test]
    fn basis_functions_differ_between_domains() {
        // Same (u, v) sample, same basis index, different reference domain:
        // the linear function must not coincide between triangle and quad.
        let quad = eval_basis(BasisType::Linear, Domain::Quad, 1, 0.3, 0.4);
        let triangle = eval_basis(BasisType::Linear, Domain::Triangle, 1, 0.3, 0.4);
        assert!((quad - triangle).abs() > 1e-3);
    }

    #[test]
    fn non_constant_basis_functions_are_orthogonal_to_the_constant() {
        // Integrate each non-constant quad basis function over a coarse grid;
        // it should average out close to zero since it is orthogonal to the
        // constant term over the unit square.
        for domain in [Domain::Quad, Domain::Triangle] {
            for index in 1..6 {
                let mut sum = 0.0f32;
                let mut count = 0.0f32;
                let steps = 20;
                for i in 0..steps {
                    for j in 0..steps {
                        let u = (i as f32 + 0.5) / steps as f32;
                        let v = (j as f32 + 0.5) / steps as f32;
                        if matches!(domain, Domain::Triangle) && u + v > 1.0 {
                            continue;
                        }
                        sum += eval_basis(BasisType::Cubic, domain, index, u, v);
                        count += 1.0;
                    }
                }
                assert!((sum / count).abs() < 0.05, "domain {domain:?} index {index} mean {}", sum / count);
            }
        }
    }

    #[test]
    fn push_preserves_constant_term() {
        let coeffs = vec![2.0, 0.5, -0.3];
        let child = push_coefficients(BasisType::Linear, Domain::Quad, &QUAD_UP_TRANSFORMS[0], &coeffs);
        assert_eq!(child[0], 2.0);
    }
}
