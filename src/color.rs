//! RGB color/radiance arithmetic.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// An RGB triple used for radiance, reflectance and emittance values.
///
/// Thin newtype over [`glam::Vec3`] so radiosity code reads in terms of
/// color rather than generic vector math, while still getting `glam`'s SIMD
/// paths for free.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Color(pub Vec3);

impl Color {
    pub const BLACK: Color = Color(Vec3::ZERO);
    pub const WHITE: Color = Color(Vec3::ONE);

    pub fn new(r: f32, g: f32, b: f32) -> Self {
        Color(Vec3::new(r, g, b))
    }

    pub fn gray(v: f32) -> Self {
        Color(Vec3::splat(v))
    }

    pub fn is_black(&self) -> bool {
        self.0 == Vec3::ZERO
    }

    pub fn scale(&self, f: f32) -> Color {
        Color(self.0 * f)
    }

    pub fn add(&self, other: Color) -> Color {
        Color(self.0 + other.0)
    }

    pub fn sub(&self, other: Color) -> Color {
        Color(self.0 - other.0)
    }

    pub fn product(&self, other: Color) -> Color {
        Color(self.0 * other.0)
    }

    pub fn max_component(&self) -> f32 {
        self.0.x.max(self.0.y).max(self.0.z)
    }

    pub fn min_component(&self) -> f32 {
        self.0.x.min(self.0.y).min(self.0.z)
    }

    /// Absolute value of the max-magnitude component, used for the
    /// refinement-oracle error norm.
    pub fn abs_max_component(&self) -> f32 {
        self.0.x.abs().max(self.0.y.abs()).max(self.0.z.abs())
    }

    pub fn clamp_non_negative(&self) -> Color {
        Color(self.0.max(Vec3::ZERO))
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::BLACK
    }
}

impl std::ops::Add for Color {
    type Output = Color;
    fn add(self, rhs: Color) -> Color {
        Color::add(&self, rhs)
    }
}

impl std::ops::AddAssign for Color {
    fn add_assign(&mut self, rhs: Color) {
        self.0 += rhs.0;
    }
}

impl std::ops::Mul<f32> for Color {
    type Output = Color;
    fn mul(self, rhs: f32) -> Color {
        Color::scale(&self, rhs)
    }
}
