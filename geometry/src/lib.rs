//! Spatial primitives shared by the reconstruction crates.
//!
//! Coordinates are bare `f64`s in mm. The beam travels along `+z`; the
//! gantry rotates about `y`.

mod cylinder;
mod hull;

pub use cylinder::cylinder_chord_length;
pub use hull::Hull;

pub type Point  = nalgebra::Point3 <f64>;
pub type Vector = nalgebra::Vector3<f64>;

/// Rotate `p` about the `y`-axis by `angle` radians.
///
/// Positive angles turn `+z` towards `+x`.
pub fn rotate_about_y(p: Point, angle: f64) -> Point {
    let (s, c) = angle.sin_cos();
    Point::new(c * p.x + s * p.z, p.y, -s * p.x + c * p.z)
}

/// Rotate direction `v` about the `y`-axis by `angle` radians.
pub fn rotate_vector_about_y(v: Vector, angle: f64) -> Vector {
    rotate_about_y(Point::from(v), angle).coords
}
