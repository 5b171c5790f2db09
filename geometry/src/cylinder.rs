use crate::{Point, Vector};

/// Compute the length of the intersection of the line passing through points
/// `p1` and `p2` with a cylinder of radius `r` whose axis coincides with the
/// y-axis (the rotation axis of the gantry). All lengths in mm.
pub fn cylinder_chord_length(p1: Point, p2: Point, r: f64) -> f64 {
    // Project out the component along the axis: the problem becomes the
    // intersection of a 2D line with a circle, parametrized by
    // p(t) = p1 + t v, whose roots in t come from the Viète coefficients.
    let y = Vector::y();
    let v = p2 - p1;
    let w = p1.coords;
    let a = v.dot(&v) - squared(v.dot(&y));
    let b = 2. * (v.dot(&w) - v.dot(&y) * w.dot(&y));
    let c = w.dot(&w) - squared(w.dot(&y)) - squared(r);
    // Check discriminant to see if line missed cylinder
    delta_t(a, b * b, c) * v.norm()
}

fn delta_t(a: f64, b_squared: f64, c: f64) -> f64 {
    let four_a_c = 4. * a * c;
    if a <= 0.0 || b_squared <= four_a_c { return 0.0 }
    (b_squared - four_a_c).sqrt() / a
}

fn squared(x: f64) -> f64 { x * x }
