use parry3d::query::{Ray, RayCast};
use parry3d::shape::{Cuboid, Cylinder};

use crate::{Point, Vector};

/// Convex approximation of the object's outline, used to decide where
/// particles leave the straight tracker lines and start scattering.
///
/// Shapes are centred on the isocentre. The cylinder axis is the rotation axis
/// of the gantry (`y`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Hull {
    Cylinder { radius: f64, half_height: f64 },
    Cuboid   { half_extents: Vector },
}

impl Hull {

    /// Distance from `origin` along the unit vector `direction` to the first
    /// point on the hull. Zero if `origin` lies inside.
    pub fn distance_to_surface(&self, origin: Point, direction: Vector) -> Option<f64> {
        // parry casts in single precision: start the ray just outside the
        // bounding sphere, so that distant origins keep their accuracy
        let skip = (-origin.coords.dot(&direction) - self.bounding_radius() - 1.0).max(0.0);
        let start = origin + direction * skip;
        let ray = Ray::new(start.cast::<f32>(), direction.cast::<f32>());
        let max_toi = f32::MAX;
        let solid = true;
        match *self {
            Hull::Cylinder { radius, half_height } =>
                Cylinder::new(half_height as f32, radius as f32)
                .cast_local_ray(&ray, max_toi, solid),
            Hull::Cuboid { half_extents } =>
                Cuboid::new(half_extents.cast::<f32>())
                .cast_local_ray(&ray, max_toi, solid),
        }.map(|toi| skip + toi as f64)
    }

    /// Radius of the smallest sphere about the isocentre containing the hull
    pub fn bounding_radius(&self) -> f64 {
        match *self {
            Hull::Cylinder { radius, half_height } => radius.hypot(half_height),
            Hull::Cuboid   { half_extents }        => half_extents.norm(),
        }
    }

    /// Move the measured entry and exit points along their straight tracker
    /// lines onto the hull surface.
    ///
    /// The entry point moves forwards along `entry_direction`, the exit point
    /// backwards along `exit_direction`. `None` if either line misses the
    /// hull.
    pub fn surface_points(
        &self,
        entry: Point, entry_direction: Vector,
        exit : Point,  exit_direction: Vector,
    ) -> Option<(Point, Point)> {
        let din  =  entry_direction.normalize();
        let dout = -exit_direction .normalize();
        let t_in  = self.distance_to_surface(entry, din )?;
        let t_out = self.distance_to_surface(exit , dout)?;
        Some((entry + din * t_in, exit + dout * t_out))
    }
}
