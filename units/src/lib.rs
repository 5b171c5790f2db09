//! Physical quantities used throughout the reconstruction, with `f64` storage.
//!
//! Internally the kernels work on bare `f64`s in mm, MeV and radians; the
//! functions in this crate are the crossing points between the two worlds.

pub use uom;
pub use float_eq;

pub use uom::si::Quantity;
pub use uom::si::f64::{Angle, Area, Energy, Length, MassDensity, Ratio};

pub mod units {
  pub use uom::si::{length       ::{micrometer, millimeter, centimeter, meter},
                    energy       ::{electronvolt, kiloelectronvolt, megaelectronvolt},
                    angle        ::{radian, degree, revolution},
                    ratio        ::ratio,
                    mass_density ::gram_per_cubic_centimeter,
  };
}

#[macro_export]
macro_rules! in_base_unit {
  ($value:expr) => {
    $crate::Quantity {
      dimension: std::marker::PhantomData,
      units: std::marker::PhantomData,
      value: $value,
    }
  };
}

#[macro_export]
macro_rules! assert_uom_eq {
  ($unit:ident, $lhs:expr, $rhs:expr, $algo:ident <= $tol:expr) => {
    $crate::float_eq::assert_float_eq!($lhs.get::<$unit>(), $rhs.get::<$unit>(), $algo <= $tol)
  };
}

/// The full circle constant (τ) Equal to 2π.
pub const TWOPI: Angle = in_base_unit!(std::f64::consts::TAU);

/// Half a turn.
pub const PI: Angle = in_base_unit!(std::f64::consts::PI);

// Making values from float literals seems to be very long-winded, so provide
// some pithily-named convenience constructors.

/// Generate a function called NAME which returns QUANTITY by interpreting its
/// argument as UNIT
///
/// wrap!(NAME QUANTITY UNIT);
macro_rules! wrap {
  ($name:ident $quantity:ident $unit:ident ) => {
    pub fn $name(x: f64) -> $quantity { $quantity::new::<units::$unit>(x) }
  };
}

wrap!(um     Length                 micrometer);
wrap!(mm     Length                 millimeter);
wrap!(cm     Length                 centimeter);
wrap!(ev     Energy                electronvolt);
wrap!(kev    Energy            kiloelectronvolt);
wrap!(mev    Energy            megaelectronvolt);
wrap!(radian Angle                      radian);
wrap!(degree Angle                      degree);
wrap!(turn   Angle                  revolution);
wrap!(ratio  Ratio                       ratio);
wrap!(g_cm3  MassDensity gram_per_cubic_centimeter);

/// Generate a function called NAME which extracts the value of QUANTITY as a
/// bare `f64` expressed in UNIT
///
/// unwrap!(NAME QUANTITY UNIT);
macro_rules! unwrap {
  ($name:ident $quantity:ident $unit:ident ) => {
    pub fn $name(x: $quantity) -> f64 { x.get::<units::$unit>() }
  };
}

unwrap!(mm_     Length                 millimeter);
unwrap!(cm_     Length                 centimeter);
unwrap!(ev_     Energy               electronvolt);
unwrap!(mev_    Energy           megaelectronvolt);
unwrap!(radian_ Angle                      radian);
unwrap!(degree_ Angle                      degree);
unwrap!(turn_   Angle                  revolution);
unwrap!(ratio_  Ratio                       ratio);
unwrap!(g_cm3_  MassDensity gram_per_cubic_centimeter);
