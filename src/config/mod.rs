//! TOML configuration.
//!
//! Physical quantities are written as strings with units (`"1000 mm"`,
//! `"200 MeV"`, `"360 deg"`) and parsed by `uom`.

pub mod recon;

pub use recon::{Config, read_config_file};

use std::str::FromStr;

use serde::{Deserialize, Deserializer, de};

/// Spellings accepted in addition to the `uom` abbreviations
const ALIASES: [(&str, &str); 4] = [
    ("degrees", "°"),
    ("degree" , "°"),
    ("deg"    , "°"),
    ("g/cm3"  , "g/cm³"),
];

/// Parse a quantity with units, such as `"12.5 mm"`
pub fn parse_uom<T>(s: &str) -> Result<T, String>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let s = s.trim();
    let normalised = match s.split_once(char::is_whitespace) {
        Some((value, unit)) => {
            let unit = unit.trim();
            let unit = ALIASES.iter()
                .find(|(alias, _)| *alias == unit)
                .map_or(unit, |(_, abbreviation)| abbreviation);
            format!("{value} {unit}")
        }
        None => s.to_string(),
    };
    normalised.parse::<T>().map_err(|e| format!("cannot parse `{s}` as a quantity: {e}"))
}

pub(crate) fn deserialize_uom_opt<'d, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'d>,
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    Option::<&str>::deserialize(deserializer)?
        .map(parse_uom::<T>)
        .transpose()
        .map_err(de::Error::custom)
}

pub(crate) fn deserialize_uom<'d, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'d>,
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    parse_uom(<&str>::deserialize(deserializer)?)
        .map_err(de::Error::custom)
}

pub(crate) fn deserialize_uom_2d<'d, D, T>(deserializer: D) -> Result<(T, T), D::Error>
where
    D: Deserializer<'d>,
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let (x, y) = <(&str, &str)>::deserialize(deserializer)?;
    Ok((parse_uom(x).map_err(de::Error::custom)?,
        parse_uom(y).map_err(de::Error::custom)?))
}

pub(crate) fn deserialize_uom_3d<'d, D, T>(deserializer: D) -> Result<(T, T, T), D::Error>
where
    D: Deserializer<'d>,
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let (x, y, z) = <(&str, &str, &str)>::deserialize(deserializer)?;
    tr_tup_res((parse_uom(x), parse_uom(y), parse_uom(z)))
        .map_err(de::Error::custom)
}

/// Transpose 3-tuple of `Result`
///
/// `Ok` if all elements `Ok`; if any element is an `Err` return the first one.
///
/// # Examples
/// `(Ok(a),  Ok(b),  Ok(c)) -> Ok((a, b, c))`
/// `(Ok(a), Err(b),  Ok(c)) -> Err(b)`
/// `(Ok(a), Err(b), Err(c)) -> Err(b)`
fn tr_tup_res<O, E>((x,y,z): (Result<O, E>, Result<O, E>, Result<O, E>)) -> Result<(O, O, O), E> {
    Ok((x?, y?, z?))
}
