use thiserror::Error;

use crate::unit::Position;

/// Mean Earth radius in metres (IUGG).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum GeoError {
    #[error("non-finite coordinate ({latitude}, {longitude})")]
    NonFinite { latitude: f64, longitude: f64 },
}

fn check(position: &Position) -> Result<(), GeoError> {
    if position.latitude().is_finite() && position.longitude().is_finite() {
        Ok(())
    } else {
        Err(GeoError::NonFinite {
            latitude: position.latitude(),
            longitude: position.longitude(),
        })
    }
}

/// Great-circle surface distance in metres on a spherical Earth (haversine).
pub fn great_circle_distance(from: &Position, to: &Position) -> Result<f64, GeoError> {
    check(from)?;
    check(to)?;

    let lat1 = from.latitude().to_radians();
    let lat2 = to.latitude().to_radians();
    let d_lat = lat2 - lat1;
    let d_lon = (to.longitude() - from.longitude()).to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().min(1.0).asin();
    Ok(EARTH_RADIUS_M * c)
}
