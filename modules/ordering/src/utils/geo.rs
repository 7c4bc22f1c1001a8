use crate::entities::order::GeoPoint;

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Great-circle distance in meters.
pub fn haversine_meters(from: GeoPoint, to: GeoPoint) -> f64 {
    let (lat1, lat2) = (from.lat.to_radians(), to.lat.to_radians());
    let d_lat = (to.lat - from.lat).to_radians();
    let d_lng = (to.lng - from.lng).to_radians();
    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * a.sqrt().atan2((1.0 - a).sqrt())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArrivalEstimate {
    pub distance_meters: f64,
    pub duration_minutes: f64,
    /// unix millis
    pub arrives_at: i64,
}

/// Linear ETA at a flat speed. Non-positive speeds are treated as "unknown" and yield `None`.
pub fn estimate_arrival(
    from: GeoPoint,
    to: GeoPoint,
    speed_kmh: f64,
    now_millis: i64,
) -> Option<ArrivalEstimate> {
    if !speed_kmh.is_finite() || speed_kmh <= 0.0 {
        return None;
    }
    let distance_meters = haversine_meters(from, to);
    let duration_minutes = distance_meters / 1000.0 / speed_kmh * 60.0;
    Some(ArrivalEstimate {
        distance_meters,
        duration_minutes,
        arrives_at: now_millis + (duration_minutes * 60_000.0).round() as i64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_point_is_zero_distance() {
        let p = GeoPoint { lat: -1.2921, lng: 36.8219 };
        assert!(haversine_meters(p, p).abs() < 1e-6);
    }

    #[test]
    fn one_degree_of_latitude_is_about_111_km() {
        let a = GeoPoint { lat: 0.0, lng: 0.0 };
        let b = GeoPoint { lat: 1.0, lng: 0.0 };
        let d = haversine_meters(a, b);
        assert!((d - 111_195.0).abs() < 100.0, "got {d}");
    }

    #[test]
    fn eta_is_linear_in_distance() {
        let a = GeoPoint { lat: 0.0, lng: 0.0 };
        let b = GeoPoint { lat: 0.0, lng: 0.1 };
        let est = estimate_arrival(a, b, 30.0, 1_000).unwrap();
        // ~11.1 km at 30 km/h is ~22.2 minutes
        assert!((est.duration_minutes - 22.24).abs() < 0.1);
        assert_eq!(
            est.arrives_at,
            1_000 + (est.duration_minutes * 60_000.0).round() as i64
        );
        assert!(estimate_arrival(a, b, 0.0, 0).is_none());
    }
}
