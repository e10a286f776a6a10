//! Distance lookups against the configured home location.

use async_trait::async_trait;

use crate::watch::Position;

/// Mean Earth radius in meters (IUGG).
const EARTH_RADIUS_M: f64 = 6_371_008.8;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeocodeError {
    #[error("invalid coordinate input: {0}")]
    InvalidInput(String),

    #[error("geocoding key is not authorized")]
    NotAuthorized,

    #[error("geocoding key has been blocked or suspended")]
    Forbidden,

    #[error("geocoding rate limit exceeded")]
    RateLimited,

    #[error("geocoding failed: {0}")]
    Unknown(String),
}

/// Resolves how far a coordinate is from a reference point.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn distance_meters(
        &self,
        lat: f64,
        lon: f64,
        reference_lat: f64,
        reference_lon: f64,
    ) -> Result<f64, GeocodeError>;
}

/// Great-circle distance between two positions.
pub fn haversine_distance_m(a: Position, b: Position) -> f64 {
    let (lat1, lat2) = (a.latitude.to_radians(), b.latitude.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Computes distances locally without any network lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct HaversineGeocoder;

#[async_trait]
impl Geocoder for HaversineGeocoder {
    async fn distance_meters(
        &self,
        lat: f64,
        lon: f64,
        reference_lat: f64,
        reference_lon: f64,
    ) -> Result<f64, GeocodeError> {
        let point = Position::new(lat, lon);
        let reference = Position::new(reference_lat, reference_lon);
        if !point.is_valid() {
            return Err(GeocodeError::InvalidInput(format!("{}, {}", lat, lon)));
        }
        if !reference.is_valid() {
            return Err(GeocodeError::InvalidInput(format!(
                "{}, {}",
                reference_lat, reference_lon
            )));
        }
        Ok(haversine_distance_m(point, reference))
    }
}

/// Geocoder with a scripted answer
#[cfg(test)]
#[derive(Debug)]
pub struct MockGeocoder {
    pub answer: std::sync::Mutex<Result<f64, GeocodeError>>,
    pub calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MockGeocoder {
    pub fn new(answer: Result<f64, GeocodeError>) -> Self {
        Self {
            answer: std::sync::Mutex::new(answer),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn set(&self, answer: Result<f64, GeocodeError>) {
        *self.answer.lock().unwrap() = answer;
    }
}

#[cfg(test)]
#[async_trait]
impl Geocoder for MockGeocoder {
    async fn distance_meters(
        &self,
        _lat: f64,
        _lon: f64,
        _reference_lat: f64,
        _reference_lon: f64,
    ) -> Result<f64, GeocodeError> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.answer.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_same_point() {
        let p = Position::new(52.52, 13.405);
        assert_eq!(haversine_distance_m(p, p), 0.0);
    }

    #[test]
    fn test_haversine_berlin_paris() {
        let berlin = Position::new(52.5200, 13.4050);
        let paris = Position::new(48.8566, 2.3522);
        let d = haversine_distance_m(berlin, paris);
        assert!((d - 877_500.0).abs() < 2_000.0, "distance was {}", d);
    }

    #[test]
    fn test_haversine_one_degree_latitude() {
        let a = Position::new(0.0, 0.0);
        let b = Position::new(1.0, 0.0);
        let d = haversine_distance_m(a, b);
        assert!((d - 111_195.0).abs() < 10.0, "distance was {}", d);
    }

    #[tokio::test]
    async fn test_haversine_geocoder_rejects_invalid_input() {
        let geocoder = HaversineGeocoder;
        let err = geocoder
            .distance_meters(f64::NAN, 0.0, 0.0, 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, GeocodeError::InvalidInput(_)));

        let err = geocoder
            .distance_meters(0.0, 0.0, 0.0, 200.0)
            .await
            .unwrap_err();
        assert!(matches!(err, GeocodeError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_haversine_geocoder_distance() {
        let d = HaversineGeocoder
            .distance_meters(52.5200, 13.4050, 52.5201, 13.4050)
            .await
            .unwrap();
        assert!((d - 11.1).abs() < 0.1, "distance was {}", d);
    }
}
