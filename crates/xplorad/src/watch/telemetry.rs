//! Normalization of raw per-watch telemetry.
//!
//! Payloads differ between watch generations: some report coordinates as
//! numbers, some leave them out, some carry an explicit home flag and some
//! omit booleans entirely. Everything here turns that into an [`Observation`],
//! and [`Observation::resolve`] combines it with the home geofence result and
//! the previous state to produce the next candidate [`WatchState`].

use serde::Deserialize;
use time::OffsetDateTime;

use super::state::Position;
use super::state::WatchState;

/// Telemetry as returned by the remote watch service.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawTelemetry {
    #[serde(default)]
    pub latitude: Option<f64>,

    #[serde(default)]
    pub longitude: Option<f64>,

    /// Battery percentage; out-of-range values are clamped.
    #[serde(default)]
    pub battery: Option<i64>,

    #[serde(default)]
    pub charging: Option<bool>,

    #[serde(default)]
    pub alarm: Option<bool>,

    #[serde(default)]
    pub silent: Option<bool>,

    #[serde(default)]
    pub in_safe_zone: Option<bool>,

    /// Explicit home/away flag, when the service computes it itself.
    #[serde(default)]
    pub is_home: Option<bool>,

    #[serde(default)]
    pub online: Option<bool>,

    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_seen: Option<OffsetDateTime>,

    #[serde(default)]
    pub avatar: Option<String>,
}

/// Telemetry with heterogeneous fields coerced into their final types.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub position: Option<Position>,
    pub last_seen: Option<OffsetDateTime>,
    pub reported_home: Option<bool>,
    pub is_safe: bool,
    pub is_charging: bool,
    pub is_online: bool,
    pub alarm_enabled: bool,
    pub silent_enabled: bool,
    pub battery_level: Option<u8>,
    pub profile_image_ref: Option<String>,
}

/// Outcome of deciding whether the watch is at home.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HomeFix {
    /// The remote service asserted the flag directly.
    Reported(bool),
    /// Distance from home, as computed by the geocoder.
    Measured(f64),
    /// No position, or the geocoder failed. Previous values are kept.
    Unresolved,
}

impl From<RawTelemetry> for Observation {
    fn from(raw: RawTelemetry) -> Self {
        let position = match (raw.latitude, raw.longitude) {
            (Some(latitude), Some(longitude)) => {
                Some(Position::new(latitude, longitude)).filter(Position::is_valid)
            }
            _ => None,
        };

        Self {
            position,
            last_seen: raw.last_seen,
            reported_home: raw.is_home,
            is_safe: raw.in_safe_zone.unwrap_or(false),
            is_charging: raw.charging.unwrap_or(false),
            is_online: raw.online.unwrap_or(false),
            alarm_enabled: raw.alarm.unwrap_or(false),
            silent_enabled: raw.silent.unwrap_or(false),
            battery_level: raw.battery.map(|b| b.clamp(0, 100) as u8),
            profile_image_ref: raw.avatar.filter(|s| !s.is_empty()),
        }
    }
}

impl Observation {
    /// Build the next candidate state.
    ///
    /// `last_seen` never moves backwards; a payload without a timestamp keeps
    /// the previous one, or `fetched_at` for the very first sample. The home
    /// radius boundary is inclusive. The returned state carries the previous
    /// revision; [`WatchState::apply`] decides whether it advances.
    pub fn resolve(
        self,
        home: HomeFix,
        previous: Option<&WatchState>,
        home_radius_m: f64,
        fetched_at: OffsetDateTime,
    ) -> WatchState {
        let last_seen = match (self.last_seen, previous) {
            (Some(reported), Some(prev)) => reported.max(prev.last_seen),
            (Some(reported), None) => reported,
            (None, Some(prev)) => prev.last_seen,
            (None, None) => fetched_at,
        };

        let (distance_from_home_m, is_home) = match home {
            HomeFix::Reported(is_home) => (None, is_home),
            HomeFix::Measured(distance) => {
                let distance = distance.max(0.0);
                (Some(distance), distance <= home_radius_m)
            }
            HomeFix::Unresolved => previous
                .map(|p| (p.distance_from_home_m, p.is_home))
                .unwrap_or((None, false)),
        };

        WatchState {
            position: self.position,
            last_seen,
            distance_from_home_m,
            is_home,
            is_safe: self.is_safe,
            is_charging: self.is_charging,
            is_online: self.is_online,
            alarm_enabled: self.alarm_enabled,
            silent_enabled: self.silent_enabled,
            battery_level: self.battery_level,
            profile_image_ref: self.profile_image_ref,
            revision: previous.map(|p| p.revision).unwrap_or(0),
        }
    }
}
