use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;

/// Stable identifier of one physical watch within an account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WatchId(String);

impl WatchId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WatchId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for WatchId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A WGS84 coordinate pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether both components are finite and inside their valid ranges.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Writable boolean fields of a watch. Commands for these flow upstream to
/// the remote service.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CommandField {
    Alarm,
    Silent,
}

impl CommandField {
    pub fn get(self, state: &WatchState) -> bool {
        match self {
            Self::Alarm => state.alarm_enabled,
            Self::Silent => state.silent_enabled,
        }
    }

    fn set(self, state: &mut WatchState, value: bool) {
        match self {
            Self::Alarm => state.alarm_enabled = value,
            Self::Silent => state.silent_enabled = value,
        }
    }

    pub fn as_field(self) -> Field {
        match self {
            Self::Alarm => Field::AlarmEnabled,
            Self::Silent => Field::SilentEnabled,
        }
    }
}

/// Observable fields of [`WatchState`], used to describe a change set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Field {
    Position,
    LastSeen,
    DistanceFromHome,
    IsHome,
    IsSafe,
    IsCharging,
    IsOnline,
    AlarmEnabled,
    SilentEnabled,
    BatteryLevel,
    ProfileImage,
}

/// The set of fields that differ between two states, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet(Vec<Field>);

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, field: Field) -> bool {
        self.0.contains(&field)
    }

    pub fn fields(&self) -> &[Field] {
        &self.0
    }

    fn push_if(&mut self, field: Field, changed: bool) {
        if changed {
            self.0.push(field);
        }
    }
}

impl fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", field)?;
        }
        Ok(())
    }
}

/// Last accepted, normalized state of one watch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchState {
    pub position: Option<Position>,

    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,

    /// Derived from `position` and the configured home; not authoritative.
    pub distance_from_home_m: Option<f64>,

    pub is_home: bool,

    /// Inside a vendor-defined safe zone. Independent of `is_home`.
    pub is_safe: bool,

    pub is_charging: bool,

    pub is_online: bool,

    pub alarm_enabled: bool,

    pub silent_enabled: bool,

    /// Battery percentage (0-100)
    pub battery_level: Option<u8>,

    pub profile_image_ref: Option<String>,

    /// Incremented on every accepted change, never decremented.
    pub revision: u64,
}

impl WatchState {
    /// Compare every observable field. `revision` is bookkeeping and ignored.
    pub fn diff(&self, other: &WatchState) -> ChangeSet {
        let mut changes = ChangeSet::default();
        changes.push_if(Field::Position, self.position != other.position);
        changes.push_if(Field::LastSeen, self.last_seen != other.last_seen);
        changes.push_if(
            Field::DistanceFromHome,
            self.distance_from_home_m != other.distance_from_home_m,
        );
        changes.push_if(Field::IsHome, self.is_home != other.is_home);
        changes.push_if(Field::IsSafe, self.is_safe != other.is_safe);
        changes.push_if(Field::IsCharging, self.is_charging != other.is_charging);
        changes.push_if(Field::IsOnline, self.is_online != other.is_online);
        changes.push_if(Field::AlarmEnabled, self.alarm_enabled != other.alarm_enabled);
        changes.push_if(
            Field::SilentEnabled,
            self.silent_enabled != other.silent_enabled,
        );
        changes.push_if(Field::BatteryLevel, self.battery_level != other.battery_level);
        changes.push_if(
            Field::ProfileImage,
            self.profile_image_ref != other.profile_image_ref,
        );
        changes
    }

    /// Replace the observable fields with `next` if anything differs.
    ///
    /// The revision advances by exactly one when the returned change set is
    /// non-empty and is left untouched otherwise.
    pub fn apply(&mut self, next: WatchState) -> ChangeSet {
        let changes = self.diff(&next);
        if !changes.is_empty() {
            let revision = self.revision + 1;
            *self = next;
            self.revision = revision;
        }
        changes
    }

    /// Set one writable field, advancing the revision if it changed.
    pub fn set_command_field(&mut self, field: CommandField, value: bool) -> bool {
        if field.get(self) == value {
            return false;
        }
        field.set(self, value);
        self.revision += 1;
        true
    }
}

#[cfg(test)]
pub(crate) fn sample_state() -> WatchState {
    WatchState {
        position: Some(Position::new(52.52, 13.405)),
        last_seen: OffsetDateTime::UNIX_EPOCH + time::Duration::hours(1),
        distance_from_home_m: Some(12.5),
        is_home: true,
        is_safe: false,
        is_charging: false,
        is_online: true,
        alarm_enabled: false,
        silent_enabled: false,
        battery_level: Some(80),
        profile_image_ref: None,
        revision: 1,
    }
}
