//! Entity adapters for the home-automation platform
//!
//! Every entity follows exactly one watch. It subscribes to the coordinator as
//! a [`WatchObserver`] and re-renders its own view whenever it is notified;
//! readers (the HTTP API, tests) only ever see a fully rendered view.

mod binary_sensor;
mod device_tracker;
mod registry;
mod switch;

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use strum::IntoEnumIterator;

pub use binary_sensor::BinarySensor;
pub use binary_sensor::BinarySensorDeviceClass;
pub use binary_sensor::BinarySensorKind;
pub use device_tracker::DeviceTracker;
pub use device_tracker::TrackerAttributes;
pub use device_tracker::TrackerState;
pub use registry::EntityRegistry;
pub use switch::Switch;

use crate::watch::WatchId;
use crate::watch::WatchObserver;
use crate::watch::WatchSnapshot;
use crate::watch::WatchState;

/// Switch entities map one-to-one onto the writable watch fields.
pub type SwitchKind = crate::watch::CommandField;

/// Base trait that all entities implement
pub trait Entity: WatchObserver {
    /// Entity ID (e.g., "binary_sensor.w_1_charging")
    fn entity_id(&self) -> &str;

    /// Human-readable name
    fn name(&self) -> &str;

    /// Platform type of this entity (e.g. "device_tracker", "switch")
    fn platform(&self) -> &'static str;

    fn watch_id(&self) -> &WatchId;

    /// Current state string, e.g. "home", "on" or "unavailable"
    fn state(&self) -> String;

    fn attributes(&self) -> serde_json::Value;

    fn as_switch(&self) -> Option<&Switch> {
        None
    }

    /// Serialize the rendered view for the platform sink.
    fn state_json(&self) -> serde_json::Value {
        serde_json::json!({
            "entity_id": self.entity_id(),
            "name": self.name(),
            "platform": self.platform(),
            "watch_id": self.watch_id(),
            "state": self.state(),
            "attributes": self.attributes(),
        })
    }
}

/// Rendered value of an on/off entity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BinaryState {
    On,
    Off,
    /// No state has been received yet.
    #[default]
    Unknown,
    Unavailable,
}

impl BinaryState {
    pub fn render(snapshot: &WatchSnapshot, read: impl Fn(&WatchState) -> bool) -> Self {
        if !snapshot.is_available() {
            return Self::Unavailable;
        }
        match &snapshot.state {
            Some(state) if read(state) => Self::On,
            Some(_) => Self::Off,
            None => Self::Unknown,
        }
    }

    pub fn as_bool(self) -> Option<bool> {
        match self {
            Self::On => Some(true),
            Self::Off => Some(false),
            Self::Unknown | Self::Unavailable => None,
        }
    }
}

/// One entity type that can be built for each watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum EntityKind {
    DeviceTracker,
    BinarySensor(BinarySensorKind),
    Switch(SwitchKind),
}

impl EntityKind {
    /// Every entity kind, in the order they are built.
    pub fn all() -> Vec<Self> {
        std::iter::once(Self::DeviceTracker)
            .chain(BinarySensorKind::iter().map(Self::BinarySensor))
            .chain(SwitchKind::iter().map(Self::Switch))
            .collect()
    }

    /// Configuration key, e.g. "device_tracker" or "safe_zone"
    pub fn key(&self) -> String {
        match self {
            Self::DeviceTracker => "device_tracker".to_string(),
            Self::BinarySensor(kind) => kind.to_string(),
            Self::Switch(kind) => kind.to_string(),
        }
    }

    pub fn platform(&self) -> &'static str {
        match self {
            Self::DeviceTracker => "device_tracker",
            Self::BinarySensor(_) => "binary_sensor",
            Self::Switch(_) => "switch",
        }
    }

    /// Last part of the entity id and of the friendly name.
    fn suffix(&self) -> (String, String) {
        match self {
            Self::DeviceTracker => ("location".to_string(), "Location".to_string()),
            other => {
                let key = other.key();
                let title = title_case(&key);
                (key, title)
            }
        }
    }

    /// Entity id for this kind on `watch`: `<platform>.<watch>_<suffix>`.
    pub fn entity_id(&self, watch: &WatchId) -> String {
        format!("{}.{}_{}", self.platform(), object_id(watch), self.suffix().0)
    }

    /// Friendly name: `<display name> Watch <Suffix>`.
    pub fn friendly_name(&self, display_name: &str) -> String {
        format!("{} Watch {}", display_name, self.suffix().1)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl TryFrom<String> for EntityKind {
    type Error = String;

    fn try_from(key: String) -> Result<Self, Self::Error> {
        Self::all()
            .into_iter()
            .find(|kind| kind.key() == key)
            .ok_or_else(|| {
                let known: Vec<String> = Self::all().iter().map(|k| k.key()).collect();
                format!(
                    "unknown entity type '{}', expected one of: {}",
                    key,
                    known.join(", ")
                )
            })
    }
}

/// Lowercase the watch id and replace anything outside `[a-z0-9]` with `_`.
pub(crate) fn object_id(watch: &WatchId) -> String {
    watch
        .as_str()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::sample_state;
    use crate::watch::Availability;

    #[test]
    fn test_all_kinds() {
        let keys: Vec<String> = EntityKind::all().iter().map(|k| k.key()).collect();
        assert_eq!(
            keys,
            vec!["device_tracker", "safe_zone", "charging", "online", "alarm", "silent"]
        );
    }

    #[test]
    fn test_kind_from_key() {
        assert_eq!(
            EntityKind::try_from("online".to_string()),
            Ok(EntityKind::BinarySensor(BinarySensorKind::Online))
        );
        assert_eq!(
            EntityKind::try_from("alarm".to_string()),
            Ok(EntityKind::Switch(SwitchKind::Alarm))
        );
        let err = EntityKind::try_from("battery".to_string()).unwrap_err();
        assert!(err.contains("battery"));
        assert!(err.contains("device_tracker"));
    }

    #[test]
    fn test_entity_naming() {
        let watch = WatchId::new("Kid-Watch 2");
        let kind = EntityKind::BinarySensor(BinarySensorKind::SafeZone);
        assert_eq!(kind.entity_id(&watch), "binary_sensor.kid_watch_2_safe_zone");
        assert_eq!(kind.friendly_name("Emma"), "Emma Watch Safe Zone");

        let tracker = EntityKind::DeviceTracker;
        assert_eq!(tracker.entity_id(&watch), "device_tracker.kid_watch_2_location");
        assert_eq!(tracker.friendly_name("Emma"), "Emma Watch Location");
    }

    #[test]
    fn test_binary_state_render() {
        let id = WatchId::new("w-1");
        let mut snapshot = WatchSnapshot {
            id,
            state: None,
            availability: Availability::Available,
        };
        assert_eq!(
            BinaryState::render(&snapshot, |s| s.is_charging),
            BinaryState::Unknown
        );

        snapshot.state = Some(WatchState {
            is_charging: true,
            ..sample_state()
        });
        assert_eq!(
            BinaryState::render(&snapshot, |s| s.is_charging),
            BinaryState::On
        );
        assert_eq!(
            BinaryState::render(&snapshot, |s| s.alarm_enabled),
            BinaryState::Off
        );

        snapshot.availability = Availability::Unavailable;
        assert_eq!(
            BinaryState::render(&snapshot, |s| s.is_charging),
            BinaryState::Unavailable
        );
        assert_eq!(BinaryState::Unavailable.to_string(), "unavailable");
    }
}
