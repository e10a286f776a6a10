use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;
use tracing::debug;

use super::BinaryState;
use super::Entity;
use super::EntityKind;
use crate::watch::WatchId;
use crate::watch::WatchObserver;
use crate::watch::WatchSnapshot;
use crate::watch::WatchState;

/// Device class for binary sensors, matching Home Assistant's binary_sensor device classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BinarySensorDeviceClass {
    BatteryCharging,
    Connectivity,
    Safety,
}

/// Boolean watch fields exposed as binary sensors.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BinarySensorKind {
    /// Inside one of the safe zones configured on the watch.
    SafeZone,
    Charging,
    Online,
}

impl BinarySensorKind {
    pub fn read(self, state: &WatchState) -> bool {
        match self {
            Self::SafeZone => state.is_safe,
            Self::Charging => state.is_charging,
            Self::Online => state.is_online,
        }
    }

    pub fn device_class(self) -> BinarySensorDeviceClass {
        match self {
            Self::SafeZone => BinarySensorDeviceClass::Safety,
            Self::Charging => BinarySensorDeviceClass::BatteryCharging,
            Self::Online => BinarySensorDeviceClass::Connectivity,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SensorView {
    state: BinaryState,
    revision: u64,
}

/// Binary sensor entity (e.g., charging or safe-zone indicator)
pub struct BinarySensor {
    entity_id: String,
    name: String,
    watch: WatchId,
    kind: BinarySensorKind,
    view: ArcSwap<SensorView>,
}

impl BinarySensor {
    pub fn new(watch: WatchId, display_name: &str, kind: BinarySensorKind) -> Self {
        let entity_kind = EntityKind::BinarySensor(kind);
        Self {
            entity_id: entity_kind.entity_id(&watch),
            name: entity_kind.friendly_name(display_name),
            watch,
            kind,
            view: ArcSwap::new(Arc::default()),
        }
    }

    pub fn kind(&self) -> BinarySensorKind {
        self.kind
    }

    pub fn binary_state(&self) -> BinaryState {
        self.view.load().state
    }

    pub fn is_on(&self) -> Option<bool> {
        self.binary_state().as_bool()
    }
}

impl WatchObserver for BinarySensor {
    fn on_state_change(&self, snapshot: &WatchSnapshot) {
        let kind = self.kind;
        let view = SensorView {
            state: BinaryState::render(snapshot, |s| kind.read(s)),
            revision: snapshot.revision(),
        };
        debug!("[{}] {} -> {}", self.watch, self.entity_id, view.state);
        self.view.store(Arc::new(view));
    }
}

impl Entity for BinarySensor {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn platform(&self) -> &'static str {
        "binary_sensor"
    }

    fn watch_id(&self) -> &WatchId {
        &self.watch
    }

    fn state(&self) -> String {
        self.binary_state().to_string()
    }

    fn attributes(&self) -> serde_json::Value {
        serde_json::json!({
            "device_class": self.kind.device_class(),
            "revision": self.view.load().revision,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::sample_state;
    use crate::watch::Availability;

    fn notify(sensor: &BinarySensor, state: WatchState, availability: Availability) {
        sensor.on_state_change(&WatchSnapshot {
            id: WatchId::new("w-1"),
            state: Some(state),
            availability,
        });
    }

    #[test]
    fn test_device_classes() {
        assert_eq!(
            BinarySensorKind::SafeZone.device_class(),
            BinarySensorDeviceClass::Safety
        );
        assert_eq!(
            BinarySensorKind::Charging.device_class().to_string(),
            "battery_charging"
        );
        assert_eq!(
            BinarySensorKind::Online.device_class().to_string(),
            "connectivity"
        );
    }

    #[test]
    fn test_charging_sensor_follows_state() {
        let sensor = BinarySensor::new(WatchId::new("w-1"), "Emma", BinarySensorKind::Charging);
        assert_eq!(sensor.entity_id(), "binary_sensor.w_1_charging");
        assert_eq!(sensor.name(), "Emma Watch Charging");
        assert_eq!(sensor.is_on(), None);

        notify(&sensor, sample_state(), Availability::Available);
        assert_eq!(sensor.is_on(), Some(false));

        let charging = WatchState {
            is_charging: true,
            revision: 2,
            ..sample_state()
        };
        notify(&sensor, charging, Availability::Available);
        assert_eq!(sensor.is_on(), Some(true));
        assert_eq!(sensor.attributes()["revision"], 2);
    }

    #[test]
    fn test_safe_zone_is_not_inverted() {
        let sensor = BinarySensor::new(WatchId::new("w-1"), "Emma", BinarySensorKind::SafeZone);
        let safe = WatchState {
            is_safe: true,
            ..sample_state()
        };
        notify(&sensor, safe, Availability::Available);
        assert_eq!(sensor.state(), "on");
        assert_eq!(sensor.attributes()["device_class"], "safety");
    }

    #[test]
    fn test_unavailable() {
        let sensor = BinarySensor::new(WatchId::new("w-1"), "Emma", BinarySensorKind::Online);
        notify(&sensor, sample_state(), Availability::Available);
        notify(&sensor, sample_state(), Availability::Unavailable);
        assert_eq!(sensor.state(), "unavailable");
        assert_eq!(sensor.is_on(), None);
    }
}
