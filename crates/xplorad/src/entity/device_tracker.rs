use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::debug;

use super::Entity;
use super::EntityKind;
use crate::watch::WatchId;
use crate::watch::WatchObserver;
use crate::watch::WatchSnapshot;

/// Presence of a tracked watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TrackerState {
    Home,
    NotHome,
    #[default]
    Unknown,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TrackerAttributes {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub distance_from_home_m: Option<f64>,
    pub battery_level: Option<u8>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_seen: Option<OffsetDateTime>,
    pub entity_picture: Option<String>,
    pub revision: u64,
}

#[derive(Debug, Clone, PartialEq, Default)]
struct TrackerView {
    state: TrackerState,
    attributes: TrackerAttributes,
}

impl TrackerView {
    fn render(snapshot: &WatchSnapshot) -> Self {
        if !snapshot.is_available() {
            return Self {
                state: TrackerState::Unavailable,
                attributes: TrackerAttributes::default(),
            };
        }
        let Some(state) = &snapshot.state else {
            return Self::default();
        };

        let tracker_state = if state.is_home {
            TrackerState::Home
        } else if state.position.is_some() || state.distance_from_home_m.is_some() {
            TrackerState::NotHome
        } else {
            TrackerState::Unknown
        };

        Self {
            state: tracker_state,
            attributes: TrackerAttributes {
                latitude: state.position.map(|p| p.latitude),
                longitude: state.position.map(|p| p.longitude),
                distance_from_home_m: state.distance_from_home_m,
                battery_level: state.battery_level,
                last_seen: Some(state.last_seen),
                entity_picture: state.profile_image_ref.clone(),
                revision: state.revision,
            },
        }
    }
}

/// Device tracker entity: home/away plus the last known coordinates
pub struct DeviceTracker {
    entity_id: String,
    name: String,
    watch: WatchId,
    view: ArcSwap<TrackerView>,
}

impl DeviceTracker {
    pub fn new(watch: WatchId, display_name: &str) -> Self {
        let kind = EntityKind::DeviceTracker;
        Self {
            entity_id: kind.entity_id(&watch),
            name: kind.friendly_name(display_name),
            watch,
            view: ArcSwap::new(Arc::default()),
        }
    }

    pub fn tracker_state(&self) -> TrackerState {
        self.view.load().state
    }

    pub fn tracker_attributes(&self) -> TrackerAttributes {
        self.view.load().attributes.clone()
    }
}

impl WatchObserver for DeviceTracker {
    fn on_state_change(&self, snapshot: &WatchSnapshot) {
        let view = TrackerView::render(snapshot);
        debug!("[{}] {} -> {}", self.watch, self.entity_id, view.state);
        self.view.store(Arc::new(view));
    }
}

impl Entity for DeviceTracker {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn platform(&self) -> &'static str {
        "device_tracker"
    }

    fn watch_id(&self) -> &WatchId {
        &self.watch
    }

    fn state(&self) -> String {
        self.view.load().state.to_string()
    }

    fn attributes(&self) -> serde_json::Value {
        serde_json::to_value(&self.view.load().attributes).unwrap_or_default()
    }
}
