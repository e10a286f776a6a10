use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;
use tracing::info;
use tracing::warn;

use super::BinarySensor;
use super::DeviceTracker;
use super::Entity;
use super::EntityKind;
use super::Switch;
use crate::config::AccountConfig;
use crate::coordinator::Coordinator;
use crate::coordinator::CoordinatorError;
use crate::watch::WatchId;
use crate::watch::WatchObserver;

/// All entities built for an account, keyed by entity id.
#[derive(Default)]
pub struct EntityRegistry {
    entities: BTreeMap<String, Arc<dyn Entity>>,
}

impl EntityRegistry {
    /// Build the configured entity kinds for every watch of `account` and
    /// subscribe each of them to the coordinator.
    pub async fn build(
        coordinator: &Coordinator,
        account: &AccountConfig,
    ) -> Result<Self, CoordinatorError> {
        let mut registry = Self::default();
        for watch in &account.watches {
            let display_name = account.display_name(watch);
            for kind in &account.entities {
                registry
                    .add(coordinator, watch, &display_name, *kind)
                    .await?;
            }
        }
        info!(
            "Built {} entities for {} watch(es)",
            registry.len(),
            account.watches.len()
        );
        Ok(registry)
    }

    /// Create one entity and subscribe it. Returns false if the entity id is
    /// already taken, by this watch or by one whose id sanitizes the same.
    pub async fn add(
        &mut self,
        coordinator: &Coordinator,
        watch: &WatchId,
        display_name: &str,
        kind: EntityKind,
    ) -> Result<bool, CoordinatorError> {
        let entity_id = kind.entity_id(watch);
        if let Some(existing) = self.entities.get(&entity_id) {
            if existing.watch_id() != watch {
                warn!(
                    "[{}] Entity {} already belongs to watch {}, not adding it",
                    watch,
                    entity_id,
                    existing.watch_id()
                );
            }
            return Ok(false);
        }

        let (entity, observer): (Arc<dyn Entity>, Arc<dyn WatchObserver>) = match kind {
            EntityKind::DeviceTracker => {
                let tracker = Arc::new(DeviceTracker::new(watch.clone(), display_name));
                (tracker.clone() as Arc<dyn Entity>, tracker as Arc<dyn WatchObserver>)
            }
            EntityKind::BinarySensor(sensor_kind) => {
                let sensor = Arc::new(BinarySensor::new(watch.clone(), display_name, sensor_kind));
                (sensor.clone() as Arc<dyn Entity>, sensor as Arc<dyn WatchObserver>)
            }
            EntityKind::Switch(switch_kind) => {
                let switch = Arc::new(Switch::new(
                    watch.clone(),
                    display_name,
                    switch_kind,
                    coordinator.command_relay(),
                ));
                (switch.clone() as Arc<dyn Entity>, switch as Arc<dyn WatchObserver>)
            }
        };

        coordinator.subscribe(watch, observer).await?;
        debug!("[{}] Added entity {}", watch, entity_id);
        self.entities.insert(entity_id, entity);
        Ok(true)
    }

    /// Forget every entity of `watch`. The coordinator drops their
    /// subscriptions when the watch is unregistered.
    pub fn remove_watch(&mut self, watch: &WatchId) -> usize {
        let before = self.entities.len();
        self.entities.retain(|_, e| e.watch_id() != watch);
        before - self.entities.len()
    }

    pub fn get(&self, entity_id: &str) -> Option<&Arc<dyn Entity>> {
        self.entities.get(entity_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Entity>> {
        self.entities.values()
    }

    pub fn for_watch<'a>(&'a self, watch: &'a WatchId) -> impl Iterator<Item = &'a Arc<dyn Entity>> {
        self.entities.values().filter(move |e| e.watch_id() == watch)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::coordinator::CoordinatorSettings;
    use crate::coordinator::RecordingAlertSink;
    use crate::entity::BinarySensorKind;
    use crate::entity::SwitchKind;
    use crate::geo::MockGeocoder;
    use crate::remote::mock::MockWatchService;
    use crate::watch::RawTelemetry;

    fn account(entities: Vec<EntityKind>) -> AccountConfig {
        AccountConfig {
            base_url: "https://gateway.example".to_string(),
            username: "user".to_string(),
            password: "pass".to_string(),
            watches: vec![WatchId::new("w-1"), WatchId::new("w-2")],
            names: HashMap::from([("w-1".to_string(), "Emma".to_string())]),
            entities,
        }
    }

    fn coordinator(service: Arc<MockWatchService>) -> Coordinator {
        let coordinator = Coordinator::new(
            CoordinatorSettings::default(),
            service,
            Arc::new(MockGeocoder::new(Ok(10.0))),
            Arc::new(RecordingAlertSink::default()),
        );
        coordinator.register(WatchId::new("w-1"));
        coordinator.register(WatchId::new("w-2"));
        coordinator
    }

    #[tokio::test]
    async fn test_build_all_entities() {
        let service = Arc::new(MockWatchService::new());
        let coordinator = coordinator(service);
        let registry = EntityRegistry::build(&coordinator, &account(EntityKind::all()))
            .await
            .unwrap();

        let ids: Vec<&str> = registry.iter().map(|e| e.entity_id()).collect();
        assert_eq!(
            ids,
            vec![
                "binary_sensor.w_1_charging",
                "binary_sensor.w_1_online",
                "binary_sensor.w_1_safe_zone",
                "binary_sensor.w_2_charging",
                "binary_sensor.w_2_online",
                "binary_sensor.w_2_safe_zone",
                "device_tracker.w_1_location",
                "device_tracker.w_2_location",
                "switch.w_1_alarm",
                "switch.w_1_silent",
                "switch.w_2_alarm",
                "switch.w_2_silent",
            ]
        );
        assert_eq!(
            registry.get("device_tracker.w_2_location").unwrap().name(),
            "w-2 Watch Location"
        );
        assert!(registry.get("switch.w_1_alarm").unwrap().as_switch().is_some());
        assert!(registry.get("binary_sensor.w_1_online").unwrap().as_switch().is_none());
    }

    #[tokio::test]
    async fn test_build_selected_entities() {
        let service = Arc::new(MockWatchService::new());
        let coordinator = coordinator(service);
        let kinds = vec![
            EntityKind::BinarySensor(BinarySensorKind::Charging),
            EntityKind::Switch(SwitchKind::Silent),
            EntityKind::Switch(SwitchKind::Silent),
        ];
        let registry = EntityRegistry::build(&coordinator, &account(kinds))
            .await
            .unwrap();
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.for_watch(&WatchId::new("w-1")).count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_watch_fails() {
        let service = Arc::new(MockWatchService::new());
        let coordinator = Coordinator::new(
            CoordinatorSettings::default(),
            service,
            Arc::new(MockGeocoder::new(Ok(10.0))),
            Arc::new(RecordingAlertSink::default()),
        );
        let result = EntityRegistry::build(&coordinator, &account(EntityKind::all())).await;
        assert!(matches!(result, Err(CoordinatorError::UnknownWatch(_))));
    }

    #[tokio::test]
    async fn test_one_poll_updates_every_entity_of_the_watch() {
        let service = Arc::new(MockWatchService::new());
        service.reply(
            "w-1",
            RawTelemetry {
                is_home: Some(false),
                latitude: Some(48.1),
                longitude: Some(11.6),
                charging: Some(true),
                in_safe_zone: Some(true),
                online: Some(true),
                silent: Some(true),
                ..Default::default()
            },
        );
        let coordinator = coordinator(service);
        let registry = EntityRegistry::build(&coordinator, &account(EntityKind::all()))
            .await
            .unwrap();

        coordinator.refresh_one(&WatchId::new("w-1")).await.unwrap();

        let states: Vec<(String, String)> = registry
            .for_watch(&WatchId::new("w-1"))
            .map(|e| (e.entity_id().to_string(), e.state()))
            .collect();
        let expected = [
            ("binary_sensor.w_1_charging", "on"),
            ("binary_sensor.w_1_online", "on"),
            ("binary_sensor.w_1_safe_zone", "on"),
            ("device_tracker.w_1_location", "not_home"),
            ("switch.w_1_alarm", "off"),
            ("switch.w_1_silent", "on"),
        ];
        assert_eq!(
            states,
            expected
                .iter()
                .map(|(id, s)| (id.to_string(), s.to_string()))
                .collect::<Vec<_>>()
        );

        // w-2 has not been polled
        assert!(registry
            .for_watch(&WatchId::new("w-2"))
            .all(|e| e.state() == "unknown"));
    }

    #[tokio::test]
    async fn test_colliding_entity_id_keeps_first_watch() {
        let service = Arc::new(MockWatchService::new());
        let coordinator = coordinator(service);
        coordinator.register(WatchId::new("w_1"));
        let mut registry = EntityRegistry::build(&coordinator, &account(EntityKind::all()))
            .await
            .unwrap();

        let added = registry
            .add(
                &coordinator,
                &WatchId::new("w_1"),
                "Twin",
                EntityKind::DeviceTracker,
            )
            .await
            .unwrap();
        assert!(!added);
        assert_eq!(
            registry.get("device_tracker.w_1_location").unwrap().watch_id(),
            &WatchId::new("w-1")
        );
        assert_eq!(registry.for_watch(&WatchId::new("w_1")).count(), 0);
    }

    #[tokio::test]
    async fn test_remove_watch() {
        let service = Arc::new(MockWatchService::new());
        let coordinator = coordinator(service);
        let mut registry = EntityRegistry::build(&coordinator, &account(EntityKind::all()))
            .await
            .unwrap();
        assert_eq!(registry.remove_watch(&WatchId::new("w-2")), 6);
        assert_eq!(registry.len(), 6);
    }
}
