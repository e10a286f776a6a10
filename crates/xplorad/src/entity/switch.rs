use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::debug;
use tracing::info;

use super::BinaryState;
use super::Entity;
use super::EntityKind;
use super::SwitchKind;
use crate::coordinator::CommandError;
use crate::coordinator::CommandRelay;
use crate::watch::WatchId;
use crate::watch::WatchObserver;
use crate::watch::WatchSnapshot;

#[derive(Debug, Clone, Copy, Default)]
struct SwitchView {
    state: BinaryState,
    revision: u64,
}

/// Switch entity for a writable watch setting (alarm, silent mode)
///
/// Toggling does not touch the rendered view directly: the coordinator
/// applies the change optimistically and notifies this entity, and reverts
/// it the same way if the watch rejects the command.
pub struct Switch {
    entity_id: String,
    name: String,
    watch: WatchId,
    kind: SwitchKind,
    relay: CommandRelay,
    view: ArcSwap<SwitchView>,
}

impl Switch {
    pub fn new(watch: WatchId, display_name: &str, kind: SwitchKind, relay: CommandRelay) -> Self {
        let entity_kind = EntityKind::Switch(kind);
        Self {
            entity_id: entity_kind.entity_id(&watch),
            name: entity_kind.friendly_name(display_name),
            watch,
            kind,
            relay,
            view: ArcSwap::new(Arc::default()),
        }
    }

    pub fn kind(&self) -> SwitchKind {
        self.kind
    }

    pub fn is_on(&self) -> Option<bool> {
        self.view.load().state.as_bool()
    }

    /// Turn the switch on or off on the watch.
    pub async fn issue_command(&self, on: bool) -> Result<(), CommandError> {
        info!("[{}] {} turned {}", self.watch, self.entity_id, if on { "on" } else { "off" });
        self.relay.send(&self.watch, self.kind, on).await
    }
}

impl WatchObserver for Switch {
    fn on_state_change(&self, snapshot: &WatchSnapshot) {
        let kind = self.kind;
        let view = SwitchView {
            state: BinaryState::render(snapshot, |s| kind.get(s)),
            revision: snapshot.revision(),
        };
        debug!("[{}] {} -> {}", self.watch, self.entity_id, view.state);
        self.view.store(Arc::new(view));
    }
}

impl Entity for Switch {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn platform(&self) -> &'static str {
        "switch"
    }

    fn watch_id(&self) -> &WatchId {
        &self.watch
    }

    fn state(&self) -> String {
        self.view.load().state.to_string()
    }

    fn attributes(&self) -> serde_json::Value {
        serde_json::json!({ "revision": self.view.load().revision })
    }

    fn as_switch(&self) -> Option<&Switch> {
        Some(self)
    }
}
