use glam::{Quat, Vec3};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::types::{EntityId, GroupId, PlayerId};

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSummary {
    pub id: PlayerId,
    pub name: String,
    pub group: GroupId,
    pub human: bool,
    pub entity: Option<EntityId>,
}

/// Events for the presentation layer. Delivery is fire-and-forget.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    PlayerListChanged {
        players: Vec<PlayerSummary>,
    },
    ChatReceived {
        text: String,
    },
    StatusChanged {
        status: String,
    },
    ControlledEntityChanged {
        player_id: PlayerId,
        entity_id: Option<EntityId>,
    },
    EffectTriggered {
        effect: String,
        position: Vec3,
        rotation: Quat,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Notifier {
    tx: Option<UnboundedSender<Notification>>,
}

impl Notifier {
    pub fn channel() -> (Self, UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn notify(&self, notification: Notification) {
        if let Some(tx) = &self.tx {
            // A dropped receiver just means nobody is watching.
            let _ = tx.send(notification);
        }
    }

    pub fn status(&self, status: impl Into<String>) {
        self.notify(Notification::StatusChanged {
            status: status.into(),
        });
    }
}
