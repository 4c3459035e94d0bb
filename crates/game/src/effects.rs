use glam::{Quat, Vec3};

use crate::message::{Message, wire_quat};
use crate::notify::{Notification, Notifier};

/// Turns effect messages into presentation notifications. Registered with
/// the sync manager as [`SyncId::Effects`](crate::sync::SyncId::Effects).
#[derive(Debug, Clone, Default)]
pub struct EffectsDispatcher {
    notifier: Notifier,
    played: u64,
}

impl EffectsDispatcher {
    pub fn new(notifier: Notifier) -> Self {
        Self {
            notifier,
            played: 0,
        }
    }

    pub fn play(&mut self, effect: &str, position: Vec3, rotation: Quat) {
        self.played += 1;
        self.notifier.notify(Notification::EffectTriggered {
            effect: effect.to_string(),
            position,
            rotation,
        });
    }

    /// Plays a received `PlayEffect`; other messages are ignored.
    pub fn apply(&mut self, message: &Message) {
        if let Message::PlayEffect {
            effect,
            position,
            rotation,
        } = message
        {
            let position = Vec3::from_array(*position);
            if !position.is_finite() {
                log::warn!("Ignoring effect '{}' at a non-finite position", effect);
                return;
            }
            self.play(effect, position, wire_quat(*rotation));
        }
    }

    pub fn played(&self) -> u64 {
        self.played
    }
}
