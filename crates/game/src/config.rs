use crate::clock::{DEFAULT_SYNC_RATE, DEFAULT_TICK_RATE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerRemovalPolicy {
    /// The entity stays in the world, uncontrolled.
    #[default]
    KeepEntities,
    /// The entity the player controlled is removed with it.
    DespawnControlled,
}

impl std::str::FromStr for PlayerRemovalPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keep" | "keep-entities" => Ok(Self::KeepEntities),
            "despawn" | "despawn-controlled" => Ok(Self::DespawnControlled),
            other => Err(format!("unknown removal policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorldConfig {
    pub tick_rate: u32,
    pub sync_rate: u32,
    pub max_messages_per_tick: usize,
    pub removal_policy: PlayerRemovalPolicy,
    pub character_speed: f32,
    pub vehicle_speed: f32,
    pub vehicle_turn_rate: f32,
    pub ai_seed: u64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            sync_rate: DEFAULT_SYNC_RATE,
            max_messages_per_tick: 512,
            removal_policy: PlayerRemovalPolicy::default(),
            character_speed: 4.0,
            vehicle_speed: 12.0,
            vehicle_turn_rate: 1.5,
            ai_seed: 0x5EED,
        }
    }
}

impl WorldConfig {
    pub fn dt(&self) -> f32 {
        1.0 / self.tick_rate.max(1) as f32
    }
}
