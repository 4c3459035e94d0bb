/// Drops a share of unreliable traffic, for exercising replication under loss.
#[derive(Debug, Clone)]
pub struct LossSimulation {
    loss_percent: f32,
    rng: fastrand::Rng,
}

impl LossSimulation {
    pub fn new(loss_percent: f32, seed: u64) -> Self {
        Self {
            loss_percent: loss_percent.clamp(0.0, 100.0),
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    pub fn disabled() -> Self {
        Self::new(0.0, 0)
    }

    pub fn loss_percent(&self) -> f32 {
        self.loss_percent
    }

    pub fn should_drop(&mut self) -> bool {
        self.loss_percent > 0.0 && self.rng.f32() * 100.0 < self.loss_percent
    }
}

impl Default for LossSimulation {
    fn default() -> Self {
        Self::disabled()
    }
}

#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_lost: u64,
    pub packets_rejected: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub rtt_ms: f32,
}

pub fn random_salt() -> u64 {
    fastrand::u64(..)
}
