pub const DEFAULT_TICK_RATE: u32 = 60;
pub const DEFAULT_SYNC_RATE: u32 = 20;

/// Accumulator that turns wall-clock deltas into whole simulation ticks.
pub struct FixedTimestep {
    tick_rate: u32,
    dt: f32,
    accumulator: f32,
}

impl FixedTimestep {
    pub fn new(tick_rate: u32) -> Self {
        let tick_rate = tick_rate.max(1);
        Self {
            tick_rate,
            dt: 1.0 / tick_rate as f32,
            accumulator: 0.0,
        }
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    pub fn dt(&self) -> f32 {
        self.dt
    }

    pub fn accumulate(&mut self, delta: f32) {
        self.accumulator += delta.min(0.25);
    }

    pub fn consume_tick(&mut self) -> bool {
        if self.accumulator >= self.dt {
            self.accumulator -= self.dt;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.accumulator = 0.0;
    }
}

/// Fires at the replication rate, independent of how often it is advanced.
#[derive(Debug, Clone)]
pub struct ReplicationClock {
    interval: f32,
    elapsed: f32,
}

impl ReplicationClock {
    pub fn new(rate_hz: u32) -> Self {
        Self {
            interval: 1.0 / rate_hz.max(1) as f32,
            elapsed: 0.0,
        }
    }

    pub fn interval(&self) -> f32 {
        self.interval
    }

    /// Advances by `dt` and reports whether a replication round is due.
    /// At most one round fires per call.
    pub fn advance(&mut self, dt: f32) -> bool {
        self.elapsed += dt;
        if self.elapsed + 1e-6 >= self.interval {
            self.elapsed = (self.elapsed - self.interval).min(self.interval);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_timestep_accumulation() {
        let mut ts = FixedTimestep::new(60);

        ts.accumulate(1.0 / 30.0);
        assert!(ts.consume_tick());
        assert!(ts.consume_tick());
        assert!(!ts.consume_tick());
    }

    #[test]
    fn replication_clock_is_decoupled_from_tick_rate() {
        let mut clock = ReplicationClock::new(DEFAULT_SYNC_RATE);
        let dt = 1.0 / DEFAULT_TICK_RATE as f32;

        let fired = (0..60).filter(|_| clock.advance(dt)).count();
        assert_eq!(fired, 20);
    }
}
