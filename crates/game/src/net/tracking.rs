use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::protocol::sequence_greater_than;

#[derive(Debug, Clone)]
struct InFlight {
    sequence: u32,
    sent_at: Instant,
    reliable: Vec<u32>,
}

/// Sender side of the ack bitfield scheme: maps acknowledged packets back to
/// the reliable messages they carried and keeps a smoothed round-trip time.
#[derive(Debug)]
pub struct AckTracker {
    in_flight: VecDeque<InFlight>,
    max_in_flight: usize,
    srtt: f32,
    rtt_var: f32,
    lost: u64,
}

impl AckTracker {
    const MIN_RESEND: Duration = Duration::from_millis(40);
    const MAX_RESEND: Duration = Duration::from_millis(1000);

    pub fn new(max_in_flight: usize) -> Self {
        Self {
            in_flight: VecDeque::with_capacity(max_in_flight),
            max_in_flight,
            srtt: 100.0,
            rtt_var: 50.0,
            lost: 0,
        }
    }

    pub fn track(&mut self, sequence: u32, reliable: Vec<u32>) {
        while self.in_flight.len() >= self.max_in_flight {
            // Too old to be acked any more; its reliable messages go out again
            // when their resend timer fires.
            self.in_flight.pop_front();
            self.lost += 1;
        }

        self.in_flight.push_back(InFlight {
            sequence,
            sent_at: Instant::now(),
            reliable,
        });
    }

    /// Processes one received header and returns the reliable message indices
    /// now known to be delivered.
    pub fn process_ack(&mut self, ack: u32, ack_bitfield: u32) -> Vec<u32> {
        let now = Instant::now();
        let mut delivered = Vec::new();
        let mut rtt_samples = Vec::new();

        self.in_flight.retain_mut(|packet| {
            let acked = packet.sequence == ack
                || (sequence_greater_than(ack, packet.sequence) && {
                    let diff = ack.wrapping_sub(packet.sequence);
                    diff <= 32 && ack_bitfield & (1 << (diff - 1)) != 0
                });

            if acked {
                rtt_samples.push(now.duration_since(packet.sent_at).as_secs_f32() * 1000.0);
                delivered.append(&mut packet.reliable);
            }
            !acked
        });

        for rtt in rtt_samples {
            self.update_rtt(rtt);
        }

        delivered
    }

    fn update_rtt(&mut self, rtt: f32) {
        const ALPHA: f32 = 0.125;
        const BETA: f32 = 0.25;

        let diff = (rtt - self.srtt).abs();
        self.rtt_var = (1.0 - BETA) * self.rtt_var + BETA * diff;
        self.srtt = (1.0 - ALPHA) * self.srtt + ALPHA * rtt;
    }

    pub fn srtt(&self) -> f32 {
        self.srtt
    }

    pub fn rtt_var(&self) -> f32 {
        self.rtt_var
    }

    pub fn lost(&self) -> u64 {
        self.lost
    }

    pub fn resend_timeout(&self) -> Duration {
        let millis = self.srtt + 4.0 * self.rtt_var;
        Duration::from_secs_f32(millis.max(0.0) / 1000.0).clamp(Self::MIN_RESEND, Self::MAX_RESEND)
    }
}

/// Receiver side: remembers which sequences arrived so they can be acked and
/// duplicates dropped. Sequence 0 is never sent, so an initial ack of 0
/// acknowledges nothing.
#[derive(Debug, Default)]
pub struct ReceiveTracker {
    latest: u32,
    bitfield: u32,
    recent: VecDeque<u32>,
}

impl ReceiveTracker {
    const RECENT: usize = 128;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, sequence: u32) -> bool {
        if sequence == 0 || self.recent.contains(&sequence) {
            return false;
        }

        if self.recent.len() >= Self::RECENT {
            self.recent.pop_front();
        }
        self.recent.push_back(sequence);

        if self.latest == 0 || sequence_greater_than(sequence, self.latest) {
            let diff = sequence.wrapping_sub(self.latest);
            self.bitfield = match (self.latest, diff) {
                (0, _) => 0,
                (_, d) if d <= 32 => self.bitfield.checked_shl(d).unwrap_or(0) | (1 << (d - 1)),
                _ => 0,
            };
            self.latest = sequence;
        } else {
            let diff = self.latest.wrapping_sub(sequence);
            if diff > 0 && diff <= 32 {
                self.bitfield |= 1 << (diff - 1);
            }
        }

        true
    }

    pub fn ack_data(&self) -> (u32, u32) {
        (self.latest, self.bitfield)
    }
}
