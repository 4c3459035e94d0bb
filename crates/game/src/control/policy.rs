use glam::{Quat, Vec3};

use super::ControlInput;
use crate::level::NavMesh;
use crate::types::AiKind;

pub struct PolicyContext<'a> {
    pub position: Vec3,
    pub rotation: Quat,
    pub dt: f32,
    pub navmesh: Option<&'a NavMesh>,
}

/// Decides what an autonomously driven entity does this tick.
pub trait AutonomousPolicy: Send {
    fn decide(&mut self, ctx: &PolicyContext<'_>) -> ControlInput;
}

pub fn policy_for(kind: AiKind, seed: u64) -> Box<dyn AutonomousPolicy> {
    match kind {
        AiKind::Default | AiKind::Fighter => Box::new(WanderPolicy::new(seed)),
        AiKind::Worker => Box::new(IdlePolicy),
    }
}

pub struct IdlePolicy;

impl AutonomousPolicy for IdlePolicy {
    fn decide(&mut self, _ctx: &PolicyContext<'_>) -> ControlInput {
        ControlInput::default()
    }
}

/// Walks between random points, picked on the nav mesh when one is available.
pub struct WanderPolicy {
    rng: fastrand::Rng,
    target: Option<Vec3>,
    home: Option<Vec3>,
    time_on_target: f32,
}

impl WanderPolicy {
    const ARRIVE_RADIUS: f32 = 0.75;
    const ROAM_RADIUS: f32 = 10.0;
    const RETARGET_SECS: f32 = 15.0;

    pub fn new(seed: u64) -> Self {
        Self {
            rng: fastrand::Rng::with_seed(seed),
            target: None,
            home: None,
            time_on_target: 0.0,
        }
    }

    pub fn target(&self) -> Option<Vec3> {
        self.target
    }

    fn pick_target(&mut self, ctx: &PolicyContext<'_>) -> Vec3 {
        if let Some(point) = ctx.navmesh.and_then(|nav| nav.random_point(&mut self.rng)) {
            return point;
        }

        let home = *self.home.get_or_insert(ctx.position);
        let angle = self.rng.f32() * std::f32::consts::TAU;
        let distance = self.rng.f32() * Self::ROAM_RADIUS;
        home + Vec3::new(angle.sin(), 0.0, angle.cos()) * distance
    }
}

impl AutonomousPolicy for WanderPolicy {
    fn decide(&mut self, ctx: &PolicyContext<'_>) -> ControlInput {
        self.time_on_target += ctx.dt;

        let reached = self.target.is_some_and(|t| {
            let offset = t - ctx.position;
            Vec3::new(offset.x, 0.0, offset.z).length() < Self::ARRIVE_RADIUS
        });

        let target = match self.target {
            Some(t) if !reached && self.time_on_target < Self::RETARGET_SECS => t,
            _ => {
                let t = self.pick_target(ctx);
                self.target = Some(t);
                self.time_on_target = 0.0;
                t
            }
        };

        let offset = target - ctx.position;
        let direction = Vec3::new(offset.x, 0.0, offset.z).normalize_or_zero();
        ControlInput {
            movement: direction,
            look: direction,
        }
    }
}
