use glam::{Quat, Vec3};

use super::ControlInput;
use crate::config::WorldConfig;
use crate::physics::{BodyHandle, BodyKind, PhysicsSpace};

/// Drives one body from a [`ControlInput`].
pub trait Motor: Send {
    fn on_attach(&mut self, physics: &mut dyn PhysicsSpace, body: BodyHandle);
    fn on_detach(&mut self, physics: &mut dyn PhysicsSpace, body: BodyHandle);
    fn on_tick(
        &mut self,
        physics: &mut dyn PhysicsSpace,
        body: BodyHandle,
        input: &ControlInput,
        dt: f32,
    );
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorTuning {
    pub character_speed: f32,
    pub vehicle_speed: f32,
    pub vehicle_turn_rate: f32,
}

impl From<&WorldConfig> for MotorTuning {
    fn from(config: &WorldConfig) -> Self {
        Self {
            character_speed: config.character_speed,
            vehicle_speed: config.vehicle_speed,
            vehicle_turn_rate: config.vehicle_turn_rate,
        }
    }
}

/// The motor for a body kind; `None` for kinds nothing can drive.
pub fn motor_for(kind: BodyKind, tuning: &MotorTuning) -> Option<Box<dyn Motor>> {
    match kind {
        BodyKind::Character => Some(Box::new(CharacterMotor {
            speed: tuning.character_speed,
        })),
        BodyKind::Vehicle => Some(Box::new(VehicleMotor {
            max_speed: tuning.vehicle_speed,
            turn_rate: tuning.vehicle_turn_rate,
        })),
        BodyKind::Static | BodyKind::Rigid => None,
    }
}

pub struct CharacterMotor {
    speed: f32,
}

impl Motor for CharacterMotor {
    fn on_attach(&mut self, physics: &mut dyn PhysicsSpace, body: BodyHandle) {
        physics.set_walk_direction(body, Vec3::ZERO);
    }

    fn on_detach(&mut self, physics: &mut dyn PhysicsSpace, body: BodyHandle) {
        physics.set_walk_direction(body, Vec3::ZERO);
    }

    fn on_tick(
        &mut self,
        physics: &mut dyn PhysicsSpace,
        body: BodyHandle,
        input: &ControlInput,
        _dt: f32,
    ) {
        let walk = Vec3::new(input.movement.x, 0.0, input.movement.z).clamp_length_max(1.0);
        physics.set_walk_direction(body, walk * self.speed);

        let facing = Vec3::new(input.look.x, 0.0, input.look.z);
        if facing.length_squared() > 1e-6 {
            let yaw = facing.x.atan2(facing.z);
            physics.set_rotation(body, Quat::from_rotation_y(yaw));
        }
    }
}

/// `movement.z` is throttle, `movement.x` steering.
pub struct VehicleMotor {
    max_speed: f32,
    turn_rate: f32,
}

impl Motor for VehicleMotor {
    fn on_attach(&mut self, physics: &mut dyn PhysicsSpace, body: BodyHandle) {
        physics.set_angular_velocity(body, Vec3::ZERO);
    }

    fn on_detach(&mut self, physics: &mut dyn PhysicsSpace, body: BodyHandle) {
        // Coasts on, but stops turning.
        physics.set_angular_velocity(body, Vec3::ZERO);
    }

    fn on_tick(
        &mut self,
        physics: &mut dyn PhysicsSpace,
        body: BodyHandle,
        input: &ControlInput,
        _dt: f32,
    ) {
        let Some(rotation) = physics.rotation(body) else {
            return;
        };
        let forward = rotation * Vec3::Z;
        let heading = Vec3::new(forward.x, 0.0, forward.z).normalize_or_zero();

        let throttle = input.movement.z.clamp(-1.0, 1.0);
        let steer = input.movement.x.clamp(-1.0, 1.0);

        let vertical = physics.linear_velocity(body).map_or(0.0, |v| v.y);
        let planar = heading * throttle * self.max_speed;
        physics.set_linear_velocity(body, Vec3::new(planar.x, vertical, planar.z));
        physics.set_angular_velocity(body, Vec3::new(0.0, -steer * self.turn_rate, 0.0));
    }
}
