//! Who drives an entity, and how.
//!
//! Every entity carries a [`Controller`] holding exactly one
//! [`ControlAssignment`]. Assignments change only through the world's
//! `enter_entity`, which detaches the old driver completely before attaching
//! the new one.

mod motor;
mod policy;

use std::fmt;

use glam::Vec3;

pub use motor::{CharacterMotor, Motor, MotorTuning, VehicleMotor, motor_for};
pub use policy::{AutonomousPolicy, IdlePolicy, PolicyContext, WanderPolicy, policy_for};

use crate::level::NavMesh;
use crate::physics::{BodyHandle, BodyKind, PhysicsSpace};
use crate::types::{Peer, Role};

/// Movement intent for one tick. `movement` is in world space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControlInput {
    pub movement: Vec3,
    pub look: Vec3,
}

impl ControlInput {
    pub fn from_wire(movement: [f32; 3], look: [f32; 3]) -> Self {
        let sanitize = |v: Vec3| if v.is_finite() { v } else { Vec3::ZERO };
        Self {
            movement: sanitize(Vec3::from_array(movement)).clamp_length_max(1.0),
            look: sanitize(Vec3::from_array(look)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlAssignment {
    #[default]
    Unassigned,
    ManualLocal,
    ManualRemote(Peer),
    AutonomousLocal,
    /// An autonomous policy running elsewhere; only samples arrive here.
    AutonomousRemote(Peer),
}

impl ControlAssignment {
    /// `owner` is where the controlling player lives; on a client every
    /// remote driver is reached through the server.
    pub fn choose(role: Role, is_human: bool, is_local: bool, owner: Peer) -> Self {
        let remote = match role {
            Role::Server => owner,
            Role::Client => Peer::Server,
        };
        match (is_human, is_local) {
            (true, true) => Self::ManualLocal,
            (true, false) => Self::ManualRemote(remote),
            (false, true) => Self::AutonomousLocal,
            (false, false) => Self::AutonomousRemote(remote),
        }
    }

    pub fn runs_motor(&self) -> bool {
        matches!(
            self,
            Self::ManualLocal | Self::AutonomousLocal | Self::ManualRemote(Peer::Client(_))
        )
    }

    pub fn is_assigned(&self) -> bool {
        !matches!(self, Self::Unassigned)
    }
}

#[derive(Default)]
pub struct Controller {
    assignment: ControlAssignment,
    motor: Option<Box<dyn Motor>>,
    policy: Option<Box<dyn AutonomousPolicy>>,
    input: ControlInput,
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("assignment", &self.assignment)
            .field("motor", &self.motor.is_some())
            .field("policy", &self.policy.is_some())
            .field("input", &self.input)
            .finish()
    }
}

impl Controller {
    pub fn assignment(&self) -> ControlAssignment {
        self.assignment
    }

    pub fn input(&self) -> ControlInput {
        self.input
    }

    pub fn set_input(&mut self, input: ControlInput) {
        self.input = input;
    }

    pub fn has_motor(&self) -> bool {
        self.motor.is_some()
    }

    /// Detaches the previous driver first. Returns whether the assignment changed.
    pub fn attach(
        &mut self,
        assignment: ControlAssignment,
        kind: BodyKind,
        physics: &mut dyn PhysicsSpace,
        body: BodyHandle,
        tuning: &MotorTuning,
        policy: Option<Box<dyn AutonomousPolicy>>,
    ) -> bool {
        if assignment == self.assignment {
            return false;
        }
        if assignment.is_assigned() && !kind.is_controllable() {
            log::warn!("Cannot control a {:?} body, ignoring {:?}", kind, assignment);
            return false;
        }

        self.detach(physics, body);
        if !assignment.is_assigned() {
            return true;
        }

        if assignment.runs_motor() {
            self.motor = motor_for(kind, tuning);
            if let Some(motor) = self.motor.as_mut() {
                motor.on_attach(physics, body);
            }
        }
        if assignment == ControlAssignment::AutonomousLocal {
            self.policy = policy;
        }
        self.assignment = assignment;
        true
    }

    pub fn detach(&mut self, physics: &mut dyn PhysicsSpace, body: BodyHandle) {
        if let Some(mut motor) = self.motor.take() {
            motor.on_detach(physics, body);
        }
        self.policy = None;
        self.input = ControlInput::default();
        self.assignment = ControlAssignment::Unassigned;
    }

    pub fn tick(
        &mut self,
        physics: &mut dyn PhysicsSpace,
        body: BodyHandle,
        dt: f32,
        navmesh: Option<&NavMesh>,
    ) {
        if let Some(policy) = self.policy.as_mut() {
            let (Some(position), Some(rotation)) = (physics.position(body), physics.rotation(body))
            else {
                return;
            };
            self.input = policy.decide(&PolicyContext {
                position,
                rotation,
                dt,
                navmesh,
            });
        }

        if let Some(motor) = self.motor.as_mut() {
            motor.on_tick(physics, body, &self.input, dt);
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Quat;

    use super::*;
    use crate::config::WorldConfig;
    use crate::physics::{BodyDesc, BodyShape, RapierSpace};

    fn setup(kind: BodyKind) -> (RapierSpace, BodyHandle) {
        let mut physics = RapierSpace::new(1.0 / 60.0).with_gravity(Vec3::ZERO);
        let desc = BodyDesc {
            kind,
            shape: BodyShape::default(),
            mass: 1.0,
        };
        let body = physics.add_body(&desc, Vec3::ZERO, Quat::IDENTITY);
        (physics, body)
    }

    fn tuning() -> MotorTuning {
        MotorTuning::from(&WorldConfig::default())
    }

    #[test]
    fn driver_choice_by_role() {
        let client = Peer::Client(4);
        assert_eq!(
            ControlAssignment::choose(Role::Server, true, false, client),
            ControlAssignment::ManualRemote(client)
        );
        assert_eq!(
            ControlAssignment::choose(Role::Server, false, true, Peer::Server),
            ControlAssignment::AutonomousLocal
        );
        assert_eq!(
            ControlAssignment::choose(Role::Client, true, true, Peer::Server),
            ControlAssignment::ManualLocal
        );
        assert_eq!(
            ControlAssignment::choose(Role::Client, false, false, client),
            ControlAssignment::AutonomousRemote(Peer::Server)
        );
    }

    #[test]
    fn motors_only_where_driven() {
        assert!(ControlAssignment::ManualRemote(Peer::Client(1)).runs_motor());
        assert!(!ControlAssignment::ManualRemote(Peer::Server).runs_motor());
        assert!(!ControlAssignment::AutonomousRemote(Peer::Server).runs_motor());
        assert!(ControlAssignment::AutonomousLocal.runs_motor());
    }

    #[test]
    fn attach_detach_cycle() {
        let (mut physics, body) = setup(BodyKind::Character);
        let mut controller = Controller::default();

        assert!(controller.attach(
            ControlAssignment::ManualLocal,
            BodyKind::Character,
            &mut physics,
            body,
            &tuning(),
            None,
        ));
        assert!(controller.has_motor());

        // Same assignment again is a no-op.
        assert!(!controller.attach(
            ControlAssignment::ManualLocal,
            BodyKind::Character,
            &mut physics,
            body,
            &tuning(),
            None,
        ));

        controller.set_input(ControlInput {
            movement: Vec3::Z,
            look: Vec3::Z,
        });
        controller.tick(&mut physics, body, 1.0 / 60.0, None);
        assert!(physics.walk_direction(body).unwrap().z > 0.0);

        // Switching drivers leaves nothing of the old one behind.
        assert!(controller.attach(
            ControlAssignment::AutonomousRemote(Peer::Server),
            BodyKind::Character,
            &mut physics,
            body,
            &tuning(),
            None,
        ));
        assert!(!controller.has_motor());
        assert_eq!(controller.input(), ControlInput::default());
        assert_eq!(physics.walk_direction(body), Some(Vec3::ZERO));
    }

    #[test]
    fn static_bodies_cannot_be_controlled() {
        let (mut physics, body) = setup(BodyKind::Static);
        let mut controller = Controller::default();

        assert!(!controller.attach(
            ControlAssignment::ManualLocal,
            BodyKind::Static,
            &mut physics,
            body,
            &tuning(),
            None,
        ));
        assert_eq!(controller.assignment(), ControlAssignment::Unassigned);
    }

    #[test]
    fn wire_input_is_sanitized() {
        let input = ControlInput::from_wire([f32::NAN, 0.0, 0.0], [0.0, 0.0, 1.0]);
        assert_eq!(input.movement, Vec3::ZERO);

        let input = ControlInput::from_wire([3.0, 0.0, 4.0], [0.0; 3]);
        assert!((input.movement.length() - 1.0).abs() < 1e-5);
    }
}
