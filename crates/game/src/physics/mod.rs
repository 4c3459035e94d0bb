mod rapier;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

pub use rapier::RapierSpace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BodyHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyKind {
    Character,
    Vehicle,
    Static,
    Rigid,
}

impl BodyKind {
    pub fn is_controllable(self) -> bool {
        matches!(self, Self::Character | Self::Vehicle)
    }

    pub fn is_replicated(self) -> bool {
        !matches!(self, Self::Static)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BodyShape {
    Cuboid { half_extents: [f32; 3] },
    Ball { radius: f32 },
    Cylinder { radius: f32, height: f32 },
}

impl Default for BodyShape {
    fn default() -> Self {
        Self::Cuboid {
            half_extents: [0.5, 0.5, 0.5],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyDesc {
    pub kind: BodyKind,
    pub shape: BodyShape,
    pub mass: f32,
}

/// The physics engine as seen by the replication core.
///
/// Getters return `None` for handles the space does not know about; setters on
/// unknown handles are ignored.
pub trait PhysicsSpace: Send {
    fn add_body(&mut self, desc: &BodyDesc, position: Vec3, rotation: Quat) -> BodyHandle;
    fn remove_body(&mut self, handle: BodyHandle) -> bool;
    fn contains(&self, handle: BodyHandle) -> bool;

    fn position(&self, handle: BodyHandle) -> Option<Vec3>;
    fn set_position(&mut self, handle: BodyHandle, position: Vec3);
    fn rotation(&self, handle: BodyHandle) -> Option<Quat>;
    fn set_rotation(&mut self, handle: BodyHandle, rotation: Quat);
    fn linear_velocity(&self, handle: BodyHandle) -> Option<Vec3>;
    fn set_linear_velocity(&mut self, handle: BodyHandle, velocity: Vec3);
    fn angular_velocity(&self, handle: BodyHandle) -> Option<Vec3>;
    fn set_angular_velocity(&mut self, handle: BodyHandle, velocity: Vec3);
    /// Character bodies only: horizontal velocity applied every step.
    fn walk_direction(&self, handle: BodyHandle) -> Option<Vec3>;
    fn set_walk_direction(&mut self, handle: BodyHandle, direction: Vec3);

    fn add_static_block(&mut self, position: Vec3, half_extents: Vec3) -> BodyHandle;
    fn step(&mut self);
    fn body_count(&self) -> usize;
}
