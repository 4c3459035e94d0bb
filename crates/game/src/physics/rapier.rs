use std::collections::HashMap;

use glam::{Quat, Vec3};
use rapier3d::control::{CharacterAutostep, CharacterLength, KinematicCharacterController};
use rapier3d::prelude::*;

use super::{BodyDesc, BodyHandle, BodyKind, BodyShape, PhysicsSpace};

struct BodyEntry {
    rigid_body: RigidBodyHandle,
    kind: BodyKind,
    walk_direction: Vec3,
}

pub struct RapierSpace {
    pipeline: PhysicsPipeline,
    integration_parameters: IntegrationParameters,
    islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    gravity: Vector,
    character_controller: KinematicCharacterController,
    entries: HashMap<BodyHandle, BodyEntry>,
    next_handle: u32,
}

impl RapierSpace {
    pub fn new(dt: f32) -> Self {
        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.dt = dt;
        integration_parameters.min_ccd_dt = dt / 100.0;

        let mut character_controller = KinematicCharacterController::default();
        character_controller.offset = CharacterLength::Absolute(0.02);
        character_controller.up = Vector::Y;
        character_controller.max_slope_climb_angle = 50_f32.to_radians();
        character_controller.min_slope_slide_angle = 35_f32.to_radians();
        character_controller.snap_to_ground = Some(CharacterLength::Absolute(0.2));
        character_controller.autostep = Some(CharacterAutostep {
            max_height: CharacterLength::Absolute(0.35),
            min_width: CharacterLength::Absolute(0.15),
            include_dynamic_bodies: false,
        });

        Self {
            pipeline: PhysicsPipeline::new(),
            integration_parameters,
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            gravity: Vector::new(0.0, -9.81, 0.0),
            character_controller,
            entries: HashMap::new(),
            next_handle: 0,
        }
    }

    pub fn with_gravity(mut self, gravity: Vec3) -> Self {
        self.gravity = Vector::new(gravity.x, gravity.y, gravity.z);
        self
    }

    fn rigid_body(&self, handle: BodyHandle) -> Option<&RigidBody> {
        let entry = self.entries.get(&handle)?;
        self.bodies.get(entry.rigid_body)
    }

    fn rigid_body_mut(&mut self, handle: BodyHandle) -> Option<&mut RigidBody> {
        let entry = self.entries.get(&handle)?;
        self.bodies.get_mut(entry.rigid_body)
    }

    fn issue_handle(&mut self, rigid_body: RigidBodyHandle, kind: BodyKind) -> BodyHandle {
        let handle = BodyHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        self.entries.insert(
            handle,
            BodyEntry {
                rigid_body,
                kind,
                walk_direction: Vec3::ZERO,
            },
        );
        handle
    }

    fn build_collider(shape: &BodyShape, mass: f32) -> Collider {
        let builder = match *shape {
            BodyShape::Cuboid { half_extents } => {
                ColliderBuilder::cuboid(half_extents[0], half_extents[1], half_extents[2])
            }
            BodyShape::Ball { radius } => ColliderBuilder::ball(radius),
            BodyShape::Cylinder { radius, height } => ColliderBuilder::cylinder(height / 2.0, radius),
        };

        if mass > 0.0 {
            builder.mass(mass).friction(0.5).restitution(0.3).build()
        } else {
            builder.friction(0.0).build()
        }
    }

    /// Collision-aware translation for one step of a character's walk.
    fn character_motion(&self, rigid_body: RigidBodyHandle, walk: Vec3) -> Option<Vector> {
        let body = self.bodies.get(rigid_body)?;
        let collider = self.colliders.get(*body.colliders().first()?)?;
        let dt = self.integration_parameters.dt;

        let desired = Vector::new(walk.x * dt, self.gravity.y.min(0.0) * dt, walk.z * dt);
        let filter = QueryFilter::default().exclude_rigid_body(rigid_body);
        let query_pipeline = self.broad_phase.as_query_pipeline(
            self.narrow_phase.query_dispatcher(),
            &self.bodies,
            &self.colliders,
            filter,
        );

        let movement = self.character_controller.move_shape(
            dt,
            &query_pipeline,
            collider.shape(),
            body.position(),
            desired,
            |_collision| {},
        );

        Some(movement.translation)
    }
}

impl PhysicsSpace for RapierSpace {
    fn add_body(&mut self, desc: &BodyDesc, position: Vec3, rotation: Quat) -> BodyHandle {
        let translation = Vector::new(position.x, position.y, position.z);
        let body = match desc.kind {
            BodyKind::Character => RigidBodyBuilder::kinematic_position_based()
                .translation(translation)
                .lock_rotations()
                .build(),
            BodyKind::Vehicle => RigidBodyBuilder::dynamic()
                .translation(translation)
                .enabled_rotations(false, true, false)
                .ccd_enabled(true)
                .build(),
            BodyKind::Rigid => RigidBodyBuilder::dynamic()
                .translation(translation)
                .ccd_enabled(true)
                .build(),
            BodyKind::Static => RigidBodyBuilder::fixed().translation(translation).build(),
        };

        let rigid_body = self.bodies.insert(body);
        let mass = match desc.kind {
            BodyKind::Vehicle | BodyKind::Rigid => desc.mass.max(0.1),
            BodyKind::Character | BodyKind::Static => 0.0,
        };
        let collider = Self::build_collider(&desc.shape, mass);
        self.colliders
            .insert_with_parent(collider, rigid_body, &mut self.bodies);

        let handle = self.issue_handle(rigid_body, desc.kind);
        self.set_rotation(handle, rotation);
        handle
    }

    fn remove_body(&mut self, handle: BodyHandle) -> bool {
        let Some(entry) = self.entries.remove(&handle) else {
            return false;
        };
        self.bodies.remove(
            entry.rigid_body,
            &mut self.islands,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );
        true
    }

    fn contains(&self, handle: BodyHandle) -> bool {
        self.entries.contains_key(&handle)
    }

    fn position(&self, handle: BodyHandle) -> Option<Vec3> {
        self.rigid_body(handle).map(|b| {
            let t = b.translation();
            Vec3::new(t.x, t.y, t.z)
        })
    }

    fn set_position(&mut self, handle: BodyHandle, position: Vec3) {
        if let Some(body) = self.rigid_body_mut(handle) {
            let current_rot = *body.rotation();
            let new_pose =
                Pose::from_parts(Vector::new(position.x, position.y, position.z), current_rot);
            body.set_position(new_pose, true);
        }
    }

    fn rotation(&self, handle: BodyHandle) -> Option<Quat> {
        self.rigid_body(handle).map(|b| {
            let r = b.rotation();
            Quat::from_xyzw(r.x, r.y, r.z, r.w)
        })
    }

    fn set_rotation(&mut self, handle: BodyHandle, rotation: Quat) {
        if let Some(body) = self.rigid_body_mut(handle) {
            let (x, y, z) = {
                let t = body.translation();
                (t.x, t.y, t.z)
            };
            let rot =
                Rotation::from_xyzw(rotation.x, rotation.y, rotation.z, rotation.w).normalize();
            body.set_position(Pose::from_parts(Vector::new(x, y, z), rot), true);
        }
    }

    fn linear_velocity(&self, handle: BodyHandle) -> Option<Vec3> {
        self.rigid_body(handle).map(|b| {
            let v = b.linvel();
            Vec3::new(v.x, v.y, v.z)
        })
    }

    fn set_linear_velocity(&mut self, handle: BodyHandle, velocity: Vec3) {
        if let Some(body) = self.rigid_body_mut(handle) {
            body.set_linvel(Vector::new(velocity.x, velocity.y, velocity.z), true);
        }
    }

    fn angular_velocity(&self, handle: BodyHandle) -> Option<Vec3> {
        self.rigid_body(handle).map(|b| {
            let w = b.angvel();
            Vec3::new(w.x, w.y, w.z)
        })
    }

    fn set_angular_velocity(&mut self, handle: BodyHandle, velocity: Vec3) {
        if let Some(body) = self.rigid_body_mut(handle) {
            body.set_angvel(Vector::new(velocity.x, velocity.y, velocity.z), true);
        }
    }

    fn walk_direction(&self, handle: BodyHandle) -> Option<Vec3> {
        self.entries
            .get(&handle)
            .filter(|e| e.kind == BodyKind::Character)
            .map(|e| e.walk_direction)
    }

    fn set_walk_direction(&mut self, handle: BodyHandle, direction: Vec3) {
        if let Some(entry) = self.entries.get_mut(&handle) {
            if entry.kind == BodyKind::Character {
                entry.walk_direction = direction;
            }
        }
    }

    fn add_static_block(&mut self, position: Vec3, half_extents: Vec3) -> BodyHandle {
        let desc = BodyDesc {
            kind: BodyKind::Static,
            shape: BodyShape::Cuboid {
                half_extents: half_extents.to_array(),
            },
            mass: 0.0,
        };
        self.add_body(&desc, position, Quat::IDENTITY)
    }

    fn step(&mut self) {
        let moves: Vec<(RigidBodyHandle, Vector)> = self
            .entries
            .values()
            .filter(|e| e.kind == BodyKind::Character)
            .filter_map(|e| {
                self.character_motion(e.rigid_body, e.walk_direction)
                    .map(|t| (e.rigid_body, t))
            })
            .collect();

        for (rigid_body, translation) in moves {
            if let Some(body) = self.bodies.get_mut(rigid_body) {
                let (x, y, z) = {
                    let t = body.translation();
                    (t.x, t.y, t.z)
                };
                let rot = *body.rotation();
                let next = Vector::new(x + translation.x, y + translation.y, z + translation.z);
                body.set_next_kinematic_position(Pose::from_parts(next, rot));
            }
        }

        self.pipeline.step(
            self.gravity,
            &self.integration_parameters,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            &(),
            &(),
        );
    }

    fn body_count(&self) -> usize {
        self.entries.len()
    }
}
