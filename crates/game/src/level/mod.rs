mod loader;

use glam::{Quat, Vec2, Vec3};
use serde::{Deserialize, Serialize};

pub use loader::{LevelLoader, LoadError, LoadStage, LoadedLevel, LoaderEvent};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelBlock {
    pub position: [f32; 3],
    pub half_extents: [f32; 3],
}

impl LevelBlock {
    pub fn ground(y: f32, half_size: f32) -> Self {
        Self {
            position: [0.0, y - 0.1, 0.0],
            half_extents: [half_size, 0.1, half_size],
        }
    }

    pub fn static_box(position: Vec3, half_extents: Vec3) -> Self {
        Self {
            position: position.to_array(),
            half_extents: half_extents.to_array(),
        }
    }

    pub fn top(&self) -> f32 {
        self.position[1] + self.half_extents[1]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelProp {
    pub model: String,
    pub position: [f32; 3],
    #[serde(default = "identity_rotation")]
    pub rotation: [f32; 4],
}

fn identity_rotation() -> [f32; 4] {
    Quat::IDENTITY.to_array()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelData {
    #[serde(default)]
    pub blocks: Vec<LevelBlock>,
    #[serde(default)]
    pub spawn_points: Vec<[f32; 3]>,
    #[serde(default)]
    pub props: Vec<LevelProp>,
}

impl LevelData {
    pub fn arena() -> Self {
        let mut blocks = vec![LevelBlock::ground(0.0, 50.0)];

        for (x, half) in [(5.0, 0.25), (8.0, 0.5), (11.0, 1.0), (14.0, 1.5)] {
            blocks.push(LevelBlock::static_box(
                Vec3::new(x, half, 0.0),
                Vec3::new(1.0, half, 1.0),
            ));
        }

        let stair_start = Vec3::new(-5.0, 0.0, 5.0);
        for i in 0..8 {
            let y = 0.3 * (i as f32 + 0.5);
            let z = stair_start.z + 0.4 * i as f32;
            blocks.push(LevelBlock::static_box(
                Vec3::new(stair_start.x, y, z),
                Vec3::new(2.0, 0.15, 0.2),
            ));
        }

        let spawn_points = vec![
            [0.0, 1.0, -10.0],
            [10.0, 1.0, -10.0],
            [-10.0, 1.0, -10.0],
            [0.0, 1.0, -20.0],
        ];

        let props = vec![
            LevelProp {
                model: "house.model".to_string(),
                position: [-20.0, 0.0, 20.0],
                rotation: identity_rotation(),
            },
            LevelProp {
                model: "crate.model".to_string(),
                position: [3.0, 1.0, 3.0],
                rotation: identity_rotation(),
            },
            LevelProp {
                model: "crate.model".to_string(),
                position: [4.0, 1.0, 3.0],
                rotation: identity_rotation(),
            },
            LevelProp {
                model: "buggy.model".to_string(),
                position: [0.0, 1.0, 15.0],
                rotation: identity_rotation(),
            },
        ];

        Self {
            blocks,
            spawn_points,
            props,
        }
    }

    pub fn spawn_point(&self, index: usize) -> Vec3 {
        if self.spawn_points.is_empty() {
            return Vec3::new(0.0, 1.0, 0.0);
        }
        Vec3::from_array(self.spawn_points[index % self.spawn_points.len()])
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct NavRegion {
    min: Vec2,
    max: Vec2,
    height: f32,
}

impl NavRegion {
    fn area(&self) -> f32 {
        let size = self.max - self.min;
        size.x * size.y
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NavMesh {
    regions: Vec<NavRegion>,
    total_area: f32,
}

impl NavMesh {
    const MIN_REGION_AREA: f32 = 0.25;
    const EDGE_MARGIN: f32 = 0.5;

    pub fn build(level: &LevelData) -> Self {
        let regions: Vec<NavRegion> = level
            .blocks
            .iter()
            .filter_map(|block| {
                let center = Vec2::new(block.position[0], block.position[2]);
                let half = Vec2::new(block.half_extents[0], block.half_extents[2]);
                let margin = Vec2::splat(Self::EDGE_MARGIN).min(half * 0.5);
                let region = NavRegion {
                    min: center - half + margin,
                    max: center + half - margin,
                    height: block.top(),
                };
                (region.area() >= Self::MIN_REGION_AREA).then_some(region)
            })
            .collect();

        let total_area = regions.iter().map(NavRegion::area).sum();
        Self {
            regions,
            total_area,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Area-weighted random point on a walkable surface.
    pub fn random_point(&self, rng: &mut fastrand::Rng) -> Option<Vec3> {
        if self.is_empty() || self.total_area <= 0.0 {
            return None;
        }

        let mut pick = rng.f32() * self.total_area;
        let region = self
            .regions
            .iter()
            .find(|r| {
                pick -= r.area();
                pick <= 0.0
            })
            .or_else(|| self.regions.last())?;

        let x = region.min.x + rng.f32() * (region.max.x - region.min.x);
        let z = region.min.y + rng.f32() * (region.max.y - region.min.y);
        Some(Vec3::new(x, region.height, z))
    }

    /// Height of the highest walkable surface under `point`, if any.
    pub fn height_at(&self, point: Vec3) -> Option<f32> {
        let flat = Vec2::new(point.x, point.z);
        self.regions
            .iter()
            .filter(|r| flat.cmpge(r.min).all() && flat.cmple(r.max).all())
            .map(|r| r.height)
            .reduce(f32::max)
    }
}
