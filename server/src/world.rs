//! Static world geometry and the map document it is loaded from.
//!
//! The [`WorldModel`] answers the three questions the guard AI asks about the
//! map: is a position free, which coarse moves are available from a position,
//! and can one position see another.

use crate::config::{PlannerConfig, Sight};
use log::warn;
use serde::Deserialize;
use shared::{Action, Item, Obstacle, Position, Rect};
use std::f32::consts::FRAC_1_SQRT_2;
use std::path::Path;
use thiserror::Error;

/// Smallest ray-march step accepted, keeps a misconfigured step from looping.
const MIN_SIGHT_STEP: f32 = 0.5;

#[derive(Debug, Error)]
pub enum WorldLoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Guard placement as authored in the map document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardSpawn {
    pub id: String,
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub rotation: f32,
    #[serde(default, alias = "PatrolPoints")]
    pub patrol_points: Vec<Position>,
}

/// The map document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapData {
    #[serde(default, alias = "Obstacles")]
    pub obstacles: Vec<Obstacle>,
    #[serde(default, alias = "Items")]
    pub items: Vec<Item>,
    #[serde(default, alias = "Guards")]
    pub guards: Vec<GuardSpawn>,
    /// Rectangles only guards avoid.
    #[serde(default, alias = "RestrictedAreas")]
    pub restricted_areas: Vec<Obstacle>,
}

impl MapData {
    pub fn from_json(json: &str) -> Result<Self, WorldLoadError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, WorldLoadError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub async fn load_async(path: &Path) -> Result<Self, WorldLoadError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_json(&content)
    }

    /// Loads the map, falling back to an empty world when it is unreadable.
    pub fn load_or_empty(path: &Path) -> Self {
        match Self::load(path) {
            Ok(map) => map,
            Err(e) => {
                warn!(
                    "Could not read world data from {}: {}, continuing with empty world",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }
}

/// Static collision geometry seen by guards.
#[derive(Debug, Clone, Default)]
pub struct WorldModel {
    obstacles: Vec<Rect>,
    restricted_areas: Vec<Rect>,
    clearance: f32,
}

impl WorldModel {
    pub fn new(obstacles: &[Obstacle], restricted_areas: &[Obstacle], clearance: f32) -> Self {
        Self {
            obstacles: obstacles.iter().map(Obstacle::rect).collect(),
            restricted_areas: restricted_areas.iter().map(Obstacle::rect).collect(),
            clearance,
        }
    }

    pub fn from_map(map: &MapData, clearance: f32) -> Self {
        Self::new(&map.obstacles, &map.restricted_areas, clearance)
    }

    pub fn obstacles(&self) -> &[Rect] {
        &self.obstacles
    }

    /// A guard-sized circle at `position` touches no obstacle or restricted area.
    pub fn is_valid(&self, position: &Position) -> bool {
        self.restricted_areas
            .iter()
            .chain(self.obstacles.iter())
            .all(|rect| !rect.overlaps_circle(position, self.clearance))
    }

    /// Coarse moves available from `state`.
    ///
    /// Each of the eight compass directions is offered only when every
    /// fine sub-step along it stays valid, so a coarse step can never hop
    /// over a wall thinner than itself.
    pub fn actions(&self, state: &Position, config: &PlannerConfig) -> Vec<Action> {
        let granularity = config.granularity;
        let mut actions = Vec::with_capacity(8);

        for x in -1i8..=1 {
            for y in -1i8..=1 {
                if x == 0 && y == 0 {
                    continue;
                }
                let mut unit = Action::new(f32::from(x) * config.speed, f32::from(y) * config.speed);
                if x != 0 && y != 0 {
                    unit = unit.scale(FRAC_1_SQRT_2);
                }

                let clear = (1..=granularity)
                    .all(|k| self.is_valid(&state.apply(unit.scale(k as f32))));
                if clear {
                    actions.push(unit.scale(granularity as f32));
                }
            }
        }

        actions
    }

    /// Coarse line-of-sight test between two positions.
    ///
    /// Samples the line through both points at fixed horizontal steps; any
    /// sample strictly inside an obstacle blocks sight. Near-vertical pairs
    /// have their sampled interval widened around the midpoint.
    pub fn can_see(&self, from: &Position, to: &Position, sight: &Sight) -> bool {
        let (left, right) = if from.x <= to.x { (from, to) } else { (to, from) };
        let (mut x1, y1, mut x2, y2) = (left.x, left.y, right.x, right.y);

        if x2 - x1 < sight.min_width {
            let mid = (x1 + x2) / 2.0;
            x1 = mid - sight.min_width / 2.0;
            x2 = mid + sight.min_width / 2.0;
        }

        let slope = (y2 - y1) / (x2 - x1);
        let intercept = y1 - slope * x1;
        let step = sight.step.max(MIN_SIGHT_STEP);

        let mut x = x1;
        while x <= x2 {
            let sample = Position::new(x, slope * x + intercept);
            if self.obstacles.iter().any(|rect| rect.contains(&sample)) {
                return false;
            }
            x += step;
        }

        true
    }
}
