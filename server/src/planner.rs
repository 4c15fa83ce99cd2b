//! Bounded A* search over the continuous plane.
//!
//! The search expands coarse steps of `speed * granularity` units, stores its
//! nodes in an arena indexed by position, and gives up after a fixed depth or
//! wall-clock budget. A successful plan is returned as fine per-tick actions
//! in execution order.

use crate::config::{Heuristic, PlannerConfig};
use crate::world::WorldModel;
use shared::{Action, Position};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("no path found")]
    NoPathFound,
    #[error("depth limit reached")]
    DepthLimitExceeded,
    #[error("time limit reached")]
    TimeLimitExceeded,
}

/// Node of the search tree. Parents are arena indices.
#[derive(Debug, Clone)]
struct SearchNode {
    state: Position,
    parent: Option<usize>,
    /// Coarse action that produced this node from its parent.
    action: Action,
    depth: usize,
    cost: f32,
    estimate: f32,
}

#[derive(Debug, Clone, Copy)]
struct FrontierEntry {
    priority: f32,
    sequence: u64,
    node: usize,
}

impl PartialEq for FrontierEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FrontierEntry {}

impl Ord for FrontierEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap, earlier insertion wins ties
        other
            .priority
            .total_cmp(&self.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for FrontierEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-priority queue of node indices, FIFO among equal priorities.
#[derive(Debug, Default)]
pub struct Frontier {
    heap: BinaryHeap<FrontierEntry>,
    pushed: u64,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, priority: f32, node: usize) {
        self.heap.push(FrontierEntry {
            priority,
            sequence: self.pushed,
            node,
        });
        self.pushed += 1;
    }

    pub fn pop(&mut self) -> Option<usize> {
        self.heap.pop().map(|entry| entry.node)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum StateKey {
    Cell(i64, i64),
    Exact(u32, u32),
}

#[derive(Debug, Clone, Default)]
pub struct PathPlanner {
    config: PlannerConfig,
}

impl PathPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Radius inside which a goal counts as reached.
    pub fn goal_radius(&self) -> f32 {
        self.config.step_length()
    }

    /// Strict test: a distance exactly equal to the radius is not reached.
    pub fn goal_reached(&self, at: &Position, goal: &Position) -> bool {
        let radius = self.goal_radius();
        at.distance_squared_to(goal) < radius * radius
    }

    pub fn heuristic(&self, from: &Position, goal: &Position) -> f32 {
        match self.config.heuristic {
            Heuristic::Euclidean => from.distance_to(goal),
            Heuristic::Manhattan => from.manhattan_distance_to(goal),
        }
    }

    fn state_key(&self, state: &Position) -> StateKey {
        let cell = self.config.dedup_cell;
        if cell > 0.0 {
            StateKey::Cell(
                (state.x / cell).floor() as i64,
                (state.y / cell).floor() as i64,
            )
        } else {
            StateKey::Exact(state.x.to_bits(), state.y.to_bits())
        }
    }

    /// Plans fine-grained actions carrying an agent from `start` to within
    /// the goal radius of `goal`.
    pub fn plan(
        &self,
        world: &WorldModel,
        start: Position,
        goal: Position,
    ) -> Result<Vec<Action>, PlanError> {
        let started = Instant::now();
        let step_cost = self.config.step_length();

        let mut arena = vec![SearchNode {
            state: start,
            parent: None,
            action: Action::default(),
            depth: 0,
            cost: 0.0,
            estimate: self.heuristic(&start, &goal),
        }];
        let mut visited: HashSet<StateKey> = HashSet::new();
        let mut frontier = Frontier::new();
        frontier.push(arena[0].estimate, 0);

        while let Some(index) = frontier.pop() {
            let (state, depth, cost) = {
                let node = &arena[index];
                (node.state, node.depth, node.cost)
            };

            if !visited.insert(self.state_key(&state)) {
                continue;
            }
            if depth > self.config.max_depth {
                return Err(PlanError::DepthLimitExceeded);
            }
            if started.elapsed() > self.config.time_limit {
                return Err(PlanError::TimeLimitExceeded);
            }
            if self.goal_reached(&state, &goal) {
                return Ok(self.expand_path(&arena, index));
            }

            for action in world.actions(&state, &self.config) {
                let next = state.apply(action);
                if visited.contains(&self.state_key(&next)) {
                    continue;
                }
                let node = SearchNode {
                    state: next,
                    parent: Some(index),
                    action,
                    depth: depth + 1,
                    cost: cost + step_cost,
                    estimate: self.heuristic(&next, &goal),
                };
                frontier.push(node.cost + node.estimate, arena.len());
                arena.push(node);
            }
        }

        Err(PlanError::NoPathFound)
    }

    /// Walks parent links back to the root and subdivides every coarse
    /// action into `granularity` equal fine actions.
    fn expand_path(&self, arena: &[SearchNode], goal: usize) -> Vec<Action> {
        let granularity = self.config.granularity;
        let mut coarse = Vec::new();
        let mut cursor = goal;
        while let Some(parent) = arena[cursor].parent {
            coarse.push(arena[cursor].action);
            cursor = parent;
        }
        coarse.reverse();

        coarse
            .iter()
            .flat_map(|action| {
                std::iter::repeat(action.scale(1.0 / granularity as f32)).take(granularity)
            })
            .collect()
    }
}
