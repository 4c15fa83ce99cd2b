//! Guard behaviour: the patrol / pursue / search state machine and the
//! recovery ladder applied when the planner fails.

use crate::client_manager::ConnectionId;
use crate::config::GuardConfig;
use crate::planner::PlanError;
use crate::world::GuardSpawn;
use rand::Rng;
use shared::{Action, GuardView, Position};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Patrolling,
    Pursuing,
    Searching,
}

/// What the controller learned about the chased player this think tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sighting {
    Visible(Position),
    Hidden,
}

/// Outcome of a failed plan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Recovery {
    /// Stuck for too long, moved back to the first waypoint.
    Teleported,
    /// Too many consecutive failures, heading for a jittered point
    /// towards the nearest waypoint.
    Escape(Position),
    /// Giving up on the current goal, heading for the next waypoint.
    NextWaypoint(Position),
    /// No patrol route to fall back on.
    Idle,
}

#[derive(Debug, Clone)]
pub struct Guard {
    pub id: String,
    pub position: Position,
    pub rotation: f32,
    pub state: GuardState,
    pub goal: Position,
    patrol_route: Vec<Position>,
    current_point: usize,
    /// Stack of fine actions, the next one to execute is last.
    pending: Vec<Action>,
    chasing: Option<ConnectionId>,
    failed_path_attempts: usize,
    last_successful_path: Instant,
}

impl Guard {
    pub fn new(
        id: impl Into<String>,
        position: Position,
        patrol_route: Vec<Position>,
        now: Instant,
    ) -> Self {
        let goal = patrol_route.first().copied().unwrap_or(position);
        Self {
            id: id.into(),
            position,
            rotation: 0.0,
            state: GuardState::Patrolling,
            goal,
            patrol_route,
            current_point: 0,
            pending: Vec::new(),
            chasing: None,
            failed_path_attempts: 0,
            last_successful_path: now,
        }
    }

    pub fn from_spawn(spawn: &GuardSpawn, now: Instant) -> Self {
        let mut guard = Self::new(
            spawn.id.clone(),
            Position::new(spawn.x, spawn.y),
            spawn.patrol_points.clone(),
            now,
        );
        guard.rotation = spawn.rotation;
        guard
    }

    pub fn view(&self) -> GuardView {
        GuardView {
            id: self.id.clone(),
            x: self.position.x,
            y: self.position.y,
            rotation: self.rotation,
            searching: self.state != GuardState::Pursuing,
        }
    }

    pub fn patrol_route(&self) -> &[Position] {
        &self.patrol_route
    }

    pub fn current_point(&self) -> usize {
        self.current_point
    }

    pub fn chasing(&self) -> Option<ConnectionId> {
        self.chasing
    }

    pub fn failed_path_attempts(&self) -> usize {
        self.failed_path_attempts
    }

    pub fn pending_actions(&self) -> usize {
        self.pending.len()
    }

    /// Removes the next fine action from the queue.
    pub fn next_action(&mut self) -> Option<Action> {
        self.pending.pop()
    }

    /// Queue empty, or chasing a target that keeps moving.
    pub fn needs_plan(&self) -> bool {
        self.pending.is_empty() || self.state == GuardState::Pursuing
    }

    pub fn goal_reached(&self, radius: f32) -> bool {
        self.position.distance_squared_to(&self.goal) < radius * radius
    }

    /// Drops the queued actions, leaving the guard standing where it is.
    pub fn halt(&mut self) {
        self.pending.clear();
    }

    /// Starts chasing `target`, dropping whatever the guard was doing.
    pub fn begin_pursuit(&mut self, target: ConnectionId, at: Position) {
        self.state = GuardState::Pursuing;
        self.chasing = Some(target);
        self.goal = at;
        self.pending.clear();
    }

    /// Drops the chase target and heads for the waypoint at the current index.
    pub fn resume_patrol(&mut self) {
        self.chasing = None;
        self.state = GuardState::Patrolling;
        if let Some(point) = self.patrol_route.get(self.current_point) {
            self.goal = *point;
        }
    }

    /// Back to the start of the route, as after catching a player.
    pub fn reset_patrol(&mut self) {
        self.current_point = 0;
        self.pending.clear();
        self.resume_patrol();
    }

    /// Runs the state machine transitions and picks this tick's goal.
    ///
    /// `sighting` is `None` when the guard has no chase target.
    pub fn update_goal(&mut self, sighting: Option<Sighting>, goal_radius: f32) {
        match sighting {
            Some(Sighting::Visible(at)) if self.chasing.is_some() => {
                self.state = GuardState::Pursuing;
                self.goal = at;
            }
            Some(Sighting::Hidden) if self.chasing.is_some() => {
                self.state = GuardState::Searching;
                if self.goal_reached(goal_radius) {
                    self.resume_patrol();
                }
            }
            _ => {
                if self.chasing.is_some() {
                    self.resume_patrol();
                }
                self.state = GuardState::Patrolling;
                if self.goal_reached(goal_radius) && !self.patrol_route.is_empty() {
                    self.current_point = (self.current_point + 1) % self.patrol_route.len();
                    self.goal = self.patrol_route[self.current_point];
                }
            }
        }
    }

    /// Installs a planner result, running the recovery ladder on failure.
    pub fn apply_plan<R: Rng + ?Sized>(
        &mut self,
        outcome: Result<Vec<Action>, PlanError>,
        now: Instant,
        config: &GuardConfig,
        rng: &mut R,
    ) -> Option<Recovery> {
        match outcome {
            Ok(actions) => {
                self.failed_path_attempts = 0;
                self.last_successful_path = now;
                self.pending = actions.into_iter().rev().collect();
                None
            }
            Err(_) => {
                self.pending.clear();
                Some(self.recover(now, config, rng))
            }
        }
    }

    fn recover<R: Rng + ?Sized>(
        &mut self,
        now: Instant,
        config: &GuardConfig,
        rng: &mut R,
    ) -> Recovery {
        self.failed_path_attempts += 1;
        if self.patrol_route.is_empty() {
            return Recovery::Idle;
        }

        if now.saturating_duration_since(self.last_successful_path) > config.teleport_after {
            self.current_point = 0;
            self.goal = self.patrol_route[0];
            self.position = self.patrol_route[0];
            Recovery::Teleported
        } else if self.failed_path_attempts > self.patrol_route.len() + config.escape_failure_slack
        {
            self.current_point = self.closest_patrol_point();
            let delta = self
                .position
                .displacement_to(&self.patrol_route[self.current_point]);
            self.goal = Position::new(
                jittered(rng, self.position.x, delta.dx),
                jittered(rng, self.position.y, delta.dy),
            );
            Recovery::Escape(self.goal)
        } else {
            self.chasing = None;
            self.state = GuardState::Patrolling;
            self.current_point = (self.current_point + 1) % self.patrol_route.len();
            self.goal = self.patrol_route[self.current_point];
            Recovery::NextWaypoint(self.goal)
        }
    }

    /// Index of the waypoint nearest to the guard; first one wins ties.
    pub fn closest_patrol_point(&self) -> usize {
        let mut closest = 0;
        let mut best = f32::INFINITY;
        for (index, point) in self.patrol_route.iter().enumerate() {
            let distance = self.position.distance_to(point);
            if distance < best {
                best = distance;
                closest = index;
            }
        }
        closest
    }
}

/// A random fraction of `delta` from `origin`, plus up to an eighth of
/// `delta` either way.
fn jittered<R: Rng + ?Sized>(rng: &mut R, origin: f32, delta: f32) -> f32 {
    origin + rng.gen::<f32>() * delta + (rng.gen::<f32>() * delta / 4.0 - delta / 8.0)
}
