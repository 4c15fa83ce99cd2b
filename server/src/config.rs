//! Runtime configuration for the hub, the guard controller and the planner.
//!
//! Every tunable that used to be a bare constant lives here with its default,
//! so the binary can override it from the command line and tests can shrink
//! timings.

use shared::{CATCH_RADIUS, COIN_RADIUS, GRANULARITY, GUARD_RADIUS, GUARD_SPEED, PLAYER_RADIUS};
use std::path::PathBuf;
use std::time::Duration;

/// Distance estimate used to order the planner frontier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Heuristic {
    Euclidean,
    Manhattan,
}

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Guard displacement per movement tick.
    pub speed: f32,
    /// Fine actions per coarse planner step.
    pub granularity: usize,
    /// Radius of the guard footprint used by validity checks.
    pub clearance: f32,
    pub max_depth: usize,
    pub time_limit: Duration,
    pub heuristic: Heuristic,
    /// Side of the square buckets used to detect revisited states.
    /// Zero or negative falls back to exact coordinate equality.
    pub dedup_cell: f32,
}

impl PlannerConfig {
    /// Length of one coarse step, also the "goal reached" radius.
    pub fn step_length(&self) -> f32 {
        self.speed * self.granularity as f32
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        let step = GUARD_SPEED * GRANULARITY as f32;
        Self {
            speed: GUARD_SPEED,
            granularity: GRANULARITY,
            clearance: GUARD_RADIUS,
            max_depth: 150,
            time_limit: Duration::from_secs(2),
            heuristic: Heuristic::Euclidean,
            dedup_cell: step / 4.0,
        }
    }
}

/// Parameters of the coarse line-of-sight ray march.
#[derive(Debug, Clone, Copy)]
pub struct Sight {
    /// Horizontal extent below which the sampled interval is widened.
    pub min_width: f32,
    /// Horizontal distance between samples.
    pub step: f32,
}

impl Default for Sight {
    fn default() -> Self {
        Self {
            min_width: 50.0,
            step: 5.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub sight: Sight,
    /// A guard that has not planned successfully for this long is teleported
    /// back to its first waypoint.
    pub teleport_after: Duration,
    /// Failures tolerated on top of the waypoint count before the guard
    /// tries a random escape goal.
    pub escape_failure_slack: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            sight: Sight::default(),
            teleport_after: Duration::from_secs(60),
            escape_failure_slack: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Map document, read at startup and on every item respawn.
    pub map_path: PathBuf,
    pub broadcast_interval: Duration,
    pub movement_interval: Duration,
    pub think_interval: Duration,
    pub respawn_interval: Duration,
    pub catch_radius: f32,
    pub player_radius: f32,
    pub coin_radius: f32,
    pub max_clients: usize,
    pub mailbox_capacity: usize,
    /// Per-client outbound queue length; messages beyond it are dropped.
    pub outbound_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            map_path: PathBuf::from("mapData.json"),
            broadcast_interval: Duration::from_millis(10),
            movement_interval: Duration::from_millis(20),
            think_interval: Duration::from_millis(200),
            respawn_interval: Duration::from_secs(120),
            catch_radius: CATCH_RADIUS,
            player_radius: PLAYER_RADIUS,
            coin_radius: COIN_RADIUS,
            max_clients: 64,
            mailbox_capacity: 1000,
            outbound_capacity: 256,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UsernameConfig {
    pub max_len: usize,
    /// Text moderation service queried as `GET <endpoint>?text=<name>`.
    /// `None` skips the check.
    pub moderation_endpoint: Option<String>,
}

impl Default for UsernameConfig {
    fn default() -> Self {
        Self {
            max_len: 15,
            moderation_endpoint: Some(
                "https://www.purgomalum.com/service/containsprofanity".to_string(),
            ),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub hub: HubConfig,
    pub guard: GuardConfig,
    pub planner: PlannerConfig,
    pub username: UsernameConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_step_matches_goal_radius() {
        let planner = PlannerConfig::default();
        assert_eq!(planner.step_length(), 24.0);
        assert_eq!(planner.dedup_cell, 6.0);
        assert_eq!(planner.max_depth, 150);
        assert_eq!(planner.time_limit, Duration::from_secs(2));
    }

    #[test]
    fn test_default_tick_periods() {
        let hub = HubConfig::default();
        assert_eq!(hub.broadcast_interval, Duration::from_millis(10));
        assert_eq!(hub.movement_interval, Duration::from_millis(20));
        assert_eq!(hub.respawn_interval, Duration::from_secs(120));
        assert_eq!(hub.player_radius + hub.coin_radius, 60.0);
    }
}
