use crate::client_manager::ConnectionId;
use crate::config::{GuardConfig, HubConfig, ServerConfig};
use crate::guard::{Guard, GuardState, Recovery, Sighting};
use crate::planner::{PathPlanner, PlanError};
use crate::world::{MapData, WorldModel};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{
    Action, GuardView, Item, Obstacle, PlayerUpdate, PlayerView, Position, RemoveKind,
    ServerMessage, COIN,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct Player {
    pub id: String,
    pub username: String,
    pub position: Position,
    pub rotation: f32,
    pub score: u32,
}

impl Player {
    pub fn new(id: String, username: String) -> Self {
        Self {
            id,
            username,
            position: Position::ORIGIN,
            rotation: 0.0,
            score: 0,
        }
    }

    pub fn view(&self) -> PlayerView {
        PlayerView {
            id: self.id.clone(),
            username: self.username.clone(),
            x: self.position.x,
            y: self.position.y,
            rotation: self.rotation,
            score: self.score,
        }
    }
}

/// A message produced by a state transition, delivered once the world lock
/// has been released.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    To(ConnectionId, ServerMessage),
    Broadcast(ServerMessage),
}

/// Planner input captured under the lock.
#[derive(Debug, Clone)]
pub struct PlanJob {
    pub guard: usize,
    pub start: Position,
    pub goal: Position,
}

impl PlanJob {
    pub fn run(&self, planner: &PathPlanner, world: &WorldModel) -> PlanResult {
        PlanResult {
            guard: self.guard,
            start: self.start,
            goal: self.goal,
            outcome: planner.plan(world, self.start, self.goal),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlanResult {
    pub guard: usize,
    pub start: Position,
    /// Goal the plan was computed for; a guard whose goal moved on since
    /// discards the result.
    pub goal: Position,
    pub outcome: Result<Vec<Action>, PlanError>,
}

/// All mutable world state: players, guards and items.
pub struct GameState {
    next_player_id: u64,
    players: HashMap<ConnectionId, Player>,
    guards: Vec<Guard>,
    items: Vec<Item>,
    obstacles: Vec<Obstacle>,
    world: Arc<WorldModel>,
    hub: HubConfig,
    guard_config: GuardConfig,
    goal_radius: f32,
    rng: StdRng,
}

impl GameState {
    pub fn new(map: &MapData, config: &ServerConfig, now: Instant) -> Self {
        Self::with_rng(map, config, now, StdRng::from_entropy())
    }

    pub fn with_rng(map: &MapData, config: &ServerConfig, now: Instant, rng: StdRng) -> Self {
        let guards: Vec<Guard> = map
            .guards
            .iter()
            .map(|spawn| Guard::from_spawn(spawn, now))
            .collect();
        info!(
            "World loaded: {} obstacles, {} restricted areas, {} items, {} guards",
            map.obstacles.len(),
            map.restricted_areas.len(),
            map.items.len(),
            guards.len()
        );

        Self {
            next_player_id: 0,
            players: HashMap::new(),
            guards,
            items: map.items.clone(),
            obstacles: map.obstacles.clone(),
            world: Arc::new(WorldModel::from_map(map, config.planner.clearance)),
            hub: config.hub.clone(),
            guard_config: config.guard.clone(),
            goal_radius: config.planner.step_length(),
            rng,
        }
    }

    pub fn world(&self) -> Arc<WorldModel> {
        Arc::clone(&self.world)
    }

    pub fn players(&self) -> &HashMap<ConnectionId, Player> {
        &self.players
    }

    pub fn player(&self, conn: ConnectionId) -> Option<&Player> {
        self.players.get(&conn)
    }

    pub fn guards(&self) -> &[Guard] {
        &self.guards
    }

    pub fn guard(&self, id: &str) -> Option<&Guard> {
        self.guards.iter().find(|guard| guard.id == id)
    }

    pub fn guard_mut(&mut self, id: &str) -> Option<&mut Guard> {
        self.guards.iter_mut().find(|guard| guard.id == id)
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn username_taken(&self, username: &str) -> bool {
        self.players.values().any(|player| player.username == username)
    }

    /// Inserts a player at the origin and returns the full scene for it.
    pub fn join(&mut self, conn: ConnectionId, username: String) -> Vec<Outbound> {
        let id = format!("player{}", self.next_player_id);
        self.next_player_id += 1;

        let player = Player::new(id, username);
        info!("Player {} ({}) joined on connection {}", player.id, player.username, conn);
        let scene = ServerMessage::SetScene {
            player: player.view(),
            obstacles: Some(self.obstacles.clone()),
            items: Some(self.items.clone()),
        };
        self.players.insert(conn, player);

        vec![Outbound::To(conn, scene)]
    }

    /// Removes the player; leaving twice is a no-op.
    pub fn leave(&mut self, conn: ConnectionId) -> Vec<Outbound> {
        match self.players.remove(&conn) {
            Some(player) => {
                info!("Player {} left", player.id);
                vec![Outbound::Broadcast(ServerMessage::Remove {
                    kind: RemoveKind::Player,
                    id: player.id,
                })]
            }
            None => Vec::new(),
        }
    }

    /// Overwrites the player's pose, then handles the interaction and the
    /// detection report carried by the same frame.
    pub fn update_player(&mut self, conn: ConnectionId, update: &PlayerUpdate) -> Vec<Outbound> {
        let Some(player) = self.players.get_mut(&conn) else {
            debug!("Update from connection {} without a player", conn);
            return Vec::new();
        };
        player.position = update.position();
        player.rotation = update.rotation;

        let mut outbound = Vec::new();
        if let Some(item_id) = &update.interaction {
            outbound.extend(self.interact(conn, item_id));
        }
        if let Some(guard_id) = &update.detected_by {
            self.detect(guard_id, conn);
        }
        outbound
    }

    /// Picks up an item for the player if it exists and is within reach.
    pub fn interact(&mut self, conn: ConnectionId, item_id: &str) -> Vec<Outbound> {
        let Some(index) = self.items.iter().position(|item| item.id == item_id) else {
            warn!("Interaction requested with invalid id: {}", item_id);
            return Vec::new();
        };
        let Some(player) = self.players.get_mut(&conn) else {
            return Vec::new();
        };

        let item = &self.items[index];
        if item.kind != COIN {
            debug!("Interaction with unsupported item type {} ignored", item.kind);
            return Vec::new();
        }
        let reach = self.hub.player_radius + self.hub.coin_radius;
        if item.position().distance_to(&player.position) > reach {
            warn!("Interaction requested with invalid distance: {}", item_id);
            return Vec::new();
        }

        let item = self.items.swap_remove(index);
        player.score += 1;
        debug!("Player {} picked up {}, score {}", player.id, item.id, player.score);

        vec![Outbound::Broadcast(ServerMessage::Remove {
            kind: RemoveKind::Item,
            id: item.id,
        })]
    }

    /// A player reports being spotted by a guard. The guard gives chase if
    /// it is free and actually has line of sight.
    pub fn detect(&mut self, guard_id: &str, conn: ConnectionId) -> bool {
        let Some(player) = self.players.get(&conn) else {
            return false;
        };
        let Some(guard) = self.guards.iter_mut().find(|guard| guard.id == guard_id) else {
            warn!("Detection requested with invalid id: {}", guard_id);
            return false;
        };
        if guard.chasing().is_some() {
            return false;
        }
        if !self
            .world
            .can_see(&guard.position, &player.position, &self.guard_config.sight)
        {
            return false;
        }

        info!("Guard {} started chasing {}", guard.id, player.id);
        guard.begin_pursuit(conn, player.position);
        true
    }

    /// Advances every guard with queued actions by one fine action and
    /// resolves catches. A pursuing guard catches even on a tick without a
    /// queued action, as when it spotted a player already inside its goal
    /// radius.
    pub fn move_guards(&mut self) -> Vec<Outbound> {
        let catch_radius_sq = self.hub.catch_radius * self.hub.catch_radius;
        let mut outbound = Vec::new();

        for guard in self.guards.iter_mut() {
            if let Some(action) = guard.next_action() {
                let next = guard.position.apply(action);
                if self.world.is_valid(&next) {
                    guard.position = next;
                    guard.rotation = action.heading();
                }
            }

            if guard.state != GuardState::Pursuing {
                continue;
            }
            let Some(conn) = guard.chasing() else {
                continue;
            };
            let Some(player) = self.players.get_mut(&conn) else {
                continue;
            };
            if player.position.distance_squared_to(&guard.position) < catch_radius_sq {
                info!("Guard {} caught {}", guard.id, player.id);
                player.position = Position::ORIGIN;
                player.score = 0;
                outbound.push(Outbound::To(
                    conn,
                    ServerMessage::SetScene {
                        player: player.view(),
                        obstacles: None,
                        items: None,
                    },
                ));
                guard.reset_patrol();
            }
        }

        outbound
    }

    /// Replaces the item list and announces it.
    pub fn respawn_items(&mut self, items: Vec<Item>) -> Vec<Outbound> {
        info!("Respawning {} items", items.len());
        self.items = items;
        vec![Outbound::Broadcast(ServerMessage::SetScene {
            player: PlayerView::default(),
            obstacles: None,
            items: Some(self.items.clone()),
        })]
    }

    pub fn snapshot(&self, tick: u64) -> ServerMessage {
        ServerMessage::Update {
            tick,
            players: self.players.values().map(Player::view).collect(),
            guards: self.guards.iter().map(Guard::view).collect::<Vec<GuardView>>(),
        }
    }

    /// Runs the guard state machines and lists the guards that need a plan.
    pub fn prepare_plans(&mut self) -> Vec<PlanJob> {
        let mut jobs = Vec::new();

        for (index, guard) in self.guards.iter_mut().enumerate() {
            let sighting = guard.chasing().and_then(|conn| {
                self.players.get(&conn).map(|player| {
                    if self
                        .world
                        .can_see(&guard.position, &player.position, &self.guard_config.sight)
                    {
                        Sighting::Visible(player.position)
                    } else {
                        Sighting::Hidden
                    }
                })
            });

            let before = guard.state;
            guard.update_goal(sighting, self.goal_radius);
            if guard.state != before {
                debug!("Guard {} {:?} -> {:?}", guard.id, before, guard.state);
            }

            if guard.needs_plan() {
                // A pursuer replans with actions still queued; it stands
                // still until the new plan lands so the plan's start holds.
                guard.halt();
                jobs.push(PlanJob {
                    guard: index,
                    start: guard.position,
                    goal: guard.goal,
                });
            }
        }

        jobs
    }

    /// Installs planner results, discarding any computed for a goal the
    /// guard has since abandoned or from a position it has since left.
    pub fn apply_plans(&mut self, results: Vec<PlanResult>, now: Instant) {
        for result in results {
            let Some(guard) = self.guards.get_mut(result.guard) else {
                continue;
            };
            if guard.goal != result.goal || guard.position != result.start {
                debug!("Discarding stale plan for guard {}", guard.id);
                continue;
            }

            if let Err(e) = &result.outcome {
                debug!("Guard {} failed to plan towards {:?}: {}", guard.id, result.goal, e);
            }
            match guard.apply_plan(result.outcome, now, &self.guard_config, &mut self.rng) {
                Some(Recovery::Teleported) => {
                    info!("Guard {} stuck for too long, teleported to its first waypoint", guard.id)
                }
                Some(Recovery::Escape(goal)) => {
                    info!("Guard {} trying to escape towards {:?}", guard.id, goal)
                }
                Some(Recovery::NextWaypoint(goal)) => {
                    debug!("Guard {} falling back to waypoint {:?}", guard.id, goal)
                }
                Some(Recovery::Idle) | None => {}
            }
        }
    }

    /// One full think pass with planning done in place.
    pub fn think(&mut self, planner: &PathPlanner, now: Instant) {
        let world = self.world();
        let results = self
            .prepare_plans()
            .iter()
            .map(|job| job.run(planner, &world))
            .collect();
        self.apply_plans(results, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::GuardSpawn;

    fn map() -> MapData {
        MapData {
            obstacles: vec![Obstacle::new(300.0, -100.0, 50.0, 200.0)],
            items: vec![Item::coin("coin1", 40.0, 0.0), Item::coin("coin2", 500.0, 500.0)],
            guards: vec![GuardSpawn {
                id: "guard1".to_string(),
                x: 0.0,
                y: 0.0,
                rotation: 0.0,
                patrol_points: vec![Position::new(100.0, 0.0), Position::new(100.0, 100.0)],
            }],
            restricted_areas: vec![],
        }
    }

    fn state() -> GameState {
        GameState::with_rng(&map(), &ServerConfig::default(), Instant::now(), StdRng::seed_from_u64(1))
    }

    fn update(x: f32, y: f32) -> PlayerUpdate {
        PlayerUpdate {
            x,
            y,
            ..PlayerUpdate::default()
        }
    }

    #[test]
    fn test_join_sends_full_scene_to_joiner_only() {
        let mut game = state();
        let outbound = game.join(1, "alice".to_string());

        assert_eq!(outbound.len(), 1);
        match &outbound[0] {
            Outbound::To(1, ServerMessage::SetScene { player, obstacles, items }) => {
                assert_eq!(player.id, "player0");
                assert_eq!(player.username, "alice");
                assert_eq!(player.score, 0);
                assert_eq!(obstacles.as_ref().map(Vec::len), Some(1));
                assert_eq!(items.as_ref().map(Vec::len), Some(2));
            }
            other => panic!("Unexpected outbound: {:?}", other),
        }

        game.join(2, "bob".to_string());
        assert_eq!(game.player(2).unwrap().id, "player1");
        assert!(game.username_taken("bob"));
    }

    #[test]
    fn test_leave_broadcasts_removal_once() {
        let mut game = state();
        game.join(1, "alice".to_string());

        let outbound = game.leave(1);
        assert_eq!(
            outbound,
            vec![Outbound::Broadcast(ServerMessage::Remove {
                kind: RemoveKind::Player,
                id: "player0".to_string(),
            })]
        );
        assert!(game.leave(1).is_empty());
        assert!(game.players().is_empty());
    }

    #[test]
    fn test_coin_pickup_within_reach() {
        let mut game = state();
        game.join(1, "alice".to_string());

        let outbound = game.update_player(
            1,
            &PlayerUpdate {
                interaction: Some("coin1".to_string()),
                ..update(10.0, 0.0)
            },
        );

        assert_eq!(
            outbound,
            vec![Outbound::Broadcast(ServerMessage::Remove {
                kind: RemoveKind::Item,
                id: "coin1".to_string(),
            })]
        );
        assert_eq!(game.player(1).unwrap().score, 1);
        assert_eq!(game.items().len(), 1);
        assert_eq!(game.items()[0].id, "coin2");
    }

    #[test]
    fn test_coin_pickup_rejected() {
        let mut game = state();
        game.join(1, "alice".to_string());

        // Out of reach
        assert!(game.interact(1, "coin2").is_empty());
        // Unknown id
        assert!(game.interact(1, "coin42").is_empty());
        // Same coin twice
        assert_eq!(game.interact(1, "coin1").len(), 1);
        assert!(game.interact(1, "coin1").is_empty());

        assert_eq!(game.player(1).unwrap().score, 1);
    }

    #[test]
    fn test_detection_requires_line_of_sight() {
        let mut game = state();
        game.join(1, "alice".to_string());
        game.join(2, "bob".to_string());

        // Behind the wall at x = 300
        game.update_player(1, &update(400.0, 0.0));
        assert!(!game.detect("guard1", 1));
        assert!(!game.detect("nobody", 1));

        game.update_player(2, &update(150.0, 50.0));
        assert!(game.detect("guard1", 2));
        let guard = game.guard("guard1").unwrap();
        assert_eq!(guard.state, GuardState::Pursuing);
        assert_eq!(guard.goal, Position::new(150.0, 50.0));
        assert_eq!(guard.chasing(), Some(2));

        // Already busy
        game.update_player(1, &update(50.0, 50.0));
        assert!(!game.detect("guard1", 1));
    }

    #[test]
    fn test_detected_by_in_update_frame() {
        let mut game = state();
        game.join(1, "alice".to_string());

        game.update_player(
            1,
            &PlayerUpdate {
                detected_by: Some("guard1".to_string()),
                ..update(120.0, 0.0)
            },
        );

        assert_eq!(game.guard("guard1").unwrap().state, GuardState::Pursuing);
    }

    #[test]
    fn test_guard_catches_player() {
        let mut game = state();
        game.join(1, "alice".to_string());
        game.interact(1, "coin1");
        game.update_player(1, &update(60.0, 0.0));
        game.detect("guard1", 1);
        game.guard_mut("guard1")
            .unwrap()
            .apply_plan(
                Ok(vec![Action::new(2.0, 0.0); 12]),
                Instant::now(),
                &GuardConfig::default(),
                &mut StdRng::seed_from_u64(3),
            );

        let mut caught = Vec::new();
        for _ in 0..12 {
            caught.extend(game.move_guards());
        }

        assert_eq!(caught.len(), 1);
        match &caught[0] {
            Outbound::To(1, ServerMessage::SetScene { player, obstacles, items }) => {
                assert_eq!((player.x, player.y, player.score), (0.0, 0.0, 0));
                assert!(obstacles.is_none());
                assert!(items.is_none());
            }
            other => panic!("Unexpected outbound: {:?}", other),
        }
        let guard = game.guard("guard1").unwrap();
        assert_eq!(guard.state, GuardState::Patrolling);
        assert_eq!(guard.chasing(), None);
        assert_eq!(guard.goal, Position::new(100.0, 0.0));
    }

    #[test]
    fn test_idle_pursuer_catches_nearby_player() {
        let mut game = state();
        game.join(1, "alice".to_string());
        game.update_player(1, &update(20.0, 0.0));
        assert!(game.detect("guard1", 1));

        // Inside the goal radius the planner has nothing to queue
        game.think(&PathPlanner::default(), Instant::now());
        assert_eq!(game.guard("guard1").unwrap().pending_actions(), 0);

        let outbound = game.move_guards();

        assert_eq!(outbound.len(), 1);
        assert!(matches!(outbound[0], Outbound::To(1, ServerMessage::SetScene { .. })));
        assert_eq!(game.player(1).unwrap().position, Position::ORIGIN);
        assert_eq!(game.guard("guard1").unwrap().state, GuardState::Patrolling);
    }

    #[test]
    fn test_patrolling_guard_never_catches() {
        let mut game = state();
        game.join(1, "alice".to_string());
        game.update_player(1, &update(20.0, 0.0));

        assert!(game.move_guards().is_empty());
        assert_eq!(game.player(1).unwrap().position, Position::new(20.0, 0.0));
    }

    #[test]
    fn test_movement_rejects_invalid_step() {
        let mut game = state();
        let guard = game.guard_mut("guard1").unwrap();
        guard.position = Position::new(274.0, 0.0);
        guard.apply_plan(
            Ok(vec![Action::new(2.0, 0.0)]),
            Instant::now(),
            &GuardConfig::default(),
            &mut StdRng::seed_from_u64(3),
        );

        game.move_guards();

        let guard = game.guard("guard1").unwrap();
        assert_eq!(guard.position, Position::new(274.0, 0.0));
        assert_eq!(guard.pending_actions(), 0);
    }

    #[test]
    fn test_think_plans_patrol_and_stale_results_are_dropped() {
        let mut game = state();
        let planner = PathPlanner::default();
        let jobs = game.prepare_plans();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].goal, Position::new(100.0, 0.0));

        let result = jobs[0].run(&planner, &game.world());
        game.join(1, "alice".to_string());
        game.update_player(1, &update(50.0, 0.0));
        game.detect("guard1", 1);

        game.apply_plans(vec![result], Instant::now());
        assert_eq!(game.guard("guard1").unwrap().pending_actions(), 0);

        game.think(&planner, Instant::now());
        assert!(game.guard("guard1").unwrap().pending_actions() > 0);
    }

    #[test]
    fn test_pursuit_replan_starts_where_the_guard_stands() {
        let mut game = state();
        let planner = PathPlanner::default();
        game.join(1, "alice".to_string());
        game.update_player(1, &update(150.0, 0.0));
        assert!(game.detect("guard1", 1));
        game.think(&planner, Instant::now());
        assert!(game.guard("guard1").unwrap().pending_actions() > 0);
        game.move_guards();

        let jobs = game.prepare_plans();
        assert_eq!(jobs.len(), 1);
        let guard = game.guard("guard1").unwrap();
        assert_eq!(guard.pending_actions(), 0);
        assert_eq!(jobs[0].start, guard.position);

        // Movement ticks during the search leave the guard in place
        let result = jobs[0].run(&planner, &game.world());
        game.move_guards();
        game.apply_plans(vec![result], Instant::now());
        assert!(game.guard("guard1").unwrap().pending_actions() > 0);

        let jobs = game.prepare_plans();
        let result = jobs[0].run(&planner, &game.world());
        game.guard_mut("guard1").unwrap().position = Position::new(0.0, 30.0);
        game.apply_plans(vec![result], Instant::now());
        assert_eq!(game.guard("guard1").unwrap().pending_actions(), 0);
    }

    #[test]
    fn test_respawn_and_snapshot() {
        let mut game = state();
        game.join(1, "alice".to_string());
        game.interact(1, "coin1");

        let outbound = game.respawn_items(map().items);
        match &outbound[0] {
            Outbound::Broadcast(ServerMessage::SetScene { player, obstacles, items }) => {
                assert!(player.id.is_empty());
                assert!(obstacles.is_none());
                assert_eq!(items.as_ref().map(Vec::len), Some(2));
            }
            other => panic!("Unexpected outbound: {:?}", other),
        }

        match game.snapshot(7) {
            ServerMessage::Update { tick, players, guards } => {
                assert_eq!(tick, 7);
                assert_eq!(players.len(), 1);
                assert_eq!(guards.len(), 1);
                assert!(guards[0].searching);
            }
            other => panic!("Unexpected snapshot: {:?}", other),
        }
    }
}
