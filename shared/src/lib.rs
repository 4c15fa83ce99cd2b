//! Types shared between the stealth game server and its clients: plane
//! geometry, game-rule constants and the JSON wire protocol.

pub mod geometry;
pub mod protocol;

pub use geometry::{Action, Position, Rect};
pub use protocol::{
    decode_client_message, ClientMessage, GuardView, Item, Obstacle, PlayerUpdate, PlayerView,
    RemoveKind, ServerMessage, COIN,
};

/// Collision radius of a player, used for pickups.
pub const PLAYER_RADIUS: f32 = 50.0;
pub const COIN_RADIUS: f32 = 10.0;
/// Clearance a guard keeps from obstacles and restricted areas.
pub const GUARD_RADIUS: f32 = 25.0;
/// A pursuing guard this close to its target catches it.
pub const CATCH_RADIUS: f32 = 50.0;
/// Guard displacement per movement tick.
pub const GUARD_SPEED: f32 = 2.0;
/// Number of movement ticks one planner step is split into.
pub const GRANULARITY: usize = 12;
