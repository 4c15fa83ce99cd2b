//! JSON wire protocol spoken over WebSocket text frames.
//!
//! Every frame is an object discriminated by its `requesting` field. Server
//! frames are modelled by [`ServerMessage`]; the only client frame the server
//! acts upon is `"update"`, decoded into [`PlayerUpdate`]. Client field names
//! follow the browser client (`X`, `Y`, `Rotation`, ...), lower-case spellings
//! are accepted as well.

use crate::geometry::{Position, Rect};
use serde::{Deserialize, Deserializer, Serialize};

/// Item type tag for collectible coins.
pub const COIN: &str = "coin";

/// Static, collidable rectangle as stored in the map file and sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub stroke: String,
}

impl Obstacle {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            color: String::new(),
            stroke: String::new(),
        }
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }
}

/// Anything displayed and interacted with that is not an obstacle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub x: f32,
    pub y: f32,
}

impl Item {
    pub fn coin(id: impl Into<String>, x: f32, y: f32) -> Self {
        Self {
            id: id.into(),
            kind: COIN.to_string(),
            x,
            y,
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }
}

/// Public record of a player as drawn by other clients.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlayerView {
    pub id: String,
    pub username: String,
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardView {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
    /// False only while the guard is actively pursuing a visible player.
    pub searching: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoveKind {
    Player,
    Item,
}

/// Frames sent from the server to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "requesting", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Full or partial scene. A `None` list leaves the client's copy untouched;
    /// an empty player id means "not about you".
    SetScene {
        player: PlayerView,
        obstacles: Option<Vec<Obstacle>>,
        items: Option<Vec<Item>>,
    },
    Update {
        tick: u64,
        players: Vec<PlayerView>,
        guards: Vec<GuardView>,
    },
    Remove {
        #[serde(rename = "type")]
        kind: RemoveKind,
        id: String,
    },
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Frames the server acts upon.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Update(PlayerUpdate),
}

/// Position report sent by a client every frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlayerUpdate {
    #[serde(rename = "X", alias = "x")]
    pub x: f32,
    #[serde(rename = "Y", alias = "y")]
    pub y: f32,
    #[serde(rename = "Rotation", alias = "rotation", default)]
    pub rotation: f32,
    /// Item the player is trying to pick up.
    #[serde(
        rename = "Interaction",
        alias = "interaction",
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub interaction: Option<String>,
    /// Guard the client believes has spotted the player.
    #[serde(
        rename = "DetectedBy",
        alias = "detectedBy",
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub detected_by: Option<String>,
}

impl PlayerUpdate {
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }

    /// Encodes the update as a complete client frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let serde_json::Value::Object(map) = &mut value {
            map.insert("requesting".to_string(), "update".into());
        }
        serde_json::to_string(&value)
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(alias = "Requesting")]
    requesting: String,
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

/// Decodes a client text frame.
///
/// Returns `Ok(None)` for well-formed frames with a discriminator the server
/// does not handle.
pub fn decode_client_message(text: &str) -> Result<Option<ClientMessage>, serde_json::Error> {
    let envelope: Envelope = serde_json::from_str(text)?;
    match envelope.requesting.as_str() {
        "update" => Ok(Some(ClientMessage::Update(serde_json::from_str(text)?))),
        _ => Ok(None),
    }
}
