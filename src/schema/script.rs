/// Script loading — RON-serialized narrative definitions: the cast,
/// scripted talking points, and optional opening turns.
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::character::{CharacterState, StateError};

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("script references unknown character: {0}")]
    UnknownCharacter(String),
}

/// The protagonist as defined in a script file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaDef {
    pub name: String,
    pub bio: String,
}

/// A non-player cast member. Attitude and relation tokens are resolved
/// against the closed category sets when the session is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastDef {
    pub name: String,
    pub bio: String,
    pub attitude: String,
    pub relation: String,
}

/// One scripted beat: delivering `text` applies the attitude/relation
/// delta to the owning character. The relation is directed at the
/// protagonist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeatDef {
    pub text: String,
    #[serde(default)]
    pub attitude: Option<String>,
    #[serde(default)]
    pub relation: Option<String>,
}

/// A scripted narrative objective with one or more target lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TalkingPointDef {
    pub character: String,
    pub order: i32,
    pub description: String,
    pub points: Vec<BeatDef>,
}

/// A seed turn played before the interactive loop starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpeningTurnDef {
    pub character: String,
    pub text: String,
}

/// A complete narrative definition as loaded from disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    pub protagonist: PersonaDef,
    pub characters: Vec<CastDef>,
    pub talking_points: Vec<TalkingPointDef>,
    #[serde(default)]
    pub opening_turns: Vec<OpeningTurnDef>,
}

impl Script {
    /// Load a script from a RON file.
    pub fn load_from_ron(path: &std::path::Path) -> Result<Script, ScriptError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(ron::from_str(&contents)?)
    }

    pub fn parse_ron(input: &str) -> Result<Script, ScriptError> {
        Ok(ron::from_str(input)?)
    }
}

/// A live talking point: the owning character, its priority order
/// (lower fires earlier), and a target-text → state-delta map in
/// script order. Consumed the first time one of its targets is
/// actually delivered as a turn.
#[derive(Debug, Clone)]
pub struct TalkingPoint {
    pub character: String,
    pub order: i32,
    pub description: String,
    pub effects: IndexMap<String, CharacterState>,
}

impl TalkingPoint {
    /// Target texts in script order.
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.effects.keys().map(String::as_str)
    }

    pub fn has_target(&self, text: &str) -> bool {
        self.effects.contains_key(text)
    }
}
