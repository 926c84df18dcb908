/// Character state model — closed attitude/relation categories and
/// per-character mutable state.
use indexmap::IndexMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("no attitude or relation matches {0:?}")]
    InvalidEnumValue(String),
}

/// A character's emotional disposition. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attitude {
    Calm,
    Happy,
    Sad,
    Angry,
    Scared,
    Excited,
    Confused,
    Disgusted,
    Surprised,
    Playful,
    Nervous,
}

impl Attitude {
    pub const ALL: [Attitude; 11] = [
        Attitude::Calm,
        Attitude::Happy,
        Attitude::Sad,
        Attitude::Angry,
        Attitude::Scared,
        Attitude::Excited,
        Attitude::Confused,
        Attitude::Disgusted,
        Attitude::Surprised,
        Attitude::Playful,
        Attitude::Nervous,
    ];

    /// Lowercase display name, as used in prompts and script files.
    pub fn name(&self) -> &'static str {
        match self {
            Attitude::Calm => "calm",
            Attitude::Happy => "happy",
            Attitude::Sad => "sad",
            Attitude::Angry => "angry",
            Attitude::Scared => "scared",
            Attitude::Excited => "excited",
            Attitude::Confused => "confused",
            Attitude::Disgusted => "disgusted",
            Attitude::Surprised => "surprised",
            Attitude::Playful => "playful",
            Attitude::Nervous => "nervous",
        }
    }

    pub fn ordinal(&self) -> usize {
        Self::ALL.iter().position(|a| a == self).unwrap_or(0)
    }

    /// Resolve a member from its name (case-insensitive) or decimal ordinal.
    pub fn resolve(token: &str) -> Result<Attitude, StateError> {
        resolve_member(&Self::ALL, |a| a.name(), token)
    }
}

/// A directed relationship category toward another character. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Relation {
    #[default]
    Neutral,
    Friendly,
    Hostile,
    Romantic,
    Familial,
    Professional,
}

impl Relation {
    pub const ALL: [Relation; 6] = [
        Relation::Neutral,
        Relation::Friendly,
        Relation::Hostile,
        Relation::Romantic,
        Relation::Familial,
        Relation::Professional,
    ];

    /// Lowercase display name, as used in prompts and script files.
    pub fn name(&self) -> &'static str {
        match self {
            Relation::Neutral => "neutral",
            Relation::Friendly => "friendly",
            Relation::Hostile => "hostile",
            Relation::Romantic => "romantic",
            Relation::Familial => "familial",
            Relation::Professional => "professional",
        }
    }

    pub fn ordinal(&self) -> usize {
        Self::ALL.iter().position(|r| r == self).unwrap_or(0)
    }

    /// Resolve a member from its name (case-insensitive) or decimal ordinal.
    pub fn resolve(token: &str) -> Result<Relation, StateError> {
        resolve_member(&Self::ALL, |r| r.name(), token)
    }
}

fn resolve_member<T: Copy>(
    all: &[T],
    name: impl Fn(&T) -> &'static str,
    token: &str,
) -> Result<T, StateError> {
    let token = token.trim();
    if let Ok(ordinal) = token.parse::<usize>() {
        return all
            .get(ordinal)
            .copied()
            .ok_or_else(|| StateError::InvalidEnumValue(token.to_string()));
    }
    all.iter()
        .find(|member| name(member).eq_ignore_ascii_case(token))
        .copied()
        .ok_or_else(|| StateError::InvalidEnumValue(token.to_string()))
}

/// Mutable state carried by a character: an optional attitude plus a
/// name-keyed relation map. Insertion order of relations is preserved
/// for description rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CharacterState {
    pub attitude: Option<Attitude>,
    pub relations: IndexMap<String, Relation>,
}

impl CharacterState {
    pub fn with_attitude(attitude: Attitude) -> Self {
        Self {
            attitude: Some(attitude),
            relations: IndexMap::new(),
        }
    }

    /// The stored relation toward `other`, or neutral when absent.
    pub fn relation_to(&self, other: &str) -> Relation {
        self.relations.get(other).copied().unwrap_or_default()
    }

    /// Partial update: fields present in `delta` overwrite this state,
    /// absent fields leave it untouched. Existing relation entries are
    /// never removed.
    pub fn merge(&mut self, delta: &CharacterState) {
        if let Some(attitude) = delta.attitude {
            self.attitude = Some(attitude);
        }
        for (name, relation) in &delta.relations {
            self.relations.insert(name.clone(), *relation);
        }
    }

    /// Render "owner is feeling X and feels Y towards Z, ..." over the
    /// relation map in insertion order, optionally filtered to a
    /// relevant subset of other characters.
    pub fn describe(&self, owner: &str, relevant: Option<&[&str]>) -> String {
        let attitude = self.attitude.map(|a| a.name()).unwrap_or("neutral");
        let relations = self
            .relations
            .iter()
            .filter(|(name, _)| match relevant {
                Some(subset) => subset.contains(&name.as_str()),
                None => true,
            })
            .map(|(name, relation)| format!("{} towards {}", relation.name(), name))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{} is feeling {} and feels {}", owner, attitude, relations)
    }
}

/// A member of the dialogue cast. Identity is the name; the biography
/// feeds prompt assembly and the state evolves across turns.
#[derive(Debug, Clone)]
pub struct Character {
    pub name: String,
    pub bio: String,
    pub state: CharacterState,
}

impl PartialEq for Character {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Character {}

impl std::hash::Hash for Character {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl Character {
    pub fn new(name: impl Into<String>, bio: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bio: bio.into(),
            state: CharacterState::default(),
        }
    }

    pub fn attitude(&self) -> Option<Attitude> {
        self.state.attitude
    }

    pub fn relation_to(&self, other: &str) -> Relation {
        self.state.relation_to(other)
    }

    /// Render this character's live state description.
    pub fn describe_state(&self, relevant: Option<&[&str]>) -> String {
        self.state.describe(&self.name, relevant)
    }
}

/// Per-turn snapshot: every character's state as of that turn, keyed by
/// name. Always cloned from live state, never aliased to it.
pub type StateSnapshot = IndexMap<String, CharacterState>;
