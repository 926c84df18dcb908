//! Dialogue session — owns the character roster, the append-only turn
//! log, and the active talking points, and orchestrates turn-taking
//! through the planner.

use indexmap::IndexMap;
use thiserror::Error;
use tracing::{info, warn};

use crate::core::oracle::{ChatMessage, Oracle, OracleError};
use crate::core::planner::{PlannedTurn, Planner, PlannerConfig, SearchSeed};
use crate::core::prompt;
use crate::schema::character::{
    Attitude, Character, CharacterState, Relation, StateError, StateSnapshot,
};
use crate::schema::script::{Script, TalkingPoint};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("session references unknown character: {0}")]
    UnknownCharacter(String),
    #[error("planner produced no candidate turns")]
    NoCandidates,
    #[error("dialogue session requires a script")]
    MissingScript,
    #[error("dialogue session requires an oracle")]
    MissingOracle,
}

/// One delivered utterance plus a snapshot of every character's state
/// as of that turn. Immutable once appended, except the sanctioned
/// post-hoc amendment in [`Dialogue::add_player_turn`].
#[derive(Debug, Clone)]
pub struct DialogueTurn {
    pub speaker: String,
    pub text: String,
    pub states: StateSnapshot,
}

/// An interactive dialogue session.
pub struct Dialogue {
    oracle: Box<dyn Oracle>,
    protagonist: Character,
    others: Vec<Character>,
    turns: Vec<DialogueTurn>,
    talking_points: Vec<TalkingPoint>,
    cached_options: Option<Vec<String>>,
    max_player_options: usize,
    planner_config: PlannerConfig,
    /// When set, the relation-classification reply is parsed into the
    /// attitude slot instead of the relation map. This mirrors
    /// long-observed behavior that existing scripts depend on; flip it
    /// off to route the reply into the relation toward the other
    /// character.
    relation_reply_updates_attitude: bool,
}

/// Builder for constructing a `Dialogue`.
pub struct DialogueBuilder {
    script: Option<Script>,
    oracle: Option<Box<dyn Oracle>>,
    planner_config: PlannerConfig,
    max_player_options: usize,
    relation_reply_updates_attitude: bool,
}

impl Dialogue {
    pub fn builder() -> DialogueBuilder {
        DialogueBuilder {
            script: None,
            oracle: None,
            planner_config: PlannerConfig::default(),
            max_player_options: 2,
            relation_reply_updates_attitude: true,
        }
    }

    pub fn protagonist(&self) -> &Character {
        &self.protagonist
    }

    pub fn others(&self) -> &[Character] {
        &self.others
    }

    pub fn turns(&self) -> &[DialogueTurn] {
        &self.turns
    }

    pub fn talking_points(&self) -> &[TalkingPoint] {
        &self.talking_points
    }

    pub fn character(&self, name: &str) -> Option<&Character> {
        if self.protagonist.name == name {
            return Some(&self.protagonist);
        }
        self.others.iter().find(|c| c.name == name)
    }

    fn character_mut(&mut self, name: &str) -> Option<&mut Character> {
        if self.protagonist.name == name {
            return Some(&mut self.protagonist);
        }
        self.others.iter_mut().find(|c| c.name == name)
    }

    /// The state basis for the next turn: a copy of the most recent
    /// turn's snapshot when one exists and is non-empty, else a copy of
    /// every character's live state. Always structurally independent of
    /// both the live roster and the stored history.
    pub fn state(&self) -> StateSnapshot {
        match self.turns.last() {
            Some(turn) if !turn.states.is_empty() => turn.states.clone(),
            _ => {
                let mut snapshot = StateSnapshot::new();
                snapshot.insert(self.protagonist.name.clone(), self.protagonist.state.clone());
                for character in &self.others {
                    snapshot.insert(character.name.clone(), character.state.clone());
                }
                snapshot
            }
        }
    }

    /// All active talking points sharing the minimum order value.
    /// Empty when no points remain; never an error.
    pub fn next_talking_points(&self) -> Vec<&TalkingPoint> {
        let Some(min_order) = self.talking_points.iter().map(|tp| tp.order).min() else {
            return Vec::new();
        };
        self.talking_points
            .iter()
            .filter(|tp| tp.order == min_order)
            .collect()
    }

    /// Ranked texts the player may say next. Cached until the next turn
    /// is appended.
    pub fn player_options(&mut self) -> Result<Vec<String>, SessionError> {
        if let Some(ref options) = self.cached_options {
            return Ok(options.clone());
        }
        let ranked = self.run_planner(true)?;
        let options: Vec<String> = ranked
            .into_iter()
            .map(|turn| turn.text)
            .take(self.max_player_options)
            .collect();
        self.cached_options = Some(options.clone());
        Ok(options)
    }

    /// Deliver a player line. Free-form input (anything that was not
    /// among the offered options) is first rewritten into the
    /// protagonist's voice. The turn is appended with a pre-update
    /// snapshot; every other character then reacts via state
    /// adjustment, and their entries in the just-appended snapshot are
    /// overwritten in place — the single permitted post-hoc mutation,
    /// which avoids a duplicate turn for reactive state changes.
    pub fn add_player_turn(&mut self, text: &str) -> Result<&DialogueTurn, SessionError> {
        let text = match self.cached_options {
            Some(ref options) if !options.iter().any(|option| option == text) => {
                let speaker = self.protagonist.name.clone();
                self.translate(&speaker, text)?
            }
            _ => text.to_string(),
        };

        let states = self.state();
        info!(speaker = %self.protagonist.name, %text, "player turn");
        self.turns.push(DialogueTurn {
            speaker: self.protagonist.name.clone(),
            text,
            states,
        });

        let protagonist = self.protagonist.name.clone();
        let reacting: Vec<String> = self.others.iter().map(|c| c.name.clone()).collect();
        for name in reacting {
            self.adjust_state(&name, &protagonist)?;
            let state = self
                .character(&name)
                .map(|c| c.state.clone())
                .ok_or_else(|| SessionError::UnknownCharacter(name.clone()))?;
            let last = self.turns.len() - 1;
            self.turns[last].states.insert(name, state);
        }

        self.cached_options = None;
        Ok(&self.turns[self.turns.len() - 1])
    }

    /// Let the planner pick the next other-character turn and apply it.
    /// A turn whose text is a remaining talking-point target consumes
    /// that point and applies its scripted delta directly, bypassing
    /// oracle-driven state adjustment.
    pub fn take_other_turn(&mut self) -> Result<&DialogueTurn, SessionError> {
        let ranked = self.run_planner(false)?;
        let PlannedTurn { speaker, text } = ranked
            .into_iter()
            .next()
            .ok_or(SessionError::NoCandidates)?;

        let scripted_delta = self
            .talking_points
            .iter()
            .find(|tp| tp.has_target(&text))
            .and_then(|tp| tp.effects.get(&text).cloned());

        let text = if let Some(delta) = scripted_delta {
            // Consumed exactly once: every point carrying this target
            // leaves the active set.
            self.talking_points.retain(|tp| !tp.has_target(&text));
            self.character_mut(&speaker)
                .ok_or_else(|| SessionError::UnknownCharacter(speaker.clone()))?
                .state
                .merge(&delta);
            info!(%speaker, %text, "scripted talking point delivered");
            self.translate(&speaker, &text)?
        } else {
            let protagonist = self.protagonist.name.clone();
            self.adjust_state(&speaker.clone(), &protagonist)?;
            text
        };

        let mut states = self.state();
        let state = self
            .character(&speaker)
            .map(|c| c.state.clone())
            .ok_or_else(|| SessionError::UnknownCharacter(speaker.clone()))?;
        states.insert(speaker.clone(), state);

        info!(%speaker, %text, "other-character turn");
        self.turns.push(DialogueTurn {
            speaker,
            text,
            states,
        });
        self.cached_options = None;
        Ok(&self.turns[self.turns.len() - 1])
    }

    /// One oracle call rewriting `text` in the speaker's voice given
    /// the full session context. Pure transform: no state mutation.
    pub fn translate(&self, speaker: &str, text: &str) -> Result<String, SessionError> {
        let mut message = self.objective_prompt();
        if !message.is_empty() {
            message.push_str("\n\n");
        }
        message.push_str(&self.history_prompt());
        message.push_str(&format!(
            "\n\nConvert the following text to match the character's style and, if \
             necessary, not contradict the previous dialogue:\n\n{}: {}\n\nUse the \
             format \"{}: converted text\"",
            speaker, text, speaker
        ));
        let response = self.oracle.complete(&[
            ChatMessage::system(self.full_system_prompt()),
            ChatMessage::user(message),
        ])?;
        Ok(prompt::extract_payload(speaker, &response))
    }

    /// Two sequential classification calls updating `subject`'s state
    /// in reaction to `other`'s words.
    ///
    /// The attitude reply must carry a "New Attitude:" marker naming a
    /// member of the closed list; otherwise the attitude is left
    /// unchanged and a neutral sentinel replaces the raw reply in the
    /// conversation context. The relation reply is parsed after its
    /// "New Relationship:" marker and parse failures are skipped
    /// silently, with no context substitution. Where the parsed
    /// relation value lands depends on the
    /// `relation_reply_updates_attitude` toggle.
    pub fn adjust_state(&mut self, subject: &str, other: &str) -> Result<(), SessionError> {
        if self.character(subject).is_none() {
            return Err(SessionError::UnknownCharacter(subject.to_string()));
        }

        let mut message = self.objective_prompt();
        if !message.is_empty() {
            message.push_str("\n\n");
        }
        message.push_str(&self.history_prompt());
        message.push_str(&format!(
            "\n\nWhich of the following attitudes best describes how {}'s words have \
             affected {}?\n\nAttitudes: {}\n\nUse the format \"New Attitude: attitude \
             from list\"",
            other,
            subject,
            name_list(Attitude::ALL.iter().map(|a| a.name()))
        ));
        let mut messages = vec![
            ChatMessage::system(self.full_system_prompt()),
            ChatMessage::user(message),
        ];
        let response = self.oracle.complete(&messages)?;

        let parsed = response
            .strip_prefix("New Attitude:")
            .and_then(|rest| Attitude::resolve(rest).ok());
        let recorded = match parsed {
            Some(attitude) => {
                if let Some(character) = self.character_mut(subject) {
                    character.state.attitude = Some(attitude);
                }
                response
            }
            None => {
                warn!(subject, %response, "unparseable attitude reply, keeping attitude");
                "New Attitude: none".to_string()
            }
        };
        messages.push(ChatMessage::assistant(recorded));

        messages.push(ChatMessage::user(format!(
            "Which of the following relationships best describe how {} now feels about \
             {}?\n\nRelationships: {}\n\nUse the format \"New Relationship: relationship \
             from list\"",
            subject,
            other,
            name_list(Relation::ALL.iter().map(|r| r.name()))
        )));
        let response = self.oracle.complete(&messages)?;

        if let Some(pos) = response.find("New Relationship:") {
            let token = &response[pos + "New Relationship:".len()..];
            if self.relation_reply_updates_attitude {
                if let Ok(attitude) = Attitude::resolve(token) {
                    if let Some(character) = self.character_mut(subject) {
                        character.state.attitude = Some(attitude);
                    }
                }
            } else if let Ok(relation) = Relation::resolve(token) {
                if let Some(character) = self.character_mut(subject) {
                    character.state.relations.insert(other.to_string(), relation);
                }
            }
        }
        Ok(())
    }

    fn run_planner(&self, player_mode: bool) -> Result<Vec<PlannedTurn>, OracleError> {
        let targets: Vec<(String, String)> = self
            .next_talking_points()
            .iter()
            .flat_map(|tp| {
                tp.targets()
                    .map(|text| (tp.character.clone(), text.to_string()))
                    .collect::<Vec<_>>()
            })
            .collect();
        let seed = SearchSeed {
            system_prompt: self.full_system_prompt(),
            objective_prompt: self.objective_prompt(),
            root_dialogue: self.history_prompt(),
            protagonist: self.protagonist.name.clone(),
            others: self.others.iter().map(|c| c.name.clone()).collect(),
            targets,
            player_mode,
        };
        Planner::new(self.oracle.as_ref(), self.planner_config.clone(), seed).search()
    }

    fn full_system_prompt(&self) -> String {
        let cast = std::iter::once(&self.protagonist).chain(self.others.iter());
        format!(
            "{}\n\n{}",
            prompt::system_prompt(),
            prompt::character_prompt(cast)
        )
    }

    fn objective_prompt(&self) -> String {
        prompt::objective_prompt(self.next_talking_points())
    }

    fn history_prompt(&self) -> String {
        let tracked: Vec<&str> = self.others.iter().map(|c| c.name.as_str()).collect();
        prompt::history_prompt(&self.turns, &tracked)
    }
}

fn name_list<'a>(names: impl Iterator<Item = &'a str>) -> String {
    names.collect::<Vec<_>>().join(", ")
}

impl DialogueBuilder {
    pub fn script(mut self, script: Script) -> Self {
        self.script = Some(script);
        self
    }

    pub fn oracle(mut self, oracle: impl Oracle + 'static) -> Self {
        self.oracle = Some(Box::new(oracle));
        self
    }

    pub fn boxed_oracle(mut self, oracle: Box<dyn Oracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn planner_config(mut self, config: PlannerConfig) -> Self {
        self.planner_config = config;
        self
    }

    pub fn max_player_options(mut self, max: usize) -> Self {
        self.max_player_options = max;
        self
    }

    pub fn relation_reply_updates_attitude(mut self, enabled: bool) -> Self {
        self.relation_reply_updates_attitude = enabled;
        self
    }

    pub fn build(self) -> Result<Dialogue, SessionError> {
        let script = self.script.ok_or(SessionError::MissingScript)?;
        let oracle = self.oracle.ok_or(SessionError::MissingOracle)?;

        let protagonist = Character::new(&script.protagonist.name, &script.protagonist.bio);

        let mut others = Vec::with_capacity(script.characters.len());
        for def in &script.characters {
            let mut character = Character::new(&def.name, &def.bio);
            character.state.attitude = Some(Attitude::resolve(&def.attitude)?);
            character
                .state
                .relations
                .insert(protagonist.name.clone(), Relation::resolve(&def.relation)?);
            others.push(character);
        }

        let mut talking_points = Vec::with_capacity(script.talking_points.len());
        for def in &script.talking_points {
            if !others.iter().any(|c| c.name == def.character) {
                return Err(SessionError::UnknownCharacter(def.character.clone()));
            }
            let mut effects = IndexMap::new();
            for beat in &def.points {
                let mut delta = CharacterState::default();
                if let Some(ref token) = beat.attitude {
                    delta.attitude = Some(Attitude::resolve(token)?);
                }
                if let Some(ref token) = beat.relation {
                    delta
                        .relations
                        .insert(protagonist.name.clone(), Relation::resolve(token)?);
                }
                effects.insert(beat.text.clone(), delta);
            }
            talking_points.push(TalkingPoint {
                character: def.character.clone(),
                order: def.order,
                description: def.description.clone(),
                effects,
            });
        }

        let mut session = Dialogue {
            oracle,
            protagonist,
            others,
            turns: Vec::new(),
            talking_points,
            cached_options: None,
            max_player_options: self.max_player_options,
            planner_config: self.planner_config,
            relation_reply_updates_attitude: self.relation_reply_updates_attitude,
        };

        for opening in &script.opening_turns {
            if session.character(&opening.character).is_none() {
                return Err(SessionError::UnknownCharacter(opening.character.clone()));
            }
            let states = session.state();
            session.turns.push(DialogueTurn {
                speaker: opening.character.clone(),
                text: opening.text.clone(),
                states,
            });
        }

        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SilentOracle;

    impl Oracle for SilentOracle {
        fn complete(&self, _messages: &[ChatMessage]) -> Result<String, OracleError> {
            Ok(String::new())
        }
    }

    fn sample_script() -> Script {
        Script::parse_ron(
            r#"Script(
                protagonist: PersonaDef(name: "Pip", bio: "A traveler."),
                characters: [
                    CastDef(name: "Nora", bio: "The innkeeper.", attitude: "calm", relation: "neutral"),
                ],
                talking_points: [
                    TalkingPointDef(
                        character: "Nora",
                        order: 1,
                        description: "first beat",
                        points: [BeatDef(text: "One")],
                    ),
                    TalkingPointDef(
                        character: "Nora",
                        order: 1,
                        description: "parallel beat",
                        points: [BeatDef(text: "Also one")],
                    ),
                    TalkingPointDef(
                        character: "Nora",
                        order: 2,
                        description: "later beat",
                        points: [BeatDef(text: "Two")],
                    ),
                ],
                opening_turns: [
                    OpeningTurnDef(character: "Nora", text: "Evening."),
                ],
            )"#,
        )
        .unwrap()
    }

    #[test]
    fn build_requires_script_and_oracle() {
        assert!(matches!(
            Dialogue::builder().oracle(SilentOracle).build(),
            Err(SessionError::MissingScript)
        ));
        assert!(matches!(
            Dialogue::builder().script(sample_script()).build(),
            Err(SessionError::MissingOracle)
        ));
    }

    #[test]
    fn build_wires_cast_state_from_the_script() {
        let session = Dialogue::builder()
            .script(sample_script())
            .oracle(SilentOracle)
            .build()
            .unwrap();
        let nora = session.character("Nora").unwrap();
        assert_eq!(nora.attitude(), Some(Attitude::Calm));
        assert_eq!(nora.relation_to("Pip"), Relation::Neutral);
        assert_eq!(session.turns().len(), 1);
    }

    #[test]
    fn next_talking_points_take_the_minimum_order() {
        let session = Dialogue::builder()
            .script(sample_script())
            .oracle(SilentOracle)
            .build()
            .unwrap();
        let next = session.next_talking_points();
        assert_eq!(next.len(), 2);
        assert!(next.iter().all(|tp| tp.order == 1));
    }

    #[test]
    fn build_rejects_unknown_talking_point_owner() {
        let mut script = sample_script();
        script.talking_points[0].character = "Ghost".to_string();
        assert!(matches!(
            Dialogue::builder()
                .script(script)
                .oracle(SilentOracle)
                .build(),
            Err(SessionError::UnknownCharacter(name)) if name == "Ghost"
        ));
    }

    #[test]
    fn build_rejects_invalid_attitude_token() {
        let mut script = sample_script();
        script.characters[0].attitude = "grumpy".to_string();
        assert!(matches!(
            Dialogue::builder()
                .script(script)
                .oracle(SilentOracle)
                .build(),
            Err(SessionError::State(StateError::InvalidEnumValue(_)))
        ));
    }
}
