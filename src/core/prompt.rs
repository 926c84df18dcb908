//! Prompt assembly — the information content fed to the oracle:
//! authorial framing, cast personas, pending objectives, and the turn
//! history annotated with state changes.

use rustc_hash::FxHashMap;

use crate::core::session::DialogueTurn;
use crate::schema::character::Character;
use crate::schema::script::TalkingPoint;

/// Authorial framing shared by every oracle call.
pub fn system_prompt() -> &'static str {
    "You are a fictional author writing a dialogue between characters."
}

/// Persona section: one block per cast member with name and biography.
pub fn character_prompt<'a>(cast: impl IntoIterator<Item = &'a Character>) -> String {
    let mut res = String::new();
    for character in cast {
        res.push_str(&format!(
            "\n\nExample speech from and information about {}:\n{}",
            character.name, character.bio
        ));
    }
    res.trim().to_string()
}

/// Pending-objective section: the descriptions of the minimum-order
/// active talking points, or an empty string when none remain.
pub fn objective_prompt<'a>(points: impl IntoIterator<Item = &'a TalkingPoint>) -> String {
    let mut res = String::new();
    for point in points {
        if res.is_empty() {
            res.push_str("Current dialogue objective:");
        }
        res.push('\n');
        res.push_str(&point.description);
    }
    res
}

/// One turn as a history line, newline-prefixed for appending.
pub fn speaker_line(name: &str, text: &str) -> String {
    format!("\n{}: {}", name, text)
}

/// History section: one "name: text" line per turn, with a
/// parenthesized state description appended only when the speaker's
/// snapshot differs from the last description shown for that speaker.
/// Only speakers in `tracked` are annotated.
pub fn history_prompt(turns: &[DialogueTurn], tracked: &[&str]) -> String {
    let mut res = String::from("Dialogue so far:");
    let mut last_shown: FxHashMap<&str, String> = FxHashMap::default();
    for turn in turns {
        res.push_str(&speaker_line(&turn.speaker, &turn.text));
        if !tracked.contains(&turn.speaker.as_str()) {
            continue;
        }
        if let Some(state) = turn.states.get(&turn.speaker) {
            let desc = state.describe(&turn.speaker, None);
            if last_shown.get(turn.speaker.as_str()) != Some(&desc) {
                res.push_str(&format!(" ({})", desc));
                last_shown.insert(turn.speaker.as_str(), desc);
            }
        }
    }
    res
}

/// Instruction asking for the next utterance from a named speaker.
pub fn continue_instruction(name: &str) -> String {
    format!(
        "\n\nContinue the conversation with a message from {}.\nUse the format \"{}: message\"",
        name, name
    )
}

/// Instruction asking for a free continuation from any speaker.
pub fn free_continue_instruction() -> &'static str {
    "\n\nContinue the conversation above with a new message. Use the format: \"name: message\""
}

/// Header introducing previously generated siblings that the next
/// candidate must diverge from.
pub fn dissimilarity_header() -> &'static str {
    "\n\nMake your response very dissimilar from the following examples:"
}

/// Extract the payload after the final "name:" marker, or the whole
/// trimmed response when the marker is absent.
pub fn extract_payload(name: &str, response: &str) -> String {
    let marker = format!("{}:", name);
    match response.rfind(&marker) {
        Some(pos) => response[pos + marker.len()..].trim().to_string(),
        None => response.trim().to_string(),
    }
}
