//! Talking-point matcher — yes/no semantic-equivalence judgments used
//! as the planner's direct reward signal.

use tracing::debug;

use crate::core::oracle::{ChatMessage, Oracle, OracleError};

/// Ask the oracle, per remaining target in list order, whether the
/// candidate utterance semantically matches it. The first "yes" wins
/// and returns that `(owner, target text)` pair; there is no scoring
/// across multiple matches.
pub fn match_talking_point(
    oracle: &dyn Oracle,
    system_prompt: &str,
    dialogue: &str,
    utterance: &str,
    targets: &[(String, String)],
) -> Result<Option<(String, String)>, OracleError> {
    let question = format!(
        "{}\n\nIn the context of the above conversation, is the following output \
         semantically similar to or encapsulate the target text? Output yes or no.\
         \n\nOutput: {}",
        dialogue, utterance
    );
    for (owner, text) in targets {
        let message = format!("{}\n\nTarget text: {}: {}", question, owner, text);
        let response = oracle.complete(&[
            ChatMessage::system(system_prompt),
            ChatMessage::user(message),
        ])?;
        if response.to_lowercase().contains("yes") {
            debug!(%owner, %text, "utterance matched talking point");
            return Ok(Some((owner.clone(), text.clone())));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FnOracle<F>(F);

    impl<F: Fn(&[ChatMessage]) -> String> Oracle for FnOracle<F> {
        fn complete(&self, messages: &[ChatMessage]) -> Result<String, OracleError> {
            Ok((self.0)(messages))
        }
    }

    fn targets() -> Vec<(String, String)> {
        vec![
            ("Nora".to_string(), "Hello".to_string()),
            ("Nora".to_string(), "Welcome in".to_string()),
        ]
    }

    #[test]
    fn first_matching_target_wins() {
        let oracle = FnOracle(|messages: &[ChatMessage]| {
            if messages[1].content.contains("Target text: Nora: Hello") {
                "Yes.".to_string()
            } else {
                "no".to_string()
            }
        });
        let hit = match_talking_point(&oracle, "sys", "Dialogue so far:", "Hi there", &targets())
            .unwrap();
        assert_eq!(hit, Some(("Nora".to_string(), "Hello".to_string())));
    }

    #[test]
    fn no_target_matches() {
        let oracle = FnOracle(|_: &[ChatMessage]| "no".to_string());
        let hit = match_talking_point(&oracle, "sys", "Dialogue so far:", "Hi there", &targets())
            .unwrap();
        assert_eq!(hit, None);
    }

    #[test]
    fn questions_are_asked_in_list_order_and_stop_at_the_first_yes() {
        use std::cell::RefCell;
        let asked: RefCell<Vec<String>> = RefCell::new(Vec::new());
        let oracle = FnOracle(|messages: &[ChatMessage]| {
            asked.borrow_mut().push(messages[1].content.clone());
            "yes".to_string()
        });
        match_talking_point(&oracle, "sys", "Dialogue so far:", "Hi", &targets()).unwrap();
        assert_eq!(asked.borrow().len(), 1);
        assert!(asked.borrow()[0].contains("Nora: Hello"));
    }
}
