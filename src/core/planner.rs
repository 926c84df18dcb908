//! MCTS planner — builds a fresh search tree per call, expands it with
//! oracle-generated candidate utterances, evaluates frontier nodes
//! against the scripted talking points, and ranks the root's children.

use tracing::{debug, info};

use crate::core::matcher::match_talking_point;
use crate::core::oracle::{ChatMessage, Oracle, OracleError};
use crate::core::prompt;

/// Search budgets and constants.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Select/expand/evaluate/backpropagate cycles per `search()` call.
    pub max_iterations: usize,
    /// Candidates generated per actor during expansion.
    pub branch: usize,
    /// Candidates generated at the root in player mode.
    pub player_branch: usize,
    /// Simulated rounds per rollout.
    pub rollout_depth: usize,
    /// Alternatives sampled per rollout round.
    pub rollout_width: usize,
    /// Exploration constant in the selection score.
    pub exploration: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            branch: 2,
            player_branch: 5,
            rollout_depth: 2,
            rollout_width: 1,
            exploration: 2.0,
        }
    }
}

/// A ranked candidate turn returned by the search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTurn {
    pub speaker: String,
    pub text: String,
}

/// Everything the planner needs from the session to root a search.
#[derive(Debug, Clone)]
pub struct SearchSeed {
    pub system_prompt: String,
    pub objective_prompt: String,
    pub root_dialogue: String,
    pub protagonist: String,
    pub others: Vec<String>,
    /// `(owner, target text)` pairs from the minimum-order talking points.
    pub targets: Vec<(String, String)>,
    /// Player mode plans the protagonist's options; otherwise the
    /// other characters' next turn.
    pub player_mode: bool,
}

/// Tree node. Parent links are arena indices, so ownership flows
/// strictly root→leaf with no cycles.
struct Node {
    /// Accumulated dialogue text up to (not including) this node's line.
    dialogue: String,
    /// Actors eligible to speak next from here.
    eligible: Vec<String>,
    parent: Option<usize>,
    children: Vec<usize>,
    speaker: Option<String>,
    text: String,
    visits: u32,
    reward: f64,
    terminal: bool,
}

pub struct Planner<'a> {
    oracle: &'a dyn Oracle,
    config: PlannerConfig,
    seed: SearchSeed,
    nodes: Vec<Node>,
}

impl<'a> Planner<'a> {
    pub fn new(oracle: &'a dyn Oracle, config: PlannerConfig, seed: SearchSeed) -> Self {
        let eligible = if seed.player_mode {
            vec![seed.protagonist.clone()]
        } else {
            seed.others.clone()
        };
        let root = Node {
            dialogue: seed.root_dialogue.clone(),
            eligible,
            parent: None,
            children: Vec::new(),
            speaker: None,
            text: String::new(),
            visits: 0,
            reward: 0.0,
            terminal: false,
        };
        Self {
            oracle,
            config,
            seed,
            nodes: vec![root],
        }
    }

    /// Run the full iteration budget and return root children ranked by
    /// accumulated reward. A talking-point match one move from the root
    /// short-circuits the whole search with that single pair.
    pub fn search(&mut self) -> Result<Vec<PlannedTurn>, OracleError> {
        for iteration in 0..self.config.max_iterations {
            let mut node = self.select();
            if !self.nodes[node].terminal
                && (self.nodes[node].parent.is_none() || self.nodes[node].visits > 0)
            {
                if let Some(child) = self.expand(node)? {
                    node = child;
                }
            }

            let mut reward = None;
            if self.speaks_as_other(node) && !self.nodes[node].text.is_empty() {
                if let Some((owner, text)) = match_talking_point(
                    self.oracle,
                    &self.seed.system_prompt,
                    &self.nodes[node].dialogue,
                    &self.nodes[node].text,
                    &self.seed.targets,
                )? {
                    let one_from_root = self.nodes[node]
                        .parent
                        .is_some_and(|p| self.nodes[p].parent.is_none());
                    if one_from_root {
                        info!(%owner, %text, "scripted beat one move away, ending search");
                        return Ok(vec![PlannedTurn {
                            speaker: owner,
                            text,
                        }]);
                    }
                    self.nodes[node].terminal = true;
                    reward = Some(1.0);
                }
            }

            let reward = match reward {
                Some(r) => r,
                None => self.rollout(node)?,
            };
            debug!(iteration, node, reward, "iteration complete");
            self.backpropagate(node, reward);
        }

        let mut ranked = self.nodes[0].children.clone();
        ranked.sort_by(|a, b| self.nodes[*b].reward.total_cmp(&self.nodes[*a].reward));
        Ok(ranked
            .into_iter()
            .map(|idx| PlannedTurn {
                speaker: self.nodes[idx].speaker.clone().unwrap_or_default(),
                text: self.nodes[idx].text.clone(),
            })
            .collect())
    }

    fn speaks_as_other(&self, node: usize) -> bool {
        match self.nodes[node].speaker {
            Some(ref speaker) => self.seed.others.iter().any(|name| name == speaker),
            None => false,
        }
    }

    /// Descend from the root along maximal selection scores until
    /// reaching a node that is childless or unvisited.
    fn select(&self) -> usize {
        let mut idx = 0;
        while !self.nodes[idx].children.is_empty() && self.nodes[idx].visits > 0 {
            let parent_visits = self.nodes[idx].visits;
            let children = &self.nodes[idx].children;
            let mut best = children[0];
            for &child in &children[1..] {
                if self.ucb(child, parent_visits) > self.ucb(best, parent_visits) {
                    best = child;
                }
            }
            idx = best;
        }
        idx
    }

    /// Selection score. The exploration term takes the ratio of parent
    /// visits to child visits under the square root, with no logarithm.
    /// Rankings depend on this exact form; do not swap in UCB1.
    fn ucb(&self, node: usize, parent_visits: u32) -> f64 {
        let visits = self.nodes[node].visits;
        if visits == 0 {
            return f64::INFINITY;
        }
        self.nodes[node].reward / visits as f64
            + self.config.exploration * (2.0 * parent_visits as f64 / visits as f64).sqrt()
    }

    /// Generate candidate children for every eligible actor. Candidates
    /// within one batch are generated sequentially, each prompt carrying
    /// the accumulated "be dissimilar from these" list of its elder
    /// siblings. Returns the first child created, or `None` when no
    /// actor is eligible to speak from here.
    fn expand(&mut self, parent: usize) -> Result<Option<usize>, OracleError> {
        let num_expand = if self.seed.player_mode && self.nodes[parent].parent.is_none() {
            self.config.player_branch
        } else {
            self.config.branch
        };

        let mut dialogue = self.nodes[parent].dialogue.clone();
        if let Some(ref speaker) = self.nodes[parent].speaker {
            if !self.nodes[parent].text.is_empty() {
                dialogue.push_str(&prompt::speaker_line(speaker, &self.nodes[parent].text));
            }
        }

        for speaker in self.nodes[parent].eligible.clone() {
            let mut message = if speaker != self.seed.protagonist
                && !self.seed.objective_prompt.is_empty()
            {
                format!("{}\n\n{}", self.seed.objective_prompt, dialogue)
            } else {
                dialogue.clone()
            };
            message.push_str(&prompt::continue_instruction(&speaker));

            let eligible_next = if speaker == self.seed.protagonist {
                self.seed.others.clone()
            } else {
                vec![self.seed.protagonist.clone()]
            };

            for i in 0..num_expand {
                let response = self.oracle.complete(&[
                    ChatMessage::system(&self.seed.system_prompt),
                    ChatMessage::user(&message),
                ])?;
                if i == 0 {
                    message.push_str(prompt::dissimilarity_header());
                }
                message.push('\n');
                message.push_str(&response);

                let child = Node {
                    dialogue: dialogue.clone(),
                    eligible: eligible_next.clone(),
                    parent: Some(parent),
                    children: Vec::new(),
                    speaker: Some(speaker.clone()),
                    text: prompt::extract_payload(&speaker, &response),
                    visits: 0,
                    reward: 0.0,
                    terminal: false,
                };
                self.nodes.push(child);
                let idx = self.nodes.len() - 1;
                self.nodes[parent].children.push(idx);
            }
        }
        Ok(self.nodes[parent].children.first().copied())
    }

    /// Simulate forward from a node, asking after each sampled round
    /// whether any remaining talking-point text would continue the
    /// conversation at least as well as the best sampled alternative.
    /// The first favorable verdict is worth `0.9^round`.
    fn rollout(&self, node: usize) -> Result<f64, OracleError> {
        let mut dialogue = self.nodes[node].dialogue.clone();
        if let Some(ref speaker) = self.nodes[node].speaker {
            if !self.nodes[node].text.is_empty() {
                dialogue.push_str(&prompt::speaker_line(speaker, &self.nodes[node].text));
            }
        }

        if self.speaks_as_other(node) {
            self.simulate_protagonist_turn(&mut dialogue)?;
        }

        for round in 0..self.config.rollout_depth {
            let mut message = format!("{}{}", dialogue, prompt::free_continue_instruction());
            let mut alternatives: Vec<String> = Vec::new();
            for _ in 0..self.config.rollout_width {
                let response = self.oracle.complete(&[
                    ChatMessage::system(&self.seed.system_prompt),
                    ChatMessage::user(&message),
                ])?;
                if alternatives.is_empty() {
                    message.push_str(prompt::dissimilarity_header());
                }
                message.push('\n');
                message.push_str(&response);
                alternatives.push(response);
            }

            for (owner, text) in &self.seed.targets {
                let judgment = format!(
                    "{}\n\nDoes the first output below do a better, worse, or equal job of \
                     continuing the above conversation than the best of the alternative \
                     output(s)?\n\nOutput: {}: {}\n\nAlternative Output(s):\n{}",
                    dialogue,
                    owner,
                    text,
                    alternatives.join("\n")
                );
                let verdict = self.oracle.complete(&[
                    ChatMessage::system(&self.seed.system_prompt),
                    ChatMessage::user(judgment),
                ])?;
                let verdict = verdict.to_lowercase();
                if verdict.contains("equal") || verdict.contains("better") {
                    return Ok(0.9f64.powi(round as i32));
                }
            }

            match alternatives.first() {
                Some(first) => {
                    dialogue.push('\n');
                    dialogue.push_str(first);
                }
                None => break,
            }
            self.simulate_protagonist_turn(&mut dialogue)?;
        }
        Ok(0.0)
    }

    fn simulate_protagonist_turn(&self, dialogue: &mut String) -> Result<(), OracleError> {
        let message = format!(
            "{}{}",
            dialogue,
            prompt::continue_instruction(&self.seed.protagonist)
        );
        let response = self.oracle.complete(&[
            ChatMessage::system(&self.seed.system_prompt),
            ChatMessage::user(message),
        ])?;
        dialogue.push('\n');
        dialogue.push_str(&response);
        Ok(())
    }

    /// Walk parent links from the evaluated node to the root inclusive,
    /// bumping visit counts and adding the reward along the way.
    fn backpropagate(&mut self, node: usize, reward: f64) {
        let mut current = Some(node);
        while let Some(idx) = current {
            self.nodes[idx].visits += 1;
            self.nodes[idx].reward += reward;
            current = self.nodes[idx].parent;
        }
    }

    /// `(visits, reward)` per root child, in insertion order.
    pub fn root_child_stats(&self) -> Vec<(u32, f64)> {
        self.nodes[0]
            .children
            .iter()
            .map(|&idx| (self.nodes[idx].visits, self.nodes[idx].reward))
            .collect()
    }

    pub fn root_visits(&self) -> u32 {
        self.nodes[0].visits
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NeverOracle;

    impl Oracle for NeverOracle {
        fn complete(&self, _messages: &[ChatMessage]) -> Result<String, OracleError> {
            panic!("no oracle call expected in this test");
        }
    }

    fn seed() -> SearchSeed {
        SearchSeed {
            system_prompt: "sys".to_string(),
            objective_prompt: String::new(),
            root_dialogue: "Dialogue so far:".to_string(),
            protagonist: "Pip".to_string(),
            others: vec!["Nora".to_string()],
            targets: Vec::new(),
            player_mode: false,
        }
    }

    fn leaf(planner: &mut Planner<'_>, parent: usize, visits: u32, reward: f64) -> usize {
        planner.nodes.push(Node {
            dialogue: String::new(),
            eligible: vec!["Pip".to_string()],
            parent: Some(parent),
            children: Vec::new(),
            speaker: Some("Nora".to_string()),
            text: "line".to_string(),
            visits,
            reward,
            terminal: false,
        });
        let idx = planner.nodes.len() - 1;
        planner.nodes[parent].children.push(idx);
        idx
    }

    #[test]
    fn unvisited_children_are_selected_first() {
        let oracle = NeverOracle;
        let mut planner = Planner::new(&oracle, PlannerConfig::default(), seed());
        planner.nodes[0].visits = 3;
        let visited = leaf(&mut planner, 0, 2, 10.0);
        let fresh = leaf(&mut planner, 0, 0, 0.0);
        assert_eq!(planner.ucb(fresh, 3), f64::INFINITY);
        assert!(planner.ucb(visited, 3) < f64::INFINITY);
        assert_eq!(planner.select(), fresh);
    }

    #[test]
    fn selection_score_uses_the_visit_ratio_not_its_logarithm() {
        let oracle = NeverOracle;
        let mut planner = Planner::new(&oracle, PlannerConfig::default(), seed());
        planner.nodes[0].visits = 8;
        let child = leaf(&mut planner, 0, 2, 1.0);
        // reward/visits + exploration * sqrt(2 * parent/child)
        let expected = 0.5 + 2.0 * (2.0f64 * 8.0 / 2.0).sqrt();
        assert!((planner.ucb(child, 8) - expected).abs() < 1e-12);
    }

    #[test]
    fn ties_keep_the_earlier_child() {
        let oracle = NeverOracle;
        let mut planner = Planner::new(&oracle, PlannerConfig::default(), seed());
        planner.nodes[0].visits = 4;
        let first = leaf(&mut planner, 0, 2, 1.0);
        let _second = leaf(&mut planner, 0, 2, 1.0);
        assert_eq!(planner.select(), first);
    }

    #[test]
    fn backpropagation_walks_to_the_root() {
        let oracle = NeverOracle;
        let mut planner = Planner::new(&oracle, PlannerConfig::default(), seed());
        let mid = leaf(&mut planner, 0, 0, 0.0);
        let deep = leaf(&mut planner, mid, 0, 0.0);
        planner.backpropagate(deep, 0.9);
        assert_eq!(planner.nodes[deep].visits, 1);
        assert_eq!(planner.nodes[mid].visits, 1);
        assert_eq!(planner.root_visits(), 1);
        assert!((planner.nodes[0].reward - 0.9).abs() < f64::EPSILON);
    }
}
