//! Planner integration tests — tree growth, visit accounting,
//! short-circuiting, and reward-based ranking against scripted oracles.

mod common;

use common::{QueueOracle, RuleOracle};
use dialogue_engine::core::planner::{Planner, PlannerConfig, SearchSeed};

fn seed(targets: Vec<(String, String)>, player_mode: bool) -> SearchSeed {
    SearchSeed {
        system_prompt: "You are a fictional author.".to_string(),
        objective_prompt: String::new(),
        root_dialogue: "Dialogue so far:".to_string(),
        protagonist: "Pip".to_string(),
        others: vec!["Nora".to_string()],
        targets,
        player_mode,
    }
}

fn config(max_iterations: usize) -> PlannerConfig {
    PlannerConfig {
        max_iterations,
        branch: 2,
        player_branch: 3,
        rollout_depth: 1,
        rollout_width: 1,
        exploration: 2.0,
    }
}

#[test]
fn single_iteration_expands_one_level_with_consistent_statistics() {
    let oracle = RuleOracle::new("no")
        .rule("message from Nora", "Nora: Quiet night.")
        .rule("message from Pip", "Pip: Is it?");
    let mut planner = Planner::new(&oracle, config(1), seed(Vec::new(), false));

    let ranked = planner.search().unwrap();

    // One expansion of the empty root: branch-many children, all for
    // the sole eligible actor.
    assert_eq!(ranked.len(), 2);
    assert!(ranked.iter().all(|turn| turn.speaker == "Nora"));
    assert_eq!(ranked[0].text, "Quiet night.");
    assert_eq!(planner.node_count(), 3);

    // Visit totals across root children equal completed iterations.
    let stats = planner.root_child_stats();
    let total_visits: u32 = stats.iter().map(|(visits, _)| visits).sum();
    assert_eq!(total_visits, 1);
    assert_eq!(planner.root_visits(), 1);
}

#[test]
fn player_mode_uses_the_larger_root_branching_factor() {
    let oracle = RuleOracle::new("no").rule("message from Pip", "Pip: Evening.");
    let mut planner = Planner::new(&oracle, config(1), seed(Vec::new(), true));

    let ranked = planner.search().unwrap();
    assert_eq!(ranked.len(), 3);
    assert!(ranked.iter().all(|turn| turn.speaker == "Pip"));
}

#[test]
fn depth_one_match_short_circuits_the_whole_search() {
    let oracle = std::rc::Rc::new(
        RuleOracle::new("no")
            .rule("message from Nora", "Nora: Hello")
            .rule("Output yes or no", "yes"),
    );
    let targets = vec![("Nora".to_string(), "Hello".to_string())];
    let mut planner = Planner::new(&oracle, config(10), seed(targets, false));

    let ranked = planner.search().unwrap();

    // The budget allows ten iterations; the scripted beat one move from
    // the root ends the search immediately with that single pair.
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].speaker, "Nora");
    assert_eq!(ranked[0].text, "Hello");
    // Two expansion calls plus one matcher question, nothing more.
    assert_eq!(oracle.call_count(), 3);
    // Nothing was backpropagated before the short-circuit.
    assert_eq!(planner.root_visits(), 0);
}

#[test]
fn root_children_are_ranked_by_accumulated_reward() {
    // Two iterations over a two-candidate root. The first candidate's
    // rollout draws a favorable comparative verdict (reward 1.0 at
    // round 0), the second draws none (reward 0.0).
    let oracle = QueueOracle::new(&[
        "Nora: Apples",       // expansion, first candidate
        "Nora: Pears",        // expansion, second candidate
        "no",                 // matcher on first candidate
        "Pip: Oh?",           // rollout: protagonist follow-up
        "Nora: Figs",         // rollout: sampled alternative
        "equal",              // rollout: comparative verdict, favorable
        "no",                 // matcher on second candidate
        "Pip: Hm.",           // rollout: protagonist follow-up
        "Nora: Dates",        // rollout: sampled alternative
        "worse",              // rollout: comparative verdict, unfavorable
        "Pip: Right.",        // rollout: follow-up after the round
    ]);
    let targets = vec![("Nora".to_string(), "Hello".to_string())];
    let mut planner = Planner::new(&oracle, config(2), seed(targets, false));

    let ranked = planner.search().unwrap();

    assert_eq!(oracle.remaining(), 0);
    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0].text, "Apples");
    assert_eq!(ranked[1].text, "Pears");

    let stats = planner.root_child_stats();
    let total_visits: u32 = stats.iter().map(|(visits, _)| visits).sum();
    assert_eq!(total_visits, 2);
    assert!(stats.iter().any(|(_, reward)| (*reward - 1.0).abs() < f64::EPSILON));
}

#[test]
fn deeper_match_marks_terminal_without_short_circuiting() {
    // Candidate generation always answers for whoever is asked;
    // matcher says yes only when the dialogue already carries two
    // exchanged lines, i.e. at depth 2.
    let oracle = RuleOracle::new("no")
        .rule("message from Nora", "Nora: Hello")
        .rule("message from Pip", "Pip: Go on.")
        .rule("Go on.\n\nIn the context", "yes")
        .rule("Output yes or no", "no");
    let targets = vec![("Nora".to_string(), "Hello".to_string())];
    let mut planner = Planner::new(&oracle, config(7), seed(targets, false));

    let ranked = planner.search().unwrap();

    // No short-circuit: the full ranking of root children comes back,
    // with the deep match's reward 1.0 backpropagated into its ancestor.
    assert_eq!(ranked.len(), 2);
    assert_eq!(planner.root_visits(), 7);
    let stats = planner.root_child_stats();
    assert!(stats.iter().any(|(_, reward)| (*reward - 1.0).abs() < f64::EPSILON));
}

#[test]
fn empty_eligible_set_yields_an_empty_ranking() {
    let oracle = RuleOracle::new("no").rule("message from Pip", "Pip: Hm.");
    let empty_cast = SearchSeed {
        others: Vec::new(),
        ..seed(Vec::new(), false)
    };
    let mut planner = Planner::new(&oracle, config(2), empty_cast);

    // Nobody is eligible to speak at the root; the search runs its
    // budget without growing the tree and returns no candidates.
    let ranked = planner.search().unwrap();
    assert!(ranked.is_empty());
    assert_eq!(planner.node_count(), 1);
    assert_eq!(planner.root_visits(), 2);
}

#[test]
fn empty_target_set_skips_matching_entirely() {
    let oracle = std::rc::Rc::new(
        RuleOracle::new("no")
            .rule("message from Nora", "Nora: Quiet night.")
            .rule("message from Pip", "Pip: Is it?"),
    );
    let mut planner = Planner::new(&oracle, config(1), seed(Vec::new(), false));
    planner.search().unwrap();

    for call in oracle.transcripts() {
        for message in call {
            assert!(!message.content.contains("Output yes or no"));
        }
    }
}
