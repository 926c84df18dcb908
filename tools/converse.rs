/// Converse — interactive dialogue shell for playing through a script.
///
/// Usage: converse --script <path> [--iterations <n>] [--options <n>] [--corrected-relations]
///
/// Reads oracle settings from ORACLE_BASE_URL, ORACLE_API_KEY and
/// ORACLE_MODEL. Each round prints the suggested player lines; pick one
/// by number, type free text to say something else, or use a command:
///
///   state       — print every character's current state
///   points      — list the remaining talking points
///   pass        — skip the player turn, let the cast speak
///   help        — list commands
///   quit        — exit

use dialogue_engine::core::oracle::HttpOracle;
use dialogue_engine::core::planner::PlannerConfig;
use dialogue_engine::core::session::Dialogue;
use dialogue_engine::schema::script::Script;
use std::io::{self, BufRead, Write};
use std::path::Path;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 && (args[1] == "--help" || args[1] == "-h") {
        print_usage();
        return;
    }

    let mut script_path = "tests/fixtures/sample_script.ron".to_string();
    let mut config = PlannerConfig::default();
    let mut max_options = 2usize;
    let mut corrected_relations = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--script" if i + 1 < args.len() => {
                i += 1;
                script_path = args[i].clone();
            }
            "--iterations" if i + 1 < args.len() => {
                i += 1;
                config.max_iterations = args[i].parse().unwrap_or(config.max_iterations);
            }
            "--options" if i + 1 < args.len() => {
                i += 1;
                max_options = args[i].parse().unwrap_or(max_options);
            }
            "--corrected-relations" => {
                corrected_relations = true;
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let script = match Script::load_from_ron(Path::new(&script_path)) {
        Ok(script) => script,
        Err(e) => {
            eprintln!("ERROR loading script {}: {}", script_path, e);
            std::process::exit(1);
        }
    };

    let mut session = match Dialogue::builder()
        .script(script)
        .oracle(HttpOracle::from_env())
        .planner_config(config)
        .max_player_options(max_options)
        .relation_reply_updates_attitude(!corrected_relations)
        .build()
    {
        Ok(session) => session,
        Err(e) => {
            eprintln!("ERROR building session: {}", e);
            std::process::exit(1);
        }
    };

    println!("Loaded script: {}", script_path);
    println!(
        "Playing as {}. Type 'help' for commands.\n",
        session.protagonist().name
    );
    for turn in session.turns() {
        println!("{}: {}", turn.speaker, turn.text);
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        let options = match session.player_options() {
            Ok(options) => options,
            Err(e) => {
                eprintln!("ERROR planning player options: {}", e);
                break;
            }
        };
        if !options.is_empty() {
            println!();
            for (n, option) in options.iter().enumerate() {
                println!("  [{}] {}", n + 1, option);
            }
        }

        print!("{}> ", session.protagonist().name);
        stdout.flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).is_err() || line.is_empty() {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line {
            "quit" | "exit" | "q" => {
                println!("Goodbye.");
                break;
            }
            "help" | "h" | "?" => {
                print_help();
                continue;
            }
            "state" => {
                print_states(&session);
                continue;
            }
            "points" => {
                print_points(&session);
                continue;
            }
            "pass" => {}
            _ => {
                let text = match line.parse::<usize>() {
                    Ok(n) if n >= 1 && n <= options.len() => options[n - 1].clone(),
                    _ => line.to_string(),
                };
                match session.add_player_turn(&text) {
                    Ok(turn) => println!("{}: {}", turn.speaker, turn.text),
                    Err(e) => {
                        eprintln!("ERROR applying player turn: {}", e);
                        continue;
                    }
                }
            }
        }

        match session.take_other_turn() {
            Ok(turn) => println!("{}: {}", turn.speaker, turn.text),
            Err(e) => eprintln!("ERROR taking turn: {}", e),
        }
    }
}

fn print_usage() {
    println!("Converse — interactive dialogue shell for playing through a script.");
    println!();
    println!("Usage: converse --script <path> [--iterations <n>] [--options <n>] [--corrected-relations]");
    println!();
    println!("  --script <path>         Path to a dialogue script (.ron)");
    println!("                          (default: tests/fixtures/sample_script.ron)");
    println!("  --iterations <n>        Search iterations per turn (default: 10)");
    println!("  --options <n>           Suggested player lines per round (default: 2)");
    println!("  --corrected-relations   Route relation replies into the relation map");
    println!();
    println!("Environment: ORACLE_BASE_URL, ORACLE_API_KEY, ORACLE_MODEL");
}

fn print_help() {
    println!("Commands:");
    println!("  <n>       Say suggested line n");
    println!("  <text>    Say something else (rewritten into character)");
    println!("  pass      Skip the player turn, let the cast speak");
    println!("  state     Print every character's current state");
    println!("  points    List the remaining talking points");
    println!("  help      Show this help");
    println!("  quit      Exit");
}

fn print_states(session: &Dialogue) {
    for character in session.others() {
        println!("{}", character.describe_state(None));
    }
}

fn print_points(session: &Dialogue) {
    if session.talking_points().is_empty() {
        println!("No talking points remain.");
        return;
    }
    for tp in session.talking_points() {
        println!("  [order {}] {} — {}", tp.order, tp.character, tp.description);
        for text in tp.targets() {
            println!("      \"{}\"", text);
        }
    }
}
