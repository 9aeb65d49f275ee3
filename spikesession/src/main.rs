use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;

use spikecore::algorithm::matching::MatchOpts;
use spikecore::algorithm::timeline::MatchIndex;
use spikesession::error::SessionError;
use spikesession::focus::{FocusUnitStore, NewFocusUnit};
use spikesession::io::layout::SessionLayout;
use spikesession::sorting::list_units;
use spikesession::spike_train::spike_train_for_focus_unit;
use spikesession::unit_matching::{match_all_consecutive, match_recordings, scan_pair_results};

#[derive(Parser, Debug)]
#[command(name = "spikesession", about = "Track sorted units across the recordings of a chronic session")]
struct Cli {
    /// Session directory (holds raw/, computed/, realtime512.yaml)
    #[arg(long, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Match the units of two recordings and persist the mutual matches
    Match {
        bin_x: String,
        bin_y: String,
        #[arg(short = 'k', long, default_value_t = 10)]
        n_neighbors: usize,
        /// Recompute even if the stored result is up to date
        #[arg(long)]
        force: bool,
    },
    /// Match every pair of adjacent sorted recordings
    MatchAll {
        #[arg(short = 'k', long, default_value_t = 10)]
        n_neighbors: usize,
        #[arg(long)]
        force: bool,
    },
    /// List the units of a recording's coarse sorting
    Units { bin: String },
    /// Manage focus units
    Focus {
        #[command(subcommand)]
        action: FocusAction,
    },
    /// Assemble the session-wide spike train of a focus unit
    SpikeTrain { focus_unit_id: String },
}

#[derive(Subcommand, Debug)]
enum FocusAction {
    /// List focus units with their mutual matches
    List,
    /// Add focus units given as <bin_filename>:<unit_id>
    Add {
        #[arg(required = true)]
        units: Vec<String>,
    },
    /// Replace the notes of a focus unit
    Notes { focus_unit_id: String, notes: String },
    /// Delete a focus unit
    Delete { focus_unit_id: String },
}

fn parse_unit_arg(arg: &str) -> Result<NewFocusUnit, SessionError> {
    let (bin, unit) = arg
        .rsplit_once(':')
        .ok_or_else(|| SessionError::InvalidInput(format!("expected <bin_filename>:<unit_id>, got {:?}", arg)))?;
    let unit_id = unit
        .parse::<i32>()
        .map_err(|_| SessionError::InvalidInput(format!("bad unit id {:?}", unit)))?;
    Ok(NewFocusUnit { bin_filename: bin.to_string(), unit_id })
}

fn print_json<T: Serialize>(value: &T) -> Result<(), SessionError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(cli: Cli) -> Result<(), SessionError> {
    let layout = SessionLayout::new(cli.root);

    match cli.command {
        Command::Match { bin_x, bin_y, n_neighbors, force } => {
            let outcome = match_recordings(&layout, &bin_x, &bin_y, &MatchOpts { n_neighbors }, force)?;
            print_json(&outcome)
        }
        Command::MatchAll { n_neighbors, force } => {
            let outcomes = match_all_consecutive(&layout, &MatchOpts { n_neighbors }, force)?;
            print_json(&outcomes)
        }
        Command::Units { bin } => print_json(&list_units(&layout, &bin)?),
        Command::Focus { action } => {
            let mut store = FocusUnitStore::open(&layout)?;
            match action {
                FocusAction::List => {
                    let index = MatchIndex::build(&scan_pair_results(&layout)?);
                    print_json(&serde_json::json!({ "focus_units": store.list_with_matches(&index) }))
                }
                FocusAction::Add { units } => {
                    let units = units.iter().map(|s| parse_unit_arg(s)).collect::<Result<Vec<_>, _>>()?;
                    let added = store.add(&layout, &units)?;
                    print_json(&serde_json::json!({ "added_units": added }))
                }
                FocusAction::Notes { focus_unit_id, notes } => {
                    store.update_notes(&focus_unit_id, &notes)?;
                    print_json(&serde_json::json!({ "success": true }))
                }
                FocusAction::Delete { focus_unit_id } => {
                    store.delete(&focus_unit_id)?;
                    print_json(&serde_json::json!({ "success": true }))
                }
            }
        }
        Command::SpikeTrain { focus_unit_id } => print_json(&spike_train_for_focus_unit(&layout, &focus_unit_id)?),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    run(cli)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_unit_arg() {
        assert_eq!(
            parse_unit_arg("2024-01-01_12:00.bin:7").unwrap(),
            NewFocusUnit { bin_filename: "2024-01-01_12:00.bin".to_string(), unit_id: 7 }
        );
        assert!(parse_unit_arg("a.bin").is_err());
        assert!(parse_unit_arg("a.bin:x").is_err());
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from(["spikesession", "--root", "/tmp/s", "match", "a.bin", "b.bin", "-k", "5"]).unwrap();
        match cli.command {
            Command::Match { n_neighbors, force, .. } => {
                assert_eq!(n_neighbors, 5);
                assert!(!force);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(Cli::try_parse_from(["spikesession", "focus", "add"]).is_err());
    }
}
