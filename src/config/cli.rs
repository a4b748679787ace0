use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "signup")]
#[command(about = "Stage and submit volunteer registrations in one atomic batch")]
pub struct CliConfig {
    #[arg(long, short, default_value = "signup.toml")]
    pub config: PathBuf,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Emit logs as JSON lines")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Print the roster grouped by period
    Roster {
        #[arg(long, help = "Hide full slots you are not on")]
        only_available: bool,

        #[arg(long, help = "Only show slots you are registered on")]
        only_mine: bool,
    },
    /// Stage changes and submit them as one batch
    Submit {
        /// SLOT:PROFILE pairs to register
        #[arg(long = "add", value_delimiter = ',')]
        add: Vec<String>,

        /// SLOT:PROFILE pairs to unregister
        #[arg(long = "remove", value_delimiter = ',')]
        remove: Vec<String>,

        #[arg(long, short, help = "Answer yes to every confirmation")]
        yes: bool,
    },
    /// Show the account balance
    Balance,
    /// Keep the session and roster fresh until interrupted
    Watch,
}

/// Splits a `SLOT:PROFILE` argument.
pub fn parse_pair(raw: &str) -> Option<(&str, &str)> {
    let (slot, profile) = raw.split_once(':')?;
    let (slot, profile) = (slot.trim(), profile.trim());
    if slot.is_empty() || profile.is_empty() {
        return None;
    }
    Some((slot, profile))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_submit_command() {
        let cli = CliConfig::try_parse_from([
            "signup",
            "--config",
            "custom.toml",
            "submit",
            "--add",
            "buvette:p1,accueil:p2",
            "--remove",
            "parking:p1",
            "--yes",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        match cli.command {
            Command::Submit { add, remove, yes } => {
                assert_eq!(add, vec!["buvette:p1", "accueil:p2"]);
                assert_eq!(remove, vec!["parking:p1"]);
                assert!(yes);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_pair() {
        assert_eq!(parse_pair("slot-1:p-2"), Some(("slot-1", "p-2")));
        assert_eq!(parse_pair("slot-1"), None);
        assert_eq!(parse_pair(":p-2"), None);
    }
}
