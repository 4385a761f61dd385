use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "keel",
    about = "Keel: transactional object store with scheduled disposal",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Configuration file (defaults to $KEEL_CONFIG or ./keel.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Validate the configuration and list disposal rules
    Check,
    /// Import records from a JSON file and sweep disposable ones
    Sweep(SweepArgs),
}

#[derive(Args)]
pub struct SweepArgs {
    /// JSON object mapping type names to arrays of records
    #[arg(short, long)]
    pub input: PathBuf,

    /// Import without sweeping
    #[arg(long)]
    pub no_clean_up: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sweep_with_global_flags() {
        let cli = Cli::try_parse_from([
            "keel", "sweep", "--input", "data.json", "--no-clean-up", "--format", "json", "-c", "k.toml",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.config, Some(PathBuf::from("k.toml")));
        match cli.command {
            Command::Sweep(args) => {
                assert_eq!(args.input, PathBuf::from("data.json"));
                assert!(args.no_clean_up);
            }
            Command::Check => panic!("expected sweep"),
        }
    }

    #[test]
    fn sweep_requires_input() {
        assert!(Cli::try_parse_from(["keel", "sweep"]).is_err());
    }

    #[test]
    fn check_defaults_to_text() {
        let cli = Cli::try_parse_from(["keel", "check"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Text);
        assert!(cli.config.is_none());
        assert!(!cli.verbose);
    }
}
