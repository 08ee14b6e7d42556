use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Deserialize, Clone, Debug)]
#[command(author, version, about = "qrdrop - serverless P2P file drop and chat")]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to a config file (TOML)
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv).
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    #[serde(default)]
    pub verbose: u8,

    /// Directory where received files are saved. Defaults to the current
    /// directory.
    #[clap(long)]
    pub output_dir: Option<PathBuf>,

    #[clap(subcommand)]
    #[serde(skip)]
    pub role: Option<Role>,
}

/// Which side of the handshake this process plays.
#[derive(Subcommand, Clone, Debug)]
pub enum Role {
    /// Create an offer, print it, and wait for the pasted answer.
    Offer {
        /// Files to send once connected.
        #[clap(value_name = "FILE")]
        files: Vec<PathBuf>,
    },
    /// Accept a pasted offer ("-" reads it from stdin) and print the answer.
    Accept {
        /// The peer's offer string.
        offer: String,
        /// Files to send once connected.
        #[clap(value_name = "FILE")]
        files: Vec<PathBuf>,
    },
}

impl Args {
    /// Load Args from CLI + TOML file (if it exists).
    /// CLI values override those from the file.
    pub fn load() -> Self {
        let cli_args = Args::parse();

        if let Some(config_path) = cli_args.config.clone() {
            if let Some(file_args) = Self::from_file(&config_path) {
                return Self::merge(file_args, cli_args);
            }
        }

        let default_path = PathBuf::from("config.toml");
        if let Some(file_args) = Self::from_file(&default_path) {
            return Self::merge(file_args, cli_args);
        }

        cli_args
    }

    fn from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        let content = fs::read_to_string(path).ok()?;
        toml::from_str::<Args>(&content).ok()
    }

    /// Merge file args with CLI args (CLI takes precedence).
    fn merge(mut file: Args, cli: Args) -> Args {
        if cli.config.is_some() {
            file.config = cli.config;
        }
        if cli.verbose > 0 {
            file.verbose = cli.verbose;
        }
        if cli.output_dir.is_some() {
            file.output_dir = cli.output_dir;
        }
        file.role = cli.role;
        file
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_file() {
        let file = Args {
            config: None,
            verbose: 1,
            output_dir: Some(PathBuf::from("/from-file")),
            role: None,
        };
        let cli = Args {
            config: None,
            verbose: 0,
            output_dir: Some(PathBuf::from("/from-cli")),
            role: None,
        };
        let merged = Args::merge(file, cli);
        assert_eq!(merged.output_dir, Some(PathBuf::from("/from-cli")));
        // CLI verbose 0 means "unset": the file value stays.
        assert_eq!(merged.verbose, 1);
    }
}
