use clap::{Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "formvault",
    about = "Encrypted-at-rest storage for structured form data",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create the encryption key, or confirm the persisted one loads.
    Init,
    /// Encrypt a JSON model and store it under KEY.
    Save {
        key: String,
        /// Model as a JSON document.
        json: String,
    },
    /// Decrypt and print the model stored under KEY.
    Load { key: String },
    /// Delete the record stored under KEY.
    Remove { key: String },
    /// Run a save/load/remove probe against the configured store.
    Health,
    /// Print version and exit.
    Version,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}
