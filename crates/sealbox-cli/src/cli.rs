use clap::{Parser, Subcommand};

/// CLI surface definition. Thin diagnostic shell over the secure store.
#[derive(Parser, Debug)]
#[command(
    name = "sealbox",
    about = "Encryption-at-rest for small string payloads",
    version,
    propagate_version = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Caller-supplied base64 key (32 raw bytes). Bypasses key generation
    /// and persistence entirely.
    #[arg(long, global = true)]
    pub key: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Encrypt a string and print the base64 envelope.
    Encrypt {
        /// Plaintext to seal.
        plaintext: String,
    },
    /// Decrypt a base64 envelope and print the plaintext.
    Decrypt {
        /// Envelope produced by `encrypt`.
        envelope: String,
    },
    /// Print the active key as base64, if it is exportable.
    ExportKey,
    /// Drop the key and wipe every record the store owns.
    Clear,
    /// Run an encrypt/decrypt round-trip probe against the configured store.
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
