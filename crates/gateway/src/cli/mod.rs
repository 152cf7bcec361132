pub mod config;
pub mod token;

use clap::{Parser, Subcommand};

use bk_domain::config::Config;

/// Brandkit agent gateway: role-scoped chat assistant over websockets.
#[derive(Debug, Parser)]
#[command(name = "brandkit-agent", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Identity token utilities.
    #[command(subcommand)]
    Token(TokenCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

#[derive(Debug, Subcommand)]
pub enum TokenCommand {
    /// Mint a signed chat token for a user.
    Mint {
        /// User id the token is issued to.
        user: String,
        /// Lifetime in seconds (defaults to `auth.token_ttl_secs`).
        #[arg(long)]
        ttl_secs: Option<u64>,
    },
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `BK_CONFIG` (or
/// `config.toml` by default). A missing file means defaults. Returns the
/// parsed [`Config`] and the path that was used.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path = std::env::var("BK_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        Config::default()
    };

    Ok((config, config_path))
}
