//! Tessera CLI - operator command-line interface
//!
//! Usage:
//!   tessera mint-code --valid-days 30
//!   tessera mint-code --expires-at 2030-01-01T00:00:00Z
//!   tessera verify-code <code>
//!   tessera config

use anyhow::{bail, Context};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tessera_auth::{RedemptionLedger, SignedCodeCodec};
use tessera_core::AppConfig;
use tracing_subscriber::EnvFilter;

/// Longest validity the CLI will mint
const MAX_VALID_DAYS: i64 = 3650;

const REDACTED: &str = "<redacted>";

#[derive(Parser)]
#[command(name = "tessera")]
#[command(about = "Tessera token subsystem operator CLI")]
#[command(version)]
struct Cli {
    /// TOML configuration file; environment variables take precedence
    #[arg(long, global = true, env = "TESSERA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mint a signed premium code
    MintCode(MintArgs),
    /// Check a code's signature and expiry without touching the store
    VerifyCode {
        /// Code as handed to the user
        code: String,
    },
    /// Print the effective configuration with secrets redacted
    Config,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct MintArgs {
    /// Days from now until the code stops verifying
    #[arg(long)]
    valid_days: Option<u32>,

    /// Absolute expiry (RFC 3339)
    #[arg(long)]
    expires_at: Option<DateTime<Utc>>,
}

impl MintArgs {
    fn expiry(&self, now: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
        let expiry = match (self.valid_days, self.expires_at) {
            (Some(days), _) => {
                let days = i64::from(days);
                if days == 0 || days > MAX_VALID_DAYS {
                    bail!("--valid-days must be between 1 and {MAX_VALID_DAYS}");
                }
                now + Duration::days(days)
            }
            (None, Some(at)) => at,
            (None, None) => bail!("one of --valid-days or --expires-at is required"),
        };

        let expiry = expiry.trunc_subsecs(0);
        if expiry <= now {
            bail!("expiry {} is not in the future", expiry.to_rfc3339());
        }
        Ok(expiry)
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("reading {}", path.display()))?
            .with_env_override()?,
        None => AppConfig::from_env()?,
    };
    Ok(config)
}

/// JSON view of the configuration with both secrets masked
fn redacted(config: &AppConfig) -> anyhow::Result<serde_json::Value> {
    let mut view = config.clone();
    if view.tokens.signing_secret.is_some() {
        view.tokens.signing_secret = Some(REDACTED.to_string());
    }
    if view.codes.secret.is_some() {
        view.codes.secret = Some(REDACTED.to_string());
    }
    Ok(serde_json::to_value(view)?)
}

fn codec(config: &AppConfig) -> anyhow::Result<SignedCodeCodec> {
    SignedCodeCodec::from_config(&config.codes)
        .context("PREMIUM_CODE_SECRET must be set (at least 16 characters)")
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so minted codes can be piped
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::MintCode(args) => {
            let now = Utc::now();
            let expiry = args.expiry(now)?;
            let code = codec(&config)?.build(expiry)?;
            tracing::info!(expires_at = %expiry.to_rfc3339(), "Minted premium code");
            println!("{code}");
        }
        Commands::VerifyCode { code } => {
            let verified = codec(&config)?.verify(&code, Utc::now())?;
            println!("valid until: {}", verified.expires_at.to_rfc3339());
            println!("digest:      {}", verified.digest);
            println!("ledger key:  {}", RedemptionLedger::key_for(&verified.digest));
        }
        Commands::Config => {
            let view = redacted(&config)?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
    }

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
    fn test_mint_args_are_exclusive() {
        let both = Cli::try_parse_from([
            "tessera",
            "mint-code",
            "--valid-days",
            "3",
            "--expires-at",
            "2030-01-01T00:00:00Z",
        ]);
        assert!(both.is_err());

        let neither = Cli::try_parse_from(["tessera", "mint-code"]);
        assert!(neither.is_err());
    }

    #[test]
    fn test_expiry_from_days() {
        let now = Utc::now();
        let args = MintArgs {
            valid_days: Some(30),
            expires_at: None,
        };
        let expiry = args.expiry(now).unwrap();
        assert_eq!(expiry, (now + Duration::days(30)).trunc_subsecs(0));
    }

    #[test]
    fn test_expiry_bounds() {
        let now = Utc::now();
        for days in [0, 3651] {
            let args = MintArgs {
                valid_days: Some(days),
                expires_at: None,
            };
            assert!(args.expiry(now).is_err(), "{days}");
        }

        let past = MintArgs {
            valid_days: None,
            expires_at: Some(now - Duration::minutes(1)),
        };
        assert!(past.expiry(now).is_err());
    }

    #[test]
    fn test_config_secrets_redacted() {
        let mut config = AppConfig::default();
        config.tokens.signing_secret = Some("jwt-secret-value".to_string());
        config.codes.secret = Some("code-secret-value".to_string());

        let view = redacted(&config).unwrap();
        let rendered = view.to_string();
        assert!(!rendered.contains("jwt-secret-value"));
        assert!(!rendered.contains("code-secret-value"));
        assert_eq!(view["tokens"]["signing_secret"], REDACTED);
        assert_eq!(view["codes"]["secret"], REDACTED);
    }

    #[test]
    fn test_minted_code_verifies() {
        let mut config = AppConfig::default();
        config.codes.secret = Some("cli-test-secret-0123".to_string());
        let codec = codec(&config).unwrap();

        let expiry = (Utc::now() + Duration::days(1)).trunc_subsecs(0);
        let code = codec.build(expiry).unwrap();
        let verified = codec.verify(&code, Utc::now()).unwrap();
        assert_eq!(verified.expires_at, expiry);
    }
}
