use std::path::PathBuf;
use std::process::ExitCode;

use clap::builder::NonEmptyStringValueParser;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use rollwin::config::RollwinConfig;
use rollwin::ratelimit::{QuotaPolicy, SlidingWindowLimiter, WindowStatus};
use rollwin::store::RedisStore;

/// Exit status of a `check` whose attempt was denied.
const EXIT_DENIED: u8 = 2;

#[derive(Debug, Parser)]
#[command(
    name = "rollwin",
    version,
    about = "Sliding-window rate limit checks against a shared Redis"
)]
struct Cli {
    /// YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Redis URL, overriding the configuration
    #[arg(long, global = true)]
    redis_url: Option<String>,

    /// Window length in seconds, overriding the configuration
    #[arg(long, global = true)]
    window_secs: Option<u64>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Record an attempt and report whether it is within quota
    Check {
        #[arg(long, value_parser = NonEmptyStringValueParser::new())]
        key: String,
        /// Quota to check against; resolved from the policy file when omitted
        #[arg(long, allow_hyphen_values = true)]
        quota: Option<i64>,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Count live records without recording an attempt
    Peek {
        #[arg(long, value_parser = NonEmptyStringValueParser::new())]
        key: String,
    },
    /// Delete every record for a key
    Reset {
        #[arg(long, value_parser = NonEmptyStringValueParser::new())]
        key: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    debug!(version = env!("CARGO_PKG_VERSION"), "Starting rollwin");

    let mut config = RollwinConfig::load(cli.config.as_deref())?;
    if let Some(url) = cli.redis_url {
        config.store.redis_url = url;
    }
    if let Some(secs) = cli.window_secs {
        config.limiter.window_secs = secs;
    }
    config.validate()?;
    info!(
        window_secs = config.limiter.window_secs,
        key_prefix = %config.store.key_prefix,
        "Configuration loaded"
    );

    let store =
        RedisStore::connect(&config.store.redis_url, config.store.key_prefix.clone()).await?;
    let limiter = SlidingWindowLimiter::new(store, config.limiter.window())
        .record_identity(config.limiter.record_identity);

    match cli.command {
        Command::Check { key, quota, json } => {
            let status = match quota {
                Some(quota) => limiter.evaluate(&key, quota).await?,
                None => {
                    let policy = load_policy(&config)?;
                    limiter.check_with_policy(&key, &policy).await?
                }
            };

            print_status(&status, json)?;
            if status.decision.is_admitted() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(EXIT_DENIED))
            }
        }
        Command::Peek { key } => {
            println!("{}", limiter.peek(&key).await?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Reset { key } => {
            limiter.reset(&key).await?;
            println!("reset {}", key);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Logs go to stderr so stdout only carries results.
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_policy(config: &RollwinConfig) -> rollwin::error::Result<QuotaPolicy> {
    match &config.limiter.policy_path {
        Some(path) => QuotaPolicy::from_file(path),
        None => Ok(QuotaPolicy::default()),
    }
}

fn print_status(status: &WindowStatus, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(status)?);
        return Ok(());
    }

    print!(
        "{} key={} count={} quota={} remaining={}",
        status.decision, status.key, status.count, status.quota, status.remaining
    );
    if let Some(retry_after) = status.retry_after {
        print!(" retry_after_ms={}", retry_after.as_millis());
    }
    println!();
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
    fn test_parse_check_with_negative_quota() {
        let cli =
            Cli::try_parse_from(["rollwin", "check", "--key", "/api/a", "--quota", "-1"]).unwrap();
        match cli.command {
            Command::Check { key, quota, json } => {
                assert_eq!(key, "/api/a");
                assert_eq!(quota, Some(-1));
                assert!(!json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(Cli::try_parse_from(["rollwin", "peek", "--key", ""]).is_err());
    }
}
