//! Keymaster command line client
//!
//! Usage:
//!   km ci --issuer https://km.example.com --role deployment \
//!     --username smithb12 --name "Bob Smith" --email bob.smith@awesome.com \
//!     --description "enhance the magic" --url https://github.com/org/repo/pull/7

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use keymaster_client::{CiRequest, CiRunner, HttpIssuerApi};

#[derive(Parser)]
#[command(name = "km")]
#[command(about = "Keymaster credential client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Perform keymaster authentication, in CI
    Ci(CiArgs),
}

#[derive(Args)]
struct CiArgs {
    /// Target credential issuer
    #[arg(long, env = "KM_ISSUER")]
    issuer: String,

    /// Role to apply for with issuer
    #[arg(long, env = "KM_ROLE")]
    role: String,

    /// Username to associate with the access request
    #[arg(long)]
    username: String,

    /// Human name to associate with the access request
    #[arg(long)]
    name: String,

    /// Email address to associate with the access request
    #[arg(long)]
    email: String,

    /// Purpose of the access request
    #[arg(long)]
    description: String,

    /// URL with further details for the access request
    #[arg(long)]
    url: String,

    /// Write the issued iam credential under this profile name
    #[arg(long, env = "KM_AWS_PROFILE")]
    aws_set_profile_name: Option<String>,

    /// AWS credentials file to update (default ~/.aws/credentials)
    #[arg(long, env = "AWS_SHARED_CREDENTIALS_FILE")]
    aws_credentials_file: Option<PathBuf>,
}

impl CiArgs {
    fn into_request(self) -> Result<CiRequest> {
        let aws_credentials_file = match self.aws_credentials_file {
            Some(path) => path,
            None => default_credentials_file()?,
        };
        Ok(CiRequest {
            issuer_url: self.issuer,
            role: self.role,
            username: self.username,
            name: self.name,
            email: self.email,
            description: self.description,
            details_url: self.url,
            aws_profile_name: self.aws_set_profile_name,
            aws_credentials_file,
        })
    }
}

fn default_credentials_file() -> Result<PathBuf> {
    let home = env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .context("Cannot locate home directory; pass --aws-credentials-file")?;
    Ok(PathBuf::from(home).join(".aws").join("credentials"))
}

fn log_level(debug: bool) -> Level {
    if debug {
        return Level::DEBUG;
    }
    env::var("KM_LOG_LEVEL")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(Level::INFO)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level(cli.debug))
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    match cli.command {
        Commands::Ci(args) => {
            let request = args.into_request()?;
            let runner = CiRunner::new(Arc::new(HttpIssuerApi::new(request.issuer_url.clone())));

            match runner.run(&request).await {
                Ok(outcome) => {
                    info!(
                        environment = %outcome.environment,
                        credentials = outcome.credentials.len(),
                        persisted = outcome.persisted,
                        "Authentication complete"
                    );
                }
                Err(err) => {
                    error!(stage = err.stage(), "{}", err);
                    return Err(err.into());
                }
            }
        }
    }

    Ok(())
}
