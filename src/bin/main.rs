use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use secretenv::{
    AwsSecretsManager, GcpSecretManager, Provider, SecretEnv, SecretId, SyncOptions,
    DEFAULT_ENV_FILE, DEFAULT_PRIVATE_KEY_FIELD, DEFAULT_PROJECT, DEFAULT_SECRET, LATEST_VERSION,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "secretenv")]
#[command(about = "Fetch a JSON secret bundle and merge it into a local .env file")]
struct Cli {
    /// Project that owns the secret
    #[arg(long, default_value = DEFAULT_PROJECT)]
    project: String,

    /// Name of the secret holding the JSON bundle
    #[arg(long, default_value = DEFAULT_SECRET)]
    secret: String,

    /// Secret version to read
    #[arg(long = "version", default_value = LATEST_VERSION)]
    secret_version: String,

    /// Env file to merge into and overwrite
    #[arg(long, default_value = DEFAULT_ENV_FILE)]
    env_file: PathBuf,

    /// Field whose `\n` escapes are turned into real newlines
    #[arg(long, default_value = DEFAULT_PRIVATE_KEY_FIELD)]
    private_key_field: String,

    /// Secret backend
    #[arg(long, value_enum, default_value_t = Provider::Gcp)]
    provider: Provider,

    /// AWS region (aws provider only)
    #[arg(long)]
    region: Option<String>,

    /// Show which keys would change without writing the env file
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let options = SyncOptions {
        secret: SecretId {
            project: cli.project,
            secret: cli.secret,
            version: cli.secret_version,
        },
        env_file: cli.env_file,
        private_key_field: cli.private_key_field,
        dry_run: cli.dry_run,
    };

    let report = match cli.provider {
        Provider::Gcp => SecretEnv::new(GcpSecretManager::new()).sync(&options).await?,
        Provider::Aws => {
            let source = AwsSecretsManager::from_env(cli.region).await;
            SecretEnv::new(source).sync(&options).await?
        }
    };

    if report.written {
        println!("Environment file updated: {}", report.env_file.display());
    }
    Ok(())
}
