//! Secret backends.
//!
//! The fetch flow only needs one capability from a backend: hand back the raw
//! payload of a secret version. [`SecretSource`] is that seam; the GCP and AWS
//! clients below implement it and tests plug in an in-memory fake.

use std::fmt;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_secretsmanager::error::DisplayErrorContext;
use aws_sdk_secretsmanager::Client;
use clap::ValueEnum;
use tokio::process::Command;
use tracing::debug;

use crate::error::FetchError;

pub const DEFAULT_PROJECT: &str = "atom-pay-dev-be1b";
pub const DEFAULT_SECRET: &str = "LAGO_ENV_VARS";
pub const LATEST_VERSION: &str = "latest";

/// Identifies one version of one secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretId {
    pub project: String,
    pub secret: String,
    pub version: String,
}

impl SecretId {
    pub fn new(project: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            secret: secret.into(),
            version: LATEST_VERSION.to_string(),
        }
    }

    /// Fully-qualified resource name, e.g. `projects/p/secrets/s/versions/latest`
    pub fn resource_name(&self) -> String {
        format!(
            "projects/{}/secrets/{}/versions/{}",
            self.project, self.secret, self.version
        )
    }
}

impl Default for SecretId {
    fn default() -> Self {
        Self::new(DEFAULT_PROJECT, DEFAULT_SECRET)
    }
}

impl fmt::Display for SecretId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.resource_name())
    }
}

/// A backend able to return the payload of a secret version.
#[async_trait]
pub trait SecretSource: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Fetch the raw payload bytes of `id`
    async fn fetch(&self, id: &SecretId) -> Result<Vec<u8>, FetchError>;
}

/// Which backend the binary talks to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Provider {
    #[default]
    Gcp,
    Aws,
}

/// GCP Secret Manager, reached through the `gcloud` CLI.
///
/// Credentials are whatever `gcloud` is logged in with.
#[derive(Debug, Clone)]
pub struct GcpSecretManager {
    program: String,
}

impl GcpSecretManager {
    pub fn new() -> Self {
        Self::with_program("gcloud")
    }

    /// Use a different executable in place of `gcloud`
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for GcpSecretManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretSource for GcpSecretManager {
    fn provider_name(&self) -> &'static str {
        "gcp"
    }

    async fn fetch(&self, id: &SecretId) -> Result<Vec<u8>, FetchError> {
        debug!(resource = %id, "accessing secret version via {}", self.program);

        let output = Command::new(&self.program)
            .args([
                "secrets",
                "versions",
                "access",
                &id.version,
                "--secret",
                &id.secret,
                "--project",
                &id.project,
            ])
            .output()
            .await
            .map_err(|e| {
                FetchError::backend(&id.secret, format!("failed to execute {}: {e}", self.program))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FetchError::backend(
                &id.secret,
                format!("{} failed: {}", self.program, stderr.trim()),
            ));
        }

        Ok(output.stdout)
    }
}

/// AWS Secrets Manager via the AWS SDK.
///
/// The secret name is used as the secret id; the project is not part of the
/// lookup. `latest` maps to the `AWSCURRENT` stage.
pub struct AwsSecretsManager {
    client: Client,
}

impl AwsSecretsManager {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the default credential chain, optionally pinned to a region
    pub async fn from_env(region: Option<String>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let config = loader.load().await;
        Self::new(Client::new(&config))
    }
}

#[async_trait]
impl SecretSource for AwsSecretsManager {
    fn provider_name(&self) -> &'static str {
        "aws"
    }

    async fn fetch(&self, id: &SecretId) -> Result<Vec<u8>, FetchError> {
        let request = self.client.get_secret_value().secret_id(&id.secret);
        let request = if id.version == LATEST_VERSION {
            request.version_stage("AWSCURRENT")
        } else {
            request.version_id(&id.version)
        };

        let response = request.send().await.map_err(|e| {
            FetchError::backend(
                &id.secret,
                format!("failed to fetch secret from AWS: {}", DisplayErrorContext(&e)),
            )
        })?;

        if let Some(text) = response.secret_string() {
            return Ok(text.as_bytes().to_vec());
        }
        response
            .secret_binary()
            .map(|blob| blob.as_ref().to_vec())
            .ok_or_else(|| FetchError::backend(&id.secret, "secret version has no payload"))
    }
}
