//! Fetch a JSON secret bundle and merge it into a local `.env` file.
//!
//! [`SecretEnv::sync`] runs the whole flow once: fetch the payload from a
//! [`SecretSource`], restore the private-key newlines, overlay the bundle on
//! the existing env file and rewrite it.

mod bundle;
mod envfile;
mod error;
mod source;

use std::path::PathBuf;

use anyhow::Result;
use tracing::info;

pub use bundle::{parse_bundle, restore_newlines, SecretBundle, DEFAULT_PRIVATE_KEY_FIELD};
pub use envfile::{
    load_env_file, merge, parse_env, to_env_format, write_env_file, EnvMap, DEFAULT_ENV_FILE,
};
pub use error::FetchError;
pub use source::{
    AwsSecretsManager, GcpSecretManager, Provider, SecretId, SecretSource, DEFAULT_PROJECT,
    DEFAULT_SECRET, LATEST_VERSION,
};

/// Settings for one sync run
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub secret: SecretId,
    pub env_file: PathBuf,
    pub private_key_field: String,
    /// Compute the merge but leave the env file alone
    pub dry_run: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            secret: SecretId::default(),
            env_file: PathBuf::from(DEFAULT_ENV_FILE),
            private_key_field: DEFAULT_PRIVATE_KEY_FIELD.to_string(),
            dry_run: false,
        }
    }
}

/// What a sync run did to the env file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub env_file: PathBuf,
    /// Keys that were not in the env file before
    pub added: Vec<String>,
    /// Keys whose value was replaced by the secret's
    pub updated: Vec<String>,
    pub total: usize,
    pub written: bool,
}

/// Main service tying a secret backend to the env file
pub struct SecretEnv<S> {
    source: S,
}

impl<S: SecretSource> SecretEnv<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Fetch and decode the secret bundle named by `options`
    pub async fn fetch_bundle(&self, options: &SyncOptions) -> Result<SecretBundle, FetchError> {
        let id = &options.secret;
        info!(provider = self.source.provider_name(), secret = %id, "fetching secret");

        let payload = self.source.fetch(id).await?;
        parse_bundle(&id.secret, payload, &options.private_key_field)
    }

    /// Fetch the secret and merge it into the env file.
    ///
    /// Nothing is read or written locally until the fetch has succeeded.
    pub async fn sync(&self, options: &SyncOptions) -> Result<SyncReport> {
        let secrets = self.fetch_bundle(options).await?;

        let existing = load_env_file(&options.env_file)?;
        let (added, updated) = classify_keys(&existing, &secrets);
        let merged = merge(existing, &secrets);

        let report = SyncReport {
            env_file: options.env_file.clone(),
            added,
            updated,
            total: merged.len(),
            written: !options.dry_run,
        };

        if options.dry_run {
            info!(
                path = %options.env_file.display(),
                added = ?report.added,
                updated = ?report.updated,
                "dry run, env file not written"
            );
            return Ok(report);
        }

        write_env_file(&to_env_format(&merged), &options.env_file)?;
        info!(
            path = %options.env_file.display(),
            added = report.added.len(),
            updated = report.updated.len(),
            total = report.total,
            "environment file written"
        );

        Ok(report)
    }
}

/// Split the bundle's keys into those new to `existing` and those already in it
fn classify_keys(existing: &EnvMap, secrets: &SecretBundle) -> (Vec<String>, Vec<String>) {
    let (updated, added): (Vec<String>, Vec<String>) = secrets
        .keys()
        .cloned()
        .partition(|key| existing.contains_key(key));
    (added, updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory backend returning a fixed payload or a fixed failure
    struct FakeSource {
        payload: Option<String>,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn ok(payload: &str) -> Self {
            Self {
                payload: Some(payload.to_string()),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                payload: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SecretSource for FakeSource {
        fn provider_name(&self) -> &'static str {
            "fake"
        }

        async fn fetch(&self, id: &SecretId) -> Result<Vec<u8>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.payload {
                Some(payload) => Ok(payload.as_bytes().to_vec()),
                None => Err(FetchError::Backend {
                    secret: id.secret.clone(),
                    message: "permission denied".to_string(),
                }),
            }
        }
    }

    const PAYLOAD: &str = r#"{"FOO":"bar","LAGO_RSA_PRIVATE_KEY":"line1\\nline2"}"#;

    fn options_for(path: &Path) -> SyncOptions {
        SyncOptions {
            env_file: path.to_path_buf(),
            ..SyncOptions::default()
        }
    }

    #[tokio::test]
    async fn test_sync_without_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        let service = SecretEnv::new(FakeSource::ok(PAYLOAD));

        let report = service.sync(&options_for(&path)).await.unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "FOO=\"bar\"\nLAGO_RSA_PRIVATE_KEY=\"line1\nline2\""
        );
        assert_eq!(report.added, ["FOO", "LAGO_RSA_PRIVATE_KEY"]);
        assert!(report.updated.is_empty());
        assert_eq!(report.total, 2);
        assert!(report.written);
    }

    #[tokio::test]
    async fn test_sync_merges_into_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "# local settings\nA=1\nFOO=\"old\"\nB='two'\n").unwrap();
        let service = SecretEnv::new(FakeSource::ok(PAYLOAD));

        let report = service.sync(&options_for(&path)).await.unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "A=\"1\"\nFOO=\"bar\"\nB=\"two\"\nLAGO_RSA_PRIVATE_KEY=\"line1\nline2\""
        );
        assert_eq!(report.added, ["LAGO_RSA_PRIVATE_KEY"]);
        assert_eq!(report.updated, ["FOO"]);
        assert_eq!(report.total, 4);
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "LOCAL=keep\n").unwrap();
        let service = SecretEnv::new(FakeSource::ok(PAYLOAD));
        let options = options_for(&path);

        service.sync(&options).await.unwrap();
        let first = fs::read(&path).unwrap();
        service.sync(&options).await.unwrap();
        let second = fs::read(&path).unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_sync_twice_with_dollar_and_backslash_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "DB_PASS=\"pa$HOME\"\n").unwrap();
        let service = SecretEnv::new(FakeSource::ok(
            r#"{"PW":"pa$$w\\cd","LAGO_RSA_PRIVATE_KEY":"k"}"#,
        ));
        let options = options_for(&path);

        service.sync(&options).await.unwrap();
        let first = fs::read_to_string(&path).unwrap();
        service.sync(&options).await.unwrap();
        let second = fs::read_to_string(&path).unwrap();

        assert_eq!(
            first,
            "DB_PASS=\"pa$HOME\"\nPW=\"pa$$w\\cd\"\nLAGO_RSA_PRIVATE_KEY=\"k\""
        );
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_output_round_trips_through_parser() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "A=1\nB=2\n").unwrap();
        let service = SecretEnv::new(FakeSource::ok(PAYLOAD));

        service.sync(&options_for(&path)).await.unwrap();
        let reloaded = load_env_file(&path).unwrap();

        let keys: Vec<&str> = reloaded.keys().map(String::as_str).collect();
        assert_eq!(keys, ["A", "B", "FOO", "LAGO_RSA_PRIVATE_KEY"]);
        assert_eq!(reloaded["LAGO_RSA_PRIVATE_KEY"], "line1\nline2");
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "A=1").unwrap();
        let service = SecretEnv::new(FakeSource::failing());

        let err = service.sync(&options_for(&path)).await.unwrap_err();

        assert_eq!(
            err.to_string(),
            "Error setting secret LAGO_ENV_VARS: permission denied"
        );
        assert_eq!(fs::read_to_string(&path).unwrap(), "A=1");
    }

    #[tokio::test]
    async fn test_fetch_failure_does_not_create_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        let service = SecretEnv::new(FakeSource::failing());

        assert!(service.sync(&options_for(&path)).await.is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_invalid_payload_does_not_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        let service = SecretEnv::new(FakeSource::ok("{not json"));

        let err = service.sync(&options_for(&path)).await.unwrap_err();

        assert!(err.downcast_ref::<FetchError>().is_some());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_dry_run_reports_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "FOO=old").unwrap();
        let service = SecretEnv::new(FakeSource::ok(PAYLOAD));
        let options = SyncOptions {
            dry_run: true,
            ..options_for(&path)
        };

        let report = service.sync(&options).await.unwrap();

        assert!(!report.written);
        assert_eq!(report.updated, ["FOO"]);
        assert_eq!(report.added, ["LAGO_RSA_PRIVATE_KEY"]);
        assert_eq!(fs::read_to_string(&path).unwrap(), "FOO=old");
    }

    #[tokio::test]
    async fn test_fetch_uses_configured_secret() {
        let source = FakeSource::ok(r#"{"OTHER_KEY":"a\\nb"}"#);
        let service = SecretEnv::new(source);
        let options = SyncOptions {
            secret: SecretId::new("other-project", "OTHER"),
            private_key_field: "OTHER_KEY".to_string(),
            ..SyncOptions::default()
        };

        let bundle = service.fetch_bundle(&options).await.unwrap();

        assert_eq!(bundle["OTHER_KEY"], "a\nb");
        assert_eq!(service.source.calls.load(Ordering::SeqCst), 1);
    }
}
