//! Reading, merging and writing the local env file.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use regex::Regex;
use tracing::debug;

pub const DEFAULT_ENV_FILE: &str = ".env";

/// Ordered `KEY -> VALUE` pairs as they appear in an env file
pub type EnvMap = IndexMap<String, String>;

/// One assignment per match: optional `export`, the key, then a single-quoted,
/// double-quoted, backtick-quoted or bare value, then an optional comment.
/// Quoted values may span lines.
static LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)^\s*(?:export\s+)?([A-Za-z0-9_.-]+)(?:\s*=\s*?|:\s+?)(\s*'(?:\\'|[^'])*'|\s*"(?:\\"|[^"])*"|\s*`(?:\\`|[^`])*`|[^#\r\n]+)?\s*(?:#.*)?$"#,
    )
    .expect("env line pattern is valid")
});

/// Load an env file, or an empty map if it does not exist.
///
/// A repeated key keeps its first position and its last value.
pub fn load_env_file(path: &Path) -> Result<EnvMap> {
    let exists = path
        .try_exists()
        .with_context(|| format!("Failed to check environment file {}", path.display()))?;
    if !exists {
        debug!(path = %path.display(), "no existing env file");
        return Ok(EnvMap::new());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read environment file {}", path.display()))?;
    Ok(parse_env(&content))
}

/// Parse env-file content with Node dotenv rules, keeping the order of first appearance.
///
/// Never fails: lines that are not assignments are skipped. No `$VAR`
/// expansion happens, and inside double quotes only `\n` and `\r` escapes
/// are expanded. Any other backslash is kept as written.
pub fn parse_env(content: &str) -> EnvMap {
    let content = content.replace("\r\n", "\n").replace('\r', "\n");

    let mut env = EnvMap::new();
    for caps in LINE.captures_iter(&content) {
        let key = caps[1].to_string();
        let raw = caps.get(2).map_or("", |m| m.as_str()).trim();
        env.insert(key, unquote(raw));
    }
    env
}

fn unquote(raw: &str) -> String {
    let Some(quote) = raw.chars().next().filter(|c| matches!(c, '\'' | '"' | '`')) else {
        return raw.to_string();
    };

    let inner = if raw.len() >= 2 && raw.ends_with(quote) {
        &raw[1..raw.len() - 1]
    } else {
        raw
    };

    if quote == '"' {
        inner.replace("\\n", "\n").replace("\\r", "\r")
    } else {
        inner.to_string()
    }
}

/// Overlay `secrets` onto `existing`.
///
/// Existing keys stay where they are, keys present in `secrets` take its value,
/// and keys new to `existing` are appended in `secrets` order.
pub fn merge(mut existing: EnvMap, secrets: &IndexMap<String, String>) -> EnvMap {
    for (key, value) in secrets {
        existing.insert(key.clone(), value.clone());
    }
    existing
}

/// Render `KEY="VALUE"` lines joined by `\n`, with no trailing newline.
///
/// Values are written verbatim: embedded quotes are not escaped and embedded
/// newlines produce multi-line entries.
pub fn to_env_format(env: &EnvMap) -> String {
    env.iter()
        .map(|(key, value)| format!("{key}=\"{value}\""))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Overwrite `file_path` with `content`, restricting it to the owner on Unix
pub fn write_env_file(content: &str, file_path: &Path) -> Result<()> {
    if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            debug!(dir = %parent.display(), "creating output directory");
            fs::create_dir_all(parent).context("Failed to create output directory")?;
        }
    }

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(file_path)
        .with_context(|| format!("Failed to open environment file {}", file_path.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write environment file {}", file_path.display()))?;

    // `mode` only applies when the file is created
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))
            .with_context(|| {
                format!("Failed to restrict permissions of {}", file_path.display())
            })?;
    }

    Ok(())
}
