//! Decoding of the fetched secret payload into a [`SecretBundle`].

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::FetchError;

pub const DEFAULT_PRIVATE_KEY_FIELD: &str = "LAGO_RSA_PRIVATE_KEY";

/// Key/value pairs from the secret payload, in document order
pub type SecretBundle = IndexMap<String, String>;

/// Decode `payload` as UTF-8 JSON and restore the newlines of `private_key_field`.
///
/// `secret` is only used to name the secret in errors.
pub fn parse_bundle(
    secret: &str,
    payload: Vec<u8>,
    private_key_field: &str,
) -> Result<SecretBundle, FetchError> {
    let text = String::from_utf8(payload).map_err(|source| FetchError::InvalidUtf8 {
        secret: secret.to_string(),
        source,
    })?;

    let json: IndexMap<String, Value> = serde_json::from_str(&text).map_err(|source| {
        // Well-formed JSON of the wrong shape, e.g. a top-level array
        if source.is_data() {
            FetchError::NotAnObject {
                secret: secret.to_string(),
            }
        } else {
            FetchError::InvalidJson {
                secret: secret.to_string(),
                source,
            }
        }
    })?;

    let mut bundle: SecretBundle = json
        .into_iter()
        .map(|(key, value)| (key, value_to_env_string(value)))
        .collect();

    let private_key = bundle
        .get_mut(private_key_field)
        .ok_or_else(|| FetchError::MissingField {
            secret: secret.to_string(),
            field: private_key_field.to_string(),
        })?;
    *private_key = restore_newlines(private_key);

    Ok(bundle)
}

/// Replace every literal `\n` escape with a real line break
pub fn restore_newlines(value: &str) -> String {
    value.replace("\\n", "\n")
}

fn value_to_env_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        // Compact JSON text covers numbers, booleans, null and nested values
        other => other.to_string(),
    }
}
