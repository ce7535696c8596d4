//! Small helpers shared by the parser, the node wrapper and storage

use serde_json::Value;

/// Generate a fresh id for a node or message
pub fn generate_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id
}

/// Replace `$(NAME)` string values with the `NAME` environment variable
///
/// Walks arrays and objects recursively. Values naming an unset variable
/// are left as they are.
pub fn substitute_env_vars(value: &mut Value) {
    substitute_with(value, &|name| std::env::var(name).ok());
}

fn substitute_with(value: &mut Value, lookup: &dyn Fn(&str) -> Option<String>) {
    match value {
        Value::String(s) => {
            if let Some(name) = env_var_reference(s) {
                if let Some(resolved) = lookup(name) {
                    *s = resolved;
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                substitute_with(item, lookup);
            }
        }
        Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                substitute_with(item, lookup);
            }
        }
        _ => {}
    }
}

fn env_var_reference(s: &str) -> Option<&str> {
    let name = s.strip_prefix("$(")?.strip_suffix(')')?;
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return None;
    }
    Some(name)
}

/// Hex content hash used as a flow revision
pub fn revision_of(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}
