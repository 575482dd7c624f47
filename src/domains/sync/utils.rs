use chrono::Utc;
use rand::{distr::Alphanumeric, Rng};

const ID_SUFFIX_LEN: usize = 9;

/// Build a queue item id: millisecond timestamp plus a random suffix.
pub fn generate_item_id() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(ID_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("sync_{}_{}", Utc::now().timestamp_millis(), suffix.to_lowercase())
}

/// An enqueue payload must carry something.
pub fn is_empty_payload(payload: &serde_json::Value) -> bool {
    match payload {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        serde_json::Value::Array(values) => values.is_empty(),
        serde_json::Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// One-line description of a replay attempt for the log
pub fn format_sync_operation(
    operation: &str,
    kind: &str,
    item_id: &str,
    status: &str,
    error: Option<&str>,
) -> String {
    if let Some(err) = error {
        format!("{} {}:{} - {} - Error: {}", operation, kind, item_id, status, err)
    } else {
        format!("{} {}:{} - {}", operation, kind, item_id, status)
    }
}
