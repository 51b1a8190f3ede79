use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::{ApiError, ResolveError};
use crate::transport::{RequestDescriptor, RestTransport};

/// Wrapper field names the backend has been observed to nest collections
/// under, checked in order.
const WRAPPER_FIELDS: [&str; 4] = ["data", "items", "results", "records"];

/// Probes `candidates` strictly in order and returns the first successful
/// response, normalized into a canonical list of records. Later candidates
/// are never attempted once one succeeds. Callers cannot tell which
/// candidate answered.
pub async fn resolve(
    transport: &dyn RestTransport,
    candidates: &[RequestDescriptor],
) -> Result<Vec<Value>, ResolveError> {
    if candidates.is_empty() {
        return Err(ResolveError::NoCandidates);
    }

    let mut last_error = None;
    for candidate in candidates {
        match transport.execute(candidate).await {
            Ok(payload) => return Ok(normalize_collection(payload)),
            Err(error) => {
                debug!(
                    method = candidate.method.as_str(),
                    path = %candidate.path,
                    error = %error,
                    "candidate endpoint failed; trying next"
                );
                last_error = Some(error);
            }
        }
    }

    Err(ResolveError::Exhausted {
        attempts: candidates.len(),
        last: Box::new(last_error.expect("at least one candidate was attempted")),
    })
}

/// Coerces the backend's heterogeneous payload shapes into one list form:
/// a bare array passes through, an object wrapping a collection field has
/// that field extracted, and any other single object becomes a one-element
/// list.
pub fn normalize_collection(payload: Value) -> Vec<Value> {
    match payload {
        Value::Array(entries) => entries,
        Value::Object(mut fields) => {
            for key in WRAPPER_FIELDS {
                if matches!(fields.get(key), Some(Value::Array(_))) {
                    if let Some(Value::Array(entries)) = fields.remove(key) {
                        return entries;
                    }
                }
            }
            vec![Value::Object(fields)]
        }
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

pub async fn resolve_records<T: DeserializeOwned>(
    transport: &dyn RestTransport,
    candidates: &[RequestDescriptor],
) -> Result<Vec<T>, ApiError> {
    let entries = resolve(transport, candidates).await?;
    entries
        .into_iter()
        .map(|entry| {
            serde_json::from_value(entry)
                .map_err(|err| ApiError::Decode(format!("failed to decode fleet record: {err}")))
        })
        .collect()
}
