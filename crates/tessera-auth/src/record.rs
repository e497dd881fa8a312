//! JSON records kept in the shared store

use crate::error::{AuthError, AuthResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tessera_core::{EphemeralStore, ScanCursor};
use tracing::warn;

pub(crate) fn encode<T: Serialize>(key: &str, record: &T) -> AuthResult<String> {
    serde_json::to_string(record).map_err(|e| {
        warn!(key = %key, error = %e, "Failed to encode record");
        AuthError::CorruptRecord {
            key: key.to_string(),
        }
    })
}

pub(crate) fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> AuthResult<T> {
    serde_json::from_str(raw).map_err(|e| {
        warn!(key = %key, error = %e, "Failed to decode record");
        AuthError::CorruptRecord {
            key: key.to_string(),
        }
    })
}

/// Walk every record under `prefix` in cursor-bounded batches and return the
/// ones accepted by `keep`
///
/// This costs one scan over the whole prefix; there is no per-user index.
/// Records that vanish or fail to decode mid-scan are skipped.
pub(crate) async fn scan_matching<T, F>(
    store: &dyn EphemeralStore,
    prefix: &str,
    batch: usize,
    keep: F,
) -> AuthResult<Vec<(String, T)>>
where
    T: DeserializeOwned,
    F: Fn(&T) -> bool,
{
    let mut cursor = ScanCursor::start();
    let mut matches = Vec::new();

    loop {
        let page = store.scan_prefix(prefix, &cursor, batch).await?;
        for key in page.keys {
            let Some(raw) = store.get(&key).await? else {
                continue;
            };
            if let Ok(record) = decode::<T>(&key, &raw) {
                if keep(&record) {
                    matches.push((key, record));
                }
            }
        }

        match page.next {
            Some(next) => cursor = next,
            None => break,
        }
    }

    Ok(matches)
}
