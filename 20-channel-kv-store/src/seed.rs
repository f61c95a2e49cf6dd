//! Demo data population.

use std::time::Instant;

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde_json::json;
use tracing::{info, warn};

use crate::dispatcher::StoreHandle;
use crate::error::DispatchError;

/// Adds `pairs` entries named `key1..keyN`, each holding
/// `{"value": "value<n>"}` with a random `n` below 20000.
///
/// Keys that already exist are left alone. Returns how many entries were
/// actually inserted; stops early only if the dispatcher goes away.
pub async fn seed(store: &StoreHandle, pairs: usize) -> Result<usize, DispatchError> {
    let start = Instant::now();
    let mut rng = StdRng::from_entropy();
    let mut added = 0;

    for i in 1..=pairs {
        let key = format!("key{i}");
        let payload = json!({ "value": format!("value{}", rng.gen_range(0..20_000)) });
        match store.add(key.as_str(), payload.to_string()).await {
            Ok(_) => added += 1,
            Err(err @ DispatchError::Unavailable) => return Err(err),
            Err(err) => warn!(%key, error = %err, "skipping seed entry"),
        }
    }

    info!(added, elapsed = ?start.elapsed(), "seeded store");
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Dispatcher;
    use crate::store::Store;

    #[tokio::test]
    async fn seeds_requested_number_of_pairs() {
        let (handle, _task) = Dispatcher::spawn(Store::new(), 8);
        assert_eq!(seed(&handle, 25).await.expect("seed"), 25);
        assert_eq!(handle.count().await.expect("count"), 25);

        let value = handle.get("key25").await.expect("key25");
        let text = value["value"].as_str().expect("string value");
        assert!(text.starts_with("value"));
    }

    #[tokio::test]
    async fn existing_keys_are_skipped() {
        let (handle, _task) = Dispatcher::spawn(Store::new(), 8);
        handle.add("key2", "\"mine\"").await.expect("add");

        assert_eq!(seed(&handle, 3).await.expect("seed"), 2);
        assert_eq!(handle.get("key2").await.expect("key2"), json!("mine"));
    }
}
