//! Commands for the food scan result cache

use crate::billing::BillingState;
use crate::services::{image_hash, ScanResult};

/// Look up a cached recognition result for a base64 image payload.
///
/// Returns the payload hash alongside the hit so the caller can store the
/// fresh result under the same key on a miss.
pub async fn lookup_scan(
    billing: &BillingState,
    image_base64: String,
) -> Result<(String, Option<ScanResult>), String> {
    let hash = image_hash(&image_base64);
    let cached = billing
        .scan_cache
        .get(&hash)
        .await
        .map_err(|e| e.to_string())?;
    Ok((hash, cached))
}

/// Store a recognition result under its payload hash
pub async fn store_scan(
    billing: &BillingState,
    hash: String,
    result: ScanResult,
) -> Result<(), String> {
    billing
        .scan_cache
        .put(&hash, &result)
        .await
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::BillingConfig;
    use crate::services::DetectedFood;
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_miss_then_hit() {
        let billing = BillingState::with_store(
            BillingConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
        );
        let payload = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNk".to_string();

        let (hash, cached) = lookup_scan(&billing, payload.clone()).await.unwrap();
        assert!(cached.is_none());

        let result = ScanResult::new(
            vec![DetectedFood {
                name: "Banana".to_string(),
                calories: 105.0,
                protein_g: 1.3,
                carbs_g: 27.0,
                fat_g: 0.4,
                serving: Some("1 medium".to_string()),
                confidence: 0.97,
            }],
            None,
        );
        store_scan(&billing, hash.clone(), result.clone()).await.unwrap();

        let (again, cached) = lookup_scan(&billing, payload).await.unwrap();
        assert_eq!(again, hash);
        assert_eq!(cached, Some(result));
    }
}
