//! Key layout and encoding utilities for the Fjall partitions backing
//! [`super::store::JobStore`].
//!
//! Partition structure:
//! - `jobs`: `job:{id}` -> `Job` (JSON)
//! - `idem`: `idem:{sku}:{sha256}:{theme}` -> `id` (uniqueness constraint, §3)
//! - `shopify_map`: `shopify:{sku}` -> `ShopifyMapEntry` (JSON)
//! - `metadata`: `meta:{key}` -> value (JSON/string), process-wide state (§3)

/// Encode a job key: `job:{id}`
pub fn encode_job_key(id: &str) -> Vec<u8> {
    format!("job:{id}").into_bytes()
}

pub fn decode_job_key(key: &[u8]) -> Option<String> {
    std::str::from_utf8(key)
        .ok()?
        .strip_prefix("job:")
        .map(String::from)
}

/// Encode the uniqueness-constraint key over (sku, sha256, theme).
pub fn encode_idem_key(sku: &str, sha256: &str, theme: &str) -> Vec<u8> {
    format!("idem:{sku}:{sha256}:{theme}").into_bytes()
}

pub fn encode_shopify_key(sku: &str) -> Vec<u8> {
    format!("shopify:{sku}").into_bytes()
}

pub fn encode_meta_key(key: &str) -> Vec<u8> {
    format!("meta:{key}").into_bytes()
}
