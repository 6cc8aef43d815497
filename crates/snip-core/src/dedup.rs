use std::fmt::Display;
use xxhash_rust::xxh3::xxh3_128;

/// Deterministic key derived from an (original URL, owner id) pair.
///
/// Used as the response-cache key so a repeated submission can skip the
/// whole creation pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn new(original_url: &str, owner_id: i64) -> Self {
        let material = format!("{original_url}:{owner_id}");
        Self(format!("{:032x}", xxh3_128(material.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DedupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
