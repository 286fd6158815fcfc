use sha2::{Digest, Sha256};

/// Namespace prepended to every failure cache key.
pub const KEY_PREFIX: &str = "remote_repo:failure";

/// Builds the store key for a lookup.
///
/// Identifiers are sorted and de-duplicated before hashing, so the same set of
/// ids always maps to the same key no matter the order or count. The hash keeps
/// keys short for large batches. Repository and lookup type are hashed too, so
/// a `:` inside either cannot make two lookups share a key.
#[must_use]
pub fn cache_key<S: AsRef<str>>(repository: &str, lookup_type: &str, identifiers: &[S]) -> String {
    let mut ids: Vec<&str> = identifiers.iter().map(AsRef::as_ref).collect();
    ids.sort_unstable();
    ids.dedup();

    let mut hasher = Sha256::new();
    // record separator between the scope fields and the identifiers
    hasher.update(repository.as_bytes());
    hasher.update([0x1e]);
    hasher.update(lookup_type.as_bytes());
    hasher.update([0x1e]);
    for id in ids {
        hasher.update(id.as_bytes());
        // unit separator, cannot appear in ordinary identifiers
        hasher.update([0x1f]);
    }
    let digest = hex::encode(hasher.finalize());

    format!("{KEY_PREFIX}:{repository}:{lookup_type}:{digest}")
}
