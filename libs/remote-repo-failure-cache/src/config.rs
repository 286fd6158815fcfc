use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::category::FailureCategory;

/// Fallback TTL used when a category has no override.
pub const DEFAULT_FAILURE_TTL: Duration = Duration::from_secs(120);

/// Failure cache settings.
///
/// ```yaml
/// failure_cache:
///   enabled: true
///   default_ttl: 2m
///   category_ttls:
///     not_found: 10m
///     timeout: 30s
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FailureCacheConfig {
    /// When `false` nothing is recorded and every check passes.
    pub enabled: bool,

    #[serde(with = "remote_repo_utils::humantime_serde")]
    pub default_ttl: Duration,

    /// Per-category overrides of `default_ttl`.
    #[serde(with = "ttl_map")]
    pub category_ttls: BTreeMap<FailureCategory, Duration>,
}

impl Default for FailureCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl: DEFAULT_FAILURE_TTL,
            category_ttls: BTreeMap::new(),
        }
    }
}

impl FailureCacheConfig {
    /// Default TTL plus the suggested override for every category.
    #[must_use]
    pub fn recommended() -> Self {
        let category_ttls = FailureCategory::ALL
            .into_iter()
            .filter_map(|c| c.recommended_ttl().map(|ttl| (c, ttl)))
            .collect();
        Self {
            category_ttls,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, category: FailureCategory, ttl: Duration) -> Self {
        self.category_ttls.insert(category, ttl);
        self
    }

    /// TTL for the category: the override when configured, else `default_ttl`.
    #[must_use]
    pub fn ttl_for(&self, category: FailureCategory) -> Duration {
        self.category_ttls
            .get(&category)
            .copied()
            .unwrap_or(self.default_ttl)
    }
}

mod ttl_map {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::category::FailureCategory;

    #[derive(Serialize, Deserialize)]
    #[serde(transparent)]
    struct Ttl(#[serde(with = "remote_repo_utils::humantime_serde")] Duration);

    pub fn serialize<S>(map: &BTreeMap<FailureCategory, Duration>, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let wrapped: BTreeMap<FailureCategory, Ttl> =
            map.iter().map(|(k, v)| (*k, Ttl(*v))).collect();
        wrapped.serialize(s)
    }

    pub fn deserialize<'de, D>(d: D) -> Result<BTreeMap<FailureCategory, Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let wrapped = BTreeMap::<FailureCategory, Ttl>::deserialize(d)?;
        Ok(wrapped.into_iter().map(|(k, Ttl(v))| (k, v)).collect())
    }
}
