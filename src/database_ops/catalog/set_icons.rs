use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, OnceLock};

use tracing::{debug, warn};

use super::upstream::CatalogUpstream;

/// Process-lifetime memo of set code -> icon URI.
///
/// Failed lookups are cached as `None` so a broken set code costs one upstream
/// call per process. Entries are never evicted: the domain has a few hundred sets.
#[derive(Debug, Default)]
pub struct SetIconCache {
    entries: Mutex<HashMap<String, Option<String>>>,
}

static GLOBAL: OnceLock<Arc<SetIconCache>> = OnceLock::new();

impl SetIconCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared instance for the whole process.
    pub fn global() -> Arc<SetIconCache> {
        GLOBAL.get_or_init(|| Arc::new(SetIconCache::new())).clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cached(&self, code: &str) -> Option<Option<String>> {
        // A poisoned lock only means another thread panicked mid-insert; the map is still usable.
        let guard = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        guard.get(code).cloned()
    }

    fn remember(&self, code: String, uri: Option<String>) {
        let mut guard = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        guard.insert(code, uri);
    }

    /// Resolve icons for a batch of set codes. Keys of the result are upper-case.
    /// Never fails; unknown or failing codes map to `None`.
    pub async fn resolve_icons<I, S>(
        &self,
        upstream: &dyn CatalogUpstream,
        set_codes: I,
    ) -> HashMap<String, Option<String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let codes: BTreeSet<String> = set_codes
            .into_iter()
            .map(|c| c.as_ref().trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty())
            .collect();

        let mut out = HashMap::with_capacity(codes.len());
        for code in codes {
            if let Some(hit) = self.cached(&code) {
                out.insert(code, hit);
                continue;
            }
            // Lock is not held across the await; two tasks may race on the same
            // code, which costs one duplicate call and converges on the same value.
            let uri = match upstream.set_icon_uri(&code.to_ascii_lowercase()).await {
                Ok(uri) => uri,
                Err(e) => {
                    warn!(set_code = %code, error = %e, "set icon lookup failed; caching miss");
                    None
                }
            };
            debug!(set_code = %code, found = uri.is_some(), "set icon resolved");
            self.remember(code.clone(), uri.clone());
            out.insert(code, uri);
        }
        out
    }
}
