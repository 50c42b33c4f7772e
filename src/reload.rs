//! Checksum-keyed IR cache with atomic hot-reload.
//!
//! The cache maps a (tenant, rule-family, version) identity to the
//! currently deployed `Arc<CompiledIR>`. Lookups compare the cached
//! checksum against the checksum of the latest source; on drift the source
//! is recompiled and the entry swapped under a write lock, so readers see
//! either the old artifact or the new one, never anything in between.
//! In-flight executions hold their own `Arc` and are untouched by swaps.
//! The optional TTL is an extra eviction layer on top of checksum
//! invalidation, never the sole correctness mechanism.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::compile::{Checksum, CompiledIR, Compiler};
use crate::error::CompileError;
use crate::events::{default_sink, EngineEvent, EventSink, RulesetIdentity};

/// Cache key: one deployed rule set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpecIdentity {
    pub tenant: String,
    pub family: String,
    pub version: String,
}

impl SpecIdentity {
    pub fn new(
        tenant: impl Into<String>,
        family: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            family: family.into(),
            version: version.into(),
        }
    }

    fn ruleset(&self) -> RulesetIdentity {
        RulesetIdentity::new(
            self.tenant.clone(),
            self.family.clone(),
            self.version.clone(),
        )
    }
}

struct CacheEntry {
    checksum: Checksum,
    ir: Arc<CompiledIR>,
    stored_at: Instant,
}

/// Injected cache service with an atomic checksum-keyed swap primitive.
pub struct IrCache {
    entries: RwLock<BTreeMap<SpecIdentity, CacheEntry>>,
    ttl: Option<Duration>,
}

impl Default for IrCache {
    fn default() -> Self {
        Self::new()
    }
}

impl IrCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            ttl: None,
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            ttl: Some(ttl),
        }
    }

    /// Current artifact if present, checksum-matching (when `expected` is
    /// given) and not expired.
    pub fn get(&self, identity: &SpecIdentity, expected: Option<&Checksum>) -> Option<Arc<CompiledIR>> {
        let entries = self.entries.read();
        let entry = entries.get(identity)?;
        if let Some(expected) = expected {
            if &entry.checksum != expected {
                return None;
            }
        }
        if let Some(ttl) = self.ttl {
            if entry.stored_at.elapsed() > ttl {
                return None;
            }
        }
        Some(Arc::clone(&entry.ir))
    }

    /// Atomically replace the deployed artifact for `identity`.
    pub fn swap(&self, identity: SpecIdentity, ir: Arc<CompiledIR>) {
        let entry = CacheEntry {
            checksum: ir.checksum,
            ir,
            stored_at: Instant::now(),
        };
        self.entries.write().insert(identity, entry);
    }

    pub fn invalidate(&self, identity: &SpecIdentity) {
        self.entries.write().remove(identity);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Hot-reload manager: `get_or_compile` keeps the cache in sync with the
/// latest source text.
pub struct ReloadManager {
    cache: IrCache,
    compiler: Compiler,
    sink: Arc<dyn EventSink>,
}

impl ReloadManager {
    pub fn new(compiler: Compiler) -> Self {
        Self {
            cache: IrCache::new(),
            compiler,
            sink: default_sink(),
        }
    }

    pub fn with_cache(compiler: Compiler, cache: IrCache) -> Self {
        Self {
            cache,
            compiler,
            sink: default_sink(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Return the cached artifact for `identity` if it still matches the
    /// latest `source`; otherwise recompile and atomically swap it in.
    pub fn get_or_compile(
        &self,
        identity: &SpecIdentity,
        source: &str,
    ) -> Result<Arc<CompiledIR>, CompileError> {
        // Cheap drift check: normalize + hash, no full compile.
        let latest = self.compiler.checksum_of_text(source)?;

        if let Some(ir) = self.cache.get(identity, Some(&latest)) {
            self.sink.emit(&EngineEvent::CacheHit { checksum: latest });
            return Ok(ir);
        }
        self.sink.emit(&EngineEvent::CacheMiss {
            identity: identity.ruleset(),
        });

        let ir = Arc::new(self.compiler.compile(&identity.tenant, source)?);
        self.cache.swap(identity.clone(), Arc::clone(&ir));
        self.sink.emit(&EngineEvent::VersionDeployed {
            identity: identity.ruleset(),
            checksum: ir.checksum,
        });
        Ok(ir)
    }

    /// Currently deployed artifact, regardless of source drift.
    pub fn current(&self, identity: &SpecIdentity) -> Option<Arc<CompiledIR>> {
        self.cache.get(identity, None)
    }

    /// Swap back to a previously retained artifact (audit/replay path).
    pub fn rollback(&self, identity: &SpecIdentity, ir: Arc<CompiledIR>) {
        let checksum = ir.checksum;
        self.cache.swap(identity.clone(), ir);
        self.sink.emit(&EngineEvent::VersionRolledBack {
            identity: identity.ruleset(),
            checksum,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SPEC_A: &str = r#"
schema_version: 1
metadata: { marketplace: test, version: "1.0.0" }
mapping:
  - output: price
rules:
  - id: r1
    target: price
    action: assert
    condition: { field: price, op: gt, value: 0 }
"#;

    fn identity() -> SpecIdentity {
        SpecIdentity::new("tenant-1", "catalog", "1.0.0")
    }

    #[test]
    fn second_lookup_hits_cache() {
        let manager = ReloadManager::new(Compiler::new());
        let a = manager.get_or_compile(&identity(), SPEC_A).unwrap();
        let b = manager.get_or_compile(&identity(), SPEC_A).unwrap();
        assert_eq!(a.checksum, b.checksum);
        assert!(Arc::ptr_eq(&a, &b), "hit must return the same artifact");
    }

    #[test]
    fn source_drift_swaps_the_entry() {
        let manager = ReloadManager::new(Compiler::new());
        let a = manager.get_or_compile(&identity(), SPEC_A).unwrap();

        let changed = SPEC_A.replace("value: 0", "value: 1");
        let b = manager.get_or_compile(&identity(), &changed).unwrap();
        assert_ne!(a.checksum, b.checksum);

        // In-flight holders of the old artifact keep a valid, unchanged IR.
        assert_eq!(a.rules.len(), 1);

        // The cache now serves the new artifact.
        let current = manager.current(&identity()).unwrap();
        assert_eq!(current.checksum, b.checksum);
    }

    #[test]
    fn cosmetic_reformat_is_still_a_hit() {
        let manager = ReloadManager::new(Compiler::new());
        let a = manager.get_or_compile(&identity(), SPEC_A).unwrap();
        let reformatted = SPEC_A.replace("condition: { field: price, op: gt, value: 0 }",
            "condition:\n      field: price\n      op: gt\n      value: 0");
        let b = manager.get_or_compile(&identity(), &reformatted).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn expired_ttl_recompiles() {
        let manager =
            ReloadManager::with_cache(Compiler::new(), IrCache::with_ttl(Duration::ZERO));
        let a = manager.get_or_compile(&identity(), SPEC_A).unwrap();
        let b = manager.get_or_compile(&identity(), SPEC_A).unwrap();
        // Same identity and checksum, but a fresh artifact instance.
        assert_eq!(a.checksum, b.checksum);
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn concurrent_lookups_converge_on_one_checksum() {
        let manager = ReloadManager::new(Compiler::new());
        let checksums: Vec<Checksum> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let manager = &manager;
                    s.spawn(move || manager.get_or_compile(&identity(), SPEC_A).unwrap().checksum)
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(checksums.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(manager.cache.len(), 1);
    }

    #[test]
    fn rollback_redeploys_old_artifact() {
        let manager = ReloadManager::new(Compiler::new());
        let old = manager.get_or_compile(&identity(), SPEC_A).unwrap();
        let changed = SPEC_A.replace("value: 0", "value: 1");
        manager.get_or_compile(&identity(), &changed).unwrap();

        manager.rollback(&identity(), Arc::clone(&old));
        let current = manager.current(&identity()).unwrap();
        assert_eq!(current.checksum, old.checksum);
    }
}
