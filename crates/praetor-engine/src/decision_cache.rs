//! Optional cache of whole-check decisions keyed by a request fingerprint.
//!
//! Entries remember the snapshot generation they were computed against. A
//! reload clears the cache, and any entry written late by a check that was
//! still running on the old snapshot is rejected by the generation check.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};

use praetor_core::model::{ActionResult, CheckRequest};
use praetor_core::value::{Attributes, Value};

use crate::cache::{CacheStats, TtlLruCache};

#[derive(Debug, Clone, PartialEq)]
pub struct CachedDecision {
    pub generation: u64,
    pub results: BTreeMap<String, ActionResult>,
    pub policies_evaluated: Vec<String>,
}

pub struct DecisionCache {
    entries: TtlLruCache<String, Arc<CachedDecision>>,
}

impl DecisionCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self { entries: TtlLruCache::new(capacity, ttl) }
    }

    /// Lookup that only returns entries computed against `generation`.
    pub fn get(&self, key: &str, generation: u64) -> Option<Arc<CachedDecision>> {
        self.entries.get(key).filter(|d| d.generation == generation)
    }

    pub fn insert(&self, key: String, decision: CachedDecision) {
        self.entries.insert(key, Arc::new(decision));
    }

    /// Drop everything. Called on every policy reload.
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.entries.stats()
    }
}

/// Canonical SHA-256 fingerprint of everything a decision can depend on
/// (except the clock): tenant, principal, resource, the requested action set,
/// and aux data. Values are fed with type tags so e.g. `1` and `1.0` or a
/// timestamp and its string form never collide.
pub fn fingerprint(req: &CheckRequest) -> String {
    let mut h = Sha256::new();
    h.update(b"praetor.decision.v1");

    feed_opt_str(&mut h, req.tenant.as_deref());
    feed_str(&mut h, &req.principal.id);
    feed_len(&mut h, req.principal.roles.len());
    for role in &req.principal.roles {
        feed_str(&mut h, role);
    }
    feed_attrs(&mut h, &req.principal.attributes);

    feed_str(&mut h, &req.resource.kind);
    feed_str(&mut h, &req.resource.id);
    feed_attrs(&mut h, &req.resource.attributes);

    let actions: BTreeSet<&str> = req.actions.iter().map(String::as_str).collect();
    feed_len(&mut h, actions.len());
    for a in actions {
        feed_str(&mut h, a);
    }

    match &req.aux_data {
        Some(aux) => {
            h.update([1u8]);
            feed_attrs(&mut h, aux);
        }
        None => h.update([0u8]),
    }

    hex::encode(h.finalize())
}

fn feed_len(h: &mut Sha256, n: usize) {
    h.update((n as u64).to_be_bytes());
}

fn feed_str(h: &mut Sha256, s: &str) {
    feed_len(h, s.len());
    h.update(s.as_bytes());
}

fn feed_opt_str(h: &mut Sha256, s: Option<&str>) {
    match s {
        Some(s) => {
            h.update([1u8]);
            feed_str(h, s);
        }
        None => h.update([0u8]),
    }
}

fn feed_attrs(h: &mut Sha256, attrs: &Attributes) {
    feed_len(h, attrs.len());
    for (k, v) in attrs {
        feed_str(h, k);
        feed_value(h, v);
    }
}

fn feed_value(h: &mut Sha256, v: &Value) {
    match v {
        Value::Null => h.update([0u8]),
        Value::Bool(b) => h.update([1u8, u8::from(*b)]),
        Value::Int(n) => {
            h.update([2u8]);
            h.update(n.to_be_bytes());
        }
        Value::Double(f) => {
            h.update([3u8]);
            h.update(f.to_bits().to_be_bytes());
        }
        Value::String(s) => {
            h.update([4u8]);
            feed_str(h, s);
        }
        Value::List(items) => {
            h.update([5u8]);
            feed_len(h, items.len());
            for item in items {
                feed_value(h, item);
            }
        }
        Value::Map(m) => {
            h.update([6u8]);
            feed_attrs(h, m);
        }
        Value::Timestamp(t) => {
            h.update([7u8]);
            h.update(t.timestamp().to_be_bytes());
            h.update(t.timestamp_subsec_nanos().to_be_bytes());
        }
        Value::Duration(d) => {
            h.update([8u8]);
            h.update(d.num_seconds().to_be_bytes());
            h.update(d.subsec_nanos().to_be_bytes());
        }
    }
}
