//! The rendezvous session store: the in-memory data structure plus the
//! creation / conditional-read / optimistic-write / deletion / eviction
//! semantics described in spec §3–§4.2.

mod id;

pub use id::SessionId;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rand_chacha::ChaCha20Rng;
use time::{Duration, OffsetDateTime};

use crate::clock::Clock;
use crate::etag::EtagGenerator;

pub const DEFAULT_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Tunables from spec §4.2 / §6. All have the spec's stated defaults.
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    pub ttl: Duration,
    pub soft_capacity: usize,
    pub hard_capacity: usize,
    pub max_content_length: usize,
    /// Delay between soft-capacity eviction passes (spec: 1s).
    pub eviction_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::minutes(5),
            soft_capacity: 100,
            hard_capacity: 200,
            max_content_length: 4096,
            eviction_interval: Duration::seconds(1),
        }
    }
}

/// One row in the store (spec §3).
#[derive(Debug, Clone)]
struct SessionRecord {
    content_type: String,
    payload: Vec<u8>,
    etag: String,
    version: u64,
    created_at: OffsetDateTime,
    last_modified_at: OffsetDateTime,
    expires_at: OffsetDateTime,
    /// Position in the last-modified order. Strictly increasing on every
    /// create/update, so the smallest key is always the oldest-modified row.
    order_key: u64,
}

#[derive(Debug, Default)]
struct StoreInner {
    sessions: HashMap<SessionId, SessionRecord>,
    order: BTreeMap<u64, SessionId>,
    next_order_key: u64,
    eviction_scheduled: bool,
}

impl StoreInner {
    fn len(&self) -> usize {
        self.sessions.len()
    }

    fn insert(&mut self, id: SessionId, record: SessionRecord) {
        self.order.insert(record.order_key, id);
        self.sessions.insert(id, record);
    }

    fn remove(&mut self, id: &SessionId) -> Option<SessionRecord> {
        let record = self.sessions.remove(id)?;
        self.order.remove(&record.order_key);
        Some(record)
    }

    fn take_order_key(&mut self) -> u64 {
        let key = self.next_order_key;
        self.next_order_key += 1;
        key
    }

    /// Removes and returns the id of the oldest-by-`last_modified_at` row.
    fn evict_oldest(&mut self) -> Option<SessionId> {
        let (&key, &id) = self.order.iter().next()?;
        self.order.remove(&key);
        self.sessions.remove(&id);
        Some(id)
    }

    fn evict_expired(&mut self, now: OffsetDateTime) -> usize {
        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, record)| record.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();

        let count = expired.len();
        for id in expired {
            self.remove(&id);
        }
        count
    }
}

/// A full session record as returned to the HTTP layer.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub content_type: String,
    pub payload: Vec<u8>,
    pub etag: String,
    pub expires_at: OffsetDateTime,
}

/// What a successful `create` hands back (spec §4.1).
#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub id: SessionId,
    pub etag: String,
    pub expires_at: OffsetDateTime,
}

/// What a successful `update` hands back (spec §4.1).
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub etag: String,
    pub expires_at: OffsetDateTime,
}

/// Outcome of a `get`, distinguishing a full hit from a conditional 304 so
/// the HTTP layer can still attach the `ETag`/`Expires` headers on a 304.
#[derive(Debug, Clone)]
pub enum GetOutcome {
    Hit(SessionView),
    NotModified { etag: String, expires_at: OffsetDateTime },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("session not found")]
    NotFound,
    #[error("if-match precondition required")]
    PreconditionRequired,
    #[error("etag mismatch")]
    ConcurrentWrite,
    #[error("payload exceeds max_content_length")]
    PayloadTooLarge,
}

/// The rendezvous session store (spec component B).
///
/// All mutation happens behind a single [`parking_lot::Mutex`] and the lock
/// is never held across an `.await` point (there is none inside this type —
/// see spec §5), so `create`/`get`/`update`/`delete` are plain synchronous
/// methods even though the store lives inside an async web server.
#[derive(Debug)]
pub struct Store {
    inner: Mutex<StoreInner>,
    config: StoreConfig,
    clock: Arc<dyn Clock>,
    etag_gen: EtagGenerator,
    id_rng: Mutex<ChaCha20Rng>,
    self_weak: Weak<Store>,
}

impl Store {
    pub fn new(config: StoreConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            inner: Mutex::new(StoreInner::default()),
            config,
            clock,
            etag_gen: EtagGenerator::new(),
            id_rng: Mutex::new(id::new_rng()),
            self_weak: weak.clone(),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// spec §4.1 `create`.
    #[tracing::instrument(skip(self, payload), fields(len = payload.len()))]
    pub fn create(
        &self,
        content_type: Option<String>,
        payload: Vec<u8>,
    ) -> Result<CreateOutcome, StoreError> {
        if payload.len() > self.config.max_content_length {
            return Err(StoreError::PayloadTooLarge);
        }

        let mut inner = self.inner.lock();

        if inner.len() >= self.config.hard_capacity {
            tracing::warn!(
                capacity = self.config.hard_capacity,
                "hard capacity reached, evicting synchronously"
            );
            while inner.len() >= self.config.hard_capacity {
                if inner.evict_oldest().is_none() {
                    break;
                }
            }
        }

        let id = self.fresh_id(&inner);
        let now = self.clock.now();
        let etag = self.etag_gen.next_tag(0);

        let record = SessionRecord {
            content_type: content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            payload,
            etag: etag.clone(),
            version: 0,
            created_at: now,
            last_modified_at: now,
            expires_at: now + self.config.ttl,
            order_key: inner.take_order_key(),
        };
        let expires_at = record.expires_at;
        inner.insert(id, record);

        if inner.len() > self.config.soft_capacity && !inner.eviction_scheduled {
            inner.eviction_scheduled = true;
            drop(inner);
            self.schedule_eviction_pass();
        }

        Ok(CreateOutcome { id, etag, expires_at })
    }

    /// spec §4.1 `get`. Reading never refreshes `expires_at`.
    #[tracing::instrument(skip(self))]
    pub fn get(&self, id: SessionId, if_none_match: Option<&str>) -> Result<GetOutcome, StoreError> {
        let mut inner = self.inner.lock();
        let now = self.clock.now();

        let record = match inner.sessions.get(&id) {
            Some(record) if record.expires_at > now => record,
            Some(_) => {
                inner.remove(&id);
                return Err(StoreError::NotFound);
            }
            None => return Err(StoreError::NotFound),
        };

        if if_none_match == Some(record.etag.as_str()) {
            return Ok(GetOutcome::NotModified {
                etag: record.etag.clone(),
                expires_at: record.expires_at,
            });
        }

        Ok(GetOutcome::Hit(SessionView {
            content_type: record.content_type.clone(),
            payload: record.payload.clone(),
            etag: record.etag.clone(),
            expires_at: record.expires_at,
        }))
    }

    /// spec §4.1 `update`. `if_match` is mandatory.
    #[tracing::instrument(skip(self, payload), fields(len = payload.len()))]
    pub fn update(
        &self,
        id: SessionId,
        if_match: Option<&str>,
        content_type: Option<String>,
        payload: Vec<u8>,
    ) -> Result<UpdateOutcome, StoreError> {
        let Some(if_match) = if_match else {
            return Err(StoreError::PreconditionRequired);
        };

        let mut inner = self.inner.lock();
        let now = self.clock.now();

        let expired = matches!(inner.sessions.get(&id), Some(record) if record.expires_at <= now);
        if expired {
            inner.remove(&id);
        }

        let Some(record) = inner.sessions.get(&id) else {
            return Err(StoreError::NotFound);
        };

        if record.etag != if_match {
            return Err(StoreError::ConcurrentWrite);
        }

        if payload.len() > self.config.max_content_length {
            return Err(StoreError::PayloadTooLarge);
        }

        let old_order_key = record.order_key;
        let version = record.version + 1;
        let new_order_key = inner.take_order_key();
        let etag = self.etag_gen.next_tag(version);

        let record = inner.sessions.get_mut(&id).expect("checked above");
        record.content_type = content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        record.payload = payload;
        record.etag = etag.clone();
        record.version = version;
        record.last_modified_at = now;
        record.expires_at = now + self.config.ttl;
        record.order_key = new_order_key;
        let expires_at = record.expires_at;

        inner.order.remove(&old_order_key);
        inner.order.insert(new_order_key, id);

        Ok(UpdateOutcome { etag, expires_at })
    }

    /// spec §4.1 `delete`. Reports whether a live session existed; the HTTP
    /// layer replies 204 either way (spec §4.4, §9 open question).
    #[tracing::instrument(skip(self))]
    pub fn delete(&self, id: SessionId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let now = self.clock.now();

        match inner.sessions.get(&id) {
            Some(record) if record.expires_at > now => {
                inner.remove(&id);
                Ok(())
            }
            Some(_) => {
                inner.remove(&id);
                Err(StoreError::NotFound)
            }
            None => Err(StoreError::NotFound),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }

    fn fresh_id(&self, inner: &StoreInner) -> SessionId {
        let mut rng = self.id_rng.lock();
        loop {
            let candidate = SessionId::generate(&mut rng);
            if !inner.sessions.contains_key(&candidate) {
                return candidate;
            }
            tracing::warn!("session id collision, regenerating");
        }
    }

    fn schedule_eviction_pass(&self) {
        let Some(store) = self.self_weak.upgrade() else {
            return;
        };
        let interval = self.config.eviction_interval;
        self.clock.schedule(
            interval,
            Box::new(move || {
                store.run_eviction_pass();
            }),
        );
    }

    /// The periodic soft-capacity pass (spec §4.2, §9 "scheduled eviction
    /// reentry"): sweep expired rows, then evict oldest-by-modification
    /// until under `soft_capacity`, then either clear the scheduled flag or
    /// reschedule itself.
    #[tracing::instrument(skip(self))]
    fn run_eviction_pass(&self) {
        let mut inner = self.inner.lock();
        let now = self.clock.now();

        let expired = inner.evict_expired(now);
        if expired > 0 {
            tracing::debug!(expired, "eviction pass reaped expired sessions");
        }

        let mut evicted = 0;
        while inner.len() > self.config.soft_capacity {
            if inner.evict_oldest().is_none() {
                break;
            }
            evicted += 1;
        }
        if evicted > 0 {
            tracing::debug!(evicted, "eviction pass trimmed to soft capacity");
        }

        if inner.len() > self.config.soft_capacity {
            drop(inner);
            self.schedule_eviction_pass();
        } else {
            inner.eviction_scheduled = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    fn store_with(config: StoreConfig) -> (Arc<Store>, FakeClock) {
        let clock = FakeClock::new(OffsetDateTime::UNIX_EPOCH);
        let store = Store::new(config, Arc::new(clock.clone()));
        (store, clock)
    }

    #[test]
    fn create_then_get_round_trips_payload() {
        let (store, _clock) = store_with(StoreConfig::default());

        let created = store
            .create(Some("text/plain".into()), b"foo=bar".to_vec())
            .unwrap();

        let GetOutcome::Hit(view) = store.get(created.id, None).unwrap() else {
            panic!("expected a hit");
        };

        assert_eq!(view.payload, b"foo=bar");
        assert_eq!(view.content_type, "text/plain");
        assert_eq!(view.etag, created.etag);
    }

    #[test]
    fn create_defaults_content_type() {
        let (store, _clock) = store_with(StoreConfig::default());
        let created = store.create(None, b"a=b".to_vec()).unwrap();
        let GetOutcome::Hit(view) = store.get(created.id, None).unwrap() else {
            panic!("expected a hit");
        };
        assert_eq!(view.content_type, DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let (store, _clock) = store_with(StoreConfig {
            max_content_length: 4,
            ..StoreConfig::default()
        });

        let err = store.create(None, b"too big".to_vec()).unwrap_err();
        assert_eq!(err, StoreError::PayloadTooLarge);
    }

    #[test]
    fn get_with_matching_if_none_match_is_not_modified() {
        let (store, _clock) = store_with(StoreConfig::default());
        let created = store.create(None, b"a".to_vec()).unwrap();

        let outcome = store.get(created.id, Some(created.etag.as_str())).unwrap();
        assert!(matches!(outcome, GetOutcome::NotModified { .. }));
    }

    #[test]
    fn get_missing_session_is_not_found() {
        let (store, _clock) = store_with(StoreConfig::default());
        let mut rng = super::id::new_rng();
        let bogus = SessionId::generate(&mut rng);
        assert_eq!(store.get(bogus, None).unwrap_err(), StoreError::NotFound);
    }

    #[test]
    fn update_requires_if_match() {
        let (store, _clock) = store_with(StoreConfig::default());
        let created = store.create(None, b"a".to_vec()).unwrap();

        let err = store.update(created.id, None, None, b"b".to_vec()).unwrap_err();
        assert_eq!(err, StoreError::PreconditionRequired);
    }

    #[test]
    fn update_with_stale_etag_is_concurrent_write() {
        let (store, _clock) = store_with(StoreConfig::default());
        let created = store.create(None, b"a".to_vec()).unwrap();

        store
            .update(created.id, Some(created.etag.as_str()), None, b"b".to_vec())
            .unwrap();

        let err = store
            .update(created.id, Some(created.etag.as_str()), None, b"c".to_vec())
            .unwrap_err();
        assert_eq!(err, StoreError::ConcurrentWrite);
    }

    #[test]
    fn successful_update_changes_etag_and_body() {
        let (store, _clock) = store_with(StoreConfig::default());
        let created = store.create(None, b"foo=bar".to_vec()).unwrap();

        let updated = store
            .update(
                created.id,
                Some(created.etag.as_str()),
                Some("text/plain".into()),
                b"foo=baz".to_vec(),
            )
            .unwrap();

        assert_ne!(updated.etag, created.etag);

        let GetOutcome::Hit(view) = store.get(created.id, None).unwrap() else {
            panic!("expected a hit");
        };
        assert_eq!(view.payload, b"foo=baz");
        assert_eq!(view.content_type, "text/plain");
        assert_eq!(view.etag, updated.etag);
    }

    #[test]
    fn delete_then_get_is_not_found() {
        let (store, _clock) = store_with(StoreConfig::default());
        let created = store.create(None, b"a".to_vec()).unwrap();

        store.delete(created.id).unwrap();
        assert_eq!(store.get(created.id, None).unwrap_err(), StoreError::NotFound);
    }

    #[test]
    fn delete_of_absent_session_reports_not_found() {
        let (store, _clock) = store_with(StoreConfig::default());
        let mut rng = super::id::new_rng();
        let bogus = SessionId::generate(&mut rng);
        assert_eq!(store.delete(bogus).unwrap_err(), StoreError::NotFound);
    }

    #[test]
    fn ttl_expiry_makes_session_unreachable() {
        let (store, clock) = store_with(StoreConfig {
            ttl: Duration::minutes(5),
            ..StoreConfig::default()
        });

        let created = store.create(None, b"a".to_vec()).unwrap();
        clock.advance(Duration::minutes(5));

        assert_eq!(store.get(created.id, None).unwrap_err(), StoreError::NotFound);
    }

    #[test]
    fn hard_capacity_evicts_synchronously() {
        let (store, _clock) = store_with(StoreConfig {
            hard_capacity: 3,
            soft_capacity: 3,
            ..StoreConfig::default()
        });

        let first = store.create(None, b"a".to_vec()).unwrap();
        store.create(None, b"b".to_vec()).unwrap();
        store.create(None, b"c".to_vec()).unwrap();
        // Exceeds hard_capacity; must evict `first` synchronously before insert.
        store.create(None, b"d".to_vec()).unwrap();

        assert!(store.len() <= 3);
        assert_eq!(store.get(first.id, None).unwrap_err(), StoreError::NotFound);
    }

    #[test]
    fn soft_capacity_defers_eviction_to_scheduled_pass() {
        let (store, clock) = store_with(StoreConfig {
            soft_capacity: 1,
            hard_capacity: 200,
            eviction_interval: Duration::seconds(1),
            ..StoreConfig::default()
        });

        let first = store.create(None, b"a".to_vec()).unwrap();
        store.create(None, b"b".to_vec()).unwrap();

        // Not evicted yet: only a pass is scheduled, not run.
        assert!(store.get(first.id, None).is_ok());

        clock.advance(Duration::seconds(1));

        assert_eq!(store.get(first.id, None).unwrap_err(), StoreError::NotFound);
    }
}
