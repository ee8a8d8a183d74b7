//! Generic replication primitives: an append-only event log behind a
//! canonical store, a server exposing `updates(since_seq)` with a freshness
//! lease, and a replica that polls it.
//!
//! Everything here is generic over `T: Keyed` so the same machinery backs
//! both the party/site registry (`RegisteredObject`) and a site's policy
//! server (`policy::Rule`, keyed by its own canonical rendering) — "rule
//! replication analogous to the registry".

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::error::RegistryError;

/// Anything that can live in a [`ReplicableArchive`] needs a stable string
/// key, used to detect duplicates and to apply deletes.
pub trait Keyed: Clone + Send + Sync + 'static {
    fn key(&self) -> String;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Insert,
    Delete,
}

/// One entry in the replication log: a monotonic `seq`, an operation, and
/// the object it applies to (the object itself, even for deletes, so a
/// replica never needs a side-channel to know what was removed).
///
/// Serializable so a [`ReplicationServer`] can be exposed directly behind a
/// `GET /updates?since={seq}` handler.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event<T> {
    pub seq: u64,
    pub op: Op,
    pub object: T,
}

/// Append-only log of [`Event`]s. Never mutates or removes a past event —
/// deletions are themselves new events.
pub struct ReplicableArchive<T> {
    events: Vec<Event<T>>,
    next_seq: u64,
}

impl<T: Clone> ReplicableArchive<T> {
    pub fn new() -> Self { Self { events: Vec::new(), next_seq: 0 } }

    fn push(&mut self, op: Op, object: T) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.events.push(Event { seq, op, object });
        seq
    }

    /// Every event with `seq >= since_seq`, plus the seq a subsequent call
    /// should pass to pick up where this one left off.
    fn since(&self, since_seq: u64) -> (Vec<Event<T>>, u64) {
        let events: Vec<Event<T>> = self.events.iter().filter(|e| e.seq >= since_seq).cloned().collect();
        (events, self.next_seq)
    }
}

impl<T: Clone> Default for ReplicableArchive<T> {
    fn default() -> Self { Self::new() }
}

/// The canonical, authoritative set of `T`s. The only mutator; every replica
/// is downstream of this through a [`ReplicationServer`].
pub struct CanonicalStore<T: Keyed> {
    archive: Arc<Mutex<ReplicableArchive<T>>>,
    objects: Arc<RwLock<BTreeMap<String, T>>>,
    /// Every key ever inserted, including ones since deregistered — a
    /// deregistered (id, kind) pair is never reused within the same run
    ///.
    ever_used: Arc<RwLock<BTreeSet<String>>>,
    lease: Duration,
}

impl<T: Keyed> CanonicalStore<T> {
    pub fn new(lease: Duration) -> Self {
        Self {
            archive: Arc::new(Mutex::new(ReplicableArchive::new())),
            objects: Arc::new(RwLock::new(BTreeMap::new())),
            ever_used: Arc::new(RwLock::new(BTreeSet::new())),
            lease,
        }
    }

    pub async fn insert(&self, object: T) -> Result<u64, RegistryError> {
        let key = object.key();
        let mut ever_used = self.ever_used.write().await;
        if !ever_used.insert(key.clone()) {
            return Err(RegistryError::DuplicateId(key));
        }
        let mut objects = self.objects.write().await;
        let mut archive = self.archive.lock().await;
        let seq = archive.push(Op::Insert, object.clone());
        objects.insert(key.clone(), object);
        debug!("registry: inserted '{key}' at seq {seq}");
        Ok(seq)
    }

    pub async fn delete(&self, key: &str) -> Result<u64, RegistryError> {
        let mut objects = self.objects.write().await;
        let object = objects.remove(key).ok_or_else(|| RegistryError::UnknownKey(key.to_string()))?;
        let mut archive = self.archive.lock().await;
        let seq = archive.push(Op::Delete, object);
        debug!("registry: deleted '{key}' at seq {seq}");
        Ok(seq)
    }

    pub async fn get(&self, key: &str) -> Option<T> { self.objects.read().await.get(key).cloned() }

    pub async fn objects(&self) -> Vec<T> { self.objects.read().await.values().cloned().collect() }

    pub fn replication_server(&self) -> ReplicationServer<T> { ReplicationServer { archive: self.archive.clone(), lease: self.lease } }
}

/// Exposes `updates(since_seq)` with a freshness lease.
pub struct ReplicationServer<T> {
    archive: Arc<Mutex<ReplicableArchive<T>>>,
    lease: Duration,
}

impl<T: Clone> ReplicationServer<T> {
    pub async fn updates(&self, since_seq: u64) -> (Vec<Event<T>>, u64, DateTime<Utc>) {
        let archive = self.archive.lock().await;
        let (events, new_since_seq) = archive.since(since_seq);
        (events, new_since_seq, Utc::now() + self.lease)
    }
}

/// The JSON shape of a `GET /updates?since={seq}` response.
#[derive(Serialize, Deserialize)]
pub struct UpdatesResponse<T> {
    pub events: Vec<Event<T>>,
    pub since: u64,
    pub lease_valid_until: DateTime<Utc>,
}

impl<T: Clone> From<(Vec<Event<T>>, u64, DateTime<Utc>)> for UpdatesResponse<T> {
    fn from((events, since, lease_valid_until): (Vec<Event<T>>, u64, DateTime<Utc>)) -> Self { Self { events, since, lease_valid_until } }
}

/// Anything a [`Replica`] can poll for updates — implemented directly by
/// [`ReplicationServer`] for same-process use, and by a REST client wrapper
/// outside this crate's scope for cross-site replication.
#[async_trait]
pub trait UpdateSource<T>: Send + Sync {
    async fn updates(&self, since_seq: u64) -> Result<(Vec<Event<T>>, u64, DateTime<Utc>), RegistryError>;
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> UpdateSource<T> for ReplicationServer<T> {
    async fn updates(&self, since_seq: u64) -> Result<(Vec<Event<T>>, u64, DateTime<Utc>), RegistryError> { Ok(self.updates(since_seq).await) }
}

type Callback<T> = Box<dyn Fn(&[T], &[T]) + Send + Sync>;

/// A local, eventually-consistent mirror of a canonical set.
pub struct Replica<T: Keyed> {
    source: Arc<dyn UpdateSource<T>>,
    objects: RwLock<BTreeMap<String, T>>,
    last_seq: Mutex<u64>,
    lease_expiry: Mutex<DateTime<Utc>>,
    callbacks: Mutex<Vec<Callback<T>>>,
}

impl<T: Keyed> Replica<T> {
    pub fn new(source: Arc<dyn UpdateSource<T>>) -> Self {
        Self {
            source,
            objects: RwLock::new(BTreeMap::new()),
            last_seq: Mutex::new(0),
            // Already expired, so the first `update()` always fetches.
            lease_expiry: Mutex::new(Utc::now() - Duration::seconds(1)),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Refreshes this replica if its lease has expired, returning the
    /// `(created, deleted)` delta (empty if the lease was still live).
    pub async fn update(&self) -> Result<(Vec<T>, Vec<T>), RegistryError> {
        {
            let expiry = self.lease_expiry.lock().await;
            if Utc::now() < *expiry {
                trace!("registry replica: lease still live, skipping poll");
                return Ok((Vec::new(), Vec::new()));
            }
        }

        let since = *self.last_seq.lock().await;
        let (events, new_since_seq, valid_until) = self.source.updates(since).await?;

        let mut created = Vec::new();
        let mut deleted = Vec::new();
        {
            let mut objects = self.objects.write().await;
            for event in events {
                match event.op {
                    Op::Insert => {
                        objects.insert(event.object.key(), event.object.clone());
                        created.push(event.object);
                    },
                    Op::Delete => {
                        objects.remove(&event.object.key());
                        deleted.push(event.object);
                    },
                }
            }
        }
        *self.last_seq.lock().await = new_since_seq;
        *self.lease_expiry.lock().await = valid_until;

        if !created.is_empty() || !deleted.is_empty() {
            debug!("registry replica: {} created, {} deleted", created.len(), deleted.len());
            let callbacks = self.callbacks.lock().await;
            for cb in callbacks.iter() {
                cb(&created, &deleted);
            }
        }
        Ok((created, deleted))
    }

    /// Registers `callback`, immediately invoking it with every object this
    /// replica currently holds.
    pub async fn on_update(&self, callback: impl Fn(&[T], &[T]) + Send + Sync + 'static) {
        let current: Vec<T> = self.objects.read().await.values().cloned().collect();
        callback(&current, &[]);
        self.callbacks.lock().await.push(Box::new(callback));
    }

    pub async fn objects(&self) -> Vec<T> { self.objects.read().await.values().cloned().collect() }

    pub async fn get(&self, key: &str) -> Option<T> { self.objects.read().await.get(key).cloned() }
}
