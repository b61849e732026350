//! Scripted source adapters and stores for engine-level integration tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use harvester_core::source::{KindSupport, SourceKind, SourcePolicy};
use harvester_core::store::Result as StoreResult;
use harvester_core::{
    Identifier, MetadataRecord, PartialRecord, ProbeStatus, RateLimit, RecordStore, SourceAdapter,
    SourceError, StoreError, WantedFields,
};
use harvester_core::store::StoreDbErrorKind;
use tokio::sync::Mutex;

/// What a [`ScriptedSource`] answers for one identifier.
#[derive(Debug, Clone)]
pub enum Reply {
    Found(PartialRecord),
    Fail,
}

/// Source whose answers are fixed per identifier value; counts fetches and probes.
pub struct ScriptedSource {
    policy: SourcePolicy,
    replies: HashMap<String, Reply>,
    status: ProbeStatus,
    fetches: AtomicUsize,
    probes: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(name: &str, supports: KindSupport) -> Self {
        Self {
            policy: SourcePolicy {
                name: name.to_string(),
                kind: SourceKind::Api,
                supports,
                rate_limit: RateLimit::default(),
                timeout: Duration::from_secs(1),
            },
            replies: HashMap::new(),
            status: ProbeStatus::Reachable,
            fetches: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
        }
    }

    pub fn reply(mut self, identifier: &str, reply: Reply) -> Self {
        self.replies.insert(identifier.to_string(), reply);
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.status = ProbeStatus::Unreachable;
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl SourceAdapter for ScriptedSource {
    fn policy(&self) -> &SourcePolicy {
        &self.policy
    }

    async fn fetch(
        &self,
        identifier: &Identifier,
        _wanted: &WantedFields,
    ) -> Result<PartialRecord, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match self.replies.get(identifier.value()) {
            Some(Reply::Found(partial)) => Ok(partial.clone()),
            Some(Reply::Fail) => Err(SourceError::transient(&self.policy.name, "connection reset")),
            None => Ok(PartialRecord::new()),
        }
    }

    async fn probe_status(&self, _sample: &Identifier) -> ProbeStatus {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.status
    }
}

/// Casts concrete stubs into the adapter list the engine takes.
pub fn adapters(sources: &[&Arc<ScriptedSource>]) -> Vec<Arc<dyn SourceAdapter>> {
    sources
        .iter()
        .map(|source| Arc::clone(source) as Arc<dyn SourceAdapter>)
        .collect()
}

/// In-memory store whose writes can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    records: Mutex<HashMap<Identifier, MetadataRecord>>,
    fail_writes: bool,
}

impl FlakyStore {
    pub fn failing_writes() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn has(&self, identifier: &Identifier) -> StoreResult<bool> {
        Ok(self.records.lock().await.contains_key(identifier))
    }

    async fn get(&self, identifier: &Identifier) -> StoreResult<Option<MetadataRecord>> {
        Ok(self.records.lock().await.get(identifier).cloned())
    }

    async fn upsert(&self, identifier: &Identifier, record: &MetadataRecord) -> StoreResult<()> {
        if self.fail_writes {
            return Err(StoreError::Database {
                kind: StoreDbErrorKind::BusyOrLocked,
                message: "database is locked".to_string(),
            });
        }
        self.records
            .lock()
            .await
            .insert(identifier.clone(), record.clone());
        Ok(())
    }
}
