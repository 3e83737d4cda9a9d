use crate::clock::Clock;
use crate::error::MonitorError;
use crate::state::{
    CreateServerRequest, Platform, ServerFilter, ServerPatch, ServerRecord, ServerStatistics,
    ServerStatus,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerPage {
    pub items: Vec<ServerRecord>,
    pub total: usize,
    pub page: u32,
    pub page_size: u32,
}

#[async_trait]
pub trait ServerRegistry: Send + Sync {
    async fn list(&self, filter: &ServerFilter) -> Result<ServerPage, MonitorError>;
    async fn all(&self) -> Result<Vec<ServerRecord>, MonitorError>;
    async fn get(&self, id: u64) -> Result<Option<ServerRecord>, MonitorError>;
    async fn insert(&self, request: CreateServerRequest) -> Result<ServerRecord, MonitorError>;
    /// Applies `patch` atomically; `Ok(None)` when the id is unknown.
    async fn update(&self, id: u64, patch: ServerPatch)
        -> Result<Option<ServerRecord>, MonitorError>;
    async fn delete(&self, id: u64) -> Result<bool, MonitorError>;
    async fn statistics(&self) -> Result<ServerStatistics, MonitorError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    next_id: u64,
    servers: Vec<ServerRecord>,
}

struct Inner {
    next_id: u64,
    servers: BTreeMap<u64, ServerRecord>,
    /// Bumped on every mutation, including rollbacks.
    generation: u64,
}

impl Inner {
    fn bump(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            next_id: self.next_id,
            servers: self.servers.values().cloned().collect(),
        }
    }
}

struct SnapshotFile {
    path: PathBuf,
    /// Generation of the newest state known to be on disk. Held for the
    /// whole write so snapshots reach the file in generation order.
    written: Mutex<u64>,
}

/// In-memory registry, optionally mirrored to a JSON snapshot file.
///
/// Mutations are applied under a short write lock; the file is rewritten
/// afterwards without holding it. A failed write rolls the mutation back.
pub struct MemoryRegistry {
    inner: RwLock<Inner>,
    clock: Arc<dyn Clock>,
    default_platform: Platform,
    snapshot: Option<SnapshotFile>,
}

impl MemoryRegistry {
    pub fn new(clock: Arc<dyn Clock>, default_platform: Platform) -> Self {
        Self {
            inner: RwLock::new(Inner {
                next_id: 1,
                servers: BTreeMap::new(),
                generation: 0,
            }),
            clock,
            default_platform,
            snapshot: None,
        }
    }

    /// Loads the snapshot at `path` if it exists; later mutations are written back to it.
    pub async fn open(
        path: impl AsRef<Path>,
        clock: Arc<dyn Clock>,
        default_platform: Platform,
    ) -> Result<Self, MonitorError> {
        let path = path.as_ref().to_path_buf();
        let snapshot = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Snapshot>(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
            Err(err) => return Err(err.into()),
        };

        let mut servers = BTreeMap::new();
        for mut record in snapshot.servers {
            // a check cannot survive a restart
            if record.status == ServerStatus::Checking {
                record.status = ServerStatus::Unknown;
            }
            servers.insert(record.id, record);
        }
        let max_id = servers.keys().next_back().copied().unwrap_or(0);
        let next_id = snapshot.next_id.max(max_id + 1);
        info!(path = %path.display(), servers = servers.len(), "реестр серверов загружен");

        Ok(Self {
            inner: RwLock::new(Inner {
                next_id,
                servers,
                generation: 0,
            }),
            clock,
            default_platform,
            snapshot: Some(SnapshotFile {
                path,
                written: Mutex::new(0),
            }),
        })
    }

    /// Makes the state at `generation` durable. A newer snapshot written by a
    /// concurrent mutation already covers it. On failure `rollback` undoes the
    /// caller's mutation before any later snapshot can include it.
    async fn persist<F>(&self, generation: u64, rollback: F) -> Result<(), MonitorError>
    where
        F: FnOnce(&mut Inner) + Send,
    {
        let Some(file) = &self.snapshot else {
            return Ok(());
        };
        let mut written = file.written.lock().await;
        if *written >= generation {
            return Ok(());
        }

        let (latest, snapshot) = {
            let inner = self.inner.read().await;
            (inner.generation, inner.snapshot())
        };
        match write_snapshot(&file.path, &snapshot).await {
            Ok(()) => {
                *written = latest;
                Ok(())
            }
            Err(err) => {
                warn!(
                    path = %file.path.display(),
                    error = %err,
                    "не удалось сохранить реестр, изменение отменено"
                );
                let mut inner = self.inner.write().await;
                rollback(&mut inner);
                inner.bump();
                Err(err)
            }
        }
    }
}

async fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), MonitorError> {
    let bytes = serde_json::to_vec_pretty(snapshot)?;
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "servers.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

#[async_trait]
impl ServerRegistry for MemoryRegistry {
    async fn list(&self, filter: &ServerFilter) -> Result<ServerPage, MonitorError> {
        let inner = self.inner.read().await;
        let mut matched: Vec<&ServerRecord> = inner
            .servers
            .values()
            .filter(|record| filter.matches(record))
            .collect();
        matched.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then(a.id.cmp(&b.id))
        });

        Ok(ServerPage {
            total: matched.len(),
            items: matched
                .into_iter()
                .skip(filter.offset())
                .take(filter.limit())
                .cloned()
                .collect(),
            page: filter.page.max(1),
            page_size: filter.page_size.max(1),
        })
    }

    async fn all(&self) -> Result<Vec<ServerRecord>, MonitorError> {
        let inner = self.inner.read().await;
        Ok(inner.servers.values().cloned().collect())
    }

    async fn get(&self, id: u64) -> Result<Option<ServerRecord>, MonitorError> {
        let inner = self.inner.read().await;
        Ok(inner.servers.get(&id).cloned())
    }

    async fn insert(&self, request: CreateServerRequest) -> Result<ServerRecord, MonitorError> {
        request.validate()?;
        let (record, generation) = {
            let mut inner = self.inner.write().await;
            let id = inner.next_id;
            inner.next_id += 1;
            let record = ServerRecord::from_request(
                id,
                request,
                self.default_platform,
                self.clock.now_unix(),
            );
            inner.servers.insert(id, record.clone());
            (record, inner.bump())
        };

        let id = record.id;
        self.persist(generation, move |inner| {
            inner.servers.remove(&id);
            if inner.next_id == id + 1 {
                inner.next_id = id;
            }
        })
        .await?;
        Ok(record)
    }

    async fn update(
        &self,
        id: u64,
        patch: ServerPatch,
    ) -> Result<Option<ServerRecord>, MonitorError> {
        let now = self.clock.now_unix();
        let (previous, updated, generation) = {
            let mut inner = self.inner.write().await;
            let Some(record) = inner.servers.get_mut(&id) else {
                return Ok(None);
            };
            let previous = record.clone();
            record.apply(patch, now);
            let updated = record.clone();
            (previous, updated, inner.bump())
        };

        let applied = updated.clone();
        self.persist(generation, move |inner| {
            // a later mutation of the same record wins over the rollback
            if inner.servers.get(&id) == Some(&applied) {
                inner.servers.insert(id, previous);
            }
        })
        .await?;
        Ok(Some(updated))
    }

    async fn delete(&self, id: u64) -> Result<bool, MonitorError> {
        let (removed, generation) = {
            let mut inner = self.inner.write().await;
            let Some(removed) = inner.servers.remove(&id) else {
                return Ok(false);
            };
            (removed, inner.bump())
        };

        self.persist(generation, move |inner| {
            inner.servers.entry(id).or_insert(removed);
        })
        .await?;
        Ok(true)
    }

    async fn statistics(&self) -> Result<ServerStatistics, MonitorError> {
        let inner = self.inner.read().await;
        Ok(ServerStatistics::from_records(inner.servers.values()))
    }
}
