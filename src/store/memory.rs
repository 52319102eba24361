use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{QueueError, Result};
use crate::queue::{CounterKind, Desk, SystemSettings, Token};
use crate::store::{DeskQuery, Store, TokenQuery, Write, WriteBatch};

const DEFAULT_MAX_TOKENS: usize = 100_000;

#[derive(Debug, Clone, Default)]
struct Tables {
    tokens: HashMap<Uuid, Token>,
    desks: HashMap<Uuid, Desk>,
    token_counter: u64,
    desk_counter: u64,
    settings: SystemSettings,
}

/// On-disk form of [`Tables`].
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    token_counter: u64,
    desk_counter: u64,
    settings: SystemSettings,
    tokens: Vec<Token>,
    desks: Vec<Desk>,
}

impl From<&Tables> for Snapshot {
    fn from(tables: &Tables) -> Self {
        let mut tokens: Vec<Token> = tables.tokens.values().cloned().collect();
        tokens.sort_by_key(|t| t.token_number);
        let mut desks: Vec<Desk> = tables.desks.values().cloned().collect();
        desks.sort_by_key(|d| d.desk_number);
        Self {
            token_counter: tables.token_counter,
            desk_counter: tables.desk_counter,
            settings: tables.settings.clone(),
            tokens,
            desks,
        }
    }
}

impl From<Snapshot> for Tables {
    fn from(snap: Snapshot) -> Self {
        Self {
            tokens: snap.tokens.into_iter().map(|t| (t.id, t)).collect(),
            desks: snap.desks.into_iter().map(|d| (d.id, d)).collect(),
            token_counter: snap.token_counter,
            desk_counter: snap.desk_counter,
            settings: snap.settings,
        }
    }
}

/// Store that keeps every table behind a single lock.
///
/// The token limit counts only tokens that are still in play; paid and
/// cancelled rows stay until they are purged.
///
/// Holding the write lock for the whole of a mutation is what makes counter
/// increments and batch commits atomic. When opened with a path, each
/// mutation is written to a JSON snapshot (temp file + rename) before it
/// becomes visible, so a failed write leaves both memory and disk unchanged.
#[derive(Debug)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    snapshot_path: Option<PathBuf>,
    max_tokens: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_TOKENS)
    }

    pub fn with_capacity(max_tokens: usize) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            snapshot_path: None,
            max_tokens,
        }
    }

    /// Open a store backed by the snapshot at `path`, loading it if it exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let tables = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
                tracing::info!(
                    path = %path.display(),
                    tokens = snapshot.tokens.len(),
                    desks = snapshot.desks.len(),
                    "Loaded store snapshot"
                );
                Tables::from(snapshot)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No snapshot found, starting empty");
                Tables::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            tables: RwLock::new(tables),
            snapshot_path: Some(path),
            max_tokens: DEFAULT_MAX_TOKENS,
        })
    }

    pub async fn token_count(&self) -> usize {
        self.tables.read().await.tokens.len()
    }

    pub async fn desk_count(&self) -> usize {
        self.tables.read().await.desks.len()
    }

    /// Run `f` against the tables under the write lock, persisting the result.
    async fn mutate<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Tables) -> Result<R> + Send,
        R: Send,
    {
        let mut guard = self.tables.write().await;
        match &self.snapshot_path {
            None => f(&mut *guard),
            Some(path) => {
                let mut next = guard.clone();
                let out = f(&mut next)?;
                write_snapshot(path, &next).await?;
                *guard = next;
                Ok(out)
            }
        }
    }
}

async fn write_snapshot(path: &Path, tables: &Tables) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(&Snapshot::from(tables))?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Check every expected version before anything is applied.
fn validate_batch(tables: &Tables, writes: &[Write]) -> Result<()> {
    let mut seen = HashSet::new();
    for write in writes {
        let (kind, id, expected) = match write {
            Write::PutToken(t) => ("token", t.id, t.version),
            Write::PutDesk(d) => ("desk", d.id, d.version),
            Write::DeleteToken {
                id,
                expected_version,
            } => ("token", *id, *expected_version),
        };
        let current = if kind == "desk" {
            tables.desks.get(&id).map(|d| d.version)
        } else {
            tables.tokens.get(&id).map(|t| t.version)
        };

        if !seen.insert(id) {
            return Err(QueueError::Store(format!("batch writes {} {} twice", kind, id)));
        }

        match current {
            Some(v) if v == expected => {}
            Some(v) => {
                return Err(QueueError::Conflict(format!(
                    "{} {} is at version {}, expected {}",
                    kind, id, v, expected
                )))
            }
            None => {
                return Err(QueueError::Conflict(format!(
                    "{} {} no longer exists",
                    kind, id
                )))
            }
        }
    }
    Ok(())
}

#[async_trait]
impl Store for MemoryStore {
    async fn next_number(&self, counter: CounterKind) -> Result<u64> {
        self.mutate(|tables| {
            let slot = match counter {
                CounterKind::Token => &mut tables.token_counter,
                CounterKind::Desk => &mut tables.desk_counter,
            };
            *slot += 1;
            Ok(*slot)
        })
        .await
    }

    async fn insert_token(&self, token: Token) -> Result<Token> {
        let max_tokens = self.max_tokens;
        self.mutate(move |tables| {
            let open = tables
                .tokens
                .values()
                .filter(|t| !t.status.is_terminal())
                .count();
            if open >= max_tokens {
                return Err(QueueError::QueueFull(max_tokens));
            }
            if tables.tokens.contains_key(&token.id)
                || tables
                    .tokens
                    .values()
                    .any(|t| t.token_number == token.token_number)
            {
                return Err(QueueError::Conflict(format!(
                    "token number {} already exists",
                    token.token_number
                )));
            }
            tables.tokens.insert(token.id, token.clone());
            Ok(token)
        })
        .await
    }

    async fn insert_desk(&self, desk: Desk) -> Result<Desk> {
        self.mutate(move |tables| {
            if tables.desks.contains_key(&desk.id)
                || tables
                    .desks
                    .values()
                    .any(|d| d.desk_number == desk.desk_number)
            {
                return Err(QueueError::Conflict(format!(
                    "desk number {} already exists",
                    desk.desk_number
                )));
            }
            tables.desks.insert(desk.id, desk.clone());
            Ok(desk)
        })
        .await
    }

    async fn get_token(&self, id: Uuid) -> Result<Option<Token>> {
        Ok(self.tables.read().await.tokens.get(&id).cloned())
    }

    async fn get_desk(&self, id: Uuid) -> Result<Option<Desk>> {
        Ok(self.tables.read().await.desks.get(&id).cloned())
    }

    async fn list_tokens(&self, query: &TokenQuery) -> Result<Vec<Token>> {
        let tables = self.tables.read().await;
        let mut tokens: Vec<Token> = tables
            .tokens
            .values()
            .filter(|t| query.matches(t))
            .cloned()
            .collect();
        tokens.sort_by_key(|t| t.queue_key());
        if let Some(limit) = query.limit {
            tokens.truncate(limit);
        }
        Ok(tokens)
    }

    async fn list_desks(&self, query: &DeskQuery) -> Result<Vec<Desk>> {
        let tables = self.tables.read().await;
        let mut desks: Vec<Desk> = tables
            .desks
            .values()
            .filter(|d| query.matches(d))
            .cloned()
            .collect();
        desks.sort_by_key(|d| d.desk_number);
        if let Some(limit) = query.limit {
            desks.truncate(limit);
        }
        Ok(desks)
    }

    async fn settings(&self) -> Result<SystemSettings> {
        Ok(self.tables.read().await.settings.clone())
    }

    async fn put_settings(&self, settings: SystemSettings) -> Result<SystemSettings> {
        self.mutate(move |tables| {
            tables.settings = settings.clone();
            Ok(settings)
        })
        .await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.mutate(move |tables| {
            validate_batch(tables, batch.writes())?;
            for write in batch.into_writes() {
                match write {
                    Write::PutToken(mut token) => {
                        token.version += 1;
                        tables.tokens.insert(token.id, token);
                    }
                    Write::PutDesk(mut desk) => {
                        desk.version += 1;
                        tables.desks.insert(desk.id, desk);
                    }
                    Write::DeleteToken { id, .. } => {
                        tables.tokens.remove(&id);
                    }
                }
            }
            Ok(())
        })
        .await
    }
}
