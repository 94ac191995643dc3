//! Position persistence
//!
//! [`PositionStore`] is the find/create/update contract every engine works
//! against. Uniqueness on the pair address is enforced by `create` and is
//! the authoritative guard against double entry.
//!
//! The bot and the operator's `dump` command may run at the same time
//! against one file; every access goes through an advisory file lock.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use alloy::primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::model::{Position, PositionUpdate};
use crate::error::{Error, Result};

#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn find_by_pair(&self, pair: Address) -> Result<Option<Position>>;

    /// Insert a new record; `Error::PositionExists` if the pair is taken
    async fn create(&self, position: Position) -> Result<Position>;

    /// Apply a partial update, returning the stored record
    async fn update(&self, pair: Address, update: PositionUpdate) -> Result<Position>;

    /// Open positions last checked at or before `cutoff`
    async fn open_positions_due(&self, cutoff: DateTime<Utc>) -> Result<Vec<Position>>;

    /// Open positions still holding tokens
    async fn open_positions_with_tokens(&self) -> Result<Vec<Position>>;

    async fn all(&self) -> Result<Vec<Position>>;
}

type Records = HashMap<Address, Position>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Shared,
    Exclusive,
}

enum Backing {
    Memory(Mutex<Records>),
    /// JSON array on disk, guarded by an advisory lock on `<path>.lock`
    File(PathBuf),
}

/// Store backed by a JSON file shared between processes.
///
/// Every operation reloads the file under the lock, so a `dump` run next to
/// a live `start` never has its writes overwritten.
pub struct JsonPositionStore {
    backing: Backing,
}

impl JsonPositionStore {
    /// Store without a backing file
    pub fn in_memory() -> Self {
        Self {
            backing: Backing::Memory(Mutex::new(HashMap::new())),
        }
    }

    /// Open the store at `path`; a missing file reads as empty
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let store = Self {
            backing: Backing::File(path.clone()),
        };

        let count = store
            .transact(Access::Shared, |records| Ok(records.len()))
            .await?;
        info!("Loaded {} positions from {}", count, path.display());

        Ok(store)
    }

    /// Create an empty store file; `false` if one already exists
    pub async fn init(path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(false);
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::PositionPersistence(e.to_string()))?;
        }
        tokio::fs::write(path, "[]")
            .await
            .map_err(|e| Error::PositionPersistence(e.to_string()))?;

        Ok(true)
    }

    /// Run `op` against the current records. File-backed stores reload them
    /// under the file lock and write them back after a successful exclusive op.
    async fn transact<R, F>(&self, access: Access, op: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Records) -> Result<R> + Send + 'static,
    {
        match &self.backing {
            Backing::Memory(records) => op(&mut *records.lock().await),
            Backing::File(path) => {
                let path = path.clone();
                tokio::task::spawn_blocking(move || locked_transaction(&path, access, op))
                    .await
                    .map_err(|e| Error::Internal(format!("position store task failed: {}", e)))?
            }
        }
    }

    async fn select(&self, keep: impl Fn(&Position) -> bool + Send + 'static) -> Result<Vec<Position>> {
        self.transact(Access::Shared, move |records| {
            let mut selected: Vec<Position> = records.values().filter(|p| keep(p)).cloned().collect();
            selected.sort_by_key(|p| p.created_at);
            Ok(selected)
        })
        .await
    }
}

fn persistence_error(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::PositionPersistence(format!("{}: {}", path.display(), e))
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

fn locked_transaction<R>(
    path: &Path,
    access: Access,
    op: impl FnOnce(&mut Records) -> Result<R>,
) -> Result<R> {
    let lock_file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(lock_path(path))
        .map_err(|e| persistence_error(path, e))?;

    match access {
        Access::Shared => FileExt::lock_shared(&lock_file),
        Access::Exclusive => FileExt::lock_exclusive(&lock_file),
    }
    .map_err(|e| persistence_error(path, e))?;

    // released when `lock_file` is dropped
    let mut records = load(path)?;
    let result = op(&mut records)?;
    if access == Access::Exclusive {
        save(path, &records)?;
    }

    Ok(result)
}

fn load(path: &Path) -> Result<Records> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(persistence_error(path, e)),
    };
    if data.trim().is_empty() {
        return Ok(HashMap::new());
    }

    let records: Vec<Position> = serde_json::from_str(&data).map_err(|e| persistence_error(path, e))?;
    Ok(records.into_iter().map(|p| (p.pair, p)).collect())
}

fn save(path: &Path, records: &Records) -> Result<()> {
    let mut sorted: Vec<&Position> = records.values().collect();
    sorted.sort_by_key(|p| (p.created_at, p.pair));

    let data = serde_json::to_string_pretty(&sorted).map_err(|e| persistence_error(path, e))?;
    std::fs::write(path, data).map_err(|e| persistence_error(path, e))?;

    debug!("Saved {} positions to {}", sorted.len(), path.display());
    Ok(())
}

#[async_trait]
impl PositionStore for JsonPositionStore {
    async fn find_by_pair(&self, pair: Address) -> Result<Option<Position>> {
        self.transact(Access::Shared, move |records| Ok(records.get(&pair).cloned()))
            .await
    }

    async fn create(&self, position: Position) -> Result<Position> {
        let pair = position.pair;
        let created = self
            .transact(Access::Exclusive, move |records| {
                if records.contains_key(&position.pair) {
                    return Err(Error::PositionExists(position.pair));
                }
                records.insert(position.pair, position.clone());
                Ok(position)
            })
            .await?;

        debug!("Created position record for {}", pair);
        Ok(created)
    }

    async fn update(&self, pair: Address, update: PositionUpdate) -> Result<Position> {
        self.transact(Access::Exclusive, move |records| {
            let position = records.get_mut(&pair).ok_or(Error::PositionNotFound(pair))?;
            update.apply(position, Utc::now())?;
            Ok(position.clone())
        })
        .await
    }

    async fn open_positions_due(&self, cutoff: DateTime<Utc>) -> Result<Vec<Position>> {
        self.select(move |p| p.is_open() && p.profit_loss_checked_at <= cutoff)
            .await
    }

    async fn open_positions_with_tokens(&self) -> Result<Vec<Position>> {
        self.select(|p| p.is_open() && !p.token_remaining.is_zero())
            .await
    }

    async fn all(&self) -> Result<Vec<Position>> {
        self.select(|_| true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::model::fixtures;
    use crate::position::model::{CloseReason, PositionState};
    use alloy::primitives::U256;
    use std::sync::Arc;

    fn opening(pair: Address) -> Position {
        Position::opening(
            pair,
            fixtures::wrapped(),
            fixtures::token(),
            U256::from(100u64),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_create_is_unique() {
        let store = JsonPositionStore::in_memory();
        let pair = Address::repeat_byte(0x01);

        store.create(opening(pair)).await.unwrap();
        let second = store.create(opening(pair)).await;

        assert!(matches!(second, Err(Error::PositionExists(p)) if p == pair));
        assert_eq!(store.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_create_keeps_one() {
        let store = Arc::new(JsonPositionStore::in_memory());
        let pair = Address::repeat_byte(0x02);

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.create(opening(pair)).await.is_ok() })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap() {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(store.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_unknown_pair() {
        let store = JsonPositionStore::in_memory();
        let result = store
            .update(Address::repeat_byte(0x03), PositionUpdate::default())
            .await;
        assert!(matches!(result, Err(Error::PositionNotFound(_))));
    }

    #[tokio::test]
    async fn test_due_and_token_filters() {
        let store = JsonPositionStore::in_memory();
        let now = Utc::now();

        // open, checked long ago
        let mut stale = fixtures::open_position(now - chrono::Duration::hours(2));
        stale.pair = Address::repeat_byte(0x10);
        store.create(stale).await.unwrap();

        // open, checked just now
        let mut fresh = fixtures::open_position(now);
        fresh.pair = Address::repeat_byte(0x11);
        store.create(fresh).await.unwrap();

        // still opening
        store.create(opening(Address::repeat_byte(0x12))).await.unwrap();

        let cutoff = now - chrono::Duration::minutes(30);
        let due = store.open_positions_due(cutoff).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].pair, Address::repeat_byte(0x10));

        let holding = store.open_positions_with_tokens().await.unwrap();
        assert_eq!(holding.len(), 2);
    }

    #[tokio::test]
    async fn test_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.json");

        assert!(JsonPositionStore::init(&path).await.unwrap());
        assert!(!JsonPositionStore::init(&path).await.unwrap());

        let store = JsonPositionStore::open(&path).await.unwrap();
        let position = fixtures::open_position(Utc::now());
        let pair = position.pair;
        store.create(position.clone()).await.unwrap();
        store
            .update(pair, position.close(CloseReason::Rug, Utc::now()).unwrap())
            .await
            .unwrap();

        let reloaded = JsonPositionStore::open(&path).await.unwrap();
        let stored = reloaded.find_by_pair(pair).await.unwrap().unwrap();
        assert_eq!(stored.state(), PositionState::Closed(CloseReason::Rug));
        assert_eq!(stored.token_remaining, U256::from(1_000u64));
    }

    #[tokio::test]
    async fn test_two_stores_on_one_file_keep_each_others_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.json");

        // the running bot and an operator dump opened side by side
        let bot = JsonPositionStore::open(&path).await.unwrap();
        let operator = JsonPositionStore::open(&path).await.unwrap();

        let now = Utc::now();
        let mut first = fixtures::open_position(now);
        first.pair = Address::repeat_byte(0x0a);
        let mut second = fixtures::open_position(now);
        second.pair = Address::repeat_byte(0x0b);
        bot.create(first.clone()).await.unwrap();
        bot.create(second.clone()).await.unwrap();

        operator
            .update(first.pair, first.close(CloseReason::Rug, now).unwrap())
            .await
            .unwrap();
        bot.update(
            second.pair,
            second
                .refresh_profit_loss(alloy::primitives::I256::ZERO, U256::from(900u64), now)
                .unwrap(),
        )
        .await
        .unwrap();

        // the bot sees the operator's close and did not overwrite it
        let seen = bot.find_by_pair(first.pair).await.unwrap().unwrap();
        assert_eq!(seen.state(), PositionState::Closed(CloseReason::Rug));

        let reloaded = JsonPositionStore::open(&path).await.unwrap();
        let first = reloaded.find_by_pair(first.pair).await.unwrap().unwrap();
        let second = reloaded.find_by_pair(second.pair).await.unwrap().unwrap();
        assert_eq!(first.state(), PositionState::Closed(CloseReason::Rug));
        assert_eq!(second.token_remaining, U256::from(900u64));

        // a pair taken through one store is taken for the other too
        operator.create(fixtures::open_position(now)).await.unwrap();
        let again = bot.create(fixtures::open_position(now)).await;
        assert!(matches!(again, Err(Error::PositionExists(_))));
    }
}
