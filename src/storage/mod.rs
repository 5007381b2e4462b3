mod dummy;
mod kv;
mod postgres;
mod sqlite;

pub use self::dummy::DummyDatabase;
pub use self::kv::SledDatabase;
pub use self::postgres::PostgresDatabase;
pub use self::sqlite::SqliteDatabase;

use std::path::Path;
use std::sync::Arc;

use log::error;
use thiserror::Error;

use crate::config::{Backend, StorageConfig};
use crate::world::block::{MapBlock, SerializeError, FORMAT_VERSION_HIGHEST};
use crate::world::{BlockPos, MutexBlockRef, World};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to open block database: {0}")]
    Init(String),
    #[error("block database is not available")]
    NotReady,
    #[error("storage backend is misconfigured: {0}")]
    Misconfigured(&'static str),
    #[error("invalid block data at {0:?}: {1}")]
    Corrupt(BlockPos, SerializeError),
    #[error("failed to serialize block: {0}")]
    Serialize(#[from] SerializeError),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("postgres error: {0}")]
    Postgres(#[from] ::postgres::Error),
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
}

/// Result of a single block load. Corruption only becomes an `Err` when
/// the world's ignore-load-errors switch is off.
pub enum LoadOutcome {
    Loaded(MutexBlockRef),
    NotFound,
    IgnoredCorrupt,
}

/// One live connection to a block store. Backends open their backing
/// resource lazily on first use; a failed open is permanent and every
/// later call reports `StorageError::NotReady`.
pub trait BlockDatabase {
    /// True only after the lazy open has succeeded. Never opens as a
    /// side effect.
    fn initialized(&self) -> bool;

    /// Hints the backend to batch the writes that follow. Advisory: a
    /// batch that fails to start only makes saving slower.
    fn begin_save(&mut self) -> Result<(), StorageError>;

    /// Closes the batch opened by `begin_save`. Must be called in
    /// matching pairs. Commit failures are logged, not fatal.
    fn end_save(&mut self) -> Result<(), StorageError>;

    /// Upserts the block record keyed by its position. Dummy and
    /// unmodified blocks are skipped; the modified flag is owned by the
    /// caller and never cleared here.
    fn save_block(&mut self, block: &MapBlock) -> Result<(), StorageError>;

    fn load_block(&mut self, pos: BlockPos) -> Result<LoadOutcome, StorageError>;

    /// Eagerly materializes every stored position.
    fn list_all_blocks(&mut self) -> Result<Vec<BlockPos>, StorageError>;
}

pub fn open_database(
    config: &StorageConfig,
    map: Arc<World>,
) -> Result<Box<dyn BlockDatabase>, StorageError> {
    let world_dir = Path::new(&config.world_dir);
    match config.backend {
        Backend::Sqlite => Ok(Box::new(SqliteDatabase::new(map, world_dir))),
        Backend::Postgres => {
            let params = config.postgres.clone().ok_or(StorageError::Misconfigured(
                "the postgres backend requires a [storage.postgres] section",
            ))?;
            let world_name = world_dir
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("world");
            Ok(Box::new(PostgresDatabase::new(map, params, world_name)))
        }
        Backend::Sled => Ok(Box::new(SledDatabase::new(map, world_dir))),
        Backend::Dummy => Ok(Box::new(DummyDatabase::new(map))),
    }
}

/// Every stored record is `[u8 format version][payload bytes]`.
pub(crate) fn encode_record(block: &MapBlock) -> Result<Vec<u8>, StorageError> {
    let payload = block.serialize(FORMAT_VERSION_HIGHEST)?;
    let mut record = Vec::with_capacity(payload.len() + 1);
    record.push(FORMAT_VERSION_HIGHEST);
    record.extend_from_slice(&payload);
    Ok(record)
}

/// Strips the version byte, deserializes into a scratch block and only
/// then installs it into the world map, so a corrupt record never
/// mutates a container. The ignore switch is consulted at failure time.
pub(crate) fn decode_record(
    map: &World,
    pos: BlockPos,
    record: &[u8],
) -> Result<LoadOutcome, StorageError> {
    let mut scratch = MapBlock::new(pos);
    let parsed = match record.split_first() {
        Some((version, payload)) => scratch.deserialize(payload, *version),
        None => Err(SerializeError::Truncated),
    };

    match parsed {
        Ok(()) => {
            let container = map.create_block(pos);
            {
                let mut block = container.lock().unwrap();
                *block = scratch;
                block.clear_modified();
            }
            Ok(LoadOutcome::Loaded(container))
        }
        Err(e) => {
            if map.ignore_load_errors() {
                error!("Ignoring invalid block data at {:?}: {}", pos, e);
                Ok(LoadOutcome::IgnoredCorrupt)
            } else {
                Err(StorageError::Corrupt(pos, e))
            }
        }
    }
}
