use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use rusqlite::{params, Connection, OptionalExtension};

use super::{decode_record, encode_record, BlockDatabase, LoadOutcome, StorageError};
use crate::world::block::MapBlock;
use crate::world::{BlockPos, World};

const CREATE_QUERY: &str = "CREATE TABLE IF NOT EXISTS blocks (
    x INTEGER NOT NULL,
    y INTEGER NOT NULL,
    z INTEGER NOT NULL,
    data BLOB NOT NULL,
    PRIMARY KEY (x, y, z)
)";
const READ_QUERY: &str = "SELECT data FROM blocks WHERE x = ?1 AND y = ?2 AND z = ?3 LIMIT 1";
const WRITE_QUERY: &str = "REPLACE INTO blocks (x, y, z, data) VALUES (?1, ?2, ?3, ?4)";
const LIST_QUERY: &str = "SELECT x, y, z FROM blocks";

enum DbState {
    Closed,
    Ready(Connection),
    Failed,
}

/// Embedded single-file backend. Blocks live in `<world_dir>/map.sqlite`,
/// addressed by their coordinates as a composite primary key.
pub struct SqliteDatabase {
    map: Arc<World>,
    db_path: PathBuf,
    state: DbState,
}

impl SqliteDatabase {
    pub fn new(map: Arc<World>, world_dir: &Path) -> SqliteDatabase {
        SqliteDatabase {
            map,
            db_path: world_dir.join("map.sqlite"),
            state: DbState::Closed,
        }
    }

    fn open(db_path: &Path) -> Result<Connection, StorageError> {
        if let Some(dir) = db_path.parent() {
            fs::create_dir_all(dir).map_err(|e| {
                StorageError::Init(format!("cannot create {}: {}", dir.display(), e))
            })?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| StorageError::Init(format!("cannot open {}: {}", db_path.display(), e)))?;
        conn.execute_batch(CREATE_QUERY)
            .map_err(|e| StorageError::Init(format!("cannot create block table: {}", e)))?;

        info!("Opened sqlite block database at {}", db_path.display());
        Ok(conn)
    }

    fn database(&mut self) -> Result<&Connection, StorageError> {
        if let DbState::Closed = self.state {
            match Self::open(&self.db_path) {
                Ok(conn) => self.state = DbState::Ready(conn),
                Err(e) => {
                    self.state = DbState::Failed;
                    return Err(e);
                }
            }
        }

        match &self.state {
            DbState::Ready(conn) => Ok(conn),
            _ => Err(StorageError::NotReady),
        }
    }
}

impl BlockDatabase for SqliteDatabase {
    fn initialized(&self) -> bool {
        matches!(self.state, DbState::Ready(_))
    }

    fn begin_save(&mut self) -> Result<(), StorageError> {
        let conn = self.database()?;
        if let Err(e) = conn.execute_batch("BEGIN;") {
            warn!("Failed to begin transaction, saving may be slow: {}", e);
        }
        Ok(())
    }

    fn end_save(&mut self) -> Result<(), StorageError> {
        let conn = self.database()?;
        if let Err(e) = conn.execute_batch("COMMIT;") {
            warn!(
                "Failed to commit transaction, the map may not have been saved: {}",
                e
            );
        }
        Ok(())
    }

    fn save_block(&mut self, block: &MapBlock) -> Result<(), StorageError> {
        if block.is_dummy() || !block.is_modified() {
            return Ok(());
        }

        let pos = block.pos();
        let record = encode_record(block)?;

        let conn = self.database()?;
        let mut stmt = conn.prepare_cached(WRITE_QUERY)?;
        stmt.execute(params![pos.x, pos.y, pos.z, record])?;
        Ok(())
    }

    fn load_block(&mut self, pos: BlockPos) -> Result<LoadOutcome, StorageError> {
        let record: Option<Vec<u8>> = {
            let conn = self.database()?;
            let mut stmt = conn.prepare_cached(READ_QUERY)?;
            stmt.query_row(params![pos.x, pos.y, pos.z], |row| row.get(0))
                .optional()?
        };

        match record {
            Some(record) => decode_record(&self.map, pos, &record),
            None => Ok(LoadOutcome::NotFound),
        }
    }

    fn list_all_blocks(&mut self) -> Result<Vec<BlockPos>, StorageError> {
        let conn = self.database()?;
        let mut stmt = conn.prepare_cached(LIST_QUERY)?;
        let rows = stmt.query_map([], |row| {
            Ok(BlockPos::new(row.get(0)?, row.get(1)?, row.get(2)?))
        })?;

        let mut positions = Vec::new();
        for row in rows {
            positions.push(row?);
        }
        Ok(positions)
    }
}
