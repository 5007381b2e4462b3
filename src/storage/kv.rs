use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use sled::Batch;

use super::{decode_record, encode_record, BlockDatabase, LoadOutcome, StorageError};
use crate::world::block::MapBlock;
use crate::world::{BlockPos, World};

enum DbState {
    Closed,
    Ready(sled::Db),
    Failed,
}

/// Log-structured key-value backend. Records are keyed by the big-endian
/// bytes of `BlockPos::to_u64`, with no separate coordinate columns.
pub struct SledDatabase {
    map: Arc<World>,
    db_path: PathBuf,
    state: DbState,
    batch: Option<Batch>,
}

impl SledDatabase {
    pub fn new(map: Arc<World>, world_dir: &Path) -> SledDatabase {
        SledDatabase {
            map,
            db_path: world_dir.join("map.sled"),
            state: DbState::Closed,
            batch: None,
        }
    }

    fn open(db_path: &Path) -> Result<sled::Db, StorageError> {
        let db = sled::open(db_path)
            .map_err(|e| StorageError::Init(format!("cannot open {}: {}", db_path.display(), e)))?;
        info!("Opened sled block database at {}", db_path.display());
        Ok(db)
    }

    fn database(&mut self) -> Result<&sled::Db, StorageError> {
        if let DbState::Closed = self.state {
            match Self::open(&self.db_path) {
                Ok(db) => self.state = DbState::Ready(db),
                Err(e) => {
                    self.state = DbState::Failed;
                    return Err(e);
                }
            }
        }

        match &self.state {
            DbState::Ready(db) => Ok(db),
            _ => Err(StorageError::NotReady),
        }
    }
}

impl BlockDatabase for SledDatabase {
    fn initialized(&self) -> bool {
        matches!(self.state, DbState::Ready(_))
    }

    fn begin_save(&mut self) -> Result<(), StorageError> {
        self.database()?;
        self.batch = Some(Batch::default());
        Ok(())
    }

    fn end_save(&mut self) -> Result<(), StorageError> {
        let batch = self.batch.take();
        let db = self.database()?;

        if let Some(batch) = batch {
            if let Err(e) = db.apply_batch(batch) {
                warn!(
                    "Failed to apply write batch, the map may not have been saved: {}",
                    e
                );
            }
        }
        if let Err(e) = db.flush() {
            warn!("Failed to flush block database: {}", e);
        }
        Ok(())
    }

    fn save_block(&mut self, block: &MapBlock) -> Result<(), StorageError> {
        if block.is_dummy() || !block.is_modified() {
            return Ok(());
        }

        let key = block.pos().to_u64().to_be_bytes();
        let record = encode_record(block)?;

        match self.batch.as_mut() {
            Some(batch) => batch.insert(&key[..], record),
            None => {
                let db = self.database()?;
                db.insert(&key[..], record)?;
            }
        }
        Ok(())
    }

    fn load_block(&mut self, pos: BlockPos) -> Result<LoadOutcome, StorageError> {
        let record = {
            let db = self.database()?;
            db.get(pos.to_u64().to_be_bytes())?
        };

        match record {
            Some(record) => decode_record(&self.map, pos, &record),
            None => Ok(LoadOutcome::NotFound),
        }
    }

    fn list_all_blocks(&mut self) -> Result<Vec<BlockPos>, StorageError> {
        let db = self.database()?;

        let mut positions = Vec::new();
        for entry in db.iter() {
            let (key, _) = entry?;
            if key.len() != 8 {
                warn!("Skipping block record with a malformed {}-byte key", key.len());
                continue;
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&key);
            positions.push(BlockPos::from_u64(u64::from_be_bytes(raw)));
        }
        Ok(positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_test_db(dir: &TempDir) -> (Arc<World>, SledDatabase) {
        let map = Arc::new(World::new(false));
        let db = SledDatabase::new(map.clone(), dir.path());
        (map, db)
    }

    fn modified_block(pos: BlockPos, node: u16) -> MapBlock {
        let mut block = MapBlock::new(pos);
        block.set_node(0, 0, 0, node);
        block
    }

    #[test]
    fn initializes_lazily() {
        let dir = TempDir::new().unwrap();
        let (_map, mut db) = open_test_db(&dir);

        assert!(!db.initialized());
        assert!(matches!(
            db.load_block(BlockPos::new(1, 1, 1)).unwrap(),
            LoadOutcome::NotFound
        ));
        assert!(db.initialized());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let (_map, mut db) = open_test_db(&dir);

        let pos = BlockPos::new(-100, 20, 3000);
        db.save_block(&modified_block(pos, 99)).unwrap();

        match db.load_block(pos).unwrap() {
            LoadOutcome::Loaded(block) => {
                let block = block.lock().unwrap();
                assert_eq!(block.get_node(0, 0, 0), 99);
                assert!(!block.is_modified());
            }
            _ => panic!("expected a stored block"),
        }
    }

    #[test]
    fn batched_writes_apply_on_end_save() {
        let dir = TempDir::new().unwrap();
        let (_map, mut db) = open_test_db(&dir);

        let pos = BlockPos::new(4, 5, 6);
        db.begin_save().unwrap();
        db.save_block(&modified_block(pos, 11)).unwrap();

        // Nothing is visible until the batch is applied.
        assert!(matches!(
            db.load_block(pos).unwrap(),
            LoadOutcome::NotFound
        ));

        db.end_save().unwrap();
        assert!(matches!(
            db.load_block(pos).unwrap(),
            LoadOutcome::Loaded(_)
        ));
    }

    #[test]
    fn lists_keys_as_positions() {
        let dir = TempDir::new().unwrap();
        let (_map, mut db) = open_test_db(&dir);

        let positions = [
            BlockPos::new(0, -1, 2),
            BlockPos::new(i16::MAX, 0, i16::MIN),
        ];
        for &pos in &positions {
            db.save_block(&modified_block(pos, 1)).unwrap();
        }

        let mut listed = db.list_all_blocks().unwrap();
        listed.sort_by_key(|p| p.to_u64());
        let mut expected = positions.to_vec();
        expected.sort_by_key(|p| p.to_u64());
        assert_eq!(listed, expected);
    }

    #[test]
    fn resaving_replaces_the_record() {
        let dir = TempDir::new().unwrap();
        let (_map, mut db) = open_test_db(&dir);

        let pos = BlockPos::new(2, 2, 2);
        db.save_block(&modified_block(pos, 1)).unwrap();
        db.save_block(&modified_block(pos, 2)).unwrap();

        assert_eq!(db.list_all_blocks().unwrap().len(), 1);
        match db.load_block(pos).unwrap() {
            LoadOutcome::Loaded(block) => {
                assert_eq!(block.lock().unwrap().get_node(0, 0, 0), 2)
            }
            _ => panic!("expected a stored block"),
        }
    }
}
