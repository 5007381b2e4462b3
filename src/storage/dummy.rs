use std::collections::BTreeMap;
use std::sync::Arc;

use super::{decode_record, encode_record, BlockDatabase, LoadOutcome, StorageError};
use crate::world::block::MapBlock;
use crate::world::{BlockPos, World};

/// In-memory backend for tests and ephemeral worlds. Nothing persists
/// past process lifetime.
pub struct DummyDatabase {
    map: Arc<World>,
    blocks: BTreeMap<u64, Vec<u8>>,
}

impl DummyDatabase {
    pub fn new(map: Arc<World>) -> DummyDatabase {
        DummyDatabase {
            map,
            blocks: BTreeMap::new(),
        }
    }
}

impl BlockDatabase for DummyDatabase {
    fn initialized(&self) -> bool {
        true
    }

    fn begin_save(&mut self) -> Result<(), StorageError> {
        Ok(())
    }

    fn end_save(&mut self) -> Result<(), StorageError> {
        Ok(())
    }

    fn save_block(&mut self, block: &MapBlock) -> Result<(), StorageError> {
        if block.is_dummy() || !block.is_modified() {
            return Ok(());
        }

        let record = encode_record(block)?;
        self.blocks.insert(block.pos().to_u64(), record);
        Ok(())
    }

    fn load_block(&mut self, pos: BlockPos) -> Result<LoadOutcome, StorageError> {
        match self.blocks.get(&pos.to_u64()) {
            Some(record) => decode_record(&self.map, pos, record),
            None => Ok(LoadOutcome::NotFound),
        }
    }

    fn list_all_blocks(&mut self) -> Result<Vec<BlockPos>, StorageError> {
        Ok(self.blocks.keys().map(|k| BlockPos::from_u64(*k)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::block::FORMAT_VERSION_HIGHEST;

    fn open_test_db() -> (Arc<World>, DummyDatabase) {
        let map = Arc::new(World::new(false));
        let db = DummyDatabase::new(map.clone());
        (map, db)
    }

    fn modified_block(pos: BlockPos, node: u16) -> MapBlock {
        let mut block = MapBlock::new(pos);
        block.set_node(1, 2, 3, node);
        block
    }

    #[test]
    fn save_and_load_round_trip() {
        let (map, mut db) = open_test_db();

        let pos = BlockPos::new(1, 2, 3);
        db.save_block(&modified_block(pos, 0xAABB)).unwrap();

        match db.load_block(pos).unwrap() {
            LoadOutcome::Loaded(block) => {
                let block = block.lock().unwrap();
                assert_eq!(block.get_node(1, 2, 3), 0xAABB);
                assert!(!block.is_modified());
            }
            _ => panic!("expected a stored block"),
        }

        // The loaded block is reachable through the world map too.
        assert!(map.get_block(pos).is_some());

        assert!(matches!(
            db.load_block(BlockPos::new(4, 5, 6)).unwrap(),
            LoadOutcome::NotFound
        ));
        assert_eq!(db.list_all_blocks().unwrap(), vec![pos]);
    }

    #[test]
    fn stored_records_carry_the_version_byte() {
        let (_map, mut db) = open_test_db();

        let pos = BlockPos::new(0, 0, 0);
        db.save_block(&modified_block(pos, 1)).unwrap();

        let record = db.blocks.get(&pos.to_u64()).unwrap();
        assert_eq!(record[0], FORMAT_VERSION_HIGHEST);
    }

    #[test]
    fn unmodified_blocks_are_not_written() {
        let (_map, mut db) = open_test_db();

        let pos = BlockPos::new(1, 0, 0);
        db.save_block(&modified_block(pos, 5)).unwrap();
        let before = db.blocks.get(&pos.to_u64()).unwrap().clone();

        let mut unmodified = modified_block(pos, 77);
        unmodified.clear_modified();
        db.save_block(&unmodified).unwrap();

        assert_eq!(db.blocks.get(&pos.to_u64()).unwrap(), &before);
        assert!(db.save_block(&MapBlock::new(BlockPos::new(8, 8, 8))).is_ok());
        assert_eq!(db.blocks.len(), 1);
    }

    #[test]
    fn dummy_blocks_are_not_written() {
        let (_map, mut db) = open_test_db();

        let mut shell = MapBlock::new_dummy(BlockPos::new(2, 2, 2));
        shell.set_modified();
        db.save_block(&shell).unwrap();

        assert!(db.blocks.is_empty());
    }

    #[test]
    fn resaving_replaces_the_record() {
        let (_map, mut db) = open_test_db();

        let pos = BlockPos::new(3, 3, 3);
        db.save_block(&modified_block(pos, 1)).unwrap();
        db.save_block(&modified_block(pos, 2)).unwrap();

        assert_eq!(db.list_all_blocks().unwrap().len(), 1);
        match db.load_block(pos).unwrap() {
            LoadOutcome::Loaded(block) => {
                assert_eq!(block.lock().unwrap().get_node(1, 2, 3), 2)
            }
            _ => panic!("expected a stored block"),
        }
    }

    #[test]
    fn corrupt_record_honors_the_ignore_switch() {
        let (map, mut db) = open_test_db();

        let pos = BlockPos::new(7, -7, 7);
        db.blocks.insert(pos.to_u64(), vec![0x7F, 1, 2, 3]);

        // Policy off: the load fails and no container is created.
        assert!(matches!(
            db.load_block(pos),
            Err(StorageError::Corrupt(p, _)) if p == pos
        ));
        assert!(map.get_block(pos).is_none());

        // Policy on: the record is treated as absent.
        map.set_ignore_load_errors(true);
        assert!(matches!(
            db.load_block(pos).unwrap(),
            LoadOutcome::IgnoredCorrupt
        ));
        assert!(map.get_block(pos).is_none());
    }

    #[test]
    fn save_modified_blocks_clears_flags() {
        let (map, mut db) = open_test_db();

        map.set_node(0, 0, 0, 10);
        map.set_node(100, 0, -100, 20);
        map.save_modified_blocks(&mut db).unwrap();

        assert_eq!(db.list_all_blocks().unwrap().len(), 2);
        let block = map.get_block(BlockPos::new(0, 0, 0)).unwrap();
        assert!(!block.lock().unwrap().is_modified());

        // A second pass has nothing left to write.
        let before = db.blocks.clone();
        map.save_modified_blocks(&mut db).unwrap();
        assert_eq!(db.blocks, before);
    }
}
