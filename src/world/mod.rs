pub mod block;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use dashmap::DashMap;
use log::warn;

use crate::storage::{BlockDatabase, StorageError};

use self::block::MapBlock;

#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub struct BlockPos {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl BlockPos {
    pub fn new(x: i16, y: i16, z: i16) -> BlockPos {
        BlockPos { x, y, z }
    }

    pub fn from_node_pos(x: i32, y: i32, z: i32) -> BlockPos {
        BlockPos::new((x >> 4) as i16, (y >> 4) as i16, (z >> 4) as i16)
    }

    pub fn from_u64(serialized: u64) -> BlockPos {
        BlockPos {
            x: Self::to_signed(serialized >> 32),
            y: Self::to_signed(serialized >> 16),
            z: Self::to_signed(serialized),
        }
    }

    /// Packs the position into disjoint 16-bit fields of a u64, the key
    /// used by the key-value storage backends. Inverse of `from_u64`.
    pub fn to_u64(&self) -> u64 {
        let x = self.x as u16 as u64;
        let y = self.y as u16 as u64;
        let z = self.z as u16 as u64;
        (x << 32) | (y << 16) | z
    }

    fn to_signed(val: u64) -> i16 {
        val as u16 as i16
    }
}

pub type MutexBlockRef = Arc<Mutex<MapBlock>>;

pub struct World {
    blocks: DashMap<BlockPos, MutexBlockRef>,
    ignore_load_errors: AtomicBool,
}

impl World {
    pub fn new(ignore_load_errors: bool) -> World {
        World {
            blocks: DashMap::with_capacity(32),
            ignore_load_errors: AtomicBool::new(ignore_load_errors),
        }
    }

    pub fn ignore_load_errors(&self) -> bool {
        self.ignore_load_errors.load(Ordering::Relaxed)
    }

    pub fn set_ignore_load_errors(&self, ignore: bool) {
        self.ignore_load_errors.store(ignore, Ordering::Relaxed);
    }

    pub fn get_block(&self, pos: BlockPos) -> Option<MutexBlockRef> {
        match self.blocks.get(&pos) {
            Some(block) => Some(block.clone()),
            None => None,
        }
    }

    pub fn create_block(&self, pos: BlockPos) -> MutexBlockRef {
        if !self.blocks.contains_key(&pos) {
            self.blocks
                .insert(pos, Arc::new(Mutex::new(MapBlock::new(pos))));
        }

        (*self.blocks.get(&pos).unwrap()).clone()
    }

    pub fn get_node(&self, x: i32, y: i32, z: i32) -> u16 {
        let block_opt = self.get_block(BlockPos::from_node_pos(x, y, z));
        match block_opt {
            Some(block) => block.lock().unwrap().get_node(x & 0x0f, y & 0x0f, z & 0x0f),
            None => 0,
        }
    }

    pub fn set_node(&self, x: i32, y: i32, z: i32, node: u16) {
        let block = self.create_block(BlockPos::from_node_pos(x, y, z));
        block
            .lock()
            .unwrap()
            .set_node(x & 0x0f, y & 0x0f, z & 0x0f, node);
    }

    /// Writes every modified block to the database, bracketed by a save
    /// batch. A block that fails to save keeps its modified flag so the
    /// next pass retries it.
    pub fn save_modified_blocks(&self, db: &mut dyn BlockDatabase) -> Result<(), StorageError> {
        let blocks: Vec<MutexBlockRef> = self.blocks.iter().map(|e| e.value().clone()).collect();

        db.begin_save()?;
        for block_ref in blocks {
            let mut block = block_ref.lock().unwrap();
            if block.is_dummy() || !block.is_modified() {
                continue;
            }
            match db.save_block(&block) {
                Ok(()) => block.clear_modified(),
                Err(e) => warn!("Failed to save block {:?}: {}", block.pos(), e),
            }
        }
        db.end_save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn block_key_round_trip() {
        let corners = [i16::MIN, -1, 0, 1, i16::MAX];
        for &x in &corners {
            for &y in &corners {
                for &z in &corners {
                    let pos = BlockPos::new(x, y, z);
                    assert_eq!(BlockPos::from_u64(pos.to_u64()), pos);
                }
            }
        }
    }

    #[test]
    fn block_keys_do_not_collide() {
        let mut seen = HashSet::new();
        let axis: Vec<i16> = (i16::MIN..=i16::MAX).step_by(4095).collect();
        for &x in &axis {
            for &y in &axis {
                for &z in &axis {
                    assert!(seen.insert(BlockPos::new(x, y, z).to_u64()));
                }
            }
        }
    }

    #[test]
    fn node_coords_map_to_blocks() {
        assert_eq!(BlockPos::from_node_pos(0, 0, 0), BlockPos::new(0, 0, 0));
        assert_eq!(BlockPos::from_node_pos(31, 16, 15), BlockPos::new(1, 1, 0));
        assert_eq!(BlockPos::from_node_pos(-1, -16, -17), BlockPos::new(-1, -1, -2));
    }

    #[test]
    fn world_set_and_get_node() {
        let world = World::new(false);
        world.set_node(5, 70, -3, 42);

        assert_eq!(world.get_node(5, 70, -3), 42);
        assert_eq!(world.get_node(5, 71, -3), 0);

        let block = world.get_block(BlockPos::from_node_pos(5, 70, -3)).unwrap();
        assert!(block.lock().unwrap().is_modified());
    }

    #[test]
    fn toggling_load_error_policy() {
        let world = World::new(false);
        assert!(!world.ignore_load_errors());
        world.set_ignore_load_errors(true);
        assert!(world.ignore_load_errors());
    }
}
