use std::io::{Read, Write};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use thiserror::Error;

use super::BlockPos;

pub const MAP_BLOCKSIZE: i32 = 16;
pub const NODES_PER_BLOCK: usize = 4096;

/// Version 1 stores the node array as raw little-endian words.
pub const FORMAT_VERSION_RAW: u8 = 1;
/// Version 2 wraps the version-1 payload in a zlib stream. Blocks are
/// always written with the highest version; both versions load.
pub const FORMAT_VERSION_HIGHEST: u8 = 2;

#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("unsupported block format version {0}")]
    UnsupportedVersion(u8),
    #[error("block payload has {0} bytes, expected {1}")]
    BadLength(usize, usize),
    #[error("block record is truncated")]
    Truncated,
    #[error("failed to read block payload: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug)]
pub struct MapBlock {
    pos: BlockPos,
    data: [u16; NODES_PER_BLOCK],
    dummy: bool,
    modified: bool,
}

impl MapBlock {
    pub fn new(pos: BlockPos) -> MapBlock {
        MapBlock {
            pos,
            data: [0; NODES_PER_BLOCK],
            dummy: false,
            modified: false,
        }
    }

    /// A placeholder shell with no generated content. Dummy blocks are
    /// never written to storage.
    pub fn new_dummy(pos: BlockPos) -> MapBlock {
        MapBlock {
            pos,
            data: [0; NODES_PER_BLOCK],
            dummy: true,
            modified: false,
        }
    }

    pub fn pos(&self) -> BlockPos {
        self.pos
    }

    pub fn is_dummy(&self) -> bool {
        self.dummy
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn set_modified(&mut self) {
        self.modified = true;
    }

    pub fn clear_modified(&mut self) {
        self.modified = false;
    }

    pub fn get_node(&self, x: i32, y: i32, z: i32) -> u16 {
        if x < 0 || y < 0 || z < 0 || x > 15 || y > 15 || z > 15 {
            return 0;
        }

        let node_idx = x + MAP_BLOCKSIZE * (z + MAP_BLOCKSIZE * y);
        self.data[node_idx as usize]
    }

    pub fn set_node(&mut self, x: i32, y: i32, z: i32, node: u16) {
        let node_idx = x + MAP_BLOCKSIZE * (z + MAP_BLOCKSIZE * y);
        self.data[node_idx as usize] = node;
        self.dummy = false;
        self.modified = true;
    }

    pub fn serialize(&self, version: u8) -> Result<Vec<u8>, SerializeError> {
        let mut raw = Vec::with_capacity(NODES_PER_BLOCK * 2);
        for node in self.data.iter() {
            raw.extend_from_slice(&node.to_le_bytes());
        }

        match version {
            FORMAT_VERSION_RAW => Ok(raw),
            FORMAT_VERSION_HIGHEST => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&raw)?;
                Ok(encoder.finish()?)
            }
            other => Err(SerializeError::UnsupportedVersion(other)),
        }
    }

    pub fn deserialize(&mut self, payload: &[u8], version: u8) -> Result<(), SerializeError> {
        let raw = match version {
            FORMAT_VERSION_RAW => payload.to_vec(),
            FORMAT_VERSION_HIGHEST => {
                let mut raw = Vec::with_capacity(NODES_PER_BLOCK * 2);
                ZlibDecoder::new(payload).read_to_end(&mut raw)?;
                raw
            }
            other => return Err(SerializeError::UnsupportedVersion(other)),
        };

        if raw.len() != NODES_PER_BLOCK * 2 {
            return Err(SerializeError::BadLength(raw.len(), NODES_PER_BLOCK * 2));
        }

        for (node, bytes) in self.data.iter_mut().zip(raw.chunks_exact(2)) {
            *node = u16::from_le_bytes([bytes[0], bytes[1]]);
        }
        self.dummy = false;
        Ok(())
    }
}
