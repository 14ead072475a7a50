// src/core/cluster/picker.rs

//! Key→node mapping via a consistent-hash ring with virtual nodes.
//!
//! A key containing a hash tag `{X}` with non-empty X hashes X instead of
//! the whole key, so related keys can be co-located on one owner.

use crc::{CRC_32_ISO_HDLC, Crc};
use std::collections::HashMap;

/// Virtual nodes per peer on the ring.
pub const DEFAULT_VIRTUAL_NODES: usize = 4;

const RING_HASH: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// The picker seam: the coordinator treats the ring as an interface.
pub trait PeerPicker: Send + Sync {
    fn add_nodes(&mut self, nodes: &[String]);
    fn pick_node(&self, key: &[u8]) -> Option<String>;
}

pub struct ConsistentPicker {
    virtual_nodes: usize,
    ring: Vec<u32>,
    owners: HashMap<u32, String>,
}

impl ConsistentPicker {
    pub fn new(virtual_nodes: usize) -> Self {
        Self {
            virtual_nodes: virtual_nodes.max(1),
            ring: Vec::new(),
            owners: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

impl PeerPicker for ConsistentPicker {
    fn add_nodes(&mut self, nodes: &[String]) {
        for node in nodes {
            if node.is_empty() {
                continue;
            }
            for replica in 0..self.virtual_nodes {
                let point = RING_HASH.checksum(format!("{replica}{node}").as_bytes());
                self.ring.push(point);
                self.owners.insert(point, node.clone());
            }
        }
        self.ring.sort_unstable();
        self.ring.dedup();
    }

    fn pick_node(&self, key: &[u8]) -> Option<String> {
        if self.ring.is_empty() {
            return None;
        }
        let hashed = RING_HASH.checksum(partition_key(key));
        let index = match self.ring.binary_search(&hashed) {
            Ok(i) => i,
            Err(i) if i == self.ring.len() => 0,
            Err(i) => i,
        };
        self.owners.get(&self.ring[index]).cloned()
    }
}

/// The effective hash input: the tag between the first `{` and the first
/// following `}` when non-empty, otherwise the whole key.
fn partition_key(key: &[u8]) -> &[u8] {
    let Some(begin) = key.iter().position(|b| *b == b'{') else {
        return key;
    };
    let Some(rel_end) = key[begin + 1..].iter().position(|b| *b == b'}') else {
        return key;
    };
    if rel_end == 0 {
        return key;
    }
    &key[begin + 1..begin + 1 + rel_end]
}
