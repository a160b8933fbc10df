//! Decoded-instruction cache.
//!
//! Entries are keyed by linear address and re-validated against the bytes in
//! memory on every hit, so code that rewrites itself is decoded again.

use rustc_hash::FxHashMap;

use crate::opcode::OpCode;
use crate::proxy::{CodeAddress, MemoryProxy};

/// Default number of cached instructions before the cache is flushed.
pub const DEFAULT_CAPACITY: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped because the bytes under them changed.
    pub invalidations: u64,
    pub entries: usize,
}

#[derive(Debug)]
pub struct DecodeCache {
    entries: FxHashMap<u32, OpCode>,
    capacity: usize,
    stats: CacheStats,
}

impl Default for DecodeCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl DecodeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: FxHashMap::default(),
            capacity: capacity.max(1),
            stats: CacheStats::default(),
        }
    }

    /// The cached decode at `at`, if its bytes are still in memory.
    pub fn lookup(&mut self, at: CodeAddress, proxy: &MemoryProxy) -> Option<OpCode> {
        let key = at.linear();
        let valid = match self.entries.get(&key) {
            Some(op) => {
                op.address() == at && proxy.matches(at, op.instruction_code(), usize::from(op.length()))
            }
            None => {
                self.stats.misses += 1;
                return None;
            }
        };
        if valid {
            self.stats.hits += 1;
            return self.entries.get(&key).cloned();
        }
        self.entries.remove(&key);
        self.stats.misses += 1;
        self.stats.invalidations += 1;
        None
    }

    pub fn insert(&mut self, op: OpCode) {
        if self.entries.len() >= self.capacity {
            self.entries.clear();
        }
        self.entries.insert(op.address().linear(), op);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            ..self.stats
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use i86_memory::{Memory, RealModeMemory};

    use super::*;
    use crate::opcode::Instruction;

    #[test]
    fn hit_requires_unchanged_bytes() {
        let mem = Arc::new(RealModeMemory::new());
        mem.set_bytes(0x1000, 0x0100, &[0x90]);
        let proxy = MemoryProxy::new(mem.clone());
        let at = CodeAddress::new(0x1000, 0x0100);

        let mut cache = DecodeCache::new(16);
        assert!(cache.lookup(at, &proxy).is_none());
        cache.insert(OpCode::new(Instruction::Nop, at, 0x90, 1));
        assert!(cache.lookup(at, &proxy).is_some());

        mem.set_byte(0x1000, 0x0100, 0xF4);
        assert!(cache.lookup(at, &proxy).is_none());
        assert!(cache.is_empty());

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.invalidations), (1, 2, 1));
    }

    #[test]
    fn aliased_address_is_not_a_hit() {
        let mem = Arc::new(RealModeMemory::new());
        mem.set_bytes(0x1000, 0x0100, &[0x90]);
        let proxy = MemoryProxy::new(mem);
        let mut cache = DecodeCache::default();
        cache.insert(OpCode::new(Instruction::Nop, CodeAddress::new(0x1000, 0x0100), 0x90, 1));
        // 0FF0:0200 is the same linear byte.
        assert!(cache.lookup(CodeAddress::new(0x0FF0, 0x0200), &proxy).is_none());
    }

    #[test]
    fn full_cache_is_flushed() {
        let mem = Arc::new(RealModeMemory::new());
        let proxy = MemoryProxy::new(mem);
        let mut cache = DecodeCache::new(2);
        for offset in 0..3 {
            cache.insert(OpCode::new(Instruction::Nop, CodeAddress::new(0, offset), 0, 1));
        }
        assert_eq!(cache.len(), 1);
        assert!(cache.lookup(CodeAddress::new(0, 0), &proxy).is_none());
    }
}
