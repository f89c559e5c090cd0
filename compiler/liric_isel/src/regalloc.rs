//! Step 3 of the ISEL pipeline (spec §4.4 point 3): the "value cache"
//! register allocator.
//!
//! Every vreg owns a fixed stack slot (assigned by [`crate::prescan`]) that
//! is always the up-to-date value of record. Physical registers are a
//! write-back cache in front of that memory: a load checks the cache
//! first, a def marks its register dirty, and eviction (LRU) flushes a
//! dirty register back to its slot before handing the register to someone
//! else. This keeps every step individually obviously correct — the
//! cache can never diverge from memory for longer than one instruction —
//! while still giving back-to-back uses of the same vreg a register hit,
//! which is what the spec's "value cache" wording is after.
//!
//! Cross-block liveness never goes through this cache directly: a block
//! starts with an empty cache and any value live across a branch travels
//! through its own stack slot (or, for values joined by a phi, through
//! the phi-copy slots lowered in `lower.rs`). That sidesteps needing a
//! full dataflow liveness analysis to keep a single-pass allocator sound.

use liric_ir::VReg;

pub type PhysReg = u8;

struct Entry {
    vreg: VReg,
    reg: PhysReg,
    dirty: bool,
}

pub struct ValueCache {
    free: Vec<PhysReg>,
    /// Least-recently-used at the front, most-recently-used at the back.
    entries: Vec<Entry>,
}

/// What the caller should do in response to a cache operation: emit a
/// load/store against the vreg's stack slot, or nothing.
pub enum CacheAction {
    None,
    /// Emit a load of `vreg`'s slot into `reg` before using `reg`.
    Load { reg: PhysReg },
    /// Emit a store of `reg` into `vreg`'s slot (eviction write-back).
    Evict { vreg: VReg, reg: PhysReg },
}

impl ValueCache {
    pub fn new(pool: &[PhysReg]) -> Self {
        ValueCache {
            free: pool.to_vec(),
            entries: Vec::new(),
        }
    }

    fn position(&self, v: VReg) -> Option<usize> {
        self.entries.iter().position(|e| e.vreg == v)
    }

    fn touch(&mut self, idx: usize) {
        let e = self.entries.remove(idx);
        self.entries.push(e);
    }

    /// Picks a register to hold a value, evicting the LRU entry if the
    /// pool is exhausted. Returns the chosen register and, if an eviction
    /// happened, the write-back the caller must emit first.
    fn acquire(&mut self) -> (PhysReg, Option<CacheAction>) {
        if let Some(reg) = self.free.pop() {
            return (reg, None);
        }
        let victim = self.entries.remove(0);
        let action = if victim.dirty {
            Some(CacheAction::Evict {
                vreg: victim.vreg,
                reg: victim.reg,
            })
        } else {
            None
        };
        (victim.reg, action)
    }

    /// A value is about to be read. If already cached, returns its
    /// register with no side effect. Otherwise acquires a register (with
    /// a possible eviction write-back for the caller to emit first) and
    /// tells the caller to load `vreg`'s slot into it.
    pub fn read(&mut self, v: VReg) -> (PhysReg, Vec<CacheAction>) {
        if let Some(idx) = self.position(v) {
            self.touch(idx);
            let reg = self.entries.last().unwrap().reg;
            return (reg, Vec::new());
        }
        let (reg, evict) = self.acquire();
        let mut actions: Vec<CacheAction> = evict.into_iter().collect();
        actions.push(CacheAction::Load { reg });
        self.entries.push(Entry {
            vreg: v,
            reg,
            dirty: false,
        });
        (reg, actions)
    }

    /// A value is about to be defined. Drops any stale cache entry for
    /// `v` (a redefinition), acquires a register, and marks it dirty so
    /// the next eviction (or `flush_all`) writes it back.
    pub fn define(&mut self, v: VReg) -> (PhysReg, Vec<CacheAction>) {
        if let Some(idx) = self.position(v) {
            self.entries.remove(idx);
        }
        let (reg, evict) = self.acquire();
        let actions: Vec<CacheAction> = evict.into_iter().collect();
        self.entries.push(Entry {
            vreg: v,
            reg,
            dirty: true,
        });
        (reg, actions)
    }

    /// The value in `v`'s register no longer matches memory and must be
    /// written back eventually (used when an instruction mutates a
    /// register in place, e.g. widening it).
    pub fn mark_dirty(&mut self, v: VReg) {
        if let Some(idx) = self.position(v) {
            self.entries[idx].dirty = true;
        }
    }

    /// The vreg is dead: drop it from the cache without writing back.
    pub fn kill(&mut self, v: VReg) {
        if let Some(idx) = self.position(v) {
            self.entries.remove(idx);
        }
    }

    /// Writes back every dirty entry and empties the cache. Called at
    /// every block boundary so each block starts from a clean slate.
    pub fn flush_all(&mut self) -> Vec<CacheAction> {
        let mut actions = Vec::new();
        for e in self.entries.drain(..) {
            if e.dirty {
                actions.push(CacheAction::Evict {
                    vreg: e.vreg,
                    reg: e.reg,
                });
            }
            self.free.push(e.reg);
        }
        actions
    }

    /// Reserves `reg` for a fixed-register instruction (e.g. `idiv`'s
    /// `rax`/`rdx`), evicting whatever currently holds it.
    pub fn reserve(&mut self, reg: PhysReg) -> Vec<CacheAction> {
        if let Some(idx) = self.entries.iter().position(|e| e.reg == reg) {
            let e = self.entries.remove(idx);
            self.free.retain(|&r| r != reg);
            if e.dirty {
                return vec![CacheAction::Evict { vreg: e.vreg, reg }];
            }
            return Vec::new();
        }
        self.free.retain(|&r| r != reg);
        Vec::new()
    }

    /// Returns `reg` to the free pool after a `reserve` whose caller is
    /// done with it (not currently bound to any vreg).
    pub fn release(&mut self, reg: PhysReg) {
        if !self.free.contains(&reg) && !self.entries.iter().any(|e| e.reg == reg) {
            self.free.push(reg);
        }
    }

    /// Binds `v` to `reg` directly, without going through `acquire` --
    /// used after an instruction with a fixed-register result (`idiv`'s
    /// quotient in `rax`) that already called `reserve(reg)`.
    pub fn bind_fixed(&mut self, v: VReg, reg: PhysReg) {
        if let Some(idx) = self.position(v) {
            self.entries.remove(idx);
        }
        self.entries.push(Entry {
            vreg: v,
            reg,
            dirty: true,
        });
    }

    /// A register not tied to any vreg, for transient arithmetic (address
    /// computation, call-argument shuffling). The caller must eventually
    /// `free_scratch` it or hand it to `bind_fixed`.
    pub fn acquire_scratch(&mut self) -> (PhysReg, Vec<CacheAction>) {
        let (reg, evict) = self.acquire();
        (reg, evict.into_iter().collect())
    }

    pub fn free_scratch(&mut self, reg: PhysReg) {
        self.release(reg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liric_utils::Idx;

    #[test]
    fn repeated_read_hits_cache() {
        let mut cache = ValueCache::new(&[0, 1]);
        let v = VReg::new(1);
        let (r1, actions) = cache.read(v);
        assert_eq!(actions.len(), 1);
        let (r2, actions2) = cache.read(v);
        assert_eq!(r1, r2);
        assert!(actions2.is_empty());
    }

    #[test]
    fn eviction_writes_back_dirty_entries() {
        let mut cache = ValueCache::new(&[0]);
        let a = VReg::new(1);
        let b = VReg::new(2);
        let (_, _) = cache.define(a);
        let (_, actions) = cache.define(b);
        assert!(matches!(actions[0], CacheAction::Evict { vreg, .. } if vreg == a));
    }
}
