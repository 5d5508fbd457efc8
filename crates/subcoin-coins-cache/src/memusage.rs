//! Memory accounting for the coins cache.
//!
//! The cache never asks the allocator how much memory it holds. It instead maintains a
//! deterministic estimate through a [`MemoryAccounting`] policy so that absolute byte
//! thresholds reproduce across runs on the same architecture.

use crate::coin::Coin;

/// Number of script bytes stored inline before spilling to the heap.
pub const SCRIPT_INLINE_CAPACITY: usize = 28;

/// Pointer width of the target the estimate is computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerWidth {
    /// 32-bit targets.
    Bits32,
    /// 64-bit targets.
    Bits64,
}

impl PointerWidth {
    /// Pointer width of the compilation target.
    #[cfg(target_pointer_width = "64")]
    pub const NATIVE: Self = Self::Bits64;

    /// Pointer width of the compilation target.
    #[cfg(not(target_pointer_width = "64"))]
    pub const NATIVE: Self = Self::Bits32;

    /// Size of a pointer in bytes.
    pub const fn pointer_size(self) -> usize {
        match self {
            Self::Bits32 => 4,
            Self::Bits64 => 8,
        }
    }
}

impl Default for PointerWidth {
    fn default() -> Self {
        Self::NATIVE
    }
}

/// Bytes actually consumed by a heap allocation of `alloc` bytes.
///
/// Allocators hand out memory in size classes plus a bookkeeping header, so the charge
/// grows in steps of 16 bytes on 64-bit and 8 bytes on 32-bit targets.
pub const fn malloc_usage(width: PointerWidth, alloc: usize) -> usize {
    if alloc == 0 {
        return 0;
    }
    match width {
        PointerWidth::Bits64 => ((alloc + 31) >> 4) << 4,
        PointerWidth::Bits32 => ((alloc + 15) >> 3) << 3,
    }
}

/// Heap bytes charged for a script of `len` bytes.
pub const fn script_heap_usage(width: PointerWidth, len: usize) -> usize {
    if len > SCRIPT_INLINE_CAPACITY {
        malloc_usage(width, len)
    } else {
        0
    }
}

/// Policy translating the cache contents into an estimated memory footprint.
///
/// The cache calls into the policy on every mutation and caches the results, so
/// [`crate::CoinsViewCache::dynamic_memory_usage`] stays O(1).
pub trait MemoryAccounting {
    /// Bytes charged for the heap payload of `coin`.
    fn coin_usage(&self, coin: &Coin) -> usize;

    /// Bytes charged for the table itself when it holds `len` entries in `buckets` buckets.
    fn table_usage(&self, len: usize, buckets: usize) -> usize;

    /// Bucket count after making room for `new_len` entries in a table of `buckets` buckets.
    ///
    /// Must never return less than `buckets`.
    fn reserve_buckets(&self, buckets: usize, new_len: usize) -> usize;

    /// Bucket count of a freshly allocated table.
    fn initial_buckets(&self) -> usize {
        1
    }
}

/// Bucket counts a chained hash table grows through.
const PRIME_BUCKETS: [usize; 23] = [
    13, 29, 59, 127, 257, 541, 1109, 2357, 5087, 10273, 20753, 42043, 85229, 172933, 351061,
    712697, 1447153, 2938679, 5967347, 12117689, 24607243, 49969847, 101473717,
];

/// Accounting for a chained hash table that stores every entry in its own heap node.
///
/// - Each entry is charged one node allocation holding the outpoint, the inline part of the
///   coin, the entry state, the cached hash and the chain pointer.
/// - The bucket array is charged one pointer per bucket. It starts as a single placeholder
///   bucket, rehashes on the first insert and afterwards whenever the load factor exceeds 1,
///   growing to the next prime at least twice its size.
/// - Buckets are never released by removing entries, only by reallocating the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeTableAccounting {
    width: PointerWidth,
}

impl NodeTableAccounting {
    /// Constructs the accounting for the given pointer width.
    pub const fn new(width: PointerWidth) -> Self {
        Self { width }
    }

    /// Constructs the accounting for the compilation target.
    pub const fn native() -> Self {
        Self::new(PointerWidth::NATIVE)
    }

    /// Pointer width this accounting models.
    pub fn width(&self) -> PointerWidth {
        self.width
    }

    /// Size of a single table node before allocator rounding.
    pub const fn node_size(&self) -> usize {
        match self.width {
            PointerWidth::Bits64 => 112,
            PointerWidth::Bits32 => 92,
        }
    }

    /// Bytes charged per entry.
    pub const fn node_usage(&self) -> usize {
        malloc_usage(self.width, self.node_size())
    }

    /// Bytes charged for a bucket array of `buckets` buckets.
    pub const fn bucket_usage(&self, buckets: usize) -> usize {
        malloc_usage(self.width, self.width.pointer_size() * buckets)
    }
}

impl MemoryAccounting for NodeTableAccounting {
    fn coin_usage(&self, coin: &Coin) -> usize {
        coin.dynamic_memory_usage_for(self.width)
    }

    fn table_usage(&self, len: usize, buckets: usize) -> usize {
        self.node_usage() * len + self.bucket_usage(buckets)
    }

    fn reserve_buckets(&self, buckets: usize, new_len: usize) -> usize {
        if buckets > 1 && new_len <= buckets {
            return buckets;
        }

        let target = buckets.saturating_mul(2).max(new_len);

        PRIME_BUCKETS
            .iter()
            .copied()
            .find(|&prime| prime >= target)
            .unwrap_or_else(|| buckets.saturating_mul(2).saturating_add(1).max(new_len))
    }
}

/// Synthetic accounting charging a flat cost per entry and per script byte.
///
/// Has no bucket overhead, which makes usage a linear function of the cache contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatAccounting {
    /// Bytes charged per cached entry, including tombstones.
    pub entry_bytes: usize,
    /// Bytes charged per script byte.
    pub per_byte: usize,
}

impl FlatAccounting {
    /// Constructs a new flat accounting.
    pub const fn new(entry_bytes: usize, per_byte: usize) -> Self {
        Self {
            entry_bytes,
            per_byte,
        }
    }
}

impl MemoryAccounting for FlatAccounting {
    fn coin_usage(&self, coin: &Coin) -> usize {
        coin.script_pubkey.len() * self.per_byte
    }

    fn table_usage(&self, len: usize, _buckets: usize) -> usize {
        len * self.entry_bytes
    }

    fn reserve_buckets(&self, buckets: usize, _new_len: usize) -> usize {
        buckets
    }
}
