//! Per-outpoint state held by the coins cache.

use crate::coin::Coin;
use crate::memusage::MemoryAccounting;

/// Cached coin together with its relationship to the base view.
///
/// Transitions:
/// - add: absent -> `Fresh` (`Dirty` with overwrite), `Spent` -> `Dirty`.
/// - access miss served by the base view: absent -> `Clean`.
/// - spend: `Fresh` -> absent, `Clean`/`Dirty` -> `Spent`.
/// - flush: `Dirty`/`Fresh` -> `Clean`, `Spent` -> absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEntry {
    /// Identical to the coin in the base view.
    Clean(Coin),
    /// Modified since the last flush; the base view may hold an older version.
    Dirty(Coin),
    /// Modified since the last flush and known to be absent from the base view.
    ///
    /// Spending it drops the entry without telling the base view.
    Fresh(Coin),
    /// Spent while the base view may still hold it, the deletion is written on flush.
    Spent,
}

impl CacheEntry {
    /// Returns the coin unless the entry is a tombstone.
    pub fn coin(&self) -> Option<&Coin> {
        match self {
            Self::Clean(coin) | Self::Dirty(coin) | Self::Fresh(coin) => Some(coin),
            Self::Spent => None,
        }
    }

    /// Consumes the entry, returning the coin unless it is a tombstone.
    pub fn into_coin(self) -> Option<Coin> {
        match self {
            Self::Clean(coin) | Self::Dirty(coin) | Self::Fresh(coin) => Some(coin),
            Self::Spent => None,
        }
    }

    /// Whether the entry must be written to the base view on flush.
    pub fn is_dirty(&self) -> bool {
        !matches!(self, Self::Clean(_))
    }

    /// Whether the entry is known to be absent from the base view.
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh(_))
    }

    /// Whether the entry is a tombstone.
    pub fn is_spent(&self) -> bool {
        matches!(self, Self::Spent)
    }

    /// Bytes charged for the coin payload of this entry.
    pub(crate) fn coin_usage<A: MemoryAccounting>(&self, accounting: &A) -> usize {
        self.coin().map_or(0, |coin| accounting.coin_usage(coin))
    }

    /// Entry resulting from adding `coin` on top of `previous`.
    ///
    /// Returns `None` if the add would replace an unspent coin while `possible_overwrite`
    /// is not set.
    pub(crate) fn after_add(
        previous: Option<&Self>,
        coin: Coin,
        possible_overwrite: bool,
    ) -> Option<Self> {
        match previous {
            None if possible_overwrite => Some(Self::Dirty(coin)),
            None => Some(Self::Fresh(coin)),
            // The deletion has not reached the base view yet, the new coin must not be FRESH
            // or spending it again would lose that deletion.
            Some(Self::Spent) => Some(Self::Dirty(coin)),
            Some(Self::Fresh(_)) if possible_overwrite => Some(Self::Fresh(coin)),
            Some(Self::Clean(_) | Self::Dirty(_)) if possible_overwrite => Some(Self::Dirty(coin)),
            Some(_) => None,
        }
    }

    /// Turns a surviving entry clean after its changes reached the base view.
    ///
    /// Returns `false` for tombstones, which must be dropped instead.
    pub(crate) fn settle(&mut self) -> bool {
        match std::mem::replace(self, Self::Spent) {
            Self::Clean(coin) | Self::Dirty(coin) | Self::Fresh(coin) => {
                *self = Self::Clean(coin);
                true
            }
            Self::Spent => false,
        }
    }
}
