//! # Proxy Sets
//!
//! While a tile is locked, its loaded relatives are pinned as possible
//! stand-ins ("proxies") so the renderer can draw them until the tile itself
//! is ready.

use bitflags::bitflags;

use crate::cache::TileKey;

bitflags! {
    /// Relatives pinned by a tile's lock.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ProxySet: u8 {
        /// Top-left child.
        const CHILD0 = 1 << 0;
        /// Top-right child.
        const CHILD1 = 1 << 1;
        /// Bottom-left child.
        const CHILD2 = 1 << 2;
        /// Bottom-right child.
        const CHILD3 = 1 << 3;
        /// Parent tile.
        const PARENT = 1 << 4;
        /// Grandparent tile.
        const GRANDPARENT = 1 << 5;

        /// All four children.
        const CHILDREN = Self::CHILD0.bits()
            | Self::CHILD1.bits()
            | Self::CHILD2.bits()
            | Self::CHILD3.bits();
    }
}

impl ProxySet {
    /// Slot order used by [`TileId::relatives`](crate::tile::TileId::relatives).
    pub const SLOTS: [Self; 6] = [
        Self::CHILD0,
        Self::CHILD1,
        Self::CHILD2,
        Self::CHILD3,
        Self::PARENT,
        Self::GRANDPARENT,
    ];
}

/// The proxies one lock acquisition pinned, with their exact keys.
///
/// Unlock walks these keys, never a fresh lookup, so it undoes precisely
/// what lock did even if relatives came and went in between.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProxyLinks {
    set: ProxySet,
    keys: [Option<TileKey>; 6],
}

impl ProxyLinks {
    /// Which relatives are pinned.
    #[inline]
    #[must_use]
    pub const fn set(&self) -> ProxySet {
        self.set
    }

    /// No relative pinned.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Key pinned in `slot`.
    #[must_use]
    pub fn key(&self, slot: ProxySet) -> Option<TileKey> {
        let index = ProxySet::SLOTS.iter().position(|s| *s == slot)?;
        self.keys[index]
    }

    /// Pinned `(slot, key)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (ProxySet, TileKey)> + '_ {
        ProxySet::SLOTS
            .iter()
            .zip(self.keys.iter())
            .filter_map(|(slot, key)| key.map(|key| (*slot, key)))
    }

    pub(crate) fn pin(&mut self, index: usize, key: TileKey) {
        self.set |= ProxySet::SLOTS[index];
        self.keys[index] = Some(key);
    }
}
