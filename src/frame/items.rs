//! Bitmask of initialized state components

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

use serde::{Deserialize, Serialize};

/// One of the four state components a frame can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateItem {
    Position,
    Velocity,
    Attitude,
    Rate,
}

impl StateItem {
    /// Bit representing this component in [`FrameItems`]
    pub const fn bit(self) -> u8 {
        match self {
            Self::Position => 0b0001,
            Self::Velocity => 0b0010,
            Self::Attitude => 0b0100,
            Self::Rate => 0b1000,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Position => "position",
            Self::Velocity => "velocity",
            Self::Attitude => "attitude",
            Self::Rate => "rate",
        }
    }

    /// All components, in the order state sources are resolved
    ///
    /// Attitude comes first: rotating a rate, position or velocity into the
    /// integrated frame needs that frame's attitude already in place.
    pub fn resolution_order() -> &'static [StateItem] {
        &[
            StateItem::Attitude,
            StateItem::Rate,
            StateItem::Position,
            StateItem::Velocity,
        ]
    }
}

/// Set of initialized state components
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FrameItems(u8);

impl FrameItems {
    pub const EMPTY: FrameItems = FrameItems(0);
    pub const POSITION: FrameItems = FrameItems(StateItem::Position.bit());
    pub const VELOCITY: FrameItems = FrameItems(StateItem::Velocity.bit());
    pub const ATTITUDE: FrameItems = FrameItems(StateItem::Attitude.bit());
    pub const RATE: FrameItems = FrameItems(StateItem::Rate.bit());
    pub const TRANS: FrameItems = FrameItems(0b0011);
    pub const ROT: FrameItems = FrameItems(0b1100);
    pub const FULL: FrameItems = FrameItems(0b1111);

    pub fn contains(self, other: FrameItems) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn has(self, item: StateItem) -> bool {
        self.0 & item.bit() != 0
    }

    pub fn is_full(self) -> bool {
        self == Self::FULL
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn add(&mut self, item: StateItem) {
        self.0 |= item.bit();
    }

    pub fn remove(&mut self, item: StateItem) {
        self.0 &= !item.bit();
    }

    /// Components that can be safely derived through a rigid transform
    ///
    /// Rotating a position or velocity needs a valid attitude, and carrying a
    /// velocity across an offset additionally needs the angular rate.
    pub fn propagable(self) -> FrameItems {
        let mut items = self;
        if !items.has(StateItem::Attitude) {
            items.remove(StateItem::Position);
            items.remove(StateItem::Velocity);
        } else if !items.has(StateItem::Rate) {
            items.remove(StateItem::Velocity);
        }
        items
    }

    pub fn iter(self) -> impl Iterator<Item = StateItem> {
        StateItem::resolution_order()
            .iter()
            .copied()
            .filter(move |item| self.has(*item))
    }
}

impl From<StateItem> for FrameItems {
    fn from(item: StateItem) -> Self {
        FrameItems(item.bit())
    }
}

impl BitOr for FrameItems {
    type Output = FrameItems;
    fn bitor(self, rhs: Self) -> Self::Output {
        FrameItems(self.0 | rhs.0)
    }
}

impl BitOrAssign for FrameItems {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for FrameItems {
    type Output = FrameItems;
    fn bitand(self, rhs: Self) -> Self::Output {
        FrameItems(self.0 & rhs.0)
    }
}

impl Not for FrameItems {
    type Output = FrameItems;
    fn not(self) -> Self::Output {
        FrameItems(!self.0 & Self::FULL.0)
    }
}

impl fmt::Debug for FrameItems {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|item| item.name()).collect();
        write!(f, "FrameItems({})", names.join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_propagable_drops_dependent_items() {
        assert_eq!(FrameItems::FULL.propagable(), FrameItems::FULL);
        assert_eq!(FrameItems::ATTITUDE.propagable(), FrameItems::ATTITUDE);
        assert_eq!(
            (FrameItems::TRANS | FrameItems::RATE).propagable(),
            FrameItems::RATE
        );
        assert_eq!(
            (FrameItems::TRANS | FrameItems::ATTITUDE).propagable(),
            FrameItems::POSITION | FrameItems::ATTITUDE
        );
    }

    #[test]
    fn test_set_operations() {
        let mut items = FrameItems::EMPTY;
        items.add(StateItem::Rate);
        items |= FrameItems::POSITION;

        assert!(items.has(StateItem::Rate));
        assert!(items.contains(FrameItems::POSITION));
        assert!(!items.contains(FrameItems::TRANS));
        assert_eq!(!items, FrameItems::VELOCITY | FrameItems::ATTITUDE);

        items.remove(StateItem::Rate);
        assert_eq!(items, FrameItems::POSITION);
        assert_eq!(format!("{:?}", FrameItems::ROT), "FrameItems(attitude|rate)");
    }
}
