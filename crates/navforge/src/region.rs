use std::ops::{Deref, DerefMut};

/// The id of a region in a [`CompactHeightfield`](crate::CompactHeightfield).
///
/// Regions are numbered from 1. [`RegionId::NONE`] marks spans that are not in a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct RegionId(pub u16);

impl Deref for RegionId {
    type Target = u16;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for RegionId {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Default for RegionId {
    fn default() -> Self {
        Self::NONE
    }
}

impl From<u16> for RegionId {
    fn from(value: u16) -> Self {
        RegionId(value)
    }
}

impl RegionId {
    /// Spans that are not walkable or were discarded by region filtering.
    pub const NONE: Self = Self(0);

    /// Whether the span belongs to an actual region.
    #[inline]
    pub fn is_region(self) -> bool {
        self != Self::NONE
    }
}
