use crate::region::RegionId;

/// A walkable span in a [`CompactHeightfield`](crate::CompactHeightfield).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CompactSpan {
    /// The floor of the span, i.e. the top of the solid span it was built from.
    /// Measured in voxels from the heightfield's base.
    pub y: u16,
    /// The open space above the floor, capped at [`CompactSpan::MAX_HEIGHT`].
    pub height: u16,
    /// The id of the region the span belongs to. (Or [`RegionId::NONE`] if not in a region.)
    pub region: RegionId,
    /// Indices of the connected neighbor spans, one per direction.
    neighbors: [u32; 4],
}

impl Default for CompactSpan {
    fn default() -> Self {
        Self {
            y: 0,
            height: 0,
            region: RegionId::NONE,
            neighbors: [Self::NOT_CONNECTED; 4],
        }
    }
}

impl CompactSpan {
    pub(crate) const NOT_CONNECTED: u32 = u32::MAX;
    /// The clearance stored for spans under open sky.
    pub const MAX_HEIGHT: u16 = u16::MAX;

    /// An unconnected span outside of any region.
    #[inline]
    pub(crate) fn new(y: u16, height: u16) -> Self {
        Self {
            y,
            height,
            ..Default::default()
        }
    }

    /// Sets the neighbor connection for the given direction.
    /// `None` if the neighbor is not connected.
    #[inline]
    pub(crate) fn set_neighbor(&mut self, direction: u8, neighbor: impl Into<Option<usize>>) {
        self.neighbors[direction as usize & 0x3] = neighbor
            .into()
            .map_or(Self::NOT_CONNECTED, |index| index as u32);
    }

    /// Returns the index of the span connected in the given direction,
    /// or `None` if the span is not connected there.
    #[inline]
    pub fn neighbor(&self, direction: u8) -> Option<usize> {
        let value = self.neighbors[direction as usize & 0x3];
        (value != Self::NOT_CONNECTED).then_some(value as usize)
    }

    /// Number of connected neighbors.
    #[inline]
    pub fn neighbor_count(&self) -> usize {
        (0..4).filter(|dir| self.neighbor(*dir).is_some()).count()
    }

    /// The top of the open space above the span.
    #[inline]
    pub fn top(&self) -> u32 {
        self.y as u32 + self.height as u32
    }
}
