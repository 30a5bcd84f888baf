/// Provides information on the content of a cell column in a [`CompactHeightfield`](crate::CompactHeightfield).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CompactCell {
    /// Index to the first span in the column.
    index: u32,
    /// Number of spans in the column.
    count: u32,
}

impl CompactCell {
    /// Index of the lowest span of the column in [`CompactHeightfield::spans`](crate::CompactHeightfield::spans).
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Number of walkable spans in the column.
    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// The span indices of the column, bottom to top.
    #[inline]
    pub fn span_indices(&self) -> std::ops::Range<usize> {
        self.index as usize..self.index as usize + self.count as usize
    }

    #[inline]
    pub(crate) fn set_index(&mut self, index: u32) {
        self.index = index;
    }

    #[inline]
    pub(crate) fn inc_count(&mut self) {
        self.count += 1;
    }
}
