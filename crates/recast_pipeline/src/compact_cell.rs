use std::ops::Range;

/// Provides information on the content of a cell column in a [`CompactHeightfield`](crate::CompactHeightfield).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CompactCell {
    /// Index to the first span in the column.
    index: u32,
    /// Number of spans in the column.
    count: u8,
}

impl CompactCell {
    /// Index to the first span in the column.
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Number of spans in the column.
    #[inline]
    pub fn count(&self) -> u8 {
        self.count
    }

    /// The range of span indices belonging to this column.
    #[inline]
    pub fn index_range(&self) -> Range<usize> {
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
