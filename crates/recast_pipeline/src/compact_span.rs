use crate::region::RegionId;

/// A span in a [`CompactHeightfield`](crate::CompactHeightfield), describing the open space
/// above a solid span. Packed for memory efficiency.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CompactSpan {
    /// The lower extent of the span. (Measured from the heightfield's base.)
    pub y: u16,
    /// The id of the region the span belongs to. (Or [`RegionId::NONE`] if not in a region.)
    pub region: RegionId,
    /// 24 bits: packed neighbor connection data
    /// 8 bits: the height of the span
    data: u32,
}

impl Default for CompactSpan {
    /// A span of zero height without any connections.
    fn default() -> Self {
        Self {
            y: 0,
            region: RegionId::NONE,
            data: 0x00FF_FFFF,
        }
    }
}

impl CompactSpan {
    /// The connection value marking a direction without a walkable neighbor.
    pub const NOT_CONNECTED: u8 = 0x3f;

    /// Creates an unconnected span outside any region, with its floor at `y` and `height`
    /// voxels of open space above it.
    pub fn new(y: u16, height: u8) -> Self {
        let mut span = Self {
            y,
            ..Default::default()
        };
        span.set_height(height);
        span
    }

    /// Sets the neighbor connection data for the given direction.
    /// `None` if the neighbor is not connected.
    pub fn set_con(&mut self, direction: u8, neighbor: impl Into<Option<u8>>) {
        let shift = (direction as u32) * 6;
        let value =
            neighbor.into().unwrap_or(Self::NOT_CONNECTED) as u32 & Self::NOT_CONNECTED as u32;
        self.data = (self.data & !(0x3f << shift)) | (value << shift);
    }

    /// Returns the neighbor connection data for the given direction,
    /// i.e. the layer index of the neighbor span within its column.
    /// `None` if the neighbor is not connected.
    #[inline]
    pub fn con(&self, direction: u8) -> Option<u8> {
        let shift = (direction as u32) * 6;
        let value = ((self.data >> shift) & Self::NOT_CONNECTED as u32) as u8;
        if value == Self::NOT_CONNECTED {
            None
        } else {
            Some(value)
        }
    }

    /// Returns the height of the span.
    #[inline]
    pub fn height(&self) -> u8 {
        (self.data >> 24) as u8
    }

    /// Sets the height of the span.
    pub fn set_height(&mut self, height: u8) {
        self.data = (self.data & 0x00FF_FFFF) | ((height as u32) << 24);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_span() {
        let mut span = CompactSpan::default();
        span.set_height(10);
        assert_eq!(span.height(), 10);
        span.set_con(3, 4);
        assert_eq!(span.height(), 10);
    }

    #[test]
    fn new_span_is_unconnected() {
        let span = CompactSpan::new(7, 12);
        assert_eq!(span.y, 7);
        assert_eq!(span.height(), 12);
        assert_eq!(span.region, RegionId::NONE);
        assert!((0..4).all(|dir| span.con(dir).is_none()));
    }

    #[test]
    fn test_compact_span_con() {
        let mut span = CompactSpan::default();
        assert!((0..4).all(|dir| span.con(dir).is_none()));
        span.set_con(0, Some(1));
        assert_eq!(span.con(0), Some(1));

        span.set_con(1, Some(3));
        assert_eq!(span.con(1), Some(3));

        span.set_con(2, Some(5));
        assert_eq!(span.con(2), Some(5));

        span.set_con(0, Some(2));
        assert_eq!(span.con(0), Some(2));

        span.set_con(1, None);
        assert_eq!(span.con(1), None);

        span.set_con(2, None);
        assert_eq!(span.con(2), None);
        assert_eq!(span.con(0), Some(2));
    }
}
