use std::ops::{Deref, DerefMut};

use slotmap::SlotMap;

slotmap::new_key_type! {
    /// A key for a span in [`Spans`].
    pub struct SpanKey;
}

/// The pool all [`Span`]s of a [`Heightfield`](crate::Heightfield) are allocated from.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Spans(SlotMap<SpanKey, Span>);

impl Deref for Spans {
    type Target = SlotMap<SpanKey, Span>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Spans {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Spans {
    const DEFAULT_CAPACITY: usize = 1024;

    pub(crate) fn with_min_capacity(min_capacity: usize) -> Self {
        let capacity = min_capacity.max(Self::DEFAULT_CAPACITY);
        Self(SlotMap::with_capacity_and_key(capacity))
    }
}

/// Builds a [`Span`].
#[derive(Debug, Clone)]
pub struct SpanBuilder {
    /// Height of the floor of solid space, in cells.
    pub min: u16,
    /// Height of the top of solid space, in cells. Exclusive.
    pub max: u16,
    /// Area type of the span.
    pub area: AreaType,
    /// The next-higher span in the column.
    pub next: Option<SpanKey>,
}

impl SpanBuilder {
    /// Builds the span.
    pub fn build(self) -> Span {
        Span {
            min: self.min,
            max: self.max,
            area: self.area,
            next: self.next,
        }
    }
}

impl From<SpanBuilder> for Span {
    fn from(builder: SpanBuilder) -> Self {
        builder.build()
    }
}

/// A half-open interval `[min, max)` of solid voxels in one heightfield column.
/// Build with [`SpanBuilder`].
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Span {
    min: u16,
    max: u16,
    area: AreaType,
    next: Option<SpanKey>,
}

impl Span {
    /// The largest representable span height, in cells. Also stands in for "open sky".
    pub const MAX_HEIGHT: u16 = u16::MAX;

    /// Height of the floor of solid space.
    #[inline]
    pub fn min(&self) -> u16 {
        self.min
    }

    #[inline]
    pub(crate) fn set_min(&mut self, min: u16) {
        self.min = min;
    }

    /// Height of the top of solid space. This is where an agent would stand.
    #[inline]
    pub fn max(&self) -> u16 {
        self.max
    }

    #[inline]
    pub(crate) fn set_max(&mut self, max: u16) {
        self.max = max;
    }

    /// The area type of the span's top surface.
    #[inline]
    pub fn area(&self) -> AreaType {
        self.area
    }

    #[inline]
    pub(crate) fn set_area(&mut self, area: impl Into<AreaType>) {
        self.area = area.into();
    }

    /// The key of the next-higher span in the column.
    #[inline]
    pub fn next(&self) -> Option<SpanKey> {
        self.next
    }

    #[inline]
    pub(crate) fn set_next(&mut self, next: impl Into<Option<SpanKey>>) {
        self.next = next.into();
    }
}

/// The area tag of a span or polygon.
///
/// `0` is the null area. Any other value is walkable, and higher values win when spans are merged.
/// Regions never cross a change in area type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct AreaType(pub u8);

impl From<u8> for AreaType {
    fn from(value: u8) -> Self {
        AreaType(value)
    }
}

impl From<bool> for AreaType {
    fn from(walkable: bool) -> Self {
        if walkable {
            Self::DEFAULT_WALKABLE
        } else {
            Self::NOT_WALKABLE
        }
    }
}

impl AreaType {
    /// The null area. Triangles and spans with this area type are not walkable.
    pub const NOT_WALKABLE: Self = Self(0);
    /// Default area type for walkable triangles. The highest possible area type.
    pub const DEFAULT_WALKABLE: Self = Self(u8::MAX);

    /// Whether this is anything but [`AreaType::NOT_WALKABLE`].
    #[inline]
    pub fn is_walkable(self) -> bool {
        self != Self::NOT_WALKABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span() -> Span {
        SpanBuilder {
            min: 2,
            max: 10,
            area: AreaType(4),
            next: None,
        }
        .build()
    }

    #[test]
    fn can_retrieve_span_data_after_building() {
        let span = span();
        assert_eq!(span.min(), 2);
        assert_eq!(span.max(), 10);
        assert_eq!(span.area(), AreaType(4));
        assert_eq!(span.next(), None);
    }

    #[test]
    fn can_retrieve_span_data_after_setting() {
        let mut span = span();
        let mut slotmap = SlotMap::with_key();
        let span_key: SpanKey = slotmap.insert(span.clone());

        span.set_min(1);
        span.set_max(4);
        span.set_area(3);
        span.set_next(span_key);

        assert_eq!(span.min(), 1);
        assert_eq!(span.max(), 4);
        assert_eq!(span.area(), AreaType(3));
        assert_eq!(span.next(), Some(span_key));
    }

    #[test]
    fn walkable_flag_maps_to_area() {
        assert_eq!(AreaType::from(true), AreaType::DEFAULT_WALKABLE);
        assert!(!AreaType::from(false).is_walkable());
        assert!(AreaType(1).is_walkable());
    }
}
