//! The heightfield module contains the types and functions for working with [`Heightfield`]s.
//!
//! A heightfield is a 3D grid of [`Span`]s, where each column contains 0, 1, or more spans.

use thiserror::Error;

use crate::{
    Aabb3d,
    span::{Span, SpanKey, Spans},
};

/// A dynamic heightfield representing obstructed space.
/// Build with [`HeightfieldBuilder`].
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Heightfield {
    /// The width of the heightfield along the x-axis in cell units
    pub width: u16,
    /// The depth of the heightfield along the z-axis in cell units
    pub depth: u16,
    /// The AABB of the heightfield
    pub aabb: Aabb3d,
    /// The size of each cell on the xz-plane
    pub cell_size: f32,
    /// The size of each cell along the y-axis
    pub cell_height: f32,
    /// The lowest span of each column in `width * depth` order
    pub columns: Vec<Option<SpanKey>>,
    /// All spans in the heightfield
    pub allocated_spans: Spans,
}

impl Heightfield {
    /// Inserts a span into its column, merging it with every span it overlaps or touches.
    pub(crate) fn add_span(&mut self, insertion: SpanInsertion) -> Result<(), SpanInsertionError> {
        let column_index = self.column_index(insertion.x, insertion.z);
        if insertion.x >= self.width || column_index >= self.columns.len() {
            return Err(SpanInsertionError::ColumnIndexOutOfBounds {
                x: insertion.x,
                z: insertion.z,
            });
        }
        let mut new_span = insertion.span;
        if new_span.min() >= new_span.max() {
            return Err(SpanInsertionError::EmptySpan {
                min: new_span.min(),
                max: new_span.max(),
            });
        }

        let mut previous_span_key = None;
        let mut current_span_key_iter = self.columns[column_index];
        while let Some(current_span_key) = current_span_key_iter {
            let current_span = self.span(current_span_key);
            current_span_key_iter = current_span.next();
            if current_span.min() > new_span.max() {
                // Current span is completely above the new span, break.
                break;
            }
            if current_span.max() < new_span.min() {
                // Current span is completely below the new span. Keep going.
                previous_span_key = Some(current_span_key);
                continue;
            }
            // The new span overlaps or touches an existing span. Merge them.
            let current_min = current_span.min();
            let current_max = current_span.max();
            let current_area = current_span.area();
            let current_next = current_span.next();
            if current_min < new_span.min() {
                new_span.set_min(current_min);
            }
            if current_max > new_span.max() {
                new_span.set_max(current_max);
            }

            if (new_span.max() as i32 - current_max as i32).unsigned_abs()
                <= insertion.flag_merge_threshold as u32
            {
                // Higher area ID numbers indicate higher resolution priority.
                new_span.set_area(new_span.area().max(current_area));
            }

            // The current span is folded into the new one.
            self.allocated_spans.remove(current_span_key);
            if let Some(previous_span_key) = previous_span_key {
                self.span_mut(previous_span_key).set_next(current_next);
            } else {
                self.columns[column_index] = current_next;
            }
        }

        if let Some(previous_span_key) = previous_span_key {
            new_span.set_next(self.span(previous_span_key).next());
            let new_span_key = self.allocated_spans.insert(new_span);
            self.span_mut(previous_span_key).set_next(new_span_key);
        } else {
            new_span.set_next(self.columns[column_index]);
            let new_span_key = self.allocated_spans.insert(new_span);
            self.columns[column_index] = Some(new_span_key);
        }

        Ok(())
    }

    #[inline]
    pub(crate) fn column_index(&self, x: u16, z: u16) -> usize {
        x as usize + z as usize * self.width as usize
    }

    #[inline]
    pub(crate) fn contains(&self, x: i32, z: i32) -> bool {
        x >= 0 && x < self.width as i32 && z >= 0 && z < self.depth as i32
    }

    /// Returns the key of the lowest span in the column at the given coordinates.
    /// `None` if either the index is out of bounds or there is no span in the column.
    #[inline]
    pub fn span_key_at(&self, x: u16, z: u16) -> Option<SpanKey> {
        if x >= self.width {
            return None;
        }
        self.columns.get(self.column_index(x, z)).copied().flatten()
    }

    /// Returns the lowest span in the column at the given coordinates.
    /// `None` if either the index is out of bounds or there is no span in the column.
    #[inline]
    pub fn span_at(&self, x: u16, z: u16) -> Option<&Span> {
        let span_key = self.span_key_at(x, z)?;
        Some(self.span(span_key))
    }

    /// Iterates over the spans of one column from bottom to top.
    pub fn column(&self, x: u16, z: u16) -> impl Iterator<Item = (SpanKey, &Span)> + '_ {
        let mut key = self.span_key_at(x, z);
        std::iter::from_fn(move || {
            let current = key?;
            let span = self.span(current);
            key = span.next();
            Some((current, span))
        })
    }

    /// Iterates over every span as `(x, z, span)`, column by column.
    pub fn iter_spans(&self) -> impl Iterator<Item = (u16, u16, &Span)> + '_ {
        (0..self.depth).flat_map(move |z| {
            (0..self.width)
                .flat_map(move |x| self.column(x, z).map(move |(_, span)| (x, z, span)))
        })
    }

    /// Number of spans currently allocated.
    #[inline]
    pub fn span_count(&self) -> usize {
        self.allocated_spans.len()
    }

    /// Returns a reference to the span with the given key.
    /// # Panics
    /// Panics if the key is not found.
    #[inline]
    pub fn span(&self, key: SpanKey) -> &Span {
        &self.allocated_spans[key]
    }

    /// Returns a mutable reference to the span with the given key.
    /// # Panics
    /// Panics if the key is not found.
    #[inline]
    pub fn span_mut(&mut self, key: SpanKey) -> &mut Span {
        &mut self.allocated_spans[key]
    }
}

/// A builder for [`Heightfield`]s.
pub struct HeightfieldBuilder {
    /// The AABB of the heightfield
    pub aabb: Aabb3d,
    /// The size of each cell on the xz-plane
    pub cell_size: f32,
    /// The size of each cell along the y-axis
    pub cell_height: f32,
}

impl HeightfieldBuilder {
    /// Builds the heightfield. The grid covers `floor(extent / cell_size)` columns on each axis.
    pub fn build(self) -> Result<Heightfield, HeightfieldBuilderError> {
        let width = ((self.aabb.max.x - self.aabb.min.x) / self.cell_size).floor();
        let depth = ((self.aabb.max.z - self.aabb.min.z) / self.cell_size).floor();
        if !(width.is_finite() && depth.is_finite())
            || width < 0.0
            || depth < 0.0
            || width > u16::MAX as f32
            || depth > u16::MAX as f32
        {
            return Err(HeightfieldBuilderError::InvalidGridSize { width, depth });
        }
        let column_count = width as usize * depth as usize;
        Ok(Heightfield {
            width: width as u16,
            depth: depth as u16,
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            columns: vec![None; column_count],
            allocated_spans: Spans::with_min_capacity(column_count),
        })
    }
}

/// Errors that can occur when building a [`Heightfield`] with [`HeightfieldBuilder::build`].
#[derive(Error, Debug)]
pub enum HeightfieldBuilderError {
    /// The grid does not fit the `u16` lattice.
    #[error("grid size {width}x{depth} is not representable, each axis must be in [0, {max}]", max = u16::MAX)]
    InvalidGridSize {
        /// The width of the heightfield along the x-axis in cell units
        width: f32,
        /// The depth of the heightfield along the z-axis in cell units
        depth: f32,
    },
}

/// Errors that can occur when inserting a span into a [`Heightfield`]
#[derive(Error, Debug)]
pub enum SpanInsertionError {
    /// Happens when the column index is out of bounds.
    #[error("column index out of bounds: x={x}, z={z}")]
    ColumnIndexOutOfBounds {
        /// The x-coordinate of the span
        x: u16,
        /// The z-coordinate of the span
        z: u16,
    },
    /// Happens when a span would break the ordering of its column.
    #[error("span [{min}, {max}) is empty and cannot be ordered within its column")]
    EmptySpan {
        /// The floor of the rejected span
        min: u16,
        /// The top of the rejected span
        max: u16,
    },
}

pub(crate) struct SpanInsertion {
    /// The x-coordinate of the span
    pub(crate) x: u16,
    /// The z-coordinate of the span
    pub(crate) z: u16,
    /// Maximum difference between the ceilings of two spans to merge area type IDs
    pub(crate) flag_merge_threshold: u16,
    /// The span to insert
    pub(crate) span: Span,
}
