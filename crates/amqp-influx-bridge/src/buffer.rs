// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Size-bounded batch buffer for points.
//!
//! Owned by the writer task; never shared. Timed flushes are driven by the
//! writer, which simply calls [`BatchBuffer::take`].

use crate::point::Point;

/// A batching buffer that collects points until `max_size` is reached.
pub struct BatchBuffer {
    points: Vec<Point>,
    max_size: usize,
}

impl BatchBuffer {
    /// Create a new batch buffer.
    ///
    /// A `max_size` of 0 is treated as 1.
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            points: Vec::with_capacity(max_size),
            max_size,
        }
    }

    /// Add a point to the buffer.
    ///
    /// Returns `Some(batch)` if the buffer is now full and should be sent,
    /// or `None` if there is still room.
    pub fn add(&mut self, point: Point) -> Option<Vec<Point>> {
        self.points.push(point);
        if self.points.len() >= self.max_size {
            Some(self.take())
        } else {
            None
        }
    }

    /// Take all accumulated points, leaving the buffer empty.
    pub fn take(&mut self) -> Vec<Point> {
        std::mem::replace(&mut self.points, Vec::with_capacity(self.max_size))
    }

    /// Get the current number of buffered points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}
