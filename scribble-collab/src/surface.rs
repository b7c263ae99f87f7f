//! Drawing target for the canvas.
//!
//! Pixel work belongs to the host: a window, a bitmap, a browser canvas.
//! The sync core only issues these calls.

use scribble_core::Point;

pub trait DrawSurface {
    /// Width and height in pixels.
    fn size(&self) -> (u32, u32);

    /// Resize the backing store. Resizing also clears it.
    fn resize(&mut self, width: u32, height: u32);

    fn clear(&mut self);

    /// Paint one segment of a stroke in progress.
    fn draw_segment(&mut self, from: Point, to: Point);

    /// Paint a whole stroke. A single point paints a dot.
    fn draw_polyline(&mut self, points: &[Point]);
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Resize { width: u32, height: u32 },
    Clear,
    Segment { from: Point, to: Point },
    Polyline(Vec<Point>),
}

/// Surface that records every call, for headless hosts and tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingSurface {
    width: u32,
    height: u32,
    ops: Vec<DrawOp>,
}

impl RecordingSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ops: Vec::new(),
        }
    }

    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    pub fn take_ops(&mut self) -> Vec<DrawOp> {
        std::mem::take(&mut self.ops)
    }

    pub fn clear_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, DrawOp::Clear | DrawOp::Resize { .. }))
            .count()
    }

    /// Polylines painted since the surface was last cleared or resized.
    pub fn visible_polylines(&self) -> Vec<&[Point]> {
        let start = self
            .ops
            .iter()
            .rposition(|op| matches!(op, DrawOp::Clear | DrawOp::Resize { .. }))
            .map_or(0, |i| i + 1);
        self.ops[start..]
            .iter()
            .filter_map(|op| match op {
                DrawOp::Polyline(points) => Some(points.as_slice()),
                _ => None,
            })
            .collect()
    }

    pub fn segments(&self) -> Vec<(Point, Point)> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::Segment { from, to } => Some((*from, *to)),
                _ => None,
            })
            .collect()
    }
}

impl DrawSurface for RecordingSurface {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.ops.push(DrawOp::Resize { width, height });
    }

    fn clear(&mut self) {
        self.ops.push(DrawOp::Clear);
    }

    fn draw_segment(&mut self, from: Point, to: Point) {
        self.ops.push(DrawOp::Segment { from, to });
    }

    fn draw_polyline(&mut self, points: &[Point]) {
        self.ops.push(DrawOp::Polyline(points.to_vec()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visible_polylines_after_last_clear() {
        let mut surface = RecordingSurface::new(100, 100);
        surface.draw_polyline(&[Point::new(0.0, 0.0)]);
        surface.clear();
        surface.draw_polyline(&[Point::new(1.0, 1.0), Point::new(2.0, 2.0)]);
        surface.draw_segment(Point::new(2.0, 2.0), Point::new(3.0, 3.0));

        let visible = surface.visible_polylines();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0][0], Point::new(1.0, 1.0));
        assert_eq!(surface.segments().len(), 1);
        assert_eq!(surface.clear_count(), 1);
    }

    #[test]
    fn test_resize_counts_as_clear() {
        let mut surface = RecordingSurface::new(10, 10);
        surface.draw_polyline(&[Point::new(0.0, 0.0)]);
        surface.resize(20, 30);
        assert_eq!(surface.size(), (20, 30));
        assert!(surface.visible_polylines().is_empty());
    }
}
