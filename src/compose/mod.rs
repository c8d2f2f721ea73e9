
//! Paints a layer tree onto an RGBA surface,
//! walking the visual stack from the bottom up.

pub mod blend;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, UnitResult, Result};
use crate::layer::{LayerId, LayerTree, PixelPlane};
use crate::math::Vec2;

use self::blend::{composite_pixel, BlendMode};


/// An owned RGBA8 raster surface. Compositing threads one of these
/// through the traversal by mutable reference; there is no ambient
/// drawing context anywhere.
#[derive(Debug, Clone, PartialEq)]
pub struct Canvas {
    size: Vec2<usize>,
    data: Vec<u8>,
}

impl Canvas {

    /// A fully transparent surface of the given resolution.
    pub fn new(size: Vec2<usize>) -> Self {
        Canvas { size, data: vec![0; size.area() * 4] }
    }

    /// A surface initialized from a decoded pixel plane.
    pub fn from_plane(plane: &PixelPlane) -> Self {
        Canvas { size: plane.size, data: plane.data.clone() }
    }

    /// Surface resolution.
    pub fn size(&self) -> Vec2<usize> { self.size }

    /// Surface width in pixels.
    pub fn width(&self) -> usize { self.size.width() }

    /// Surface height in pixels.
    pub fn height(&self) -> usize { self.size.height() }

    /// The interleaved RGBA bytes, row-major.
    pub fn data(&self) -> &[u8] { &self.data }

    /// Consume the surface, keeping only the pixel bytes.
    pub fn into_data(self) -> Vec<u8> { self.data }

    /// Whether the surface covers no pixels.
    pub fn is_degenerate(&self) -> bool { self.size.area() == 0 }

    fn pixel(&self, x: usize, y: usize) -> [u8; 4] {
        let offset = (y * self.size.width() + x) * 4;
        [self.data[offset], self.data[offset + 1], self.data[offset + 2], self.data[offset + 3]]
    }

    fn set_pixel(&mut self, x: usize, y: usize, pixel: [u8; 4]) {
        let offset = (y * self.size.width() + x) * 4;
        self.data[offset .. offset + 4].copy_from_slice(&pixel);
    }
}


/// Lets a caller on another thread abandon a running composite.
/// The flag is polled between layer iterations, so cancellation takes
/// effect at the next layer boundary, not mid-pixel-loop.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {

    /// A flag that is never triggered.
    pub fn never() -> Self {
        Self::default()
    }

    /// Request cancellation. The running render fails with `Error::Aborted`
    /// at its next layer boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}


/// Composite all visible leaves of the tree onto a fresh canvas.
pub fn composite_tree(tree: &LayerTree, canvas_size: Vec2<usize>, cancel: &CancelFlag) -> Result<Canvas> {
    let mut canvas = Canvas::new(canvas_size);
    paint_siblings(tree, tree.roots(), &mut canvas, cancel)?;
    Ok(canvas)
}

/// Paint a sibling list in reverse order: the records store the visual
/// top of the stack first, and the visual bottom must paint first.
fn paint_siblings(
    tree: &LayerTree, siblings: &[LayerId],
    canvas: &mut Canvas, cancel: &CancelFlag,
) -> UnitResult {
    for &id in siblings.iter().rev() {
        if cancel.is_cancelled() {
            return Err(Error::Aborted);
        }

        let layer = &tree[id];

        // adjustment effects are not evaluated, skipping them
        // trades color fidelity for never failing on them
        if layer.hidden || layer.is_adjustment {
            continue;
        }

        if !layer.children.is_empty() {
            // groups have no pixels of their own, their children
            // composite in place on the shared surface
            paint_siblings(tree, &layer.children, canvas, cancel)?;
        }
        else if let Some(plane) = &layer.pixels {
            paint_plane(canvas, plane, layer.bounds.position(), layer.blend_mode, layer.opacity);
        }
    }

    Ok(())
}

/// Paint one pixel plane at its canvas offset,
/// clipping everything outside the surface.
fn paint_plane(
    canvas: &mut Canvas, plane: &PixelPlane,
    offset: Vec2<i32>, mode: BlendMode, opacity: u8,
) {
    if opacity == 0 || plane.is_degenerate() || canvas.is_degenerate() {
        return;
    }

    let plane_width = plane.size.width();

    for source_y in 0 .. plane.size.height() {
        let canvas_y = offset.y() as i64 + source_y as i64;
        if canvas_y < 0 || canvas_y >= canvas.height() as i64 { continue; }
        let canvas_y = canvas_y as usize;

        for source_x in 0 .. plane_width {
            let canvas_x = offset.x() as i64 + source_x as i64;
            if canvas_x < 0 || canvas_x >= canvas.width() as i64 { continue; }
            let canvas_x = canvas_x as usize;

            let source_offset = (source_y * plane_width + source_x) * 4;
            let source = [
                plane.data[source_offset],
                plane.data[source_offset + 1],
                plane.data[source_offset + 2],
                plane.data[source_offset + 3],
            ];

            let backdrop = canvas.pixel(canvas_x, canvas_y);
            canvas.set_pixel(canvas_x, canvas_y, composite_pixel(mode, backdrop, source, opacity));
        }
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::layer::{Bounds, DividerKind, LayerRecord, PixelPlane};

    fn solid_plane(size: Vec2<usize>, pixel: [u8; 4]) -> PixelPlane {
        let mut data = Vec::with_capacity(size.area() * 4);
        for _ in 0 .. size.area() { data.extend_from_slice(&pixel); }
        PixelPlane::new(size, data)
    }

    fn leaf_at(pixel: [u8; 4], bounds: Bounds) -> (LayerRecord, Option<PixelPlane>) {
        let record = LayerRecord { bounds, .. LayerRecord::default() };
        let plane = solid_plane(bounds.size(), pixel);
        (record, Some(plane))
    }

    #[test]
    fn later_siblings_are_painted_below() {
        // the record list is top-first: the first sibling must win
        let top = leaf_at([255, 0, 0, 255], Bounds { left: 0, top: 0, right: 1, bottom: 1 });
        let bottom = leaf_at([0, 255, 0, 255], Bounds { left: 0, top: 0, right: 1, bottom: 1 });

        let tree = LayerTree::build(vec![top, bottom]);
        let canvas = composite_tree(&tree, Vec2(1, 1), &CancelFlag::never()).unwrap();

        assert_eq!(canvas.data(), [255, 0, 0, 255]);
    }

    #[test]
    fn hidden_and_adjustment_layers_are_skipped() {
        let mut hidden = leaf_at([255, 0, 0, 255], Bounds { left: 0, top: 0, right: 1, bottom: 1 });
        hidden.0.hidden = true;

        let mut adjustment = leaf_at([0, 0, 255, 255], Bounds { left: 0, top: 0, right: 1, bottom: 1 });
        adjustment.0.is_adjustment = true;

        let visible = leaf_at([0, 255, 0, 255], Bounds { left: 0, top: 0, right: 1, bottom: 1 });

        let tree = LayerTree::build(vec![hidden, adjustment, visible]);
        let canvas = composite_tree(&tree, Vec2(1, 1), &CancelFlag::never()).unwrap();

        assert_eq!(canvas.data(), [0, 255, 0, 255]);
    }

    #[test]
    fn group_children_composite_in_place() {
        let mut start = LayerRecord::default();
        start.divider = Some(DividerKind::GroupStart { open: true });
        let mut end = LayerRecord::default();
        end.divider = Some(DividerKind::GroupEnd);

        let tree = LayerTree::build(vec![
            (start, None),
            leaf_at([0, 0, 255, 255], Bounds { left: 0, top: 0, right: 1, bottom: 1 }),
            (end, None),
            leaf_at([255, 255, 0, 255], Bounds { left: 0, top: 0, right: 1, bottom: 1 }),
        ]);

        let canvas = composite_tree(&tree, Vec2(1, 1), &CancelFlag::never()).unwrap();
        assert_eq!(canvas.data(), [0, 0, 255, 255]);
    }

    #[test]
    fn negative_offsets_are_clipped() {
        let layer = leaf_at(
            [9, 9, 9, 255],
            Bounds { left: -1, top: -1, right: 1, bottom: 1 },
        );

        let tree = LayerTree::build(vec![layer]);
        let canvas = composite_tree(&tree, Vec2(2, 2), &CancelFlag::never()).unwrap();

        // only the bottom right quarter of the plane lands on the canvas
        assert_eq!(canvas.pixel(0, 0), [9, 9, 9, 255]);
        assert_eq!(canvas.pixel(1, 0), [0, 0, 0, 0]);
        assert_eq!(canvas.pixel(0, 1), [0, 0, 0, 0]);
        assert_eq!(canvas.pixel(1, 1), [0, 0, 0, 0]);
    }

    #[test]
    fn cancellation_stops_at_the_next_layer() {
        let layer = leaf_at([1, 2, 3, 255], Bounds { left: 0, top: 0, right: 1, bottom: 1 });
        let tree = LayerTree::build(vec![layer]);

        let cancel = CancelFlag::never();
        cancel.cancel();

        assert!(matches!(
            composite_tree(&tree, Vec2(1, 1), &cancel),
            Err(Error::Aborted)
        ));
    }
}
