
//! The hierarchical layer stack, rebuilt from the flat record list.
//!
//! The file encodes nesting with sentinel divider records instead of
//! an actual tree. The builder pairs those markers with a stack of
//! open groups, and tolerates unbalanced markers from buggy writers
//! by closing whatever remains open at the end of the list.

use log::warn;
use smallvec::SmallVec;

use crate::compose::blend::BlendMode;
use crate::layer::{Bounds, DividerKind, LayerRecord, PixelPlane};


/// Index of a node within its `LayerTree` arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerId(pub(crate) usize);

/// One group or leaf of the layer stack.
/// Exactly one of these holds: the children list is non-empty (a group),
/// the pixel plane is present (a rasterized leaf), or both are absent
/// (an adjustment layer, an empty group, or a recovered corrupt layer).
#[derive(Debug, Clone)]
pub struct Layer {

    /// Display name, decoded from the unicode name block where present.
    pub name: String,

    /// Position and extent of the pixel plane on the canvas.
    /// May be negative or exceed the canvas, the compositor clips.
    pub bounds: Bounds,

    /// Overall layer translucency, 0 to 255.
    pub opacity: u8,

    /// How the layer combines with the accumulated pixels beneath it.
    pub blend_mode: BlendMode,

    /// Whether the visibility toggle of this layer is off.
    pub hidden: bool,

    /// Whether this is a parametric adjustment, which is never rasterized.
    pub is_adjustment: bool,

    /// Whether this layer is clipped to the one beneath it. Recorded, not applied.
    pub clipped: bool,

    /// Children in visual top-of-stack-first order. Empty for leaves.
    pub children: SmallVec<[LayerId; 4]>,

    /// The rasterized contents of a leaf layer.
    pub pixels: Option<PixelPlane>,
}

impl Layer {
    fn from_record(record: LayerRecord, pixels: Option<PixelPlane>) -> Self {
        Layer {
            blend_mode: record.blend_mode(),
            name: record.name,
            bounds: record.bounds,
            opacity: record.opacity,
            hidden: record.hidden,
            is_adjustment: record.is_adjustment,
            clipped: record.clipped,
            children: SmallVec::new(),
            pixels,
        }
    }
}


/// All layers of a document, stored as an arena with index-based child
/// lists. Compositing is a pure top-down traversal, so no node ever
/// needs a pointer back to its group.
#[derive(Debug, Clone, Default)]
pub struct LayerTree {
    nodes: Vec<Layer>,
    roots: SmallVec<[LayerId; 4]>,
}

impl LayerTree {

    /// Total number of groups and leaves.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the document has no layer records at all.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The top-level layers, top of the visual stack first.
    pub fn roots(&self) -> &[LayerId] {
        &self.roots
    }

    /// All nodes, in no meaningful order.
    pub fn iter(&self) -> impl Iterator<Item = &Layer> {
        self.nodes.iter()
    }

    /// Whether any leaf carries an actual pixel plane.
    pub fn has_pixel_source(&self) -> bool {
        self.nodes.iter().any(|layer| layer.pixels.is_some())
    }

    /// Count groups and leaves by walking the hierarchy.
    /// Redundant with `len`, which makes it a useful integrity check:
    /// every node must be reachable from exactly one parent.
    pub fn count_recursive(&self) -> usize {
        fn count(tree: &LayerTree, ids: &[LayerId]) -> usize {
            ids.iter().map(|&id| 1 + count(tree, &tree[id].children)).sum()
        }

        count(self, &self.roots)
    }

    /// Rebuild the hierarchy from records ordered visual-top-first.
    ///
    /// A "start of group" divider opens a group that collects the
    /// following records until its "end of group" divider. End markers
    /// without an open group are dropped; groups still open at the end
    /// of the list are closed implicitly.
    pub fn build(records: impl IntoIterator<Item = (LayerRecord, Option<PixelPlane>)>) -> Self {
        let mut tree = LayerTree::default();
        let mut open_groups: Vec<(LayerId, SmallVec<[LayerId; 4]>)> = Vec::new();

        fn attach(
            id: LayerId,
            open_groups: &mut Vec<(LayerId, SmallVec<[LayerId; 4]>)>,
            roots: &mut SmallVec<[LayerId; 4]>,
        ) {
            match open_groups.last_mut() {
                Some((_, children)) => children.push(id),
                None => roots.push(id),
            }
        }

        for (record, pixels) in records {
            match record.divider {
                Some(DividerKind::GroupStart { .. }) => {
                    let id = LayerId(tree.nodes.len());
                    tree.nodes.push(Layer::from_record(record, None));

                    // groups keep their position among their siblings
                    attach(id, &mut open_groups, &mut tree.roots);
                    open_groups.push((id, SmallVec::new()));
                }

                Some(DividerKind::GroupEnd) => {
                    // the marker itself is a hidden sentinel record, not a layer
                    match open_groups.pop() {
                        Some((id, children)) => tree.nodes[id.0].children = children,
                        None => warn!("dropping group end marker without a matching start"),
                    }
                }

                None => {
                    let id = LayerId(tree.nodes.len());
                    tree.nodes.push(Layer::from_record(record, pixels));
                    attach(id, &mut open_groups, &mut tree.roots);
                }
            }
        }

        if !open_groups.is_empty() {
            warn!("closing {} unterminated layer groups", open_groups.len());

            while let Some((id, children)) = open_groups.pop() {
                tree.nodes[id.0].children = children;
            }
        }

        tree
    }
}

impl std::ops::Index<LayerId> for LayerTree {
    type Output = Layer;

    fn index(&self, id: LayerId) -> &Layer {
        &self.nodes[id.0]
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::layer::LayerRecord;

    fn leaf(name: &str) -> (LayerRecord, Option<PixelPlane>) {
        (LayerRecord { name: name.into(), .. LayerRecord::default() }, None)
    }

    fn group_start(name: &str) -> (LayerRecord, Option<PixelPlane>) {
        let mut record = LayerRecord { name: name.into(), .. LayerRecord::default() };
        record.divider = Some(DividerKind::GroupStart { open: true });
        (record, None)
    }

    fn group_end() -> (LayerRecord, Option<PixelPlane>) {
        let mut record = LayerRecord::default();
        record.divider = Some(DividerKind::GroupEnd);
        (record, None)
    }

    fn names(tree: &LayerTree, ids: &[LayerId]) -> Vec<String> {
        ids.iter().map(|&id| tree[id].name.clone()).collect()
    }

    #[test]
    fn builds_nested_groups() {
        let tree = LayerTree::build(vec![
            leaf("top"),
            group_start("outer"),
            leaf("a"),
            group_start("inner"),
            leaf("b"),
            group_end(),
            group_end(),
            leaf("bottom"),
        ]);

        assert_eq!(names(&tree, tree.roots()), ["top", "outer", "bottom"]);

        let outer = tree.roots()[1];
        assert_eq!(names(&tree, &tree[outer].children), ["a", "inner"]);

        let inner = tree[outer].children[1];
        assert_eq!(names(&tree, &tree[inner].children), ["b"]);

        // the end markers are not nodes
        assert_eq!(tree.len(), 6);
        assert_eq!(tree.count_recursive(), tree.len());
    }

    #[test]
    fn unbalanced_start_is_closed_implicitly() {
        let tree = LayerTree::build(vec![
            group_start("never closed"),
            leaf("inside"),
        ]);

        assert_eq!(names(&tree, tree.roots()), ["never closed"]);
        assert_eq!(names(&tree, &tree[tree.roots()[0]].children), ["inside"]);
        assert_eq!(tree.count_recursive(), 2);
    }

    #[test]
    fn stray_end_marker_is_dropped() {
        let tree = LayerTree::build(vec![
            group_end(),
            leaf("only"),
            group_end(),
        ]);

        assert_eq!(names(&tree, tree.roots()), ["only"]);
        assert_eq!(tree.count_recursive(), 1);
    }

    #[test]
    fn empty_list_builds_empty_tree() {
        let tree = LayerTree::build(vec![]);
        assert!(tree.is_empty());
        assert_eq!(tree.count_recursive(), 0);
        assert!(!tree.has_pixel_source());
    }
}
