
//! The staged rendering pipeline.
//!
//! Four decreasing-fidelity attempts, each a full independent parse of
//! the same immutable byte buffer. The first stage that produces a
//! usable surface wins, and its identity travels with the result so a
//! caller can tell the user how faithful the rendering is. Only
//! exhausting all four stages is a user-visible failure.

use std::path::Path;

use log::{debug, trace, warn};

use crate::compose::{composite_tree, Canvas, CancelFlag};
use crate::document::Document;
use crate::error::{Error, Result};
use crate::meta::ParseOptions;


/// One fidelity level of the rendering pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStage {

    /// Composites the layers from their raw planar channel data.
    /// The most faithful rendering, avoids the double-premultiplication
    /// artifacts of pre-composited canvases.
    RawData,

    /// Composites the layers from per-layer pre-composited canvases.
    HighFidelity,

    /// Like `HighFidelity`, but leaves all linked-file payloads
    /// uninterpreted. Guards against malformed smart-object references.
    SafeMode,

    /// Skips per-layer pixels entirely and serves the flattened
    /// merged image. No per-layer fidelity, maximum robustness.
    Composite,
}

impl RenderStage {

    /// All stages, in decreasing order of fidelity.
    pub const ALL: [RenderStage; 4] = [
        RenderStage::RawData,
        RenderStage::HighFidelity,
        RenderStage::SafeMode,
        RenderStage::Composite,
    ];

    /// The parser configuration this stage runs with.
    pub fn parse_options(self) -> ParseOptions {
        match self {
            RenderStage::RawData => ParseOptions::raw_data(),
            RenderStage::HighFidelity => ParseOptions::high_fidelity(),
            RenderStage::SafeMode => ParseOptions::safe_mode(),
            RenderStage::Composite => ParseOptions::composite_only(),
        }
    }
}

impl std::fmt::Display for RenderStage {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(match self {
            RenderStage::RawData => "raw data",
            RenderStage::HighFidelity => "high fidelity",
            RenderStage::SafeMode => "safe mode",
            RenderStage::Composite => "merged composite",
        })
    }
}


/// A successfully rendered document. Ownership moves to the caller;
/// the surface can be displayed or re-encoded directly.
#[derive(Debug, Clone)]
pub struct RenderResult {

    /// The composited RGBA8 surface, canvas-sized.
    pub surface: Canvas,

    /// Which fidelity level produced the surface.
    pub stage: RenderStage,

    /// Total number of groups and leaves in the document.
    pub layer_count: usize,

    /// Canvas width in pixels.
    pub width: usize,

    /// Canvas height in pixels.
    pub height: usize,
}


/// Render a Photoshop file from an in-memory buffer.
pub fn render(bytes: &[u8]) -> Result<RenderResult> {
    render_cancellable(bytes, &CancelFlag::never())
}

/// Render a Photoshop file, polling the flag between layers so another
/// thread can abandon the work.
pub fn render_cancellable(bytes: &[u8], cancel: &CancelFlag) -> Result<RenderResult> {
    for stage in RenderStage::ALL {
        // each attempt owns an independent working set, dropped
        // before the next stage allocates its own
        match attempt_stage(bytes, stage, cancel) {
            Ok(Some(result)) => {
                trace!("rendered {} layers in the {} stage", result.layer_count, stage);
                return Ok(result);
            }

            Ok(None) => debug!("the {} stage produced no usable surface", stage),

            // signature, version and cancellation outcomes cannot change
            // with a lower-fidelity re-parse of the same bytes
            Err(error) if error.is_stage_independent() => return Err(error),

            Err(error) => warn!("the {} stage failed: {}", stage, error),
        }
    }

    Err(Error::UnsupportedStructure)
}

/// Read and render a file from disk.
/// The only function in this crate that touches the file system.
pub fn render_file(path: impl AsRef<Path>) -> Result<RenderResult> {
    render(&std::fs::read(path)?)
}


fn attempt_stage(bytes: &[u8], stage: RenderStage, cancel: &CancelFlag) -> Result<Option<RenderResult>> {
    let document = Document::parse(bytes, &stage.parse_options())?;

    let size = document.header.size;
    let layer_count = document.layer_count();

    let surface = match stage {
        RenderStage::Composite => match &document.merged_image {
            Some(plane) if !plane.is_degenerate() => Canvas::from_plane(plane),
            _ => return Ok(None),
        },

        _ => {
            if !document.has_layer_pixels() {
                return Ok(None);
            }

            composite_tree(&document.layers, size, cancel)?
        }
    };

    if surface.is_degenerate() {
        return Ok(None);
    }

    Ok(Some(RenderResult {
        surface, stage, layer_count,
        width: size.width(),
        height: size.height(),
    }))
}
