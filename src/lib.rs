
//! Read Photoshop PSD and PSB files and composite their layer stacks
//! to an RGBA8 raster surface.
//!
//! Real-world files are frequently damaged, written by third-party
//! tools, or use features no reader fully supports. This crate
//! therefore never trusts a length field, recovers corrupt layers
//! individually, and falls back through four decreasing-fidelity
//! rendering stages before giving up on a file.
//!
//! ```no_run
//! use psd_raster::prelude::*;
//!
//! let bytes = std::fs::read("artwork.psd").unwrap();
//! let rendered = render(&bytes).unwrap();
//!
//! println!(
//!     "composited {} layers at {} x {} (stage: {:?})",
//!     rendered.layer_count, rendered.width, rendered.height, rendered.stage,
//! );
//!
//! let rgba: &[u8] = rendered.surface.data();
//! # let _ = rgba;
//! ```

#![forbid(unsafe_code)]

// TODO #![warn(missing_docs)]

pub mod io;
pub mod math;
pub mod error;
pub mod meta;
pub mod compression;
pub mod layer;
pub mod document;
pub mod compose;
pub mod pipeline;


/// Exports the types that most callers need.
pub mod prelude {

    // main entry points
    pub use crate::pipeline::{
        render, render_cancellable, render_file,
        RenderResult, RenderStage,
    };

    // core data types
    pub use crate::document::Document;
    pub use crate::meta::{ColorMode, FileHeader, ParseOptions, Version};
    pub use crate::layer::{Layer, LayerTree, PixelPlane};
    pub use crate::compose::{Canvas, CancelFlag};
    pub use crate::compose::blend::BlendMode;

    // secondary data types
    pub use crate::error::{Error, Result};
    pub use crate::math::Vec2;
}
