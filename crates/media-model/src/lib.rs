//! Castkit Media Model
//!
//! Defines the core data contracts shared by the export pipeline and the
//! motion analysis subsystem:
//! - **Pixels:** RGBA frame buffers and colors
//! - **Geometry:** pixel-space rectangles and fit policies
//! - **Layout:** background, padding, and overlay styling for a job
//! - **Job:** export requests as sent by an editor and their resolved settings
//! - **Motion:** motion vectors and per-frame-pair analysis records

pub mod geometry;
pub mod job;
pub mod layout;
pub mod motion;
pub mod pixel;

pub use geometry::*;
pub use job::*;
pub use layout::*;
pub use motion::*;
pub use pixel::*;
