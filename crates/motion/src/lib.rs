//! Castkit Motion Analysis
//!
//! Estimates motion between pairs of frames and decides whether it looks
//! like camera shake:
//! - **Block matching:** per-block motion vectors via exhaustive SAD search
//! - **Optical flow:** single-step Lucas-Kanade at sparse points
//! - **Shake classification:** direction dispersion and magnitude statistics
//!
//! This crate is pure computation with no I/O. Frames in, records out.

pub mod analyzer;
pub mod block_match;
pub mod error;
pub mod luma;
pub mod optical_flow;
pub mod shake;

pub use analyzer::{AnalyzerOptions, MotionAnalyzer};
pub use block_match::{BlockMatchConfig, MotionVectorEstimator};
pub use error::{MotionError, MotionResult};
pub use optical_flow::{FlowConfig, OpticalFlowEstimator};
pub use shake::{ShakeClassifier, ShakeConfig};
