//! Core math, camera models, and data model for `rig-calib`.
//!
//! This crate contains:
//! - linear algebra type aliases (`Real`, `Vec2`, `Pt3`, ...),
//! - rigid/affine transform codecs and bracketed pose interpolation,
//! - multi-view triangulation and the similarity (Kabsch + scale) solve,
//! - the sensor camera model (focal, principal point, FOV/radtan distortion),
//! - acquisition, depth-cloud, track, and inlier-mask containers.
//!
//! Feature matching, the optimization backend, and the refinement pipeline
//! live in `rig-features`, `rig-optim` and `rig-pipeline`.

/// Camera intrinsics and distortion models.
pub mod camera;
/// Linear algebra type aliases.
pub mod math;
/// Sensor descriptors for a rigid rig.
pub mod sensor;
/// Similarity (rotation + translation + scale) fitting.
pub mod similarity;
/// Rigid/affine transform codecs and pose interpolation.
pub mod transform;
/// Multi-view DLT triangulation.
pub mod triangulate;
/// Acquisitions, depth clouds, tracks, and the inlier mask.
pub mod types;

pub use camera::*;
pub use math::*;
pub use sensor::*;
pub use similarity::*;
pub use transform::*;
pub use triangulate::*;
pub use types::*;
