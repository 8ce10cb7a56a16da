//! Refinement pipeline for a multi-sensor camera rig.
//!
//! Given a rig configuration, an image-list manifest, and initial reference
//! poses, the pipeline brackets every non-reference acquisition between two
//! reference frames, builds feature tracks, and jointly refines reference
//! poses, extrinsics, intrinsics, depth-to-image transforms, timestamp
//! offsets, and triangulated landmarks over several robustified
//! least-squares passes with outlier rejection in between.

/// Time bracketing of acquisitions between reference frames.
pub mod bracket;
/// The immutable runtime configuration.
pub mod config;
/// Manifest and image/depth loading.
pub mod input;
/// Persistence formats.
pub mod io;
/// Mesh collaborator interface and intersection caches.
pub mod mesh;
/// Per-pass outlier flagging.
pub mod outliers;
/// World-to-camera recomputation.
pub mod poses;
/// The optimization driver.
pub mod refine;
/// Control-point registration to world coordinates.
pub mod registration;
/// Track re-triangulation.
pub mod tracks;

pub use bracket::{lookup_images_and_brackets, BracketConfig, BracketedCams};
pub use config::{IntrinsicsSelection, RefinerConfig, DEPTH_TO_IMAGE_NAME};
pub use input::{read_image_and_depth_data, LoadedData, SensorData};
pub use mesh::{MeshCache, RayMeshIntersector};
pub use refine::RigRefiner;
