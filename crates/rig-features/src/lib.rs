//! Feature engine for rig calibration: SIFT/SURF detection, pairwise
//! matching with a geometric pre-filter and affine RANSAC, fusion of
//! pairwise matches into multi-view tracks, and the legacy binary match-file
//! format.
//!
//! Detection and matching run on bounded worker pools; all other work is
//! synchronous. Descriptors are transient: they are dropped as soon as
//! pairwise matching completes.

/// Keypoint and descriptor detection.
pub mod detect;
/// Detection + matching orchestration over many image pairs.
pub mod engine;
/// Binary interest-point match files.
pub mod matchfile;
/// Pairwise descriptor matching and geometric filtering.
pub mod matching;
/// Union-find fusion of pairwise matches into tracks.
pub mod tracks;

pub use detect::{detect_features, FeatureConfig, FeatureDetectorKind};
pub use engine::{detect_match_features, MatchEngineConfig, MatchingOutput};
pub use matchfile::{match_file_name, read_match_file, save_inlier_match_pairs, write_match_file, InterestPoint};
pub use matching::{match_features_with_cams, MatchPair};
pub use tracks::build_tracks;
