//! Persistence: the rig-configuration text format, the image-list manifest,
//! the NVM landmark format, and the XYZ depth raster.

pub mod image_list;
pub mod nvm;
pub mod rig_config;
pub mod xyz_grid;

pub use image_list::{read_image_list, write_image_list, ImageListRow, NO_DEPTH_FILE};
pub use nvm::{read_nvm, write_inlier_nvm, write_nvm, NvmData};
pub use rig_config::{read_rig_config, write_rig_config};
pub use xyz_grid::{read_xyz_grid, write_xyz_grid};
