//! Everything that reads the filesystem: classification, template matching,
//! header metadata and frame integrity.

pub mod exr;
pub mod filesystem;
pub mod integrity;
pub mod metadata;
pub mod templates;
