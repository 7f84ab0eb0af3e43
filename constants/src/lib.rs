/// Shared constants for the point cloud pipeline crates
pub mod class;
pub mod coordinate_system;
pub mod format;
