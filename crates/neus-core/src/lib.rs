pub mod camera;
pub mod config;
pub mod embedding;
pub mod fields;
