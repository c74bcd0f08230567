//! Data models for the asset registry.

pub mod asset;

pub use asset::Asset;
