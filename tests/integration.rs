//! Integration tests for Tile Pyramid.
//!
//! These tests verify end-to-end functionality including:
//! - Building pyramids from PPM images and serving them through the manager
//! - Tile synthesis from ancestors while loads are pending
//! - Dynamic media: generation, write-through and prefix routing
//! - OpenStreetMap downloads against a local tile server
//! - Scene files

mod integration {
    pub mod test_utils;

    pub mod dynamic_tests;
    pub mod pipeline_tests;
    pub mod scene_tests;
}
