pub mod annotation;
pub mod background;
pub mod batch;
pub mod color_utils;
pub mod config;
pub mod corpus;
pub mod error;
pub mod image_input;
pub mod manifest;
pub mod mask_analysis;
pub mod output_manager;
pub mod preview;
pub mod progress;
pub mod removal;
pub mod run_metadata;
pub mod split;
