//! Core library: frame identity, embeddings, matching, polygon areas and the
//! stage pipeline that compares two segmented videos.

pub mod areas;
pub mod config;
pub mod error;
pub mod features;
pub mod frames;
pub mod geometry;
pub mod labels;
pub mod matcher;
pub mod media;
pub mod pipeline;
pub mod preprocess;
pub mod report;
