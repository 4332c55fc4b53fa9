//! Stagehand - download-to-library automation
//!
//! Watches a debrid cache for finished items, feeds them to a folder-watching
//! download manager as `.crawljob` descriptors, and organizes the downloaded
//! files into movie and TV libraries managed by Radarr/Sonarr-style services.

pub mod config;
pub mod error;
pub mod jobs;
pub mod services;
