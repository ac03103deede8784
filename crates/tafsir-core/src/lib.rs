//! Chapter audio sync, part navigation and resume points for the tafsir
//! player, plus the content, catalog and notification plumbing around them.

pub mod cache;
pub mod cancellation;
pub mod catalog;
pub mod config;
pub mod content;
pub mod model;
pub mod navigator;
pub mod notifications;
pub mod player;
pub mod progress;
pub mod session;
pub mod text_utils;
pub mod timing;
pub mod tracker;
