//! Command handlers

pub mod config;
pub mod item;
pub mod share;
pub mod space;
pub mod status;
pub mod sync;
