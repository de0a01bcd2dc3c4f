//! # Cadence Audio
//!
//! Positional sound playback for a networked 3D client.
//!
//! This crate provides:
//! - A fixed pool of channels shared by prioritised sources
//! - A fixed pool of buffers holding decoded PCM
//! - Incremental decoding of compressed assets into cached PCM containers
//! - Deferred master, category and mute gains
//! - Procedural wind driven by the local wind vector
//!
//! ## Architecture
//!
//! [`AudioEngine`] owns every pool and registry and is driven by calling
//! [`AudioEngine::idle`] once per frame. Sources refer to channels, buffers
//! and assets by id only, so the engine is the single place where the
//! source/channel pairing changes.
//!
//! ## Decoding
//!
//! Compressed assets are decoded a few kilobytes at a time within a per-frame
//! budget. Finished containers are either kept in the asset store or written
//! to a cache directory by a background I/O thread.
//!
//! ## Backends
//!
//! Output goes through `rodio`, or through a headless device that simulates
//! playback clocks for tests and servers.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod backend;
pub mod buffer;
pub mod channel;
pub mod codec;
pub mod config;
pub mod data;
pub mod decode;
pub mod engine;
pub mod file_io;
pub mod gain;
pub mod listener;
pub mod source;
pub mod store;
pub mod wav;
pub mod wind;

#[cfg(test)]
mod test_support;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::backend::*;
    pub use crate::buffer::*;
    pub use crate::channel::*;
    pub use crate::codec::*;
    pub use crate::config::*;
    pub use crate::data::*;
    pub use crate::decode::*;
    pub use crate::engine::*;
    pub use crate::gain::*;
    pub use crate::listener::*;
    pub use crate::source::*;
    pub use crate::store::*;
    pub use crate::wind::*;
    pub use cadence_common::prelude::*;
}

pub use prelude::*;
