//! Hardware-independent core of a VA-style decode backend.
//!
//! Clients create configs, surfaces, contexts and buffers through
//! [`Driver`]; each picture's buffers are folded by a [`codecs::CodecModule`]
//! into one decode submission for a [`DecodeDevice`]. Decoded surfaces can
//! be copied out into images or exported zero-copy through a
//! [`FrameStream`].

pub mod append;
pub mod buffer;
pub mod capabilities;
pub mod codecs;
pub mod config;
pub mod context;
pub mod device;
pub mod driver;
pub mod error;
pub mod export;
pub mod objects;
pub mod params;
mod pipeline;
pub mod registry;
pub mod surface;
pub mod types;
pub mod vtable;

#[cfg(test)]
pub mod mock;

pub use config::DriverConfig;
pub use device::{DecodeDevice, FrameStream};
pub use driver::Driver;
pub use error::{CodecError, DeviceError, DriverError, Result, VaStatus};
pub use export::{ExportError, PrimeSurfaceDescriptor};
pub use registry::HandleRegistry;
pub use vtable::{driver_init, DriverInfo, DriverVTable};
