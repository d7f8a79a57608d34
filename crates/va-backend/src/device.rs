//! Hardware seams. The core never touches the vendor libraries directly; it
//! drives a [`DecodeDevice`] for decoding and copy-out, and a [`FrameStream`]
//! for zero-copy export.

use std::os::fd::OwnedFd;
use std::time::Duration;

use crate::error::DeviceError;
use crate::params::PictureParams;
use crate::types::{ChromaFormat, PixelFormat, VideoCodec};

/// Device virtual address.
pub type DevicePtr = u64;

/// Opaque decode session owned by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub u64);

/// Result of a capability query for one (codec, chroma, bit depth) triple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderCaps {
    pub supported: bool,
    pub min_width: u32,
    pub min_height: u32,
    pub max_width: u32,
    pub max_height: u32,
    /// One bit per [`PixelFormat`] the engine can write, `1 << format`.
    pub output_format_mask: u16,
}

impl DecoderCaps {
    pub fn supports_output(&self, format: PixelFormat) -> bool {
        self.output_format_mask & (1 << format as u16) != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParams {
    pub codec: VideoCodec,
    pub chroma: ChromaFormat,
    pub format: PixelFormat,
    pub bit_depth: u8,
    pub width: u32,
    pub height: u32,
    /// Decode surfaces and output surfaces are both sized to this.
    pub num_surfaces: u32,
}

/// Field layout used when mapping a decoded picture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFields {
    pub progressive: bool,
    pub top_field_first: bool,
    pub second_field: bool,
}

/// A decoded picture mapped into device memory: luma at `ptr`, chroma
/// `height` rows below, both with stride `pitch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedFrame {
    pub ptr: DevicePtr,
    pub pitch: u32,
}

/// One accumulated picture, ready for the decode engine.
#[derive(Debug)]
pub struct DecodeSubmission<'a> {
    pub params: &'a PictureParams,
    pub bitstream: &'a [u8],
    pub slice_offsets: &'a [u32],
}

pub trait DecodeDevice: Send {
    /// Human-readable device name for logs and diagnostics.
    fn name(&self) -> String;

    fn decoder_caps(
        &mut self,
        codec: VideoCodec,
        chroma: ChromaFormat,
        bit_depth: u8,
    ) -> Result<DecoderCaps, DeviceError>;

    fn create_session(&mut self, params: &SessionParams) -> Result<SessionHandle, DeviceError>;

    fn destroy_session(&mut self, session: SessionHandle) -> Result<(), DeviceError>;

    fn decode_picture(
        &mut self,
        session: SessionHandle,
        submission: &DecodeSubmission<'_>,
    ) -> Result<(), DeviceError>;

    fn map_frame(
        &mut self,
        session: SessionHandle,
        picture_index: i32,
        fields: FrameFields,
    ) -> Result<MappedFrame, DeviceError>;

    fn unmap_frame(&mut self, session: SessionHandle, frame: MappedFrame)
        -> Result<(), DeviceError>;

    /// Copy `rows` rows of `width_bytes` from device memory into `dst`.
    fn copy_to_host(
        &mut self,
        src: DevicePtr,
        src_pitch: u32,
        dst: &mut [u8],
        dst_pitch: u32,
        width_bytes: u32,
        rows: u32,
    ) -> Result<(), DeviceError>;

    /// Zero-filled device allocation.
    fn alloc_scratch(&mut self, size: usize) -> Result<DevicePtr, DeviceError>;

    fn free_scratch(&mut self, ptr: DevicePtr) -> Result<(), DeviceError>;
}

// ── Frame stream ──

/// Device array backing one plane of a presented frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArrayHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneArrays {
    pub luma: ArrayHandle,
    pub chroma: ArrayHandle,
}

/// Geometry of a frame handed to the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub bit_depth: u8,
}

impl FrameLayout {
    pub fn bytes_per_sample(&self) -> u32 {
        self.format.bytes_per_sample()
    }

    pub fn same_size(&self, other: &FrameLayout) -> bool {
        self.width == other.width && self.height == other.height && self.format == other.format
    }
}

/// A frame the producer owns: arrays plus the layout they were created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFrame {
    pub arrays: PlaneArrays,
    pub layout: FrameLayout,
}

/// Consumer-side image handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerImage(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    ImageAdded,
    ImageAvailable,
    ImageRemoved(ConsumerImage),
    Other(u32),
}

/// Layout reported by the consumer before exporting an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmabufLayout {
    pub fourcc: u32,
    pub planes: u32,
    pub modifiers: [u64; 4],
}

/// An exported consumer image. One fd, stride and offset per plane.
#[derive(Debug)]
pub struct DmabufPlanes {
    pub fds: Vec<OwnedFd>,
    pub strides: Vec<u32>,
    pub offsets: Vec<u32>,
}

/// Producer end of a bounded GPU frame FIFO.
pub trait FrameStream: Send {
    /// Take back a frame the consumer finished with, without waiting.
    /// `None` when the consumer still holds every presented frame.
    fn return_frame(&mut self) -> Result<Option<StreamFrame>, DeviceError>;

    fn create_arrays(&mut self, layout: &FrameLayout) -> Result<PlaneArrays, DeviceError>;

    fn destroy_arrays(&mut self, arrays: PlaneArrays) -> Result<(), DeviceError>;

    /// Copy a 2-plane frame at `src` into the arrays.
    fn copy_planes(
        &mut self,
        src: DevicePtr,
        src_pitch: u32,
        frame: &StreamFrame,
    ) -> Result<(), DeviceError>;

    fn present(&mut self, frame: &StreamFrame) -> Result<(), DeviceError>;

    /// Next consumer event. `None` once the poll times out.
    fn next_event(&mut self, timeout: Duration) -> Result<Option<StreamEvent>, DeviceError>;

    fn create_image(&mut self) -> Result<ConsumerImage, DeviceError>;

    fn acquire_image(&mut self) -> Result<ConsumerImage, DeviceError>;

    fn query_dmabuf(&mut self, image: ConsumerImage) -> Result<DmabufLayout, DeviceError>;

    fn export_dmabuf(
        &mut self,
        image: ConsumerImage,
        planes: u32,
    ) -> Result<DmabufPlanes, DeviceError>;

    fn release_image(&mut self, image: ConsumerImage) -> Result<(), DeviceError>;

    fn destroy_image(&mut self, image: ConsumerImage) -> Result<(), DeviceError>;
}
