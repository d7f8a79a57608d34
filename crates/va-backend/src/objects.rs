//! Records stored in the driver's handle registry.

use bytes::BytesMut;

use crate::codecs::ClientBuffer;
use crate::context::Context;
use crate::device::{FrameFields, SessionHandle};
use crate::types::{
    BufferId, BufferType, ChromaFormat, ConfigAttribute, ContextId, Entrypoint, ImageFormat,
    PixelFormat, Profile, VideoCodec,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Config,
    Surface,
    Context,
    Buffer,
    Image,
}

pub enum Object {
    Config(ConfigObject),
    Surface(Surface),
    Context(Context),
    Buffer(Buffer),
    Image(Image),
}

impl Object {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Config(_) => ObjectKind::Config,
            Object::Surface(_) => ObjectKind::Surface,
            Object::Context(_) => ObjectKind::Context,
            Object::Buffer(_) => ObjectKind::Buffer,
            Object::Image(_) => ObjectKind::Image,
        }
    }
}

macro_rules! object_accessors {
    ($($variant:ident => $ty:ty, $as_ref:ident, $as_mut:ident;)*) => {
        impl Object {
            $(
                pub fn $as_ref(&self) -> Option<&$ty> {
                    match self {
                        Object::$variant(inner) => Some(inner),
                        _ => None,
                    }
                }

                pub fn $as_mut(&mut self) -> Option<&mut $ty> {
                    match self {
                        Object::$variant(inner) => Some(inner),
                        _ => None,
                    }
                }
            )*
        }
    };
}

object_accessors! {
    Config => ConfigObject, as_config, as_config_mut;
    Surface => Surface, as_surface, as_surface_mut;
    Context => Context, as_context, as_context_mut;
    Buffer => Buffer, as_buffer, as_buffer_mut;
    Image => Image, as_image, as_image_mut;
}

/// Immutable result of capability resolution.
#[derive(Debug, Clone)]
pub struct ConfigObject {
    pub profile: Profile,
    pub entrypoint: Entrypoint,
    pub codec: VideoCodec,
    pub format: PixelFormat,
    pub chroma: ChromaFormat,
    pub bit_depth: u8,
    pub attributes: Vec<ConfigAttribute>,
}

/// A decode target.
#[derive(Debug, Clone)]
pub struct Surface {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub bit_depth: u8,
    /// Set once by the owning context; -1 while unbound.
    pub picture_index: i32,
    pub context: Option<ContextId>,
    /// Session that last decoded into this surface. `None` until then.
    pub session: Option<SessionHandle>,
    pub fields: FrameFields,
}

impl Surface {
    pub fn new(width: u32, height: u32, format: PixelFormat, bit_depth: u8) -> Self {
        Surface {
            width,
            height,
            format,
            bit_depth,
            picture_index: -1,
            context: None,
            session: None,
            fields: FrameFields::default(),
        }
    }

    pub fn is_decoded(&self) -> bool {
        self.session.is_some() && self.picture_index >= 0
    }

    pub fn bytes_per_sample(&self) -> u32 {
        self.format.bytes_per_sample()
    }

    /// Drop the binding to a context and its session.
    pub fn detach(&mut self) {
        self.picture_index = -1;
        self.context = None;
        self.session = None;
        self.fields = FrameFields::default();
    }
}

/// A client-visible memory block.
#[derive(Debug)]
pub struct Buffer {
    pub kind: BufferType,
    pub element_size: usize,
    pub elements: usize,
    /// Allocated at creation; never shrinks.
    pub data: BytesMut,
}

impl Buffer {
    pub fn new(kind: BufferType, element_size: usize, elements: usize) -> Self {
        let size = element_size * elements;
        Buffer {
            kind,
            element_size,
            elements,
            data: BytesMut::zeroed(size),
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Contents limited to the current element count.
    pub fn contents(&self) -> ClientBuffer<'_> {
        let used = (self.element_size * self.elements).min(self.data.len());
        ClientBuffer {
            data: &self.data[..used],
            element_size: self.element_size,
            elements: self.elements,
        }
    }
}

/// Client-visible pixel layout over a driver-owned buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Image {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub buffer: BufferId,
    pub data_size: u32,
    pub num_planes: u32,
    pub pitches: [u32; 2],
    pub offsets: [u32; 2],
}

impl Image {
    /// NV12-style 2-plane layout: luma, then interleaved chroma at half height.
    /// `None` if any size does not fit in 32 bits.
    pub fn layout(format: ImageFormat, width: u32, height: u32, buffer: BufferId) -> Option<Self> {
        let bps = format.bytes_per_sample();
        let pitch = width.checked_mul(bps)?;
        let luma_size = pitch.checked_mul(height)?;
        let chroma_size = pitch.checked_mul(height / 2)?;
        Some(Image {
            format,
            width,
            height,
            buffer,
            data_size: luma_size.checked_add(chroma_size)?,
            num_planes: 2,
            pitches: [pitch, pitch],
            offsets: [0, luma_size],
        })
    }
}
