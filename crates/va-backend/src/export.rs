//! Zero-copy export of decoded surfaces through a bounded frame stream.
//!
//! Each export copies the frame into a pair of device arrays (luma and
//! interleaved chroma), presents them on the stream, then drains consumer
//! events until the poll times out. The consumer's dma-buf export of the
//! presented image becomes the surface descriptor handed to the client.

use std::os::fd::OwnedFd;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::config::DriverConfig;
use crate::device::{
    ConsumerImage, DevicePtr, DmabufLayout, DmabufPlanes, FrameLayout, FrameStream, MappedFrame,
    SessionHandle, StreamEvent, StreamFrame,
};
use crate::driver::Driver;
use crate::error::{DeviceError, DriverError, Result};
use crate::objects::Surface;
use crate::types::{
    PixelFormat, SurfaceId, DRM_FORMAT_NV12, DRM_FORMAT_R16, DRM_FORMAT_R8, DRM_FORMAT_RG1616,
    DRM_FORMAT_RG88, SURFACE_MEM_TYPE_DRM_PRIME_2,
};

/// Row alignment of the scratch frame used for never-decoded surfaces.
const BLANK_PITCH_ALIGN: u32 = 256;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("consumer holds {outstanding} frames and returned none")]
    Backpressure { outstanding: u32 },

    #[error("no frame stream is attached")]
    NoStream,

    #[error("consumer produced no image for the presented frame")]
    NoImage,

    #[error("consumer exported {planes} planes, expected 2")]
    PlaneCount { planes: usize },
}

/// One dma-buf backing a descriptor layer.
#[derive(Debug)]
pub struct ExportedObject {
    pub fd: OwnedFd,
    pub size: u32,
    pub modifier: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportedLayer {
    pub drm_format: u32,
    pub object_index: u32,
    pub offset: u32,
    pub pitch: u32,
}

/// Two-object, two-layer PRIME descriptor: luma then interleaved chroma.
#[derive(Debug)]
pub struct PrimeSurfaceDescriptor {
    pub fourcc: u32,
    pub width: u32,
    pub height: u32,
    pub objects: [ExportedObject; 2],
    pub layers: [ExportedLayer; 2],
}

/// Consumer image exported during an event drain.
#[derive(Debug)]
pub struct ExportedImage {
    pub layout: DmabufLayout,
    pub planes: DmabufPlanes,
}

/// Producer side of the export stream.
pub struct Exporter {
    stream: Box<dyn FrameStream>,
    fifo_length: u32,
    timeout: Duration,
    /// Frames presented and not yet returned by the consumer.
    outstanding: u32,
    /// Returned frames kept for reuse, at most `fifo_length`.
    spares: Vec<StreamFrame>,
    images: Vec<ConsumerImage>,
    presented: u64,
}

impl Exporter {
    pub fn new(stream: Box<dyn FrameStream>, config: &DriverConfig) -> Self {
        Exporter {
            stream,
            fifo_length: config.fifo_length,
            timeout: config.event_timeout,
            outstanding: 0,
            spares: Vec::new(),
            images: Vec::new(),
            presented: 0,
        }
    }

    pub fn outstanding(&self) -> u32 {
        self.outstanding
    }

    pub fn spare_count(&self) -> usize {
        self.spares.len()
    }

    /// Take back every frame the consumer has finished with. The stream is
    /// only asked while frames are outstanding.
    fn reclaim(&mut self) -> Result<(), ExportError> {
        while self.outstanding > 0 {
            let Some(frame) = self.stream.return_frame()? else {
                break;
            };
            self.outstanding = self.outstanding.saturating_sub(1);
            trace!(outstanding = self.outstanding, "frame returned");
            if self.spares.len() < self.fifo_length as usize {
                self.spares.push(frame);
            } else {
                self.stream.destroy_arrays(frame.arrays)?;
            }
        }
        Ok(())
    }

    /// A frame for `layout`: a matching spare if there is one, otherwise
    /// fresh arrays. A mismatched spare is released to make room.
    fn frame_for(&mut self, layout: FrameLayout) -> Result<StreamFrame, ExportError> {
        if let Some(pos) = self.spares.iter().position(|f| f.layout.same_size(&layout)) {
            trace!(width = layout.width, height = layout.height, "reusing frame arrays");
            return Ok(self.spares.swap_remove(pos));
        }
        if let Some(stale) = self.spares.pop() {
            debug!(
                old_width = stale.layout.width,
                old_height = stale.layout.height,
                width = layout.width,
                height = layout.height,
                "frame size changed, recreating arrays"
            );
            self.stream.destroy_arrays(stale.arrays)?;
        }
        let arrays = self.stream.create_arrays(&layout)?;
        Ok(StreamFrame { arrays, layout })
    }

    /// Copy the 2-plane frame at `src` into stream arrays, present it and
    /// collect the consumer's export of it.
    pub fn present(
        &mut self,
        src: DevicePtr,
        src_pitch: u32,
        layout: FrameLayout,
    ) -> Result<ExportedImage, ExportError> {
        self.reclaim()?;
        if self.outstanding >= self.fifo_length {
            warn!(outstanding = self.outstanding, "export stream full");
            return Err(ExportError::Backpressure { outstanding: self.outstanding });
        }

        let frame = self.frame_for(layout)?;
        let shown = self
            .stream
            .copy_planes(src, src_pitch, &frame)
            .and_then(|()| self.stream.present(&frame));
        if let Err(e) = shown {
            self.spares.push(frame);
            return Err(e.into());
        }
        self.outstanding += 1;
        self.presented += 1;
        trace!(presented = self.presented, outstanding = self.outstanding, "frame presented");

        self.drain_events()?.ok_or(ExportError::NoImage)
    }

    /// Handle consumer events until none remain. Returns the last image
    /// exported along the way.
    fn drain_events(&mut self) -> Result<Option<ExportedImage>, ExportError> {
        let mut exported = None;
        while let Some(event) = self.stream.next_event(self.timeout)? {
            match event {
                StreamEvent::ImageAdded => {
                    let image = self.stream.create_image()?;
                    trace!(?image, "consumer image added");
                    self.images.push(image);
                }
                StreamEvent::ImageAvailable => {
                    let image = self.stream.acquire_image()?;
                    let layout = self.stream.query_dmabuf(image)?;
                    let planes = self.stream.export_dmabuf(image, layout.planes);
                    let released = self.stream.release_image(image);
                    let planes = planes?;
                    released?;
                    trace!(?image, fourcc = layout.fourcc, planes = layout.planes, "image exported");
                    exported = Some(ExportedImage { layout, planes });
                }
                StreamEvent::ImageRemoved(image) => {
                    trace!(?image, "consumer image removed");
                    self.images.retain(|&i| i != image);
                    self.stream.destroy_image(image)?;
                }
                StreamEvent::Other(kind) => trace!(kind, "ignoring stream event"),
            }
        }
        Ok(exported)
    }

    /// Release every spare array and consumer image.
    pub fn shutdown(&mut self) {
        for frame in self.spares.drain(..) {
            if let Err(e) = self.stream.destroy_arrays(frame.arrays) {
                warn!(error = %e, "failed to destroy frame arrays");
            }
        }
        for image in self.images.drain(..) {
            if let Err(e) = self.stream.destroy_image(image) {
                warn!(error = %e, ?image, "failed to destroy consumer image");
            }
        }
        info!(presented = self.presented, "export stream released");
    }
}

/// Layer formats for the consumer's fourcc: 8-bit for NV12, 16-bit
/// containers for everything else.
fn layer_formats(fourcc: u32) -> (u32, u32) {
    if fourcc == DRM_FORMAT_NV12 {
        (DRM_FORMAT_R8, DRM_FORMAT_RG88)
    } else {
        (DRM_FORMAT_R16, DRM_FORMAT_RG1616)
    }
}

/// Build the 2-layer descriptor from a consumer export. The fourcc and layer
/// formats are the ones the consumer reported for the image.
pub fn build_descriptor(
    surface: &Surface,
    image: ExportedImage,
) -> Result<PrimeSurfaceDescriptor, ExportError> {
    let ExportedImage { layout, planes } = image;
    let DmabufPlanes { fds, strides, offsets } = planes;
    if fds.len() != 2 || strides.len() < 2 || offsets.len() < 2 {
        return Err(ExportError::PlaneCount { planes: fds.len() });
    }
    let mut fds = fds.into_iter();
    let (Some(luma_fd), Some(chroma_fd)) = (fds.next(), fds.next()) else {
        return Err(ExportError::PlaneCount { planes: 0 });
    };

    let (width, height) = (surface.width, surface.height);
    let bps = surface.bytes_per_sample();
    let (luma_format, chroma_format) = layer_formats(layout.fourcc);
    if (layout.fourcc == DRM_FORMAT_NV12) != (surface.format == PixelFormat::Nv12) {
        debug!(
            fourcc = layout.fourcc,
            format = ?surface.format,
            "consumer fourcc differs from surface format"
        );
    }

    Ok(PrimeSurfaceDescriptor {
        fourcc: layout.fourcc,
        width,
        height,
        objects: [
            ExportedObject {
                fd: luma_fd,
                size: width * height * bps,
                modifier: layout.modifiers[0],
            },
            ExportedObject {
                fd: chroma_fd,
                size: width * (height / 2) * bps,
                modifier: layout.modifiers[1],
            },
        ],
        layers: [
            ExportedLayer {
                drm_format: luma_format,
                object_index: 0,
                offset: offsets[0],
                pitch: strides[0],
            },
            ExportedLayer {
                drm_format: chroma_format,
                object_index: 1,
                offset: offsets[1],
                pitch: strides[1],
            },
        ],
    })
}

/// Where the exported pixels come from.
enum FrameSource {
    Mapped(SessionHandle, MappedFrame),
    Scratch(DevicePtr),
}

impl Driver {
    /// Export `surface` as a PRIME descriptor. Only the 2-layer DRM PRIME
    /// memory type is served.
    pub fn export_surface_handle(
        &mut self,
        surface_id: SurfaceId,
        mem_type: u32,
        flags: u32,
    ) -> Result<PrimeSurfaceDescriptor> {
        debug!(surface = surface_id, mem_type, flags, "export_surface_handle");
        if mem_type != SURFACE_MEM_TYPE_DRM_PRIME_2 {
            return Err(DriverError::UnsupportedMemoryType(mem_type));
        }
        let surface = self.surface(surface_id)?.clone();

        match self.export_surface(&surface) {
            Ok(descriptor) => Ok(descriptor),
            Err(e) => {
                error!(surface = surface_id, error = %e, "surface export failed");
                if self.config.abort_on_export_failure {
                    std::process::abort();
                }
                Err(e.into())
            }
        }
    }

    fn export_surface(&mut self, surface: &Surface) -> Result<PrimeSurfaceDescriptor, ExportError> {
        let Driver { device, exporter, .. } = &mut *self;
        let exporter = exporter.as_mut().ok_or(ExportError::NoStream)?;

        let layout = FrameLayout {
            width: surface.width,
            height: surface.height,
            format: surface.format,
            bit_depth: surface.bit_depth,
        };
        let (source, src, pitch) = match surface.session {
            Some(session) if surface.is_decoded() => {
                let frame = device.map_frame(session, surface.picture_index, surface.fields)?;
                (FrameSource::Mapped(session, frame), frame.ptr, frame.pitch)
            }
            _ => {
                let pitch = (surface.width * surface.bytes_per_sample())
                    .next_multiple_of(BLANK_PITCH_ALIGN);
                let rows = surface.height + surface.height / 2;
                let ptr = device.alloc_scratch(pitch as usize * rows as usize)?;
                trace!(pitch, rows, "exporting blank surface from scratch memory");
                (FrameSource::Scratch(ptr), ptr, pitch)
            }
        };

        let presented = exporter.present(src, pitch, layout);
        let released = match source {
            FrameSource::Mapped(session, frame) => device.unmap_frame(session, frame),
            FrameSource::Scratch(ptr) => device.free_scratch(ptr),
        };
        let image = presented?;
        released?;
        build_descriptor(surface, image)
    }
}
