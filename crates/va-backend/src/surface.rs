//! Surfaces, images and the copy-out path.

use tracing::{debug, error, trace, warn};

use crate::driver::Driver;
use crate::error::{DriverError, Result};
use crate::objects::{Buffer, Image, Object, Surface};
use crate::types::{
    surface_format_for_rt, BufferType, ImageFormat, ImageId, SurfaceId, SurfaceStatus,
};

/// Largest image width or height accepted; no NVDEC generation decodes
/// beyond it.
pub const MAX_IMAGE_DIMENSION: u32 = 16384;

impl Driver {
    /// Create `count` unbound surfaces. Only 8, 10 and 12-bit 4:2:0 are
    /// accepted.
    pub fn create_surfaces(
        &mut self,
        rt_format: u32,
        width: u32,
        height: u32,
        count: usize,
    ) -> Result<Vec<SurfaceId>> {
        debug!(rt_format, width, height, count, "create_surfaces");
        let (format, bit_depth) =
            surface_format_for_rt(rt_format).ok_or(DriverError::UnsupportedRtFormat(rt_format))?;
        if width == 0 || height == 0 {
            return Err(DriverError::InvalidParameter("surface size is zero"));
        }

        let mut surfaces = Vec::with_capacity(count);
        for _ in 0..count {
            let surface = Surface::new(width, height, format, bit_depth);
            match self.objects.allocate(Object::Surface(surface)) {
                Ok(id) => surfaces.push(id),
                Err(e) => {
                    for id in surfaces {
                        self.objects.release(id);
                    }
                    return Err(e);
                }
            }
        }
        Ok(surfaces)
    }

    /// Release surfaces. Nothing is released if any id is not a surface.
    pub fn destroy_surfaces(&mut self, surfaces: &[SurfaceId]) -> Result<()> {
        for &id in surfaces {
            self.surface(id)?;
        }
        for &id in surfaces {
            self.objects.release(id);
        }
        Ok(())
    }

    /// Decode completes before `end_picture` returns, so there is nothing to
    /// wait for.
    pub fn sync_surface(&self, id: SurfaceId) -> Result<()> {
        self.surface(id)?;
        Ok(())
    }

    pub fn query_surface_status(&self, id: SurfaceId) -> Result<SurfaceStatus> {
        self.surface(id)?;
        Ok(SurfaceStatus::Ready)
    }

    /// Register an image and its pixel buffer.
    pub fn create_image(
        &mut self,
        format: ImageFormat,
        width: u32,
        height: u32,
    ) -> Result<(ImageId, Image)> {
        debug!(fourcc = %crate::types::FourCc(format.fourcc), width, height, "create_image");
        if !self.query_image_formats().contains(&format) {
            return Err(DriverError::InvalidParameter("unsupported image format"));
        }
        if width == 0 || height == 0 {
            return Err(DriverError::InvalidParameter("image size is zero"));
        }
        if width > MAX_IMAGE_DIMENSION || height > MAX_IMAGE_DIMENSION {
            return Err(DriverError::InvalidParameter("image size exceeds the decoder limit"));
        }
        let layout = Image::layout(format, width, height, 0)
            .ok_or(DriverError::InvalidParameter("image size overflows"))?;

        let buffer = self.objects.allocate(Object::Buffer(Buffer::new(
            BufferType::Image,
            layout.data_size as usize,
            1,
        )))?;
        let image = Image { buffer, ..layout };
        match self.objects.allocate(Object::Image(image)) {
            Ok(id) => Ok((id, image)),
            Err(e) => {
                self.objects.release(buffer);
                Err(e)
            }
        }
    }

    /// Release an image together with its pixel buffer.
    pub fn destroy_image(&mut self, id: ImageId) -> Result<()> {
        let buffer = self.image(id)?.buffer;
        self.objects.release(id);
        self.objects.release(buffer);
        Ok(())
    }

    /// Copy a decoded surface into an image: `height` luma rows followed by
    /// `height / 2` interleaved chroma rows.
    pub fn get_image(
        &mut self,
        surface_id: SurfaceId,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        image_id: ImageId,
    ) -> Result<()> {
        debug!(surface = surface_id, image = image_id, x, y, width, height, "get_image");
        let surface = self.surface(surface_id)?.clone();
        let image = *self.image(image_id)?;
        let session = match surface.session {
            Some(session) if surface.is_decoded() => session,
            _ => {
                warn!(surface = surface_id, "get_image on a surface that was never decoded");
                return Err(DriverError::InvalidSurface(surface_id));
            }
        };

        let row_bytes = width * image.format.bytes_per_sample();
        let Driver { device, objects, .. } = &mut *self;
        let buffer = objects
            .get_mut(image.buffer)
            .and_then(Object::as_buffer_mut)
            .ok_or(DriverError::InvalidBuffer(image.buffer))?;
        if width > image.width
            || height > image.height
            || buffer.data.len() < image.data_size as usize
        {
            return Err(DriverError::InvalidParameter("image too small for requested region"));
        }

        let frame = device
            .map_frame(session, surface.picture_index, surface.fields)
            .map_err(|e| {
                error!(surface = surface_id, error = %e, "failed to map decoded frame");
                DriverError::DecodingError(e)
            })?;
        trace!(surface = surface_id, ptr = frame.ptr, pitch = frame.pitch, "frame mapped");

        let luma_offset = image.offsets[0] as usize;
        let chroma_offset = image.offsets[1] as usize;
        let chroma_src = frame.ptr + u64::from(frame.pitch) * u64::from(surface.height);
        let copied = device
            .copy_to_host(
                frame.ptr,
                frame.pitch,
                &mut buffer.data[luma_offset..chroma_offset],
                image.pitches[0],
                row_bytes,
                height,
            )
            .and_then(|()| {
                device.copy_to_host(
                    chroma_src,
                    frame.pitch,
                    &mut buffer.data[chroma_offset..],
                    image.pitches[1],
                    row_bytes,
                    height / 2,
                )
            });

        let unmapped = device.unmap_frame(session, frame);
        copied.map_err(|e| DriverError::OperationFailed(e.to_string()))?;
        unmapped.map_err(|e| DriverError::OperationFailed(e.to_string()))?;
        Ok(())
    }

    pub fn derive_image(&mut self, _surface: SurfaceId) -> Result<ImageId> {
        Err(DriverError::Unimplemented("derive_image"))
    }

    pub fn put_surface(&mut self, _surface: SurfaceId) -> Result<()> {
        Err(DriverError::Unimplemented("put_surface"))
    }

    pub fn put_image(&mut self, _surface: SurfaceId, _image: ImageId) -> Result<()> {
        Err(DriverError::Unimplemented("put_image"))
    }

    pub fn query_surface_error(&mut self, _surface: SurfaceId) -> Result<()> {
        Err(DriverError::Unimplemented("query_surface_error"))
    }
}
