//! EGLStream producer with an image consumer on the same display.
//!
//! CUDA presents plane arrays into the stream; the NV image consumer turns
//! each presented frame into an `EGLImage` that MESA's dma-buf export hands
//! back as file descriptors.

use std::os::fd::{FromRawFd, OwnedFd};
use std::sync::Arc;
use std::time::Duration;

use libc::c_int;
use tracing::{debug, info, trace, warn};
use va_backend::device::{
    ArrayHandle, ConsumerImage, DevicePtr, DmabufLayout, DmabufPlanes, FrameLayout, PlaneArrays,
    StreamEvent, StreamFrame,
};
use va_backend::{DeviceError, FrameStream};

use crate::cuda::{check, CudaContext};
use crate::ffi::{
    self, CUarray, CUeglFrame, CUeglStreamConnection, EGLAttrib, EGLDisplay, EGLImage, EGLStreamKHR,
    EglLibrary, CUDA_ARRAY3D_DESCRIPTOR, CUDA_MEMCPY3D,
};
use crate::format::{array_format, egl_color_format, layout_of};

/// Producer stream size hint passed to `cuEGLStreamProducerConnect`.
const PRODUCER_SIZE_HINT: i32 = 1024;

/// Most planes a dma-buf export can report.
const MAX_DMABUF_PLANES: usize = 4;

pub struct EglFrameStream {
    cuda: Arc<CudaContext>,
    egl: EglLibrary,
    display: EGLDisplay,
    stream: EGLStreamKHR,
    connection: CUeglStreamConnection,
}

// SAFETY: The display, stream and connection are used only through `&mut
// self`; the CUDA context is made current before every producer call.
unsafe impl Send for EglFrameStream {}

fn array(handle: ArrayHandle) -> CUarray {
    handle.0 as usize as CUarray
}

fn image_ptr(image: ConsumerImage) -> EGLImage {
    image.0 as usize as EGLImage
}

impl EglFrameStream {
    /// Open the default display, create a FIFO stream of `fifo_length` frames
    /// and connect the image consumer and the CUDA producer to it.
    pub fn open(
        cuda: Arc<CudaContext>,
        egl: EglLibrary,
        fifo_length: u32,
    ) -> Result<Self, DeviceError> {
        cuda.make_current()?;
        let fifo = i32::try_from(fifo_length).map_err(|_| DeviceError::new("eglCreateStreamKHR", -1))?;

        // SAFETY: Arguments follow the EGL 1.5 and stream extension contracts; every
        // returned handle is checked before use.
        unsafe {
            let display = (egl.eglGetDisplay)(std::ptr::null_mut());
            if display == ffi::EGL_NO_DISPLAY {
                return Err(DeviceError::new("eglGetDisplay", (egl.eglGetError)()));
            }
            let (mut major, mut minor) = (0, 0);
            if (egl.eglInitialize)(display, &mut major, &mut minor) == ffi::EGL_FALSE {
                return Err(DeviceError::new("eglInitialize", (egl.eglGetError)()));
            }
            debug!(major, minor, "EGL display initialised");

            let attribs = [ffi::EGL_STREAM_FIFO_LENGTH_KHR, fifo, ffi::EGL_NONE];
            let stream = (egl.eglCreateStreamKHR)(display, attribs.as_ptr());
            if stream == ffi::EGL_NO_STREAM_KHR {
                let code = (egl.eglGetError)();
                (egl.eglTerminate)(display);
                return Err(DeviceError::new("eglCreateStreamKHR", code));
            }

            let mut this = EglFrameStream {
                cuda,
                egl,
                display,
                stream,
                connection: std::ptr::null_mut(),
            };

            let consumer_attribs = [ffi::EGL_NONE as EGLAttrib];
            let connected = (this.egl.eglStreamImageConsumerConnectNV)(
                display,
                stream,
                0,
                std::ptr::null(),
                consumer_attribs.as_ptr(),
            );
            if connected == ffi::EGL_FALSE {
                return Err(this.egl_error("eglStreamImageConsumerConnectNV"));
            }

            check(
                "cuEGLStreamProducerConnect",
                (this.cuda.lib.cuEGLStreamProducerConnect)(
                    &mut this.connection,
                    stream,
                    PRODUCER_SIZE_HINT,
                    PRODUCER_SIZE_HINT,
                ),
            )?;

            info!(fifo_length, "EGL frame stream connected");
            Ok(this)
        }
    }

    fn egl_error(&self, call: &'static str) -> DeviceError {
        // SAFETY: eglGetError only reads thread-local state.
        DeviceError::new(call, unsafe { (self.egl.eglGetError)() })
    }

    fn egl_check(&self, call: &'static str, ok: ffi::EGLBoolean) -> Result<(), DeviceError> {
        if ok == ffi::EGL_FALSE {
            Err(self.egl_error(call))
        } else {
            Ok(())
        }
    }

    fn create_array(&self, desc: &CUDA_ARRAY3D_DESCRIPTOR) -> Result<ArrayHandle, DeviceError> {
        let mut arr: CUarray = std::ptr::null_mut();
        // SAFETY: `desc` is initialised; out-pointer is a valid local.
        check("cuArray3DCreate", unsafe { (self.cuda.lib.cuArray3DCreate)(&mut arr, desc) })?;
        Ok(ArrayHandle(arr as usize as u64))
    }
}

impl FrameStream for EglFrameStream {
    /// Returns immediately; the producer reports a timeout code when the
    /// consumer holds every frame.
    fn return_frame(&mut self) -> Result<Option<StreamFrame>, DeviceError> {
        self.cuda.make_current()?;
        let mut frame = CUeglFrame::default();
        // SAFETY: `frame` is a valid out-struct; a null stream means the
        // default stream.
        let code = unsafe {
            (self.cuda.lib.cuEGLStreamProducerReturnFrame)(
                &mut self.connection,
                &mut frame,
                std::ptr::null_mut(),
            )
        };
        if code == ffi::CUDA_ERROR_LAUNCH_TIMEOUT {
            return Ok(None);
        }
        check("cuEGLStreamProducerReturnFrame", code)?;
        let returned = StreamFrame {
            arrays: PlaneArrays {
                luma: ArrayHandle(frame.frame[0] as usize as u64),
                chroma: ArrayHandle(frame.frame[1] as usize as u64),
            },
            layout: layout_of(&frame),
        };
        trace!(width = frame.width, height = frame.height, "frame returned by consumer");
        Ok(Some(returned))
    }

    fn create_arrays(&mut self, layout: &FrameLayout) -> Result<PlaneArrays, DeviceError> {
        self.cuda.make_current()?;
        let format = array_format(layout.format);
        let luma = self.create_array(&CUDA_ARRAY3D_DESCRIPTOR {
            Width: layout.width as usize,
            Height: layout.height as usize,
            Depth: 0,
            Format: format,
            NumChannels: 1,
            Flags: 0,
        })?;
        let chroma = self.create_array(&CUDA_ARRAY3D_DESCRIPTOR {
            Width: (layout.width >> 1) as usize,
            Height: (layout.height >> 1) as usize,
            Depth: 0,
            Format: format,
            NumChannels: 2,
            Flags: 0,
        });
        match chroma {
            Ok(chroma) => {
                debug!(width = layout.width, height = layout.height, "plane arrays created");
                Ok(PlaneArrays { luma, chroma })
            }
            Err(e) => {
                // SAFETY: Created above and never shared.
                unsafe { (self.cuda.lib.cuArrayDestroy)(array(luma)) };
                Err(e)
            }
        }
    }

    fn destroy_arrays(&mut self, arrays: PlaneArrays) -> Result<(), DeviceError> {
        self.cuda.make_current()?;
        // SAFETY: The caller owns these arrays and the consumer released them.
        let (luma, chroma) = unsafe {
            (
                (self.cuda.lib.cuArrayDestroy)(array(arrays.luma)),
                (self.cuda.lib.cuArrayDestroy)(array(arrays.chroma)),
            )
        };
        check("cuArrayDestroy", luma).and(check("cuArrayDestroy", chroma))
    }

    fn copy_planes(
        &mut self,
        src: DevicePtr,
        src_pitch: u32,
        frame: &StreamFrame,
    ) -> Result<(), DeviceError> {
        self.cuda.make_current()?;
        let layout = frame.layout;
        let bps = layout.bytes_per_sample() as usize;
        let luma = CUDA_MEMCPY3D {
            srcMemoryType: ffi::CU_MEMORYTYPE_DEVICE,
            srcDevice: src,
            srcPitch: src_pitch as usize,
            dstMemoryType: ffi::CU_MEMORYTYPE_ARRAY,
            dstArray: array(frame.arrays.luma),
            WidthInBytes: layout.width as usize * bps,
            Height: layout.height as usize,
            Depth: 1,
            ..Default::default()
        };
        // Chroma rows start `height` rows below the luma plane.
        let chroma = CUDA_MEMCPY3D {
            srcMemoryType: ffi::CU_MEMORYTYPE_DEVICE,
            srcDevice: src,
            srcY: layout.height as usize,
            srcPitch: src_pitch as usize,
            dstMemoryType: ffi::CU_MEMORYTYPE_ARRAY,
            dstArray: array(frame.arrays.chroma),
            WidthInBytes: (layout.width >> 1) as usize * 2 * bps,
            Height: (layout.height >> 1) as usize,
            Depth: 1,
            ..Default::default()
        };
        // SAFETY: Both descriptors reference live device memory and arrays
        // created for this layout.
        unsafe {
            check("cuMemcpy3D", (self.cuda.lib.cuMemcpy3D)(&luma))?;
            check("cuMemcpy3D", (self.cuda.lib.cuMemcpy3D)(&chroma))
        }
    }

    fn present(&mut self, frame: &StreamFrame) -> Result<(), DeviceError> {
        self.cuda.make_current()?;
        let layout = frame.layout;
        let egl_frame = CUeglFrame {
            frame: [array(frame.arrays.luma), array(frame.arrays.chroma), std::ptr::null_mut()],
            width: layout.width,
            height: layout.height,
            depth: 1,
            pitch: 0,
            planeCount: 2,
            numChannels: 1,
            frameType: ffi::CU_EGL_FRAME_TYPE_ARRAY,
            eglColorFormat: egl_color_format(&layout),
            cuFormat: array_format(layout.format),
        };
        // SAFETY: The arrays stay alive until the consumer returns the frame.
        check("cuEGLStreamProducerPresentFrame", unsafe {
            (self.cuda.lib.cuEGLStreamProducerPresentFrame)(
                &mut self.connection,
                egl_frame,
                std::ptr::null_mut(),
            )
        })
    }

    fn next_event(&mut self, timeout: Duration) -> Result<Option<StreamEvent>, DeviceError> {
        let nanos = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        let mut event: ffi::EGLenum = 0;
        let mut aux: EGLAttrib = 0;
        // SAFETY: Out-pointers are valid locals.
        let ret = unsafe {
            (self.egl.eglQueryStreamConsumerEventNV)(
                self.display,
                self.stream,
                nanos,
                &mut event,
                &mut aux,
            )
        };
        match ret {
            ffi::EGL_TIMEOUT_EXPIRED_KHR => Ok(None),
            ffi::EGL_CONDITION_SATISFIED_KHR => Ok(Some(match event {
                ffi::EGL_STREAM_IMAGE_ADD_NV => StreamEvent::ImageAdded,
                ffi::EGL_STREAM_IMAGE_AVAILABLE_NV => StreamEvent::ImageAvailable,
                ffi::EGL_STREAM_IMAGE_REMOVE_NV => {
                    StreamEvent::ImageRemoved(ConsumerImage(aux as usize as u64))
                }
                other => StreamEvent::Other(other),
            })),
            _ => Err(self.egl_error("eglQueryStreamConsumerEventNV")),
        }
    }

    fn create_image(&mut self) -> Result<ConsumerImage, DeviceError> {
        // SAFETY: The stream is connected to the image consumer.
        let image = unsafe {
            (self.egl.eglCreateImage)(
                self.display,
                ffi::EGL_NO_CONTEXT,
                ffi::EGL_STREAM_CONSUMER_IMAGE_NV,
                self.stream,
                std::ptr::null(),
            )
        };
        if image.is_null() {
            return Err(self.egl_error("eglCreateImage"));
        }
        Ok(ConsumerImage(image as usize as u64))
    }

    fn acquire_image(&mut self) -> Result<ConsumerImage, DeviceError> {
        let mut image: EGLImage = std::ptr::null_mut();
        // SAFETY: Out-pointer is a valid local.
        let ok = unsafe {
            (self.egl.eglStreamAcquireImageNV)(self.display, self.stream, &mut image, ffi::EGL_NO_SYNC)
        };
        self.egl_check("eglStreamAcquireImageNV", ok)?;
        Ok(ConsumerImage(image as usize as u64))
    }

    fn query_dmabuf(&mut self, image: ConsumerImage) -> Result<DmabufLayout, DeviceError> {
        let mut fourcc: c_int = 0;
        let mut planes: c_int = 0;
        let mut modifiers = [0u64; MAX_DMABUF_PLANES];
        // SAFETY: `modifiers` has room for the maximum plane count.
        let ok = unsafe {
            (self.egl.eglExportDMABUFImageQueryMESA)(
                self.display,
                image_ptr(image),
                &mut fourcc,
                &mut planes,
                modifiers.as_mut_ptr(),
            )
        };
        self.egl_check("eglExportDMABUFImageQueryMESA", ok)?;
        Ok(DmabufLayout {
            fourcc: fourcc as u32,
            planes: planes.clamp(0, MAX_DMABUF_PLANES as c_int) as u32,
            modifiers,
        })
    }

    fn export_dmabuf(&mut self, image: ConsumerImage, planes: u32) -> Result<DmabufPlanes, DeviceError> {
        let mut fds: [c_int; MAX_DMABUF_PLANES] = [-1; MAX_DMABUF_PLANES];
        let mut strides = [0i32; MAX_DMABUF_PLANES];
        let mut offsets = [0i32; MAX_DMABUF_PLANES];
        // SAFETY: All three arrays have room for the maximum plane count.
        let ok = unsafe {
            (self.egl.eglExportDMABUFImageMESA)(
                self.display,
                image_ptr(image),
                fds.as_mut_ptr(),
                strides.as_mut_ptr(),
                offsets.as_mut_ptr(),
            )
        };
        self.egl_check("eglExportDMABUFImageMESA", ok)?;

        let count = (planes as usize).min(MAX_DMABUF_PLANES);
        let mut owned = Vec::with_capacity(count);
        for (plane, &fd) in fds.iter().enumerate() {
            if fd < 0 {
                continue;
            }
            // SAFETY: The export transferred ownership of every returned fd.
            let fd = unsafe { OwnedFd::from_raw_fd(fd) };
            if plane < count {
                owned.push(fd);
            }
        }
        if owned.len() != count {
            return Err(DeviceError::new("eglExportDMABUFImageMESA", -1));
        }
        Ok(DmabufPlanes {
            fds: owned,
            strides: strides[..count].iter().map(|&s| s as u32).collect(),
            offsets: offsets[..count].iter().map(|&o| o as u32).collect(),
        })
    }

    fn release_image(&mut self, image: ConsumerImage) -> Result<(), DeviceError> {
        // SAFETY: `image` was acquired from this stream.
        let ok = unsafe {
            (self.egl.eglStreamReleaseImageNV)(self.display, self.stream, image_ptr(image), ffi::EGL_NO_SYNC)
        };
        self.egl_check("eglStreamReleaseImageNV", ok)
    }

    fn destroy_image(&mut self, image: ConsumerImage) -> Result<(), DeviceError> {
        // SAFETY: `image` was created on this display.
        let ok = unsafe { (self.egl.eglDestroyImage)(self.display, image_ptr(image)) };
        self.egl_check("eglDestroyImage", ok)
    }
}

impl Drop for EglFrameStream {
    fn drop(&mut self) {
        if let Err(e) = self.cuda.make_current() {
            warn!(error = %e, "cannot make CUDA context current for stream teardown");
        }
        // SAFETY: Teardown in reverse order of `open`; nothing else holds
        // these handles.
        unsafe {
            if !self.connection.is_null() {
                let code = (self.cuda.lib.cuEGLStreamProducerDisconnect)(&mut self.connection);
                if let Err(e) = check("cuEGLStreamProducerDisconnect", code) {
                    warn!(error = %e, "failed to disconnect stream producer");
                }
            }
            (self.egl.eglDestroyStreamKHR)(self.display, self.stream);
            (self.egl.eglTerminate)(self.display);
        }
        debug!("EGL frame stream closed");
    }
}
