//! CUDA context shared by the decoder and the frame stream.

use std::ffi::c_char;
use std::sync::Arc;

use tracing::{debug, info, warn};
use va_backend::DeviceError;

use crate::ffi::{self, CudaLibrary, CUcontext, CUdevice, CUresult, CUDA_SUCCESS};

/// Map a CUDA/NVDEC result code to a `DeviceError` naming the call.
pub(crate) fn check(call: &'static str, code: CUresult) -> Result<(), DeviceError> {
    if code == CUDA_SUCCESS {
        Ok(())
    } else {
        Err(DeviceError::new(call, code))
    }
}

/// A CUDA context on one device. Every entry into the driver makes it current
/// on the calling thread first.
pub struct CudaContext {
    pub(crate) lib: CudaLibrary,
    ctx: CUcontext,
    device: CUdevice,
}

// SAFETY: A CUDA context may be made current on any thread; all use goes
// through `make_current`.
unsafe impl Send for CudaContext {}
unsafe impl Sync for CudaContext {}

impl CudaContext {
    /// Initialise the driver and create a blocking-sync context on `ordinal`.
    pub fn create(lib: CudaLibrary, ordinal: u32) -> Result<Arc<Self>, DeviceError> {
        let ordinal = i32::try_from(ordinal).map_err(|_| DeviceError::new("cuDeviceGet", -1))?;
        let mut device: CUdevice = 0;
        let mut ctx: CUcontext = std::ptr::null_mut();
        // SAFETY: Out-pointers are valid locals.
        unsafe {
            // 999 here usually means the nvidia kernel modules are not loaded.
            check("cuInit", (lib.cuInit)(0))?;
            check("cuDeviceGet", (lib.cuDeviceGet)(&mut device, ordinal))?;
            check(
                "cuCtxCreate",
                (lib.cuCtxCreate)(&mut ctx, ffi::CU_CTX_SCHED_BLOCKING_SYNC, device),
            )?;
        }
        let context = CudaContext { lib, ctx, device };
        info!(ordinal, device = %context.device_name(), "CUDA context created");
        Ok(Arc::new(context))
    }

    pub fn make_current(&self) -> Result<(), DeviceError> {
        // SAFETY: `ctx` is live until drop.
        check("cuCtxSetCurrent", unsafe { (self.lib.cuCtxSetCurrent)(self.ctx) })
    }

    pub(crate) fn raw(&self) -> CUcontext {
        self.ctx
    }

    pub fn device_name(&self) -> String {
        let mut buf = [0 as c_char; 256];
        // SAFETY: `buf` holds 256 bytes and the driver NUL-terminates.
        let code = unsafe { (self.lib.cuDeviceGetName)(buf.as_mut_ptr(), 256, self.device) };
        if code != CUDA_SUCCESS {
            return format!("CUDA device {}", self.device);
        }
        // SAFETY: NUL-terminated by the call above.
        unsafe { std::ffi::CStr::from_ptr(buf.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }
}

impl Drop for CudaContext {
    fn drop(&mut self) {
        debug!("destroying CUDA context");
        // SAFETY: Last reference; nothing else uses the context.
        let code = unsafe { (self.lib.cuCtxDestroy)(self.ctx) };
        if let Err(e) = check("cuCtxDestroy", code) {
            warn!(error = %e, "failed to destroy CUDA context");
        }
    }
}
