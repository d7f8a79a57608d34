//! NVIDIA implementation of the `va-backend` device seams.
//!
//! [`open`] loads the CUDA driver API, NVDEC and EGL at runtime, creates a
//! CUDA context on the configured GPU and returns a [`NvDecodeDevice`] plus,
//! when the EGL stream extensions are available, an [`EglFrameStream`] for
//! zero-copy export.

pub mod cuda;
pub mod decoder;
pub mod ffi;
pub mod format;
pub mod stream;

use thiserror::Error;
use tracing::{info, warn};
use va_backend::{DecodeDevice, DeviceError, DriverConfig, FrameStream};

pub use cuda::CudaContext;
pub use decoder::NvDecodeDevice;
pub use stream::EglFrameStream;

#[derive(Debug, Error)]
pub enum OpenError {
    #[error(transparent)]
    Load(#[from] ffi::LoadError),

    #[error("device initialisation failed: {0}")]
    Device(#[from] DeviceError),
}

/// A decode device and, if export is possible, its frame stream.
pub struct Backend {
    pub device: Box<dyn DecodeDevice>,
    pub stream: Option<Box<dyn FrameStream>>,
}

/// Open the GPU named by `config.gpu`.
///
/// Decoding needs CUDA and NVDEC; a missing EGL library or stream extension
/// only disables export.
pub fn open(config: &DriverConfig) -> Result<Backend, OpenError> {
    let cuda = CudaContext::create(ffi::CudaLibrary::load()?, config.gpu)?;
    let cuvid = ffi::NvcuvidLibrary::load()?;

    let stream: Option<Box<dyn FrameStream>> = match ffi::EglLibrary::load() {
        Ok(egl) => match EglFrameStream::open(cuda.clone(), egl, config.fifo_length) {
            Ok(stream) => Some(Box::new(stream)),
            Err(e) => {
                warn!(error = %e, "EGL stream unavailable, surface export disabled");
                None
            }
        },
        Err(e) => {
            warn!(error = %e, "EGL unavailable, surface export disabled");
            None
        }
    };

    let device = NvDecodeDevice::new(cuda, cuvid);
    info!(gpu = config.gpu, export = stream.is_some(), "NVDEC backend opened");
    Ok(Backend {
        device: Box::new(device),
        stream,
    })
}
