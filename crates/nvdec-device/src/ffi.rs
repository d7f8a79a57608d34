//! Raw bindings to the CUDA driver API, NVDEC (`nvcuvid`) and the EGL stream
//! and dma-buf export extensions.
//!
//! All three libraries are loaded at runtime with `libloading`, so the crate
//! builds and its tests run on machines without the NVIDIA driver. Struct
//! layouts follow the 64-bit Linux ABI of `cuda.h`, `cudaEGL.h` and
//! `cuviddec.h`.

#![allow(non_snake_case, non_camel_case_types, dead_code)]

use std::ffi::{c_char, c_void};

use libc::{c_int, c_uint, c_ulong, size_t};
use libloading::Library;
use thiserror::Error;
use tracing::{debug, info};

// ── Opaque types ──

pub type CUresult = c_int;
pub type CUdevice = c_int;
pub type CUcontext = *mut c_void;
pub type CUdeviceptr = u64;
pub type CUarray = *mut c_void;
pub type CUstream = *mut c_void;
pub type CUeglStreamConnection = *mut c_void;
pub type CUvideodecoder = *mut c_void;
pub type CUvideoctxlock = *mut c_void;

pub type EGLDisplay = *mut c_void;
pub type EGLStreamKHR = *mut c_void;
pub type EGLImage = *mut c_void;
pub type EGLContext = *mut c_void;
pub type EGLSync = *mut c_void;
pub type EGLBoolean = c_uint;
pub type EGLint = i32;
pub type EGLenum = c_uint;
pub type EGLAttrib = isize;
pub type EGLTime = u64;
pub type EGLuint64KHR = u64;

// ── CUDA constants ──

pub const CUDA_SUCCESS: CUresult = 0;
/// Returned by `cuEGLStreamProducerReturnFrame` when no frame came back in
/// time.
pub const CUDA_ERROR_LAUNCH_TIMEOUT: CUresult = 702;

pub const CU_CTX_SCHED_BLOCKING_SYNC: c_uint = 0x04;

pub const CU_MEMORYTYPE_HOST: c_uint = 0x01;
pub const CU_MEMORYTYPE_DEVICE: c_uint = 0x02;
pub const CU_MEMORYTYPE_ARRAY: c_uint = 0x03;

pub const CU_AD_FORMAT_UNSIGNED_INT8: c_uint = 0x01;
pub const CU_AD_FORMAT_UNSIGNED_INT16: c_uint = 0x02;

pub const CU_EGL_FRAME_TYPE_ARRAY: c_uint = 0;

pub const CU_EGL_COLOR_FORMAT_YVU420_SEMIPLANAR: c_uint = 0x15;
pub const CU_EGL_COLOR_FORMAT_Y10V10U10_420_SEMIPLANAR: c_uint = 0x17;
pub const CU_EGL_COLOR_FORMAT_Y12V12U12_420_SEMIPLANAR: c_uint = 0x19;

// ── NVDEC constants ──

pub const CUDA_VIDEO_DEINTERLACE_WEAVE: c_int = 0;
pub const CUDA_VIDEO_CREATE_PREFER_CUVID: c_ulong = 0x04;

// ── EGL constants ──

pub const EGL_FALSE: EGLBoolean = 0;
pub const EGL_NONE: EGLint = 0x3038;
pub const EGL_STREAM_FIFO_LENGTH_KHR: EGLint = 0x31FC;
pub const EGL_STREAM_CONSUMER_IMAGE_NV: EGLenum = 0x3373;
pub const EGL_STREAM_IMAGE_ADD_NV: EGLenum = 0x3374;
pub const EGL_STREAM_IMAGE_REMOVE_NV: EGLenum = 0x3375;
pub const EGL_STREAM_IMAGE_AVAILABLE_NV: EGLenum = 0x3376;
pub const EGL_TIMEOUT_EXPIRED_KHR: EGLint = 0x30F5;
pub const EGL_CONDITION_SATISFIED_KHR: EGLint = 0x30F6;

pub const EGL_NO_DISPLAY: EGLDisplay = std::ptr::null_mut();
pub const EGL_NO_CONTEXT: EGLContext = std::ptr::null_mut();
pub const EGL_NO_SYNC: EGLSync = std::ptr::null_mut();
pub const EGL_NO_STREAM_KHR: EGLStreamKHR = std::ptr::null_mut();

// ── CUDA structs ──

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CUDA_MEMCPY2D {
    pub srcXInBytes: size_t,
    pub srcY: size_t,
    pub srcMemoryType: c_uint,
    pub srcHost: *const c_void,
    pub srcDevice: CUdeviceptr,
    pub srcArray: CUarray,
    pub srcPitch: size_t,
    pub dstXInBytes: size_t,
    pub dstY: size_t,
    pub dstMemoryType: c_uint,
    pub dstHost: *mut c_void,
    pub dstDevice: CUdeviceptr,
    pub dstArray: CUarray,
    pub dstPitch: size_t,
    pub WidthInBytes: size_t,
    pub Height: size_t,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CUDA_MEMCPY3D {
    pub srcXInBytes: size_t,
    pub srcY: size_t,
    pub srcZ: size_t,
    pub srcLOD: size_t,
    pub srcMemoryType: c_uint,
    pub srcHost: *const c_void,
    pub srcDevice: CUdeviceptr,
    pub srcArray: CUarray,
    pub reserved0: *mut c_void,
    pub srcPitch: size_t,
    pub srcHeight: size_t,
    pub dstXInBytes: size_t,
    pub dstY: size_t,
    pub dstZ: size_t,
    pub dstLOD: size_t,
    pub dstMemoryType: c_uint,
    pub dstHost: *mut c_void,
    pub dstDevice: CUdeviceptr,
    pub dstArray: CUarray,
    pub reserved1: *mut c_void,
    pub dstPitch: size_t,
    pub dstHeight: size_t,
    pub WidthInBytes: size_t,
    pub Height: size_t,
    pub Depth: size_t,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CUDA_ARRAY3D_DESCRIPTOR {
    pub Width: size_t,
    pub Height: size_t,
    pub Depth: size_t,
    pub Format: c_uint,
    pub NumChannels: c_uint,
    pub Flags: c_uint,
}

/// Frame handed across an EGL stream. `frame` holds plane arrays for
/// `CU_EGL_FRAME_TYPE_ARRAY` frames.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CUeglFrame {
    pub frame: [CUarray; 3],
    pub width: c_uint,
    pub height: c_uint,
    pub depth: c_uint,
    pub pitch: c_uint,
    pub planeCount: c_uint,
    pub numChannels: c_uint,
    pub frameType: c_uint,
    pub eglColorFormat: c_uint,
    pub cuFormat: c_uint,
}

// ── NVDEC structs ──

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CUVIDDECODECAPS {
    pub eCodecType: c_int,
    pub eChromaFormat: c_int,
    pub nBitDepthMinus8: c_uint,
    pub reserved1: [c_uint; 3],
    pub bIsSupported: u8,
    pub nNumNVDECs: u8,
    pub nOutputFormatMask: u16,
    pub nMaxWidth: c_uint,
    pub nMaxHeight: c_uint,
    pub nMaxMBCount: c_uint,
    pub nMinWidth: u16,
    pub nMinHeight: u16,
    pub bIsHistogramSupported: u8,
    pub nCounterBitDepth: u8,
    pub nMaxHistogramBins: u16,
    pub reserved3: [c_uint; 10],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Rect16 {
    pub left: i16,
    pub top: i16,
    pub right: i16,
    pub bottom: i16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CUVIDDECODECREATEINFO {
    pub ulWidth: c_ulong,
    pub ulHeight: c_ulong,
    pub ulNumDecodeSurfaces: c_ulong,
    pub CodecType: c_int,
    pub ChromaFormat: c_int,
    pub ulCreationFlags: c_ulong,
    pub bitDepthMinus8: c_ulong,
    pub ulIntraDecodeOnly: c_ulong,
    pub ulMaxWidth: c_ulong,
    pub ulMaxHeight: c_ulong,
    pub Reserved1: c_ulong,
    pub display_area: Rect16,
    pub OutputFormat: c_int,
    pub DeinterlaceMode: c_int,
    pub ulTargetWidth: c_ulong,
    pub ulTargetHeight: c_ulong,
    pub ulNumOutputSurfaces: c_ulong,
    pub vidLock: CUvideoctxlock,
    pub target_rect: Rect16,
    pub enableHistogram: c_ulong,
    pub Reserved2: [c_ulong; 4],
}

/// Size of the codec-specific union at the end of `CUVIDPICPARAMS`.
pub const CODEC_SPECIFIC_BYTES: usize = 4096;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct CUVIDPICPARAMS {
    pub PicWidthInMbs: c_int,
    pub FrameHeightInMbs: c_int,
    pub CurrPicIdx: c_int,
    pub field_pic_flag: c_int,
    pub bottom_field_flag: c_int,
    pub second_field: c_int,
    pub nBitstreamDataLen: c_uint,
    pub pBitstreamData: *const u8,
    pub nNumSlices: c_uint,
    pub pSliceDataOffsets: *const c_uint,
    pub ref_pic_flag: c_int,
    pub intra_pic_flag: c_int,
    pub Reserved: [c_uint; 30],
    pub CodecSpecific: [u64; CODEC_SPECIFIC_BYTES / 8],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CUVIDPROCPARAMS {
    pub progressive_frame: c_int,
    pub second_field: c_int,
    pub top_field_first: c_int,
    pub unpaired_field: c_int,
    pub reserved_flags: c_uint,
    pub reserved_zero: c_uint,
    pub raw_input_dptr: u64,
    pub raw_input_pitch: c_uint,
    pub raw_input_format: c_uint,
    pub raw_output_dptr: u64,
    pub raw_output_pitch: c_uint,
    pub Reserved1: c_uint,
    pub output_stream: CUstream,
    pub Reserved: [c_uint; 46],
    pub histogram_dptr: *mut u64,
    pub Reserved2: [*mut c_void; 1],
}

macro_rules! zeroed_default {
    ($($ty:ty),*) => {
        $(
            impl Default for $ty {
                fn default() -> Self {
                    // SAFETY: All-zeros is valid for this POD struct; pointers
                    // become null.
                    unsafe { std::mem::zeroed() }
                }
            }
        )*
    };
}

zeroed_default!(
    CUDA_MEMCPY2D,
    CUDA_MEMCPY3D,
    CUDA_ARRAY3D_DESCRIPTOR,
    CUeglFrame,
    CUVIDDECODECAPS,
    CUVIDDECODECREATEINFO,
    CUVIDPICPARAMS,
    CUVIDPROCPARAMS
);

// ── Loading ──

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to load {library}: {source}")]
    LibraryNotFound {
        library: &'static str,
        #[source]
        source: libloading::Error,
    },

    #[error("symbol {symbol} missing from {library}")]
    SymbolNotFound {
        library: &'static str,
        symbol: &'static str,
    },
}

fn open(library: &'static str) -> Result<Library, LoadError> {
    info!(library, "loading vendor library");
    // SAFETY: These are the NVIDIA driver and EGL system libraries; their
    // initialisers only register driver entry points.
    unsafe { Library::new(library) }.map_err(|source| LoadError::LibraryNotFound { library, source })
}

/// Copy a function pointer out of `lib`.
///
/// # Safety
/// `T` must be the exact C signature of `symbol`, and the pointer must not
/// outlive `lib`.
unsafe fn sym<T: Copy>(
    lib: &Library,
    library: &'static str,
    symbol: &'static str,
) -> Result<T, LoadError> {
    let mut name = Vec::with_capacity(symbol.len() + 1);
    name.extend_from_slice(symbol.as_bytes());
    name.push(0);
    lib.get::<T>(&name)
        .map(|s| *s)
        .map_err(|_| LoadError::SymbolNotFound { library, symbol })
}

// ── CUDA driver API ──

pub struct CudaLibrary {
    _lib: Library,
    pub cuInit: unsafe extern "C" fn(c_uint) -> CUresult,
    pub cuDeviceGet: unsafe extern "C" fn(*mut CUdevice, c_int) -> CUresult,
    pub cuDeviceGetName: unsafe extern "C" fn(*mut c_char, c_int, CUdevice) -> CUresult,
    pub cuCtxCreate: unsafe extern "C" fn(*mut CUcontext, c_uint, CUdevice) -> CUresult,
    pub cuCtxDestroy: unsafe extern "C" fn(CUcontext) -> CUresult,
    pub cuCtxSetCurrent: unsafe extern "C" fn(CUcontext) -> CUresult,
    pub cuMemAlloc: unsafe extern "C" fn(*mut CUdeviceptr, size_t) -> CUresult,
    pub cuMemFree: unsafe extern "C" fn(CUdeviceptr) -> CUresult,
    pub cuMemsetD8: unsafe extern "C" fn(CUdeviceptr, u8, size_t) -> CUresult,
    pub cuMemcpy2D: unsafe extern "C" fn(*const CUDA_MEMCPY2D) -> CUresult,
    pub cuMemcpy3D: unsafe extern "C" fn(*const CUDA_MEMCPY3D) -> CUresult,
    pub cuArray3DCreate:
        unsafe extern "C" fn(*mut CUarray, *const CUDA_ARRAY3D_DESCRIPTOR) -> CUresult,
    pub cuArrayDestroy: unsafe extern "C" fn(CUarray) -> CUresult,
    pub cuEGLStreamProducerConnect: unsafe extern "C" fn(
        *mut CUeglStreamConnection,
        EGLStreamKHR,
        EGLint,
        EGLint,
    ) -> CUresult,
    pub cuEGLStreamProducerDisconnect: unsafe extern "C" fn(*mut CUeglStreamConnection) -> CUresult,
    pub cuEGLStreamProducerPresentFrame:
        unsafe extern "C" fn(*mut CUeglStreamConnection, CUeglFrame, *mut CUstream) -> CUresult,
    pub cuEGLStreamProducerReturnFrame: unsafe extern "C" fn(
        *mut CUeglStreamConnection,
        *mut CUeglFrame,
        *mut CUstream,
    ) -> CUresult,
}

impl CudaLibrary {
    pub const NAME: &'static str = "libcuda.so.1";

    pub fn load() -> Result<Self, LoadError> {
        let lib = open(Self::NAME)?;
        let n = Self::NAME;
        // SAFETY: Signatures match cuda.h and cudaEGL.h; the `_v2` entry
        // points are the ones the header macros resolve to on 64-bit builds.
        unsafe {
            let cuda = CudaLibrary {
                cuInit: sym(&lib, n, "cuInit")?,
                cuDeviceGet: sym(&lib, n, "cuDeviceGet")?,
                cuDeviceGetName: sym(&lib, n, "cuDeviceGetName")?,
                cuCtxCreate: sym(&lib, n, "cuCtxCreate_v2")?,
                cuCtxDestroy: sym(&lib, n, "cuCtxDestroy_v2")?,
                cuCtxSetCurrent: sym(&lib, n, "cuCtxSetCurrent")?,
                cuMemAlloc: sym(&lib, n, "cuMemAlloc_v2")?,
                cuMemFree: sym(&lib, n, "cuMemFree_v2")?,
                cuMemsetD8: sym(&lib, n, "cuMemsetD8_v2")?,
                cuMemcpy2D: sym(&lib, n, "cuMemcpy2D_v2")?,
                cuMemcpy3D: sym(&lib, n, "cuMemcpy3D_v2")?,
                cuArray3DCreate: sym(&lib, n, "cuArray3DCreate_v2")?,
                cuArrayDestroy: sym(&lib, n, "cuArrayDestroy")?,
                cuEGLStreamProducerConnect: sym(&lib, n, "cuEGLStreamProducerConnect")?,
                cuEGLStreamProducerDisconnect: sym(&lib, n, "cuEGLStreamProducerDisconnect")?,
                cuEGLStreamProducerPresentFrame: sym(&lib, n, "cuEGLStreamProducerPresentFrame")?,
                cuEGLStreamProducerReturnFrame: sym(&lib, n, "cuEGLStreamProducerReturnFrame")?,
                _lib: lib,
            };
            debug!(library = n, "CUDA entry points resolved");
            Ok(cuda)
        }
    }
}

// ── NVDEC ──

pub struct NvcuvidLibrary {
    _lib: Library,
    pub cuvidGetDecoderCaps: unsafe extern "C" fn(*mut CUVIDDECODECAPS) -> CUresult,
    pub cuvidCreateDecoder:
        unsafe extern "C" fn(*mut CUvideodecoder, *mut CUVIDDECODECREATEINFO) -> CUresult,
    pub cuvidDestroyDecoder: unsafe extern "C" fn(CUvideodecoder) -> CUresult,
    pub cuvidDecodePicture: unsafe extern "C" fn(CUvideodecoder, *mut CUVIDPICPARAMS) -> CUresult,
    pub cuvidMapVideoFrame64: unsafe extern "C" fn(
        CUvideodecoder,
        c_int,
        *mut CUdeviceptr,
        *mut c_uint,
        *mut CUVIDPROCPARAMS,
    ) -> CUresult,
    pub cuvidUnmapVideoFrame64: unsafe extern "C" fn(CUvideodecoder, CUdeviceptr) -> CUresult,
    pub cuvidCtxLockCreate: unsafe extern "C" fn(*mut CUvideoctxlock, CUcontext) -> CUresult,
    pub cuvidCtxLockDestroy: unsafe extern "C" fn(CUvideoctxlock) -> CUresult,
}

impl NvcuvidLibrary {
    pub const NAME: &'static str = "libnvcuvid.so.1";

    pub fn load() -> Result<Self, LoadError> {
        let lib = open(Self::NAME)?;
        let n = Self::NAME;
        // SAFETY: Signatures match cuviddec.h.
        unsafe {
            let cuvid = NvcuvidLibrary {
                cuvidGetDecoderCaps: sym(&lib, n, "cuvidGetDecoderCaps")?,
                cuvidCreateDecoder: sym(&lib, n, "cuvidCreateDecoder")?,
                cuvidDestroyDecoder: sym(&lib, n, "cuvidDestroyDecoder")?,
                cuvidDecodePicture: sym(&lib, n, "cuvidDecodePicture")?,
                cuvidMapVideoFrame64: sym(&lib, n, "cuvidMapVideoFrame64")?,
                cuvidUnmapVideoFrame64: sym(&lib, n, "cuvidUnmapVideoFrame64")?,
                cuvidCtxLockCreate: sym(&lib, n, "cuvidCtxLockCreate")?,
                cuvidCtxLockDestroy: sym(&lib, n, "cuvidCtxLockDestroy")?,
                _lib: lib,
            };
            debug!(library = n, "NVDEC entry points resolved");
            Ok(cuvid)
        }
    }
}

// ── EGL ──

pub struct EglLibrary {
    _lib: Library,
    pub eglGetDisplay: unsafe extern "C" fn(*mut c_void) -> EGLDisplay,
    pub eglInitialize: unsafe extern "C" fn(EGLDisplay, *mut EGLint, *mut EGLint) -> EGLBoolean,
    pub eglTerminate: unsafe extern "C" fn(EGLDisplay) -> EGLBoolean,
    pub eglGetError: unsafe extern "C" fn() -> EGLint,
    pub eglCreateImage: unsafe extern "C" fn(
        EGLDisplay,
        EGLContext,
        EGLenum,
        *mut c_void,
        *const EGLAttrib,
    ) -> EGLImage,
    pub eglDestroyImage: unsafe extern "C" fn(EGLDisplay, EGLImage) -> EGLBoolean,

    // Extension entry points, resolved through eglGetProcAddress.
    pub eglCreateStreamKHR: unsafe extern "C" fn(EGLDisplay, *const EGLint) -> EGLStreamKHR,
    pub eglDestroyStreamKHR: unsafe extern "C" fn(EGLDisplay, EGLStreamKHR) -> EGLBoolean,
    pub eglStreamImageConsumerConnectNV: unsafe extern "C" fn(
        EGLDisplay,
        EGLStreamKHR,
        EGLint,
        *const EGLuint64KHR,
        *const EGLAttrib,
    ) -> EGLBoolean,
    pub eglQueryStreamConsumerEventNV: unsafe extern "C" fn(
        EGLDisplay,
        EGLStreamKHR,
        EGLTime,
        *mut EGLenum,
        *mut EGLAttrib,
    ) -> EGLint,
    pub eglStreamAcquireImageNV:
        unsafe extern "C" fn(EGLDisplay, EGLStreamKHR, *mut EGLImage, EGLSync) -> EGLBoolean,
    pub eglStreamReleaseImageNV:
        unsafe extern "C" fn(EGLDisplay, EGLStreamKHR, EGLImage, EGLSync) -> EGLBoolean,
    pub eglExportDMABUFImageQueryMESA: unsafe extern "C" fn(
        EGLDisplay,
        EGLImage,
        *mut c_int,
        *mut c_int,
        *mut EGLuint64KHR,
    ) -> EGLBoolean,
    pub eglExportDMABUFImageMESA: unsafe extern "C" fn(
        EGLDisplay,
        EGLImage,
        *mut c_int,
        *mut EGLint,
        *mut EGLint,
    ) -> EGLBoolean,
}

impl EglLibrary {
    pub const NAME: &'static str = "libEGL.so.1";

    pub fn load() -> Result<Self, LoadError> {
        let lib = open(Self::NAME)?;
        let n = Self::NAME;
        // SAFETY: Core signatures match EGL 1.5; extension signatures match
        // eglext.h. Extension pointers come from eglGetProcAddress, which
        // returns null for unknown names.
        unsafe {
            let get_proc: unsafe extern "C" fn(*const c_char) -> *mut c_void =
                sym(&lib, n, "eglGetProcAddress")?;
            let ext = |symbol: &'static str| -> Result<*mut c_void, LoadError> {
                let name = std::ffi::CString::new(symbol)
                    .map_err(|_| LoadError::SymbolNotFound { library: n, symbol })?;
                let ptr = get_proc(name.as_ptr());
                if ptr.is_null() {
                    Err(LoadError::SymbolNotFound { library: n, symbol })
                } else {
                    Ok(ptr)
                }
            };

            let egl = EglLibrary {
                eglGetDisplay: sym(&lib, n, "eglGetDisplay")?,
                eglInitialize: sym(&lib, n, "eglInitialize")?,
                eglTerminate: sym(&lib, n, "eglTerminate")?,
                eglGetError: sym(&lib, n, "eglGetError")?,
                eglCreateImage: sym(&lib, n, "eglCreateImage")?,
                eglDestroyImage: sym(&lib, n, "eglDestroyImage")?,
                eglCreateStreamKHR: std::mem::transmute(ext("eglCreateStreamKHR")?),
                eglDestroyStreamKHR: std::mem::transmute(ext("eglDestroyStreamKHR")?),
                eglStreamImageConsumerConnectNV: std::mem::transmute(ext(
                    "eglStreamImageConsumerConnectNV",
                )?),
                eglQueryStreamConsumerEventNV: std::mem::transmute(ext(
                    "eglQueryStreamConsumerEventNV",
                )?),
                eglStreamAcquireImageNV: std::mem::transmute(ext("eglStreamAcquireImageNV")?),
                eglStreamReleaseImageNV: std::mem::transmute(ext("eglStreamReleaseImageNV")?),
                eglExportDMABUFImageQueryMESA: std::mem::transmute(ext(
                    "eglExportDMABUFImageQueryMESA",
                )?),
                eglExportDMABUFImageMESA: std::mem::transmute(ext("eglExportDMABUFImageMESA")?),
                _lib: lib,
            };
            debug!(library = n, "EGL entry points resolved");
            Ok(egl)
        }
    }
}

// SAFETY: The libraries hold only function pointers into driver code and the
// handle that keeps them mapped. The driver entry points are thread-safe;
// callers serialise access to the objects they operate on.
unsafe impl Send for CudaLibrary {}
unsafe impl Sync for CudaLibrary {}
unsafe impl Send for NvcuvidLibrary {}
unsafe impl Sync for NvcuvidLibrary {}
unsafe impl Send for EglLibrary {}
unsafe impl Sync for EglLibrary {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn test_decode_caps_layout() {
        assert_eq!(offset_of!(CUVIDDECODECAPS, bIsSupported), 24);
        assert_eq!(offset_of!(CUVIDDECODECAPS, nOutputFormatMask), 26);
        assert_eq!(offset_of!(CUVIDDECODECAPS, nMinWidth), 40);
        assert_eq!(size_of::<CUVIDDECODECAPS>(), 88);
    }

    #[test]
    fn test_pic_params_layout() {
        assert_eq!(offset_of!(CUVIDPICPARAMS, pBitstreamData), 32);
        assert_eq!(offset_of!(CUVIDPICPARAMS, pSliceDataOffsets), 48);
        assert_eq!(offset_of!(CUVIDPICPARAMS, CodecSpecific), 184);
        assert_eq!(size_of::<CUVIDPICPARAMS>(), 184 + CODEC_SPECIFIC_BYTES);
    }

    #[test]
    fn test_create_info_layout() {
        assert_eq!(offset_of!(CUVIDDECODECREATEINFO, CodecType), 24);
        assert_eq!(offset_of!(CUVIDDECODECREATEINFO, display_area), 80);
        assert_eq!(offset_of!(CUVIDDECODECREATEINFO, vidLock), 120);
        assert_eq!(size_of::<CUVIDDECODECREATEINFO>(), 176);
    }

    #[test]
    fn test_cuda_struct_sizes() {
        assert_eq!(size_of::<CUDA_MEMCPY2D>(), 128);
        assert_eq!(size_of::<CUDA_MEMCPY3D>(), 200);
        assert_eq!(size_of::<CUDA_ARRAY3D_DESCRIPTOR>(), 40);
        assert_eq!(size_of::<CUeglFrame>(), 24 + 9 * 4 + 4);
    }

    #[test]
    fn test_missing_library_is_reported() {
        let err = open("libdoes-not-exist.so.0").err().map(|e| e.to_string());
        assert!(err.is_some_and(|msg| msg.contains("libdoes-not-exist.so.0")));
    }
}
