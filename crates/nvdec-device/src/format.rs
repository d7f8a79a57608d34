//! Mapping between core pixel layouts and the CUDA/EGL enumerations.

use libc::c_uint;
use va_backend::device::FrameLayout;
use va_backend::types::PixelFormat;

use crate::ffi::{
    CUeglFrame, CU_AD_FORMAT_UNSIGNED_INT16, CU_AD_FORMAT_UNSIGNED_INT8,
    CU_EGL_COLOR_FORMAT_Y10V10U10_420_SEMIPLANAR, CU_EGL_COLOR_FORMAT_Y12V12U12_420_SEMIPLANAR,
    CU_EGL_COLOR_FORMAT_YVU420_SEMIPLANAR,
};

/// Array element format for one sample.
pub fn array_format(format: PixelFormat) -> c_uint {
    match format {
        PixelFormat::Nv12 => CU_AD_FORMAT_UNSIGNED_INT8,
        PixelFormat::P016 => CU_AD_FORMAT_UNSIGNED_INT16,
    }
}

pub fn egl_color_format(layout: &FrameLayout) -> c_uint {
    match (layout.format, layout.bit_depth) {
        (PixelFormat::Nv12, _) => CU_EGL_COLOR_FORMAT_YVU420_SEMIPLANAR,
        (PixelFormat::P016, 12) => CU_EGL_COLOR_FORMAT_Y12V12U12_420_SEMIPLANAR,
        (PixelFormat::P016, _) => CU_EGL_COLOR_FORMAT_Y10V10U10_420_SEMIPLANAR,
    }
}

/// Recover the layout a returned frame was presented with.
pub fn layout_of(frame: &CUeglFrame) -> FrameLayout {
    let (format, bit_depth) = match frame.eglColorFormat {
        CU_EGL_COLOR_FORMAT_Y12V12U12_420_SEMIPLANAR => (PixelFormat::P016, 12),
        CU_EGL_COLOR_FORMAT_Y10V10U10_420_SEMIPLANAR => (PixelFormat::P016, 10),
        _ => (PixelFormat::Nv12, 8),
    };
    FrameLayout {
        width: frame.width,
        height: frame.height,
        format,
        bit_depth,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_survives_frame_round_trip() {
        for (format, bit_depth) in [(PixelFormat::Nv12, 8), (PixelFormat::P016, 10), (PixelFormat::P016, 12)] {
            let layout = FrameLayout { width: 1920, height: 1080, format, bit_depth };
            let frame = CUeglFrame {
                width: layout.width,
                height: layout.height,
                eglColorFormat: egl_color_format(&layout),
                cuFormat: array_format(format),
                ..Default::default()
            };
            assert_eq!(layout_of(&frame), layout);
        }
    }

    #[test]
    fn test_sixteen_bit_arrays() {
        assert_eq!(array_format(PixelFormat::Nv12), CU_AD_FORMAT_UNSIGNED_INT8);
        assert_eq!(array_format(PixelFormat::P016), CU_AD_FORMAT_UNSIGNED_INT16);
    }
}
