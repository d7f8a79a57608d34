//! Protocol vocabulary: profiles, entrypoints, buffer kinds, formats and the
//! opaque handle types handed across the driver boundary.

use std::fmt;

// ── Handles ──

/// Opaque object identifier. Zero is never handed out.
pub type ObjectId = u32;

/// Sentinel used by clients for "no object" (e.g. an unused reference slot).
pub const INVALID_ID: ObjectId = 0xFFFF_FFFF;

pub type ConfigId = ObjectId;
pub type SurfaceId = ObjectId;
pub type ContextId = ObjectId;
pub type BufferId = ObjectId;
pub type ImageId = ObjectId;

// ── Profiles / entrypoints ──

/// Abstract compression-standard variant, numbered as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Profile {
    Mpeg2Simple,
    Mpeg2Main,
    Mpeg4Simple,
    Mpeg4AdvancedSimple,
    Mpeg4Main,
    H264Baseline,
    H264Main,
    H264High,
    Vc1Simple,
    Vc1Main,
    Vc1Advanced,
    JpegBaseline,
    H264ConstrainedBaseline,
    Vp8Version0_3,
    H264MultiviewHigh,
    H264StereoHigh,
    HevcMain,
    HevcMain10,
    Vp9Profile0,
    Vp9Profile1,
    Vp9Profile2,
    Vp9Profile3,
    HevcMain12,
    HevcMain422_10,
    HevcMain422_12,
    HevcMain444,
    HevcMain444_10,
    HevcMain444_12,
    Av1Profile0,
    Av1Profile1,
}

impl Profile {
    pub fn from_raw(value: i32) -> Option<Self> {
        use Profile::*;
        Some(match value {
            0 => Mpeg2Simple,
            1 => Mpeg2Main,
            2 => Mpeg4Simple,
            3 => Mpeg4AdvancedSimple,
            4 => Mpeg4Main,
            5 => H264Baseline,
            6 => H264Main,
            7 => H264High,
            8 => Vc1Simple,
            9 => Vc1Main,
            10 => Vc1Advanced,
            12 => JpegBaseline,
            13 => H264ConstrainedBaseline,
            14 => Vp8Version0_3,
            15 => H264MultiviewHigh,
            16 => H264StereoHigh,
            17 => HevcMain,
            18 => HevcMain10,
            19 => Vp9Profile0,
            20 => Vp9Profile1,
            21 => Vp9Profile2,
            22 => Vp9Profile3,
            23 => HevcMain12,
            24 => HevcMain422_10,
            25 => HevcMain422_12,
            26 => HevcMain444,
            27 => HevcMain444_10,
            28 => HevcMain444_12,
            32 => Av1Profile0,
            33 => Av1Profile1,
            _ => return None,
        })
    }

    pub fn as_raw(self) -> i32 {
        use Profile::*;
        match self {
            Mpeg2Simple => 0,
            Mpeg2Main => 1,
            Mpeg4Simple => 2,
            Mpeg4AdvancedSimple => 3,
            Mpeg4Main => 4,
            H264Baseline => 5,
            H264Main => 6,
            H264High => 7,
            Vc1Simple => 8,
            Vc1Main => 9,
            Vc1Advanced => 10,
            JpegBaseline => 12,
            H264ConstrainedBaseline => 13,
            Vp8Version0_3 => 14,
            H264MultiviewHigh => 15,
            H264StereoHigh => 16,
            HevcMain => 17,
            HevcMain10 => 18,
            Vp9Profile0 => 19,
            Vp9Profile1 => 20,
            Vp9Profile2 => 21,
            Vp9Profile3 => 22,
            HevcMain12 => 23,
            HevcMain422_10 => 24,
            HevcMain422_12 => 25,
            HevcMain444 => 26,
            HevcMain444_10 => 27,
            HevcMain444_12 => 28,
            Av1Profile0 => 32,
            Av1Profile1 => 33,
        }
    }
}

/// Operation mode. Only decode (`Vld`) is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entrypoint {
    Vld,
    Other(i32),
}

impl Entrypoint {
    pub fn from_raw(value: i32) -> Self {
        match value {
            1 => Entrypoint::Vld,
            other => Entrypoint::Other(other),
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            Entrypoint::Vld => 1,
            Entrypoint::Other(v) => v,
        }
    }
}

// ── Decode engine enums ──

/// Codec identifiers understood by the decode engine.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    Mpeg1 = 0,
    Mpeg2 = 1,
    Mpeg4 = 2,
    Vc1 = 3,
    H264 = 4,
    Jpeg = 5,
    H264Svc = 6,
    H264Mvc = 7,
    Hevc = 8,
    Vp8 = 9,
    Vp9 = 10,
    Av1 = 11,
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChromaFormat {
    Monochrome = 0,
    Yuv420 = 1,
    Yuv422 = 2,
    Yuv444 = 3,
}

/// Decode engine output layout. `P016` carries 10 and 12-bit samples in
/// 16-bit containers.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Nv12 = 0,
    P016 = 1,
}

impl PixelFormat {
    pub fn bytes_per_sample(self) -> u32 {
        match self {
            PixelFormat::Nv12 => 1,
            PixelFormat::P016 => 2,
        }
    }
}

// ── Render target formats ──

pub const RT_FORMAT_YUV420: u32 = 0x0000_0001;
pub const RT_FORMAT_YUV422: u32 = 0x0000_0002;
pub const RT_FORMAT_YUV444: u32 = 0x0000_0004;
pub const RT_FORMAT_YUV420_10: u32 = 0x0000_0100;
pub const RT_FORMAT_YUV420_12: u32 = 0x0000_1000;

/// Resolve a render-target format into (pixel format, bit depth).
pub fn surface_format_for_rt(rt_format: u32) -> Option<(PixelFormat, u8)> {
    match rt_format {
        RT_FORMAT_YUV420 => Some((PixelFormat::Nv12, 8)),
        RT_FORMAT_YUV420_10 => Some((PixelFormat::P016, 10)),
        RT_FORMAT_YUV420_12 => Some((PixelFormat::P016, 12)),
        _ => None,
    }
}

// ── FourCC ──

pub const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | (code[1] as u32) << 8 | (code[2] as u32) << 16 | (code[3] as u32) << 24
}

pub const FOURCC_NV12: u32 = fourcc(b"NV12");
pub const FOURCC_P010: u32 = fourcc(b"P010");
pub const FOURCC_P012: u32 = fourcc(b"P012");

pub const DRM_FORMAT_NV12: u32 = fourcc(b"NV12");
pub const DRM_FORMAT_R8: u32 = fourcc(b"R8  ");
pub const DRM_FORMAT_R16: u32 = fourcc(b"R16 ");
pub const DRM_FORMAT_RG88: u32 = fourcc(b"RG88");
pub const DRM_FORMAT_RG1616: u32 = fourcc(b"RG32");

/// Printable form of a fourcc for log fields.
pub struct FourCc(pub u32);

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.to_le_bytes() {
            let c = if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

// ── Buffers ──

/// Semantic type of a client buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferType {
    PictureParameter,
    IqMatrix,
    BitPlane,
    SliceGroupMap,
    SliceParameter,
    SliceData,
    MacroblockParameter,
    ResidualData,
    DeblockingParameter,
    Image,
    ProtectedSliceData,
    QMatrix,
    HuffmanTable,
    Probability,
    Other(u32),
}

impl BufferType {
    pub fn from_raw(value: u32) -> Self {
        use BufferType::*;
        match value {
            0 => PictureParameter,
            1 => IqMatrix,
            2 => BitPlane,
            3 => SliceGroupMap,
            4 => SliceParameter,
            5 => SliceData,
            6 => MacroblockParameter,
            7 => ResidualData,
            8 => DeblockingParameter,
            9 => Image,
            10 => ProtectedSliceData,
            11 => QMatrix,
            12 => HuffmanTable,
            13 => Probability,
            other => Other(other),
        }
    }

    pub fn as_raw(self) -> u32 {
        use BufferType::*;
        match self {
            PictureParameter => 0,
            IqMatrix => 1,
            BitPlane => 2,
            SliceGroupMap => 3,
            SliceParameter => 4,
            SliceData => 5,
            MacroblockParameter => 6,
            ResidualData => 7,
            DeblockingParameter => 8,
            Image => 9,
            ProtectedSliceData => 10,
            QMatrix => 11,
            HuffmanTable => 12,
            Probability => 13,
            Other(v) => v,
        }
    }
}

// ── Attributes ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigAttribType {
    RtFormat,
    MaxPictureWidth,
    MaxPictureHeight,
    Other(i32),
}

impl ConfigAttribType {
    pub fn from_raw(value: i32) -> Self {
        match value {
            0 => ConfigAttribType::RtFormat,
            18 => ConfigAttribType::MaxPictureWidth,
            19 => ConfigAttribType::MaxPictureHeight,
            other => ConfigAttribType::Other(other),
        }
    }
}

/// Value reported for attributes the driver does not know about.
pub const ATTRIB_NOT_SUPPORTED: u32 = 0x8000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigAttribute {
    pub kind: ConfigAttribType,
    pub value: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceAttribute {
    PixelFormat(u32),
    MinWidth(u32),
    MinHeight(u32),
    MaxWidth(u32),
    MaxHeight(u32),
}

/// Image formats the copy-out path can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageFormat {
    pub fourcc: u32,
    pub bits_per_pixel: u32,
}

impl ImageFormat {
    pub const NV12: Self = Self { fourcc: FOURCC_NV12, bits_per_pixel: 12 };
    pub const P010: Self = Self { fourcc: FOURCC_P010, bits_per_pixel: 24 };
    pub const P012: Self = Self { fourcc: FOURCC_P012, bits_per_pixel: 24 };

    pub fn bytes_per_sample(&self) -> u32 {
        if self.fourcc == FOURCC_P010 || self.fourcc == FOURCC_P012 {
            2
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceStatus {
    Rendering,
    Ready,
}

/// Memory type accepted by surface export (DRM PRIME, 2-layer descriptor).
pub const SURFACE_MEM_TYPE_DRM_PRIME_2: u32 = 0x4000_0000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_raw_values_stable() {
        for raw in 0..40 {
            if let Some(p) = Profile::from_raw(raw) {
                assert_eq!(p.as_raw(), raw);
            }
        }
        assert_eq!(Profile::from_raw(11), None);
        assert_eq!(Profile::from_raw(-1), None);
    }

    #[test]
    fn test_rt_format_table() {
        assert_eq!(surface_format_for_rt(RT_FORMAT_YUV420), Some((PixelFormat::Nv12, 8)));
        assert_eq!(surface_format_for_rt(RT_FORMAT_YUV420_10), Some((PixelFormat::P016, 10)));
        assert_eq!(surface_format_for_rt(RT_FORMAT_YUV420_12), Some((PixelFormat::P016, 12)));
        assert_eq!(surface_format_for_rt(RT_FORMAT_YUV444), None);
    }

    #[test]
    fn test_fourcc_display() {
        assert_eq!(FourCc(FOURCC_NV12).to_string(), "NV12");
        assert_eq!(FourCc(DRM_FORMAT_R8).to_string(), "R8  ");
    }

    #[test]
    fn test_unknown_buffer_type() {
        assert_eq!(BufferType::from_raw(42), BufferType::Other(42));
        assert_eq!(BufferType::from_raw(5), BufferType::SliceData);
        assert_eq!(BufferType::SliceData.as_raw(), 5);
    }
}
