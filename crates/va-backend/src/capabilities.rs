//! Config creation and capability queries.

use tracing::{debug, trace, warn};

use crate::device::DecoderCaps;
use crate::driver::Driver;
use crate::error::{DriverError, Result};
use crate::objects::{ConfigObject, Object};
use crate::types::{
    ChromaFormat, ConfigAttribType, ConfigAttribute, ConfigId, Entrypoint, ImageFormat,
    PixelFormat, Profile, SurfaceAttribute, VideoCodec, ATTRIB_NOT_SUPPORTED, FOURCC_NV12,
    FOURCC_P010, FOURCC_P012, RT_FORMAT_YUV420, RT_FORMAT_YUV420_10, RT_FORMAT_YUV420_12,
};

pub const MAX_PROFILES: usize = 32;
pub const MAX_ENTRYPOINTS: usize = 1;
pub const MAX_IMAGE_FORMATS: usize = 3;

/// Every profile the backend knows, with the sample layout it implies.
/// Only rows a codec module claims are ever offered.
const PROFILE_TABLE: &[(Profile, u8, ChromaFormat)] = &[
    (Profile::Mpeg2Simple, 8, ChromaFormat::Yuv420),
    (Profile::Mpeg2Main, 8, ChromaFormat::Yuv420),
    (Profile::Mpeg4Simple, 8, ChromaFormat::Yuv420),
    (Profile::Mpeg4AdvancedSimple, 8, ChromaFormat::Yuv420),
    (Profile::Mpeg4Main, 8, ChromaFormat::Yuv420),
    (Profile::Vc1Simple, 8, ChromaFormat::Yuv420),
    (Profile::Vc1Main, 8, ChromaFormat::Yuv420),
    (Profile::Vc1Advanced, 8, ChromaFormat::Yuv420),
    (Profile::H264ConstrainedBaseline, 8, ChromaFormat::Yuv420),
    (Profile::H264Baseline, 8, ChromaFormat::Yuv420),
    (Profile::H264Main, 8, ChromaFormat::Yuv420),
    (Profile::H264High, 8, ChromaFormat::Yuv420),
    (Profile::HevcMain, 8, ChromaFormat::Yuv420),
    (Profile::HevcMain10, 10, ChromaFormat::Yuv420),
    (Profile::HevcMain12, 12, ChromaFormat::Yuv420),
    (Profile::HevcMain444, 8, ChromaFormat::Yuv444),
    (Profile::HevcMain444_10, 10, ChromaFormat::Yuv444),
    (Profile::HevcMain444_12, 12, ChromaFormat::Yuv444),
    (Profile::Vp8Version0_3, 8, ChromaFormat::Yuv420),
    (Profile::Vp9Profile0, 8, ChromaFormat::Yuv420),
    (Profile::Vp9Profile2, 10, ChromaFormat::Yuv420),
    (Profile::Av1Profile0, 8, ChromaFormat::Yuv420),
];

/// (bit depth, chroma) for a profile. Unlisted profiles are 8-bit 4:2:0.
pub fn profile_layout(profile: Profile) -> (u8, ChromaFormat) {
    PROFILE_TABLE
        .iter()
        .find(|(p, _, _)| *p == profile)
        .map(|&(_, depth, chroma)| (depth, chroma))
        .unwrap_or((8, ChromaFormat::Yuv420))
}

/// Output format for a bit depth. Anything wider than 8 bits lands in 16-bit
/// containers.
pub fn pixel_format_for_depth(bit_depth: u8) -> PixelFormat {
    if bit_depth > 8 {
        PixelFormat::P016
    } else {
        PixelFormat::Nv12
    }
}

fn rt_format_for_depth(bit_depth: u8) -> u32 {
    match bit_depth {
        10 => RT_FORMAT_YUV420 | RT_FORMAT_YUV420_10,
        12 => RT_FORMAT_YUV420 | RT_FORMAT_YUV420_12,
        _ => RT_FORMAT_YUV420,
    }
}

impl Driver {
    fn caps_for(
        &mut self,
        codec: VideoCodec,
        chroma: ChromaFormat,
        bit_depth: u8,
    ) -> Result<DecoderCaps> {
        let caps = self
            .device
            .decoder_caps(codec, chroma, bit_depth)
            .map_err(|e| DriverError::OperationFailed(e.to_string()))?;
        trace!(?codec, ?chroma, bit_depth, ?caps, "decoder caps");
        Ok(caps)
    }

    /// Resolve a profile to its codec module's engine codec and a fresh
    /// capability query.
    fn profile_caps(&mut self, profile: Profile) -> Result<(VideoCodec, DecoderCaps)> {
        let (_, codec) = self
            .codecs
            .find(profile)
            .ok_or(DriverError::UnsupportedProfile(profile.as_raw()))?;
        let (depth, chroma) = profile_layout(profile);
        let caps = self.caps_for(codec, chroma, depth)?;
        Ok((codec, caps))
    }

    /// Profiles that a codec module claims and the device can decode.
    pub fn query_config_profiles(&mut self) -> Result<Vec<Profile>> {
        let mut profiles = Vec::new();
        for &(profile, depth, chroma) in PROFILE_TABLE {
            let Some((_, codec)) = self.codecs.find(profile) else {
                continue;
            };
            match self.caps_for(codec, chroma, depth) {
                Ok(caps) if caps.supported => profiles.push(profile),
                Ok(_) => {}
                Err(e) => warn!(?profile, error = %e, "capability query failed, skipping profile"),
            }
            if profiles.len() == MAX_PROFILES {
                break;
            }
        }
        debug!(count = profiles.len(), "query_config_profiles");
        Ok(profiles)
    }

    pub fn query_config_entrypoints(&mut self, profile: Profile) -> Result<Vec<Entrypoint>> {
        if !self.codecs.claims(profile) {
            return Err(DriverError::UnsupportedProfile(profile.as_raw()));
        }
        Ok(vec![Entrypoint::Vld])
    }

    /// Fill in the value of each requested attribute. Unknown types are
    /// marked unsupported.
    pub fn get_config_attributes(
        &mut self,
        profile: Profile,
        entrypoint: Entrypoint,
        attributes: &mut [ConfigAttribute],
    ) -> Result<()> {
        if entrypoint != Entrypoint::Vld {
            return Err(DriverError::UnsupportedEntrypoint(entrypoint.as_raw()));
        }
        let (_, caps) = self.profile_caps(profile)?;
        let (depth, _) = profile_layout(profile);

        for attr in attributes.iter_mut() {
            attr.value = match attr.kind {
                ConfigAttribType::RtFormat => rt_format_for_depth(depth),
                ConfigAttribType::MaxPictureWidth => caps.max_width,
                ConfigAttribType::MaxPictureHeight => caps.max_height,
                ConfigAttribType::Other(kind) => {
                    debug!(?profile, kind, "unhandled config attribute");
                    ATTRIB_NOT_SUPPORTED
                }
            };
        }
        Ok(())
    }

    /// Create a config after checking that a codec module claims `profile`
    /// and the device supports it.
    pub fn create_config(
        &mut self,
        profile: Profile,
        entrypoint: Entrypoint,
        attributes: &[ConfigAttribute],
    ) -> Result<ConfigId> {
        debug!(?profile, ?entrypoint, attributes = attributes.len(), "create_config");
        if entrypoint != Entrypoint::Vld {
            return Err(DriverError::UnsupportedEntrypoint(entrypoint.as_raw()));
        }

        // A failed capability query means the profile cannot be served.
        let (codec, caps) = self.profile_caps(profile).map_err(|e| match e {
            DriverError::OperationFailed(reason) => {
                warn!(?profile, %reason, "capability query failed");
                DriverError::UnsupportedProfile(profile.as_raw())
            }
            other => other,
        })?;
        if !caps.supported {
            debug!(?profile, ?codec, "device reports profile unsupported");
            return Err(DriverError::UnsupportedProfile(profile.as_raw()));
        }

        let (bit_depth, chroma) = profile_layout(profile);
        let id = self.objects.allocate(Object::Config(ConfigObject {
            profile,
            entrypoint,
            codec,
            format: pixel_format_for_depth(bit_depth),
            chroma,
            bit_depth,
            attributes: attributes.to_vec(),
        }))?;
        Ok(id)
    }

    pub fn destroy_config(&mut self, id: ConfigId) -> Result<()> {
        self.config_object(id)?;
        self.objects.release(id);
        Ok(())
    }

    /// Profile, entrypoint and the attributes given at creation.
    pub fn query_config_attributes(
        &self,
        id: ConfigId,
    ) -> Result<(Profile, Entrypoint, Vec<ConfigAttribute>)> {
        let cfg = self.config_object(id)?;
        Ok((cfg.profile, cfg.entrypoint, cfg.attributes.clone()))
    }

    /// Pixel format and size limits for surfaces of `config`.
    pub fn query_surface_attributes(&mut self, id: ConfigId) -> Result<Vec<SurfaceAttribute>> {
        let cfg = self.config_object(id)?.clone();
        if cfg.chroma != ChromaFormat::Yuv420 {
            return Err(DriverError::InvalidConfig(id));
        }
        let caps = self.caps_for(cfg.codec, cfg.chroma, cfg.bit_depth)?;

        let mut attrs = Vec::with_capacity(5);
        let wide = caps.supports_output(PixelFormat::P016);
        let fourcc = match cfg.bit_depth {
            10 if wide => Some(FOURCC_P010),
            12 if wide => Some(FOURCC_P012),
            _ if caps.supports_output(PixelFormat::Nv12) => Some(FOURCC_NV12),
            _ => None,
        };
        if let Some(fourcc) = fourcc {
            attrs.push(SurfaceAttribute::PixelFormat(fourcc));
        }
        attrs.extend([
            SurfaceAttribute::MinWidth(caps.min_width),
            SurfaceAttribute::MinHeight(caps.min_height),
            SurfaceAttribute::MaxWidth(caps.max_width),
            SurfaceAttribute::MaxHeight(caps.max_height),
        ]);
        Ok(attrs)
    }

    pub fn query_image_formats(&self) -> Vec<ImageFormat> {
        vec![ImageFormat::NV12, ImageFormat::P010, ImageFormat::P012]
    }
}
