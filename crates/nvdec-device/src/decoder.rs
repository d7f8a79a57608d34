//! NVDEC implementation of [`DecodeDevice`].

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, trace, warn};
use va_backend::device::{
    DecodeSubmission, DecoderCaps, DevicePtr, FrameFields, MappedFrame, SessionHandle,
    SessionParams,
};
use va_backend::params::PictureParams;
use va_backend::types::{ChromaFormat, VideoCodec};
use va_backend::{DecodeDevice, DeviceError};

use crate::cuda::{check, CudaContext};
use crate::ffi::{
    self, NvcuvidLibrary, CUvideoctxlock, CUvideodecoder, CUDA_MEMCPY2D, CUVIDDECODECAPS,
    CUVIDDECODECREATEINFO, CUVIDPICPARAMS, CUVIDPROCPARAMS,
};

struct Session {
    decoder: CUvideodecoder,
    lock: CUvideoctxlock,
}

/// Decode device backed by NVDEC sessions on one CUDA context.
pub struct NvDecodeDevice {
    cuda: Arc<CudaContext>,
    cuvid: NvcuvidLibrary,
    sessions: HashMap<SessionHandle, Session>,
    next_session: u64,
}

// SAFETY: Decoder and lock handles are only touched through `&mut self`, with
// the context made current first.
unsafe impl Send for NvDecodeDevice {}

impl NvDecodeDevice {
    pub fn new(cuda: Arc<CudaContext>, cuvid: NvcuvidLibrary) -> Self {
        NvDecodeDevice {
            cuda,
            cuvid,
            sessions: HashMap::new(),
            next_session: 1,
        }
    }

    fn session(&self, handle: SessionHandle, call: &'static str) -> Result<&Session, DeviceError> {
        // -1 matches no CUresult; it marks a handle this device never issued.
        self.sessions.get(&handle).ok_or(DeviceError::new(call, -1))
    }
}

/// Fill the engine's picture struct from accumulated parameters.
fn pic_params(submission: &DecodeSubmission<'_>) -> CUVIDPICPARAMS {
    let p: &PictureParams = submission.params;
    let mut out = CUVIDPICPARAMS {
        PicWidthInMbs: p.pic_width_in_mbs,
        FrameHeightInMbs: p.frame_height_in_mbs,
        CurrPicIdx: p.curr_pic_idx,
        field_pic_flag: p.field_pic_flag.into(),
        bottom_field_flag: p.bottom_field_flag.into(),
        second_field: p.second_field.into(),
        nBitstreamDataLen: submission.bitstream.len() as u32,
        pBitstreamData: submission.bitstream.as_ptr(),
        nNumSlices: submission.slice_offsets.len() as u32,
        pSliceDataOffsets: submission.slice_offsets.as_ptr(),
        ref_pic_flag: p.ref_pic_flag.into(),
        intra_pic_flag: p.intra_pic_flag.into(),
        ..Default::default()
    };

    let codec = p.codec.as_bytes();
    let len = codec.len().min(ffi::CODEC_SPECIFIC_BYTES);
    // SAFETY: CodecSpecific is CODEC_SPECIFIC_BYTES of plain integers.
    let dst = unsafe {
        std::slice::from_raw_parts_mut(
            out.CodecSpecific.as_mut_ptr() as *mut u8,
            ffi::CODEC_SPECIFIC_BYTES,
        )
    };
    dst[..len].copy_from_slice(&codec[..len]);
    out
}

fn proc_params(fields: FrameFields) -> CUVIDPROCPARAMS {
    CUVIDPROCPARAMS {
        progressive_frame: fields.progressive.into(),
        top_field_first: fields.top_field_first.into(),
        second_field: fields.second_field.into(),
        ..Default::default()
    }
}

impl DecodeDevice for NvDecodeDevice {
    fn name(&self) -> String {
        self.cuda.device_name()
    }

    fn decoder_caps(
        &mut self,
        codec: VideoCodec,
        chroma: ChromaFormat,
        bit_depth: u8,
    ) -> Result<DecoderCaps, DeviceError> {
        self.cuda.make_current()?;
        let mut caps = CUVIDDECODECAPS {
            eCodecType: codec as i32,
            eChromaFormat: chroma as i32,
            nBitDepthMinus8: u32::from(bit_depth.saturating_sub(8)),
            ..Default::default()
        };
        // SAFETY: `caps` is a valid, initialised query struct.
        check("cuvidGetDecoderCaps", unsafe {
            (self.cuvid.cuvidGetDecoderCaps)(&mut caps)
        })?;
        trace!(
            ?codec,
            ?chroma,
            bit_depth,
            supported = caps.bIsSupported,
            max_width = caps.nMaxWidth,
            max_height = caps.nMaxHeight,
            "decoder caps"
        );
        Ok(DecoderCaps {
            supported: caps.bIsSupported != 0,
            min_width: u32::from(caps.nMinWidth),
            min_height: u32::from(caps.nMinHeight),
            max_width: caps.nMaxWidth,
            max_height: caps.nMaxHeight,
            output_format_mask: caps.nOutputFormatMask,
        })
    }

    fn create_session(&mut self, params: &SessionParams) -> Result<SessionHandle, DeviceError> {
        self.cuda.make_current()?;

        let mut lock: CUvideoctxlock = std::ptr::null_mut();
        // SAFETY: Out-pointer is a valid local; the context outlives the lock.
        check("cuvidCtxLockCreate", unsafe {
            (self.cuvid.cuvidCtxLockCreate)(&mut lock, self.cuda.raw())
        })?;

        let width = libc::c_ulong::from(params.width);
        let height = libc::c_ulong::from(params.height);
        let surfaces = libc::c_ulong::from(params.num_surfaces);
        let mut info = CUVIDDECODECREATEINFO {
            ulWidth: width,
            ulHeight: height,
            ulNumDecodeSurfaces: surfaces,
            CodecType: params.codec as i32,
            ChromaFormat: params.chroma as i32,
            ulCreationFlags: ffi::CUDA_VIDEO_CREATE_PREFER_CUVID,
            bitDepthMinus8: libc::c_ulong::from(params.bit_depth.saturating_sub(8)),
            ulMaxWidth: width,
            ulMaxHeight: height,
            OutputFormat: params.format as i32,
            DeinterlaceMode: ffi::CUDA_VIDEO_DEINTERLACE_WEAVE,
            ulTargetWidth: width,
            ulTargetHeight: height,
            ulNumOutputSurfaces: surfaces,
            vidLock: lock,
            ..Default::default()
        };

        let mut decoder: CUvideodecoder = std::ptr::null_mut();
        // SAFETY: `info` is fully initialised; out-pointer is a valid local.
        let created = check("cuvidCreateDecoder", unsafe {
            (self.cuvid.cuvidCreateDecoder)(&mut decoder, &mut info)
        });
        if let Err(e) = created {
            // SAFETY: The lock was created above and nothing references it.
            unsafe { (self.cuvid.cuvidCtxLockDestroy)(lock) };
            return Err(e);
        }

        let handle = SessionHandle(self.next_session);
        self.next_session += 1;
        self.sessions.insert(handle, Session { decoder, lock });
        info!(
            session = handle.0,
            codec = ?params.codec,
            width = params.width,
            height = params.height,
            surfaces = params.num_surfaces,
            "NVDEC decoder created"
        );
        Ok(handle)
    }

    fn destroy_session(&mut self, handle: SessionHandle) -> Result<(), DeviceError> {
        let session = self
            .sessions
            .remove(&handle)
            .ok_or(DeviceError::new("cuvidDestroyDecoder", -1))?;
        self.cuda.make_current()?;
        // SAFETY: The decoder was removed from the table; no other reference
        // remains.
        let destroyed = check("cuvidDestroyDecoder", unsafe {
            (self.cuvid.cuvidDestroyDecoder)(session.decoder)
        });
        // SAFETY: Only the destroyed decoder used this lock.
        let unlocked = check("cuvidCtxLockDestroy", unsafe {
            (self.cuvid.cuvidCtxLockDestroy)(session.lock)
        });
        debug!(session = handle.0, "NVDEC decoder destroyed");
        destroyed.and(unlocked)
    }

    fn decode_picture(
        &mut self,
        handle: SessionHandle,
        submission: &DecodeSubmission<'_>,
    ) -> Result<(), DeviceError> {
        let decoder = self.session(handle, "cuvidDecodePicture")?.decoder;
        self.cuda.make_current()?;
        let mut params = pic_params(submission);
        trace!(
            session = handle.0,
            picture = params.CurrPicIdx,
            bytes = params.nBitstreamDataLen,
            slices = params.nNumSlices,
            "cuvidDecodePicture"
        );
        // SAFETY: The bitstream and offset slices outlive this call; the
        // engine copies them before returning.
        check("cuvidDecodePicture", unsafe {
            (self.cuvid.cuvidDecodePicture)(decoder, &mut params)
        })
    }

    fn map_frame(
        &mut self,
        handle: SessionHandle,
        picture_index: i32,
        fields: FrameFields,
    ) -> Result<MappedFrame, DeviceError> {
        let decoder = self.session(handle, "cuvidMapVideoFrame")?.decoder;
        self.cuda.make_current()?;
        let mut proc = proc_params(fields);
        let mut ptr: DevicePtr = 0;
        let mut pitch: u32 = 0;
        // SAFETY: Out-pointers are valid locals.
        check("cuvidMapVideoFrame", unsafe {
            (self.cuvid.cuvidMapVideoFrame64)(decoder, picture_index, &mut ptr, &mut pitch, &mut proc)
        })?;
        trace!(session = handle.0, picture_index, ptr, pitch, "frame mapped");
        Ok(MappedFrame { ptr, pitch })
    }

    fn unmap_frame(&mut self, handle: SessionHandle, frame: MappedFrame) -> Result<(), DeviceError> {
        let decoder = self.session(handle, "cuvidUnmapVideoFrame")?.decoder;
        self.cuda.make_current()?;
        // SAFETY: `frame.ptr` came from cuvidMapVideoFrame64 on this decoder.
        check("cuvidUnmapVideoFrame", unsafe {
            (self.cuvid.cuvidUnmapVideoFrame64)(decoder, frame.ptr)
        })
    }

    fn copy_to_host(
        &mut self,
        src: DevicePtr,
        src_pitch: u32,
        dst: &mut [u8],
        dst_pitch: u32,
        width_bytes: u32,
        rows: u32,
    ) -> Result<(), DeviceError> {
        if rows == 0 {
            return Ok(());
        }
        let needed = dst_pitch as usize * (rows as usize - 1) + width_bytes as usize;
        if dst.len() < needed || width_bytes > dst_pitch {
            warn!(needed, available = dst.len(), "host copy target too small");
            return Err(DeviceError::new("cuMemcpy2D", -1));
        }
        self.cuda.make_current()?;
        let copy = CUDA_MEMCPY2D {
            srcMemoryType: ffi::CU_MEMORYTYPE_DEVICE,
            srcDevice: src,
            srcPitch: src_pitch as usize,
            dstMemoryType: ffi::CU_MEMORYTYPE_HOST,
            dstHost: dst.as_mut_ptr().cast(),
            dstPitch: dst_pitch as usize,
            WidthInBytes: width_bytes as usize,
            Height: rows as usize,
            ..Default::default()
        };
        // SAFETY: `dst` was checked to hold every destination row.
        check("cuMemcpy2D", unsafe { (self.cuda.lib.cuMemcpy2D)(&copy) })
    }

    fn alloc_scratch(&mut self, size: usize) -> Result<DevicePtr, DeviceError> {
        self.cuda.make_current()?;
        let mut ptr: DevicePtr = 0;
        // SAFETY: Out-pointer is a valid local; the memset covers exactly the
        // allocation.
        unsafe {
            check("cuMemAlloc", (self.cuda.lib.cuMemAlloc)(&mut ptr, size))?;
            if let Err(e) = check("cuMemsetD8", (self.cuda.lib.cuMemsetD8)(ptr, 0, size)) {
                (self.cuda.lib.cuMemFree)(ptr);
                return Err(e);
            }
        }
        Ok(ptr)
    }

    fn free_scratch(&mut self, ptr: DevicePtr) -> Result<(), DeviceError> {
        self.cuda.make_current()?;
        // SAFETY: `ptr` came from alloc_scratch.
        check("cuMemFree", unsafe { (self.cuda.lib.cuMemFree)(ptr) })
    }
}

impl Drop for NvDecodeDevice {
    fn drop(&mut self) {
        let open: Vec<SessionHandle> = self.sessions.keys().copied().collect();
        for handle in open {
            warn!(session = handle.0, "decoder still open at shutdown");
            if let Err(e) = self.destroy_session(handle) {
                warn!(error = %e, "failed to destroy decoder");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use va_backend::params::CodecParams;

    #[test]
    fn test_pic_params_carry_bitstream() {
        let mut params = PictureParams {
            pic_width_in_mbs: 4,
            frame_height_in_mbs: 2,
            curr_pic_idx: 3,
            intra_pic_flag: true,
            ..Default::default()
        };
        params.codec.mpeg2_mut().f_code = [[1, 2], [3, 4]];
        let bitstream = [0u8, 0, 1, 0xb3, 7];
        let offsets = [0u32];
        let submission = DecodeSubmission {
            params: &params,
            bitstream: &bitstream,
            slice_offsets: &offsets,
        };

        let out = pic_params(&submission);
        assert_eq!((out.PicWidthInMbs, out.FrameHeightInMbs, out.CurrPicIdx), (4, 2, 3));
        assert_eq!(out.intra_pic_flag, 1);
        assert_eq!(out.field_pic_flag, 0);
        assert_eq!(out.nBitstreamDataLen, 5);
        assert_eq!(out.nNumSlices, 1);
        assert_eq!(out.pBitstreamData, bitstream.as_ptr());

        let codec = params.codec.as_bytes();
        // SAFETY: reading back plain integers.
        let raw = unsafe {
            std::slice::from_raw_parts(out.CodecSpecific.as_ptr() as *const u8, codec.len())
        };
        assert_eq!(raw, codec);
    }

    #[test]
    fn test_empty_codec_block_leaves_union_zeroed() {
        let params = PictureParams {
            codec: CodecParams::None,
            ..Default::default()
        };
        let submission = DecodeSubmission {
            params: &params,
            bitstream: &[],
            slice_offsets: &[],
        };
        let out = pic_params(&submission);
        assert!(out.CodecSpecific.iter().all(|&w| w == 0));
    }

    #[test]
    fn test_proc_params_from_fields() {
        let proc = proc_params(FrameFields {
            progressive: false,
            top_field_first: true,
            second_field: true,
        });
        assert_eq!((proc.progressive_frame, proc.top_field_first, proc.second_field), (0, 1, 1));
    }
}
