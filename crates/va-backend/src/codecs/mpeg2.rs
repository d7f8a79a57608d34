use tracing::trace;

use super::{
    bits, queue_slice_params, ClientBuffer, CodecModule, Fields, Handled, PictureAccumulator,
    PictureIndexLookup,
};
use crate::error::CodecError;
use crate::types::{BufferType, Profile, VideoCodec};

const PICTURE_STRUCTURE_BOTTOM: u32 = 2;
const PICTURE_STRUCTURE_FRAME: u32 = 3;

const CODING_TYPE_I: i32 = 1;
const CODING_TYPE_P: i32 = 2;

pub struct Mpeg2Module;

impl CodecModule for Mpeg2Module {
    fn name(&self) -> &'static str {
        "mpeg2"
    }

    fn profiles(&self) -> &'static [Profile] {
        &[Profile::Mpeg2Simple, Profile::Mpeg2Main]
    }

    fn codec_for(&self, profile: Profile) -> Option<VideoCodec> {
        match profile {
            Profile::Mpeg2Simple | Profile::Mpeg2Main => Some(VideoCodec::Mpeg2),
            _ => None,
        }
    }

    fn handle(
        &self,
        kind: BufferType,
        buffer: &ClientBuffer<'_>,
        picture: &mut PictureAccumulator,
        refs: &dyn PictureIndexLookup,
    ) -> Result<Handled, CodecError> {
        match kind {
            BufferType::PictureParameter => picture_params(buffer, picture, refs)?,
            BufferType::IqMatrix => iq_matrix(buffer, picture)?,
            BufferType::SliceParameter => {
                queue_slice_params("mpeg2 slice parameter", buffer, picture)?;
            }
            // MPEG-2 slices carry their own start codes.
            BufferType::SliceData => picture.append_slice_data(buffer.data, None)?,
            _ => return Ok(Handled::Ignored),
        }
        Ok(Handled::Consumed)
    }
}

/// VAPictureParameterBufferMPEG2.
fn picture_params(
    buffer: &ClientBuffer<'_>,
    picture: &mut PictureAccumulator,
    refs: &dyn PictureIndexLookup,
) -> Result<(), CodecError> {
    let f = Fields::new("mpeg2 picture parameter", buffer.data, 24)?;
    let horizontal = f.u16(0) as i32;
    let vertical = f.u16(2) as i32;
    let forward = f.u32(4);
    let backward = f.u32(8);
    let coding_type = f.i32(12);
    let f_code = f.u32(16);
    let ext = f.u32(20);

    let structure = bits(ext, 2, 2);
    let field_pic = structure != PICTURE_STRUCTURE_FRAME;

    let params = &mut picture.params;
    params.pic_width_in_mbs = (horizontal + 15) / 16;
    params.frame_height_in_mbs = (vertical + 15) / 16;
    params.field_pic_flag = field_pic;
    params.bottom_field_flag = structure == PICTURE_STRUCTURE_BOTTOM;
    params.second_field = field_pic && bits(ext, 12, 1) == 0;
    params.intra_pic_flag = coding_type == CODING_TYPE_I;
    params.ref_pic_flag = coding_type == CODING_TYPE_I || coding_type == CODING_TYPE_P;

    let m = params.codec.mpeg2_mut();
    m.forward_ref_idx = refs.picture_index_or_none(forward);
    m.backward_ref_idx = refs.picture_index_or_none(backward);
    m.picture_coding_type = coding_type;
    m.f_code = [
        [bits(f_code, 12, 4) as i32, bits(f_code, 8, 4) as i32],
        [bits(f_code, 4, 4) as i32, bits(f_code, 0, 4) as i32],
    ];
    m.intra_dc_precision = bits(ext, 0, 2) as i32;
    m.top_field_first = bits(ext, 4, 1) as i32;
    m.frame_pred_frame_dct = bits(ext, 5, 1) as i32;
    m.concealment_motion_vectors = bits(ext, 6, 1) as i32;
    m.q_scale_type = bits(ext, 7, 1) as i32;
    m.intra_vlc_format = bits(ext, 8, 1) as i32;
    m.alternate_scan = bits(ext, 9, 1) as i32;

    trace!(
        width = horizontal,
        height = vertical,
        coding_type,
        forward = m.forward_ref_idx,
        backward = m.backward_ref_idx,
        "mpeg2 picture parameters"
    );
    Ok(())
}

/// VAIQMatrixBufferMPEG2. Only the luma matrices reach the engine.
fn iq_matrix(buffer: &ClientBuffer<'_>, picture: &mut PictureAccumulator) -> Result<(), CodecError> {
    let f = Fields::new("mpeg2 iq matrix", buffer.data, 16 + 2 * 64)?;
    let load_intra = f.i32(0) != 0;
    let load_inter = f.i32(4) != 0;

    let m = picture.params.codec.mpeg2_mut();
    if load_intra {
        m.quant_matrix_intra = f.bytes::<64>(16);
    }
    if load_inter {
        m.quant_matrix_inter = f.bytes::<64>(80);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::CodecParams;
    use crate::types::{SurfaceId, INVALID_ID};

    fn pic_param_buffer(coding_type: i32, forward: u32, ext: u32) -> Vec<u8> {
        let mut buf = vec![0u8; 40];
        buf[0..2].copy_from_slice(&720u16.to_le_bytes());
        buf[2..4].copy_from_slice(&480u16.to_le_bytes());
        buf[4..8].copy_from_slice(&forward.to_le_bytes());
        buf[8..12].copy_from_slice(&INVALID_ID.to_le_bytes());
        buf[12..16].copy_from_slice(&coding_type.to_le_bytes());
        buf[16..20].copy_from_slice(&0x1234u32.to_le_bytes());
        buf[20..24].copy_from_slice(&ext.to_le_bytes());
        buf
    }

    fn one(data: &[u8]) -> ClientBuffer<'_> {
        ClientBuffer { data, element_size: data.len(), elements: 1 }
    }

    #[test]
    fn test_picture_params_frame() {
        let targets: Vec<SurfaceId> = vec![20, 21, 22];
        let mut pic = PictureAccumulator::new();
        // frame picture, top field first, is_first_field
        let ext = (PICTURE_STRUCTURE_FRAME << 2) | (1 << 4) | (1 << 12);
        let data = pic_param_buffer(CODING_TYPE_P, 22, ext);
        let handled = Mpeg2Module
            .handle(BufferType::PictureParameter, &one(&data), &mut pic, &targets)
            .unwrap();
        assert_eq!(handled, Handled::Consumed);

        assert_eq!(pic.params.pic_width_in_mbs, 45);
        assert_eq!(pic.params.frame_height_in_mbs, 30);
        assert!(!pic.params.field_pic_flag);
        assert!(!pic.params.second_field);
        assert!(pic.params.ref_pic_flag);
        assert!(!pic.params.intra_pic_flag);

        let CodecParams::Mpeg2(m) = &pic.params.codec else {
            panic!("expected mpeg2 block");
        };
        assert_eq!(m.forward_ref_idx, 2);
        assert_eq!(m.backward_ref_idx, -1);
        assert_eq!(m.f_code, [[1, 2], [3, 4]]);
        assert_eq!(m.top_field_first, 1);
    }

    #[test]
    fn test_picture_params_second_bottom_field() {
        let targets: Vec<SurfaceId> = vec![1];
        let mut pic = PictureAccumulator::new();
        let ext = PICTURE_STRUCTURE_BOTTOM << 2;
        let data = pic_param_buffer(CODING_TYPE_I, INVALID_ID, ext);
        Mpeg2Module
            .handle(BufferType::PictureParameter, &one(&data), &mut pic, &targets)
            .unwrap();
        assert!(pic.params.field_pic_flag);
        assert!(pic.params.bottom_field_flag);
        assert!(pic.params.second_field);
        assert!(pic.params.intra_pic_flag);
    }

    #[test]
    fn test_iq_matrix_respects_load_flags() {
        let targets: Vec<SurfaceId> = Vec::new();
        let mut pic = PictureAccumulator::new();
        let mut data = vec![0u8; 16 + 4 * 64];
        data[0..4].copy_from_slice(&1i32.to_le_bytes());
        data[16..80].fill(8);
        data[80..144].fill(16);
        Mpeg2Module
            .handle(BufferType::IqMatrix, &one(&data), &mut pic, &targets)
            .unwrap();
        let CodecParams::Mpeg2(m) = &pic.params.codec else {
            panic!("expected mpeg2 block");
        };
        assert_eq!(m.quant_matrix_intra, [8; 64]);
        assert_eq!(m.quant_matrix_inter, [0; 64]);
    }

    #[test]
    fn test_slices_have_no_prefix() {
        let targets: Vec<SurfaceId> = Vec::new();
        let mut pic = PictureAccumulator::new();
        let mut params = vec![0u8; 48];
        params[0..4].copy_from_slice(&3u32.to_le_bytes());
        params[4..8].copy_from_slice(&1u32.to_le_bytes());
        Mpeg2Module
            .handle(BufferType::SliceParameter, &one(&params), &mut pic, &targets)
            .unwrap();
        Mpeg2Module
            .handle(BufferType::SliceData, &one(&[9, 1, 2, 3]), &mut pic, &targets)
            .unwrap();
        assert_eq!(pic.bitstream.as_slice(), &[1, 2, 3]);
        assert_eq!(pic.slice_offsets.as_slice(), &[0]);
    }

    #[test]
    fn test_truncated_picture_params() {
        let targets: Vec<SurfaceId> = Vec::new();
        let mut pic = PictureAccumulator::new();
        let err = Mpeg2Module
            .handle(BufferType::PictureParameter, &one(&[0; 10]), &mut pic, &targets)
            .unwrap_err();
        assert!(matches!(err, CodecError::Truncated { needed: 24, got: 10, .. }));
    }

    #[test]
    fn test_unknown_buffer_ignored() {
        let targets: Vec<SurfaceId> = Vec::new();
        let mut pic = PictureAccumulator::new();
        let handled = Mpeg2Module
            .handle(BufferType::Probability, &one(&[0; 4]), &mut pic, &targets)
            .unwrap();
        assert_eq!(handled, Handled::Ignored);
    }
}
