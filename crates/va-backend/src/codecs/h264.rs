use tracing::trace;

use super::{
    bits, queue_slice_params, ClientBuffer, CodecModule, Fields, Handled, PictureAccumulator,
    PictureIndexLookup, START_CODE,
};
use crate::error::CodecError;
use crate::params::H264DpbEntry;
use crate::types::{BufferType, Profile, VideoCodec};

// VAPictureH264 flags
const PICTURE_INVALID: u32 = 0x01;
const PICTURE_TOP_FIELD: u32 = 0x02;
const PICTURE_BOTTOM_FIELD: u32 = 0x04;
const PICTURE_SHORT_TERM: u32 = 0x08;
const PICTURE_LONG_TERM: u32 = 0x10;

const VA_PICTURE_SIZE: usize = 36;
const PIC_PARAMS_MIN: usize = 638;
const SLICE_PARAMS_MIN: usize = 20;

pub struct H264Module;

impl CodecModule for H264Module {
    fn name(&self) -> &'static str {
        "h264"
    }

    fn profiles(&self) -> &'static [Profile] {
        &[
            Profile::H264ConstrainedBaseline,
            Profile::H264Baseline,
            Profile::H264Main,
            Profile::H264High,
        ]
    }

    fn codec_for(&self, profile: Profile) -> Option<VideoCodec> {
        self.profiles().contains(&profile).then_some(VideoCodec::H264)
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
            BufferType::SliceParameter => slice_params(buffer, picture)?,
            BufferType::SliceData => picture.append_slice_data(buffer.data, Some(START_CODE))?,
            _ => return Ok(Handled::Ignored),
        }
        Ok(Handled::Consumed)
    }
}

/// One VAPictureH264 at `off`.
struct VaPicture {
    surface: u32,
    frame_idx: u32,
    flags: u32,
    top_poc: i32,
    bottom_poc: i32,
}

impl VaPicture {
    fn read(f: &Fields<'_>, off: usize) -> Self {
        VaPicture {
            surface: f.u32(off),
            frame_idx: f.u32(off + 4),
            flags: f.u32(off + 8),
            top_poc: f.i32(off + 12),
            bottom_poc: f.i32(off + 16),
        }
    }

    fn dpb_entry(&self, refs: &dyn PictureIndexLookup) -> H264DpbEntry {
        if self.flags & PICTURE_INVALID != 0 {
            return H264DpbEntry { pic_idx: -1, ..Default::default() };
        }
        let pic_idx = refs.picture_index_or_none(self.surface);
        if pic_idx < 0 {
            return H264DpbEntry { pic_idx: -1, ..Default::default() };
        }

        let fields = self.flags & (PICTURE_TOP_FIELD | PICTURE_BOTTOM_FIELD);
        let used_for_reference = if fields == 0 {
            // frame reference: both fields
            if self.flags & (PICTURE_SHORT_TERM | PICTURE_LONG_TERM) != 0 { 3 } else { 0 }
        } else {
            (fields >> 1) as i32
        };

        H264DpbEntry {
            pic_idx,
            frame_idx: self.frame_idx as i32,
            is_long_term: (self.flags & PICTURE_LONG_TERM != 0) as i32,
            not_existing: 0,
            used_for_reference,
            field_order_cnt: [self.top_poc, self.bottom_poc],
        }
    }
}

/// VAPictureParameterBufferH264.
fn picture_params(
    buffer: &ClientBuffer<'_>,
    picture: &mut PictureAccumulator,
    refs: &dyn PictureIndexLookup,
) -> Result<(), CodecError> {
    let f = Fields::new("h264 picture parameter", buffer.data, PIC_PARAMS_MIN)?;
    let curr = VaPicture::read(&f, 0);
    let width_mbs = f.u16(612) as i32 + 1;
    let height_mbs = f.u16(614) as i32 + 1;
    let seq = f.u32(620);
    let pic = f.u32(632);

    let frame_mbs_only = bits(seq, 4, 1);
    let field_pic = bits(pic, 5, 1);

    let params = &mut picture.params;
    params.pic_width_in_mbs = width_mbs;
    params.frame_height_in_mbs = (2 - frame_mbs_only as i32) * height_mbs;
    params.field_pic_flag = field_pic != 0;
    params.bottom_field_flag = curr.flags & PICTURE_BOTTOM_FIELD != 0;
    params.second_field = curr.flags & PICTURE_TOP_FIELD != 0 && curr.flags & PICTURE_BOTTOM_FIELD != 0;
    params.ref_pic_flag = bits(pic, 10, 1) != 0;
    // Cleared by the first non-intra slice.
    params.intra_pic_flag = true;

    let h = params.codec.h264_mut();
    h.log2_max_frame_num_minus4 = bits(seq, 8, 4) as i32;
    h.pic_order_cnt_type = bits(seq, 12, 2) as i32;
    h.log2_max_pic_order_cnt_lsb_minus4 = bits(seq, 14, 4) as i32;
    h.delta_pic_order_always_zero_flag = bits(seq, 18, 1) as i32;
    h.frame_mbs_only_flag = frame_mbs_only as i32;
    h.direct_8x8_inference_flag = bits(seq, 6, 1) as i32;
    h.num_ref_frames = f.u8(618) as i32;
    h.residual_colour_transform_flag = bits(seq, 2, 1) as u8;
    h.bit_depth_luma_minus8 = f.u8(616);
    h.bit_depth_chroma_minus8 = f.u8(617);

    h.entropy_coding_mode_flag = bits(pic, 0, 1) as i32;
    h.weighted_pred_flag = bits(pic, 1, 1) as i32;
    h.weighted_bipred_idc = bits(pic, 2, 2) as i32;
    h.transform_8x8_mode_flag = bits(pic, 4, 1) as i32;
    h.constrained_intra_pred_flag = bits(pic, 6, 1) as i32;
    h.pic_order_present_flag = bits(pic, 7, 1) as i32;
    h.deblocking_filter_control_present_flag = bits(pic, 8, 1) as i32;
    h.redundant_pic_cnt_present_flag = bits(pic, 9, 1) as i32;
    h.ref_pic_flag = bits(pic, 10, 1) as i32;
    h.mbaff_frame_flag = (bits(seq, 5, 1) != 0 && field_pic == 0) as i32;
    h.pic_init_qp_minus26 = f.i8(628) as i32;
    h.pic_init_qs_minus26 = f.i8(629);
    h.chroma_qp_index_offset = f.i8(630) as i32;
    h.second_chroma_qp_index_offset = f.i8(631) as i32;
    h.num_slice_groups_minus1 = f.u8(624);
    h.slice_group_map_type = f.u8(625);
    h.slice_group_change_rate_minus1 = f.u16(626) as u32;
    h.frame_num = f.u16(636) as i32;
    h.curr_field_order_cnt = [curr.top_poc, curr.bottom_poc];

    for (i, entry) in h.dpb.iter_mut().enumerate() {
        let reference = VaPicture::read(&f, VA_PICTURE_SIZE * (i + 1));
        *entry = reference.dpb_entry(refs);
    }

    trace!(
        width_mbs,
        height_mbs,
        frame_num = h.frame_num,
        field_pic,
        "h264 picture parameters"
    );
    Ok(())
}

/// VAIQMatrixBufferH264: six 4x4 lists then two 8x8 lists.
fn iq_matrix(buffer: &ClientBuffer<'_>, picture: &mut PictureAccumulator) -> Result<(), CodecError> {
    let f = Fields::new("h264 iq matrix", buffer.data, 6 * 16 + 2 * 64)?;
    let h = picture.params.codec.h264_mut();
    for (i, list) in h.weight_scale_4x4.iter_mut().enumerate() {
        *list = f.bytes::<16>(i * 16);
    }
    for (i, list) in h.weight_scale_8x8.iter_mut().enumerate() {
        *list = f.bytes::<64>(96 + i * 64);
    }
    Ok(())
}

/// VASliceParameterBufferH264. Queues slice locations and picks up the
/// per-slice fields the engine wants at picture level.
fn slice_params(buffer: &ClientBuffer<'_>, picture: &mut PictureAccumulator) -> Result<(), CodecError> {
    queue_slice_params("h264 slice parameter", buffer, picture)?;

    for i in 0..buffer.elements {
        let element = buffer.element(i).unwrap_or(&[]);
        let f = Fields::new("h264 slice parameter", element, SLICE_PARAMS_MIN)?;
        let slice_type = f.u8(16) % 5;
        // I = 2, SI = 4
        if slice_type != 2 && slice_type != 4 {
            picture.params.intra_pic_flag = false;
        }
        let h = picture.params.codec.h264_mut();
        h.num_ref_idx_l0_active_minus1 = f.u8(18) as i32;
        h.num_ref_idx_l1_active_minus1 = f.u8(19) as i32;
    }
    Ok(())
}
