use tracing::trace;

use super::{
    bits, queue_slice_params, ClientBuffer, CodecModule, Fields, Handled, PictureAccumulator,
    PictureIndexLookup, START_CODE,
};
use crate::error::CodecError;
use crate::params::HevcPicParams;
use crate::types::{BufferType, Profile, VideoCodec};

// VAPictureHEVC flags
const PICTURE_INVALID: u32 = 0x01;
const PICTURE_LONG_TERM: u32 = 0x08;
const RPS_ST_CURR_BEFORE: u32 = 0x10;
const RPS_ST_CURR_AFTER: u32 = 0x20;
const RPS_LT_CURR: u32 = 0x40;

const VA_PICTURE_SIZE: usize = 28;
const VA_REFERENCE_FRAMES: usize = 15;
const PIC_PARAMS_MIN: usize = 572;
const IQ_MATRIX_MIN: usize = 1000;

/// Scaling list value meaning "flat".
const FLAT_SCALING: u8 = 16;

pub struct HevcModule;

impl CodecModule for HevcModule {
    fn name(&self) -> &'static str {
        "hevc"
    }

    fn profiles(&self) -> &'static [Profile] {
        &[Profile::HevcMain, Profile::HevcMain10, Profile::HevcMain12]
    }

    fn codec_for(&self, profile: Profile) -> Option<VideoCodec> {
        self.profiles().contains(&profile).then_some(VideoCodec::Hevc)
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
                queue_slice_params("hevc slice parameter", buffer, picture)?;
            }
            BufferType::SliceData => picture.append_slice_data(buffer.data, Some(START_CODE))?,
            _ => return Ok(Handled::Ignored),
        }
        Ok(Handled::Consumed)
    }
}

/// VAPictureParameterBufferHEVC.
fn picture_params(
    buffer: &ClientBuffer<'_>,
    picture: &mut PictureAccumulator,
    refs: &dyn PictureIndexLookup,
) -> Result<(), CodecError> {
    let f = Fields::new("hevc picture parameter", buffer.data, PIC_PARAMS_MIN)?;
    let width = f.u16(448) as i32;
    let height = f.u16(450) as i32;
    let pic = f.u32(452);
    let slice = f.u32(556);

    let params = &mut picture.params;
    params.pic_width_in_mbs = (width + 15) / 16;
    params.frame_height_in_mbs = (height + 15) / 16;
    params.field_pic_flag = false;
    params.bottom_field_flag = false;
    params.second_field = false;
    params.ref_pic_flag = true;
    params.intra_pic_flag = bits(slice, 13, 1) != 0;

    let h = params.codec.hevc_mut();
    h.pic_width_in_luma_samples = width;
    h.pic_height_in_luma_samples = height;

    h.separate_colour_plane_flag = bits(pic, 2, 1) as u8;
    h.pcm_enabled_flag = bits(pic, 3, 1) as u8;
    h.scaling_list_enable_flag = bits(pic, 4, 1) as u8;
    h.transform_skip_enabled_flag = bits(pic, 5, 1) as u8;
    h.amp_enabled_flag = bits(pic, 6, 1) as u8;
    h.strong_intra_smoothing_enabled_flag = bits(pic, 7, 1) as u8;
    h.sign_data_hiding_enabled_flag = bits(pic, 8, 1) as u8;
    h.constrained_intra_pred_flag = bits(pic, 9, 1) as u8;
    h.cu_qp_delta_enabled_flag = bits(pic, 10, 1) as u8;
    h.weighted_pred_flag = bits(pic, 11, 1) as u8;
    h.weighted_bipred_flag = bits(pic, 12, 1) as u8;
    h.transquant_bypass_enabled_flag = bits(pic, 13, 1) as u8;
    h.tiles_enabled_flag = bits(pic, 14, 1) as u8;
    h.entropy_coding_sync_enabled_flag = bits(pic, 15, 1) as u8;
    h.loop_filter_across_slices_enabled_flag = bits(pic, 16, 1) as u8;
    h.loop_filter_across_tiles_enabled_flag = bits(pic, 17, 1) as u8;
    h.pcm_loop_filter_disabled_flag = bits(pic, 18, 1) as u8;

    h.bit_depth_luma_minus8 = f.u8(457);
    h.bit_depth_chroma_minus8 = f.u8(458);
    h.pcm_sample_bit_depth_luma_minus1 = f.u8(459);
    h.pcm_sample_bit_depth_chroma_minus1 = f.u8(460);
    h.log2_min_luma_coding_block_size_minus3 = f.u8(461);
    h.log2_diff_max_min_luma_coding_block_size = f.u8(462);
    h.log2_min_transform_block_size_minus2 = f.u8(463);
    h.log2_diff_max_min_transform_block_size = f.u8(464);
    h.log2_min_pcm_luma_coding_block_size_minus3 = f.u8(465);
    h.log2_diff_max_min_pcm_luma_coding_block_size = f.u8(466);
    h.max_transform_hierarchy_depth_intra = f.u8(467);
    h.max_transform_hierarchy_depth_inter = f.u8(468);
    h.init_qp_minus26 = f.i8(469);
    h.diff_cu_qp_delta_depth = f.u8(470);
    h.pps_cb_qp_offset = f.i8(471);
    h.pps_cr_qp_offset = f.i8(472);
    h.log2_parallel_merge_level_minus2 = f.u8(473);
    h.num_tile_columns_minus1 = f.u8(474);
    h.num_tile_rows_minus1 = f.u8(475);
    for i in 0..19 {
        h.column_width_minus1[i] = f.u16(476 + 2 * i);
    }
    for i in 0..21 {
        h.row_height_minus1[i] = f.u16(514 + 2 * i);
    }

    h.lists_modification_present_flag = bits(slice, 0, 1) as u8;
    h.long_term_ref_pics_present_flag = bits(slice, 1, 1) as u8;
    h.sps_temporal_mvp_enabled_flag = bits(slice, 2, 1) as u8;
    h.cabac_init_present_flag = bits(slice, 3, 1) as u8;
    h.output_flag_present_flag = bits(slice, 4, 1) as u8;
    h.dependent_slice_segments_enabled_flag = bits(slice, 5, 1) as u8;
    h.pps_slice_chroma_qp_offsets_present_flag = bits(slice, 6, 1) as u8;
    h.sample_adaptive_offset_enabled_flag = bits(slice, 7, 1) as u8;
    h.deblocking_filter_override_enabled_flag = bits(slice, 8, 1) as u8;
    h.pps_deblocking_filter_disabled_flag = bits(slice, 9, 1) as u8;
    h.slice_segment_header_extension_present_flag = bits(slice, 10, 1) as u8;
    h.irap_pic_flag = bits(slice, 11, 1) as u8;
    h.idr_pic_flag = bits(slice, 12, 1) as u8;

    h.log2_max_pic_order_cnt_lsb_minus4 = f.u8(560);
    h.num_short_term_ref_pic_sets = f.u8(561);
    h.num_long_term_ref_pics_sps = f.u8(562);
    h.num_ref_idx_l0_default_active_minus1 = f.u8(563);
    h.num_ref_idx_l1_default_active_minus1 = f.u8(564);
    h.pps_beta_offset_div2 = f.i8(565);
    h.pps_tc_offset_div2 = f.i8(566);
    h.num_extra_slice_header_bits = f.u8(567);
    h.num_bits_for_short_term_rps_in_slice = f.u32(568) as i32;

    h.curr_pic_order_cnt_val = f.i32(4);
    fill_reference_sets(h, &f, refs);

    if h.scaling_list_enable_flag == 0 {
        flat_scaling_lists(h);
    }

    trace!(
        width,
        height,
        poc = h.curr_pic_order_cnt_val,
        total_curr = h.num_poc_total_curr,
        "hevc picture parameters"
    );
    Ok(())
}

fn fill_reference_sets(h: &mut HevcPicParams, f: &Fields<'_>, refs: &dyn PictureIndexLookup) {
    h.ref_pic_idx = [-1; 16];
    h.num_poc_st_curr_before = 0;
    h.num_poc_st_curr_after = 0;
    h.num_poc_lt_curr = 0;

    for i in 0..VA_REFERENCE_FRAMES {
        let off = VA_PICTURE_SIZE * (i + 1);
        let surface = f.u32(off);
        let poc = f.i32(off + 4);
        let flags = f.u32(off + 8);
        if flags & PICTURE_INVALID != 0 {
            continue;
        }
        let idx = refs.picture_index_or_none(surface);
        if idx < 0 {
            continue;
        }
        h.ref_pic_idx[i] = idx;
        h.pic_order_cnt_val[i] = poc;
        h.is_long_term[i] = (flags & PICTURE_LONG_TERM != 0) as u8;

        let set = if flags & RPS_ST_CURR_BEFORE != 0 {
            Some((&mut h.ref_pic_set_st_curr_before, &mut h.num_poc_st_curr_before))
        } else if flags & RPS_ST_CURR_AFTER != 0 {
            Some((&mut h.ref_pic_set_st_curr_after, &mut h.num_poc_st_curr_after))
        } else if flags & RPS_LT_CURR != 0 {
            Some((&mut h.ref_pic_set_lt_curr, &mut h.num_poc_lt_curr))
        } else {
            None
        };
        if let Some((list, count)) = set {
            if (*count as usize) < list.len() {
                list[*count as usize] = i as u8;
                *count += 1;
            }
        }
    }

    h.num_poc_total_curr = h.num_poc_st_curr_before + h.num_poc_st_curr_after + h.num_poc_lt_curr;
}

fn flat_scaling_lists(h: &mut HevcPicParams) {
    h.scaling_list_4x4 = [[FLAT_SCALING; 16]; 6];
    h.scaling_list_8x8 = [[FLAT_SCALING; 64]; 6];
    h.scaling_list_16x16 = [[FLAT_SCALING; 64]; 6];
    h.scaling_list_32x32 = [[FLAT_SCALING; 64]; 2];
    h.scaling_list_dc_16x16 = [FLAT_SCALING; 6];
    h.scaling_list_dc_32x32 = [FLAT_SCALING; 2];
}

/// VAIQMatrixBufferHEVC.
fn iq_matrix(buffer: &ClientBuffer<'_>, picture: &mut PictureAccumulator) -> Result<(), CodecError> {
    let f = Fields::new("hevc iq matrix", buffer.data, IQ_MATRIX_MIN)?;
    let h = picture.params.codec.hevc_mut();
    for (i, list) in h.scaling_list_4x4.iter_mut().enumerate() {
        *list = f.bytes::<16>(i * 16);
    }
    for (i, list) in h.scaling_list_8x8.iter_mut().enumerate() {
        *list = f.bytes::<64>(96 + i * 64);
    }
    for (i, list) in h.scaling_list_16x16.iter_mut().enumerate() {
        *list = f.bytes::<64>(480 + i * 64);
    }
    for (i, list) in h.scaling_list_32x32.iter_mut().enumerate() {
        *list = f.bytes::<64>(864 + i * 64);
    }
    h.scaling_list_dc_16x16 = f.bytes::<6>(992);
    h.scaling_list_dc_32x32 = f.bytes::<2>(998);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::CodecParams;
    use crate::types::{SurfaceId, INVALID_ID};

    fn put_picture(buf: &mut [u8], off: usize, surface: u32, poc: i32, flags: u32) {
        buf[off..off + 4].copy_from_slice(&surface.to_le_bytes());
        buf[off + 4..off + 8].copy_from_slice(&poc.to_le_bytes());
        buf[off + 8..off + 12].copy_from_slice(&flags.to_le_bytes());
    }

    fn pic_params() -> Vec<u8> {
        let mut buf = vec![0u8; 604];
        put_picture(&mut buf, 0, 30, 16, 0);
        for i in 0..VA_REFERENCE_FRAMES {
            put_picture(&mut buf, VA_PICTURE_SIZE * (i + 1), INVALID_ID, 0, PICTURE_INVALID);
        }
        buf[448..450].copy_from_slice(&1920u16.to_le_bytes());
        buf[450..452].copy_from_slice(&1080u16.to_le_bytes());
        // amp, sign data hiding
        let pic: u32 = 1 | (1 << 6) | (1 << 8);
        buf[452..456].copy_from_slice(&pic.to_le_bytes());
        buf[457] = 2;
        buf[469] = (-4i8) as u8;
        buf[476..478].copy_from_slice(&9u16.to_le_bytes());
        // sps temporal mvp, sao
        let slice: u32 = (1 << 2) | (1 << 7);
        buf[556..560].copy_from_slice(&slice.to_le_bytes());
        buf[560] = 4;
        buf[568..572].copy_from_slice(&11u32.to_le_bytes());
        buf
    }

    fn one(data: &[u8]) -> ClientBuffer<'_> {
        ClientBuffer { data, element_size: data.len(), elements: 1 }
    }

    fn hevc(pic: &PictureAccumulator) -> &HevcPicParams {
        match &pic.params.codec {
            CodecParams::Hevc(h) => h,
            other => panic!("expected hevc block, got {other:?}"),
        }
    }

    #[test]
    fn test_picture_params() {
        let targets: Vec<SurfaceId> = vec![30, 31, 32];
        let mut buf = pic_params();
        put_picture(&mut buf, VA_PICTURE_SIZE, 31, 12, RPS_ST_CURR_BEFORE);
        put_picture(&mut buf, VA_PICTURE_SIZE * 2, 32, 20, RPS_ST_CURR_AFTER);
        put_picture(&mut buf, VA_PICTURE_SIZE * 3, 99, 0, RPS_LT_CURR);

        let mut pic = PictureAccumulator::new();
        HevcModule
            .handle(BufferType::PictureParameter, &one(&buf), &mut pic, &targets)
            .unwrap();

        assert_eq!(pic.params.pic_width_in_mbs, 120);
        assert_eq!(pic.params.frame_height_in_mbs, 68);
        assert!(!pic.params.intra_pic_flag);

        let h = hevc(&pic);
        assert_eq!(h.pic_width_in_luma_samples, 1920);
        assert_eq!(h.amp_enabled_flag, 1);
        assert_eq!(h.sign_data_hiding_enabled_flag, 1);
        assert_eq!(h.bit_depth_luma_minus8, 2);
        assert_eq!(h.init_qp_minus26, -4);
        assert_eq!(h.column_width_minus1[0], 9);
        assert_eq!(h.sps_temporal_mvp_enabled_flag, 1);
        assert_eq!(h.sample_adaptive_offset_enabled_flag, 1);
        assert_eq!(h.log2_max_pic_order_cnt_lsb_minus4, 4);
        assert_eq!(h.num_bits_for_short_term_rps_in_slice, 11);
        assert_eq!(h.curr_pic_order_cnt_val, 16);

        assert_eq!(h.ref_pic_idx[0], 1);
        assert_eq!(h.ref_pic_idx[1], 2);
        // surface 99 is not a render target
        assert_eq!(h.ref_pic_idx[2], -1);
        assert_eq!(h.pic_order_cnt_val[1], 20);
        assert_eq!(h.num_poc_st_curr_before, 1);
        assert_eq!(h.num_poc_st_curr_after, 1);
        assert_eq!(h.num_poc_lt_curr, 0);
        assert_eq!(h.num_poc_total_curr, 2);
        assert_eq!(h.ref_pic_set_st_curr_before[0], 0);
        assert_eq!(h.ref_pic_set_st_curr_after[0], 1);
    }

    #[test]
    fn test_flat_scaling_without_scaling_lists() {
        let targets: Vec<SurfaceId> = vec![30];
        let mut pic = PictureAccumulator::new();
        HevcModule
            .handle(BufferType::PictureParameter, &one(&pic_params()), &mut pic, &targets)
            .unwrap();
        let h = hevc(&pic);
        assert_eq!(h.scaling_list_4x4[0], [16; 16]);
        assert_eq!(h.scaling_list_dc_32x32, [16; 2]);
    }

    #[test]
    fn test_iq_matrix() {
        let targets: Vec<SurfaceId> = Vec::new();
        let mut pic = PictureAccumulator::new();
        let mut data = vec![1u8; IQ_MATRIX_MIN];
        data[992..998].fill(7);
        HevcModule
            .handle(BufferType::IqMatrix, &one(&data), &mut pic, &targets)
            .unwrap();
        let h = hevc(&pic);
        assert_eq!(h.scaling_list_32x32[1], [1; 64]);
        assert_eq!(h.scaling_list_dc_16x16, [7; 6]);
    }

    #[test]
    fn test_profiles() {
        assert_eq!(HevcModule.codec_for(Profile::HevcMain10), Some(VideoCodec::Hevc));
        assert_eq!(HevcModule.codec_for(Profile::H264Main), None);
    }
}
