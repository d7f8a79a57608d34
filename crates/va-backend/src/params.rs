//! In-progress picture parameters.
//!
//! `PictureParams` carries the header fields every codec fills. The
//! codec-specific blocks are `#[repr(C)]` and laid out exactly like the decode
//! engine's per-codec parameter structs, so the device layer can copy them
//! byte for byte into its submission.

/// Header fields shared by every codec.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PictureParams {
    pub pic_width_in_mbs: i32,
    pub frame_height_in_mbs: i32,
    /// Picture index of the decode target.
    pub curr_pic_idx: i32,
    pub field_pic_flag: bool,
    pub bottom_field_flag: bool,
    pub second_field: bool,
    pub ref_pic_flag: bool,
    pub intra_pic_flag: bool,
    pub num_slices: u32,
    pub codec: CodecParams,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum CodecParams {
    #[default]
    None,
    Mpeg2(Box<Mpeg2PicParams>),
    H264(Box<H264PicParams>),
    Hevc(Box<HevcPicParams>),
}

impl CodecParams {
    /// Raw bytes of the codec block, empty when no block has been filled.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            CodecParams::None => &[],
            CodecParams::Mpeg2(p) => pod_bytes(p.as_ref()),
            CodecParams::H264(p) => pod_bytes(p.as_ref()),
            CodecParams::Hevc(p) => pod_bytes(p.as_ref()),
        }
    }

    pub fn mpeg2_mut(&mut self) -> &mut Mpeg2PicParams {
        if !matches!(self, CodecParams::Mpeg2(_)) {
            *self = CodecParams::Mpeg2(Box::default());
        }
        match self {
            CodecParams::Mpeg2(p) => p,
            _ => unreachable!(),
        }
    }

    pub fn h264_mut(&mut self) -> &mut H264PicParams {
        if !matches!(self, CodecParams::H264(_)) {
            *self = CodecParams::H264(Box::default());
        }
        match self {
            CodecParams::H264(p) => p,
            _ => unreachable!(),
        }
    }

    pub fn hevc_mut(&mut self) -> &mut HevcPicParams {
        if !matches!(self, CodecParams::Hevc(_)) {
            *self = CodecParams::Hevc(Box::default());
        }
        match self {
            CodecParams::Hevc(p) => p,
            _ => unreachable!(),
        }
    }
}

impl PictureParams {
    /// Field layout to use when this picture is mapped back out.
    pub fn frame_fields(&self) -> crate::device::FrameFields {
        crate::device::FrameFields {
            progressive: !self.field_pic_flag,
            top_field_first: !self.bottom_field_flag,
            second_field: self.second_field,
        }
    }
}

fn pod_bytes<T: Pod>(value: &T) -> &[u8] {
    // SAFETY: T is a repr(C) struct of integers with no padding-sensitive
    // invariants; reading its bytes is always valid.
    unsafe { std::slice::from_raw_parts(value as *const T as *const u8, std::mem::size_of::<T>()) }
}

/// Marker for the plain-old-data codec blocks below.
///
/// # Safety
/// Implementors must be `repr(C)` and valid for every bit pattern.
unsafe trait Pod: Sized {}

unsafe impl Pod for Mpeg2PicParams {}
unsafe impl Pod for H264PicParams {}
unsafe impl Pod for HevcPicParams {}

macro_rules! zeroed_default {
    ($($ty:ty),*) => {
        $(
            impl Default for $ty {
                fn default() -> Self {
                    // SAFETY: All-zeros is valid for this POD struct.
                    unsafe { std::mem::zeroed() }
                }
            }

            impl PartialEq for $ty {
                fn eq(&self, other: &Self) -> bool {
                    pod_bytes(self) == pod_bytes(other)
                }
            }
        )*
    };
}

zeroed_default!(Mpeg2PicParams, H264PicParams, HevcPicParams);

// ── MPEG-2 ──

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Mpeg2PicParams {
    pub forward_ref_idx: i32,
    pub backward_ref_idx: i32,
    pub picture_coding_type: i32,
    pub full_pel_forward_vector: i32,
    pub full_pel_backward_vector: i32,
    pub f_code: [[i32; 2]; 2],
    pub intra_dc_precision: i32,
    pub frame_pred_frame_dct: i32,
    pub concealment_motion_vectors: i32,
    pub q_scale_type: i32,
    pub intra_vlc_format: i32,
    pub alternate_scan: i32,
    pub top_field_first: i32,
    pub quant_matrix_intra: [u8; 64],
    pub quant_matrix_inter: [u8; 64],
}

// ── H.264 ──

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct H264DpbEntry {
    pub pic_idx: i32,
    pub frame_idx: i32,
    pub is_long_term: i32,
    pub not_existing: i32,
    /// Bit 0: top field referenced. Bit 1: bottom field referenced.
    pub used_for_reference: i32,
    pub field_order_cnt: [i32; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct H264PicParams {
    // SPS
    pub log2_max_frame_num_minus4: i32,
    pub pic_order_cnt_type: i32,
    pub log2_max_pic_order_cnt_lsb_minus4: i32,
    pub delta_pic_order_always_zero_flag: i32,
    pub frame_mbs_only_flag: i32,
    pub direct_8x8_inference_flag: i32,
    pub num_ref_frames: i32,
    pub residual_colour_transform_flag: u8,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub qpprime_y_zero_transform_bypass_flag: u8,
    // PPS
    pub entropy_coding_mode_flag: i32,
    pub pic_order_present_flag: i32,
    pub num_ref_idx_l0_active_minus1: i32,
    pub num_ref_idx_l1_active_minus1: i32,
    pub weighted_pred_flag: i32,
    pub weighted_bipred_idc: i32,
    pub pic_init_qp_minus26: i32,
    pub deblocking_filter_control_present_flag: i32,
    pub redundant_pic_cnt_present_flag: i32,
    pub transform_8x8_mode_flag: i32,
    pub mbaff_frame_flag: i32,
    pub constrained_intra_pred_flag: i32,
    pub chroma_qp_index_offset: i32,
    pub second_chroma_qp_index_offset: i32,
    pub ref_pic_flag: i32,
    pub frame_num: i32,
    pub curr_field_order_cnt: [i32; 2],
    pub dpb: [H264DpbEntry; 16],
    pub weight_scale_4x4: [[u8; 16]; 6],
    pub weight_scale_8x8: [[u8; 64]; 2],
    // FMO/ASO
    pub fmo_aso_enable: u8,
    pub num_slice_groups_minus1: u8,
    pub slice_group_map_type: u8,
    pub pic_init_qs_minus26: i8,
    pub slice_group_change_rate_minus1: u32,
    pub slice_group_map_addr: u64,
    pub reserved: [u32; 12],
    /// MVC/SVC extension block, unused for plain H.264.
    pub ext: [u32; 64],
}

// ── HEVC ──

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct HevcPicParams {
    // SPS
    pub pic_width_in_luma_samples: i32,
    pub pic_height_in_luma_samples: i32,
    pub log2_min_luma_coding_block_size_minus3: u8,
    pub log2_diff_max_min_luma_coding_block_size: u8,
    pub log2_min_transform_block_size_minus2: u8,
    pub log2_diff_max_min_transform_block_size: u8,
    pub pcm_enabled_flag: u8,
    pub log2_min_pcm_luma_coding_block_size_minus3: u8,
    pub log2_diff_max_min_pcm_luma_coding_block_size: u8,
    pub pcm_sample_bit_depth_luma_minus1: u8,

    pub pcm_sample_bit_depth_chroma_minus1: u8,
    pub pcm_loop_filter_disabled_flag: u8,
    pub strong_intra_smoothing_enabled_flag: u8,
    pub max_transform_hierarchy_depth_intra: u8,
    pub max_transform_hierarchy_depth_inter: u8,
    pub amp_enabled_flag: u8,
    pub separate_colour_plane_flag: u8,
    pub log2_max_pic_order_cnt_lsb_minus4: u8,

    pub num_short_term_ref_pic_sets: u8,
    pub long_term_ref_pics_present_flag: u8,
    pub num_long_term_ref_pics_sps: u8,
    pub sps_temporal_mvp_enabled_flag: u8,
    pub sample_adaptive_offset_enabled_flag: u8,
    pub scaling_list_enable_flag: u8,
    pub irap_pic_flag: u8,
    pub idr_pic_flag: u8,

    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub log2_max_transform_skip_block_size_minus2: u8,
    pub log2_sao_offset_scale_luma: u8,
    pub log2_sao_offset_scale_chroma: u8,
    pub high_precision_offsets_enabled_flag: u8,
    pub reserved1: [u8; 10],

    // PPS
    pub dependent_slice_segments_enabled_flag: u8,
    pub slice_segment_header_extension_present_flag: u8,
    pub sign_data_hiding_enabled_flag: u8,
    pub cu_qp_delta_enabled_flag: u8,
    pub diff_cu_qp_delta_depth: u8,
    pub init_qp_minus26: i8,
    pub pps_cb_qp_offset: i8,
    pub pps_cr_qp_offset: i8,

    pub constrained_intra_pred_flag: u8,
    pub weighted_pred_flag: u8,
    pub weighted_bipred_flag: u8,
    pub transform_skip_enabled_flag: u8,
    pub transquant_bypass_enabled_flag: u8,
    pub entropy_coding_sync_enabled_flag: u8,
    pub log2_parallel_merge_level_minus2: u8,
    pub num_extra_slice_header_bits: u8,

    pub loop_filter_across_tiles_enabled_flag: u8,
    pub loop_filter_across_slices_enabled_flag: u8,
    pub output_flag_present_flag: u8,
    pub num_ref_idx_l0_default_active_minus1: u8,
    pub num_ref_idx_l1_default_active_minus1: u8,
    pub lists_modification_present_flag: u8,
    pub cabac_init_present_flag: u8,
    pub pps_slice_chroma_qp_offsets_present_flag: u8,

    pub deblocking_filter_override_enabled_flag: u8,
    pub pps_deblocking_filter_disabled_flag: u8,
    pub pps_beta_offset_div2: i8,
    pub pps_tc_offset_div2: i8,
    pub tiles_enabled_flag: u8,
    pub uniform_spacing_flag: u8,
    pub num_tile_columns_minus1: u8,
    pub num_tile_rows_minus1: u8,

    pub column_width_minus1: [u16; 21],
    pub row_height_minus1: [u16; 21],

    // Range extension
    pub range_extension: [u8; 14],
    pub cb_qp_offset_list: [i8; 6],
    pub cr_qp_offset_list: [i8; 6],
    pub reserved2: [u8; 2],
    pub reserved3: [u32; 8],

    // Reference picture sets
    pub num_bits_for_short_term_rps_in_slice: i32,
    pub num_delta_pocs_of_ref_rps_idx: i32,
    pub num_poc_total_curr: i32,
    pub num_poc_st_curr_before: i32,
    pub num_poc_st_curr_after: i32,
    pub num_poc_lt_curr: i32,
    pub curr_pic_order_cnt_val: i32,
    pub ref_pic_idx: [i32; 16],
    pub pic_order_cnt_val: [i32; 16],
    pub is_long_term: [u8; 16],
    pub ref_pic_set_st_curr_before: [u8; 8],
    pub ref_pic_set_st_curr_after: [u8; 8],
    pub ref_pic_set_lt_curr: [u8; 8],
    pub ref_pic_set_inter_layer0: [u8; 8],
    pub ref_pic_set_inter_layer1: [u8; 8],
    pub reserved4: [u32; 12],

    // Scaling lists, diagonal order
    pub scaling_list_4x4: [[u8; 16]; 6],
    pub scaling_list_8x8: [[u8; 64]; 6],
    pub scaling_list_16x16: [[u8; 64]; 6],
    pub scaling_list_32x32: [[u8; 64]; 2],
    pub scaling_list_dc_16x16: [u8; 6],
    pub scaling_list_dc_32x32: [u8; 2],
}

/// Size of the decode engine's codec-specific union.
pub const CODEC_BLOCK_SIZE: usize = 1024 * 4;

const _: () = assert!(std::mem::size_of::<Mpeg2PicParams>() <= CODEC_BLOCK_SIZE);
const _: () = assert!(std::mem::size_of::<H264PicParams>() <= CODEC_BLOCK_SIZE);
const _: () = assert!(std::mem::size_of::<HevcPicParams>() <= CODEC_BLOCK_SIZE);
