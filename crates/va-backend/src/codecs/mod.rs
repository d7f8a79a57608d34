//! Per-codec translation of client parameter buffers into decode-engine
//! picture parameters.

mod h264;
mod hevc;
mod mpeg2;

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use crate::append::AppendBuffer;
use crate::error::CodecError;
use crate::params::PictureParams;
use crate::types::{BufferType, Profile, SurfaceId, VideoCodec, INVALID_ID};

pub use h264::H264Module;
pub use hevc::HevcModule;
pub use mpeg2::Mpeg2Module;

/// Annex-B start code prepended to each H.264/HEVC slice.
pub const START_CODE: &[u8] = &[0x00, 0x00, 0x01];

/// Client buffer contents as seen by a codec handler.
#[derive(Debug, Clone, Copy)]
pub struct ClientBuffer<'a> {
    pub data: &'a [u8],
    pub element_size: usize,
    pub elements: usize,
}

impl<'a> ClientBuffer<'a> {
    /// Bytes of element `index`.
    pub fn element(&self, index: usize) -> Option<&'a [u8]> {
        let start = index.checked_mul(self.element_size)?;
        self.data.get(start..start.checked_add(self.element_size)?)
    }
}

/// What a handler did with a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Consumed,
    /// The module has no use for this buffer type.
    Ignored,
}

/// Resolves client surface ids to the picture indices the decode session uses.
pub trait PictureIndexLookup {
    fn picture_index(&self, surface: SurfaceId) -> Option<i32>;

    /// Picture index, or -1 for "no picture".
    fn picture_index_or_none(&self, surface: SurfaceId) -> i32 {
        if surface == INVALID_ID {
            return -1;
        }
        self.picture_index(surface).unwrap_or(-1)
    }
}

impl PictureIndexLookup for Vec<SurfaceId> {
    fn picture_index(&self, surface: SurfaceId) -> Option<i32> {
        self.iter().position(|&s| s == surface).map(|i| i as i32)
    }
}

/// A pluggable codec translation layer.
pub trait CodecModule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Profiles this module claims.
    fn profiles(&self) -> &'static [Profile];

    /// Decode-engine codec for a claimed profile.
    fn codec_for(&self, profile: Profile) -> Option<VideoCodec>;

    /// Fold one client buffer into the picture being accumulated.
    fn handle(
        &self,
        kind: BufferType,
        buffer: &ClientBuffer<'_>,
        picture: &mut PictureAccumulator,
        refs: &dyn PictureIndexLookup,
    ) -> Result<Handled, CodecError>;
}

/// Ordered chain of codec modules. The first module claiming a profile wins.
#[derive(Clone, Default)]
pub struct CodecRegistry {
    modules: Vec<Arc<dyn CodecModule>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        CodecRegistry { modules: Vec::new() }
    }

    /// MPEG-2, H.264 and HEVC, in that order.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(Mpeg2Module));
        registry.register(Arc::new(H264Module));
        registry.register(Arc::new(HevcModule));
        registry
    }

    pub fn register(&mut self, module: Arc<dyn CodecModule>) {
        self.modules.push(module);
    }

    /// Owning module and its engine codec for `profile`.
    pub fn find(&self, profile: Profile) -> Option<(Arc<dyn CodecModule>, VideoCodec)> {
        self.modules.iter().find_map(|m| {
            if !m.profiles().contains(&profile) {
                return None;
            }
            m.codec_for(profile).map(|codec| (Arc::clone(m), codec))
        })
    }

    pub fn claims(&self, profile: Profile) -> bool {
        self.find(profile).is_some()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Slice location inside the next slice-data buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceEntry {
    pub offset: u32,
    pub size: u32,
}

/// Per-picture accumulation state owned by a context.
#[derive(Debug, Default)]
pub struct PictureAccumulator {
    pub params: PictureParams,
    pub bitstream: AppendBuffer<u8>,
    pub slice_offsets: AppendBuffer<u32>,
    pending: Vec<SliceEntry>,
}

impl PictureAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh picture targeting `curr_pic_idx`.
    pub fn begin(&mut self, curr_pic_idx: i32) {
        self.params = PictureParams {
            curr_pic_idx,
            ..Default::default()
        };
        self.reset();
    }

    /// Empty both accumulators, keeping their allocations.
    pub fn reset(&mut self) {
        self.bitstream.clear();
        self.slice_offsets.clear();
        self.pending.clear();
    }

    /// Record slice locations for the next slice-data buffer.
    pub fn queue_slices(&mut self, entries: impl IntoIterator<Item = SliceEntry>) {
        self.pending.extend(entries);
    }

    pub fn pending_slices(&self) -> &[SliceEntry] {
        &self.pending
    }

    /// Append slice payloads from `data`, one offset-table entry per slice.
    ///
    /// With no queued slice parameters the whole buffer is one slice.
    pub fn append_slice_data(
        &mut self,
        data: &[u8],
        prefix: Option<&[u8]>,
    ) -> Result<(), CodecError> {
        if self.pending.is_empty() {
            self.push_slice(data, prefix);
            return Ok(());
        }

        for entry in std::mem::take(&mut self.pending) {
            let start = entry.offset as usize;
            let slice = start
                .checked_add(entry.size as usize)
                .and_then(|end| data.get(start..end))
                .ok_or(CodecError::SliceOutOfRange {
                    offset: entry.offset,
                    size: entry.size,
                    len: data.len(),
                })?;
            self.push_slice(slice, prefix);
        }
        Ok(())
    }

    fn push_slice(&mut self, slice: &[u8], prefix: Option<&[u8]>) {
        self.slice_offsets.push(self.bitstream.len() as u32);
        if let Some(prefix) = prefix {
            self.bitstream.append(prefix);
        }
        self.bitstream.append(slice);
    }
}

/// Little-endian field reader over a client struct.
pub(crate) struct Fields<'a> {
    data: &'a [u8],
}

impl<'a> Fields<'a> {
    /// Fails unless `data` holds at least `min_len` bytes.
    pub fn new(kind: &'static str, data: &'a [u8], min_len: usize) -> Result<Self, CodecError> {
        if data.len() < min_len {
            return Err(CodecError::Truncated {
                kind,
                needed: min_len,
                got: data.len(),
            });
        }
        Ok(Fields { data })
    }

    pub fn u8(&self, off: usize) -> u8 {
        self.data[off]
    }

    pub fn i8(&self, off: usize) -> i8 {
        self.data[off] as i8
    }

    pub fn u16(&self, off: usize) -> u16 {
        LittleEndian::read_u16(&self.data[off..])
    }

    pub fn u32(&self, off: usize) -> u32 {
        LittleEndian::read_u32(&self.data[off..])
    }

    pub fn i32(&self, off: usize) -> i32 {
        LittleEndian::read_i32(&self.data[off..])
    }

    pub fn bytes<const N: usize>(&self, off: usize) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[off..off + N]);
        out
    }
}

/// Extract `width` bits starting at `shift` from a packed bitfield word.
pub(crate) fn bits(value: u32, shift: u32, width: u32) -> u32 {
    (value >> shift) & ((1 << width) - 1)
}

/// Queue every element of a slice-parameter buffer. Each element starts with
/// `slice_data_size` and `slice_data_offset`.
pub(crate) fn queue_slice_params(
    kind: &'static str,
    buffer: &ClientBuffer<'_>,
    picture: &mut PictureAccumulator,
) -> Result<usize, CodecError> {
    let mut queued = 0;
    for i in 0..buffer.elements {
        let element = buffer.element(i).unwrap_or(&[]);
        let f = Fields::new(kind, element, 8)?;
        picture.queue_slices([SliceEntry {
            size: f.u32(0),
            offset: f.u32(4),
        }]);
        queued += 1;
    }
    Ok(queued)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Claims(&'static [Profile], &'static str);

    impl CodecModule for Claims {
        fn name(&self) -> &'static str {
            self.1
        }
        fn profiles(&self) -> &'static [Profile] {
            self.0
        }
        fn codec_for(&self, _: Profile) -> Option<VideoCodec> {
            Some(VideoCodec::H264)
        }
        fn handle(
            &self,
            _: BufferType,
            _: &ClientBuffer<'_>,
            _: &mut PictureAccumulator,
            _: &dyn PictureIndexLookup,
        ) -> Result<Handled, CodecError> {
            Ok(Handled::Ignored)
        }
    }

    #[test]
    fn test_builtin_order() {
        let registry = CodecRegistry::builtin();
        assert_eq!(registry.len(), 3);
        let (m, codec) = registry.find(Profile::Mpeg2Main).unwrap();
        assert_eq!((m.name(), codec), ("mpeg2", VideoCodec::Mpeg2));
        let (m, codec) = registry.find(Profile::H264High).unwrap();
        assert_eq!((m.name(), codec), ("h264", VideoCodec::H264));
        let (m, codec) = registry.find(Profile::HevcMain10).unwrap();
        assert_eq!((m.name(), codec), ("hevc", VideoCodec::Hevc));
        assert!(registry.find(Profile::Vp9Profile0).is_none());
    }

    #[test]
    fn test_first_match_wins() {
        let mut registry = CodecRegistry::new();
        registry.register(Arc::new(Claims(&[Profile::H264Main], "first")));
        registry.register(Arc::new(Claims(&[Profile::H264Main], "second")));
        let (m, _) = registry.find(Profile::H264Main).unwrap();
        assert_eq!(m.name(), "first");
    }

    #[test]
    fn test_slice_data_without_params_is_one_slice() {
        let mut pic = PictureAccumulator::new();
        pic.append_slice_data(&[1, 2, 3], None).unwrap();
        pic.append_slice_data(&[4, 5], Some(START_CODE)).unwrap();
        assert_eq!(pic.slice_offsets.as_slice(), &[0, 3]);
        assert_eq!(pic.bitstream.as_slice(), &[1, 2, 3, 0, 0, 1, 4, 5]);
    }

    #[test]
    fn test_queued_slices_follow_order() {
        let mut pic = PictureAccumulator::new();
        pic.queue_slices([
            SliceEntry { offset: 4, size: 2 },
            SliceEntry { offset: 0, size: 3 },
        ]);
        pic.append_slice_data(&[10, 11, 12, 13, 14, 15], Some(START_CODE)).unwrap();
        assert_eq!(pic.slice_offsets.as_slice(), &[0, 5]);
        assert_eq!(pic.bitstream.as_slice(), &[0, 0, 1, 14, 15, 0, 0, 1, 10, 11, 12]);
        assert!(pic.pending_slices().is_empty());
    }

    #[test]
    fn test_slice_out_of_range() {
        let mut pic = PictureAccumulator::new();
        pic.queue_slices([SliceEntry { offset: 2, size: 10 }]);
        let err = pic.append_slice_data(&[0; 4], None).unwrap_err();
        assert!(matches!(err, CodecError::SliceOutOfRange { len: 4, .. }));
    }

    #[test]
    fn test_begin_resets_and_keeps_capacity() {
        let mut pic = PictureAccumulator::new();
        pic.append_slice_data(&[0u8; 1000], None).unwrap();
        pic.params.num_slices = 9;
        let cap = pic.bitstream.capacity();
        pic.begin(3);
        assert_eq!(pic.params.curr_pic_idx, 3);
        assert_eq!(pic.params.num_slices, 0);
        assert!(pic.bitstream.is_empty());
        assert!(pic.slice_offsets.is_empty());
        assert_eq!(pic.bitstream.capacity(), cap);
    }

    #[test]
    fn test_picture_index_lookup() {
        let targets: Vec<SurfaceId> = vec![5, 9, 12];
        assert_eq!(targets.picture_index(9), Some(1));
        assert_eq!(targets.picture_index(4), None);
        assert_eq!(targets.picture_index_or_none(INVALID_ID), -1);
        assert_eq!(targets.picture_index_or_none(13), -1);
    }

    #[test]
    fn test_bits() {
        assert_eq!(bits(0b1011_0000, 4, 4), 0b1011);
        assert_eq!(bits(0xFFFF_FFFF, 0, 1), 1);
    }
}
