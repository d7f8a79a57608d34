//! In-memory stand-ins for the hardware seams, for tests.

use std::collections::VecDeque;
use std::fs::File;
use std::os::fd::OwnedFd;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::codecs::{ClientBuffer, CodecModule, Handled, PictureAccumulator, PictureIndexLookup};
use crate::config::DriverConfig;
use crate::device::{
    ArrayHandle, ConsumerImage, DecodeDevice, DecodeSubmission, DecoderCaps, DevicePtr,
    DmabufLayout, DmabufPlanes, FrameFields, FrameLayout, FrameStream, MappedFrame, PlaneArrays,
    SessionHandle, SessionParams, StreamEvent, StreamFrame,
};
use crate::driver::Driver;
use crate::error::{CodecError, DeviceError};
use crate::types::{
    BufferType, ChromaFormat, ContextId, Entrypoint, PixelFormat, Profile, SurfaceId, VideoCodec,
    DRM_FORMAT_NV12, FOURCC_P010, FOURCC_P012, INVALID_ID, RT_FORMAT_YUV420,
};

/// A recorded decode submission.
#[derive(Debug, Clone)]
pub struct Submission {
    pub curr_pic_idx: i32,
    pub num_slices: u32,
    pub bitstream_len: usize,
    pub slice_offsets: Vec<u32>,
}

#[derive(Debug)]
pub struct MockDeviceState {
    pub caps: DecoderCaps,
    pub unsupported: Vec<VideoCodec>,
    pub fail_create_session: bool,
    pub fail_destroy_session: bool,
    pub fail_decode: bool,
    pub fail_map: bool,
    pub fail_caps: bool,
    pub sessions_created: u32,
    pub open_sessions: Vec<SessionHandle>,
    pub last_session_params: Option<SessionParams>,
    pub submissions: Vec<Submission>,
    pub mapped: u32,
    pub unmapped: u32,
    pub scratch_allocs: u32,
    pub scratch_frees: u32,
    pub last_scratch_size: usize,
    /// Byte written by `copy_to_host` for rows read from a mapped frame's base.
    pub fill: u8,
    /// Byte written for rows read from anywhere else, i.e. the chroma plane.
    pub chroma_fill: u8,
    pub last_mapped: Option<DevicePtr>,
    /// (src, src_pitch, dst_pitch, width_bytes, rows) per copy.
    pub copies: Vec<(DevicePtr, u32, u32, u32, u32)>,
}

impl Default for MockDeviceState {
    fn default() -> Self {
        MockDeviceState {
            caps: DecoderCaps {
                supported: true,
                min_width: 48,
                min_height: 16,
                max_width: 4096,
                max_height: 4096,
                output_format_mask: 0b11,
            },
            unsupported: Vec::new(),
            fail_create_session: false,
            fail_destroy_session: false,
            fail_decode: false,
            fail_map: false,
            fail_caps: false,
            sessions_created: 0,
            open_sessions: Vec::new(),
            last_session_params: None,
            submissions: Vec::new(),
            mapped: 0,
            unmapped: 0,
            scratch_allocs: 0,
            scratch_frees: 0,
            last_scratch_size: 0,
            fill: 0x5a,
            chroma_fill: 0x5a,
            last_mapped: None,
            copies: Vec::new(),
        }
    }
}

/// Decode device whose state is shared with the test that built it.
#[derive(Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<MockDeviceState>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MockDeviceState> {
        self.state.lock().unwrap()
    }
}

impl DecodeDevice for MockDevice {
    fn name(&self) -> String {
        "mock decoder".to_string()
    }

    fn decoder_caps(
        &mut self,
        codec: VideoCodec,
        _chroma: ChromaFormat,
        _bit_depth: u8,
    ) -> Result<DecoderCaps, DeviceError> {
        let state = self.state();
        if state.fail_caps {
            return Err(DeviceError::new("decoder_caps", 101));
        }
        let mut caps = state.caps;
        if state.unsupported.contains(&codec) {
            caps.supported = false;
        }
        Ok(caps)
    }

    fn create_session(&mut self, params: &SessionParams) -> Result<SessionHandle, DeviceError> {
        let mut state = self.state();
        if state.fail_create_session {
            return Err(DeviceError::new("create_session", 2));
        }
        state.sessions_created += 1;
        let session = SessionHandle(u64::from(state.sessions_created));
        state.open_sessions.push(session);
        state.last_session_params = Some(*params);
        Ok(session)
    }

    fn destroy_session(&mut self, session: SessionHandle) -> Result<(), DeviceError> {
        let mut state = self.state();
        state.open_sessions.retain(|&s| s != session);
        if state.fail_destroy_session {
            return Err(DeviceError::new("destroy_session", 1));
        }
        Ok(())
    }

    fn decode_picture(
        &mut self,
        session: SessionHandle,
        submission: &DecodeSubmission<'_>,
    ) -> Result<(), DeviceError> {
        let mut state = self.state();
        assert!(state.open_sessions.contains(&session), "decode on closed session");
        if state.fail_decode {
            return Err(DeviceError::new("decode_picture", 1));
        }
        state.submissions.push(Submission {
            curr_pic_idx: submission.params.curr_pic_idx,
            num_slices: submission.params.num_slices,
            bitstream_len: submission.bitstream.len(),
            slice_offsets: submission.slice_offsets.to_vec(),
        });
        Ok(())
    }

    fn map_frame(
        &mut self,
        _session: SessionHandle,
        picture_index: i32,
        _fields: FrameFields,
    ) -> Result<MappedFrame, DeviceError> {
        let mut state = self.state();
        if state.fail_map {
            return Err(DeviceError::new("map_frame", 700));
        }
        state.mapped += 1;
        let ptr = 0x1000_0000 + picture_index as u64 * 0x100_0000;
        state.last_mapped = Some(ptr);
        Ok(MappedFrame { ptr, pitch: 512 })
    }

    fn unmap_frame(&mut self, _: SessionHandle, _: MappedFrame) -> Result<(), DeviceError> {
        self.state().unmapped += 1;
        Ok(())
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
        let fill = {
            let mut state = self.state();
            state.copies.push((src, src_pitch, dst_pitch, width_bytes, rows));
            if state.last_mapped == Some(src) {
                state.fill
            } else {
                state.chroma_fill
            }
        };
        for row in 0..rows as usize {
            let start = row * dst_pitch as usize;
            let Some(line) = dst.get_mut(start..start + width_bytes as usize) else {
                return Err(DeviceError::new("copy_to_host", 1));
            };
            line.fill(fill);
        }
        Ok(())
    }

    fn alloc_scratch(&mut self, size: usize) -> Result<DevicePtr, DeviceError> {
        let mut state = self.state();
        state.scratch_allocs += 1;
        state.last_scratch_size = size;
        Ok(0x9000_0000)
    }

    fn free_scratch(&mut self, _ptr: DevicePtr) -> Result<(), DeviceError> {
        self.state().scratch_frees += 1;
        Ok(())
    }
}

#[derive(Debug)]
pub struct MockStreamState {
    /// Presented frames the consumer still holds, oldest first.
    pub held: VecDeque<StreamFrame>,
    /// Consumer returns every held frame on each poll.
    pub consumer_returns: bool,
    /// Consumer returns a single frame on the next poll.
    pub release_one: bool,
    pub fail_present: bool,
    pub events: VecDeque<StreamEvent>,
    pub arrays_created: u32,
    pub arrays_destroyed: u32,
    pub presented: u32,
    pub images_created: u32,
    pub images_destroyed: u32,
    /// `return_frame` calls made while the consumer held nothing.
    pub idle_returns: u32,
    /// Overrides the fourcc the consumer reports for exported images.
    pub consumer_fourcc: Option<u32>,
    pub event_timeouts: Vec<Duration>,
    next_handle: u64,
}

impl Default for MockStreamState {
    fn default() -> Self {
        MockStreamState {
            held: VecDeque::new(),
            consumer_returns: true,
            release_one: false,
            fail_present: false,
            events: VecDeque::new(),
            arrays_created: 0,
            arrays_destroyed: 0,
            presented: 0,
            images_created: 0,
            images_destroyed: 0,
            idle_returns: 0,
            consumer_fourcc: None,
            event_timeouts: Vec::new(),
            next_handle: 1,
        }
    }
}

/// Frame stream with a consumer that exports `/dev/null` descriptors.
#[derive(Clone, Default)]
pub struct MockStream {
    state: Arc<Mutex<MockStreamState>>,
}

impl MockStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MockStreamState> {
        self.state.lock().unwrap()
    }
}

fn null_fd() -> Result<OwnedFd, DeviceError> {
    File::open("/dev/null")
        .map(OwnedFd::from)
        .map_err(|e| DeviceError::new("open", e.raw_os_error().unwrap_or(-1)))
}

impl FrameStream for MockStream {
    fn return_frame(&mut self) -> Result<Option<StreamFrame>, DeviceError> {
        let mut state = self.state();
        if state.held.is_empty() {
            state.idle_returns += 1;
        }
        if state.consumer_returns {
            return Ok(state.held.pop_front());
        }
        if state.release_one {
            state.release_one = false;
            return Ok(state.held.pop_front());
        }
        Ok(None)
    }

    fn create_arrays(&mut self, _layout: &FrameLayout) -> Result<PlaneArrays, DeviceError> {
        let mut state = self.state();
        state.arrays_created += 1;
        let base = state.next_handle;
        state.next_handle += 2;
        Ok(PlaneArrays {
            luma: ArrayHandle(base),
            chroma: ArrayHandle(base + 1),
        })
    }

    fn destroy_arrays(&mut self, _arrays: PlaneArrays) -> Result<(), DeviceError> {
        self.state().arrays_destroyed += 1;
        Ok(())
    }

    fn copy_planes(&mut self, _: DevicePtr, _: u32, _: &StreamFrame) -> Result<(), DeviceError> {
        Ok(())
    }

    fn present(&mut self, frame: &StreamFrame) -> Result<(), DeviceError> {
        let mut state = self.state();
        if state.fail_present {
            return Err(DeviceError::new("present", 1));
        }
        state.presented += 1;
        state.held.push_back(*frame);
        if state.images_created == 0 {
            state.events.push_back(StreamEvent::ImageAdded);
        }
        state.events.push_back(StreamEvent::ImageAvailable);
        Ok(())
    }

    fn next_event(&mut self, timeout: Duration) -> Result<Option<StreamEvent>, DeviceError> {
        let mut state = self.state();
        state.event_timeouts.push(timeout);
        Ok(state.events.pop_front())
    }

    fn create_image(&mut self) -> Result<ConsumerImage, DeviceError> {
        let mut state = self.state();
        state.images_created += 1;
        Ok(ConsumerImage(u64::from(state.images_created)))
    }

    fn acquire_image(&mut self) -> Result<ConsumerImage, DeviceError> {
        Ok(ConsumerImage(1))
    }

    fn query_dmabuf(&mut self, _image: ConsumerImage) -> Result<DmabufLayout, DeviceError> {
        let state = self.state();
        let held = state.held.back().map(|f| (f.layout.format, f.layout.bit_depth));
        let fourcc = state.consumer_fourcc.unwrap_or(match held {
            Some((PixelFormat::P016, 12)) => FOURCC_P012,
            Some((PixelFormat::P016, _)) => FOURCC_P010,
            _ => DRM_FORMAT_NV12,
        });
        Ok(DmabufLayout {
            fourcc,
            planes: 2,
            modifiers: [0; 4],
        })
    }

    fn export_dmabuf(
        &mut self,
        _image: ConsumerImage,
        planes: u32,
    ) -> Result<DmabufPlanes, DeviceError> {
        let held = self.state().held.back().copied();
        let (width, height, bps) = held
            .map(|f| (f.layout.width, f.layout.height, f.layout.bytes_per_sample()))
            .unwrap_or((0, 0, 1));
        let fds = (0..planes).map(|_| null_fd()).collect::<Result<Vec<_>, _>>()?;
        Ok(DmabufPlanes {
            fds,
            strides: vec![width * bps; planes as usize],
            offsets: vec![0, width * height * bps],
        })
    }

    fn release_image(&mut self, _image: ConsumerImage) -> Result<(), DeviceError> {
        Ok(())
    }

    fn destroy_image(&mut self, _image: ConsumerImage) -> Result<(), DeviceError> {
        self.state().images_destroyed += 1;
        Ok(())
    }
}

/// Driver over a fresh mock device and stream, with handles for inspection.
pub fn driver_with_mocks() -> (Driver, MockDevice, MockStream) {
    let device = MockDevice::new();
    let stream = MockStream::new();
    let driver = Driver::new(
        Box::new(device.clone()),
        Some(Box::new(stream.clone())),
        DriverConfig::default(),
    );
    (driver, device, stream)
}

/// VAPictureParameterBufferMPEG2 for a picture with no backward reference.
pub fn mpeg2_picture_parameters(
    width: u16,
    height: u16,
    coding_type: i32,
    forward: SurfaceId,
    structure: u32,
) -> Vec<u8> {
    let mut buf = vec![0u8; 40];
    buf[0..2].copy_from_slice(&width.to_le_bytes());
    buf[2..4].copy_from_slice(&height.to_le_bytes());
    buf[4..8].copy_from_slice(&forward.to_le_bytes());
    buf[8..12].copy_from_slice(&INVALID_ID.to_le_bytes());
    buf[12..16].copy_from_slice(&coding_type.to_le_bytes());
    buf[16..20].copy_from_slice(&0xffffu32.to_le_bytes());
    // picture_structure, is_first_field
    let ext = (structure << 2) | (1 << 12);
    buf[20..24].copy_from_slice(&ext.to_le_bytes());
    buf
}

/// Decode one intra MPEG-2 frame into a fresh single-surface context.
pub fn decode_one_mpeg2(driver: &mut Driver, width: u32, height: u32) -> (ContextId, SurfaceId) {
    let config = driver.create_config(Profile::Mpeg2Main, Entrypoint::Vld, &[]).unwrap();
    let surface = driver.create_surfaces(RT_FORMAT_YUV420, width, height, 1).unwrap()[0];
    let ctx = driver.create_context(config, width, height, &[surface]).unwrap();

    let pic = mpeg2_picture_parameters(width as u16, height as u16, 1, INVALID_ID, 3);
    let slice = [0u8, 0, 1, 1, 0x22, 0x33];
    let buffers = [
        driver
            .create_buffer(ctx, BufferType::PictureParameter, pic.len(), 1, Some(&pic))
            .unwrap(),
        driver
            .create_buffer(ctx, BufferType::SliceData, slice.len(), 1, Some(&slice))
            .unwrap(),
    ];
    driver.begin_picture(ctx, surface).unwrap();
    driver.render_picture(ctx, &buffers).unwrap();
    driver.end_picture(ctx).unwrap();
    (ctx, surface)
}

/// Codec module claiming a 4:4:4 profile, for the chroma checks.
pub struct Claim444;

impl CodecModule for Claim444 {
    fn name(&self) -> &'static str {
        "hevc444"
    }

    fn profiles(&self) -> &'static [Profile] {
        &[Profile::HevcMain444]
    }

    fn codec_for(&self, _profile: Profile) -> Option<VideoCodec> {
        Some(VideoCodec::Hevc)
    }

    fn handle(
        &self,
        _kind: BufferType,
        _buffer: &ClientBuffer<'_>,
        _picture: &mut PictureAccumulator,
        _refs: &dyn PictureIndexLookup,
    ) -> Result<Handled, CodecError> {
        Ok(Handled::Ignored)
    }
}
