//! Driver entry table: one slot per protocol operation.

use tracing::info;

use crate::buffer::BufferInfo;
use crate::capabilities::{MAX_ENTRYPOINTS, MAX_IMAGE_FORMATS, MAX_PROFILES};
use crate::config::DriverConfig;
use crate::device::{DecodeDevice, FrameStream};
use crate::driver::Driver;
use crate::error::{Result, VaStatus, VA_STATUS_SUCCESS};
use crate::export::PrimeSurfaceDescriptor;
use crate::objects::Image;
use crate::types::{
    BufferId, BufferType, ConfigAttribute, ConfigId, ContextId, Entrypoint, ImageFormat, ImageId,
    Profile, SurfaceAttribute, SurfaceId, SurfaceStatus,
};

pub const VENDOR: &str = "VA-API -> NVDEC driver";

/// Maximum number of config attributes a client may pass.
pub const MAX_ATTRIBUTES: usize = 1;

pub struct DriverVTable {
    pub terminate: fn(&mut Driver) -> Result<()>,

    pub query_config_profiles: fn(&mut Driver) -> Result<Vec<Profile>>,
    pub query_config_entrypoints: fn(&mut Driver, Profile) -> Result<Vec<Entrypoint>>,
    pub get_config_attributes:
        fn(&mut Driver, Profile, Entrypoint, &mut [ConfigAttribute]) -> Result<()>,
    pub create_config: fn(&mut Driver, Profile, Entrypoint, &[ConfigAttribute]) -> Result<ConfigId>,
    pub destroy_config: fn(&mut Driver, ConfigId) -> Result<()>,
    pub query_config_attributes:
        fn(&Driver, ConfigId) -> Result<(Profile, Entrypoint, Vec<ConfigAttribute>)>,
    pub query_surface_attributes: fn(&mut Driver, ConfigId) -> Result<Vec<SurfaceAttribute>>,

    pub create_surfaces: fn(&mut Driver, u32, u32, u32, usize) -> Result<Vec<SurfaceId>>,
    pub destroy_surfaces: fn(&mut Driver, &[SurfaceId]) -> Result<()>,
    pub sync_surface: fn(&Driver, SurfaceId) -> Result<()>,
    pub query_surface_status: fn(&Driver, SurfaceId) -> Result<SurfaceStatus>,
    pub query_surface_error: fn(&mut Driver, SurfaceId) -> Result<()>,
    pub put_surface: fn(&mut Driver, SurfaceId) -> Result<()>,
    pub export_surface_handle: fn(&mut Driver, SurfaceId, u32, u32) -> Result<PrimeSurfaceDescriptor>,

    pub create_context: fn(&mut Driver, ConfigId, u32, u32, &[SurfaceId]) -> Result<ContextId>,
    pub destroy_context: fn(&mut Driver, ContextId) -> Result<()>,

    pub create_buffer:
        fn(&mut Driver, ContextId, BufferType, usize, usize, Option<&[u8]>) -> Result<BufferId>,
    pub buffer_set_num_elements: fn(&mut Driver, BufferId, usize) -> Result<()>,
    pub map_buffer: fn(&mut Driver, BufferId) -> Result<&mut [u8]>,
    pub unmap_buffer: fn(&mut Driver, BufferId) -> Result<()>,
    pub destroy_buffer: fn(&mut Driver, BufferId) -> Result<()>,
    pub buffer_info: fn(&Driver, BufferId) -> Result<BufferInfo>,

    pub begin_picture: fn(&mut Driver, ContextId, SurfaceId) -> Result<()>,
    pub render_picture: fn(&mut Driver, ContextId, &[BufferId]) -> Result<()>,
    pub end_picture: fn(&mut Driver, ContextId) -> Result<()>,

    pub query_image_formats: fn(&Driver) -> Vec<ImageFormat>,
    pub create_image: fn(&mut Driver, ImageFormat, u32, u32) -> Result<(ImageId, Image)>,
    pub derive_image: fn(&mut Driver, SurfaceId) -> Result<ImageId>,
    pub destroy_image: fn(&mut Driver, ImageId) -> Result<()>,
    pub get_image: fn(&mut Driver, SurfaceId, i32, i32, u32, u32, ImageId) -> Result<()>,
    pub put_image: fn(&mut Driver, SurfaceId, ImageId) -> Result<()>,
}

impl DriverVTable {
    pub fn new() -> Self {
        DriverVTable {
            terminate: Driver::terminate,

            query_config_profiles: Driver::query_config_profiles,
            query_config_entrypoints: Driver::query_config_entrypoints,
            get_config_attributes: Driver::get_config_attributes,
            create_config: Driver::create_config,
            destroy_config: Driver::destroy_config,
            query_config_attributes: Driver::query_config_attributes,
            query_surface_attributes: Driver::query_surface_attributes,

            create_surfaces: Driver::create_surfaces,
            destroy_surfaces: Driver::destroy_surfaces,
            sync_surface: Driver::sync_surface,
            query_surface_status: Driver::query_surface_status,
            query_surface_error: Driver::query_surface_error,
            put_surface: Driver::put_surface,
            export_surface_handle: Driver::export_surface_handle,

            create_context: Driver::create_context,
            destroy_context: Driver::destroy_context,

            create_buffer: Driver::create_buffer,
            buffer_set_num_elements: Driver::buffer_set_num_elements,
            map_buffer: Driver::map_buffer,
            unmap_buffer: Driver::unmap_buffer,
            destroy_buffer: Driver::destroy_buffer,
            buffer_info: Driver::buffer_info,

            begin_picture: Driver::begin_picture,
            render_picture: Driver::render_picture,
            end_picture: Driver::end_picture,

            query_image_formats: Driver::query_image_formats,
            create_image: Driver::create_image,
            derive_image: Driver::derive_image,
            destroy_image: Driver::destroy_image,
            get_image: Driver::get_image,
            put_image: Driver::put_image,
        }
    }
}

impl Default for DriverVTable {
    fn default() -> Self {
        Self::new()
    }
}

/// What the host runtime learns at initialisation.
pub struct DriverInfo {
    pub vendor: &'static str,
    pub version_major: u32,
    pub version_minor: u32,
    pub max_profiles: usize,
    pub max_entrypoints: usize,
    pub max_attributes: usize,
    pub max_image_formats: usize,
    pub vtable: DriverVTable,
}

/// Build the driver and its entry table.
pub fn driver_init(
    device: Box<dyn DecodeDevice>,
    stream: Option<Box<dyn FrameStream>>,
    config: DriverConfig,
) -> (Driver, DriverInfo) {
    let driver = Driver::new(device, stream, config);
    let info = DriverInfo {
        vendor: VENDOR,
        version_major: 1,
        version_minor: 0,
        max_profiles: MAX_PROFILES,
        max_entrypoints: MAX_ENTRYPOINTS,
        max_attributes: MAX_ATTRIBUTES,
        max_image_formats: MAX_IMAGE_FORMATS,
        vtable: DriverVTable::new(),
    };
    info!(vendor = VENDOR, "driver entry table ready");
    (driver, info)
}

/// Status code for the outcome of a vtable call.
pub fn status_of<T>(result: &Result<T>) -> VaStatus {
    match result {
        Ok(_) => VA_STATUS_SUCCESS,
        Err(e) => e.status(),
    }
}
