use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::codecs::{CodecModule, PictureAccumulator};
use crate::device::{SessionHandle, SessionParams};
use crate::driver::Driver;
use crate::error::{DriverError, Result};
use crate::objects::Object;
use crate::types::{ConfigId, ContextId, Profile, SurfaceId, VideoCodec};

/// Where a context is in the Begin → Render → End cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictureState {
    Idle,
    Accumulating { target: SurfaceId },
}

/// A decode session bound to a config and a fixed render-target set.
pub struct Context {
    pub config: ConfigId,
    pub profile: Profile,
    pub codec: VideoCodec,
    pub module: Arc<dyn CodecModule>,
    pub session: SessionHandle,
    pub width: u32,
    pub height: u32,
    /// Position in this list is the surface's picture index.
    pub render_targets: Vec<SurfaceId>,
    pub picture: PictureAccumulator,
    pub state: PictureState,
}

impl Context {
    pub fn is_idle(&self) -> bool {
        self.state == PictureState::Idle
    }
}

impl Driver {
    /// Open a decode session for `render_targets` and bind picture index `i`
    /// to `render_targets[i]`.
    pub fn create_context(
        &mut self,
        config: ConfigId,
        width: u32,
        height: u32,
        render_targets: &[SurfaceId],
    ) -> Result<ContextId> {
        debug!(config, width, height, targets = render_targets.len(), "create_context");

        let cfg = self.config_object(config)?.clone();
        let (module, codec) = self
            .codecs
            .find(cfg.profile)
            .ok_or(DriverError::UnsupportedProfile(cfg.profile.as_raw()))?;

        if render_targets.is_empty() {
            return Err(DriverError::InvalidParameter("render target list is empty"));
        }
        for &target in render_targets {
            self.surface(target)?;
        }

        let params = SessionParams {
            codec,
            chroma: cfg.chroma,
            format: cfg.format,
            bit_depth: cfg.bit_depth,
            width,
            height,
            num_surfaces: render_targets.len() as u32,
        };
        let session = self
            .device
            .create_session(&params)
            .map_err(|e| DriverError::AllocationFailed(e.to_string()))?;

        let registered = self.objects.allocate(Object::Context(Context {
            config,
            profile: cfg.profile,
            codec,
            module: Arc::clone(&module),
            session,
            width,
            height,
            render_targets: render_targets.to_vec(),
            picture: PictureAccumulator::new(),
            state: PictureState::Idle,
        }));
        let id = match registered {
            Ok(id) => id,
            Err(e) => {
                if let Err(destroy) = self.device.destroy_session(session) {
                    warn!(?session, error = %destroy, "failed to close unregistered session");
                }
                return Err(e);
            }
        };

        for (index, &target) in render_targets.iter().enumerate() {
            if let Some(surface) = self.objects.get_mut(target).and_then(Object::as_surface_mut) {
                surface.detach();
                surface.picture_index = index as i32;
                surface.context = Some(id);
            }
        }

        info!(
            context = id,
            codec = module.name(),
            ?session,
            width,
            height,
            surfaces = render_targets.len(),
            "decode session created"
        );
        Ok(id)
    }

    /// Tear down a context. The record and its accumulators are gone before
    /// the session is closed, so a close failure cannot resurrect it.
    pub fn destroy_context(&mut self, id: ContextId) -> Result<()> {
        debug!(context = id, "destroy_context");
        self.context(id)?;
        let context = match self.objects.release(id) {
            Some(Object::Context(context)) => context,
            _ => return Err(DriverError::InvalidContext(id)),
        };

        for &target in &context.render_targets {
            if let Some(surface) = self.objects.get_mut(target).and_then(Object::as_surface_mut) {
                if surface.context == Some(id) {
                    surface.detach();
                }
            }
        }

        let session = context.session;
        drop(context);

        self.device.destroy_session(session).map_err(|e| {
            warn!(context = id, ?session, error = %e, "failed to close decode session");
            DriverError::OperationFailed(e.to_string())
        })?;
        info!(context = id, ?session, "decode session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::DriverError;
    use crate::mock::{driver_with_mocks, MockDevice};
    use crate::types::{Entrypoint, Profile, INVALID_ID, RT_FORMAT_YUV420};

    #[test]
    fn test_picture_indices_are_dense() {
        let (mut driver, device, _) = driver_with_mocks();
        let config = driver.create_config(Profile::H264High, Entrypoint::Vld, &[]).unwrap();
        let surfaces = driver.create_surfaces(RT_FORMAT_YUV420, 64, 64, 5).unwrap();
        let ctx = driver.create_context(config, 64, 64, &surfaces).unwrap();

        let mut indices: Vec<i32> = surfaces
            .iter()
            .map(|&s| driver.surface(s).unwrap().picture_index)
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        indices.sort_unstable();
        indices.dedup();
        assert_eq!(indices.len(), 5);
        for &s in &surfaces {
            assert_eq!(driver.surface(s).unwrap().context, Some(ctx));
        }
        assert_eq!(device.state().last_session_params.unwrap().num_surfaces, 5);
    }

    #[test]
    fn test_session_failure_registers_nothing() {
        let (mut driver, device, _) = driver_with_mocks();
        let config = driver.create_config(Profile::H264Main, Entrypoint::Vld, &[]).unwrap();
        let surfaces = driver.create_surfaces(RT_FORMAT_YUV420, 64, 64, 2).unwrap();
        device.state().fail_create_session = true;
        let before = driver.object_count();

        let err = driver.create_context(config, 64, 64, &surfaces).unwrap_err();
        assert!(matches!(err, DriverError::AllocationFailed(_)));
        assert_eq!(driver.object_count(), before);
        assert_eq!(driver.surface(surfaces[0]).unwrap().picture_index, -1);
    }

    #[test]
    fn test_unknown_render_target_opens_no_session() {
        let (mut driver, device, _) = driver_with_mocks();
        let config = driver.create_config(Profile::HevcMain, Entrypoint::Vld, &[]).unwrap();
        let err = driver.create_context(config, 64, 64, &[INVALID_ID]).unwrap_err();
        assert!(matches!(err, DriverError::InvalidSurface(_)));
        assert_eq!(device.state().sessions_created, 0);
    }

    #[test]
    fn test_destroy_context_closes_session_and_detaches() {
        let (mut driver, device, _) = driver_with_mocks();
        let config = driver.create_config(Profile::Mpeg2Main, Entrypoint::Vld, &[]).unwrap();
        let surfaces = driver.create_surfaces(RT_FORMAT_YUV420, 32, 32, 2).unwrap();
        let ctx = driver.create_context(config, 32, 32, &surfaces).unwrap();
        assert_eq!(device.state().open_sessions.len(), 1);

        driver.destroy_context(ctx).unwrap();
        assert!(device.state().open_sessions.is_empty());
        assert!(driver.context(ctx).is_err());
        assert_eq!(driver.surface(surfaces[1]).unwrap().picture_index, -1);
        assert!(matches!(driver.destroy_context(ctx), Err(DriverError::InvalidContext(_))));
    }

    #[test]
    fn test_destroy_failure_still_removes_context() {
        let (mut driver, device, _) = driver_with_mocks();
        let config = driver.create_config(Profile::H264Main, Entrypoint::Vld, &[]).unwrap();
        let surfaces = driver.create_surfaces(RT_FORMAT_YUV420, 32, 32, 1).unwrap();
        let ctx = driver.create_context(config, 32, 32, &surfaces).unwrap();
        device.state().fail_destroy_session = true;

        let err = driver.destroy_context(ctx).unwrap_err();
        assert!(matches!(err, DriverError::OperationFailed(_)));
        assert!(driver.context(ctx).is_err());
    }

    #[test]
    fn test_context_needs_a_codec_module() {
        let device = MockDevice::new();
        let mut driver = crate::Driver::with_codecs(
            Box::new(device),
            None,
            crate::codecs::CodecRegistry::builtin(),
            Default::default(),
        );
        let config = driver.create_config(Profile::H264Main, Entrypoint::Vld, &[]).unwrap();
        let surfaces = driver.create_surfaces(RT_FORMAT_YUV420, 32, 32, 1).unwrap();
        *driver.codecs_mut() = crate::codecs::CodecRegistry::new();
        let err = driver.create_context(config, 32, 32, &surfaces).unwrap_err();
        assert!(matches!(err, DriverError::UnsupportedProfile(_)));
    }
}
