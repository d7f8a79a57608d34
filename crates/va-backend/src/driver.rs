use tracing::{debug, info, warn};

use crate::codecs::CodecRegistry;
use crate::config::DriverConfig;
use crate::context::Context;
use crate::device::{DecodeDevice, FrameStream};
use crate::error::{DriverError, Result};
use crate::export::Exporter;
use crate::objects::{Buffer, ConfigObject, Image, Object, ObjectKind, Surface};
use crate::registry::HandleRegistry;
use crate::types::{BufferId, ConfigId, ContextId, ImageId, ObjectId, SurfaceId};

/// Per-process driver state: the object registry, the codec chain and the
/// hardware behind them.
pub struct Driver {
    pub(crate) device: Box<dyn DecodeDevice>,
    pub(crate) exporter: Option<Exporter>,
    pub(crate) codecs: CodecRegistry,
    pub(crate) objects: HandleRegistry<Object>,
    pub(crate) config: DriverConfig,
}

impl Driver {
    /// Driver with the built-in codec modules.
    pub fn new(
        device: Box<dyn DecodeDevice>,
        stream: Option<Box<dyn FrameStream>>,
        config: DriverConfig,
    ) -> Self {
        Self::with_codecs(device, stream, CodecRegistry::builtin(), config)
    }

    pub fn with_codecs(
        device: Box<dyn DecodeDevice>,
        stream: Option<Box<dyn FrameStream>>,
        codecs: CodecRegistry,
        config: DriverConfig,
    ) -> Self {
        info!(
            device = %device.name(),
            codecs = codecs.len(),
            export = stream.is_some(),
            fifo_length = config.fifo_length,
            "driver initialised"
        );
        let exporter = stream.map(|stream| Exporter::new(stream, &config));
        Driver {
            device,
            exporter,
            codecs,
            objects: HandleRegistry::new(),
            config,
        }
    }

    pub fn device_name(&self) -> String {
        self.device.name()
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    pub fn codecs_mut(&mut self) -> &mut CodecRegistry {
        &mut self.codecs
    }

    /// Live objects of every kind.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn object_kind(&self, id: ObjectId) -> Option<ObjectKind> {
        self.objects.get(id).map(Object::kind)
    }

    /// Close every decode session, drop the export stream state and forget
    /// all objects.
    pub fn terminate(&mut self) -> Result<()> {
        debug!(objects = self.objects.len(), "terminate");
        let contexts: Vec<ContextId> = self
            .objects
            .iter()
            .filter(|(_, obj)| obj.kind() == ObjectKind::Context)
            .map(|(id, _)| id)
            .collect();
        for id in contexts {
            if let Err(e) = self.destroy_context(id) {
                warn!(context = id, error = %e, "context teardown failed during terminate");
            }
        }
        if let Some(exporter) = self.exporter.as_mut() {
            exporter.shutdown();
        }
        self.objects.clear();
        info!("driver terminated");
        Ok(())
    }

    // ── Typed lookups ──

    pub fn config_object(&self, id: ConfigId) -> Result<&ConfigObject> {
        self.objects
            .get(id)
            .and_then(Object::as_config)
            .ok_or(DriverError::InvalidConfig(id))
    }

    pub fn surface(&self, id: SurfaceId) -> Result<&Surface> {
        self.objects
            .get(id)
            .and_then(Object::as_surface)
            .ok_or(DriverError::InvalidSurface(id))
    }

    pub(crate) fn surface_mut(&mut self, id: SurfaceId) -> Result<&mut Surface> {
        self.objects
            .get_mut(id)
            .and_then(Object::as_surface_mut)
            .ok_or(DriverError::InvalidSurface(id))
    }

    pub fn context(&self, id: ContextId) -> Result<&Context> {
        self.objects
            .get(id)
            .and_then(Object::as_context)
            .ok_or(DriverError::InvalidContext(id))
    }

    pub(crate) fn context_mut(&mut self, id: ContextId) -> Result<&mut Context> {
        self.objects
            .get_mut(id)
            .and_then(Object::as_context_mut)
            .ok_or(DriverError::InvalidContext(id))
    }

    pub fn buffer(&self, id: BufferId) -> Result<&Buffer> {
        self.objects
            .get(id)
            .and_then(Object::as_buffer)
            .ok_or(DriverError::InvalidBuffer(id))
    }

    pub(crate) fn buffer_mut(&mut self, id: BufferId) -> Result<&mut Buffer> {
        self.objects
            .get_mut(id)
            .and_then(Object::as_buffer_mut)
            .ok_or(DriverError::InvalidBuffer(id))
    }

    pub fn image(&self, id: ImageId) -> Result<&Image> {
        self.objects
            .get(id)
            .and_then(Object::as_image)
            .ok_or(DriverError::InvalidImage(id))
    }
}

#[cfg(test)]
mod tests {
    use crate::error::DriverError;
    use crate::mock::driver_with_mocks;
    use crate::objects::ObjectKind;
    use crate::types::{Entrypoint, Profile, RT_FORMAT_YUV420};

    #[test]
    fn test_lookup_of_wrong_kind() {
        let (mut driver, _, _) = driver_with_mocks();
        let surfaces = driver.create_surfaces(RT_FORMAT_YUV420, 16, 16, 1).unwrap();
        assert_eq!(driver.object_kind(surfaces[0]), Some(ObjectKind::Surface));
        assert!(matches!(driver.context(surfaces[0]), Err(DriverError::InvalidContext(_))));
        assert!(matches!(driver.buffer(surfaces[0]), Err(DriverError::InvalidBuffer(_))));
        assert!(matches!(driver.config_object(0), Err(DriverError::InvalidConfig(0))));
    }

    #[test]
    fn test_terminate_closes_sessions() {
        let (mut driver, device, _) = driver_with_mocks();
        let config = driver.create_config(Profile::H264Main, Entrypoint::Vld, &[]).unwrap();
        let a = driver.create_surfaces(RT_FORMAT_YUV420, 32, 32, 2).unwrap();
        let b = driver.create_surfaces(RT_FORMAT_YUV420, 32, 32, 2).unwrap();
        driver.create_context(config, 32, 32, &a).unwrap();
        driver.create_context(config, 32, 32, &b).unwrap();
        assert_eq!(device.state().open_sessions.len(), 2);

        driver.terminate().unwrap();
        assert!(device.state().open_sessions.is_empty());
        assert_eq!(driver.object_count(), 0);
    }

    #[test]
    fn test_ids_stay_dead_after_terminate() {
        let (mut driver, _, _) = driver_with_mocks();
        let config = driver.create_config(Profile::H264Main, Entrypoint::Vld, &[]).unwrap();
        let old = driver.create_surfaces(RT_FORMAT_YUV420, 16, 16, 2).unwrap();
        driver.terminate().unwrap();

        let fresh = driver.create_surfaces(RT_FORMAT_YUV420, 16, 16, 3).unwrap();
        assert!(fresh.iter().all(|&id| id > old[1]));
        assert!(driver.config_object(config).is_err());
        for id in old {
            assert!(driver.surface(id).is_err());
        }
    }
}
