//! Per-picture decode: Begin → Render* → End.

use std::sync::Arc;

use tracing::{debug, error, trace, warn};

use crate::codecs::Handled;
use crate::context::PictureState;
use crate::device::DecodeSubmission;
use crate::driver::Driver;
use crate::error::{DriverError, Result};
use crate::objects::Object;
use crate::types::{BufferId, ContextId, SurfaceId};

impl Driver {
    /// Start a picture targeting `target`. A picture still in progress on
    /// this context is dropped.
    pub fn begin_picture(&mut self, context_id: ContextId, target: SurfaceId) -> Result<()> {
        debug!(context = context_id, surface = target, "begin_picture");
        self.surface(target)?;
        let context = self.context_mut(context_id)?;
        let picture_index = context
            .render_targets
            .iter()
            .position(|&s| s == target)
            .ok_or(DriverError::InvalidSurface(target))? as i32;

        if let PictureState::Accumulating { target: previous } = context.state {
            warn!(
                context = context_id,
                surface = previous,
                "begin_picture while a picture is in progress, discarding it"
            );
        }
        context.picture.begin(picture_index);
        context.state = PictureState::Accumulating { target };
        Ok(())
    }

    /// Fold client buffers into the picture in order. Buffer types the
    /// codec module does not handle are skipped.
    pub fn render_picture(&mut self, context_id: ContextId, buffers: &[BufferId]) -> Result<()> {
        debug!(context = context_id, buffers = buffers.len(), "render_picture");
        let context = self.context(context_id)?;
        if context.is_idle() {
            return Err(DriverError::InvalidContext(context_id));
        }
        let module = Arc::clone(&context.module);

        for &buffer_id in buffers {
            let (ctx_obj, buf_obj) = self
                .objects
                .get_pair_mut(context_id, buffer_id)
                .ok_or(DriverError::InvalidBuffer(buffer_id))?;
            let (Some(context), Some(buffer)) = (ctx_obj.as_context_mut(), buf_obj.as_buffer())
            else {
                return Err(DriverError::InvalidBuffer(buffer_id));
            };

            let contents = buffer.contents();
            trace!(
                buffer = buffer_id,
                kind = ?buffer.kind,
                size = contents.data.len(),
                elements = contents.elements,
                "render buffer"
            );
            let handled =
                module.handle(buffer.kind, &contents, &mut context.picture, &context.render_targets)?;
            match handled {
                Handled::Consumed => {}
                Handled::Ignored => warn!(
                    context = context_id,
                    buffer = buffer_id,
                    kind = ?buffer.kind,
                    codec = module.name(),
                    "skipping unhandled buffer type"
                ),
            }
        }
        Ok(())
    }

    /// Submit the accumulated picture. The accumulators are emptied whether
    /// or not the device accepts it.
    pub fn end_picture(&mut self, context_id: ContextId) -> Result<()> {
        let Driver { device, objects, .. } = &mut *self;
        let context = objects
            .get_mut(context_id)
            .and_then(Object::as_context_mut)
            .ok_or(DriverError::InvalidContext(context_id))?;
        let PictureState::Accumulating { target } = context.state else {
            return Err(DriverError::InvalidContext(context_id));
        };
        context.state = PictureState::Idle;

        let picture = &mut context.picture;
        picture.params.num_slices = picture.slice_offsets.len() as u32;
        debug!(
            context = context_id,
            surface = target,
            picture_index = picture.params.curr_pic_idx,
            bytes = picture.bitstream.len(),
            slices = picture.params.num_slices,
            "end_picture"
        );

        let submitted = device.decode_picture(
            context.session,
            &DecodeSubmission {
                params: &picture.params,
                bitstream: picture.bitstream.as_slice(),
                slice_offsets: picture.slice_offsets.as_slice(),
            },
        );
        let fields = picture.params.frame_fields();
        let session = context.session;
        picture.reset();

        if let Err(e) = submitted {
            error!(context = context_id, surface = target, error = %e, "decode submission failed");
            return Err(DriverError::DecodingError(e));
        }

        let surface = self.surface_mut(target)?;
        surface.session = Some(session);
        surface.fields = fields;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::DriverError;
    use crate::mock::{driver_with_mocks, mpeg2_picture_parameters};
    use crate::types::{BufferType, Entrypoint, Profile, RT_FORMAT_YUV420};
    use crate::Driver;

    fn mpeg2_session(driver: &mut Driver, surfaces: usize) -> (u32, Vec<u32>) {
        let config = driver.create_config(Profile::Mpeg2Main, Entrypoint::Vld, &[]).unwrap();
        let targets = driver.create_surfaces(RT_FORMAT_YUV420, 64, 64, surfaces).unwrap();
        let ctx = driver.create_context(config, 64, 64, &targets).unwrap();
        (ctx, targets)
    }

    fn slice_buffers(driver: &mut Driver, ctx: u32, payload: &[u8]) -> Vec<u32> {
        let pic = mpeg2_picture_parameters(64, 64, 1, u32::MAX, 3);
        vec![
            driver
                .create_buffer(ctx, BufferType::PictureParameter, pic.len(), 1, Some(&pic))
                .unwrap(),
            driver
                .create_buffer(ctx, BufferType::SliceData, payload.len(), 1, Some(payload))
                .unwrap(),
        ]
    }

    #[test]
    fn test_decode_marks_surface() {
        let (mut driver, device, _) = driver_with_mocks();
        let (ctx, targets) = mpeg2_session(&mut driver, 3);
        let buffers = slice_buffers(&mut driver, ctx, &[0, 0, 1, 0xb3, 7, 7]);

        driver.begin_picture(ctx, targets[2]).unwrap();
        driver.render_picture(ctx, &buffers).unwrap();
        driver.end_picture(ctx).unwrap();

        let state = device.state();
        let submission = state.submissions.last().unwrap();
        assert_eq!(submission.curr_pic_idx, 2);
        assert_eq!(submission.bitstream_len, 6);
        assert_eq!(submission.slice_offsets, vec![0]);
        assert_eq!(submission.num_slices, 1);
        drop(state);

        let surface = driver.surface(targets[2]).unwrap();
        assert!(surface.is_decoded());
        assert!(surface.fields.progressive);
        assert!(!driver.surface(targets[0]).unwrap().is_decoded());
    }

    #[test]
    fn test_accumulators_empty_after_end_and_keep_capacity() {
        let (mut driver, _, _) = driver_with_mocks();
        let (ctx, targets) = mpeg2_session(&mut driver, 1);
        let buffers = slice_buffers(&mut driver, ctx, &[0x55; 4096]);

        driver.begin_picture(ctx, targets[0]).unwrap();
        driver.render_picture(ctx, &buffers).unwrap();
        driver.end_picture(ctx).unwrap();

        let picture = &driver.context(ctx).unwrap().picture;
        assert!(picture.bitstream.is_empty());
        assert!(picture.slice_offsets.is_empty());
        let capacity = picture.bitstream.capacity();
        assert!(capacity >= 4096);

        driver.begin_picture(ctx, targets[0]).unwrap();
        driver.render_picture(ctx, &buffers).unwrap();
        driver.end_picture(ctx).unwrap();
        assert_eq!(driver.context(ctx).unwrap().picture.bitstream.capacity(), capacity);
    }

    #[test]
    fn test_unknown_buffer_type_is_skipped() {
        let (mut driver, device, _) = driver_with_mocks();
        let (ctx, targets) = mpeg2_session(&mut driver, 1);
        let mut buffers = slice_buffers(&mut driver, ctx, &[1, 2, 3]);
        buffers.insert(
            1,
            driver.create_buffer(ctx, BufferType::Other(77), 8, 1, None).unwrap(),
        );
        buffers.push(driver.create_buffer(ctx, BufferType::HuffmanTable, 8, 1, None).unwrap());

        driver.begin_picture(ctx, targets[0]).unwrap();
        driver.render_picture(ctx, &buffers).unwrap();
        driver.end_picture(ctx).unwrap();
        assert_eq!(device.state().submissions.len(), 1);
        assert!(driver.surface(targets[0]).unwrap().is_decoded());
    }

    #[test]
    fn test_render_and_end_need_begin() {
        let (mut driver, _, _) = driver_with_mocks();
        let (ctx, targets) = mpeg2_session(&mut driver, 1);
        let buffers = slice_buffers(&mut driver, ctx, &[1]);
        assert!(matches!(driver.render_picture(ctx, &buffers), Err(DriverError::InvalidContext(_))));
        assert!(matches!(driver.end_picture(ctx), Err(DriverError::InvalidContext(_))));

        driver.begin_picture(ctx, targets[0]).unwrap();
        driver.end_picture(ctx).unwrap();
        assert!(matches!(driver.end_picture(ctx), Err(DriverError::InvalidContext(_))));
    }

    #[test]
    fn test_begin_rejects_foreign_surface() {
        let (mut driver, _, _) = driver_with_mocks();
        let (ctx, _) = mpeg2_session(&mut driver, 1);
        let stranger = driver.create_surfaces(RT_FORMAT_YUV420, 64, 64, 1).unwrap()[0];
        assert!(matches!(
            driver.begin_picture(ctx, stranger),
            Err(DriverError::InvalidSurface(_))
        ));
    }

    #[test]
    fn test_begin_twice_discards_previous_picture() {
        let (mut driver, device, _) = driver_with_mocks();
        let (ctx, targets) = mpeg2_session(&mut driver, 2);
        let buffers = slice_buffers(&mut driver, ctx, &[9; 10]);

        driver.begin_picture(ctx, targets[0]).unwrap();
        driver.render_picture(ctx, &buffers).unwrap();
        driver.begin_picture(ctx, targets[1]).unwrap();
        driver.end_picture(ctx).unwrap();

        let state = device.state();
        let submission = state.submissions.last().unwrap();
        assert_eq!(submission.curr_pic_idx, 1);
        assert_eq!(submission.bitstream_len, 0);
    }

    #[test]
    fn test_failed_submission_leaves_surface_undecoded() {
        let (mut driver, device, _) = driver_with_mocks();
        let (ctx, targets) = mpeg2_session(&mut driver, 1);
        let buffers = slice_buffers(&mut driver, ctx, &[1, 2]);
        device.state().fail_decode = true;

        driver.begin_picture(ctx, targets[0]).unwrap();
        driver.render_picture(ctx, &buffers).unwrap();
        let err = driver.end_picture(ctx).unwrap_err();
        assert_eq!(err.status(), 0x17);
        assert!(!driver.surface(targets[0]).unwrap().is_decoded());
        assert!(driver.context(ctx).unwrap().is_idle());
        assert!(driver.context(ctx).unwrap().picture.bitstream.is_empty());

        device.state().fail_decode = false;
        driver.begin_picture(ctx, targets[0]).unwrap();
        driver.render_picture(ctx, &buffers).unwrap();
        driver.end_picture(ctx).unwrap();
        assert!(driver.surface(targets[0]).unwrap().is_decoded());
    }

    #[test]
    fn test_render_rejects_bad_buffer() {
        let (mut driver, _, _) = driver_with_mocks();
        let (ctx, targets) = mpeg2_session(&mut driver, 1);
        driver.begin_picture(ctx, targets[0]).unwrap();
        assert!(matches!(
            driver.render_picture(ctx, &[targets[0]]),
            Err(DriverError::InvalidBuffer(_))
        ));
        assert!(matches!(driver.render_picture(ctx, &[ctx]), Err(DriverError::InvalidBuffer(_))));
    }
}
