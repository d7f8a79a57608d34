use tracing::{debug, trace};

use crate::driver::Driver;
use crate::error::{DriverError, Result};
use crate::objects::{Buffer, Object};
use crate::types::{BufferId, BufferType, ContextId};

/// Type and shape of a buffer as reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub kind: BufferType,
    pub element_size: usize,
    pub elements: usize,
}

impl Driver {
    /// Allocate `element_size * elements` bytes, optionally initialised from
    /// `data`.
    pub fn create_buffer(
        &mut self,
        context: ContextId,
        kind: BufferType,
        element_size: usize,
        elements: usize,
        data: Option<&[u8]>,
    ) -> Result<BufferId> {
        let size = element_size
            .checked_mul(elements)
            .ok_or(DriverError::InvalidParameter("buffer size overflows"))?;
        let mut buffer = Buffer::new(kind, element_size, elements);
        if let Some(data) = data {
            let n = data.len().min(size);
            buffer.data[..n].copy_from_slice(&data[..n]);
        }
        let id = self.objects.allocate(Object::Buffer(buffer))?;
        trace!(buffer = id, context, ?kind, element_size, elements, "create_buffer");
        Ok(id)
    }

    /// Host view of the whole allocation. The driver keeps ownership.
    pub fn map_buffer(&mut self, id: BufferId) -> Result<&mut [u8]> {
        Ok(&mut self.buffer_mut(id)?.data[..])
    }

    pub fn unmap_buffer(&mut self, id: BufferId) -> Result<()> {
        self.buffer(id)?;
        Ok(())
    }

    pub fn destroy_buffer(&mut self, id: BufferId) -> Result<()> {
        self.buffer(id)?;
        self.objects.release(id);
        trace!(buffer = id, "destroy_buffer");
        Ok(())
    }

    pub fn buffer_info(&self, id: BufferId) -> Result<BufferInfo> {
        let buffer = self.buffer(id)?;
        Ok(BufferInfo {
            kind: buffer.kind,
            element_size: buffer.element_size,
            elements: buffer.elements,
        })
    }

    /// Change the logical element count without reallocating.
    pub fn buffer_set_num_elements(&mut self, id: BufferId, elements: usize) -> Result<()> {
        let buffer = self.buffer_mut(id)?;
        let fits = buffer
            .element_size
            .checked_mul(elements)
            .is_some_and(|size| size <= buffer.size());
        if !fits {
            debug!(buffer = id, elements, size = buffer.size(), "element count exceeds allocation");
            return Err(DriverError::InvalidBuffer(id));
        }
        buffer.elements = elements;
        Ok(())
    }
}
