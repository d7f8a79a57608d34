use std::collections::HashMap;

use crate::error::{DriverError, Result};
use crate::types::{ObjectId, INVALID_ID};

/// Arena of driver objects addressed by opaque ids.
///
/// Ids are handed out monotonically starting at 1 and are never reused, even
/// after release or [`clear`](Self::clear). Slots are recycled through a free list; each slot remembers
/// the id it currently holds, so a stale id cannot reach a newer occupant.
pub struct HandleRegistry<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    index: HashMap<ObjectId, usize>,
    next_id: ObjectId,
}

struct Slot<T> {
    id: ObjectId,
    value: Option<T>,
}

impl<T> HandleRegistry<T> {
    pub fn new() -> Self {
        HandleRegistry {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            next_id: 1,
        }
    }

    #[cfg(test)]
    pub(crate) fn starting_at(next_id: ObjectId) -> Self {
        HandleRegistry { next_id, ..Self::new() }
    }

    /// Store `value` and return its new id. Fails once every id below
    /// [`INVALID_ID`] has been handed out.
    pub fn allocate(&mut self, value: T) -> Result<ObjectId> {
        let id = self.next_id;
        if id == INVALID_ID {
            return Err(DriverError::AllocationFailed("object id space exhausted".into()));
        }
        self.next_id += 1;

        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Slot { id, value: Some(value) };
                slot
            }
            None => {
                self.slots.push(Slot { id, value: Some(value) });
                self.slots.len() - 1
            }
        };
        self.index.insert(id, slot);
        Ok(id)
    }

    pub fn get(&self, id: ObjectId) -> Option<&T> {
        let slot = self.slots.get(*self.index.get(&id)?)?;
        if slot.id != id {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut T> {
        let slot = self.slots.get_mut(*self.index.get(&id)?)?;
        if slot.id != id {
            return None;
        }
        slot.value.as_mut()
    }

    /// Mutable access to two distinct objects at once.
    pub fn get_pair_mut(&mut self, a: ObjectId, b: ObjectId) -> Option<(&mut T, &mut T)> {
        let ia = self.live_slot(a)?;
        let ib = self.live_slot(b)?;
        if ia == ib {
            return None;
        }
        let (lo, hi) = (ia.min(ib), ia.max(ib));
        let (left, right) = self.slots.split_at_mut(hi);
        let (first, second) = (&mut left[lo], &mut right[0]);
        let (slot_a, slot_b) = if ia < ib { (first, second) } else { (second, first) };
        Some((slot_a.value.as_mut()?, slot_b.value.as_mut()?))
    }

    fn live_slot(&self, id: ObjectId) -> Option<usize> {
        let slot = *self.index.get(&id)?;
        (self.slots[slot].id == id && self.slots[slot].value.is_some()).then_some(slot)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.get(id).is_some()
    }

    /// Reverse lookup: the id of the object stored at `value`'s address.
    pub fn id_of(&self, value: &T) -> Option<ObjectId> {
        self.slots.iter().find_map(|slot| match &slot.value {
            Some(v) if std::ptr::eq(v, value) => Some(slot.id),
            _ => None,
        })
    }

    /// Remove and return the object. Unknown ids are ignored.
    pub fn release(&mut self, id: ObjectId) -> Option<T> {
        let slot = self.index.remove(&id)?;
        let value = self.slots[slot].value.take();
        self.free.push(slot);
        value
    }

    /// Drop every object. The id counter keeps running, so ids issued
    /// before the clear stay dead.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.index.clear();
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Live ids in ascending order.
    pub fn ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self.index.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &T)> {
        self.slots
            .iter()
            .filter_map(|slot| slot.value.as_ref().map(|v| (slot.id, v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ObjectId, &mut T)> {
        self.slots
            .iter_mut()
            .filter_map(|slot| slot.value.as_mut().map(|v| (slot.id, v)))
    }
}

impl<T> Default for HandleRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
