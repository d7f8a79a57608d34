/// Append-only accumulator with geometric growth.
///
/// The first allocation reserves twice the initial append; later growth is by
/// half again the current capacity (or exactly what is needed if larger).
/// `clear` keeps the allocation for the next picture.
#[derive(Debug, Clone)]
pub struct AppendBuffer<T: Copy = u8> {
    data: Vec<T>,
}

impl<T: Copy> AppendBuffer<T> {
    pub fn new() -> Self {
        AppendBuffer { data: Vec::new() }
    }

    pub fn append(&mut self, items: &[T]) {
        self.reserve_for(items.len());
        self.data.extend_from_slice(items);
    }

    pub fn push(&mut self, item: T) {
        self.reserve_for(1);
        self.data.push(item);
    }

    fn reserve_for(&mut self, extra: usize) {
        let needed = self.data.len() + extra;
        let cap = self.data.capacity();
        if needed <= cap {
            return;
        }
        let target = if cap == 0 {
            extra * 2
        } else {
            needed.max(cap + cap / 2)
        };
        self.data.reserve_exact(target - self.data.len());
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }
}

impl<T: Copy> Default for AppendBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_append_reserves_double() {
        let mut buf: AppendBuffer = AppendBuffer::new();
        buf.append(&[1, 2, 3, 4]);
        assert_eq!(buf.len(), 4);
        assert!(buf.capacity() >= 8);
        assert_eq!(buf.as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_growth_preserves_order() {
        let mut buf: AppendBuffer<u32> = AppendBuffer::new();
        for i in 0..1000 {
            buf.push(i);
        }
        assert_eq!(buf.len(), 1000);
        assert!(buf.as_slice().iter().copied().eq(0..1000));
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut buf: AppendBuffer = AppendBuffer::new();
        buf.append(&[0u8; 4096]);
        let cap = buf.capacity();
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), cap);
        buf.append(&[7u8; 4096]);
        assert_eq!(buf.capacity(), cap);
    }

    #[test]
    fn test_large_append_after_small() {
        let mut buf: AppendBuffer = AppendBuffer::new();
        buf.append(&[1]);
        buf.append(&[2u8; 100]);
        assert_eq!(buf.len(), 101);
        assert!(buf.capacity() >= 101);
    }
}
