//! Fixed-capacity ring of in-flight fences.

use framesync_rhi::FenceHandle;

use crate::MAX_BUFFER_DEPTH;

/// A renderer's in-flight fences, newest at slot 0.
///
/// Storage is always [`MAX_BUFFER_DEPTH`] slots; only the first `depth` are
/// active and the rest stay empty.
///
/// ```text
/// depth = 3, after emitting E1, E2, E3, E4 (E1 already evicted):
///
///   slot:  0    1    2    3    4
///        [E4] [E3] [E2] [ -- ] [ -- ]
///                   ^ oldest, evicted by the next emission
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircularFenceBuffer {
    slots: [Option<FenceHandle>; MAX_BUFFER_DEPTH],
    depth: usize,
}

impl CircularFenceBuffer {
    /// Creates an empty ring, or `None` if `depth > MAX_BUFFER_DEPTH`.
    pub fn new(depth: usize) -> Option<Self> {
        (depth <= MAX_BUFFER_DEPTH).then_some(Self {
            slots: [None; MAX_BUFFER_DEPTH],
            depth,
        })
    }

    /// Number of active slots.
    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Fence in `slot`, if any. Slots past the depth are always empty.
    #[inline]
    pub fn get(&self, slot: usize) -> Option<FenceHandle> {
        self.slots.get(slot).copied().flatten()
    }

    /// The fence the next emission will evict.
    #[inline]
    pub fn oldest(&self) -> Option<FenceHandle> {
        self.depth.checked_sub(1).and_then(|last| self.slots[last])
    }

    /// Returns a ring with `fence` at slot 0 and every other fence shifted
    /// back one slot. Whatever sat in the last active slot is dropped, so
    /// callers evict it first.
    #[must_use]
    pub fn cycled(&self, fence: FenceHandle) -> Self {
        let mut result = Self {
            slots: [None; MAX_BUFFER_DEPTH],
            depth: self.depth,
        };
        if self.depth == 0 {
            return result;
        }
        result.slots[1..self.depth].copy_from_slice(&self.slots[..self.depth - 1]);
        result.slots[0] = Some(fence);
        result
    }

    /// Empties whichever slot holds `fence`. Returns `false` if none did.
    pub fn release(&mut self, fence: FenceHandle) -> bool {
        match self.slots[..self.depth]
            .iter_mut()
            .find(|slot| **slot == Some(fence))
        {
            Some(slot) => {
                *slot = None;
                true
            }
            None => false,
        }
    }

    /// Occupied slots from oldest to newest.
    pub fn occupied_oldest_first(&self) -> impl Iterator<Item = FenceHandle> + '_ {
        self.slots[..self.depth].iter().rev().filter_map(|slot| *slot)
    }

    /// Occupied slots from newest to oldest.
    pub fn occupied(&self) -> impl Iterator<Item = FenceHandle> + '_ {
        self.slots[..self.depth].iter().filter_map(|slot| *slot)
    }

    /// Number of fences currently held.
    pub fn in_flight(&self) -> usize {
        self.occupied().count()
    }

    /// Whether no fence is held.
    pub fn is_empty(&self) -> bool {
        self.in_flight() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fence(raw: u64) -> FenceHandle {
        FenceHandle::from_raw(raw).unwrap()
    }

    #[test]
    fn test_depth_is_bounded() {
        for depth in 0..=MAX_BUFFER_DEPTH {
            let buffer = CircularFenceBuffer::new(depth).unwrap();
            assert_eq!(buffer.depth(), depth);
            assert!(buffer.is_empty());
        }
        assert!(CircularFenceBuffer::new(MAX_BUFFER_DEPTH + 1).is_none());
    }

    #[test]
    fn test_cycle_shifts_back() {
        let buffer = CircularFenceBuffer::new(3)
            .unwrap()
            .cycled(fence(1))
            .cycled(fence(2));

        assert_eq!(buffer.get(0), Some(fence(2)));
        assert_eq!(buffer.get(1), Some(fence(1)));
        assert_eq!(buffer.get(2), None);
        assert_eq!(buffer.oldest(), None);

        let buffer = buffer.cycled(fence(3));
        assert_eq!(buffer.oldest(), Some(fence(1)));
        assert_eq!(buffer.in_flight(), 3);
    }

    #[test]
    fn test_cycle_drops_last_active_slot() {
        let buffer = CircularFenceBuffer::new(2)
            .unwrap()
            .cycled(fence(1))
            .cycled(fence(2))
            .cycled(fence(3));

        assert_eq!(buffer.occupied().collect::<Vec<_>>(), vec![fence(3), fence(2)]);
        // Inactive storage never picks up the shifted-out fence
        for slot in 2..MAX_BUFFER_DEPTH {
            assert_eq!(buffer.get(slot), None);
        }
    }

    #[test]
    fn test_zero_depth_holds_nothing() {
        let buffer = CircularFenceBuffer::new(0).unwrap().cycled(fence(9));
        assert!(buffer.is_empty());
        assert_eq!(buffer.oldest(), None);
    }

    #[test]
    fn test_release_and_ordering() {
        let mut buffer = CircularFenceBuffer::new(MAX_BUFFER_DEPTH).unwrap();
        for raw in 1..=4 {
            buffer = buffer.cycled(fence(raw));
        }

        assert_eq!(
            buffer.occupied_oldest_first().collect::<Vec<_>>(),
            vec![fence(1), fence(2), fence(3), fence(4)]
        );

        assert!(buffer.release(fence(2)));
        assert!(!buffer.release(fence(2)));
        assert_eq!(
            buffer.occupied_oldest_first().collect::<Vec<_>>(),
            vec![fence(1), fence(3), fence(4)]
        );
    }
}
