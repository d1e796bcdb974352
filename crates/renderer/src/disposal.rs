//! Deferred resource disposal.
//!
//! Resource owners hand the manager a [`QueuedDisposal`] instead of
//! releasing GPU memory straight away. The manager owns only the obligation
//! to invoke it once no in-flight frame can still reference the resource.

use std::fmt;

use framesync_rhi::RhiError;
use tracing::error;

use crate::error::{SyncError, SyncResult};

/// Result of a disposal callback.
pub type DisposalResult = Result<(), RhiError>;

/// Opaque handle to a native resource awaiting disposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle(pub u64);

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A resource handle paired with the callback that releases it.
pub struct QueuedDisposal {
    handle: ResourceHandle,
    callback: Box<dyn FnOnce(ResourceHandle) -> DisposalResult>,
}

impl QueuedDisposal {
    /// Pairs `handle` with the callback that will release it.
    ///
    /// Plain `fn(ResourceHandle) -> DisposalResult` items work as well as
    /// closures.
    pub fn new<F>(handle: ResourceHandle, callback: F) -> Self
    where
        F: FnOnce(ResourceHandle) -> DisposalResult + 'static,
    {
        Self {
            handle,
            callback: Box::new(callback),
        }
    }

    /// The resource this disposal releases.
    #[inline]
    pub fn handle(&self) -> ResourceHandle {
        self.handle
    }

    /// Runs the callback.
    pub fn invoke(self) -> SyncResult<()> {
        let handle = self.handle;
        (self.callback)(handle).map_err(|source| SyncError::Disposal { handle, source })
    }
}

impl fmt::Debug for QueuedDisposal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedDisposal")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Runs every disposal in `batch` in order, emptying it.
///
/// A failing callback does not stop the rest of the batch; the first
/// failure is returned once all have run and later ones are logged.
pub(crate) fn run_batch(batch: &mut Vec<QueuedDisposal>) -> SyncResult<()> {
    let mut outcome = Ok(());
    for disposal in batch.drain(..) {
        if let Err(err) = disposal.invoke() {
            if outcome.is_ok() {
                outcome = Err(err);
            } else {
                error!("Additional disposal failure in batch: {}", err);
            }
        }
    }
    outcome
}

/// Recycles the vectors used for callback queues.
///
/// Every emitted fence with pending disposals takes ownership of a queue,
/// so recycling them keeps steady-state frames allocation-free.
#[derive(Debug, Default)]
pub(crate) struct CallbackQueuePool {
    free: Vec<Vec<QueuedDisposal>>,
}

impl CallbackQueuePool {
    /// Queues kept around; anything beyond is dropped.
    const MAX_RETAINED: usize = crate::MAX_BUFFER_DEPTH * 2;

    pub(crate) fn rent(&mut self) -> Vec<QueuedDisposal> {
        self.free.pop().unwrap_or_default()
    }

    pub(crate) fn give_back(&mut self, mut queue: Vec<QueuedDisposal>) {
        queue.clear();
        if self.free.len() < Self::MAX_RETAINED && queue.capacity() > 0 {
            self.free.push(queue);
        }
    }

    #[cfg(test)]
    fn retained(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    fn release_texture(_: ResourceHandle) -> DisposalResult {
        Ok(())
    }

    #[test]
    fn test_invoke_passes_handle() {
        let seen = Rc::new(RefCell::new(None));
        let sink = seen.clone();
        let disposal = QueuedDisposal::new(ResourceHandle(42), move |handle| {
            *sink.borrow_mut() = Some(handle);
            Ok(())
        });

        assert_eq!(disposal.handle(), ResourceHandle(42));
        disposal.invoke().unwrap();
        assert_eq!(*seen.borrow(), Some(ResourceHandle(42)));
    }

    #[test]
    fn test_fn_items_are_accepted() {
        QueuedDisposal::new(ResourceHandle(1), release_texture)
            .invoke()
            .unwrap();
    }

    #[test]
    fn test_failure_names_the_resource() {
        let err = QueuedDisposal::new(ResourceHandle(7), |_| {
            Err(RhiError::Native("double free".to_string()))
        })
        .invoke()
        .unwrap_err();

        assert!(matches!(err, SyncError::Disposal { handle: ResourceHandle(7), .. }));
    }

    #[test]
    fn test_batch_runs_everything_and_keeps_first_error() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut batch = Vec::new();
        for id in 0..4u64 {
            let order = order.clone();
            batch.push(QueuedDisposal::new(ResourceHandle(id), move |handle| {
                order.borrow_mut().push(handle.0);
                if handle.0 % 2 == 1 {
                    Err(RhiError::Native(format!("resource {}", handle.0)))
                } else {
                    Ok(())
                }
            }));
        }

        let err = run_batch(&mut batch).unwrap_err();
        assert!(matches!(err, SyncError::Disposal { handle: ResourceHandle(1), .. }));
        assert_eq!(*order.borrow(), vec![0, 1, 2, 3]);
        assert!(batch.is_empty());
    }

    #[test]
    fn test_pool_recycles_allocated_queues() {
        let mut pool = CallbackQueuePool::default();

        // Never-allocated queues are not worth keeping
        pool.give_back(Vec::new());
        assert_eq!(pool.retained(), 0);

        let mut queue = pool.rent();
        queue.push(QueuedDisposal::new(ResourceHandle(1), release_texture));
        pool.give_back(queue);
        assert_eq!(pool.retained(), 1);

        let reused = pool.rent();
        assert!(reused.is_empty());
        assert!(reused.capacity() > 0);
    }
}
