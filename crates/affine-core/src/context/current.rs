//! Thread-local handle of the context owning the current thread.

use std::cell::RefCell;

use super::ContextHandle;

thread_local! {
    static CURRENT: RefCell<Option<ContextHandle>> = const { RefCell::new(None) };
}

/// Restores the previous handle even if `f` unwinds.
struct Restore(Option<ContextHandle>);

impl Drop for Restore {
    fn drop(&mut self) {
        let previous = self.0.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

/// Run `f` with `handle` installed as the current context.
pub(crate) fn enter<F, R>(handle: ContextHandle, f: F) -> R
where
    F: FnOnce() -> R,
{
    let previous = CURRENT.with(|current| current.borrow_mut().replace(handle));
    let _restore = Restore(previous);
    f()
}

pub(crate) fn current() -> Option<ContextHandle> {
    CURRENT.with(|current| current.borrow().clone())
}
