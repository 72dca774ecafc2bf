//! Thin wrappers over the `context` crate: an owned stack and a saved context token.

use ::context::stack::ProtectedFixedSizeStack;
use ::context::{Context, Transfer};

use crate::error::FiberError;

/// A guard-paged stack owned by exactly one fiber.
pub(crate) struct FiberStack(ProtectedFixedSizeStack);

// SAFETY: the stack is plain mapped memory. It is only ever executed on by the
// thread that currently resumes its fiber, which the fiber state machine serializes.
unsafe impl Send for FiberStack {}
unsafe impl Sync for FiberStack {}

impl FiberStack {
    pub(crate) fn new(size: usize) -> Result<Self, FiberError> {
        ProtectedFixedSizeStack::new(size)
            .map(Self)
            .map_err(|cause| FiberError::StackAlloc { size, cause })
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    pub(crate) fn bottom(&self) -> usize {
        self.0.bottom() as usize
    }
}

/// A suspended execution context. Resuming consumes it.
pub(crate) struct SavedContext(Context);

// SAFETY: a saved context is an opaque pointer into a fiber stack. It is moved
// between threads only while suspended and is resumed by one thread at a time.
unsafe impl Send for SavedContext {}

impl SavedContext {
    /// Binds `entry` to the top of `stack`. The entry runs on the first switch.
    pub(crate) fn bind(stack: &FiberStack, entry: extern "C" fn(Transfer) -> !) -> Self {
        Self(unsafe { Context::new(&stack.0, entry) })
    }

    pub(crate) fn from_raw(context: Context) -> Self {
        Self(context)
    }

    /// Switches into this context, handing it `data`.
    /// Returns once something switches back, with that side's context and data.
    ///
    /// # Safety
    /// The context must not have been resumed before, and the stack it lives on
    /// must outlive the switch.
    pub(crate) unsafe fn switch(self, data: usize) -> (SavedContext, usize) {
        let transfer = unsafe { self.0.resume(data) };
        (Self(transfer.context), transfer.data)
    }
}
