//! The host-runtime collaborator.
//!
//! Every reverse invocation runs inside a scoped host-execution context;
//! entry and exit are strictly nested (LIFO) around each individual host
//! call, never held open across a whole forward invocation. Embedders with
//! a real language runtime implement [`HostRuntime`] to bridge dispatch and
//! scoping; [`BasicRuntime`] is enough for closure-based hosts and tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::value::{HostFn, HostValue};

/// Dispatch and scoping services of the host language runtime.
pub trait HostRuntime: Send + Sync {
    /// Enter a scoped host-execution context.
    fn scope_enter(&self) {}

    /// Leave the most recently entered context.
    fn scope_exit(&self) {}

    /// Invoke a host closure, requesting exactly `expected` results. The
    /// engine verifies the count afterward; the hint lets runtimes pick a
    /// call context (scalar vs. list) ahead of time.
    fn call(
        &self,
        callable: &Arc<HostFn>,
        args: &[HostValue],
        expected: usize,
    ) -> anyhow::Result<Vec<HostValue>>;

    /// Invoke a named method on the receiver in `args[0]`.
    fn call_method(
        &self,
        name: &str,
        args: &[HostValue],
        expected: usize,
    ) -> anyhow::Result<Vec<HostValue>>;
}

/// Minimal runtime for hosts whose callables are plain closures.
///
/// Tracks scope depth so nesting can be observed; named-method dispatch is
/// not available without a real object system.
#[derive(Default)]
pub struct BasicRuntime {
    depth: AtomicUsize,
}

impl BasicRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current nesting depth of host-execution contexts.
    pub fn scope_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

impl HostRuntime for BasicRuntime {
    fn scope_enter(&self) {
        self.depth.fetch_add(1, Ordering::Relaxed);
    }

    fn scope_exit(&self) {
        self.depth.fetch_sub(1, Ordering::Relaxed);
    }

    fn call(
        &self,
        callable: &Arc<HostFn>,
        args: &[HostValue],
        _expected: usize,
    ) -> anyhow::Result<Vec<HostValue>> {
        callable(args)
    }

    fn call_method(
        &self,
        name: &str,
        _args: &[HostValue],
        _expected: usize,
    ) -> anyhow::Result<Vec<HostValue>> {
        anyhow::bail!("no method dispatch available for '{name}'")
    }
}

/// RAII guard pairing `scope_enter` with `scope_exit`.
pub(crate) struct ScopeGuard<'a> {
    runtime: &'a dyn HostRuntime,
}

impl<'a> ScopeGuard<'a> {
    pub(crate) fn enter(runtime: &'a dyn HostRuntime) -> Self {
        runtime.scope_enter();
        Self { runtime }
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.runtime.scope_exit();
    }
}
