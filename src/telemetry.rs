//! Request-scoped tracing context and span constructors.

use tracing::Span;

/// Request-scoped context threaded through every dispatch.
///
/// Carries only a tracing span; it never cancels or shortens a dispatch.
#[derive(Debug, Clone)]
pub struct SyncContext {
    span: Span,
}

impl SyncContext {
    pub fn new(span: Span) -> Self {
        Self { span }
    }

    /// Context attached to whatever span is current on this thread.
    pub fn current() -> Self {
        Self::new(Span::current())
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Run `f` inside this context's span.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        self.span.in_scope(f)
    }
}

impl Default for SyncContext {
    fn default() -> Self {
        Self::new(Span::none())
    }
}

/// Standardized span constructors.
pub mod spans {
    use tracing::{Span, debug_span, info_span};

    /// Span for one upstream poller feeding the dispatcher.
    pub fn poller(name: &str) -> Span {
        info_span!("poller", name = %name)
    }

    /// Span for a single dispatch operation, nested under the caller's context.
    pub fn dispatch(parent: &Span, kind: &'static str, room_id: &str) -> Span {
        debug_span!(parent: parent, "dispatch", kind = kind, room = %room_id)
    }
}
