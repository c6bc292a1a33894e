//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the process subscriber (binary only)
//! - Carry an explicit logger into server components
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - The library never installs a global subscriber; `start` captures the
//!   caller's dispatcher and every acceptor/worker task runs under it
//! - Log level configurable via config and environment

use std::future::Future;
use tracing::instrument::{Instrument, Instrumented, WithDispatch, WithSubscriber};
use tracing::{Dispatch, Span};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logger handed to each server component.
///
/// Threads owned by the server do not inherit the caller's thread-local
/// subscriber, so the dispatcher travels with the work instead.
#[derive(Clone, Debug)]
pub struct Logger {
    dispatch: Dispatch,
    span: Span,
}

impl Logger {
    /// Capture the dispatcher active on the calling thread.
    pub fn capture(port: u16) -> Self {
        let dispatch = tracing::dispatcher::get_default(Dispatch::clone);
        let span = tracing::dispatcher::with_default(&dispatch, || {
            tracing::info_span!("mock_server", port)
        });
        Self { dispatch, span }
    }

    /// Run a synchronous section under this logger.
    pub fn scope<R>(&self, f: impl FnOnce() -> R) -> R {
        tracing::dispatcher::with_default(&self.dispatch, || self.span.in_scope(f))
    }

    /// Attach this logger to a future that will run on another thread.
    pub fn wrap<F: Future>(&self, fut: F) -> WithDispatch<Instrumented<F>> {
        fut.instrument(self.span.clone())
            .with_subscriber(self.dispatch.clone())
    }
}

/// Install the fmt subscriber for the binary. `RUST_LOG` wins over `default_level`.
pub fn init(default_level: &str) {
    let fallback = format!("karate_mock_server={0},mock_server={0}", default_level);
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback.into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tracing::subscriber::Subscriber;

    #[derive(Clone, Default)]
    struct Counter(Arc<Mutex<usize>>);

    impl Subscriber for Counter {
        fn enabled(&self, _: &tracing::Metadata<'_>) -> bool {
            true
        }
        fn new_span(&self, _: &tracing::span::Attributes<'_>) -> tracing::span::Id {
            tracing::span::Id::from_u64(1)
        }
        fn record(&self, _: &tracing::span::Id, _: &tracing::span::Record<'_>) {}
        fn record_follows_from(&self, _: &tracing::span::Id, _: &tracing::span::Id) {}
        fn event(&self, _: &tracing::Event<'_>) {
            *self.0.lock().unwrap() += 1;
        }
        fn enter(&self, _: &tracing::span::Id) {}
        fn exit(&self, _: &tracing::span::Id) {}
    }

    #[test]
    fn scope_reaches_captured_subscriber_from_another_thread() {
        let counter = Counter::default();
        let logger = tracing::subscriber::with_default(counter.clone(), || Logger::capture(0));

        std::thread::spawn(move || logger.scope(|| tracing::info!("from worker")))
            .join()
            .unwrap();

        assert_eq!(*counter.0.lock().unwrap(), 1);
    }
}
