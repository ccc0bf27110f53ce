use std::{
    future::Future,
    io,
    pin::Pin,
    task::{Context, Poll},
};

use futures::FutureExt;
use tokio::signal::unix::{Signal, SignalKind};
use tracing::debug;

/// Resolves on the first SIGINT or SIGTERM.
pub struct ShutdownSignal {
    /// SIGINT listener
    ctrl_c: Pin<Box<dyn Future<Output = io::Result<()>> + Send>>,
    /// SIGTERM listener
    term_signal: Signal,
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal").finish_non_exhaustive()
    }
}

impl ShutdownSignal {
    /// Install the SIGINT and SIGTERM listeners.
    pub fn new() -> io::Result<Self> {
        let ctrl_c = Box::pin(tokio::signal::ctrl_c());
        let term_signal = tokio::signal::unix::signal(SignalKind::terminate())?;

        Ok(Self { ctrl_c, term_signal })
    }
}

impl Future for ShutdownSignal {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.ctrl_c.poll_unpin(cx).is_ready() {
            debug!("Received SIGINT signal");
            return Poll::Ready(());
        }

        if this.term_signal.poll_recv(cx).is_ready() {
            debug!("Received SIGTERM signal");
            return Poll::Ready(());
        }

        Poll::Pending
    }
}

/// Run a future until a shutdown signal is received, then call `on_shutdown` and exit.
pub async fn run_until_shutdown<F, O, C>(fut: F, shutdown: ShutdownSignal, on_shutdown: C) -> O
where
    F: Future<Output = O>,
    C: FnOnce(),
{
    tokio::select! {
        // NOTE: wrap with a `Box` so we don't allocate a
        // huge future state machine on the stack.
        result = Box::pin(fut) => result,
        _ = shutdown => {
            on_shutdown();
            std::process::exit(0);
        }
    }
}
