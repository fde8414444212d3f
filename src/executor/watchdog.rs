//! Wall-clock limits on JavaScript execution.
//!
//! A [`Watchdog`] terminates the isolate it was armed on once its deadline passes.
//! A [`KillSwitch`] lets the isolation boundary terminate whatever isolate a worker
//! is currently using, from any thread. [`Overtime`] carries the setup time a worker
//! spends rebooting sandboxes back to the boundary, which extends its outer limit.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use deno_core::v8;
use tracing::trace;

/// Terminates V8 execution on one isolate when a deadline passes.
///
/// Dropping the watchdog disarms it and joins its thread, so the isolate handle is
/// never used after the call it guards has returned.
pub struct Watchdog {
    cancel: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    fired: Arc<AtomicBool>,
}

impl Watchdog {
    /// Start a watchdog thread for `handle`.
    ///
    /// # Errors
    /// Returns the OS error if the watchdog thread cannot be spawned.
    pub fn arm(handle: v8::IsolateHandle, timeout: Duration) -> io::Result<Self> {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let (cancel, cancelled) = mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("litmus-watchdog".to_string())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = cancelled.recv_timeout(timeout) {
                    flag.store(true, Ordering::SeqCst);
                    handle.terminate_execution();
                    trace!(?timeout, "watchdog terminated execution");
                }
            })?;

        Ok(Self {
            cancel: Some(cancel),
            thread: Some(thread),
            fired,
        })
    }

    /// Stop the watchdog and report whether it fired.
    pub fn disarm(mut self) -> bool {
        self.stop();
        self.fired.load(Ordering::SeqCst)
    }

    fn stop(&mut self) {
        // Dropping the sender wakes the thread with `Disconnected`.
        drop(self.cancel.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Shared abort signal between the isolation boundary and one worker.
#[derive(Clone, Default)]
pub struct KillSwitch {
    inner: Arc<KillSwitchInner>,
}

#[derive(Default)]
struct KillSwitchInner {
    tripped: AtomicBool,
    isolate: Mutex<Option<v8::IsolateHandle>>,
}

impl KillSwitch {
    /// Create an untripped switch
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `handle` the isolate terminated by [`trip`](Self::trip).
    ///
    /// Registering on an already tripped switch terminates the isolate at once.
    pub fn register(&self, handle: v8::IsolateHandle) {
        let mut slot = self
            .inner
            .isolate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_tripped() {
            handle.terminate_execution();
        }
        *slot = Some(handle);
    }

    /// Abort the run: terminate the registered isolate and refuse further work.
    pub fn trip(&self) {
        let slot = self
            .inner
            .isolate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.inner.tripped.store(true, Ordering::SeqCst);
        if let Some(handle) = slot.as_ref() {
            handle.terminate_execution();
        }
    }

    /// Whether [`trip`](Self::trip) has been called
    #[must_use]
    pub fn is_tripped(&self) -> bool {
        self.inner.tripped.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for KillSwitch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KillSwitch")
            .field("tripped", &self.is_tripped())
            .finish_non_exhaustive()
    }
}

/// Time a run has earned on top of its outer limit.
///
/// Every sandbox reboot after an interrupted test repeats the solution's setup,
/// which the outer limit only budgets once.
#[derive(Clone, Default)]
pub struct Overtime {
    granted_ms: Arc<AtomicU64>,
    relay: Option<Arc<dyn Fn(u64) + Send + Sync>>,
}

impl Overtime {
    /// Create an empty ledger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ledger that also hands every grant to `relay`
    #[must_use]
    pub fn relayed(relay: impl Fn(u64) + Send + Sync + 'static) -> Self {
        Self {
            granted_ms: Arc::default(),
            relay: Some(Arc::new(relay)),
        }
    }

    /// Record `ms` of extra time
    pub fn grant(&self, ms: u64) {
        self.granted_ms.fetch_add(ms, Ordering::SeqCst);
        if let Some(relay) = &self.relay {
            relay(ms);
        }
    }

    /// Total time granted so far, in milliseconds
    #[must_use]
    pub fn granted_ms(&self) -> u64 {
        self.granted_ms.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Overtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Overtime")
            .field("granted_ms", &self.granted_ms())
            .finish_non_exhaustive()
    }
}
