//! Reference-counted handle on the platform component runtime.
//!
//! On Windows the capture APIs need COM on every thread that touches them.
//! A [`RuntimeContext`] is created once per session and carries the policy;
//! each thread that needs the runtime calls [`RuntimeContext::enter`] and keeps
//! the returned guard alive for as long as it uses platform objects. Dropping
//! the guard balances the initialisation on that same thread.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::CoreResult;

/// How the current thread's runtime was set up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApartmentMode {
    /// The host manages the runtime; nothing was touched.
    HostOwned,

    /// Joined the multithreaded apartment.
    MultiThreaded,

    /// The thread already had a single-threaded apartment; joined it.
    SingleThreaded,

    /// The platform has no component runtime.
    Unmanaged,
}

impl ApartmentMode {
    fn needs_release(self) -> bool {
        matches!(self, Self::MultiThreaded | Self::SingleThreaded)
    }
}

#[derive(Debug)]
struct RuntimeInner {
    host_owned: bool,
    live_guards: AtomicUsize,
}

/// Per-session runtime policy, shared by every thread of the session.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    inner: Arc<RuntimeInner>,
}

impl RuntimeContext {
    pub fn new(host_owned: bool) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                host_owned,
                live_guards: AtomicUsize::new(0),
            }),
        }
    }

    pub fn is_host_owned(&self) -> bool {
        self.inner.host_owned
    }

    /// Number of guards currently alive across all threads.
    pub fn live_guards(&self) -> usize {
        self.inner.live_guards.load(Ordering::Acquire)
    }

    /// Sets up the runtime on the calling thread.
    pub fn enter(&self) -> CoreResult<RuntimeGuard> {
        let mode = if self.inner.host_owned {
            ApartmentMode::HostOwned
        } else {
            initialize_thread()?
        };

        let live = self.inner.live_guards.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(?mode, live, "Entered component runtime");

        Ok(RuntimeGuard {
            mode,
            inner: Arc::clone(&self.inner),
            _thread_bound: PhantomData,
        })
    }
}

/// Keeps the runtime initialised on one thread. Not `Send`: it must be dropped
/// on the thread that created it.
#[derive(Debug)]
pub struct RuntimeGuard {
    mode: ApartmentMode,
    inner: Arc<RuntimeInner>,
    _thread_bound: PhantomData<*const ()>,
}

impl RuntimeGuard {
    pub fn mode(&self) -> ApartmentMode {
        self.mode
    }
}

impl Drop for RuntimeGuard {
    fn drop(&mut self) {
        if self.mode.needs_release() {
            release_thread();
        }
        let live = self.inner.live_guards.fetch_sub(1, Ordering::AcqRel) - 1;
        trace!(mode = ?self.mode, live, "Left component runtime");
    }
}

#[cfg(windows)]
fn initialize_thread() -> CoreResult<ApartmentMode> {
    use crate::error::CoreError;
    use windows::Win32::Foundation::RPC_E_CHANGED_MODE;
    use windows::Win32::System::Com::{
        CoInitializeEx, COINIT_APARTMENTTHREADED, COINIT_MULTITHREADED,
    };

    // S_OK and S_FALSE both count as an initialisation that must be balanced.
    let result = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
    if result.is_ok() {
        return Ok(ApartmentMode::MultiThreaded);
    }

    if result != RPC_E_CHANGED_MODE {
        return Err(CoreError::RuntimeUnavailable(format!(
            "CoInitializeEx failed: {}",
            result.message()
        )));
    }

    debug!("Thread already has a single-threaded apartment, joining it");
    let result = unsafe { CoInitializeEx(None, COINIT_APARTMENTTHREADED) };
    if result.is_ok() {
        Ok(ApartmentMode::SingleThreaded)
    } else {
        Err(CoreError::RuntimeUnavailable(format!(
            "Incompatible threading model on this thread: {}",
            result.message()
        )))
    }
}

#[cfg(windows)]
fn release_thread() {
    unsafe { windows::Win32::System::Com::CoUninitialize() };
}

#[cfg(not(windows))]
fn initialize_thread() -> CoreResult<ApartmentMode> {
    debug!("No component runtime on this platform");
    Ok(ApartmentMode::Unmanaged)
}

#[cfg(not(windows))]
fn release_thread() {}
