//! Readiness poll and wakeup primitives used by the strand driver.
//!
//! [`Poller`] is a thin wrapper over the platform readiness facility
//! (epoll/kqueue via the [polling] crate). Registrations are keyed by a
//! caller-chosen `usize` and armed in oneshot mode: interest delivered by one
//! [`Poller::wait`] must be re-armed with [`Poller::modify`] before the next.
//! The driver re-arms every live endpoint at the top of each cycle, which
//! yields the level-triggered semantics of a rebuild-per-wait `poll(2)` loop.
//!
//! [`WakeHandle`] is the cross-thread half: cloning one out of the poller
//! lets any thread break a concurrent `wait` without marking any
//! registration ready.

#![forbid(unsafe_code)]

use std::{io, os::fd::RawFd, sync::Arc, time::Duration};

pub use polling::Event;

#[cfg(not(unix))]
compile_error!("strand-io only supports unix-family platforms");

/// Waits for OS readiness on a set of registered sockets.
pub struct Poller {
    inner: Arc<polling::Poller>,
}

impl Poller {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            inner: Arc::new(polling::Poller::new()?),
        })
    }

    /// Registers a socket under `interest.key`.
    pub fn add(&self, fd: RawFd, interest: Event) -> io::Result<()> {
        self.inner.add(fd, interest)
    }

    /// Re-arms interest in a registered socket.
    pub fn modify(&self, fd: RawFd, interest: Event) -> io::Result<()> {
        self.inner.modify(fd, interest)
    }

    /// Removes a registration. The descriptor must still be open.
    pub fn delete(&self, fd: RawFd) -> io::Result<()> {
        self.inner.delete(fd)
    }

    /// Blocks until at least one registered socket is ready, the timeout
    /// elapses, or the poller is woken. Delivered events are appended to
    /// `events` after it is cleared; a wakeup produces no event.
    pub fn wait(&self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<usize> {
        events.clear();
        self.inner.wait(events, timeout)
    }

    /// Breaks a concurrent or subsequent [`Poller::wait`].
    pub fn wake(&self) -> io::Result<()> {
        self.inner.notify()
    }

    /// A cloneable, any-thread handle to [`Poller::wake`].
    pub fn wake_handle(&self) -> WakeHandle {
        WakeHandle {
            inner: self.inner.clone(),
        }
    }
}

/// Wakes a [`Poller`] from any thread.
#[derive(Clone)]
pub struct WakeHandle {
    inner: Arc<polling::Poller>,
}

impl WakeHandle {
    pub fn wake(&self) -> io::Result<()> {
        self.inner.notify()
    }
}
