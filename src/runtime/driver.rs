/*!
 * Driver Thread & Scheduler Seam
 *
 * The selected backend runs on one dedicated driver thread and executes
 * only portal-submitted operation futures, never user code. Facilities see
 * the backend through the narrow [`Scheduler`] seam: a timer and descriptor
 * readiness. Everything else the primitives need (`tokio::sync` channels,
 * mutexes, cancellation tokens) is executor-agnostic and shared by both
 * backends.
 */

use crate::core::{Error, Result};
use crate::runtime::Backend;
use futures::future::BoxFuture;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::io;
use std::os::fd::{BorrowedFd, RawFd};
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Boxed operation future as shipped to the driver.
pub(crate) type OpFuture = BoxFuture<'static, ()>;

pub(crate) enum DriverMsg {
    Submit(OpFuture),
    Shutdown,
}

/// The cooperative scheduler primitives consumed by the emulation layer.
///
/// Implementations construct backend resources lazily inside the returned
/// future so registration happens on the driver thread, where the backend
/// context is current.
pub(crate) trait Scheduler: Send + Sync {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
    fn wait_readable(&self, fd: RawFd) -> BoxFuture<'static, io::Result<()>>;
    fn wait_writable(&self, fd: RawFd) -> BoxFuture<'static, io::Result<()>>;
}

/// Handle to the driver thread: op submission plus shutdown.
pub(crate) struct DriverHandle {
    tx: mpsc::UnboundedSender<DriverMsg>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl DriverHandle {
    pub(crate) fn submit(&self, op: OpFuture) -> Result<()> {
        self.tx
            .send(DriverMsg::Submit(op))
            .map_err(|_| Error::NotInitialized)
    }

    /// Stop the driver loop and join its thread. In-flight operations are
    /// dropped; their callers observe cancellation.
    pub(crate) fn shutdown(&self) {
        if self.tx.send(DriverMsg::Shutdown).is_err() {
            debug!("Driver already stopped");
        }
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                warn!("Driver thread panicked during shutdown");
            }
        }
    }
}

/// Start the selected backend on a dedicated driver thread.
pub(crate) fn start(backend: Backend) -> Result<(DriverHandle, Arc<dyn Scheduler>)> {
    let (tx, rx) = mpsc::unbounded_channel();

    let thread = match backend {
        Backend::Tokio => {
            // Built here so a failure surfaces from setup() rather than
            // killing the driver thread.
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .thread_name("threadmill-tokio")
                .build()?;
            std::thread::Builder::new()
                .name("threadmill-driver".to_string())
                .spawn(move || tokio_driver_loop(rt, rx))?
        }
        Backend::Smol => std::thread::Builder::new()
            .name("threadmill-driver".to_string())
            .spawn(move || smol_driver_loop(rx))?,
    };

    info!("Driver started (backend: {})", backend);

    let scheduler: Arc<dyn Scheduler> = match backend {
        Backend::Tokio => Arc::new(TokioScheduler),
        Backend::Smol => Arc::new(SmolScheduler),
    };

    let handle = DriverHandle {
        tx,
        thread: Mutex::new(Some(thread)),
    };
    Ok((handle, scheduler))
}

fn tokio_driver_loop(rt: tokio::runtime::Runtime, mut rx: mpsc::UnboundedReceiver<DriverMsg>) {
    rt.block_on(async move {
        while let Some(msg) = rx.recv().await {
            match msg {
                DriverMsg::Submit(op) => {
                    tokio::spawn(op);
                }
                DriverMsg::Shutdown => break,
            }
        }
    });
    debug!("Tokio driver loop exited");
}

fn smol_driver_loop(mut rx: mpsc::UnboundedReceiver<DriverMsg>) {
    let executor = Arc::new(async_executor::Executor::new());
    let inner = executor.clone();
    futures::executor::block_on(executor.run(async move {
        while let Some(msg) = rx.recv().await {
            match msg {
                DriverMsg::Submit(op) => {
                    inner.spawn(op).detach();
                }
                DriverMsg::Shutdown => break,
            }
        }
    }));
    debug!("Smol driver loop exited");
}

// ============================================================================
// Backend implementations
// ============================================================================

/// Wrapper handing a raw descriptor to tokio's `AsyncFd`.
struct FdWatch(RawFd);

impl AsRawFd for FdWatch {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            tokio::time::sleep(duration).await;
        })
    }

    fn wait_readable(&self, fd: RawFd) -> BoxFuture<'static, io::Result<()>> {
        Box::pin(async move {
            let afd = tokio::io::unix::AsyncFd::with_interest(
                FdWatch(fd),
                tokio::io::Interest::READABLE,
            )?;
            afd.readable().await?;
            Ok(())
        })
    }

    fn wait_writable(&self, fd: RawFd) -> BoxFuture<'static, io::Result<()>> {
        Box::pin(async move {
            let afd = tokio::io::unix::AsyncFd::with_interest(
                FdWatch(fd),
                tokio::io::Interest::WRITABLE,
            )?;
            afd.writable().await?;
            Ok(())
        })
    }
}

struct SmolScheduler;

impl SmolScheduler {
    fn watch(fd: RawFd) -> io::Result<async_io::Async<BorrowedFd<'static>>> {
        if fd < 0 {
            return Err(io::Error::from_raw_os_error(nix::errno::Errno::EBADF as i32));
        }
        // SAFETY: the caller of the blocking facility keeps the descriptor
        // open for the duration of the wait; the watch deregisters on drop
        // and never closes the descriptor.
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        async_io::Async::new(borrowed)
    }
}

impl Scheduler for SmolScheduler {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            async_io::Timer::after(duration).await;
        })
    }

    fn wait_readable(&self, fd: RawFd) -> BoxFuture<'static, io::Result<()>> {
        Box::pin(async move {
            let watch = Self::watch(fd)?;
            watch.readable().await
        })
    }

    fn wait_writable(&self, fd: RawFd) -> BoxFuture<'static, io::Result<()>> {
        Box::pin(async move {
            let watch = Self::watch(fd)?;
            watch.writable().await
        })
    }
}
