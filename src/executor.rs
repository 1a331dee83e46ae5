//! The single worker thread every native call runs on.
//!
//! wkhtmltox keeps thread-affine state (it drives a Qt application object),
//! so all calls into it are funnelled through one dedicated thread. Any
//! number of application threads may submit work; tasks run one at a time in
//! submission order and each caller blocks until its own task is done.

use crate::native::{Kind, NativeLibrary};
use crate::progress::panic_message;
use crate::{loader, Error, Result};
use log::{debug, error};
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;

type Job = Box<dyn FnOnce(&mut Session) + Send>;

static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    // Id of the executor whose worker is the current thread, 0 elsewhere.
    static CURRENT_WORKER: Cell<usize> = const { Cell::new(0) };
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum InitState {
    Uninitialized,
    Ready,
    Failed(String),
}

/// The worker's view of the native library, handed to every task.
///
/// Owns the per-kind initialization state; since only the worker thread
/// ever holds a `Session`, no locking is involved.
pub struct Session {
    library: Arc<dyn NativeLibrary>,
    pdf: InitState,
    image: InitState,
}

impl Session {
    fn new(library: Arc<dyn NativeLibrary>) -> Self {
        Self {
            library,
            pdf: InitState::Uninitialized,
            image: InitState::Uninitialized,
        }
    }

    pub fn library(&self) -> &dyn NativeLibrary {
        self.library.as_ref()
    }

    /// Run the native `*_init` for `kind` the first time it is needed.
    ///
    /// There is no matching teardown: once initialized, a kind stays
    /// initialized for the life of the process. A failed init is not retried.
    pub fn ensure_initialized(&mut self, kind: Kind) -> Result<()> {
        let state = match kind {
            Kind::Pdf => &mut self.pdf,
            Kind::Image => &mut self.image,
        };
        match state {
            InitState::Ready => Ok(()),
            InitState::Failed(reason) => Err(Error::InitializationError(reason.clone())),
            InitState::Uninitialized => {
                debug!("Initializing {}", kind);
                if self.library.init(kind, false) {
                    *state = InitState::Ready;
                    Ok(())
                } else {
                    let reason = format!("{}_init returned failure", kind);
                    *state = InitState::Failed(reason.clone());
                    Err(Error::InitializationError(reason))
                }
            }
        }
    }
}

/// Handle to a worker thread; cheap to clone, all clones share the worker.
///
/// The worker exits once every handle is dropped. It never keeps the process
/// alive on its own.
#[derive(Clone)]
pub struct Executor {
    id: usize,
    tx: Sender<Job>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor").field("id", &self.id).finish_non_exhaustive()
    }
}

impl Executor {
    /// Spawn a worker that owns `library`.
    ///
    /// One library instance must only ever be driven by one executor; the
    /// real library is reached through [`Executor::global`].
    pub fn new(library: Arc<dyn NativeLibrary>) -> Result<Self> {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel::<Job>();
        thread::Builder::new()
            .name("wkhtmltox-worker".to_string())
            .spawn(move || {
                CURRENT_WORKER.with(|w| w.set(id));
                let mut session = Session::new(library);
                while let Ok(job) = rx.recv() {
                    job(&mut session);
                }
                debug!("wkhtmltox worker shutting down");
            })
            .map_err(|e| Error::ExecutionError(format!("Failed to spawn worker thread: {}", e)))?;
        Ok(Self { id, tx })
    }

    /// The process-wide executor over the real native library, created on
    /// first use. Load failures are permanent.
    pub fn global() -> Result<&'static Executor> {
        static GLOBAL: OnceLock<Result<Executor>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| {
                let library = loader::load()?;
                Executor::new(library)
            })
            .as_ref()
            .map_err(Error::replay)
    }

    /// Run `task` on the worker and wait for its result.
    ///
    /// Errors returned by the task come back unchanged. A panicking task is
    /// reported as [`Error::ExecutionError`]; the worker keeps serving the
    /// tasks queued behind it. Calling this from a task running on the same
    /// executor fails with [`Error::ExecutionError`].
    pub fn run<T, F>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Session) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if CURRENT_WORKER.with(Cell::get) == self.id {
            return Err(Error::ExecutionError(
                "run() called from the worker thread would deadlock".to_string(),
            ));
        }

        let (resp_tx, resp_rx) = mpsc::channel::<Result<T>>();
        let job: Job = Box::new(move |session| {
            let res = panic::catch_unwind(AssertUnwindSafe(|| task(session))).unwrap_or_else(|payload| {
                let msg = panic_message(payload.as_ref());
                error!("wkhtmltox task panicked: {}", msg);
                Err(Error::ExecutionError(format!("task panicked: {}", msg)))
            });
            let _ = resp_tx.send(res);
        });

        self.tx
            .send(job)
            .map_err(|_| Error::ExecutionError("worker thread is not running".to_string()))?;
        resp_rx
            .recv()
            .map_err(|_| Error::ExecutionError("worker dropped the task before replying".to_string()))?
    }
}
