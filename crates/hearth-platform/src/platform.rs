//! The [`AnchorPlatform`] trait: the spatial-anchoring service the registry
//! drives but does not own.
//!
//! The platform performs the actual 6-DoF tracking, localization and blob
//! persistence.  From the registry's point of view it offers instantiate,
//! resolve, save and erase, each of which completes *later*.  Every
//! asynchronous result arrives through a [`Completion`], a one-shot channel
//! the platform resolves from its own update step.  The registry checks its
//! completions once per tick with [`poll_completion`]; nothing ever blocks.
//!
//! A completion whose sending half is dropped without a value reads as
//! [`PlatformError::Dropped`], so an abandoned platform operation can never
//! leave the registry waiting on a closed channel.

use hearth_types::{AnchorHandle, AnchorIdentity, HearthError, Pose};
use thiserror::Error;
use tokio::sync::oneshot;

/// Failures reported by the platform.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("platform rejected {operation}: {reason}")]
    Rejected { operation: String, reason: String },
    #[error("platform dropped the operation without a result")]
    Dropped,
    #[error("unknown anchor handle {0}")]
    UnknownHandle(AnchorHandle),
    #[error("anchor {0} is not realized yet")]
    NotRealized(AnchorHandle),
}

impl PlatformError {
    pub fn rejected(operation: &str, reason: impl Into<String>) -> Self {
        Self::Rejected {
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<PlatformError> for HearthError {
    fn from(e: PlatformError) -> Self {
        let operation = match &e {
            PlatformError::Rejected { operation, .. } => operation.clone(),
            _ => "platform".to_string(),
        };
        HearthError::Platform {
            operation,
            details: e.to_string(),
        }
    }
}

/// Deferred result of a platform operation.
pub type Completion<T> = oneshot::Receiver<Result<T, PlatformError>>;

/// Sending half handed to whoever resolves a [`Completion`].
pub type Completer<T> = oneshot::Sender<Result<T, PlatformError>>;

/// A fresh (completer, completion) pair.
pub fn completion<T>() -> (Completer<T>, Completion<T>) {
    oneshot::channel()
}

/// A completion that is already resolved with `result`.
pub fn completed<T>(result: Result<T, PlatformError>) -> Completion<T> {
    let (tx, rx) = oneshot::channel();
    // The receiver is alive right here, so the send cannot fail.
    let _ = tx.send(result);
    rx
}

/// Non-blocking check: `None` while still pending.
pub fn poll_completion<T>(completion: &mut Completion<T>) -> Option<Result<T, PlatformError>> {
    match completion.try_recv() {
        Ok(result) => Some(result),
        Err(oneshot::error::TryRecvError::Empty) => None,
        Err(oneshot::error::TryRecvError::Closed) => Some(Err(PlatformError::Dropped)),
    }
}

/// What the platform reports once an anchor is created or localized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Realized {
    pub identity: AnchorIdentity,
    pub pose: Pose,
}

/// Result of a successful instantiate/resolve request: the handle exists
/// immediately, its identity only once `ready` resolves.
#[derive(Debug)]
pub struct Instantiation {
    pub handle: AnchorHandle,
    pub ready: Completion<Realized>,
}

/// The platform anchor service.
pub trait AnchorPlatform: Send {
    /// Request a new anchor at `pose`.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Rejected`] when the request is refused
    /// outright (no handle is created).
    fn instantiate(&mut self, pose: Pose) -> Result<Instantiation, PlatformError>;

    /// Request a handle for a previously saved anchor and localize it.
    fn resolve(&mut self, identity: AnchorIdentity) -> Result<Instantiation, PlatformError>;

    /// Persist the anchor's platform-side data.
    fn save(&mut self, handle: AnchorHandle) -> Completion<()>;

    /// Erase the anchor's platform-side data.
    fn erase(&mut self, handle: AnchorHandle) -> Completion<()>;

    /// Destroy the in-process object behind `handle`.  Unknown handles are
    /// ignored.
    fn destroy(&mut self, handle: AnchorHandle);

    /// Per-tick pump, called by the registry before it checks completions.
    fn update(&mut self) {}
}
