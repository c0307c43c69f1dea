//! Hand-off from the capture loop to the single writer of the history store.

pub mod notifier;
mod queue;
mod worker;

pub use notifier::{follow_history, Notifier, StoreChange};
pub use queue::EventQueue;
pub use worker::{PersistenceWorker, ShutdownMode, WorkerReport};
