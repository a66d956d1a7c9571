//! Job admission and dispatch layer: Concurrency Ledger, Admission
//! Controller, Dispatcher, Drainer, Wait Coordinator and Notification Gate.

pub mod admission;
pub mod blob_store;
pub mod config;
pub mod directory;
pub mod dispatcher;
pub mod drainer;
pub mod error;
pub mod ledger;
pub mod notify;
pub mod types;
pub mod wait;
pub mod worker_queue;

pub use admission::AdmissionController;
pub use config::Config;
pub use dispatcher::Dispatcher;
pub use drainer::{DrainTrigger, Drainer};
pub use notify::NotificationGate;
pub use wait::WaitCoordinator;
