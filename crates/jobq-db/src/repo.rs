//! Repository traits and implementations.

pub mod control;
pub mod job;
pub mod settings;
pub mod worker;

pub use control::{ControlRepo, SqliteControlRepo};
pub use job::{JobRepo, SqliteJobRepo};
pub use settings::{SettingsRepo, SqliteSettingsRepo};
pub use worker::{SqliteWorkerRepo, WorkerRepo};
