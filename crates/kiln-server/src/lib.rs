#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]

//! Network and process surface of the kiln dev server.
//!
//! A [`DevInstance`] owns one listener, one HMR throttle and one project
//! watcher. The [`Supervisor`] watches the config files and either swaps
//! settings into the running instance or tears it down and starts a new one.
//! Requests under a configured proxy prefix are forwarded upstream instead
//! of reaching the module pipeline.

pub mod error;
pub mod instance;
pub mod proxy;
pub mod routes;
pub mod supervisor;
pub mod watcher;

pub use error::ServerError;
pub use instance::DevInstance;
pub use supervisor::{Lifecycle, Supervisor, SupervisorOptions};
