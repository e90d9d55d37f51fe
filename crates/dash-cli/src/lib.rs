//! # dash-cli
//!
//! Host application for the dashboard data subsystem.
//!
//! `dashpoll` reads a widget file, mounts one [`dash_data::FetchController`]
//! per widget, and prints a line whenever a widget refreshes successfully.
//! Data comes from the dashboard backend over HTTP ([`HttpFetcher`]) or from
//! simulated integrations ([`DemoFetcher`]).
//!
//! ```text
//! widgets.json ──► Dashboard ──► FetchController × N
//!                     │               │
//!                     │               ▼
//!                     │         RequestCache ──► HttpFetcher / DemoFetcher
//!                     ▼
//!               RefreshRegistry ──► stdout
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod app;
pub mod cli;
pub mod demo;
pub mod error;
pub mod http;
pub mod widgets;

pub use app::{Dashboard, WidgetUpdate, run_loop, stop_signal};
pub use cli::Cli;
pub use demo::DemoFetcher;
pub use error::CliError;
pub use http::HttpFetcher;
pub use widgets::{WidgetFile, WidgetSpec};
