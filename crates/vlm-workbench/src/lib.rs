//! Terminal front-end and HTTP client for the teacher/student workbench.
//!
//! - [`config`]: layered settings (defaults, TOML, env, CLI).
//! - [`http`]: [`HttpBackend`], the reqwest implementation of
//!   [`vlm_session::Backend`].
//! - [`health`]: background health polling.
//! - [`repl`]: the interactive command loop and panel rendering.

pub mod config;
pub mod health;
pub mod http;
pub mod repl;

pub use config::{WorkbenchConfig, DEFAULT_PROMPT};
pub use health::HealthMonitor;
pub use http::HttpBackend;
pub use repl::{parse_command, render_snapshot, Command, CommandError, Repl};
