//! CLI command implementations.
//!
//! | Module    | Commands handled              |
//! |-----------|-------------------------------|
//! | `project` | `Init`                        |
//! | `run`     | `Run`                         |
//! | `phase`   | `Status`, `Reset`, `Log`      |
//! | `config`  | `Config`                      |

pub mod config;
pub mod phase;
pub mod project;
pub mod run;

pub use config::cmd_config;
pub use phase::{cmd_log, cmd_reset, cmd_status};
pub use project::cmd_init;
pub use run::cmd_run;
