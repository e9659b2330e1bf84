//! CLI command implementations.
//!
//! | Module    | Commands handled        |
//! |-----------|-------------------------|
//! | `serve`   | `Serve`                 |
//! | `db`      | `InitDb`                |
//! | `config`  | `Config`                |
//! | `summary` | `Summary`               |

pub mod config;
pub mod db;
pub mod serve;
pub mod summary;

pub use config::cmd_config;
pub use db::cmd_init_db;
pub use serve::{ServeOverrides, cmd_serve};
pub use summary::cmd_summary;
