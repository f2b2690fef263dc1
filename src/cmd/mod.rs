//! CLI command implementations.
//!
//! | Module     | Commands handled |
//! |------------|------------------|
//! | `serve`    | `Serve`          |
//! | `init`     | `Init`           |
//! | `board`    | `Board`          |
//! | `activity` | `Activity`       |
//! | `config`   | `Config`         |

pub mod activity;
pub mod board;
pub mod config;
pub mod init;
pub mod serve;

pub use activity::cmd_activity;
pub use board::cmd_board;
pub use config::{cmd_config, load_config};
pub use init::cmd_init;
pub use serve::cmd_serve;
