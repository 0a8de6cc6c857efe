//! CLI command implementations.
//!
//! Each submodule owns one `Commands` variant:
//!
//! | Module  | Commands handled                          |
//! |---------|-------------------------------------------|
//! | `serve` | `Serve`                                   |
//! | `cache` | `Cache` (`info`, `clear-expired`, `delete`) |
//! | `name`  | `Name`                                    |

pub mod cache;
pub mod name;
pub mod serve;

pub use cache::cmd_cache;
pub use name::cmd_name;
pub use serve::cmd_serve;
