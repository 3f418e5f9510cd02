//! Engine module: storage engine, locking, hashing, path tools, and the CLI front end.

pub mod arg_parser;
pub mod cli;
pub mod db_ops;
pub mod hashing;
pub mod lock;
pub mod progress;
pub mod tools;

// Re-export commonly used functions
pub use arg_parser::Cli;
pub use cli::handle_run;
pub use hashing::{content_hash_hex, hash_file};
pub use lock::FileLock;
pub use tools::{mtime_changed, path_relative_to};
