//! Query string codec.
//!
//! Converts between [`EncodeTask`](crate::task::EncodeTask) and the flat,
//! flag-based command line the engine understands. The two directions are
//! inverse up to [`EncodeTask::normalized`](crate::task::EncodeTask::normalized).

mod args;
mod generate;
mod parse;

pub use args::{quote_arg, quote_if_needed, split_args};
pub use generate::{generate_query, generate_query_with, QueryOptions};
pub use parse::parse_query;
