//! Bundled [`Transport`][crate::Transport] implementation.
mod socket;

pub use socket::{Socket, Stream};
