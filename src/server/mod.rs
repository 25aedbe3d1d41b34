//! Connection acceptance and dispatch.

pub mod dispatch;
pub mod listener;

pub use dispatch::{DispatchLoop, TERMINATE_LITERAL};
pub use listener::{Listener, StreamListener};
