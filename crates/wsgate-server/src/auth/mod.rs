//! Request authentication against the process token authority.

pub mod session;

pub use session::{authenticate, Session};
