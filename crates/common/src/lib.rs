//! Types shared by the broker crates and the server binary

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
