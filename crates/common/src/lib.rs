//! Types shared by the identity crates and the CLI

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
