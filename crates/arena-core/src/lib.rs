//! # Arena Core
//!
//! Domain types and pure rules for the Bloblet Arena economy.
//!
//! Nothing in this crate touches storage. The server crate owns transactions
//! and row locks; this crate decides what a charge does to a care state, how
//! a battle resolves from a set of random draws, and how money is rounded.

pub mod care;
pub mod combat;
pub mod error;
pub mod models;
pub mod money;

pub use care::*;
pub use combat::*;
pub use error::*;
pub use models::*;
pub use money::*;
