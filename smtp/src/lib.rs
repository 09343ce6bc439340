//! SMTP submission client
//! ===
//!
//! Just enough of RFC 5321 to hand a message to a submission relay: greeting, EHLO, STARTTLS,
//! AUTH, an envelope and DATA. Start at [`client::ClientBuilder`].

#[macro_use]
extern crate derive_builder;
#[macro_use]
extern crate log;

pub mod client;
pub mod codec;
pub mod command;
pub mod error;
pub mod response;

pub use crate::error::{Error, Result};
