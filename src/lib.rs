//! Panorama mail merge
//! ===
//!
//! Reads a CSV of recipients and placeholder values, fills a plain-text template once per row and
//! sends each result through an SMTP relay. See [`merge::Merger`] for the driver.

#![deny(missing_docs)]

#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate serde;
#[macro_use]
extern crate log;

pub mod config;
pub mod delivery;
pub mod merge;
pub mod message;
pub mod table;
pub mod template;

pub use crate::config::Config;
pub use crate::delivery::{Credentials, DeliveryError, Transport};
pub use crate::merge::{MergeError, MergeState, MergeSummary, Merger};
pub use crate::table::{LoadError, PlaceholderTable};
pub use crate::template::Template;

/// Consumes any error and dumps it to the logger.
pub fn report_err(err: anyhow::Error) {
    error!("error: {:?}", err);
}
