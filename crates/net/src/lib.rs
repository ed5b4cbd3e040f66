#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Download layer feeding the patch-and-install pipeline
//!
//! Streams archives to disk with retry, EMA-smoothed speed reporting,
//! and integrity validation before a file is reported usable. Partial
//! destination files never survive a failed or cancelled download.

mod client;
mod download;

pub use client::{NetClient, NetConfig};
pub use download::{DownloadConfig, DownloadResult, Downloader};
