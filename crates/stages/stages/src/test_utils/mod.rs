#![allow(missing_docs)]

mod chain;
mod downloader;

pub use chain::{TestChain, BENEFICIARY};
pub use downloader::TestDownloader;
