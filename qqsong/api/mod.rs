pub mod client;
pub mod models;

pub use client::{Backend, HttpBackend};
pub use models::{DownloadTicket, Health, LyricData, Pagination, PlayUrl, SearchPage, Song};
