use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Song {
    pub mid: String,
    pub name: String,
    pub singers: String,
    #[serde(default)]
    pub vip: bool,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub album_mid: String,
    /// Length in seconds as reported by the search API.
    #[serde(default)]
    pub interval: u64,
    #[serde(default)]
    pub raw_data: Value,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Pagination {
    pub current_page: u32,
    pub has_prev: bool,
    pub has_next: bool,
    pub total_pages: u32,
    pub total_results: u32,
}

#[derive(Deserialize, Clone, Debug)]
pub struct SearchPage {
    #[serde(default)]
    pub results: Vec<Song>,
    pub pagination: Option<Pagination>,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PlayUrl {
    pub url: String,
    pub quality: String,
    #[serde(default)]
    pub song_mid: String,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DownloadTicket {
    pub filename: String,
    pub quality: String,
    #[serde(default)]
    pub filepath: String,
    #[serde(default)]
    pub cached: bool,
    #[serde(default)]
    pub metadata_added: bool,
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct LyricData {
    #[serde(default)]
    pub lyric: String,
    #[serde(default)]
    pub trans: String,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Health {
    pub status: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub music_dir_exists: bool,
    #[serde(default)]
    pub music_files_count: u64,
    #[serde(default)]
    pub environment: String,
}

#[derive(Deserialize)]
pub(crate) struct ErrorBody {
    pub error: String,
}

#[derive(Serialize)]
pub(crate) struct SongRequest<'a> {
    pub song_data: &'a Song,
    pub prefer_flac: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub add_metadata: Option<bool>,
}

#[derive(Serialize)]
pub(crate) struct SearchRequest<'a> {
    pub keyword: &'a str,
    pub page: u32,
}
