use crate::api::{DownloadTicket, Song};
use crate::error::PlayError;
use crate::player::status::Level;
use crate::player::{Controller, Quality, StatusSink};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::time::sleep;

/// Saves songs from the current result set into the music directory.
pub struct Downloader {
    controller: Controller,
    status: Arc<dyn StatusSink>,
    music_dir: PathBuf,
    retry_delay: Duration,
}

impl Downloader {
    pub fn new(
        controller: Controller,
        status: Arc<dyn StatusSink>,
        music_dir: PathBuf,
        retry_delay: Duration,
    ) -> Self {
        Self {
            controller,
            status,
            music_dir,
            retry_delay,
        }
    }

    /// Downloads the song at `index` in the controller's quality and returns
    /// where it was written. A failed FLAC download is retried once as MP3,
    /// which also lowers the player's quality.
    pub async fn download(&self, index: usize) -> Result<PathBuf, PlayError> {
        let song = self.controller.song(index)?;
        let quality = self.controller.quality();

        let saved = match self.fetch(&song, quality).await {
            Err(error) if quality == Quality::Flac && error.allows_quality_fallback() => {
                warn!("FLAC download of {} failed: {error}", song.mid);
                self.status.notify(Level::Warning, "FLAC音质不可用，尝试MP3音质");
                self.controller.lower_quality();
                sleep(self.retry_delay).await;
                self.fetch(&song, Quality::Standard).await
            }
            other => other,
        };
        saved.inspect(|path| {
            self.status
                .notify(Level::Success, &format!("已下载: {}", song.name));
            info!("Saved {} to {}", song.mid, path.display());
        })
    }

    async fn fetch(&self, song: &Song, quality: Quality) -> Result<PathBuf, PlayError> {
        let backend = self.controller.backend();
        let ticket = backend.download(song, quality.prefer_flac()).await?;
        let dest = self.destination(&ticket)?;
        fs::create_dir_all(&self.music_dir)
            .await
            .map_err(|e| PlayError::Network(format!("无法创建目录: {e}")))?;
        let written = backend.fetch_file(&ticket.filename, &dest).await?;
        info!(
            "Fetched {} ({} bytes, {}, cached={})",
            ticket.filename, written, ticket.quality, ticket.cached
        );
        Ok(dest)
    }

    /// Only the final component of the backend's filename is trusted.
    fn destination(&self, ticket: &DownloadTicket) -> Result<PathBuf, PlayError> {
        Path::new(&ticket.filename)
            .file_name()
            .map(|name| self.music_dir.join(name))
            .ok_or_else(|| PlayError::Network(format!("无效的文件名: {}", ticket.filename)))
    }
}
