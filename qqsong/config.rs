use crate::error::App;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: Server,
    pub player: Player,
    pub log: Log,
    pub download: Download,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Server {
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaBackend {
    Command,
    Gstreamer,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Player {
    pub backend: MediaBackend,
    /// Program and arguments used by the command backend; `{url}` is
    /// replaced by the stream URL and `{volume}` by the volume in percent.
    pub command: Vec<String>,
    pub prefer_flac: bool,
    pub retry_delay_ms: u64,
    /// Starting volume in percent.
    pub volume: u8,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Log {
    pub level: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Download {
    pub music_dir: Option<PathBuf>,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:6022".to_string(),
            timeout_secs: 60,
        }
    }
}

impl Default for Player {
    fn default() -> Self {
        Self {
            backend: MediaBackend::Command,
            command: [
                "mpv",
                "--no-video",
                "--really-quiet",
                "--volume={volume}",
                "{url}",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            prefer_flac: true,
            retry_delay_ms: 500,
            volume: 100,
        }
    }
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: Server::default(),
            player: Player::default(),
            log: Log::default(),
            download: Download::default(),
        }
    }
}

impl Config {
    /// Reads the config file, writing the defaults out first when it does
    /// not exist yet.
    pub async fn load_or_create(path: &Path) -> Result<Self, App> {
        if !path.exists() {
            let config = Config::default();
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(path, toml::to_string(&config)?).await?;
            log::info!("Wrote default config to {}", path.display());
            return Ok(config);
        }
        let content = fs::read_to_string(path).await?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), App> {
        if !self.server.base_url.starts_with("http://")
            && !self.server.base_url.starts_with("https://")
        {
            return Err(App::Config(format!(
                "server.base_url must be an http(s) URL, got {}",
                self.server.base_url
            )));
        }
        if self.player.backend == MediaBackend::Command
            && !self.player.command.iter().any(|arg| arg.contains("{url}"))
        {
            return Err(App::Config(
                "player.command must contain a {url} placeholder".to_string(),
            ));
        }
        if self.player.volume > 100 {
            return Err(App::Config(format!(
                "player.volume must be between 0 and 100, got {}",
                self.player.volume
            )));
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.player.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.timeout_secs)
    }

    pub fn volume(&self) -> f64 {
        f64::from(self.player.volume) / 100.0
    }

    pub fn music_dir(&self, home_dir: &str) -> PathBuf {
        self.download
            .music_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{home_dir}/Music/qqsong")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        let config = Config::load_or_create(&path).await.unwrap();

        assert_eq!(config, Config::default());
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("base_url"));
        // The file we just wrote must read back identically.
        assert_eq!(Config::load_or_create(&path).await.unwrap(), config);
    }

    #[tokio::test]
    async fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[server]\nbase_url = \"https://music.example\"\n[player]\nprefer_flac = false\n",
        )
        .unwrap();

        let config = Config::load_or_create(&path).await.unwrap();

        assert_eq!(config.server.base_url, "https://music.example");
        assert_eq!(config.server.timeout_secs, 60);
        assert!(!config.player.prefer_flac);
        assert_eq!(config.retry_delay(), Duration::from_millis(500));
        assert_eq!(config.log.level, "info");
    }

    #[tokio::test]
    async fn command_without_placeholder_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[player]\ncommand = [\"mpv\"]\n").unwrap();

        let err = Config::load_or_create(&path).await.unwrap_err();
        assert!(matches!(err, App::Config(_)));
    }

    #[tokio::test]
    async fn bare_sections_take_their_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[download]\n[player]\nvolume = 40\n").unwrap();

        let config = Config::load_or_create(&path).await.unwrap();

        assert_eq!(config.download, Download::default());
        assert_eq!(config.download.music_dir, None);
        assert!((config.volume() - 0.4).abs() < f64::EPSILON);
        assert_eq!(config.player.command, Player::default().command);
    }

    #[tokio::test]
    async fn volume_above_full_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[player]\nvolume = 150\n").unwrap();

        let err = Config::load_or_create(&path).await.unwrap_err();
        assert!(matches!(err, App::Config(_)));
    }

    #[test]
    fn music_dir_defaults_under_home() {
        let config = Config::default();
        assert_eq!(
            config.music_dir("/home/rose"),
            PathBuf::from("/home/rose/Music/qqsong")
        );
    }
}
