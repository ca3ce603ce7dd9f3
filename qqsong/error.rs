use flexi_logger::FlexiLoggerError;
use std::io;
use thiserror::Error;
use zbus::Error as ZbusError;

#[derive(Error, Debug, Clone)]
pub enum App {
    #[error("Network error: {0}")]
    Network(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("TOML parsing error: {0}")]
    TomlParsing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logger initialization error: {0}")]
    Logger(String),

    #[error("Media backend error: {0}")]
    Media(String),

    #[error("ZBus error: {0}")]
    ZBus(String),
}

/// Why a playback session (or a download) failed.
///
/// A superseded session is not a failure and never produces one of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlayError {
    #[error("无效的歌曲索引: {0}")]
    InvalidIndex(usize),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("这首歌是VIP歌曲，需要登录才能播放")]
    EntitlementRequired,

    #[error("播放失败: {0}")]
    Playback(String),
}

impl PlayError {
    /// Only network failures on the high quality path are worth retrying
    /// at standard quality.
    pub fn allows_quality_fallback(&self) -> bool {
        matches!(self, PlayError::Network(_))
    }
}

impl From<reqwest::Error> for PlayError {
    fn from(error: reqwest::Error) -> Self {
        PlayError::Network(error.to_string())
    }
}

impl From<reqwest::Error> for App {
    fn from(error: reqwest::Error) -> Self {
        App::Network(error.to_string())
    }
}

impl From<io::Error> for App {
    fn from(error: io::Error) -> Self {
        App::Io(error.to_string())
    }
}

impl From<toml::de::Error> for App {
    fn from(error: toml::de::Error) -> Self {
        App::TomlParsing(error.to_string())
    }
}

impl From<toml::ser::Error> for App {
    fn from(error: toml::ser::Error) -> Self {
        App::TomlParsing(error.to_string())
    }
}

impl From<FlexiLoggerError> for App {
    fn from(error: FlexiLoggerError) -> Self {
        App::Logger(error.to_string())
    }
}

impl From<ZbusError> for App {
    fn from(error: ZbusError) -> Self {
        App::ZBus(error.to_string())
    }
}

impl From<PlayError> for App {
    fn from(error: PlayError) -> Self {
        match error {
            PlayError::Network(msg) => App::Network(msg),
            other => App::Media(other.to_string()),
        }
    }
}

