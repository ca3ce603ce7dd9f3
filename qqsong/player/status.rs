use crate::api::Song;
use crate::error::PlayError;
use crate::lyrics::Lyrics;
use crate::player::results::format_duration;
use log::{error, info, warn};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Success,
    Warning,
    Error,
}

/// What the user sees of the player. The controller only ever calls this
/// on behalf of the latest session.
pub trait StatusSink: Send + Sync {
    fn loading(&self, song: &Song);

    fn playing(&self, song: &Song, quality: &str);

    fn paused(&self, song: &Song);

    fn duration(&self, duration: Duration);

    fn lyrics(&self, lyrics: Lyrics);

    fn failed(&self, error: &PlayError);

    fn idle(&self);

    fn notify(&self, level: Level, message: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Idle,
    Loading,
    Playing,
    Paused,
    Failed,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub transport: Transport,
    pub song: Option<Song>,
    pub quality: Option<String>,
    pub duration: Option<Duration>,
    pub message: Option<(Level, String)>,
    pub lyrics: Lyrics,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            transport: Transport::Idle,
            song: None,
            quality: None,
            duration: None,
            message: None,
            lyrics: Lyrics::default(),
        }
    }
}

impl Snapshot {
    /// One line describing the transport, as printed by `qsg status`.
    pub fn render(&self, position: Option<Duration>) -> String {
        let Some(song) = &self.song else {
            return match &self.message {
                Some((_, message)) => format!("未在播放\n{message}"),
                None => "未在播放".to_string(),
            };
        };
        let state = match self.transport {
            Transport::Idle => "已停止",
            Transport::Loading => "加载中",
            Transport::Playing => "正在播放",
            Transport::Paused => "已暂停",
            Transport::Failed => "播放失败",
        };
        let total = self
            .duration
            .map_or(song.interval, |duration| duration.as_secs());
        let elapsed = position.map_or(0, |position| position.as_secs());
        let quality = self
            .quality
            .as_deref()
            .map(|quality| format!(" ({quality})"))
            .unwrap_or_default();
        let mut line = format!(
            "{state}: {} - {}{quality} [{} / {}]",
            song.name,
            song.singers,
            format_duration(elapsed),
            format_duration(total)
        );
        if let Some((_, message)) = &self.message {
            line.push('\n');
            line.push_str(message);
        }
        line
    }
}

/// The daemon's status sink: remembers the latest state for D-Bus queries
/// and writes every change to the log.
#[derive(Default)]
pub struct StatusBoard {
    snapshot: Mutex<Snapshot>,
}

impl StatusBoard {
    pub fn snapshot(&self) -> Snapshot {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Snapshot> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StatusSink for StatusBoard {
    fn loading(&self, song: &Song) {
        info!("Loading {} - {}", song.name, song.singers);
        let mut snapshot = self.lock();
        *snapshot = Snapshot {
            transport: Transport::Loading,
            song: Some(song.clone()),
            ..Snapshot::default()
        };
    }

    fn playing(&self, song: &Song, quality: &str) {
        let message = format!("正在播放: {} ({quality})", song.name);
        info!("{message}");
        let mut snapshot = self.lock();
        snapshot.transport = Transport::Playing;
        snapshot.song = Some(song.clone());
        snapshot.quality = Some(quality.to_string());
        snapshot.message = Some((Level::Success, message));
    }

    fn paused(&self, song: &Song) {
        info!("Paused {}", song.name);
        self.lock().transport = Transport::Paused;
    }

    fn duration(&self, duration: Duration) {
        self.lock().duration = Some(duration);
    }

    fn lyrics(&self, lyrics: Lyrics) {
        if lyrics.is_empty() {
            info!("No lyrics for the current song");
        } else {
            info!("Loaded {} lyric lines", lyrics.lines().len());
        }
        self.lock().lyrics = lyrics;
    }

    fn failed(&self, error: &PlayError) {
        error!("Playback failed: {error}");
        let mut snapshot = self.lock();
        snapshot.transport = Transport::Failed;
        snapshot.message = Some((Level::Error, error.to_string()));
    }

    fn idle(&self) {
        *self.lock() = Snapshot::default();
    }

    fn notify(&self, level: Level, message: &str) {
        match level {
            Level::Info | Level::Success => info!("{message}"),
            Level::Warning => warn!("{message}"),
            Level::Error => error!("{message}"),
        }
        self.lock().message = Some((level, message.to_string()));
    }
}
