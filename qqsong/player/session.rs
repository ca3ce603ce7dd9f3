//! Playback session controller.
//!
//! Every play request (explicit play, skip, track end, quality change) gets
//! a fresh [`SessionToken`] from a monotonic counter. Only the session
//! holding the latest token may touch the status sink or the current media
//! slot; everything older is cancelled and, wherever it happens to be
//! suspended, returns quietly at its next checkpoint.

use crate::api::{Backend, PlayUrl, Song};
use crate::error::PlayError;
use crate::lyrics::Lyrics;
use crate::player::media::{EventSink, Media, MediaEvent, MediaFactory, SessionToken};
use crate::player::results::ResultSet;
use crate::player::status::{Level, StatusSink};
use log::{debug, info, warn};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    Flac,
    Standard,
}

impl Quality {
    pub fn prefer_flac(self) -> bool {
        self == Quality::Flac
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "flac" => Some(Quality::Flac),
            "mp3" | "standard" => Some(Quality::Standard),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Quality::Flac => "flac",
            Quality::Standard => "mp3",
        }
    }
}

/// A session that has been issued but not promoted yet.
struct Pending {
    token: SessionToken,
    cancel: CancellationToken,
    media: Option<Arc<dyn Media>>,
    /// An event that arrived before promotion; replayed right after it.
    early_event: Option<MediaEvent>,
}

/// The promoted session; owns the only audible media.
struct Current {
    token: SessionToken,
    song: Song,
    quality: String,
    media: Arc<dyn Media>,
    paused: bool,
}

struct State {
    latest: SessionToken,
    pending: Option<Pending>,
    current: Option<Current>,
    results: ResultSet,
    index: usize,
    quality: Quality,
    volume: f64,
}

impl State {
    /// Retires whatever is pending or playing. The returned media must be
    /// released by the caller.
    fn supersede(&mut self) -> Vec<Arc<dyn Media>> {
        let mut released = Vec::new();
        if let Some(pending) = self.pending.take() {
            pending.cancel.cancel();
            released.extend(pending.media);
        }
        if let Some(current) = self.current.take() {
            released.push(current.media);
        }
        released
    }
}

struct Inner {
    backend: Arc<dyn Backend>,
    media: Arc<dyn MediaFactory>,
    status: Arc<dyn StatusSink>,
    retry_delay: Duration,
    events: mpsc::UnboundedSender<(SessionToken, MediaEvent)>,
    state: Mutex<State>,
}

/// Why a session stopped before promotion.
enum Abort {
    Superseded,
    Failed(PlayError),
}

impl From<PlayError> for Abort {
    fn from(error: PlayError) -> Self {
        Abort::Failed(error)
    }
}

#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

impl Controller {
    /// Must be called from within a tokio runtime; spawns the task that
    /// routes media events back into the controller.
    pub fn new(
        backend: Arc<dyn Backend>,
        media: Arc<dyn MediaFactory>,
        status: Arc<dyn StatusSink>,
        quality: Quality,
        volume: f64,
        retry_delay: Duration,
    ) -> Self {
        let (events, mut event_receiver) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            backend,
            media,
            status,
            retry_delay,
            events,
            state: Mutex::new(State {
                latest: 0,
                pending: None,
                current: None,
                results: ResultSet::default(),
                index: 0,
                quality,
                volume: volume.clamp(0.0, 1.0),
            }),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        tokio::spawn(async move {
            while let Some((token, event)) = event_receiver.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                Controller { inner }.handle_media_event(token, event);
            }
        });

        Self { inner }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    pub fn latest_token(&self) -> SessionToken {
        self.lock().latest
    }

    pub fn is_latest(&self, token: SessionToken) -> bool {
        self.lock().latest == token
    }

    pub fn quality(&self) -> Quality {
        self.lock().quality
    }

    /// Index of the promoted song, if anything is audible.
    pub fn playing_index(&self) -> Option<usize> {
        let state = self.lock();
        state.current.as_ref().map(|_| state.index)
    }

    pub fn position(&self) -> Option<Duration> {
        let media = self.lock().current.as_ref().map(|c| Arc::clone(&c.media));
        media.and_then(|media| media.position())
    }

    pub fn results(&self) -> ResultSet {
        self.lock().results.clone()
    }

    /// Replaces the result set. Whatever is playing keeps playing.
    pub fn set_results(&self, results: ResultSet) {
        self.lock().results = results;
    }

    pub fn song(&self, index: usize) -> Result<Song, PlayError> {
        self.lock().results.get(index)
    }

    pub fn volume(&self) -> f64 {
        self.lock().volume
    }

    /// Sets the output level, from 0.0 (mute) to 1.0. It applies to the
    /// audible or loading song right away and to every later session.
    pub fn set_volume(&self, volume: f64) -> Result<(), PlayError> {
        if volume.is_nan() {
            return Err(PlayError::Playback("音量无效".to_string()));
        }
        let volume = volume.clamp(0.0, 1.0);
        let mut state = self.lock();
        state.volume = volume;
        if let Some(current) = &state.current {
            current.media.set_volume(volume)?;
        }
        if let Some(media) = state.pending.as_ref().and_then(|p| p.media.as_ref()) {
            media.set_volume(volume)?;
        }
        info!("Volume set to {:.0}%", volume * 100.0);
        Ok(())
    }

    /// Switches to standard quality without touching playback.
    pub fn lower_quality(&self) {
        self.lock().quality = Quality::Standard;
    }

    /// Begins a new session for `index`, superseding any older one.
    ///
    /// An out of range index is rejected before a token is issued, so the
    /// current session is left alone.
    pub fn start_session(&self, index: usize) -> Result<SessionToken, PlayError> {
        let (token, cancel, song, quality, released) = {
            let mut state = self.lock();
            let song = state.results.get(index)?;
            state.latest += 1;
            let token = state.latest;
            let released = state.supersede();
            let cancel = CancellationToken::new();
            state.pending = Some(Pending {
                token,
                cancel: cancel.clone(),
                media: None,
                early_event: None,
            });
            state.index = index;
            self.inner.status.loading(&song);
            (token, cancel, song, state.quality, released)
        };
        for media in released {
            media.release();
        }

        info!("Session {token}: {} - {}", song.name, song.singers);
        tokio::spawn(self.clone().fetch_lyrics(token, cancel.clone(), song.mid.clone()));
        tokio::spawn(self.clone().run_session(token, cancel, song, quality));
        Ok(token)
    }

    /// Cancels everything without starting a new session.
    pub fn stop(&self) {
        let released = {
            let mut state = self.lock();
            state.latest += 1;
            let released = state.supersede();
            self.inner.status.idle();
            released
        };
        for media in released {
            media.release();
        }
    }

    pub fn next(&self) -> Result<Option<SessionToken>, PlayError> {
        let index = {
            let state = self.lock();
            state.results.next_index(state.index)
        };
        self.skip_to(index)
    }

    pub fn previous(&self) -> Result<Option<SessionToken>, PlayError> {
        let index = {
            let state = self.lock();
            state.results.previous_index(state.index)
        };
        self.skip_to(index)
    }

    fn skip_to(&self, index: Option<usize>) -> Result<Option<SessionToken>, PlayError> {
        match index {
            Some(index) => self.start_session(index).map(Some),
            None => {
                self.inner
                    .status
                    .notify(Level::Info, "请先搜索并选择一首歌曲");
                Ok(None)
            }
        }
    }

    /// Pauses or resumes the current song; with nothing loaded, starts the
    /// selected one.
    pub fn toggle(&self) -> Result<Option<SessionToken>, PlayError> {
        let index = {
            let mut state = self.lock();
            if let Some(current) = state.current.as_mut() {
                if current.paused {
                    current.media.resume()?;
                    current.paused = false;
                    self.inner.status.playing(&current.song, &current.quality);
                } else {
                    current.media.pause()?;
                    current.paused = true;
                    self.inner.status.paused(&current.song);
                }
                return Ok(None);
            }
            if state.pending.is_some() {
                self.inner
                    .status
                    .notify(Level::Warning, "音频仍在加载中，请稍候");
                return Ok(None);
            }
            if state.results.is_empty() {
                self.inner
                    .status
                    .notify(Level::Error, "请先搜索并选择一首歌曲");
                return Ok(None);
            }
            state.index
        };
        self.start_session(index).map(Some)
    }

    /// Changes the preferred quality, restarting the current song in the new
    /// quality if one is playing.
    pub fn set_quality(&self, quality: Quality) -> Result<Option<SessionToken>, PlayError> {
        let restart = {
            let mut state = self.lock();
            state.quality = quality;
            state.current.as_ref().map(|_| state.index)
        };
        match restart {
            Some(index) => self.start_session(index).map(Some),
            None => Ok(None),
        }
    }

    async fn run_session(
        self,
        token: SessionToken,
        cancel: CancellationToken,
        song: Song,
        quality: Quality,
    ) {
        match self.resolve_and_play(token, &cancel, &song, quality).await {
            Ok(()) => {}
            Err(Abort::Superseded) => debug!("Session {token} superseded"),
            Err(Abort::Failed(error)) => self.fail(token, &error),
        }
    }

    async fn resolve_and_play(
        &self,
        token: SessionToken,
        cancel: &CancellationToken,
        song: &Song,
        quality: Quality,
    ) -> Result<(), Abort> {
        let play_url = match self.fetch_url(token, cancel, song, quality).await {
            Err(Abort::Failed(error))
                if quality == Quality::Flac && error.allows_quality_fallback() =>
            {
                warn!("Session {token}: FLAC unavailable ({error}), retrying at standard quality");
                self.fall_back_to_standard(token)?;
                self.checkpoint(token, cancel, sleep(self.inner.retry_delay))
                    .await?;
                self.fetch_url(token, cancel, song, Quality::Standard).await?
            }
            other => other?,
        };

        let media = self.inner.media.create(
            &play_url.url,
            EventSink::new(token, self.inner.events.clone()),
        )?;
        let outcome = self
            .start_media(token, cancel, song, &play_url, &media)
            .await;
        if outcome.is_err() {
            media.release();
        }
        outcome
    }

    async fn fetch_url(
        &self,
        token: SessionToken,
        cancel: &CancellationToken,
        song: &Song,
        quality: Quality,
    ) -> Result<PlayUrl, Abort> {
        let reply = self
            .checkpoint(
                token,
                cancel,
                self.inner.backend.play_url(song, quality.prefer_flac()),
            )
            .await?;
        Ok(reply?)
    }

    async fn start_media(
        &self,
        token: SessionToken,
        cancel: &CancellationToken,
        song: &Song,
        play_url: &PlayUrl,
        media: &Arc<dyn Media>,
    ) -> Result<(), Abort> {
        self.with_latest(token, |state| {
            if let Some(pending) = state.pending.as_mut().filter(|p| p.token == token) {
                pending.media = Some(Arc::clone(media));
            }
            media.set_volume(state.volume)
        })??;

        let duration = self.checkpoint(token, cancel, media.load()).await??;
        if let Some(duration) = duration {
            self.with_latest(token, |_| self.inner.status.duration(duration))?;
        }

        self.checkpoint(token, cancel, media.play()).await??;

        let early_event = self.with_latest(token, |state| {
            let early_event = state
                .pending
                .take()
                .filter(|p| p.token == token)
                .and_then(|p| p.early_event);
            state.current = Some(Current {
                token,
                song: song.clone(),
                quality: play_url.quality.clone(),
                media: Arc::clone(media),
                paused: false,
            });
            self.inner.status.playing(song, &play_url.quality);
            early_event
        })?;
        if let Some(event) = early_event {
            debug!("Session {token}: replaying {event:?} received before promotion");
            self.handle_media_event(token, event);
        }
        Ok(())
    }

    /// Awaits `future` unless the session is cancelled first, then confirms
    /// the session is still the latest.
    async fn checkpoint<T>(
        &self,
        token: SessionToken,
        cancel: &CancellationToken,
        future: impl Future<Output = T>,
    ) -> Result<T, Abort> {
        let output = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            output = future => Some(output),
        };
        match output {
            Some(output) if self.is_latest(token) => Ok(output),
            _ => Err(Abort::Superseded),
        }
    }

    /// Runs `update` under the state lock if `token` is still the latest.
    fn with_latest<R>(
        &self,
        token: SessionToken,
        update: impl FnOnce(&mut State) -> R,
    ) -> Result<R, Abort> {
        let mut state = self.lock();
        if state.latest != token {
            return Err(Abort::Superseded);
        }
        Ok(update(&mut state))
    }

    fn fall_back_to_standard(&self, token: SessionToken) -> Result<(), Abort> {
        self.with_latest(token, |state| {
            state.quality = Quality::Standard;
            self.inner
                .status
                .notify(Level::Warning, "FLAC音质不可用，自动尝试MP3格式");
        })
    }

    fn fail(&self, token: SessionToken, error: &PlayError) {
        let outcome = self.with_latest(token, |state| {
            if state.pending.as_ref().is_some_and(|p| p.token == token) {
                state.pending = None;
            }
            self.inner.status.failed(error);
        });
        if outcome.is_err() {
            debug!("Session {token} failed after being superseded: {error}");
        }
    }

    async fn fetch_lyrics(self, token: SessionToken, cancel: CancellationToken, mid: String) {
        if mid.is_empty() {
            return;
        }
        let Ok(reply) = self
            .checkpoint(token, &cancel, self.inner.backend.lyric(&mid))
            .await
        else {
            return;
        };
        let lyrics = match reply {
            Ok(data) => Lyrics::from_data(&data),
            Err(e) => {
                warn!("Failed to fetch lyrics for {mid}: {e}");
                Lyrics::default()
            }
        };
        let published = self.with_latest(token, |_| self.inner.status.lyrics(lyrics));
        if published.is_err() {
            debug!("Dropping lyrics of superseded session {token}");
        }
    }

    fn handle_media_event(&self, token: SessionToken, event: MediaEvent) {
        let (released, next) = {
            let mut state = self.lock();
            let is_current = state
                .current
                .as_ref()
                .is_some_and(|current| current.token == token);
            if !is_current {
                // The media may report before its session has been promoted.
                let latest = state.latest;
                match state.pending.as_mut().filter(|p| p.token == token) {
                    Some(pending) if latest == token => {
                        pending.early_event.get_or_insert(event);
                    }
                    _ => debug!("Dropping {event:?} from stale session {token}"),
                }
                return;
            }
            let current = state.current.take();
            let next = match &event {
                MediaEvent::Ended => state.results.next_index(state.index),
                MediaEvent::Failed(message) => {
                    self.inner
                        .status
                        .failed(&PlayError::Playback(message.clone()));
                    None
                }
            };
            (current.map(|current| current.media), next)
        };
        if let Some(media) = released {
            media.release();
        }
        if let Some(index) = next {
            info!("Track finished, advancing to {index}");
            if let Err(e) = self.start_session(index) {
                warn!("Failed to advance after track end: {e}");
            }
        } else if event == MediaEvent::Ended {
            self.inner.status.idle();
        }
    }
}
