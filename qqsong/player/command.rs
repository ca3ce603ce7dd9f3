use crate::error::PlayError;
use crate::player::media::{EventSink, Media, MediaEvent, MediaFactory};
use async_trait::async_trait;
use log::{info, warn};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use reqwest::header::{ACCEPT, RANGE, USER_AGENT};
use reqwest::Client;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// A player that exits this quickly is treated as having failed to start.
const STARTUP_GRACE: Duration = Duration::from_millis(300);

pub const URL_PLACEHOLDER: &str = "{url}";

/// Replaced by the volume in percent when the player is spawned.
pub const VOLUME_PLACEHOLDER: &str = "{volume}";

/// Plays streams by handing the URL to an external program such as mpv.
pub struct CommandFactory {
    client: Client,
    command: Vec<String>,
}

impl CommandFactory {
    pub fn new(command: Vec<String>, client: Client) -> Self {
        Self { client, command }
    }
}

impl MediaFactory for CommandFactory {
    fn create(&self, url: &str, events: EventSink) -> Result<Arc<dyn Media>, PlayError> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(PlayError::Playback("播放器命令为空".to_string()));
        };
        let args = args
            .iter()
            .map(|arg| arg.replace(URL_PLACEHOLDER, url))
            .collect();
        Ok(Arc::new(CommandMedia {
            client: self.client.clone(),
            url: url.to_string(),
            program: program.clone(),
            args,
            events,
            pid: Mutex::new(None),
            volume: Mutex::new(1.0),
            clock: Mutex::new(Clock::default()),
            released: AtomicBool::new(false),
            stop: CancellationToken::new(),
        }))
    }
}

#[derive(Default)]
struct Clock {
    started: Option<Instant>,
    paused_at: Option<Instant>,
    paused_total: Duration,
}

impl Clock {
    fn position(&self) -> Option<Duration> {
        let started = self.started?;
        let end = self.paused_at.unwrap_or_else(Instant::now);
        Some(end.duration_since(started).saturating_sub(self.paused_total))
    }
}

pub struct CommandMedia {
    client: Client,
    url: String,
    program: String,
    args: Vec<String>,
    events: EventSink,
    pid: Mutex<Option<u32>>,
    volume: Mutex<f64>,
    clock: Mutex<Clock>,
    released: AtomicBool,
    stop: CancellationToken,
}

impl CommandMedia {
    fn spawn_args(&self) -> Vec<String> {
        let volume = *self.volume.lock().unwrap_or_else(PoisonError::into_inner);
        let percent = format!("{:.0}", volume * 100.0);
        self.args
            .iter()
            .map(|arg| arg.replace(VOLUME_PLACEHOLDER, &percent))
            .collect()
    }

    /// Asks the server for the first kilobyte so a dead link fails the
    /// session before a player process is started.
    async fn probe(&self) -> Result<(), PlayError> {
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Ok(());
        }
        let response = self
            .client
            .get(&self.url)
            .header(USER_AGENT, "Mozilla/5.0 (X11; Linux x86_64) qqsong")
            .header(ACCEPT, "*/*")
            .header(RANGE, "bytes=0-1024")
            .send()
            .await
            .map_err(|e| PlayError::Playback(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(PlayError::Playback(format!(
                "音频地址不可用: HTTP {}",
                response.status()
            )))
        }
    }

    fn signal(&self, signal: Signal) -> Result<(), PlayError> {
        let pid = self
            .pid
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ok_or_else(|| PlayError::Playback("播放器尚未启动".to_string()))?;
        let pid = i32::try_from(pid).map_err(|e| PlayError::Playback(e.to_string()))?;
        kill(Pid::from_raw(pid), signal).map_err(|e| PlayError::Playback(e.to_string()))
    }

    fn watch(&self, mut child: Child) {
        let events = self.events.clone();
        let stop = self.stop.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = stop.cancelled() => {
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill player process: {e}");
                    }
                }
                status = child.wait() => {
                    if stop.is_cancelled() {
                        return;
                    }
                    match status {
                        Ok(status) if status.success() => {
                            info!("Player process finished for session {}", events.token());
                            events.send(MediaEvent::Ended);
                        }
                        Ok(status) => events.send(MediaEvent::Failed(format!("播放器退出: {status}"))),
                        Err(e) => events.send(MediaEvent::Failed(e.to_string())),
                    }
                }
            }
        });
    }
}

#[async_trait]
impl Media for CommandMedia {
    async fn load(&self) -> Result<Option<Duration>, PlayError> {
        self.probe().await?;
        Ok(None)
    }

    /// Spawns the player. Until `watch` takes over, dropping this future
    /// drops the child, which kills it.
    async fn play(&self) -> Result<(), PlayError> {
        if self.released.load(Ordering::SeqCst) {
            return Err(PlayError::Playback("媒体已释放".to_string()));
        }
        let mut child = Command::new(&self.program)
            .args(self.spawn_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PlayError::Playback(format!("无法启动 {}: {e}", self.program)))?;
        *self.pid.lock().unwrap_or_else(PoisonError::into_inner) = child.id();

        sleep(STARTUP_GRACE).await;
        match child.try_wait() {
            Ok(Some(status)) if !status.success() => {
                return Err(PlayError::Playback(format!("播放器退出: {status}")));
            }
            Ok(_) => {}
            Err(e) => return Err(PlayError::Playback(e.to_string())),
        }

        self.clock.lock().unwrap_or_else(PoisonError::into_inner).started = Some(Instant::now());
        if self.released.load(Ordering::SeqCst) {
            return Err(PlayError::Playback("媒体已释放".to_string()));
        }
        self.watch(child);
        Ok(())
    }

    fn pause(&self) -> Result<(), PlayError> {
        self.signal(Signal::SIGSTOP)?;
        let mut clock = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        if clock.paused_at.is_none() {
            clock.paused_at = Some(Instant::now());
        }
        Ok(())
    }

    fn resume(&self) -> Result<(), PlayError> {
        self.signal(Signal::SIGCONT)?;
        let mut clock = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(paused_at) = clock.paused_at.take() {
            clock.paused_total += paused_at.elapsed();
        }
        Ok(())
    }

    fn position(&self) -> Option<Duration> {
        self.clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .position()
    }

    /// A running player cannot be reached, so a change made after spawn
    /// only takes effect with the next song.
    fn set_volume(&self, volume: f64) -> Result<(), PlayError> {
        *self.volume.lock().unwrap_or_else(PoisonError::into_inner) = volume;
        if !self.args.iter().any(|arg| arg.contains(VOLUME_PLACEHOLDER)) {
            warn!("Player command has no {VOLUME_PLACEHOLDER} argument, volume is ignored");
        } else if self.pid.lock().unwrap_or_else(PoisonError::into_inner).is_some() {
            info!("Volume change applies from the next song");
        }
        Ok(())
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop.cancel();
    }
}
