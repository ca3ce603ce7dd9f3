use std::fmt::Display;
use std::sync::Arc;

use log::info;
use serde_json::Value;
use tokio::sync::watch;
use zbus::{fdo, interface, ConnectionBuilder};

use crate::api::Health;
use crate::download::Downloader;
use crate::error::App;
use crate::player::{Controller, Quality, ResultSet, StatusBoard};

pub const BUS_NAME: &str = "org.qqsong.Player";
pub const OBJECT_PATH: &str = "/org/qqsong/Player";

pub struct PlayerDBus {
    controller: Controller,
    board: Arc<StatusBoard>,
    downloader: Arc<Downloader>,
    stop_signal: watch::Sender<()>,
}

fn failed(error: impl Display) -> fdo::Error {
    fdo::Error::Failed(error.to_string())
}

fn to_index(value: u32) -> fdo::Result<usize> {
    usize::try_from(value).map_err(failed)
}

fn to_volume(percent: u32) -> fdo::Result<f64> {
    if percent > 100 {
        return Err(fdo::Error::InvalidArgs(format!(
            "音量必须在 0 到 100 之间: {percent}"
        )));
    }
    Ok(f64::from(percent) / 100.0)
}

pub fn describe_health(health: &Health) -> String {
    format!(
        "已连接 ({}, {} 首歌曲, 环境: {})",
        health.status, health.music_files_count, health.environment
    )
}

pub fn describe_credential(status: &Value) -> String {
    let verdict = match status.get("valid").and_then(Value::as_bool) {
        Some(true) => "凭证有效",
        _ => "凭证无效或已过期",
    };
    format!("{verdict}\n{status}")
}

impl PlayerDBus {
    async fn load_page(&self, keyword: &str, page: u32) -> fdo::Result<Vec<String>> {
        let found = self
            .controller
            .backend()
            .search(keyword, page)
            .await
            .map_err(failed)?;
        let results = ResultSet::from_page(keyword, found);
        let lines = results.render(None);
        self.controller.set_results(results);
        Ok(lines)
    }
}

#[interface(name = "org.qqsong.Player")]
impl PlayerDBus {
    async fn test_connection(&self) -> fdo::Result<()> {
        Ok(())
    }

    async fn search(&self, keyword: String, page: u32) -> fdo::Result<Vec<String>> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(fdo::Error::InvalidArgs("请输入搜索关键词".into()));
        }
        self.load_page(keyword, page.max(1)).await
    }

    async fn next_page(&self) -> fdo::Result<Vec<String>> {
        let results = self.controller.results();
        let page = results
            .next_page()
            .ok_or_else(|| fdo::Error::Failed("已经是最后一页".into()))?;
        self.load_page(results.keyword(), page).await
    }

    async fn prev_page(&self) -> fdo::Result<Vec<String>> {
        let results = self.controller.results();
        let page = results
            .previous_page()
            .ok_or_else(|| fdo::Error::Failed("已经是第一页".into()))?;
        self.load_page(results.keyword(), page).await
    }

    async fn results(&self) -> fdo::Result<Vec<String>> {
        Ok(self
            .controller
            .results()
            .render(self.controller.playing_index()))
    }

    async fn play(&self, index: u32) -> fdo::Result<()> {
        self.controller
            .start_session(to_index(index)?)
            .map(|_| ())
            .map_err(failed)
    }

    async fn toggle(&self) -> fdo::Result<()> {
        self.controller.toggle().map(|_| ()).map_err(failed)
    }

    async fn next(&self) -> fdo::Result<()> {
        self.controller.next().map(|_| ()).map_err(failed)
    }

    async fn previous(&self) -> fdo::Result<()> {
        self.controller.previous().map(|_| ()).map_err(failed)
    }

    async fn set_quality(&self, name: String) -> fdo::Result<()> {
        let quality = Quality::parse(&name)
            .ok_or_else(|| fdo::Error::InvalidArgs(format!("未知音质: {name}")))?;
        self.controller.set_quality(quality).map(|_| ()).map_err(failed)
    }

    async fn set_volume(&self, percent: u32) -> fdo::Result<()> {
        self.controller
            .set_volume(to_volume(percent)?)
            .map_err(failed)
    }

    async fn download(&self, index: u32) -> fdo::Result<String> {
        let path = self
            .downloader
            .download(to_index(index)?)
            .await
            .map_err(failed)?;
        Ok(path.display().to_string())
    }

    async fn lyrics(&self) -> fdo::Result<Vec<String>> {
        let lyrics = self.board.snapshot().lyrics;
        let line = self
            .controller
            .position()
            .and_then(|position| lyrics.line_at(position.as_secs_f64()));
        Ok(lyrics.render(line))
    }

    async fn status(&self) -> fdo::Result<String> {
        let mut line = self.board.snapshot().render(self.controller.position());
        line.push_str(&format!(
            "\n音质: {}\n音量: {:.0}%",
            self.controller.quality().name(),
            self.controller.volume() * 100.0
        ));
        Ok(line)
    }

    async fn health(&self) -> fdo::Result<String> {
        let health = self.controller.backend().health().await.map_err(failed)?;
        Ok(describe_health(&health))
    }

    async fn credential(&self) -> fdo::Result<String> {
        let status = self
            .controller
            .backend()
            .credential_status()
            .await
            .map_err(failed)?;
        Ok(describe_credential(&status))
    }

    async fn stop(&self) -> fdo::Result<()> {
        self.controller.stop();
        self.stop_signal.send(()).map_err(failed)
    }
}

pub async fn run_dbus_server(
    controller: Controller,
    board: Arc<StatusBoard>,
    downloader: Arc<Downloader>,
    stop_signal: watch::Sender<()>,
) -> Result<(), App> {
    let mut stop_receiver = stop_signal.subscribe();
    let player_dbus = PlayerDBus {
        controller,
        board,
        downloader,
        stop_signal: stop_signal.clone(),
    };

    let _connection = ConnectionBuilder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, player_dbus)?
        .build()
        .await?;
    info!("D-Bus service {BUS_NAME} ready at {OBJECT_PATH}");

    if stop_receiver.changed().await.is_ok() {
        info!("Stop signal received, shutting down DBus server...");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn credential_validity_is_spelled_out() {
        let valid = describe_credential(&json!({"valid": true, "musicid": 1}));
        assert!(valid.starts_with("凭证有效\n"));
        assert!(valid.contains("\"musicid\":1"));
        assert!(describe_credential(&json!({"valid": false})).starts_with("凭证无效或已过期"));
        assert!(describe_credential(&json!({})).starts_with("凭证无效或已过期"));
    }

    #[test]
    fn volume_percent_is_bounded() {
        assert!(to_volume(0).is_ok_and(|v| v.abs() < f64::EPSILON));
        assert!(to_volume(100).is_ok_and(|v| (v - 1.0).abs() < f64::EPSILON));
        assert!(matches!(to_volume(101), Err(fdo::Error::InvalidArgs(_))));
    }

    #[test]
    fn health_line_names_backend_state() {
        let health = Health {
            status: "healthy".to_string(),
            timestamp: String::new(),
            music_dir_exists: true,
            music_files_count: 12,
            environment: "production".to_string(),
        };
        assert_eq!(
            describe_health(&health),
            "已连接 (healthy, 12 首歌曲, 环境: production)"
        );
    }
}
