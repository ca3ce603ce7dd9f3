use crate::api::models::{
    DownloadTicket, ErrorBody, Health, LyricData, PlayUrl, SearchPage, SearchRequest, Song,
    SongRequest,
};
use crate::error::PlayError;
use async_trait::async_trait;
use futures_util::StreamExt;
use log::{info, warn};
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// The music web backend, as seen by the player.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn search(&self, keyword: &str, page: u32) -> Result<SearchPage, PlayError>;

    async fn play_url(&self, song: &Song, prefer_flac: bool) -> Result<PlayUrl, PlayError>;

    async fn lyric(&self, mid: &str) -> Result<LyricData, PlayError>;

    async fn download(&self, song: &Song, prefer_flac: bool)
        -> Result<DownloadTicket, PlayError>;

    /// Streams a file prepared by [`Backend::download`] to `dest`, returning
    /// the number of bytes written.
    async fn fetch_file(&self, filename: &str, dest: &Path) -> Result<u64, PlayError>;

    async fn health(&self) -> Result<Health, PlayError>;

    async fn credential_status(&self) -> Result<Value, PlayError>;
}

/// Error strings from the backend flag premium tracks with this marker.
const VIP_MARKER: &str = "VIP";

pub fn classify_error(message: &str) -> PlayError {
    if message.contains(VIP_MARKER) {
        PlayError::EntitlementRequired
    } else {
        PlayError::Network(message.to_string())
    }
}

pub struct HttpBackend {
    client: Client,
    base_url: Url,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PlayError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| PlayError::Network(format!("Invalid base URL {base_url}: {e}")))?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, PlayError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| PlayError::Network("Base URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, PlayError> {
        self.url(&[&["api"], segments].concat())
    }
}

/// `x.flac` downloads into `x.flac.part`.
fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

async fn write_stream(response: Response, partial: &Path) -> Result<u64, PlayError> {
    let mut file = fs::File::create(partial)
        .await
        .map_err(|e| PlayError::Network(format!("无法创建文件: {e}")))?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)
            .await
            .map_err(|e| PlayError::Network(format!("写入文件失败: {e}")))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| PlayError::Network(format!("写入文件失败: {e}")))?;
    Ok(written)
}

async fn discard(partial: &Path) {
    match fs::remove_file(partial).await {
        Ok(()) => info!("Removed unfinished download {}", partial.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {e}", partial.display()),
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, PlayError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| PlayError::Network(format!("解析响应失败: {e}")));
    }
    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => format!("HTTP {status}"),
    };
    Err(classify_error(&message))
}

#[async_trait]
impl Backend for HttpBackend {
    async fn search(&self, keyword: &str, page: u32) -> Result<SearchPage, PlayError> {
        let url = self.endpoint(&["search"])?;
        info!("Searching for {keyword:?}, page {page}");
        let response = self
            .client
            .post(url)
            .json(&SearchRequest { keyword, page })
            .send()
            .await?;
        decode(response).await
    }

    async fn play_url(&self, song: &Song, prefer_flac: bool) -> Result<PlayUrl, PlayError> {
        let url = self.endpoint(&["play_url"])?;
        info!("Fetching play URL for {} (prefer_flac={prefer_flac})", song.mid);
        let response = self
            .client
            .post(url)
            .json(&SongRequest {
                song_data: song,
                prefer_flac,
                add_metadata: None,
            })
            .send()
            .await?;
        decode(response).await
    }

    async fn lyric(&self, mid: &str) -> Result<LyricData, PlayError> {
        let url = self.endpoint(&["lyric", mid])?;
        let response = self.client.get(url).send().await?;
        decode(response).await
    }

    async fn download(
        &self,
        song: &Song,
        prefer_flac: bool,
    ) -> Result<DownloadTicket, PlayError> {
        let url = self.endpoint(&["download"])?;
        info!("Requesting download of {} (prefer_flac={prefer_flac})", song.mid);
        let response = self
            .client
            .post(url)
            .json(&SongRequest {
                song_data: song,
                prefer_flac,
                add_metadata: Some(true),
            })
            .send()
            .await?;
        decode(response).await
    }

    async fn fetch_file(&self, filename: &str, dest: &Path) -> Result<u64, PlayError> {
        let url = self.endpoint(&["file", filename])?;
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(PlayError::Network(format!(
                "下载文件失败: HTTP {}",
                response.status()
            )));
        }

        let partial = partial_path(dest);
        let written = match write_stream(response, &partial).await {
            Ok(written) => written,
            Err(e) => {
                discard(&partial).await;
                return Err(e);
            }
        };
        if let Err(e) = fs::rename(&partial, dest).await {
            warn!("Failed to move {} into place: {e}", partial.display());
            discard(&partial).await;
            return Err(PlayError::Network(format!("写入文件失败: {e}")));
        }
        Ok(written)
    }

    async fn health(&self) -> Result<Health, PlayError> {
        let url = self.endpoint(&["health"])?;
        let response = self.client.get(url).send().await?;
        decode(response).await
    }

    async fn credential_status(&self) -> Result<Value, PlayError> {
        let url = self.url(&["admin", "api", "credential", "status"])?;
        let response = self.client.get(url).send().await?;
        decode(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::Path as AxumPath;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn song(mid: &str, vip: bool) -> Song {
        Song {
            mid: mid.to_string(),
            name: "晴天".to_string(),
            singers: "周杰伦".to_string(),
            vip,
            album: "叶惠美".to_string(),
            album_mid: "0024bjiL2aocxT".to_string(),
            interval: 269,
            raw_data: json!({"mid": mid}),
        }
    }

    #[test]
    fn vip_marker_means_entitlement() {
        assert_eq!(
            classify_error("这首歌是VIP歌曲，需要登录才能播放"),
            PlayError::EntitlementRequired
        );
        assert_eq!(
            classify_error("所有音质均无法获取播放URL"),
            PlayError::Network("所有音质均无法获取播放URL".to_string())
        );
    }

    #[tokio::test]
    async fn play_url_sends_song_data_and_quality() {
        let app = Router::new().route(
            "/api/play_url",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["song_data"]["mid"], "001");
                assert_eq!(body["song_data"]["raw_data"]["mid"], "001");
                assert!(body.get("add_metadata").is_none());
                let quality = if body["prefer_flac"] == true { "FLAC" } else { "320kbps" };
                Json(json!({"url": "http://cdn/001", "quality": quality, "song_mid": "001"}))
            }),
        );
        let backend = HttpBackend::new(&serve(app).await, Duration::from_secs(5)).unwrap();

        let flac = backend.play_url(&song("001", false), true).await.unwrap();
        assert_eq!(flac.url, "http://cdn/001");
        assert_eq!(flac.quality, "FLAC");

        let mp3 = backend.play_url(&song("001", false), false).await.unwrap();
        assert_eq!(mp3.quality, "320kbps");
    }

    #[tokio::test]
    async fn error_bodies_are_classified() {
        let app = Router::new().route(
            "/api/play_url",
            post(|Json(body): Json<Value>| async move {
                if body["song_data"]["vip"] == true {
                    (
                        StatusCode::FORBIDDEN,
                        Json(json!({"error": "这首歌是VIP歌曲，需要登录才能播放"})),
                    )
                } else {
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(json!({"error": "所有音质均无法获取播放URL"})),
                    )
                }
            }),
        );
        let backend = HttpBackend::new(&serve(app).await, Duration::from_secs(5)).unwrap();

        assert_eq!(
            backend.play_url(&song("002", true), true).await,
            Err(PlayError::EntitlementRequired)
        );
        assert!(matches!(
            backend.play_url(&song("003", false), true).await,
            Err(PlayError::Network(msg)) if msg.contains("所有音质")
        ));
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let backend =
            HttpBackend::new(&format!("http://{addr}"), Duration::from_secs(2)).unwrap();

        assert!(matches!(
            backend.health().await,
            Err(PlayError::Network(_))
        ));
    }

    #[tokio::test]
    async fn search_and_lyric_decode() {
        let app = Router::new()
            .route(
                "/api/search",
                post(|Json(body): Json<Value>| async move {
                    assert_eq!(body["keyword"], "晴天");
                    Json(json!({
                        "results": [{
                            "mid": "001", "name": "晴天", "singers": "周杰伦", "vip": false,
                            "album": "叶惠美", "album_mid": "x", "interval": 269, "raw_data": {}
                        }],
                        "pagination": {
                            "current_page": body["page"], "has_prev": true, "has_next": false,
                            "total_pages": 2, "total_results": 11
                        },
                        "all_results": 11
                    }))
                }),
            )
            .route(
                "/api/lyric/:mid",
                get(|AxumPath(mid): AxumPath<String>| async move {
                    Json(json!({"lyric": format!("[00:01.00]{mid}"), "trans": ""}))
                }),
            );
        let backend = HttpBackend::new(&serve(app).await, Duration::from_secs(5)).unwrap();

        let page = backend.search("晴天", 2).await.unwrap();
        assert_eq!(page.results.len(), 1);
        let pagination = page.pagination.unwrap();
        assert_eq!(pagination.current_page, 2);
        assert!(pagination.has_prev);
        assert_eq!(pagination.total_results, 11);

        let lyric = backend.lyric("001").await.unwrap();
        assert_eq!(lyric.lyric, "[00:01.00]001");
        assert!(lyric.trans.is_empty());
    }

    #[tokio::test]
    async fn credential_status_lives_under_admin() {
        let app = Router::new().route(
            "/admin/api/credential/status",
            get(|| async { Json(json!({"valid": true, "musicid": 12345})) }),
        );
        let backend = HttpBackend::new(&serve(app).await, Duration::from_secs(5)).unwrap();

        let status = backend.credential_status().await.unwrap();
        assert_eq!(status["valid"], true);
        assert_eq!(status["musicid"], 12345);
    }

    #[tokio::test]
    async fn fetch_file_streams_to_disk() {
        let app = Router::new().route(
            "/api/file/:name",
            get(|AxumPath(name): AxumPath<String>| async move {
                assert_eq!(name, "周杰伦 - 晴天.flac");
                vec![7u8; 4096]
            }),
        );
        let backend = HttpBackend::new(&serve(app).await, Duration::from_secs(5)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("周杰伦 - 晴天.flac");

        let written = backend
            .fetch_file("周杰伦 - 晴天.flac", &dest)
            .await
            .unwrap();

        assert_eq!(written, 4096);
        assert_eq!(std::fs::read(&dest).unwrap().len(), 4096);
        assert!(!dir.path().join("周杰伦 - 晴天.flac.part").exists());
    }

    #[test]
    fn each_format_gets_its_own_partial_file() {
        let flac = partial_path(Path::new("/music/晴天.flac"));
        let mp3 = partial_path(Path::new("/music/晴天.mp3"));
        assert_eq!(flac, Path::new("/music/晴天.flac.part"));
        assert_eq!(mp3, Path::new("/music/晴天.mp3.part"));
    }

    #[tokio::test]
    async fn interrupted_download_leaves_nothing_behind() {
        let app = Router::new().route(
            "/api/file/:name",
            get(|| async {
                let chunks: Vec<Result<Vec<u8>, std::io::Error>> = vec![
                    Ok(vec![7u8; 1024]),
                    Err(std::io::Error::other("connection reset")),
                ];
                Body::from_stream(futures_util::stream::iter(chunks))
            }),
        );
        let backend = HttpBackend::new(&serve(app).await, Duration::from_secs(5)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.flac");

        let err = backend.fetch_file("a.flac", &dest).await.unwrap_err();

        assert!(matches!(err, PlayError::Network(_)));
        assert!(!dest.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
