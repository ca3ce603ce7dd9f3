mod error;

use clap::{ArgGroup, Parser, Subcommand};
use error::App;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::process::Command;
use zbus::{proxy, Connection};

type StdResult<T> = std::result::Result<T, App>;

#[proxy(
    interface = "org.qqsong.Player",
    default_service = "org.qqsong.Player",
    default_path = "/org/qqsong/Player"
)]
trait QqPlayer {
    async fn test_connection(&self) -> zbus::Result<()>;
    async fn search(&self, keyword: &str, page: u32) -> zbus::Result<Vec<String>>;
    async fn next_page(&self) -> zbus::Result<Vec<String>>;
    async fn prev_page(&self) -> zbus::Result<Vec<String>>;
    async fn results(&self) -> zbus::Result<Vec<String>>;
    async fn play(&self, index: u32) -> zbus::Result<()>;
    async fn toggle(&self) -> zbus::Result<()>;
    async fn next(&self) -> zbus::Result<()>;
    async fn previous(&self) -> zbus::Result<()>;
    async fn set_quality(&self, name: &str) -> zbus::Result<()>;
    async fn set_volume(&self, percent: u32) -> zbus::Result<()>;
    async fn download(&self, index: u32) -> zbus::Result<String>;
    async fn lyrics(&self) -> zbus::Result<Vec<String>>;
    async fn status(&self) -> zbus::Result<String>;
    async fn health(&self) -> zbus::Result<String>;
    async fn credential(&self) -> zbus::Result<String>;
    async fn stop(&self) -> zbus::Result<()>;
}

#[derive(Parser)]
#[command(name = "qsg", about = "Control the qqsong player.", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "启动 qqsong")]
    Start(StartCommand),

    #[command(about = "搜索歌曲")]
    Search(SearchCommand),

    #[command(about = "翻页")]
    Page(PageCommand),

    #[command(about = "显示当前搜索结果")]
    Results,

    #[command(about = "播放指定歌曲或继续播放")]
    Play(PlayCommand),

    #[command(about = "暂停或继续播放")]
    Pause,

    #[command(about = "播放下一首歌曲")]
    Next,

    #[command(about = "播放上一首歌曲")]
    Previous,

    #[command(about = "设置音质")]
    Quality(QualityCommand),

    #[command(about = "设置音量")]
    Volume(VolumeCommand),

    #[command(about = "下载歌曲到音乐目录")]
    Download(DownloadCommand),

    #[command(about = "显示当前歌词")]
    Lyrics,

    #[command(about = "显示播放状态")]
    Status,

    #[command(about = "检查后端连接")]
    Health,

    #[command(about = "检查凭证状态")]
    Credential,

    #[command(about = "停止 qqsong")]
    Stop,
}

#[derive(Parser)]
struct StartCommand {
    #[arg(short = 'c', long = "config", help = "配置文件路径")]
    config: Option<PathBuf>,
}

#[derive(Parser)]
struct SearchCommand {
    #[arg(help = "搜索关键词")]
    keyword: String,
    #[arg(short = 'p', long = "page", default_value_t = 1, help = "页码")]
    page: u32,
}

#[derive(Parser)]
#[command(group(ArgGroup::new("direction").required(true).args(["next", "prev"])))]
struct PageCommand {
    #[arg(short = 'n', long = "next", help = "下一页")]
    next: bool,
    #[arg(short = 'p', long = "prev", help = "上一页")]
    prev: bool,
}

#[derive(Parser)]
struct PlayCommand {
    #[arg(short = 'i', long = "index", help = "要播放的歌曲序号")]
    index: Option<u32>,
}

#[derive(Parser)]
#[command(group(ArgGroup::new("quality").required(true).args(["flac", "mp3"])))]
struct QualityCommand {
    #[arg(short = 'f', long = "flac", help = "无损音质")]
    flac: bool,
    #[arg(short = 'm', long = "mp3", help = "标准音质")]
    mp3: bool,
}

#[derive(Parser)]
struct VolumeCommand {
    #[arg(value_parser = clap::value_parser!(u8).range(0..=100), help = "音量 (0-100)")]
    level: u8,
}

#[derive(Parser)]
struct DownloadCommand {
    #[arg(short = 'i', long = "index", help = "要下载的歌曲序号")]
    index: u32,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.detail());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> StdResult<()> {
    let connection = Connection::session().await?;
    let proxy = QqPlayerProxy::new(&connection).await?;
    handle_command(cli, &proxy).await
}

async fn handle_command(cli: Cli, proxy: &QqPlayerProxy<'_>) -> StdResult<()> {
    if let Commands::Start(start_cmd) = cli.command {
        return start_qqsong(start_cmd, proxy).await;
    }
    if !is_qqsong_running(proxy).await {
        eprintln!("qqsong 没有处于运行状态");
        return Ok(());
    }
    match cli.command {
        Commands::Start(_) => Ok(()),
        Commands::Search(search_cmd) => {
            print_lines(&proxy.search(&search_cmd.keyword, search_cmd.page).await?);
            Ok(())
        }
        Commands::Page(page_cmd) => {
            let lines = if page_cmd.next {
                proxy.next_page().await?
            } else {
                proxy.prev_page().await?
            };
            print_lines(&lines);
            Ok(())
        }
        Commands::Results => {
            print_lines(&proxy.results().await?);
            Ok(())
        }
        Commands::Play(play_cmd) => handle_play_command(play_cmd, proxy).await,
        Commands::Pause => {
            proxy.toggle().await?;
            println!("{}", proxy.status().await?);
            Ok(())
        }
        Commands::Next => {
            proxy.next().await?;
            println!("播放下一首");
            Ok(())
        }
        Commands::Previous => {
            proxy.previous().await?;
            println!("播放上一首");
            Ok(())
        }
        Commands::Quality(quality_cmd) => {
            let name = quality_name(&quality_cmd);
            proxy.set_quality(name).await?;
            println!("音质已设置为 {name}");
            Ok(())
        }
        Commands::Volume(volume_cmd) => {
            proxy.set_volume(u32::from(volume_cmd.level)).await?;
            println!("音量已设置为 {}%", volume_cmd.level);
            Ok(())
        }
        Commands::Download(download_cmd) => {
            println!("正在下载...");
            let path = proxy.download(download_cmd.index).await?;
            println!("已保存到 {path}");
            Ok(())
        }
        Commands::Lyrics => {
            print_lines(&proxy.lyrics().await?);
            Ok(())
        }
        Commands::Status => {
            println!("{}", proxy.status().await?);
            Ok(())
        }
        Commands::Health => {
            println!("{}", proxy.health().await?);
            Ok(())
        }
        Commands::Credential => {
            println!("{}", proxy.credential().await?);
            Ok(())
        }
        Commands::Stop => {
            proxy.stop().await?;
            println!("qqsong已退出");
            Ok(())
        }
    }
}

async fn handle_play_command(play_cmd: PlayCommand, proxy: &QqPlayerProxy<'_>) -> StdResult<()> {
    if let Some(index) = play_cmd.index {
        proxy.play(index).await?;
        println!("开始播放第 {index} 首");
    } else {
        proxy.toggle().await?;
        println!("{}", proxy.status().await?);
    }
    Ok(())
}

fn quality_name(quality_cmd: &QualityCommand) -> &'static str {
    if quality_cmd.flac {
        "flac"
    } else {
        "mp3"
    }
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}

async fn is_qqsong_running(proxy: &QqPlayerProxy<'_>) -> bool {
    proxy.test_connection().await.is_ok()
}

async fn start_qqsong(start_cmd: StartCommand, proxy: &QqPlayerProxy<'_>) -> StdResult<()> {
    if is_qqsong_running(proxy).await {
        println!("qqsong 当前已经处于运行状态");
        return Ok(());
    }

    let current_exe_path = std::env::current_exe()?;
    let exe_dir = current_exe_path.parent().ok_or_else(|| {
        App::InvalidInput("Failed to get the directory of the executable".to_string())
    })?;
    let qqsong_path = exe_dir.join("qqsong");

    if !qqsong_path.exists() {
        return Err(App::InvalidInput(
            "qqsong executable not found in the same directory".to_string(),
        ));
    }

    let mut command = Command::new(qqsong_path);
    if let Some(config) = start_cmd.config {
        command.arg("--config").arg(config);
    }
    let child = command.spawn()?;
    println!("qqsong 成功启动，进程 ID: {:?}", child.id());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_page_defaults_to_first() {
        let cli = Cli::try_parse_from(["qsg", "search", "周杰伦"]).unwrap();
        let Commands::Search(search) = cli.command else {
            panic!("expected search");
        };
        assert_eq!(search.keyword, "周杰伦");
        assert_eq!(search.page, 1);

        let cli = Cli::try_parse_from(["qsg", "search", "晴天", "-p", "3"]).unwrap();
        assert!(matches!(cli.command, Commands::Search(SearchCommand { page: 3, .. })));
    }

    #[test]
    fn quality_needs_exactly_one_flag() {
        let cli = Cli::try_parse_from(["qsg", "quality", "--mp3"]).unwrap();
        let Commands::Quality(quality) = cli.command else {
            panic!("expected quality");
        };
        assert_eq!(quality_name(&quality), "mp3");

        assert!(Cli::try_parse_from(["qsg", "quality"]).is_err());
        assert!(Cli::try_parse_from(["qsg", "quality", "--flac", "--mp3"]).is_err());
    }

    #[test]
    fn page_needs_a_direction() {
        assert!(Cli::try_parse_from(["qsg", "page"]).is_err());
        let cli = Cli::try_parse_from(["qsg", "page", "--prev"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Page(PageCommand {
                next: false,
                prev: true
            })
        ));
    }

    #[test]
    fn volume_accepts_percent_only() {
        for level in ["0", "55", "100"] {
            let cli = Cli::try_parse_from(["qsg", "volume", level]).unwrap();
            let Commands::Volume(volume) = cli.command else {
                panic!("expected volume");
            };
            assert_eq!(volume.level.to_string(), level);
        }
        assert!(Cli::try_parse_from(["qsg", "volume", "101"]).is_err());
        assert!(Cli::try_parse_from(["qsg", "volume", "-1"]).is_err());
        assert!(Cli::try_parse_from(["qsg", "volume"]).is_err());
    }

    #[test]
    fn play_index_is_optional_but_download_index_is_not() {
        let cli = Cli::try_parse_from(["qsg", "play"]).unwrap();
        assert!(matches!(cli.command, Commands::Play(PlayCommand { index: None })));
        let cli = Cli::try_parse_from(["qsg", "play", "-i", "4"]).unwrap();
        assert!(matches!(cli.command, Commands::Play(PlayCommand { index: Some(4) })));
        assert!(Cli::try_parse_from(["qsg", "download"]).is_err());
    }
}
