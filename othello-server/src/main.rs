use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use othello_server::Lobby;
use protocol::{Listener, TcpListener, DEFAULT_BIND_ADDR, DEFAULT_PORT};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("othello_server=debug".parse()?))
        .init();

    // 参数: [绑定地址] [端口]，默认 0.0.0.0:8080
    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
    let port = match args.next() {
        Some(port) => port.parse::<u16>().context("无效的端口号")?,
        None => DEFAULT_PORT,
    };
    let addr = format!("{host}:{port}");

    // 端口被占用等绑定失败是致命错误，报告后退出
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("无法绑定监听地址 {addr}"))?;
    info!(addr = %addr, "黑白棋服务端已启动");

    let lobby = Lobby::new();
    tokio::select! {
        _ = lobby.clone().run(listener) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("收到关闭信号");
        }
    }

    lobby.shutdown().await;
    Ok(())
}
