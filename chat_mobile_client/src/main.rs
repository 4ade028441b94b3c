// chat_mobile_client/src/main.rs

//! `chat-client` 命令行演示程序。
//!
//! ## 主要职责：
//! 1. 初始化日志系统 (`env_logger`)。
//! 2. 加载配置，构造 `SessionController` 并连接到指定房间。
//! 3. 打印入站消息与连接状态变化；把标准输入的每一行作为聊天消息发送。
//!    `/room <id>` 切换房间，`/quit` 断开并退出。

use anyhow::{Context, Result};
use chat_mobile_client::{ClientConfig, ConnectHandlers, SessionController};
use chat_models::ws_payloads::{ChatMessagePayload, NEW_MESSAGE_TYPE};
use chat_websocket_utils::client::WsConnector;
use clap::Parser;
use log::{info, warn, LevelFilter};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(name = "chat-client", about = "连接聊天房间并收发消息的命令行客户端")]
struct Args {
    /// 配置文件路径，缺省时读取 config/chat_client_config.json
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 覆盖配置中的 WebSocket 服务地址
    #[arg(long)]
    url: Option<String>,

    /// 要连接的房间 ID
    #[arg(short, long)]
    room: String,

    /// 连接凭证
    #[arg(short, long)]
    token: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .filter_module("chat_mobile_client", LevelFilter::Debug)
        .parse_default_env()
        .try_init()
        .context("初始化 env_logger 日志服务失败")?;

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => ClientConfig::load_from(path)?,
        None => ClientConfig::load().unwrap_or_else(|e| {
            warn!("[聊天客户端] {:#}，使用默认配置", e);
            let mut config = ClientConfig::default();
            config.apply_env_overrides();
            config
        }),
    };
    if let Some(url) = args.url {
        config.ws_url = url;
    }
    config.validate()?;
    info!("[聊天客户端] 正在启动，服务地址: {}", config.ws_url);

    let controller = SessionController::new(config, Arc::new(WsConnector::new()));
    controller.add_message_handler(|envelope| {
        if envelope.message_type == NEW_MESSAGE_TYPE {
            let payload: ChatMessagePayload = envelope.data_as()?;
            println!("[{}] {}", payload.sender_id.as_deref().unwrap_or("?"), payload.content);
        } else {
            println!("<{}> {}", envelope.message_type, envelope.data);
        }
        Ok(())
    });

    let mut status = controller.status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let snapshot = status.borrow_and_update().clone();
            println!(
                "-- 状态: {} 房间: {} 重连: {}{}",
                snapshot.state,
                snapshot.room_id.as_deref().unwrap_or("-"),
                snapshot.reconnect_attempt,
                snapshot.last_error.map(|e| format!(" 错误: {}", e)).unwrap_or_default()
            );
        }
    });

    controller.connect(args.room.clone(), args.token.clone(), connect_handlers())?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("读取标准输入失败")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if let Some(room) = line.strip_prefix("/room ") {
            controller.connect(room.trim(), args.token.clone(), connect_handlers())?;
            continue;
        }
        if !controller.send_chat_message(line).await {
            println!("-- 尚未连接，消息已进入发送队列");
        }
    }

    controller.disconnect().await?;
    info!("[聊天客户端] 已断开连接，程序退出");
    Ok(())
}

fn connect_handlers() -> ConnectHandlers {
    ConnectHandlers::new()
        .on_open(|| println!("-- 已连接"))
        .on_close(|code, reason| println!("-- 连接关闭 (code: {:?}, reason: {})", code, reason))
        .on_error(|error| eprintln!("-- 错误: {}", error))
}
