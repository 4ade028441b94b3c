// chat_mobile_client/src/config.rs

//! 聊天客户端的配置管理模块。
//!
//! 配置以 JSON 文件给出，所有字段都有默认值，时长一律以毫秒表示。
//! 心跳、重连退避与宽限期等常量都属于经验值，因此全部放在配置中而不是写死在代码里。

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 覆盖 `ws_url` 的环境变量名。
pub const WS_URL_ENV: &str = "CHAT_WS_URL";

const CONFIG_DIR: &str = "config";
const CONFIG_FILE_NAME: &str = "chat_client_config.json";

/// 心跳监视器配置。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// 两次心跳探测之间的间隔。
    pub interval_ms: u64,
    /// 每次探测等待应答的最长时间，应小于 `interval_ms`。
    pub response_timeout_ms: u64,
    /// 连续未应答多少次后判定连接不健康。
    pub max_missed: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        HeartbeatConfig { interval_ms: 30_000, response_timeout_ms: 10_000, max_missed: 3 }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

/// 重连调度器配置。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// 随机抖动的上限，实际抖动在 `[0, jitter_max_ms]` 内均匀分布。
    pub jitter_max_ms: u64,
    /// 重连次数上限，达到后放弃并上报致命错误。
    pub max_attempts: u32,
    /// 连接保持打开多久后清零重连计数。
    pub stability_window_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig {
            base_delay_ms: 2_000,
            multiplier: 1.5,
            max_delay_ms: 30_000,
            jitter_max_ms: 1_000,
            max_attempts: 5,
            stability_window_ms: 30_000,
        }
    }
}

impl ReconnectConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn jitter_max(&self) -> Duration {
        Duration::from_millis(self.jitter_max_ms)
    }

    pub fn stability_window(&self) -> Duration {
        Duration::from_millis(self.stability_window_ms)
    }
}

/// 出站队列配置。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: usize,
    /// 单条消息最多尝试发送的次数。
    pub max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig { capacity: 100, max_attempts: 3 }
    }
}

/// 聊天客户端配置。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// 聊天服务 WebSocket 端点，不含 `token` / `chatroom_id` 查询参数。
    ///
    /// **示例**: `"ws://127.0.0.1:8088/ws"` (本地联调) 或 `"wss://chat.example.com/ws"`。
    pub ws_url: String,
    pub heartbeat: HeartbeatConfig,
    pub reconnect: ReconnectConfig,
    pub queue: QueueConfig,
    /// 切换房间时等待旧连接关闭的宽限期。
    pub switch_grace_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            ws_url: "ws://127.0.0.1:8088/ws".to_string(),
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
            queue: QueueConfig::default(),
            switch_grace_ms: 1_200,
        }
    }
}

impl ClientConfig {
    pub fn switch_grace(&self) -> Duration {
        Duration::from_millis(self.switch_grace_ms)
    }

    /// 从默认位置 `config/chat_client_config.json` 加载配置。
    ///
    /// 文件缺失时返回错误，由调用方决定是否回退到 `ClientConfig::default()`。
    pub fn load() -> Result<Self> {
        let config_path = PathBuf::from(CONFIG_DIR).join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            log::warn!("[客户端配置] 配置文件 '{}' 未找到。", config_path.display());
            return Err(anyhow!(
                "客户端配置文件 '{}' 未找到。请确保配置文件存在于 '{}' 目录下，或通过参数指定配置文件。",
                config_path.display(),
                CONFIG_DIR
            ));
        }
        Self::load_from(&config_path)
    }

    /// 从指定文件加载配置，随后应用环境变量覆盖并校验。
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("无法读取配置文件 '{}' 的内容。请检查文件权限和路径是否正确。", path.display()))?;
        let mut config = Self::from_json(&config_str)
            .with_context(|| format!("解析配置文件 '{}' 失败。", path.display()))?;
        config.apply_env_overrides();
        config.validate()?;
        log::info!("[客户端配置] 已从 '{}' 加载配置。服务 URL: {}", path.display(), config.ws_url);
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).with_context(|| {
            format!("配置内容不是有效的 JSON，或不符合 {} 结构", std::any::type_name::<ClientConfig>())
        })
    }

    /// 若设置了 `CHAT_WS_URL`，以其覆盖 `ws_url`。
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(WS_URL_ENV) {
            if !url.trim().is_empty() {
                log::info!("[客户端配置] 使用环境变量 {} 覆盖服务 URL: {}", WS_URL_ENV, url);
                self.ws_url = url;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.ws_url.trim().is_empty() {
            bail!("ws_url 不能为空");
        }
        if self.heartbeat.interval_ms == 0 || self.heartbeat.response_timeout_ms == 0 {
            bail!("心跳间隔与应答超时必须大于 0");
        }
        if self.heartbeat.max_missed == 0 {
            bail!("heartbeat.max_missed 必须大于 0");
        }
        if !(self.reconnect.multiplier >= 1.0) {
            bail!("reconnect.multiplier 不能小于 1，实际为 {}", self.reconnect.multiplier);
        }
        if self.reconnect.base_delay_ms > self.reconnect.max_delay_ms {
            bail!(
                "reconnect.base_delay_ms ({}) 不能大于 reconnect.max_delay_ms ({})",
                self.reconnect.base_delay_ms,
                self.reconnect.max_delay_ms
            );
        }
        if self.queue.capacity == 0 {
            bail!("queue.capacity 必须大于 0");
        }
        if self.queue.max_attempts == 0 {
            bail!("queue.max_attempts 必须大于 0");
        }
        Ok(())
    }
}
