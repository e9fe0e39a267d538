//! 协议常量定义

use std::time::Duration;

/// 协议版本号
pub const PROTOCOL_VERSION: u8 = 1;

/// 标准棋盘边长（必须为偶数）
pub const BOARD_SIZE: usize = 8;

/// 服务端默认监听端口
pub const DEFAULT_PORT: u16 = 8080;

/// 服务端默认绑定地址
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";

/// 消息帧最大大小
pub const MAX_FRAME_SIZE: usize = 65536;

/// 连接超时（秒）
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// 配色握手超时（秒）- 超过此时间未收到确认则配对失败
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// 连接超时 Duration
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(CONNECT_TIMEOUT_SECS);

/// 握手超时 Duration
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(HANDSHAKE_TIMEOUT_SECS);
