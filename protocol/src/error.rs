//! 错误类型定义

use thiserror::Error;

use crate::board::Color;

/// 协议错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 编解码错误（含未知的 kind 标签）
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// 协议版本不匹配
    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u8, actual: u8 },

    /// 帧大小超限
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// 连接超时
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// 连接已关闭
    #[error("Connection closed")]
    ConnectionClosed,

    /// 握手确认超时
    #[error("Handshake timed out")]
    HandshakeTimeout,

    /// 握手确认的颜色与分配的不一致
    #[error("Handshake color mismatch: assigned {assigned}, acknowledged {acknowledged}")]
    HandshakeMismatch { assigned: Color, acknowledged: Color },

    /// 收到了当前阶段不该出现的帧
    #[error("Unexpected frame: {0}")]
    UnexpectedFrame(&'static str),
}

/// 协议操作结果类型
pub type Result<T> = std::result::Result<T, ProtocolError>;
