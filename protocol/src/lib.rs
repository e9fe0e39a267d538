//! 黑白棋共享协议库
//!
//! 包含:
//! - 棋盘与落子规则 (Board, Color)
//! - 消息类型定义 (ClientFrame, ServerFrame)
//! - 传输层抽象 (Connector, Connection, Listener traits)
//! - 帧编解码 (FrameReader, FrameWriter)

mod board;
mod constants;
mod error;
mod message;
mod transport;

pub use board::{Board, Color};
pub use constants::*;
pub use error::{ProtocolError, Result};
pub use message::{ClientFrame, Mode, Phase, ServerFrame};
pub use transport::{
    Connection, Connector, FrameReader, FrameWriter, Listener, TcpConnection, TcpConnector,
    TcpListener,
};
