//! 消息类型定义
//!
//! 每帧一个 JSON 对象，带显式 `kind` 标签做消息分发，
//! 未知 kind 解码失败并作为协议错误处理。

use serde::{Deserialize, Serialize};

use crate::board::{Board, Color};

/// 连接类型：对局者或观战者
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Player,
    Spectator,
}

/// 对局阶段
///
/// `Error` 只出现在发给违规方的拒绝回复中，不会被会话状态持有。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Continue,
    Pass,
    Finish,
    ForcedTermination,
    Error,
}

impl Phase {
    /// 是否为终局阶段
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Finish | Phase::ForcedTermination)
    }
}

/// 客户端发送给服务端的消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClientFrame {
    /// 首帧：声明连接类型
    Classify { mode: Mode },
    /// 配色握手确认，回传被分配的颜色
    ColorSet { color: Color },
    /// 落子，x 为列、y 为行，turn 为落子方声明的颜色
    Move { x: usize, y: usize, turn: Color },
    /// 主动退出对局
    Disconnect,
}

/// 服务端发送给客户端的消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerFrame {
    /// 配对成功后的配色分配
    AssignColor { player_color: Color },
    /// 状态广播：每次变更后发给全部参与者；拒绝回复时 case 为 ERROR 仅发给违规方
    State {
        board: Board,
        turn: Color,
        case: Phase,
        message: String,
    },
}
