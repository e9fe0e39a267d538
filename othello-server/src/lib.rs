//! 黑白棋服务端
//!
//! 包含:
//! - 对局状态机 (GameState)
//! - 对局会话 (Session)
//! - 大厅与配对 (Lobby)

pub mod game;
pub mod lobby;
pub mod session;

pub use game::GameState;
pub use lobby::Lobby;
pub use session::{PlayerConn, Session, SpectatorConn};
