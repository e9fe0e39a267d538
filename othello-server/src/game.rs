//! 对局状态机
//!
//! 每次有效落子后的阶段转移（权威顺序）：
//! 1. 棋盘下满 → Finish
//! 2. 对方有合法落子 → Continue，轮到对方
//! 3. 己方仍有合法落子 → Pass，对方被跳过，落子方继续行棋
//! 4. 双方都无合法落子 → Finish

use protocol::{Board, Color, Phase, ServerFrame, BOARD_SIZE};

/// 一局游戏的完整状态，由所属会话独占持有
#[derive(Debug, Clone)]
pub struct GameState {
    pub board: Board,
    pub turn: Color,
    pub phase: Phase,
    pub message: String,
}

impl GameState {
    /// 创建标准开局：中央 4 子，黑先行
    pub fn new() -> Self {
        Self::with_size(BOARD_SIZE)
    }

    /// 指定棋盘大小的开局（size 必须为偶数）
    pub fn with_size(size: usize) -> Self {
        Self {
            board: Board::initial(size),
            turn: Color::Black,
            phase: Phase::Continue,
            message: "black to move".to_string(),
        }
    }

    /// 校验并执行一步落子
    ///
    /// 拒绝时状态不变，返回拒绝原因；成功时执行翻转并按权威顺序转移阶段。
    pub fn play(&mut self, row: usize, col: usize, color: Color) -> Result<(), &'static str> {
        if self.phase.is_terminal() {
            return Err("the game is already over");
        }
        if color != self.turn {
            return Err("not your turn");
        }
        if !self.board.is_valid_move(row, col, color) {
            return Err("invalid move");
        }

        self.board.apply_move(row, col, color);
        self.advance(color);
        Ok(())
    }

    /// 落子后的阶段转移
    fn advance(&mut self, mover: Color) {
        let next = mover.opponent();
        if self.board.is_full() {
            self.finish();
        } else if self.board.any_valid_moves(next) {
            self.phase = Phase::Continue;
            self.turn = next;
            self.message = format!("{next} to move");
        } else if self.board.any_valid_moves(mover) {
            // 对方无子可下，落子方保留行棋权
            self.phase = Phase::Pass;
            self.turn = mover;
            self.message = format!("{next} has no legal move, {mover} moves again");
        } else {
            self.finish();
        }
    }

    /// 进入终局并生成比分消息
    fn finish(&mut self) {
        let black = self.board.count(Color::Black);
        let white = self.board.count(Color::White);
        self.phase = Phase::Finish;
        self.message = match black.cmp(&white) {
            std::cmp::Ordering::Greater => {
                format!("game over, black {black} - white {white}, black wins")
            }
            std::cmp::Ordering::Less => {
                format!("game over, black {black} - white {white}, white wins")
            }
            std::cmp::Ordering::Equal => {
                format!("game over, black {black} - white {white}, draw")
            }
        };
    }

    /// 强制终局（断线、退出或服务端关闭）
    pub fn force_terminate(&mut self, reason: &str) {
        self.phase = Phase::ForcedTermination;
        self.message = reason.to_string();
    }

    /// 当前状态的广播帧
    pub fn frame(&self) -> ServerFrame {
        ServerFrame::State {
            board: self.board.clone(),
            turn: self.turn,
            case: self.phase,
            message: self.message.clone(),
        }
    }

    /// 拒绝回复帧：携带未变更的当前状态，case 为 ERROR
    pub fn reject_frame(&self, reason: &str) -> ServerFrame {
        ServerFrame::State {
            board: self.board.clone(),
            turn: self.turn,
            case: Phase::Error,
            message: reason.to_string(),
        }
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_game() {
        let state = GameState::new();

        assert_eq!(state.board.get(3, 3), Some(Color::White));
        assert_eq!(state.board.get(4, 4), Some(Color::White));
        assert_eq!(state.board.get(3, 4), Some(Color::Black));
        assert_eq!(state.board.get(4, 3), Some(Color::Black));
        assert_eq!(state.turn, Color::Black);
        assert_eq!(state.phase, Phase::Continue);
    }

    #[test]
    fn test_opening_move_switches_turn() {
        let mut state = GameState::new();

        state.play(2, 3, Color::Black).unwrap();

        assert_eq!(state.board.get(2, 3), Some(Color::Black));
        assert_eq!(state.board.get(3, 3), Some(Color::Black));
        assert_eq!(state.turn, Color::White);
        assert_eq!(state.phase, Phase::Continue);
    }

    #[test]
    fn test_occupied_cell_rejected() {
        let mut state = GameState::new();
        let before = state.board.clone();

        let err = state.play(3, 3, Color::Black).unwrap_err();
        assert_eq!(err, "invalid move");

        // 棋盘不变，拒绝帧 case 为 ERROR
        assert_eq!(state.board, before);
        assert_eq!(state.phase, Phase::Continue);
        match state.reject_frame(err) {
            ServerFrame::State { board, case, .. } => {
                assert_eq!(board, before);
                assert_eq!(case, Phase::Error);
            }
            _ => panic!("expected state frame"),
        }
    }

    #[test]
    fn test_wrong_turn_rejected() {
        let mut state = GameState::new();
        let before = state.board.clone();

        let err = state.play(2, 4, Color::White).unwrap_err();
        assert_eq!(err, "not your turn");
        assert_eq!(state.board, before);
        assert_eq!(state.turn, Color::Black);
    }

    #[test]
    fn test_pass_keeps_mover_turn() {
        // 构造局面：黑下 (0,0) 吃掉 (0,1) 后，白无合法点而黑仍有
        let mut state = GameState::with_size(4);
        let mut board = Board::empty(4);
        board.set(0, 1, Some(Color::White));
        board.set(0, 2, Some(Color::Black));
        board.set(2, 0, Some(Color::Black));
        board.set(2, 1, Some(Color::White));
        state.board = board;

        state.play(0, 0, Color::Black).unwrap();

        assert_eq!(state.phase, Phase::Pass);
        assert_eq!(state.turn, Color::Black);

        // 被跳过的一方此时确实无子可下
        assert!(!state.board.any_valid_moves(Color::White));
        assert!(state.board.any_valid_moves(Color::Black));
    }

    #[test]
    fn test_full_board_finishes() {
        // 只剩 (0,0) 一格，黑下满整盘
        let mut state = GameState::with_size(4);
        let mut board = Board::empty(4);
        for row in 0..4 {
            for col in 0..4 {
                board.set(row, col, Some(Color::Black));
            }
        }
        board.set(0, 0, None);
        board.set(0, 1, Some(Color::White));
        state.board = board;

        state.play(0, 0, Color::Black).unwrap();

        assert!(state.board.is_full());
        assert_eq!(state.phase, Phase::Finish);
        assert_eq!(state.message, "game over, black 16 - white 0, black wins");
    }

    #[test]
    fn test_no_moves_for_either_side_finishes() {
        // 黑吃掉最后一个白子后双方都无合法点
        let mut state = GameState::with_size(4);
        let mut board = Board::empty(4);
        board.set(0, 0, Some(Color::Black));
        board.set(0, 1, Some(Color::White));
        state.board = board;

        state.play(0, 2, Color::Black).unwrap();

        assert!(!state.board.is_full());
        assert_eq!(state.phase, Phase::Finish);
        assert_eq!(state.message, "game over, black 3 - white 0, black wins");
    }

    #[test]
    fn test_draw_message() {
        // 黑补上最后一格 (0,0)，只翻转 (0,1) 一子，终局黑白各 8
        let mut state = GameState::with_size(4);
        let mut board = Board::empty(4);
        board.set(0, 1, Some(Color::White));
        board.set(0, 2, Some(Color::Black));
        board.set(0, 3, Some(Color::Black));
        for col in 0..4 {
            board.set(1, col, Some(Color::Black));
            board.set(2, col, Some(Color::White));
            board.set(3, col, Some(Color::White));
        }
        state.board = board;

        state.play(0, 0, Color::Black).unwrap();

        assert!(state.board.is_full());
        assert_eq!(state.board.count(Color::Black), 8);
        assert_eq!(state.board.count(Color::White), 8);
        assert_eq!(state.phase, Phase::Finish);
        assert_eq!(state.message, "game over, black 8 - white 8, draw");
    }

    #[test]
    fn test_no_moves_after_terminal() {
        let mut state = GameState::new();
        state.force_terminate("black disconnected");

        assert_eq!(state.phase, Phase::ForcedTermination);
        let err = state.play(2, 3, Color::Black).unwrap_err();
        assert_eq!(err, "the game is already over");
    }
}
