//! 棋盘与落子规则
//!
//! 纯规则计算，不涉及 IO 和并发。翻转规则：从落子点沿 8 个方向扫描，
//! 紧邻格为对方棋子且同方向上在空格/边界之前出现己方棋子的方向为可吃方向。

use serde::{Deserialize, Serialize};

use crate::constants::BOARD_SIZE;

/// 8 个扫描方向（横、纵、斜）
const DIRECTIONS: [(isize, isize); 8] = [
    (0, 1),
    (1, 0),
    (0, -1),
    (-1, 0),
    (1, 1),
    (-1, -1),
    (1, -1),
    (-1, 1),
];

/// 棋子颜色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Black,
    White,
}

impl Color {
    /// 对方颜色（对合函数：`c.opponent().opponent() == c`）
    pub fn opponent(self) -> Color {
        match self {
            Color::Black => Color::White,
            Color::White => Color::Black,
        }
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Color::Black => write!(f, "black"),
            Color::White => write!(f, "white"),
        }
    }
}

/// N×N 棋盘，N 为偶数，创建后大小不变
///
/// 序列化为 N×N 的 `"black"` / `"white"` / `null` 二维数组，
/// 与线上广播中的 `board` 字段形状一致。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Board {
    rows: Vec<Vec<Option<Color>>>,
}

impl Board {
    /// 创建空棋盘
    pub fn empty(size: usize) -> Self {
        debug_assert!(size >= 4 && size % 2 == 0);
        Self {
            rows: vec![vec![None; size]; size],
        }
    }

    /// 创建初始棋盘：中央 4 子开局，白占 (c-1,c-1) 与 (c,c)，黑占另外两格
    pub fn initial(size: usize) -> Self {
        let mut board = Self::empty(size);
        let c = size / 2;
        board.set(c - 1, c - 1, Some(Color::White));
        board.set(c, c, Some(Color::White));
        board.set(c - 1, c, Some(Color::Black));
        board.set(c, c - 1, Some(Color::Black));
        board
    }

    /// 棋盘边长
    pub fn size(&self) -> usize {
        self.rows.len()
    }

    /// 获取指定格的棋子
    pub fn get(&self, row: usize, col: usize) -> Option<Color> {
        self.rows.get(row)?.get(col).copied().flatten()
    }

    /// 设置指定格的棋子
    pub fn set(&mut self, row: usize, col: usize, disk: Option<Color>) {
        if row < self.size() && col < self.size() {
            self.rows[row][col] = disk;
        }
    }

    /// 带符号坐标取格：越界返回 None，空格返回 Some(None)
    fn cell(&self, row: isize, col: isize) -> Option<Option<Color>> {
        if row < 0 || col < 0 {
            return None;
        }
        self.rows
            .get(row as usize)
            .and_then(|r| r.get(col as usize))
            .copied()
    }

    /// 判断 (row, col) 沿 (dr, dc) 方向是否可吃：
    /// 紧邻格必须是对方棋子，且继续延伸在空格/边界前遇到己方棋子
    fn captures_along(&self, row: usize, col: usize, dr: isize, dc: isize, color: Color) -> bool {
        let opponent = color.opponent();
        let mut r = row as isize + dr;
        let mut c = col as isize + dc;
        if self.cell(r, c) != Some(Some(opponent)) {
            return false;
        }
        loop {
            r += dr;
            c += dc;
            match self.cell(r, c) {
                Some(Some(disk)) if disk == color => return true,
                Some(Some(_)) => continue,
                _ => return false,
            }
        }
    }

    /// 检查落子是否合法：目标格必须为空且至少一个方向可吃
    pub fn is_valid_move(&self, row: usize, col: usize, color: Color) -> bool {
        if row >= self.size() || col >= self.size() {
            return false;
        }
        if self.rows[row][col].is_some() {
            return false;
        }
        DIRECTIONS
            .iter()
            .any(|&(dr, dc)| self.captures_along(row, col, dr, dc, color))
    }

    /// 落子并翻转所有可吃方向上的对方棋子
    ///
    /// 前置条件：`is_valid_move(row, col, color)` 为真，由调用方保证。
    pub fn apply_move(&mut self, row: usize, col: usize, color: Color) {
        debug_assert!(self.is_valid_move(row, col, color));
        let capturing: Vec<(isize, isize)> = DIRECTIONS
            .iter()
            .copied()
            .filter(|&(dr, dc)| self.captures_along(row, col, dr, dc, color))
            .collect();
        self.rows[row][col] = Some(color);
        for (dr, dc) in capturing {
            self.flip_along(row, col, dr, dc, color);
        }
    }

    /// 沿一个可吃方向翻转对方棋子，直到遇到己方棋子为止
    fn flip_along(&mut self, row: usize, col: usize, dr: isize, dc: isize, color: Color) {
        let opponent = color.opponent();
        let mut r = row as isize + dr;
        let mut c = col as isize + dc;
        while self.cell(r, c) == Some(Some(opponent)) {
            self.rows[r as usize][c as usize] = Some(color);
            r += dr;
            c += dc;
        }
    }

    /// 指定颜色是否存在至少一个合法落子点（只读，不修改棋盘）
    pub fn any_valid_moves(&self, color: Color) -> bool {
        let n = self.size();
        for row in 0..n {
            for col in 0..n {
                if self.is_valid_move(row, col, color) {
                    return true;
                }
            }
        }
        false
    }

    /// 棋盘是否已下满
    pub fn is_full(&self) -> bool {
        self.rows.iter().all(|r| r.iter().all(|c| c.is_some()))
    }

    /// 统计指定颜色的棋子数
    pub fn count(&self, color: Color) -> usize {
        self.rows
            .iter()
            .flat_map(|r| r.iter())
            .filter(|&&c| c == Some(color))
            .count()
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::initial(BOARD_SIZE)
    }
}
