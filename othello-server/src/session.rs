//! 对局会话
//!
//! 一个会话 = 两名对局者 + 可增长的观战者集合 + 一份独占的对局状态。
//! 所有状态读写都在会话锁内完成；广播载荷在锁内计算、在锁外发送，
//! 避免慢速对端阻塞另一方的下一步。每次状态变更在临界区内分配单调递增
//! 的帧序号，投递按序号把关：被更新状态超越的帧直接丢弃，接收方看到的
//! 顺序因此与状态变更顺序一致。对某个接收方发送失败视为该方断线，
//! 不影响对其余接收方的投递。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use protocol::{ClientFrame, Color, FrameReader, FrameWriter, ProtocolError, ServerFrame};

use crate::game::GameState;
use crate::lobby::Lobby;

/// 完成握手、入座的对局者连接
pub struct PlayerConn {
    pub color: Color,
    pub reader: FrameReader<OwnedReadHalf>,
    pub writer: FrameWriter<OwnedWriteHalf>,
    pub addr: String,
}

/// 观战者连接（只写，不从中读取任何命令）
pub struct SpectatorConn {
    pub writer: FrameWriter<OwnedWriteHalf>,
    pub addr: String,
}

/// 参与者身份
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Player(Color),
    Spectator,
}

/// 广播接收方：对局者的写端或观战者的写端
struct Peer {
    role: Role,
    addr: String,
    writer: FrameWriter<OwnedWriteHalf>,
}

/// 接收方集合与已投递的最新帧序号，同一把锁保护
struct PeerSet {
    peers: Vec<Peer>,
    last_seq: u64,
}

/// 会话锁保护的内容：对局状态与单调递增的帧序号
struct SharedState {
    game: GameState,
    seq: u64,
}

impl SharedState {
    /// 在临界区内为一次状态变更分配广播序号
    fn next_frame(&mut self) -> (u64, ServerFrame) {
        self.seq += 1;
        (self.seq, self.game.frame())
    }
}

/// 落子处理在临界区内的计算结果，网络发送在锁外进行
enum MoveOutcome {
    /// 状态已变更，待按序号广播；bool 表示是否到达终局
    Applied(u64, ServerFrame, bool),
    /// 被拒绝，仅回复违规方
    Rejected(ServerFrame),
}

/// 一局对局的会话
pub struct Session {
    id: u64,
    /// 会话锁：对局状态的唯一临界区
    state: Mutex<SharedState>,
    /// 全部接收方的写端（两名对局者 + 观战者，观战者可中途加入）
    peers: AsyncMutex<PeerSet>,
    active: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    /// 回指大厅，终局时清除其活动会话引用
    lobby: Weak<Lobby>,
}

impl Session {
    pub fn new(id: u64, lobby: Weak<Lobby>) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            id,
            state: Mutex::new(SharedState {
                game: GameState::new(),
                seq: 0,
            }),
            peers: AsyncMutex::new(PeerSet {
                peers: Vec::new(),
                last_seq: 0,
            }),
            active: AtomicBool::new(true),
            shutdown_tx,
            lobby,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// 入座两名对局者并接收大厅转交的观战者，广播初始盘面，启动对局者读循环
    pub async fn start(
        self: &Arc<Self>,
        black: PlayerConn,
        white: PlayerConn,
        spectators: Vec<SpectatorConn>,
    ) {
        info!(
            session = self.id,
            black = %black.addr,
            white = %white.addr,
            spectators = spectators.len(),
            "对局开始"
        );

        let (seq, initial) = {
            let mut state = self.state.lock().expect("state mutex poisoned");
            state.next_frame()
        };

        debug_assert_eq!(black.color, Color::Black);
        debug_assert_eq!(white.color, Color::White);
        let (black_reader, black_addr) = (black.reader, black.addr.clone());
        let (white_reader, white_addr) = (white.reader, white.addr.clone());
        {
            let mut set = self.peers.lock().await;
            set.peers.push(Peer {
                role: Role::Player(black.color),
                addr: black.addr,
                writer: black.writer,
            });
            set.peers.push(Peer {
                role: Role::Player(white.color),
                addr: white.addr,
                writer: white.writer,
            });
            for spectator in spectators {
                set.peers.push(Peer {
                    role: Role::Spectator,
                    addr: spectator.addr,
                    writer: spectator.writer,
                });
            }
        }

        let failed = self.broadcast(seq, &initial).await;
        if let Some(&color) = failed.first() {
            self.terminate(&format!("{color} disconnected")).await;
            return;
        }

        tokio::spawn(player_loop(
            self.clone(),
            black_reader,
            Color::Black,
            black_addr,
        ));
        tokio::spawn(player_loop(
            self.clone(),
            white_reader,
            Color::White,
            white_addr,
        ));
    }

    /// 处理一步落子请求（x 为列，y 为行，claimed 为请求中声明的颜色）
    ///
    /// 校验、状态变更与序号分配都在会话锁内完成；广播/回复在锁释放后进行。
    pub async fn handle_move(&self, seat: Color, claimed: Color, x: usize, y: usize) {
        let outcome = {
            let mut state = self.state.lock().expect("state mutex poisoned");
            if claimed != seat {
                MoveOutcome::Rejected(state.game.reject_frame("not your turn"))
            } else {
                match state.game.play(y, x, claimed) {
                    Ok(()) => {
                        let terminal = state.game.phase.is_terminal();
                        let (seq, frame) = state.next_frame();
                        MoveOutcome::Applied(seq, frame, terminal)
                    }
                    Err(reason) => MoveOutcome::Rejected(state.game.reject_frame(reason)),
                }
            }
        };

        match outcome {
            MoveOutcome::Rejected(reply) => {
                debug!(session = self.id, player = %seat, "落子被拒绝");
                if self.send_to_player(seat, &reply).await.is_err() {
                    self.terminate(&format!("{seat} disconnected")).await;
                }
            }
            MoveOutcome::Applied(seq, frame, terminal) => {
                let failed = self.broadcast(seq, &frame).await;
                if terminal {
                    // 自然终局：最后一帧已广播，拆除会话
                    self.teardown().await;
                } else if let Some(&color) = failed.first() {
                    self.terminate(&format!("{color} disconnected")).await;
                }
            }
        }
    }

    /// 中途加入一名观战者：入列后立刻单独补发一帧当前快照，
    /// 无需等待下一次对局者触发的广播
    ///
    /// 整个流程持有 peers 锁：活跃标记在锁内复查，终局拆除在同一把锁下
    /// 清空集合，观战者不可能被挂进已拆除的会话。
    pub async fn add_spectator(&self, mut spectator: SpectatorConn) -> bool {
        let mut set = self.peers.lock().await;
        if !self.is_active() {
            let _ = spectator.writer.shutdown().await;
            return false;
        }

        let snapshot = {
            let state = self.state.lock().expect("state mutex poisoned");
            state.game.frame()
        };

        if let Err(e) = spectator.writer.write_frame(&snapshot).await {
            warn!(session = self.id, addr = %spectator.addr, error = %e, "观战者快照发送失败");
            return true;
        }

        info!(session = self.id, addr = %spectator.addr, "观战者加入");
        set.peers.push(Peer {
            role: Role::Spectator,
            addr: spectator.addr,
            writer: spectator.writer,
        });
        true
    }

    /// 向全部参与者投递一帧
    ///
    /// 序号小于等于已投递最新序号的帧是被并发变更超越的过期帧，整帧丢弃，
    /// 保证接收方看到的帧序与状态变更顺序一致。发送失败的观战者直接移出
    /// 集合；发送失败的对局者颜色返回给调用方，由调用方决定是否强制终局。
    /// 单个失败不会中断对其余接收方的投递。
    async fn broadcast(&self, seq: u64, frame: &ServerFrame) -> Vec<Color> {
        let mut set = self.peers.lock().await;
        if seq <= set.last_seq {
            debug!(session = self.id, seq, last = set.last_seq, "过期帧被丢弃");
            return Vec::new();
        }
        set.last_seq = seq;

        let mut failed_players = Vec::new();
        let mut dropped = Vec::new();

        for (idx, peer) in set.peers.iter_mut().enumerate() {
            if let Err(e) = peer.writer.write_frame(frame).await {
                warn!(session = self.id, addr = %peer.addr, error = %e, "广播发送失败");
                match peer.role {
                    Role::Player(color) => failed_players.push(color),
                    Role::Spectator => dropped.push(idx),
                }
            }
        }

        // 从后往前移除，保持下标有效
        for idx in dropped.into_iter().rev() {
            set.peers.remove(idx);
        }

        failed_players
    }

    /// 仅发给指定颜色的对局者（拒绝回复不广播，不占用序号）
    async fn send_to_player(&self, color: Color, frame: &ServerFrame) -> Result<(), ()> {
        let mut set = self.peers.lock().await;
        match set
            .peers
            .iter_mut()
            .find(|p| p.role == Role::Player(color))
        {
            Some(peer) => peer.writer.write_frame(frame).await.map_err(|_| ()),
            None => Err(()),
        }
    }

    /// 强制终局：置 ForcedTermination，向仍在线的参与者广播最后一帧，
    /// 然后关闭会话内全部连接并清除大厅的活动会话引用
    pub async fn terminate(&self, reason: &str) {
        // 只有第一个触发者执行拆除
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        info!(session = self.id, reason, "对局强制终止");

        let (seq, frame) = {
            let mut state = self.state.lock().expect("state mutex poisoned");
            state.game.force_terminate(reason);
            state.next_frame()
        };

        {
            let mut set = self.peers.lock().await;
            // 强制终局是最后一次状态变更，序号必然最新
            set.last_seq = seq;
            for peer in set.peers.iter_mut() {
                // 终局帧发送失败只记录，不再连锁处理
                if let Err(e) = peer.writer.write_frame(&frame).await {
                    debug!(session = self.id, addr = %peer.addr, error = %e, "终局帧发送失败");
                }
            }
            for peer in set.peers.iter_mut() {
                let _ = peer.writer.shutdown().await;
            }
            set.peers.clear();
        }

        self.release();
    }

    /// 自然终局后的拆除：最后一帧已随落子广播，只需关闭连接并释放引用
    async fn teardown(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        info!(session = self.id, "对局结束");

        {
            let mut set = self.peers.lock().await;
            for peer in set.peers.iter_mut() {
                let _ = peer.writer.shutdown().await;
            }
            set.peers.clear();
        }

        self.release();
    }

    /// 唤醒读循环并清除大厅的活动会话引用
    fn release(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(lobby) = self.lobby.upgrade() {
            lobby.clear_active(self.id);
        }
    }
}

/// 对局者读循环：每名入座对局者一个常驻任务，阻塞在自己连接的读端
async fn player_loop(
    session: Arc<Session>,
    mut reader: FrameReader<OwnedReadHalf>,
    color: Color,
    addr: String,
) {
    let mut shutdown_rx = session.shutdown_tx.subscribe();

    loop {
        if !session.is_active() {
            break;
        }

        let frame = tokio::select! {
            frame = reader.read_frame::<ClientFrame>() => frame,
            _ = shutdown_rx.changed() => break,
        };

        match frame {
            Ok(ClientFrame::Move { x, y, turn }) => {
                session.handle_move(color, turn, x, y).await;
            }
            Ok(ClientFrame::Disconnect) => {
                info!(player = %color, addr = %addr, "对局者主动退出");
                session.terminate(&format!("{color} left the game")).await;
                break;
            }
            Ok(_) => {
                // 对局中不该再出现分类/握手帧，按协议错误关闭
                warn!(player = %color, addr = %addr, "收到对局中不该出现的帧");
                session.terminate(&format!("{color} sent an invalid frame")).await;
                break;
            }
            Err(ProtocolError::ConnectionClosed) => {
                info!(player = %color, addr = %addr, "对局者断线");
                session.terminate(&format!("{color} disconnected")).await;
                break;
            }
            Err(e) => {
                // 损坏的流无法重新同步，按断线处理
                warn!(player = %color, addr = %addr, error = %e, "对局者连接异常");
                session.terminate(&format!("{color} disconnected")).await;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::net::TcpStream;
    use tokio::time::timeout;

    use protocol::Phase;

    /// 建立一对回环 TCP 连接，返回服务端写端与客户端读端
    async fn socket_pair() -> (FrameWriter<OwnedWriteHalf>, FrameReader<OwnedReadHalf>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (server, _) = accepted.unwrap();
        let (client_read, _client_write) = client.unwrap().into_split();
        let (_server_read, server_write) = server.into_split();
        (FrameWriter::new(server_write), FrameReader::new(client_read))
    }

    fn expect_state(frame: ServerFrame) -> (protocol::Board, Color, Phase, String) {
        match frame {
            ServerFrame::State {
                board,
                turn,
                case,
                message,
            } => (board, turn, case, message),
            other => panic!("expected state frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_overtaken_frame_not_broadcast() {
        let session = Session::new(1, Weak::new());
        let (writer, mut client) = socket_pair().await;
        {
            let mut set = session.peers.lock().await;
            set.peers.push(Peer {
                role: Role::Spectator,
                addr: "test".to_string(),
                writer,
            });
        }

        // 两次变更按序分配序号，模拟后分配的一帧先到达广播
        let (seq_one, frame_one) = {
            let mut state = session.state.lock().unwrap();
            state.next_frame()
        };
        let (seq_two, frame_two) = {
            let mut state = session.state.lock().unwrap();
            state.game.play(2, 3, Color::Black).unwrap();
            state.next_frame()
        };

        session.broadcast(seq_two, &frame_two).await;
        session.broadcast(seq_one, &frame_one).await;

        // 序号更新的帧仍正常投递
        let (seq_three, frame_three) = {
            let mut state = session.state.lock().unwrap();
            state.game.play(2, 2, Color::White).unwrap();
            state.next_frame()
        };
        session.broadcast(seq_three, &frame_three).await;

        // 接收方恰好收到两帧：状态 2、状态 3，过期的状态 1 被丢弃
        let (board, turn, _, message) = expect_state(client.read_frame().await.unwrap());
        assert_eq!(message, "white to move");
        assert_eq!(turn, Color::White);
        assert_eq!(board.get(2, 3), Some(Color::Black));

        let (board, turn, _, _) = expect_state(client.read_frame().await.unwrap());
        assert_eq!(turn, Color::Black);
        assert_eq!(board.get(2, 2), Some(Color::White));

        let extra = timeout(Duration::from_millis(200), client.read_frame::<ServerFrame>()).await;
        assert!(extra.is_err(), "stale frame must not be delivered");
    }

    #[tokio::test]
    async fn test_spectator_rejected_after_termination() {
        let session = Session::new(2, Weak::new());
        session.terminate("black disconnected").await;
        assert!(!session.is_active());

        let (writer, mut client) = socket_pair().await;
        let admitted = session
            .add_spectator(SpectatorConn {
                writer,
                addr: "test".to_string(),
            })
            .await;
        assert!(!admitted);

        // 连接被关闭，且没有被挂进已拆除会话的集合
        let err = client.read_frame::<ServerFrame>().await.unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionClosed));
        assert!(session.peers.lock().await.peers.is_empty());
    }
}
