//! 大厅与配对
//!
//! 新连接先发一帧分类消息声明自己是对局者还是观战者。对局者进入等待队列，
//! 攒够两人后按 FIFO 取出（先到者执黑）做两步配色握手；观战者在有活动
//! 对局时立刻挂入该会话，否则排入全局观战队列，整体转交给下一局。
//! 本设计同一时刻最多一局活动对局。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;
use tracing::{info, warn};

use protocol::{
    ClientFrame, Color, Connection, FrameReader, FrameWriter, Listener, Mode, ProtocolError,
    Result, ServerFrame, TcpConnection, TcpListener, HANDSHAKE_TIMEOUT,
};

use crate::session::{PlayerConn, Session, SpectatorConn};

/// 已分类、等待配对的对局者连接
struct WaitingPlayer {
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
    addr: String,
}

/// 大厅共享状态，独立于任何会话锁的临界区
struct LobbyInner {
    /// 等待配对的对局者队列（FIFO）
    waiting: VecDeque<WaitingPlayer>,
    /// 全局观战队列，仅在无活动对局时使用
    spectators: Vec<SpectatorConn>,
    /// 当前唯一的活动会话
    active: Option<Arc<Session>>,
    /// 配对进行中标记，保证同一时刻只有一个配对流程
    pairing: bool,
}

/// 大厅：接收连接、分类、配对、转交观战者
pub struct Lobby {
    inner: Mutex<LobbyInner>,
    next_session_id: AtomicU64,
}

impl Lobby {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(LobbyInner {
                waiting: VecDeque::new(),
                spectators: Vec::new(),
                active: None,
                pairing: false,
            }),
            next_session_id: AtomicU64::new(1),
        })
    }

    /// 接受循环：每个新连接起一个分类任务
    pub async fn run(self: Arc<Self>, mut listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok(conn) => {
                    let lobby = self.clone();
                    tokio::spawn(async move {
                        lobby.handle_connection(conn).await;
                    });
                }
                Err(e) => {
                    warn!(error = %e, "接受连接失败");
                }
            }
        }
    }

    /// 读取分类帧并把连接路由到对局者队列或观战路径
    async fn handle_connection(self: Arc<Self>, conn: TcpConnection) {
        let addr = conn.peer_addr().unwrap_or_else(|| "unknown".to_string());
        info!(addr = %addr, "新连接");
        let (mut reader, mut writer) = conn.split();

        let frame = match timeout(HANDSHAKE_TIMEOUT, reader.read_frame::<ClientFrame>()).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                warn!(addr = %addr, error = %e, "分类帧读取失败");
                let _ = writer.shutdown().await;
                return;
            }
            Err(_) => {
                warn!(addr = %addr, "分类帧等待超时");
                let _ = writer.shutdown().await;
                return;
            }
        };

        match frame {
            ClientFrame::Classify { mode: Mode::Player } => {
                info!(addr = %addr, "对局者进入等待队列");
                self.enqueue_player(WaitingPlayer {
                    reader,
                    writer,
                    addr,
                })
                .await;
            }
            ClientFrame::Classify {
                mode: Mode::Spectator,
            } => {
                // 观战者只写不读，读端就此丢弃
                self.attach_spectator(SpectatorConn { writer, addr }).await;
            }
            _ => {
                warn!(addr = %addr, "首帧不是分类消息，关闭连接");
                let _ = writer.shutdown().await;
            }
        }
    }

    /// 观战者路由：有活动对局立刻挂入，否则排入全局队列
    async fn attach_spectator(&self, spectator: SpectatorConn) {
        let active = {
            let inner = self.inner.lock().expect("lobby mutex poisoned");
            inner.active.clone()
        };

        if let Some(session) = active {
            if session.add_spectator(spectator).await {
                return;
            }
            // 会话恰好在挂入前结束，连接已被关闭
            return;
        }

        info!("暂无活动对局，观战者进入全局队列");
        let mut inner = self.inner.lock().expect("lobby mutex poisoned");
        inner.spectators.push(spectator);
    }

    /// 对局者入队，凑齐两人且无进行中的配对时启动配对流程
    async fn enqueue_player(self: &Arc<Self>, player: WaitingPlayer) {
        {
            let mut inner = self.inner.lock().expect("lobby mutex poisoned");
            inner.waiting.push_back(player);
            if inner.pairing || inner.waiting.len() < 2 {
                return;
            }
            inner.pairing = true;
        }
        self.pair_loop().await;
    }

    /// 反复从队首取两人配对，直到队列不足两人
    async fn pair_loop(self: &Arc<Self>) {
        loop {
            let (first, second) = {
                let mut inner = self.inner.lock().expect("lobby mutex poisoned");
                match (inner.waiting.pop_front(), inner.waiting.pop_front()) {
                    (Some(first), Some(second)) => (first, second),
                    (Some(first), None) => {
                        inner.waiting.push_front(first);
                        inner.pairing = false;
                        return;
                    }
                    _ => {
                        inner.pairing = false;
                        return;
                    }
                }
            };
            self.pair(first, second).await;
        }
    }

    /// 两步配色握手并创建会话：先到者执黑，后到者执白
    ///
    /// 一方握手失败只关闭该方连接，另一方放回队首，不为同伴的失败受罚。
    async fn pair(self: &Arc<Self>, first: WaitingPlayer, second: WaitingPlayer) {
        let black = match handshake(first, Color::Black).await {
            Ok(player) => player,
            Err(e) => {
                warn!(error = %e, "黑方握手失败，白方候选放回队首");
                self.requeue_front(second);
                return;
            }
        };

        let white = match handshake(second, Color::White).await {
            Ok(player) => player,
            Err(e) => {
                warn!(error = %e, "白方握手失败，黑方候选放回队首");
                self.requeue_front(black_to_waiting(black));
                return;
            }
        };

        self.start_session(black, white).await;
    }

    /// 放回队首：下一次配对优先取出
    fn requeue_front(&self, player: WaitingPlayer) {
        let mut inner = self.inner.lock().expect("lobby mutex poisoned");
        inner.waiting.push_front(player);
    }

    /// 创建并启动新会话；若已有活动会话则先将其终止（单对局策略），
    /// 全局观战队列整体转交后清空
    async fn start_session(self: &Arc<Self>, black: PlayerConn, white: PlayerConn) {
        let (spectators, previous) = {
            let mut inner = self.inner.lock().expect("lobby mutex poisoned");
            (std::mem::take(&mut inner.spectators), inner.active.take())
        };

        if let Some(previous) = previous {
            previous.terminate("a new match is starting").await;
        }

        let id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        let session = Session::new(id, Arc::downgrade(self));
        {
            let mut inner = self.inner.lock().expect("lobby mutex poisoned");
            inner.active = Some(session.clone());
        }

        session.start(black, white, spectators).await;
    }

    /// 会话终局后回调：仅当引用仍指向该会话时清除
    pub fn clear_active(&self, session_id: u64) {
        let mut inner = self.inner.lock().expect("lobby mutex poisoned");
        if inner
            .active
            .as_ref()
            .is_some_and(|s| s.id() == session_id)
        {
            inner.active = None;
        }
    }

    /// 进程级关闭：终止活动会话并关闭所有排队中的连接
    pub async fn shutdown(&self) {
        info!("大厅关闭中");
        let (active, waiting, spectators) = {
            let mut inner = self.inner.lock().expect("lobby mutex poisoned");
            (
                inner.active.take(),
                std::mem::take(&mut inner.waiting),
                std::mem::take(&mut inner.spectators),
            )
        };

        if let Some(session) = active {
            session.terminate("server shutting down").await;
        }
        for mut player in waiting {
            let _ = player.writer.shutdown().await;
        }
        for mut spectator in spectators {
            let _ = spectator.writer.shutdown().await;
        }
    }
}

/// 把已握手的对局者连接还原为等待队列元素（颜色分配在下次配对时重做）
fn black_to_waiting(player: PlayerConn) -> WaitingPlayer {
    WaitingPlayer {
        reader: player.reader,
        writer: player.writer,
        addr: player.addr,
    }
}

/// 两步配色握手：发送配色分配，在限时内等待回传同一颜色的确认
///
/// 任何失败（超时、异常帧、颜色不符）都关闭该连接后返回错误。
async fn handshake(mut player: WaitingPlayer, color: Color) -> Result<PlayerConn> {
    let result = handshake_inner(&mut player, color).await;
    match result {
        Ok(()) => {
            info!(addr = %player.addr, color = %color, "配色握手完成");
            Ok(PlayerConn {
                color,
                reader: player.reader,
                writer: player.writer,
                addr: player.addr,
            })
        }
        Err(e) => {
            let _ = player.writer.shutdown().await;
            Err(e)
        }
    }
}

async fn handshake_inner(player: &mut WaitingPlayer, color: Color) -> Result<()> {
    player
        .writer
        .write_frame(&ServerFrame::AssignColor {
            player_color: color,
        })
        .await?;

    let ack = timeout(HANDSHAKE_TIMEOUT, player.reader.read_frame::<ClientFrame>())
        .await
        .map_err(|_| ProtocolError::HandshakeTimeout)??;

    match ack {
        ClientFrame::ColorSet { color: acked } if acked == color => Ok(()),
        ClientFrame::ColorSet { color: acked } => Err(ProtocolError::HandshakeMismatch {
            assigned: color,
            acknowledged: acked,
        }),
        _ => Err(ProtocolError::UnexpectedFrame(
            "expected color_set acknowledgement",
        )),
    }
}
