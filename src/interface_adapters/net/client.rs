use crate::domain::sync::DeltaEncoder;
use crate::domain::{EntityId, Snapshot};
use crate::interface_adapters::http::error_response;
use crate::interface_adapters::protocol::{
    ClientMessage, InputCommandDto, JoinPayload, ServerMessage, StateUpdateDto, route_events,
};
use crate::interface_adapters::state::AppState;
use crate::interface_adapters::utils::rng::rand_id;
use crate::use_cases::{GameEvent, LobbyError, LobbyHandle, LobbyRegistry, ServerState, WorldUpdate};

use axum::{
    extract::{
        Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures_util::SinkExt;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{Instrument, debug, error, info, info_span, warn};

#[derive(Debug)]
enum NetError {
    // Categorizes connection lifecycle failures so callers can decide policy.
    #[allow(dead_code)]
    Ws(axum::Error),
    #[allow(dead_code)]
    Serialization(serde_json::Error),
    InputClosed,
    WorldUpdatesClosed,
    ServerStateClosed,
    JoinRequired,
    JoinTimeout,
    #[allow(dead_code)]
    JoinRejected(LobbyError),
    ClosedBeforeJoin,
}

impl From<axum::Error> for NetError {
    fn from(e: axum::Error) -> Self {
        NetError::Ws(e)
    }
}

#[derive(Debug, serde::Deserialize)]
pub struct LobbyQuery {
    // The lobby id the client wants to join.
    #[serde(default)]
    lobby_id: Option<String>,
}

const LOG_THROTTLE: Duration = Duration::from_secs(2);
const MAX_INVALID_JSON: u32 = 10;
const JOIN_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<LobbyQuery>,
) -> impl IntoResponse {
    let lobby_id = query
        .lobby_id
        .unwrap_or_else(|| state.default_lobby_id.to_string());

    let Some(lobby) = state.lobby_registry.get_lobby(&lobby_id).await else {
        // Keep not-found responses consistent with the JSON error schema.
        return error_response(StatusCode::NOT_FOUND, LobbyError::NotFound);
    };

    let lobby_registry = state.lobby_registry.clone();
    let delta_history = state.delta_history;
    ws.on_upgrade(move |socket| {
        // Separate connection id for correlating logs before/after a player_id exists.
        let span = info_span!("conn", conn_id = rand_id(), player_id = tracing::field::Empty);
        handle_socket(socket, lobby, lobby_registry, delta_history).instrument(span)
    })
}

async fn handle_socket(
    mut socket: WebSocket,
    lobby: LobbyHandle,
    lobby_registry: Arc<LobbyRegistry>,
    delta_history: usize,
) {
    let mut ctx = match bootstrap_connection(&mut socket, &lobby, delta_history).await {
        Ok(ctx) => ctx,
        Err(NetError::ClosedBeforeJoin) => {
            info!("client disconnected before join handshake");
            return;
        }
        Err(e) => {
            error!(error = ?e, "failed to bootstrap connection");
            let _ = send_close_with_reason(&mut socket, close_code::POLICY, "bootstrap failed").await;
            return;
        }
    };
    tracing::Span::current().record("player_id", ctx.player_id);

    // Register the connection so the lobby stays alive while sockets are active.
    if lobby_registry.register_connection(&lobby.lobby_id).await.is_none() {
        // The lobby can be removed between lookup and registration.
        warn!(lobby_id = %lobby.lobby_id, "lobby missing during connection registration");
        if let Err(e) = release(&ctx, None).await {
            debug!(error = ?e, "cleanup after missing lobby failed");
        }
        let _ = send_close_with_reason(&mut socket, close_code::POLICY, "lobby unavailable").await;
        return;
    }

    info!(
        player_id = ctx.player_id,
        entity = ?ctx.entity,
        display_name = %ctx.display_name,
        "client connected"
    );

    if let Err(e) = run_client_loop(&mut socket, &mut ctx).await {
        warn!(error = ?e, "client loop exited with error");
    }

    if let Err(e) = release(&ctx, Some(&lobby_registry)).await {
        warn!(error = ?e, "error during disconnect cleanup");
    }
}

async fn send_message(socket: &mut WebSocket, msg: &ServerMessage) -> Result<usize, NetError> {
    let txt = serde_json::to_string(msg).map_err(NetError::Serialization)?;
    let bytes = txt.len();
    socket
        .send(Message::Text(txt.into()))
        .await
        .map_err(NetError::Ws)?;
    Ok(bytes)
}

async fn send_close_with_reason(
    socket: &mut WebSocket,
    code: u16,
    reason: &'static str,
) -> Result<(), NetError> {
    socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await
        .map_err(NetError::Ws)?;
    socket.close().await.map_err(NetError::Ws)
}

#[derive(Debug, Default)]
struct ConnStats {
    msgs_in: u64,
    msgs_out: u64,
    bytes_in: u64,
    bytes_out: u64,
    invalid_json: u32,
    // Full snapshots sent to recover from broadcast lag.
    lag_recoveries: u64,
}

struct ConnCtx {
    player_id: u64,
    // None for spectators outside the lobby's allow list.
    entity: Option<EntityId>,
    display_name: String,
    lobby: LobbyHandle,
    world_rx: broadcast::Receiver<WorldUpdate>,
    server_state_rx: watch::Receiver<ServerState>,
    encoder: DeltaEncoder,
    stats: ConnStats,

    last_input_full_log: Instant,
    last_world_lag_log: Instant,
    last_invalid_input_log: Instant,

    close_frame: Option<CloseFrame>,
}

impl ConnCtx {
    fn can_spawn(&self) -> bool {
        self.entity.is_some()
    }
}

async fn bootstrap_connection(
    socket: &mut WebSocket,
    lobby: &LobbyHandle,
    delta_history: usize,
) -> Result<ConnCtx, NetError> {
    // Subscribe to updates *before* doing anything else (awaits) to not miss packets.
    let world_rx = lobby.world_tx.subscribe();
    let server_state_rx = lobby.server_state_tx.subscribe();

    let (join, bytes_in) = match timeout(JOIN_HANDSHAKE_TIMEOUT, read_join_handshake(socket)).await
    {
        Ok(result) => result?,
        Err(_) => {
            let _ = send_close_with_reason(socket, close_code::POLICY, "join timeout").await;
            return Err(NetError::JoinTimeout);
        }
    };

    let player_id = join.player_id.unwrap_or_else(rand_id);
    if let Err(err) = lobby.claim_player(player_id).await {
        let _ = send_close_with_reason(socket, close_code::POLICY, "player already connected").await;
        return Err(NetError::JoinRejected(err));
    }

    // Only allow spawning if the lobby allows this player id.
    let entity = if lobby.is_player_allowed(player_id) {
        // Join happens before initial state so the snapshot can include the new player.
        let (reply, rx) = oneshot::channel();
        let joined = match lobby.input_tx.send(GameEvent::Join { player_id, reply }).await {
            Ok(()) => rx.await.map_err(|_| NetError::InputClosed),
            Err(_) => Err(NetError::InputClosed),
        };
        match joined {
            Ok(entity) => Some(entity),
            Err(err) => {
                lobby.release_player(player_id).await;
                return Err(err);
            }
        }
    } else {
        None
    };

    let now = Instant::now() - LOG_THROTTLE;
    let mut ctx = ConnCtx {
        player_id,
        entity,
        display_name: join.display_name.unwrap_or_else(|| format!("player-{player_id}")),
        lobby: lobby.clone(),
        world_rx,
        server_state_rx,
        encoder: DeltaEncoder::new(delta_history),
        stats: ConnStats {
            msgs_in: 1,
            bytes_in,
            ..ConnStats::default()
        },
        last_input_full_log: now,
        last_world_lag_log: now,
        last_invalid_input_log: now,
        close_frame: None,
    };

    // Tell the client "This is who you are", then where the match is at.
    let initial_state = ctx.server_state_rx.borrow().clone();
    let greeting = [
        ServerMessage::Identity {
            player_id: player_id.to_string(),
            entity_id: entity.map(|id| id.0),
        },
        ServerMessage::GameState(initial_state.into()),
    ];
    for msg in &greeting {
        if let Err(err) = send_message(socket, msg).await {
            let _ = release(&ctx, None).await;
            return Err(err);
        }
    }

    // Fresh connections (and reconnects) start from full state.
    if let Some(latest) = ctx.lobby.view.latest() {
        if let Err(err) = send_full_state(socket, &mut ctx, &latest).await {
            let _ = release(&ctx, None).await;
            return Err(err);
        }
    }

    Ok(ctx)
}

async fn read_join_handshake(socket: &mut WebSocket) -> Result<(JoinPayload, u64), NetError> {
    loop {
        let Some(incoming) = socket.recv().await else {
            return Err(NetError::ClosedBeforeJoin);
        };

        match incoming.map_err(NetError::Ws)? {
            Message::Text(text) => {
                let bytes_in = text.len() as u64;
                return match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Join(payload)) => Ok((payload, bytes_in)),
                    Ok(_) => {
                        let _ =
                            send_close_with_reason(socket, close_code::POLICY, "join required").await;
                        Err(NetError::JoinRequired)
                    }
                    Err(_) => {
                        let _ = send_close_with_reason(
                            socket,
                            close_code::POLICY,
                            "invalid join payload",
                        )
                        .await;
                        Err(NetError::JoinRequired)
                    }
                };
            }
            Message::Binary(_) => {
                let _ = send_close_with_reason(
                    socket,
                    close_code::UNSUPPORTED,
                    "binary messages not supported",
                )
                .await;
                return Err(NetError::JoinRequired);
            }
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => return Err(NetError::ClosedBeforeJoin),
        }
    }
}

fn should_log(last: &mut Instant) -> bool {
    if last.elapsed() >= LOG_THROTTLE {
        *last = Instant::now();
        true
    } else {
        false
    }
}

enum LoopControl {
    Continue,
    Disconnect,
}

async fn run_client_loop(socket: &mut WebSocket, ctx: &mut ConnCtx) -> Result<(), NetError> {
    let mut fatal: Option<NetError> = None;

    loop {
        let control = tokio::select! {
            incoming = socket.recv() => handle_incoming_ws(incoming, ctx),

            update = ctx.world_rx.recv() => match update {
                Ok(update) => forward_world_update(socket, ctx, &update).await,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    recover_from_lag(socket, ctx, missed).await
                }
                Err(broadcast::error::RecvError::Closed) => Err(NetError::WorldUpdatesClosed),
            },

            changed = ctx.server_state_rx.changed() => match changed {
                Ok(()) => forward_server_state(socket, ctx).await,
                Err(_) => Err(NetError::ServerStateClosed),
            },
        };

        let disconnect = match control {
            Ok(LoopControl::Continue) => false,
            Ok(LoopControl::Disconnect) => true,
            Err(e) => {
                fatal = Some(e);
                true
            }
        };

        if disconnect {
            if let Some(frame) = ctx.close_frame.take() {
                let _ = socket.send(Message::Close(Some(frame))).await;
            }
            if let Err(err) = socket.close().await.map_err(NetError::Ws) {
                debug!(error = ?err, "socket close error");
            }
            break;
        }
    }

    match fatal {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn handle_incoming_ws(
    incoming: Option<Result<Message, axum::Error>>,
    ctx: &mut ConnCtx,
) -> Result<LoopControl, NetError> {
    let player_id = ctx.player_id;
    match incoming {
        Some(Ok(Message::Text(text))) => {
            ctx.stats.msgs_in += 1;
            ctx.stats.bytes_in += text.len() as u64;

            match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Join(_)) => {
                    // Ignore repeated Join packets after bootstrap to keep the session stable.
                    if should_log(&mut ctx.last_invalid_input_log) {
                        warn!(player_id, "duplicate join ignored");
                    }
                    Ok(LoopControl::Continue)
                }
                Ok(ClientMessage::Ack { tick }) => {
                    ctx.encoder.acknowledge(tick);
                    Ok(LoopControl::Continue)
                }
                Ok(ClientMessage::Input(input)) => process_input_message(ctx, input),
                Err(parse_err) => {
                    ctx.stats.invalid_json += 1;
                    if should_log(&mut ctx.last_invalid_input_log) {
                        warn!(
                            player_id,
                            bytes = text.len(),
                            error = %parse_err,
                            "failed to parse client message"
                        );
                    }

                    if ctx.stats.invalid_json > MAX_INVALID_JSON {
                        ctx.close_frame = Some(CloseFrame {
                            code: close_code::POLICY,
                            reason: "too many invalid messages".into(),
                        });
                        return Ok(LoopControl::Disconnect);
                    }
                    Ok(LoopControl::Continue)
                }
            }
        }
        Some(Ok(Message::Binary(_))) => {
            ctx.close_frame = Some(CloseFrame {
                code: close_code::UNSUPPORTED,
                reason: "binary messages not supported".into(),
            });
            Ok(LoopControl::Disconnect)
        }
        Some(Ok(Message::Ping(_) | Message::Pong(_))) => Ok(LoopControl::Continue),
        Some(Ok(Message::Close(_))) => Ok(LoopControl::Disconnect),
        Some(Err(e)) => {
            warn!(player_id, error = %e, "websocket recv error");
            Ok(LoopControl::Disconnect)
        }
        None => {
            info!(player_id, "websocket closed");
            Ok(LoopControl::Disconnect)
        }
    }
}

fn process_input_message(
    ctx: &mut ConnCtx,
    input: InputCommandDto,
) -> Result<LoopControl, NetError> {
    let player_id = ctx.player_id;
    if !ctx.can_spawn() {
        if should_log(&mut ctx.last_invalid_input_log) {
            warn!(player_id, "spectator input ignored");
        }
        return Ok(LoopControl::Continue);
    }

    // Value sanitizing and sequencing happen in the world task.
    let command = input.into_command(player_id);
    match ctx.lobby.input_tx.try_send(GameEvent::Input { command }) {
        Ok(()) => Ok(LoopControl::Continue),
        Err(mpsc::error::TrySendError::Full(_)) => {
            // Lost inputs are corrected by the next state update.
            if should_log(&mut ctx.last_input_full_log) {
                warn!(player_id, "input channel full; dropping input");
            }
            Ok(LoopControl::Continue)
        }
        Err(mpsc::error::TrySendError::Closed(_)) => Err(NetError::InputClosed),
    }
}

async fn send_counted(
    socket: &mut WebSocket,
    stats: &mut ConnStats,
    msg: &ServerMessage,
) -> Result<(), NetError> {
    let bytes = send_message(socket, msg).await?;
    stats.msgs_out += 1;
    stats.bytes_out += bytes as u64;
    Ok(())
}

async fn forward_world_update(
    socket: &mut WebSocket,
    ctx: &mut ConnCtx,
    update: &WorldUpdate,
) -> Result<LoopControl, NetError> {
    let delta = ctx.encoder.encode(&update.snapshot);
    let (projectile_msgs, events) = route_events(&update.events, update.snapshot.timestamp);
    let ack = update.acks.get(&ctx.player_id).copied();
    let state_msg = ServerMessage::StateUpdate(StateUpdateDto::new(&delta, ack, events));

    for msg in projectile_msgs.iter().chain(std::iter::once(&state_msg)) {
        if let Err(err) = send_counted(socket, &mut ctx.stats, msg).await {
            // Log unexpected send failures; disconnect will follow immediately.
            warn!(error = ?err, "failed to send world update");
            return Ok(LoopControl::Disconnect);
        }
    }
    Ok(LoopControl::Continue)
}

async fn send_full_state(
    socket: &mut WebSocket,
    ctx: &mut ConnCtx,
    snapshot: &Arc<Snapshot>,
) -> Result<(), NetError> {
    ctx.encoder.reset();
    let delta = ctx.encoder.encode(snapshot);
    let msg = ServerMessage::StateUpdate(StateUpdateDto::new(&delta, None, Vec::new()));
    send_counted(socket, &mut ctx.stats, &msg).await
}

async fn recover_from_lag(
    socket: &mut WebSocket,
    ctx: &mut ConnCtx,
    missed: u64,
) -> Result<LoopControl, NetError> {
    if should_log(&mut ctx.last_world_lag_log) {
        warn!(missed, "world updates lagged; sending full state");
    }

    // Resync strategy: drop the delta baseline and send the latest full state.
    let Some(latest) = ctx.lobby.view.latest() else {
        ctx.encoder.reset();
        return Ok(LoopControl::Continue);
    };
    ctx.stats.lag_recoveries += 1;
    match send_full_state(socket, ctx, &latest).await {
        Ok(()) => Ok(LoopControl::Continue),
        Err(err) => {
            warn!(error = ?err, "failed to send lag recovery state");
            Ok(LoopControl::Disconnect)
        }
    }
}

async fn forward_server_state(
    socket: &mut WebSocket,
    ctx: &mut ConnCtx,
) -> Result<LoopControl, NetError> {
    // Clone out of the watch borrow before awaiting.
    let state = ctx.server_state_rx.borrow_and_update().clone();
    match send_counted(socket, &mut ctx.stats, &ServerMessage::GameState(state.into())).await {
        Ok(()) => Ok(LoopControl::Continue),
        Err(err) => {
            warn!(error = ?err, "failed to send server state");
            Ok(LoopControl::Disconnect)
        }
    }
}

/// Despawns the player, frees the player slot and, with a registry, drops
/// the lobby connection count.
async fn release(ctx: &ConnCtx, lobby_registry: Option<&LobbyRegistry>) -> Result<(), NetError> {
    let player_id = ctx.player_id;
    let left = if ctx.can_spawn() {
        ctx.lobby
            .input_tx
            .send(GameEvent::Leave { player_id })
            .await
            .map_err(|_| NetError::InputClosed)
    } else {
        Ok(())
    };

    ctx.lobby.release_player(player_id).await;
    if let Some(registry) = lobby_registry {
        registry.register_disconnect(&ctx.lobby.lobby_id).await;
        let stats = &ctx.stats;
        debug!(
            player_id,
            msgs_in = stats.msgs_in,
            msgs_out = stats.msgs_out,
            bytes_in = stats.bytes_in,
            bytes_out = stats.bytes_out,
            invalid_json = stats.invalid_json,
            lag_recoveries = stats.lag_recoveries,
            "connection stats"
        );
        info!(player_id, "client disconnected");
    }
    left
}
