//! Connection handlers for the Fanout server.
//!
//! Two WebSocket endpoints share one listener:
//!
//! - `/ws`: JSON control messages as text, envelope data frames as binary.
//!   A join carrying `datagramPort` registers the caller's UDP endpoint;
//!   without it the WebSocket connection itself becomes the room member.
//! - `/pubsub`: MessagePack frames for control and data alike.
//!
//! Join authorization runs as a pending future polled by the connection loop,
//! so relayed frames keep flowing to a connection while its join waits on the
//! authorization service.

use crate::auth;
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::relay;
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use fanout_core::{Admission, Admitted, ByIdentity, FrameRouter, Registry, Session};
use fanout_protocol::control::{self, ControlCommand, ControlReply, JoinRequest};
use fanout_protocol::frames::error_codes;
use fanout_protocol::{codec, Frame};
use fanout_transport::{
    Peer, PeerOutbound, PubSubTransport, RegistryFor, RouterFor, Transport, UdpConfig,
    UdpOutbound, UdpTransport, WebSocketTransport,
};
use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, SplitSink};
use futures_util::{FutureExt, SinkExt, StreamExt};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

type WsSender = SplitSink<WebSocket, Message>;
type ConnectionSession = Session<Peer, ByIdentity>;

/// Joins awaiting authorization, each tagged with what to do on completion.
type PendingJoins<T> = FuturesUnordered<BoxFuture<'static, (T, Admitted)>>;

/// Who a pending `/ws` join registers.
enum JoinTarget {
    /// The WebSocket connection itself.
    Connection,
    /// The caller's UDP endpoint.
    Udp(SocketAddr),
}

/// Shared server state.
///
/// Each transport has its own registry and router; frames never cross
/// transports.
pub struct AppState {
    /// UDP router, `None` when the UDP relay is disabled.
    pub udp: Option<Arc<RouterFor<UdpTransport>>>,
    /// Router for `/ws` connection members.
    pub websocket: RouterFor<WebSocketTransport>,
    /// Router for `/pubsub` connection members.
    pub pubsub: RouterFor<PubSubTransport>,
    /// Authorized join/leave.
    pub admission: Arc<Admission>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state. `udp` is the send half of the bound UDP relay.
    #[must_use]
    pub fn new(config: Config, admission: Arc<Admission>, udp: Option<UdpOutbound>) -> Self {
        let namespace = admission.namespace().to_string();

        Self {
            udp: udp.map(|outbound| {
                Arc::new(FrameRouter::new(
                    Arc::new(Registry::new()),
                    outbound,
                    namespace.clone(),
                ))
            }),
            websocket: FrameRouter::new(Arc::new(Registry::new()), PeerOutbound, namespace.clone()),
            pubsub: FrameRouter::new(Arc::new(Registry::new()), PeerOutbound, namespace),
            admission,
            config,
        }
    }
}

/// Run the relay: UDP socket, idle sweeper and HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if a listener cannot be bound or the server fails.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let authorizer = auth::build_authorizer(&config.auth)?;
    let admission = Arc::new(Admission::new(authorizer, fanout_core::VIDEOROOM_NAMESPACE));

    let udp = if config.udp.enabled {
        let transport = UdpTransport::bind(UdpConfig {
            bind_addr: config.udp.bind,
            max_datagram_size: config.udp.max_datagram_size,
        })
        .await
        .with_context(|| format!("Failed to bind UDP relay on {}", config.udp.bind))?;
        Some(transport)
    } else {
        info!("UDP relay disabled");
        None
    };

    let state = Arc::new(AppState::new(
        config.clone(),
        admission,
        udp.as_ref().map(UdpTransport::outbound),
    ));

    if let (Some(transport), Some(router)) = (udp, state.udp.clone()) {
        if let Some(timeout) = config.udp.idle_timeout() {
            tokio::spawn(relay::run_idle_sweeper(
                router.clone(),
                timeout,
                config.udp.sweep_interval(),
            ));
        }
        tokio::spawn(relay::run_udp_relay(transport, router));
    }

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Fanout server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );
    info!(
        "Pub/sub endpoint: ws://{}{}",
        addr, config.transport.pubsub_path
    );

    serve(listener, state).await
}

/// Serve the HTTP/WebSocket routes on an already bound listener.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Build the route table.
pub fn app(state: Arc<AppState>) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();
    let pubsub_path = state.config.transport.pubsub_path.clone();

    Router::new()
        .route(&ws_path, get(ws_handler))
        .route(&pubsub_path, get(pubsub_handler))
        .route("/health", get(health_handler))
        .route("/rooms", get(rooms_handler))
        .with_state(state)
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[derive(Debug, Serialize)]
struct RoomInfo {
    room: String,
    members: usize,
}

#[derive(Debug, Serialize)]
struct RoomListing {
    udp: Vec<RoomInfo>,
    websocket: Vec<RoomInfo>,
    pubsub: Vec<RoomInfo>,
}

fn list_rooms<T: Transport>(router: &RouterFor<T>) -> Vec<RoomInfo> {
    let registry = router.registry();
    let mut rooms: Vec<RoomInfo> = registry
        .rooms()
        .into_iter()
        .map(|room| RoomInfo {
            members: registry.member_count(&room),
            room,
        })
        .filter(|info| info.members > 0)
        .collect();
    rooms.sort_by(|a, b| a.room.cmp(&b.room));
    rooms
}

/// Active rooms per transport with their member counts.
async fn rooms_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(RoomListing {
        udp: state
            .udp
            .as_deref()
            .map(list_rooms::<UdpTransport>)
            .unwrap_or_default(),
        websocket: list_rooms::<WebSocketTransport>(&state.websocket),
        pubsub: list_rooms::<PubSubTransport>(&state.pubsub),
    })
}

/// WebSocket upgrade handler for `/ws`.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, remote, state))
}

/// Pub/sub upgrade handler for `/pubsub`.
async fn pubsub_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_pubsub(socket, remote, state))
}

/// Handle a `/ws` connection.
async fn handle_websocket(socket: WebSocket, remote: SocketAddr, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new(WebSocketTransport::NAME);

    let (peer, mut outgoing) =
        Peer::channel(state.config.limits.peer_queue_capacity, Some(remote));
    let mut session = Session::new(
        Arc::clone(&state.admission),
        Arc::clone(state.websocket.registry()),
        peer.clone(),
    );

    debug!(connection = %peer.id(), remote = %remote, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();
    let mut pending: PendingJoins<JoinTarget> = FuturesUnordered::new();

    loop {
        tokio::select! {
            biased;

            // Payloads relayed to this connection
            Some(out) = outgoing.recv() => {
                if sender.send(Message::Binary(out.payload.to_vec())).await.is_err() {
                    break;
                }
            }

            Some((target, admitted)) = pending.next(), if !pending.is_empty() => {
                let reply = complete_join(target, &admitted, &mut session, &state);
                if let Err(e) = send_reply(&mut sender, &reply).await {
                    debug!(connection = %peer.id(), error = %e, "Failed to send reply");
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let Some(reply) =
                            handle_control(&text, remote, &mut session, &mut pending, &state)
                        else {
                            continue;
                        };
                        if let Err(e) = send_reply(&mut sender, &reply).await {
                            debug!(connection = %peer.id(), error = %e, "Failed to send reply");
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        relay::relay_frame::<WebSocketTransport>(
                            &state.websocket,
                            &peer,
                            Bytes::from(data),
                        );
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %peer.id(), "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %peer.id(), error = %e, "WebSocket error");
                        break;
                    }
                    None => {
                        debug!(connection = %peer.id(), "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Joins still awaiting authorization are abandoned
    drop(pending);
    // Leaves every room this connection joined
    drop(session);
    metrics::set_active_rooms(
        WebSocketTransport::NAME,
        state.websocket.registry().room_count(),
    );

    debug!(connection = %peer.id(), "WebSocket disconnected");
}

/// Handle one JSON control message from a `/ws` connection.
///
/// Joins are queued on `pending` and answered when authorization finishes;
/// everything else is answered immediately.
fn handle_control(
    text: &str,
    remote: SocketAddr,
    session: &mut ConnectionSession,
    pending: &mut PendingJoins<JoinTarget>,
    state: &AppState,
) -> Option<ControlReply> {
    let command = match control::parse(text) {
        Ok(command) => command,
        Err(e) => {
            debug!(connection = %session.member().id(), error = %e, "Invalid control message");
            return Some(ControlReply::Error);
        }
    };

    match command {
        ControlCommand::Join(request) => {
            let target = match request.datagram_port {
                Some(port) => match udp_join_endpoint(state, remote, port) {
                    Some(endpoint) => JoinTarget::Udp(endpoint),
                    None => return Some(ControlReply::Error),
                },
                None => JoinTarget::Connection,
            };
            let admission = Arc::clone(session.admission());
            pending.push(
                admission
                    .admit_owned(request)
                    .map(move |admitted| (target, admitted))
                    .boxed(),
            );
            None
        }
        ControlCommand::Leave(request) => Some(match request.datagram_port {
            Some(port) => leave_udp(state, &request.videoroom_id, remote, port),
            None => {
                let reply = session.leave(&request.videoroom_id);
                metrics::set_active_rooms(
                    WebSocketTransport::NAME,
                    state.websocket.registry().room_count(),
                );
                reply
            }
        }),
    }
}

/// Register the member of a `/ws` join whose authorization has finished.
fn complete_join(
    target: JoinTarget,
    admitted: &Admitted,
    session: &mut ConnectionSession,
    state: &AppState,
) -> ControlReply {
    match target {
        JoinTarget::Connection => {
            let reply = session.commit(admitted);
            metrics::record_join(WebSocketTransport::NAME, reply.is_ok());
            metrics::set_active_rooms(
                WebSocketTransport::NAME,
                state.websocket.registry().room_count(),
            );
            reply
        }
        JoinTarget::Udp(endpoint) => {
            let Some(router) = state.udp.as_deref() else {
                return ControlReply::Error;
            };
            let registry: &RegistryFor<UdpTransport> = router.registry();
            let reply = admitted.commit(registry, endpoint);

            metrics::record_join(UdpTransport::NAME, reply.is_ok());
            metrics::set_active_rooms(UdpTransport::NAME, registry.room_count());
            if reply.is_ok() {
                debug!(endpoint = %endpoint, "UDP endpoint registered");
            }
            reply
        }
    }
}

/// The UDP endpoint a control peer declares: its own IP, the given port.
///
/// IPv4-mapped addresses from a dual-stack listener are unmapped so they
/// match the source address of the peer's datagrams.
fn udp_endpoint(remote: SocketAddr, port: u16) -> Option<SocketAddr> {
    (port != 0).then(|| SocketAddr::new(remote.ip().to_canonical(), port))
}

/// Check a UDP join can be served, returning the endpoint to register.
fn udp_join_endpoint(state: &AppState, remote: SocketAddr, port: u16) -> Option<SocketAddr> {
    if state.udp.is_none() {
        warn!(remote = %remote, "UDP join requested but the UDP relay is disabled");
        metrics::record_join(UdpTransport::NAME, false);
        return None;
    }
    let endpoint = udp_endpoint(remote, port);
    if endpoint.is_none() {
        metrics::record_join(UdpTransport::NAME, false);
    }
    endpoint
}

/// Remove the caller's UDP endpoint from a room.
fn leave_udp(state: &AppState, videoroom_id: &str, remote: SocketAddr, port: u16) -> ControlReply {
    let (Some(router), Some(endpoint)) = (state.udp.as_deref(), udp_endpoint(remote, port)) else {
        return ControlReply::Error;
    };

    let registry: &RegistryFor<UdpTransport> = router.registry();
    state.admission.leave(registry, videoroom_id, &endpoint);
    metrics::set_active_rooms(UdpTransport::NAME, registry.room_count());

    ControlReply::left(videoroom_id)
}

/// Handle a `/pubsub` connection.
async fn handle_pubsub(socket: WebSocket, remote: SocketAddr, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new(PubSubTransport::NAME);

    let (peer, mut outgoing) =
        Peer::channel(state.config.limits.peer_queue_capacity, Some(remote));
    let mut session = Session::new(
        Arc::clone(&state.admission),
        Arc::clone(state.pubsub.registry()),
        peer.clone(),
    );

    debug!(connection = %peer.id(), remote = %remote, "Pub/sub connected");

    let (mut sender, mut receiver) = socket.split();
    // Pending joins keyed by the frame id their reply answers.
    let mut pending: PendingJoins<u64> = FuturesUnordered::new();

    loop {
        tokio::select! {
            biased;

            Some(out) = outgoing.recv() => {
                let frame = Frame::publish(out.room_id, out.payload.to_vec());
                if send_frame(&mut sender, &frame).await.is_err() {
                    break;
                }
            }

            Some((id, admitted)) = pending.next(), if !pending.is_empty() => {
                let reply = session.commit(&admitted);
                metrics::record_join(PubSubTransport::NAME, reply.is_ok());
                metrics::set_active_rooms(PubSubTransport::NAME, state.pubsub.registry().room_count());
                if let Err(e) = send_frame(&mut sender, &Frame::reply(id, reply)).await {
                    debug!(connection = %peer.id(), error = %e, "Failed to send frame");
                    break;
                }
            }

            msg = receiver.next() => {
                let response = match msg {
                    Some(Ok(Message::Binary(data))) => match codec::decode(&data) {
                        Ok(frame) => handle_frame(frame, &peer, &mut session, &mut pending, &state),
                        Err(e) => {
                            debug!(connection = %peer.id(), error = %e, "Undecodable frame");
                            metrics::record_malformed(PubSubTransport::NAME);
                            Some(Frame::error(error_codes::INVALID_FRAME, e.to_string()))
                        }
                    },
                    Some(Ok(Message::Text(_))) => Some(Frame::error(
                        error_codes::INVALID_FRAME,
                        "expected a binary MessagePack frame",
                    )),
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                        None
                    }
                    Some(Ok(Message::Pong(_))) => None,
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %peer.id(), "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %peer.id(), error = %e, "WebSocket error");
                        break;
                    }
                    None => {
                        debug!(connection = %peer.id(), "Pub/sub stream ended");
                        break;
                    }
                };

                if let Some(frame) = response {
                    if let Err(e) = send_frame(&mut sender, &frame).await {
                        debug!(connection = %peer.id(), error = %e, "Failed to send frame");
                        break;
                    }
                }
            }
        }
    }

    drop(pending);
    drop(session);
    metrics::set_active_rooms(PubSubTransport::NAME, state.pubsub.registry().room_count());

    debug!(connection = %peer.id(), "Pub/sub disconnected");
}

/// Handle a decoded pub/sub frame, returning the frame to answer with.
///
/// Joins are queued on `pending`; their reply is sent once authorized.
fn handle_frame(
    frame: Frame,
    peer: &Peer,
    session: &mut ConnectionSession,
    pending: &mut PendingJoins<u64>,
    state: &AppState,
) -> Option<Frame> {
    match frame {
        Frame::Join {
            id,
            videoroom_id,
            slot,
            id_token,
        } => {
            let request = JoinRequest {
                videoroom_id,
                slot,
                id_token,
                datagram_port: None,
            };
            let admission = Arc::clone(session.admission());
            pending.push(
                admission
                    .admit_owned(request)
                    .map(move |admitted| (id, admitted))
                    .boxed(),
            );
            None
        }

        Frame::Leave { id, videoroom_id } => {
            let reply = session.leave(&videoroom_id);
            metrics::set_active_rooms(PubSubTransport::NAME, state.pubsub.registry().room_count());
            Some(Frame::reply(id, reply))
        }

        Frame::Publish {
            videoroom_id,
            payload,
        } => {
            let start = Instant::now();
            let bytes = payload.len();
            let report = state.pubsub.route(peer, &videoroom_id, Bytes::from(payload));
            metrics::record_route(
                PubSubTransport::NAME,
                bytes,
                &report,
                start.elapsed().as_secs_f64(),
            );
            None
        }

        Frame::Ping { timestamp } => Some(Frame::pong(timestamp)),

        Frame::Pong { .. } => None,

        other => {
            warn!(connection = %peer.id(), frame_type = ?other.frame_type(), "Unexpected frame type");
            Some(Frame::error(
                error_codes::UNEXPECTED_FRAME,
                "unexpected frame type",
            ))
        }
    }
}

/// Send a control reply as JSON text.
async fn send_reply(sender: &mut WsSender, reply: &ControlReply) -> Result<()> {
    sender.send(Message::Text(reply.to_json()?)).await?;
    Ok(())
}

/// Send a MessagePack frame.
async fn send_frame(sender: &mut WsSender, frame: &Frame) -> Result<()> {
    let data = codec::encode(frame)?;
    sender.send(Message::Binary(data.to_vec())).await?;
    Ok(())
}
