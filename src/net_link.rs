//! WebSocket link to the voice server.
//!
//! The handshake and channel join happen up front so startup failures are
//! reported to the caller. After `start` the link runs as a tokio task that
//! encodes outbound frames, decodes inbound ones per speaker and reconnects
//! on its own when the connection drops.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;
use uuid::Uuid;

use crate::audio::opus_codec::{CodecProfile, OpusDecoder, OpusEncoder};
use crate::audio::{FrameSink, PcmFrame};
use crate::error::BridgeError;
use crate::liveness::SpeakerId;
use crate::protocol::{AudioPacket, AudioParams, ClientMessage, PROTOCOL_VERSION, ServerMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const HELLO_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RETRY_DELAY_SECS: u64 = 60;
const OUTBOUND_QUEUE: usize = 32;
const INBOUND_QUEUE: usize = 64;

#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub user: String,
    pub password: Option<String>,
    pub sample_rate: u32,
    pub frame_samples: usize,
}

impl LinkConfig {
    pub fn url(&self) -> Result<Url> {
        let scheme = if self.tls { "wss" } else { "ws" };
        let raw = format!("{}://{}:{}/voice", scheme, self.host, self.port);
        Url::parse(&raw).with_context(|| format!("Invalid server address {}", raw))
    }

    fn frame_duration_ms(&self) -> u32 {
        (self.frame_samples as u64 * 1000 / self.sample_rate as u64) as u32
    }
}

/// A decoded frame from one remote speaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub speaker: SpeakerId,
    pub frame: PcmFrame,
}

/// Feeds captured frames to the link task. Used from the capture thread.
///
/// Never blocks: while the link is reconnecting the queue stops draining and
/// new frames are dropped.
#[derive(Clone)]
pub struct LinkSender {
    tx: mpsc::Sender<PcmFrame>,
}

impl FrameSink for LinkSender {
    fn write_frame(&mut self, frame: PcmFrame) -> Result<()> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                log::debug!("outbound queue full, dropping frame");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => bail!("voice link closed"),
        }
    }
}

pub struct VoiceLink {
    config: LinkConfig,
    client_id: String,
    ws: WsStream,
    session: u32,
    channel: Option<String>,
    bandwidth: i32,
    profile: CodecProfile,
}

impl VoiceLink {
    /// Open the socket and complete the hello exchange.
    pub async fn connect(config: LinkConfig) -> Result<Self, BridgeError> {
        let client_id = Uuid::new_v4().to_string();
        let (ws, session) = handshake(&config, &client_id)
            .await
            .map_err(|e| connection_error(&config, e))?;
        log::info!("Connected to {} as {} (session {})", config.host, config.user, session);
        Ok(Self {
            config,
            client_id,
            ws,
            session,
            channel: None,
            bandwidth: 48000,
            profile: CodecProfile::default(),
        })
    }

    pub async fn join_channel(&mut self, channel: &str) -> Result<(), BridgeError> {
        join(&mut self.ws, channel)
            .await
            .map_err(|e| match e.downcast::<BridgeError>() {
                Ok(bridge) => bridge,
                Err(e) => connection_error(&self.config, e),
            })?;
        log::info!("Joined channel '{}'", channel);
        self.channel = Some(channel.to_string());
        Ok(())
    }

    /// Outbound encoder settings. Takes effect at `start`.
    pub fn configure(&mut self, bandwidth: i32, profile: CodecProfile) {
        self.bandwidth = bandwidth;
        self.profile = profile;
    }

    /// Hand the connection to a background task. Returns the capture-side
    /// sender, the inbound frame queue and the task handle.
    pub fn start(self) -> Result<(LinkSender, mpsc::Receiver<InboundFrame>, JoinHandle<()>)> {
        let encoder = OpusEncoder::new(
            self.config.sample_rate,
            self.config.frame_samples,
            self.profile,
            self.bandwidth,
        )?;
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);

        log::info!(
            "Voice link started: bitrate={}, profile={:?}",
            self.bandwidth,
            self.profile
        );
        let task = LinkTask {
            config: self.config,
            client_id: self.client_id,
            session: self.session,
            channel: self.channel,
            encoder,
            decoders: HashMap::new(),
            sequence: 0,
            outbound: outbound_rx,
            inbound: inbound_tx,
        };
        let handle = tokio::spawn(task.run(self.ws));
        Ok((LinkSender { tx: outbound_tx }, inbound_rx, handle))
    }
}

fn connection_error(config: &LinkConfig, e: anyhow::Error) -> BridgeError {
    BridgeError::Connection {
        host: format!("{}:{}", config.host, config.port),
        reason: format!("{:#}", e),
    }
}

async fn handshake(config: &LinkConfig, client_id: &str) -> Result<(WsStream, u32)> {
    let url = config.url()?;
    let host = url.host_str().unwrap_or(&config.host);

    let mut builder = tokio_tungstenite::tungstenite::http::Request::builder()
        .method("GET")
        .uri(url.as_str())
        .header("Host", format!("{}:{}", host, config.port))
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Version", "13")
        .header(
            "Sec-WebSocket-Key",
            tokio_tungstenite::tungstenite::handshake::client::generate_key(),
        )
        .header("User-Name", &config.user)
        .header("Client-Id", client_id)
        .header("Protocol-Version", PROTOCOL_VERSION.to_string());
    if let Some(password) = &config.password {
        builder = builder.header("Authorization", format!("Bearer {}", password));
    }
    let request = builder.body(())?;

    log::debug!("Connecting to {}...", url);
    let (mut ws, _) = connect_async(request).await?;

    let hello = ClientMessage::Hello {
        version: PROTOCOL_VERSION,
        user: config.user.clone(),
        audio_params: AudioParams {
            format: "opus".to_string(),
            sample_rate: config.sample_rate,
            channels: 1,
            frame_duration_ms: config.frame_duration_ms(),
        },
    };
    let hello_json = serde_json::to_string(&hello)?;
    log::debug!("Sending Hello: {}", hello_json);
    ws.send(Message::Text(hello_json.into())).await?;

    let session = tokio::time::timeout(HELLO_TIMEOUT, await_hello(&mut ws))
        .await
        .map_err(|_| anyhow!("no hello from server within {:?}", HELLO_TIMEOUT))??;
    Ok((ws, session))
}

async fn await_hello(ws: &mut WsStream) -> Result<u32> {
    while let Some(msg) = ws.next().await {
        match msg? {
            Message::Text(text) => match serde_json::from_str::<ServerMessage>(&text) {
                Ok(ServerMessage::Hello { session, channels }) => {
                    if !channels.is_empty() {
                        log::debug!("Server channels: {:?}", channels);
                    }
                    return Ok(session);
                }
                Ok(ServerMessage::Error { code, message, .. }) => {
                    bail!("server refused hello: {} {}", code, message.unwrap_or_default())
                }
                Ok(other) => log::debug!("Ignoring {:?} before hello", other),
                Err(e) => log::debug!("Unparsable message before hello: {}", e),
            },
            Message::Close(frame) => bail!("Server closed connection: {:?}", frame),
            _ => {}
        }
    }
    bail!("Connection closed before hello")
}

async fn join(ws: &mut WsStream, channel: &str) -> Result<()> {
    let join = ClientMessage::Join {
        channel: channel.to_string(),
    };
    ws.send(Message::Text(serde_json::to_string(&join)?.into()))
        .await?;

    let reply = tokio::time::timeout(HELLO_TIMEOUT, async {
        while let Some(msg) = ws.next().await {
            match msg? {
                Message::Text(text) => {
                    if let Some(outcome) = join_outcome(&text, channel) {
                        return outcome;
                    }
                }
                Message::Close(frame) => bail!("Server closed connection: {:?}", frame),
                _ => {}
            }
        }
        bail!("Connection closed while joining")
    })
    .await;
    reply.map_err(|_| anyhow!("no reply to join within {:?}", HELLO_TIMEOUT))?
}

/// Interpret one text message received while waiting for a join reply.
/// `None` means the message is unrelated and waiting continues.
fn join_outcome(text: &str, channel: &str) -> Option<Result<()>> {
    match serde_json::from_str::<ServerMessage>(text).ok()? {
        ServerMessage::Joined { channel: joined } if joined == channel => Some(Ok(())),
        ServerMessage::Error { code, channels, .. } if code == "channel_not_found" => {
            Some(Err(BridgeError::ChannelNotFound {
                channel: channel.to_string(),
                available: channels,
            }
            .into()))
        }
        ServerMessage::Error { code, message, .. } => Some(Err(anyhow!(
            "join refused: {} {}",
            code,
            message.unwrap_or_default()
        ))),
        _ => None,
    }
}

struct LinkTask {
    config: LinkConfig,
    client_id: String,
    session: u32,
    channel: Option<String>,
    encoder: OpusEncoder,
    decoders: HashMap<SpeakerId, OpusDecoder>,
    sequence: u16,
    outbound: mpsc::Receiver<PcmFrame>,
    inbound: mpsc::Sender<InboundFrame>,
}

impl LinkTask {
    // 断线后指数退避重连，直到发送端关闭
    async fn run(mut self, ws: WsStream) {
        let mut ws = ws;
        loop {
            match self.pump(ws).await {
                Ok(()) => {
                    log::info!("Outbound audio closed, voice link shutting down");
                    return;
                }
                Err(e) => log::warn!("Connection error: {:#}", e),
            }
            ws = match self.reconnect().await {
                Some(ws) => ws,
                None => return,
            };
        }
    }

    async fn reconnect(&mut self) -> Option<WsStream> {
        let mut retry_delay = 1;
        loop {
            if self.outbound.is_closed() {
                return None;
            }
            log::info!("Reconnecting in {}s...", retry_delay);
            tokio::time::sleep(Duration::from_secs(retry_delay)).await;
            match self.rejoin().await {
                Ok(ws) => return Some(ws),
                Err(e) => {
                    log::warn!("Reconnect failed: {:#}", e);
                    retry_delay = std::cmp::min(retry_delay * 2, MAX_RETRY_DELAY_SECS);
                }
            }
        }
    }

    async fn rejoin(&mut self) -> Result<WsStream> {
        let (mut ws, session) = handshake(&self.config, &self.client_id).await?;
        if let Some(channel) = &self.channel {
            join(&mut ws, channel).await?;
        }
        log::info!("Reconnected to {} (session {})", self.config.host, session);
        self.session = session;
        self.decoders.clear();
        Ok(ws)
    }

    /// Shuttle audio until the socket fails (Err) or the capture side hangs
    /// up (Ok).
    async fn pump(&mut self, ws: WsStream) -> Result<()> {
        let (mut write, mut read) = ws.split();
        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => self.handle_audio(data),
                        Some(Ok(Message::Text(text))) => self.handle_text(&text),
                        Some(Ok(Message::Close(frame))) => {
                            bail!("Server closed connection: {:?}", frame);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => bail!("Connection closed"),
                    }
                }
                frame = self.outbound.recv() => {
                    match frame {
                        Some(frame) => {
                            let packet = self.encode(&frame)?;
                            write.send(Message::Binary(packet)).await?;
                        }
                        None => {
                            let _ = write.close().await;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn encode(&mut self, frame: &PcmFrame) -> Result<Bytes> {
        let payload = self.encoder.encode(frame)?;
        let packet = AudioPacket {
            speaker: SpeakerId(self.session),
            sequence: self.sequence,
            payload: Bytes::from(payload),
        };
        self.sequence = self.sequence.wrapping_add(1);
        Ok(packet.encode())
    }

    fn handle_audio(&mut self, data: Bytes) {
        let Some(packet) = AudioPacket::decode(data) else {
            log::debug!("Dropping short audio message");
            return;
        };
        if packet.speaker.0 == self.session || self.inbound.is_closed() {
            return;
        }
        let decoder = match self.decoders.entry(packet.speaker) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => match OpusDecoder::new(self.config.sample_rate) {
                Ok(decoder) => entry.insert(decoder),
                Err(e) => {
                    log::error!("Opus decoder for {}: {}", packet.speaker, e);
                    return;
                }
            },
        };
        let frame = match decoder.decode(&packet.payload) {
            Ok(frame) if frame.is_empty() => return,
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Audio decode error from {}: {}", packet.speaker, e);
                return;
            }
        };
        let inbound = InboundFrame {
            speaker: packet.speaker,
            frame,
        };
        if let Err(TrySendError::Full(_)) = self.inbound.try_send(inbound) {
            log::debug!("Inbound queue full, dropping frame from {}", packet.speaker);
        }
    }

    fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<ServerMessage>(text) {
            Ok(ServerMessage::UserLeft { session }) => {
                self.decoders.remove(&SpeakerId(session));
                log::debug!("Speaker {} left", SpeakerId(session));
            }
            Ok(ServerMessage::Channels { channels }) => {
                log::info!("Channels: {}", channels.join(", "));
            }
            Ok(msg) => log::debug!("Received {:?}", msg),
            Err(_) => log::debug!("Received Text: {}", text),
        }
    }
}
