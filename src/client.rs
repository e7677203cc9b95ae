// file: src/client.rs
// description: WebSocket transport; a background task owns the socket and reports back to the runtime

use crate::{
    config::WebSocketConfig,
    connection::{CloseReason, SessionId, Transport, TransportEvent},
    error::TrackerError,
    runtime::{InputSender, RuntimeInput},
    types::ClientMessage,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, trace, warn};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct Session {
    outbound: mpsc::UnboundedSender<Message>,
    task: JoinHandle<()>,
}

/// [`Transport`] over tokio-tungstenite. Must be used from within a tokio runtime.
pub struct WsTransport {
    config: WebSocketConfig,
    input: InputSender,
    session: Option<Session>,
}

impl WsTransport {
    pub fn new(config: WebSocketConfig, input: InputSender) -> Self {
        Self {
            config,
            input,
            session: None,
        }
    }
}

impl Transport for WsTransport {
    fn open(&mut self, session: SessionId) {
        self.close();

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let reporter = Reporter {
            session,
            input: self.input.clone(),
        };
        let task = tokio::spawn(run_session(self.config.clone(), outbound_rx, reporter));
        self.session = Some(Session { outbound, task });
    }

    fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.task.abort();
            debug!("WebSocket session task stopped");
        }
    }

    fn send(&mut self, message: &ClientMessage) -> Result<(), TrackerError> {
        let session = self.session.as_ref().ok_or(TrackerError::NotConnected)?;
        let text = message.to_json().map_err(|e| {
            error!("Failed to serialize subscription message: {}", e);
            e
        })?;

        session
            .outbound
            .send(Message::Text(text.clone().into()))
            .map_err(|e| TrackerError::SendFailed(e.to_string()))?;

        debug!("Queued subscription frame: {}", text);
        Ok(())
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Posts one session's events back to the runtime, tagged with its generation.
struct Reporter {
    session: SessionId,
    input: InputSender,
}

impl Reporter {
    fn report(&self, event: TransportEvent) -> bool {
        self.input
            .send(RuntimeInput::Transport(self.session, event))
            .is_ok()
    }
}

async fn run_session(
    config: WebSocketConfig,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    reporter: Reporter,
) {
    info!(url = %config.url, "Connecting to push endpoint");

    let ws_stream = match tokio::time::timeout(config.timeout, connect_async(config.url.as_str()))
        .await
    {
        Ok(Ok((ws_stream, _response))) => ws_stream,
        Ok(Err(e)) => {
            error!("Failed to connect to WebSocket: {}", e);
            reporter.report(TransportEvent::Failed(TrackerError::from(e).to_string()));
            return;
        }
        Err(_) => {
            error!(timeout_secs = config.timeout.as_secs(), "Connection attempt timed out");
            reporter.report(TransportEvent::Failed("connection timed out".to_string()));
            return;
        }
    };

    info!(session = %reporter.session, "WebSocket connection established to {}", config.url);
    if !reporter.report(TransportEvent::Opened) {
        return;
    }

    let reason = handle_message_stream(ws_stream, &config, &mut outbound, &reporter).await;
    reporter.report(TransportEvent::Closed(reason));
}

async fn handle_message_stream(
    ws_stream: WsStream,
    config: &WebSocketConfig,
    outbound: &mut mpsc::UnboundedReceiver<Message>,
    reporter: &Reporter,
) -> CloseReason {
    let (mut write, mut read) = ws_stream.split();
    let mut keepalive = tokio::time::interval(config.ping_interval);
    keepalive.tick().await;

    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else {
                    let _ = write.send(Message::Close(None)).await;
                    return CloseReason::Requested;
                };
                if let Err(e) = write.send(message).await {
                    error!("Failed to send frame: {}", e);
                    return CloseReason::Unexpected(e.to_string());
                }
            }
            _ = keepalive.tick() => {
                trace!("Sending keepalive ping");
                if let Err(e) = write.send(Message::Ping(Vec::new().into())).await {
                    warn!("Keepalive ping failed: {}", e);
                    return CloseReason::Unexpected(e.to_string());
                }
            }
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    trace!("Received text message: {}", text.as_str());
                    if !reporter.report(TransportEvent::Frame(text.as_str().to_owned())) {
                        return CloseReason::Requested;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    debug!("Ignoring binary message of {} bytes", data.len());
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                    // Handled automatically by tungstenite.
                }
                Some(Ok(Message::Close(frame))) => {
                    warn!("Received close frame: {:?}", frame);
                    return CloseReason::Unexpected(format!("server closed: {frame:?}"));
                }
                Some(Err(e)) => {
                    error!("WebSocket stream error: {}", e);
                    return CloseReason::Unexpected(e.to_string());
                }
                None => {
                    info!("WebSocket stream ended");
                    return CloseReason::Unexpected("stream ended".to_string());
                }
            }
        }
    }
}
