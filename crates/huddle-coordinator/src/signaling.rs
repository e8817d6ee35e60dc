use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use huddle_proto::{decode_server_event, encode, ClientEvent, ServerEvent};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::CoordinatorConfig;
use crate::error::SignalingError;

/// One live signaling connection. Dropping `outbound` closes it; `inbound`
/// yields `None` once the relay side is gone.
#[derive(Debug)]
pub struct SignalingLink {
    pub outbound: mpsc::UnboundedSender<ClientEvent>,
    pub inbound: mpsc::UnboundedReceiver<ServerEvent>,
}

/// Opens signaling connections. The coordinator calls this once at start and
/// again after every hang-up.
#[async_trait]
pub trait SignalingConnector: Send + Sync {
    async fn connect(&self) -> Result<SignalingLink, SignalingError>;
}

pub struct WsConnector {
    url: Url,
}

impl WsConnector {
    pub fn new(config: &CoordinatorConfig) -> Result<Self, SignalingError> {
        Ok(Self {
            url: config.signaling_url()?,
        })
    }
}

#[async_trait]
impl SignalingConnector for WsConnector {
    async fn connect(&self) -> Result<SignalingLink, SignalingError> {
        let (ws_stream, _) = connect_async(self.url.as_str()).await?;
        info!(url = %self.url, "signaling connected");

        let (tx_client, rx_client) = mpsc::unbounded_channel::<ClientEvent>();
        let (tx_server, rx_server) = mpsc::unbounded_channel::<ServerEvent>();
        tokio::spawn(pump(ws_stream, rx_client, tx_server));

        Ok(SignalingLink {
            outbound: tx_client,
            inbound: rx_server,
        })
    }
}

async fn pump(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut rx_client: mpsc::UnboundedReceiver<ClientEvent>,
    tx_server: mpsc::UnboundedSender<ServerEvent>,
) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let send_task = tokio::spawn(async move {
        while let Some(event) = rx_client.recv().await {
            let text = match encode(&event) {
                Ok(text) => text,
                Err(err) => {
                    warn!(kind = event.kind(), error = %err, "failed to encode signaling event");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => match decode_server_event(&text) {
                Ok(event) => {
                    if tx_server.send(event).is_err() {
                        break;
                    }
                }
                Err(err) => debug!(error = %err, "ignoring malformed relay frame"),
            },
            Ok(Message::Close(_)) => break,
            Err(err) => {
                warn!(error = %err, "signaling socket error");
                break;
            }
            _ => {}
        }
    }

    info!("signaling disconnected");
    send_task.abort();
}
