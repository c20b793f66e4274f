use crate::{Error, Result};
use futures_util::{SinkExt, StreamExt};
use kumasi_types::realtime::{ClientMessage, ServerMessage};
use tokio::sync::mpsc;
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};
use tracing::{debug, error, warn};

const CHANNEL_CAPACITY: usize = 1024;

/// The realtime channel: server pushes arrive through [Connection::next],
/// client events leave through [Connection::emit].
///
/// Frames are pumped by a background task which is aborted when the
/// connection is dropped.
pub struct Connection {
    receiver: mpsc::Receiver<Result<ServerMessage>>,
    sender: mpsc::UnboundedSender<ClientMessage>,
    _handle: tokio::task::JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self._handle.abort();
    }
}

impl Connection {
    pub(crate) fn new<S>(ws: WebSocketStream<S>) -> Self
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<ClientMessage>();

        let handle = tokio::spawn(async move {
            let (mut sink, mut stream) = ws.split();
            loop {
                tokio::select! {
                    outgoing = outgoing_rx.recv() => {
                        let Some(message) = outgoing else {
                            let _ = sink.close().await;
                            break;
                        };
                        debug!(event = message.event(), "Sending event");
                        if let Err(e) = sink.send(Message::Text(message.encode())).await {
                            error!("WebSocket send error: {}", e);
                            let _ = tx.send(Err(e.into())).await;
                            break;
                        }
                    }
                    msg = stream.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                debug!("Received text message: {} bytes", text.len());
                                match ServerMessage::decode(&text) {
                                    Ok(event) => {
                                        if tx.send(Ok(event)).await.is_err() {
                                            break; // Receiver dropped
                                        }
                                    }
                                    Err(e) => {
                                        warn!("Failed to decode event: {}", e);
                                        if tx.send(Err(e.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("WebSocket closed");
                                let _ = tx.send(Err(Error::ConnectionClosed)).await;
                                break;
                            }
                            Some(Ok(_)) => {} // Ignore other message types
                            Some(Err(e)) => {
                                error!("WebSocket error: {}", e);
                                let _ = tx.send(Err(e.into())).await;
                                break;
                            }
                        }
                    }
                }
            }
        });

        Self {
            receiver: rx,
            sender: outgoing_tx,
            _handle: handle,
        }
    }

    /// Queue an event for the server. Fails once the connection task has exited.
    pub fn emit(&self, message: ClientMessage) -> Result<()> {
        self.sender
            .send(message)
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Receive the next event from the server
    pub async fn next(&mut self) -> Option<Result<ServerMessage>> {
        self.receiver.recv().await
    }
}
