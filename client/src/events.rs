use crate::{Error, Result};
use futures_util::{SinkExt, Stream as FutStream, StreamExt};
use ringside_types::{Command, RealtimeEvent};
use tokio::sync::mpsc;
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};
use tracing::{debug, error, warn};

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Stream of events from the WebSocket connection
///
/// Dropping the stream closes the connection.
pub struct Stream {
    receiver: mpsc::Receiver<Result<RealtimeEvent>>,
    commands: mpsc::Sender<Command>,
    _handle: tokio::task::JoinHandle<()>,
}

impl Drop for Stream {
    fn drop(&mut self) {
        self._handle.abort();
    }
}

/// Handle for writing commands to an open connection.
#[derive(Clone, Debug)]
pub struct CommandSender {
    commands: mpsc::Sender<Command>,
}

impl CommandSender {
    /// Queue a command without waiting.
    pub fn try_send(&self, command: Command) -> Result<()> {
        self.commands
            .try_send(command)
            .map_err(|_| Error::ConnectionClosed)
    }

    pub async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::ConnectionClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

impl Stream {
    pub(crate) fn new_with_capacity<S>(ws: WebSocketStream<S>, capacity: usize) -> Self
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let capacity = if capacity == 0 {
            DEFAULT_CHANNEL_CAPACITY
        } else {
            capacity
        };
        let (tx, rx) = mpsc::channel(capacity);
        let (command_tx, mut command_rx) = mpsc::channel::<Command>(capacity);

        let handle = tokio::spawn(async move {
            let (mut write, mut read) = ws.split();
            loop {
                tokio::select! {
                    msg = read.next() => {
                        let Some(msg) = msg else {
                            debug!("WebSocket stream ended");
                            let _ = tx.send(Err(Error::ConnectionClosed)).await;
                            break;
                        };
                        match msg {
                            Ok(Message::Text(text)) => {
                                debug!("Received text message: {} bytes", text.len());
                                match RealtimeEvent::decode(&text) {
                                    Ok(Some(event)) => {
                                        if tx.send(Ok(event)).await.is_err() {
                                            break; // Receiver dropped
                                        }
                                    }
                                    Ok(None) => debug!("Ignoring frame of unknown type"),
                                    Err(e) => {
                                        error!("Failed to decode event: {}", e);
                                        if tx.send(Err(Error::InvalidFrame(e))).await.is_err() {
                                            break;
                                        }
                                    }
                                }
                            }
                            Ok(Message::Close(_)) => {
                                debug!("WebSocket closed");
                                let _ = tx.send(Err(Error::ConnectionClosed)).await;
                                break;
                            }
                            Ok(_) => {} // Ignore other message types
                            Err(e) => {
                                error!("WebSocket error: {}", e);
                                let _ = tx.send(Err(e.into())).await;
                                break;
                            }
                        }
                    }
                    Some(command) = command_rx.recv() => {
                        debug!(?command, "Sending command");
                        if let Err(e) = write.send(Message::Text(command.to_text())).await {
                            warn!("Failed to send command: {}", e);
                            let _ = tx.send(Err(e.into())).await;
                            break;
                        }
                    }
                }
            }
        });

        Self {
            receiver: rx,
            commands: command_tx,
            _handle: handle,
        }
    }

    /// Handle for writing commands on this connection.
    pub fn sender(&self) -> CommandSender {
        CommandSender {
            commands: self.commands.clone(),
        }
    }

    /// Receive the next event from the stream
    pub async fn next(&mut self) -> Option<Result<RealtimeEvent>> {
        self.receiver.recv().await
    }
}

impl FutStream for Stream {
    type Item = Result<RealtimeEvent>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
