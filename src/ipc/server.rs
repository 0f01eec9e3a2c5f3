//! IPC Server
//!
//! Unix socket front end of the gate. A connection carries any number of
//! length-prefixed intent/response pairs until it sends `subscribe`; from then
//! on the server only writes `pendingChanged` frames so a badge can follow a
//! tab's paused requests without polling.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use super::handler::IpcHandler;
use super::protocol::{
    decode_message, encode_message, ErrorCode, IpcCommand, IpcResponse, LENGTH_PREFIX_SIZE,
    MAX_MESSAGE_SIZE,
};
use crate::config::IpcConfig;
use crate::error::IpcError;
use crate::gate::PendingEvent;
use crate::rules::TabId;

/// IPC server for handling intents
pub struct IpcServer {
    config: IpcConfig,
    handler: Arc<IpcHandler>,
    shutdown_tx: broadcast::Sender<()>,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(config: IpcConfig, handler: Arc<IpcHandler>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            handler,
            shutdown_tx,
        }
    }

    /// Bind the socket and serve connections until shutdown.
    ///
    /// Shutdown comes from the `shutdown` intent or from
    /// [`shutdown_sender`](Self::shutdown_sender); it also ends every open
    /// subscription.
    ///
    /// # Errors
    ///
    /// Returns `IpcError` if the socket cannot be prepared or bound.
    pub async fn run(&self) -> Result<(), IpcError> {
        if !self.config.enabled {
            info!("IPC server disabled");
            return Ok(());
        }

        let socket_path = &self.config.socket_path;
        let listener = bind_socket(socket_path, self.config.socket_mode)?;
        info!("IPC server listening on {:?}", socket_path);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, _addr)) => self.spawn_connection(stream),
                    Err(e) => error!("IPC accept error: {}", e),
                },
                _ = shutdown_rx.recv() => {
                    info!("IPC server shutting down");
                    break;
                }
            }
        }

        if socket_path.exists() {
            let _ = std::fs::remove_file(socket_path);
        }

        Ok(())
    }

    /// Get a shutdown signal sender
    pub fn shutdown_sender(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    fn spawn_connection(&self, stream: UnixStream) {
        let connection = Connection {
            handler: Arc::clone(&self.handler),
            max_message_size: self.config.max_message_size,
            shutdown_tx: self.shutdown_tx.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = connection.serve(stream).await {
                debug!("IPC connection error: {}", e);
            }
        });
    }
}

/// Replace any stale socket file and bind a fresh listener with `mode`
fn bind_socket(socket_path: &Path, mode: u32) -> Result<UnixListener, IpcError> {
    let creation_error = |reason: String| IpcError::SocketCreation {
        path: socket_path.display().to_string(),
        reason,
    };

    if socket_path.exists() {
        std::fs::remove_file(socket_path)
            .map_err(|e| creation_error(format!("Failed to remove existing socket: {}", e)))?;
    }

    if let Some(parent) = socket_path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)
                .map_err(|e| creation_error(format!("Failed to create parent directory: {}", e)))?;
        }
    }

    let listener = UnixListener::bind(socket_path).map_err(|e| IpcError::BindError {
        path: socket_path.display().to_string(),
        reason: e.to_string(),
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(mode))
            .map_err(|e| creation_error(format!("Failed to set permissions: {}", e)))?;
    }

    Ok(listener)
}

/// One inbound frame after size and format checks
enum Frame {
    Command(IpcCommand),
    /// Rejected before reaching the handler; carries the error to send back
    Rejected(IpcResponse),
    Closed,
}

/// Read the next frame, skipping the body of an oversized one so the stream
/// stays aligned.
async fn read_frame<R>(reader: &mut R, max_message_size: usize) -> Result<Frame, IpcError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; LENGTH_PREFIX_SIZE];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(Frame::Closed),
        Err(e) => return Err(IpcError::from(e)),
    }

    let msg_len = u32::from_be_bytes(len_buf) as usize;
    if msg_len > max_message_size {
        warn!(size = msg_len, max = max_message_size, "IPC message too large");
        let mut body = reader.take(msg_len as u64);
        tokio::io::copy(&mut body, &mut tokio::io::sink()).await?;
        return Ok(Frame::Rejected(IpcResponse::error(
            ErrorCode::InvalidParameters,
            format!("Message too large: {} bytes", msg_len),
        )));
    }

    let mut body = vec![0u8; msg_len];
    reader.read_exact(&mut body).await?;

    Ok(match decode_message(&body) {
        Ok(command) => Frame::Command(command),
        Err(e) => {
            warn!("Invalid IPC command: {}", e);
            Frame::Rejected(IpcResponse::error(
                ErrorCode::InvalidCommand,
                format!("Invalid command format: {}", e),
            ))
        }
    })
}

async fn write_frame<W>(writer: &mut W, response: &IpcResponse) -> Result<(), IpcError>
where
    W: AsyncWrite + Unpin,
{
    let encoded = encode_message(response).map_err(|e| IpcError::serialization(e.to_string()))?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

struct Connection {
    handler: Arc<IpcHandler>,
    max_message_size: usize,
    shutdown_tx: broadcast::Sender<()>,
}

impl Connection {
    async fn serve(self, mut stream: UnixStream) -> Result<(), IpcError> {
        debug!("New IPC connection");

        loop {
            let command = match read_frame(&mut stream, self.max_message_size).await? {
                Frame::Command(command) => command,
                Frame::Rejected(response) => {
                    write_frame(&mut stream, &response).await?;
                    continue;
                }
                Frame::Closed => {
                    debug!("IPC client disconnected");
                    return Ok(());
                }
            };

            match command {
                IpcCommand::Subscribe { tab_id } => {
                    // Both receivers exist before the ack so nothing after it is missed
                    let events = self.handler.gate().subscribe();
                    let shutdown_rx = self.shutdown_tx.subscribe();
                    let response = self.handler.handle(IpcCommand::Subscribe { tab_id }).await;
                    write_frame(&mut stream, &response).await?;
                    return stream_pending(stream, events, shutdown_rx, tab_id).await;
                }
                IpcCommand::Shutdown => {
                    let response = self.handler.handle(IpcCommand::Shutdown).await;
                    write_frame(&mut stream, &response).await?;
                    let _ = self.shutdown_tx.send(());
                    return Ok(());
                }
                command => {
                    let response = self.handler.handle(command).await;
                    write_frame(&mut stream, &response).await?;
                }
            }
        }
    }
}

/// Forward pending changes until the client hangs up or the server stops.
///
/// Anything the client writes after subscribing is discarded.
async fn stream_pending(
    mut stream: UnixStream,
    mut events: broadcast::Receiver<PendingEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
    tab_filter: Option<TabId>,
) -> Result<(), IpcError> {
    let (mut reader, mut writer) = stream.split();
    let mut discard = [0u8; 256];

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let PendingEvent::CountChanged { tab_id, .. } = &event;
                    if tab_filter.is_none() || tab_filter == Some(*tab_id) {
                        write_frame(&mut writer, &IpcResponse::from(event)).await?;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "pending subscriber fell behind");
                }
                Err(RecvError::Closed) => return Ok(()),
            },
            read = reader.read(&mut discard) => {
                if read? == 0 {
                    debug!("pending subscriber disconnected");
                    return Ok(());
                }
            }
            _ = shutdown_rx.recv() => return Ok(()),
        }
    }
}

/// IPC client for connecting to the server
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    /// Create a new IPC client
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    /// Send a command and receive a response
    ///
    /// # Errors
    ///
    /// Returns `IpcError` on connection, framing or decoding failures.
    pub async fn send(&self, command: IpcCommand) -> Result<IpcResponse, IpcError> {
        let mut stream = self.connect().await?;
        write_command(&mut stream, &command).await?;
        read_response(&mut stream)
            .await?
            .ok_or_else(|| IpcError::protocol("Connection closed before response"))
    }

    /// Send a ping command
    ///
    /// # Errors
    ///
    /// Returns `IpcError` if the server cannot be reached.
    pub async fn ping(&self) -> Result<bool, IpcError> {
        let response = self.send(IpcCommand::Ping).await?;
        Ok(matches!(response, IpcResponse::Pong))
    }

    /// Open a subscription to pending changes of one tab, or of every tab.
    ///
    /// # Errors
    ///
    /// Returns `IpcError` if the server cannot be reached or refuses.
    pub async fn subscribe(&self, tab_id: Option<TabId>) -> Result<PendingSubscription, IpcError> {
        let mut stream = self.connect().await?;
        write_command(&mut stream, &IpcCommand::Subscribe { tab_id }).await?;
        match read_response(&mut stream).await? {
            Some(IpcResponse::Success { .. }) => Ok(PendingSubscription { stream }),
            Some(other) => Err(IpcError::protocol(format!(
                "Unexpected subscribe response: {:?}",
                other
            ))),
            None => Err(IpcError::protocol("Connection closed before response")),
        }
    }

    async fn connect(&self) -> Result<UnixStream, IpcError> {
        UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| IpcError::ConnectionError(e.to_string()))
    }
}

/// Open subscription returned by [`IpcClient::subscribe`]
pub struct PendingSubscription {
    stream: UnixStream,
}

impl PendingSubscription {
    /// Wait for the next change; `None` once the server closes the stream.
    ///
    /// # Errors
    ///
    /// Returns `IpcError` on framing failures or a frame that is not an event.
    pub async fn next(&mut self) -> Result<Option<PendingEvent>, IpcError> {
        match read_response(&mut self.stream).await? {
            Some(IpcResponse::PendingChanged {
                tab_id,
                domains,
                requests,
            }) => Ok(Some(PendingEvent::CountChanged {
                tab_id,
                domains,
                requests,
            })),
            Some(other) => Err(IpcError::protocol(format!(
                "Unexpected frame on subscription: {:?}",
                other
            ))),
            None => Ok(None),
        }
    }
}

async fn write_command(stream: &mut UnixStream, command: &IpcCommand) -> Result<(), IpcError> {
    let encoded = encode_message(command).map_err(|e| IpcError::serialization(e.to_string()))?;
    stream.write_all(&encoded).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one response frame; `None` on a clean close before the prefix
async fn read_response(stream: &mut UnixStream) -> Result<Option<IpcResponse>, IpcError> {
    let mut len_buf = [0u8; LENGTH_PREFIX_SIZE];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(IpcError::from(e)),
    }
    let msg_len = u32::from_be_bytes(len_buf) as usize;

    if msg_len > MAX_MESSAGE_SIZE {
        return Err(IpcError::protocol(format!(
            "Response too large: {} bytes",
            msg_len
        )));
    }

    let mut msg_buf = vec![0u8; msg_len];
    stream.read_exact(&mut msg_buf).await?;

    decode_message(&msg_buf)
        .map(Some)
        .map_err(|e| IpcError::protocol(e.to_string()))
}
