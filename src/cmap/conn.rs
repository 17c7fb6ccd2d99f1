pub(crate) mod command;

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
    time::Duration,
};

use tokio::{
    io::AsyncWriteExt,
    net::tcp::{OwnedReadHalf, OwnedWriteHalf},
    sync::{oneshot, Notify},
};
use tracing::debug;

use self::command::Command;
use crate::{
    error::{Error, Result},
    options::{ClientOptions, ServerAddress},
    runtime::{self, stream},
    sdam::WeakTopologyUpdater,
    trace::CONNECTION_TRACING_EVENT_TARGET,
    wire::Reply,
};

static NEXT_CONNECTION_ID: AtomicU32 = AtomicU32::new(1);

/// Options used when opening a connection.
#[derive(Clone, Debug, Default)]
pub(crate) struct ConnectionOptions {
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) socket_timeout: Option<Duration>,
}

impl From<&ClientOptions> for ConnectionOptions {
    fn from(options: &ClientOptions) -> Self {
        Self {
            connect_timeout: options.connect_timeout,
            socket_timeout: options.socket_timeout,
        }
    }
}

type PendingReplies = HashMap<i32, oneshot::Sender<Result<Reply>>>;

/// A connection to a single node. Clones are handles to the same underlying socket; any number of
/// commands may be in flight at once and each reply is matched to its request by id.
///
/// When the socket closes for any reason other than [`Connection::close`], every in-flight
/// command fails with a `ConnectionLost` error and the topology owning the connection is told
/// about the loss.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    shared: Arc<Shared>,
    socket_timeout: Option<Duration>,
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        // nobody can send on the connection anymore, so stop the reader.
        self.shared.close_explicitly();
    }
}

/// State shared between the connection handles and the task reading replies.
struct Shared {
    id: u32,
    address: ServerAddress,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    /// `None` once the reader has stopped.
    pending: Mutex<Option<PendingReplies>>,
    explicitly_closed: AtomicBool,
    shutdown: Notify,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, Option<PendingReplies>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns whether this call was the one that closed the connection.
    fn close_explicitly(&self) -> bool {
        let first = !self.explicitly_closed.swap(true, Ordering::SeqCst);
        if first {
            self.shutdown.notify_one();
        }
        first
    }

    fn is_closed(&self) -> bool {
        self.explicitly_closed.load(Ordering::SeqCst) || self.pending().is_none()
    }

    fn remove_pending(&self, request_id: i32) {
        if let Some(pending) = self.pending().as_mut() {
            pending.remove(&request_id);
        }
    }

    fn fail_pending(&self) {
        let pending = self.pending().take();
        for (_, sender) in pending.into_iter().flatten() {
            let _: std::result::Result<_, _> =
                sender.send(Err(Error::connection_lost(&self.address)));
        }
    }

    async fn write_all(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| Error::connection_lost(&self.address))?;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }
}

impl Connection {
    /// Opens a TCP connection to `address` and starts reading replies from it. A loss of the
    /// socket is reported through `loss_notifier`, which does not keep the topology alive.
    pub(crate) async fn connect(
        address: ServerAddress,
        options: &ConnectionOptions,
        loss_notifier: Option<WeakTopologyUpdater>,
    ) -> Result<Self> {
        let stream = stream::connect(&address, options.connect_timeout).await?;
        let (reader, writer) = stream.into_split();

        let shared = Arc::new(Shared {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::SeqCst),
            address,
            writer: tokio::sync::Mutex::new(Some(writer)),
            pending: Mutex::new(Some(HashMap::new())),
            explicitly_closed: AtomicBool::new(false),
            shutdown: Notify::new(),
        });

        debug!(
            target: CONNECTION_TRACING_EVENT_TARGET,
            connection_id = shared.id,
            address = %shared.address,
            "connection established"
        );

        runtime::execute(read_replies(shared.clone(), reader, loss_notifier));

        Ok(Self {
            inner: Arc::new(ConnectionInner {
                shared,
                socket_timeout: options.socket_timeout,
            }),
        })
    }

    /// A process-unique id for the connection.
    pub fn id(&self) -> u32 {
        self.inner.shared.id
    }

    /// The address this connection was opened to.
    pub fn address(&self) -> &ServerAddress {
        &self.inner.shared.address
    }

    /// Whether the connection was closed, either explicitly or because its socket went away.
    pub fn is_closed(&self) -> bool {
        self.inner.shared.is_closed()
    }

    /// Closes the connection. In-flight commands fail with `ConnectionLost`, and the loss is not
    /// reported to the owning topology. Calling this more than once has no further effect.
    pub fn close(&self) {
        if self.inner.shared.close_explicitly() {
            debug!(
                target: CONNECTION_TRACING_EVENT_TARGET,
                connection_id = self.id(),
                address = %self.address(),
                "connection closed"
            );
        }
    }

    /// Sends `command` and waits for its reply. A reply flagged as a query failure is returned
    /// as an `OperationFailure` carrying the server's document.
    pub async fn send_command(&self, command: Command) -> Result<Reply> {
        let shared = &self.inner.shared;

        let query = command.into_query();
        let request_id = query.request_id;
        let bytes = query.to_bytes()?;

        let (sender, receiver) = oneshot::channel();
        match shared.pending().as_mut() {
            Some(pending) if !shared.explicitly_closed.load(Ordering::SeqCst) => {
                pending.insert(request_id, sender);
            }
            _ => return Err(Error::connection_lost(&shared.address)),
        }

        if let Err(error) = shared.write_all(&bytes).await {
            shared.remove_pending(request_id);
            // a failed write leaves the stream in an unknown state.
            shared.shutdown.notify_one();
            return Err(error);
        }

        let reply = async {
            match receiver.await {
                Ok(result) => result,
                Err(_) => Err(Error::connection_lost(&shared.address)),
            }
        };

        let reply = match self.inner.socket_timeout {
            Some(timeout) => match runtime::timeout(timeout, reply).await {
                Ok(result) => result,
                Err(error) => {
                    shared.remove_pending(request_id);
                    Err(error)
                }
            },
            None => reply.await,
        }?;

        match reply.query_failure() {
            Some(error) => Err(error),
            None => Ok(reply),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("address", self.address())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Routes replies to the commands waiting for them until the socket closes or the connection is
/// closed explicitly.
async fn read_replies(
    shared: Arc<Shared>,
    mut reader: OwnedReadHalf,
    loss_notifier: Option<WeakTopologyUpdater>,
) {
    let error = loop {
        tokio::select! {
            biased;

            _ = shared.shutdown.notified() => break None,
            result = Reply::read_from(&mut reader) => match result {
                Ok(reply) => {
                    let sender = shared
                        .pending()
                        .as_mut()
                        .and_then(|pending| pending.remove(&reply.response_to));
                    match sender {
                        Some(sender) => {
                            let _: std::result::Result<_, _> = sender.send(Ok(reply));
                        }
                        None => debug!(
                            target: CONNECTION_TRACING_EVENT_TARGET,
                            connection_id = shared.id,
                            response_to = reply.response_to,
                            "discarding reply to an unknown request"
                        ),
                    }
                }
                Err(error) => break Some(error),
            }
        }
    };

    shared.fail_pending();

    if !shared.explicitly_closed.load(Ordering::SeqCst) {
        debug!(
            target: CONNECTION_TRACING_EVENT_TARGET,
            connection_id = shared.id,
            address = %shared.address,
            error = ?error,
            "connection lost"
        );
        if let Some(updater) = loss_notifier.as_ref().and_then(WeakTopologyUpdater::upgrade) {
            updater.handle_connection_lost(shared.id).await;
        }
    }

    shared.writer.lock().await.take();
}
