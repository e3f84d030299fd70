//! Request router: one node of the distributed cache
//!
//! Each server owns its own cache, hash ring and membership registry;
//! nothing is shared between server instances in one process. A
//! connection carries exactly one request and one response. The ring
//! decides per request whether to serve from the local cache or to
//! forward to the owning peer, and forwarding happens with no lock
//! held, so a slow peer stalls only the one request being forwarded.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::cache::Cache;
use crate::config::ServerConfig;
use crate::discovery::Registry;
use crate::protocol::{Command, ProtocolError, Request, Response};
use crate::ring::HashRing;

/// State shared between the accept loop, connection tasks and handles.
struct Shared {
    addr: String,
    cache: Cache,
    ring: HashRing,
    registry: Registry,
    shutdown: Notify,
}

/// A single cache node: listener plus routing state.
pub struct Server {
    listener: TcpListener,
    shared: Arc<Shared>,
}

impl Server {
    /// Bind the listen address and set up the node's subsystems.
    ///
    /// Binding failures are fatal; a node that cannot listen does not
    /// start. The node registers itself and joins its own ring so that
    /// a single-node cluster is immediately usable.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(&config.addr)
            .await
            .with_context(|| format!("failed to bind {}", config.addr))?;
        let addr = listener.local_addr()?.to_string();

        let cache = Cache::new(config.cleanup_interval);
        let ring = HashRing::new(config.replicas);
        let registry = Registry::new(config.health_timeout);
        registry.register(&addr);
        ring.add_node(&addr);

        info!("cache node listening on {}", addr);
        Ok(Self {
            listener,
            shared: Arc::new(Shared {
                addr,
                cache,
                ring,
                registry,
                shutdown: Notify::new(),
            }),
        })
    }

    /// The advertised address (the actual bound address, which matters
    /// when the configured port was 0).
    pub fn addr(&self) -> &str {
        &self.shared.addr
    }

    /// A cloneable handle for stopping or joining from other tasks.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Learn of one existing peer: add it to the ring and the registry.
    ///
    /// Membership does not propagate further; each node only knows the
    /// peers it has been explicitly told about.
    pub fn join_cluster(&self, peer_addr: &str) {
        self.handle().join_cluster(peer_addr);
    }

    /// Accept connections until [`ServerHandle::stop`] is called,
    /// handling each on its own task.
    pub async fn serve(self) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.shared.shutdown.notified() => {
                    info!("node {} shutting down", self.shared.addr);
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("accepted connection from {}", peer);
                        let shared = Arc::clone(&self.shared);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(shared, stream).await {
                                warn!("connection from {} failed: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => error!("failed to accept connection: {}", e),
                },
            }
        }
    }
}

/// Control handle detached from the accept loop.
#[derive(Clone)]
pub struct ServerHandle {
    shared: Arc<Shared>,
}

impl ServerHandle {
    /// See [`Server::join_cluster`].
    pub fn join_cluster(&self, peer_addr: &str) {
        info!("joining cluster via peer {}", peer_addr);
        self.shared.ring.add_node(peer_addr);
        self.shared.registry.register(peer_addr);
    }

    /// Stop accepting connections and leave the cluster. In-flight
    /// connections run to completion.
    pub fn stop(&self) {
        self.shared.registry.unregister(&self.shared.addr);
        self.shared.ring.remove_node(&self.shared.addr);
        self.shared.shutdown.notify_one();
    }
}

/// Read one request, route it, write one response, close.
///
/// An undecodable request drops the connection without a response.
async fn handle_connection(shared: Arc<Shared>, mut stream: TcpStream) -> Result<()> {
    let request = match Request::read_from(&mut stream).await {
        Ok(request) => request,
        Err(e) => {
            debug!("dropping undecodable request: {}", e);
            return Ok(());
        }
    };

    let response = route(&shared, &request).await;
    stream.write_all(&response.encode()).await?;
    stream.flush().await?;
    Ok(())
}

/// Decide local-vs-forward for one request.
async fn route(shared: &Shared, request: &Request) -> Response {
    // Ping asks about the node it reached and Keys lists that node's
    // shard; neither is keyed, so neither goes through the ring.
    if matches!(request.command, Command::Ping | Command::Keys) {
        return handle_local(shared, request);
    }

    match shared.ring.get_node(&request.key) {
        None => Response::error("no nodes in ring"),
        Some(owner) if owner == shared.addr => handle_local(shared, request),
        Some(owner) => forward(shared, &owner, request).await,
    }
}

/// Dispatch a request against the local cache.
fn handle_local(shared: &Shared, request: &Request) -> Response {
    match request.command {
        Command::Get => match shared.cache.get(&request.key) {
            Some(value) => Response::ok(value),
            None => Response::not_found(),
        },
        Command::Set => {
            shared
                .cache
                .set(&request.key, request.value.clone(), request.ttl);
            Response::ok(Vec::new())
        }
        Command::Delete => {
            shared.cache.delete(&request.key);
            Response::ok(Vec::new())
        }
        Command::Ping => Response::ok(Vec::new()),
        Command::Keys => match serde_json::to_vec(&shared.cache.keys()) {
            Ok(payload) => Response::ok(payload),
            Err(e) => Response::error(format!("failed to serialize keys: {}", e)),
        },
    }
}

/// Relay a request to the owning peer and hand its response back
/// verbatim. Single hop: if the owner is unreachable the caller gets
/// an Error response, never a second forward.
async fn forward(shared: &Shared, owner: &str, request: &Request) -> Response {
    debug!("forwarding {:?} for key {:?} to {}", request.command, request.key, owner);
    match exchange(owner, request).await {
        Ok(response) => {
            // The owner answered, which is as good as a heartbeat.
            shared.registry.heartbeat(owner);
            response
        }
        Err(e) => {
            warn!("forward to {} failed: {}", owner, e);
            Response::error(format!("forward to {} failed: {}", owner, e))
        }
    }
}

/// One request/response exchange with a peer over a fresh connection.
async fn exchange(addr: &str, request: &Request) -> Result<Response, ProtocolError> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(&request.encode()).await?;
    stream.flush().await?;
    Response::read_from(&mut stream).await
}
