//! Connection serving.
//!
//! Per connection: negotiate the handshake (optionally tunnelled
//! through an HTTP CONNECT), then loop reading records and dispatching
//! each to its method in a spawned handler. Handlers race the per-call
//! timeout from the handshake; whichever side loses the race drops its
//! response, so exactly one response leaves per request. All in-flight
//! handlers are awaited before the connection closes.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use zrpc_common::codec::{read_line, CodecKind, RecordReader, RecordWriter};
use zrpc_common::protocol::{CONNECTED, DEFAULT_RPC_PATH, MAGIC_NUMBER};
use zrpc_common::{Header, Options, Result, RpcError};

use crate::heartbeat;
use crate::service::Service;

/// Upper bound on one handshake or CONNECT preamble line.
const MAX_HANDSHAKE_LINE: usize = 4096;

type SharedWriter = Arc<Mutex<RecordWriter<OwnedWriteHalf>>>;

/// An RPC server: a set of registered services plus the addresses it
/// announces itself under.
pub struct Server {
    register_addr: String,
    self_addr: String,
    services: RwLock<HashMap<String, Arc<Service>>>,
    method_index: RwLock<HashSet<String>>,
}

impl Server {
    /// Creates a server that heartbeats to `register_addr` (a registry
    /// URL) announcing itself as `self_addr` (a `network@address`
    /// string). An empty registry address disables the heartbeat.
    pub fn new(register_addr: impl Into<String>, self_addr: impl Into<String>) -> Self {
        Self {
            register_addr: register_addr.into(),
            self_addr: self_addr.into(),
            services: RwLock::new(HashMap::new()),
            method_index: RwLock::new(HashSet::new()),
        }
    }

    pub fn register_addr(&self) -> &str {
        &self.register_addr
    }

    pub fn self_addr(&self) -> &str {
        &self.self_addr
    }

    /// Registers a service under its receiver's type name.
    pub fn register(&self, service: Service) -> Result<()> {
        let mut services = self.services.write().unwrap();
        if services.contains_key(service.name()) {
            return Err(RpcError::DuplicateService(service.name().to_string()));
        }
        let mut index = self.method_index.write().unwrap();
        for method in service.method_names() {
            index.insert(format!("{}.{}", service.name(), method));
        }
        services.insert(service.name().to_string(), Arc::new(service));
        Ok(())
    }

    /// Every registered `Service.Method` string, sorted. This is what
    /// the heartbeat announces.
    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.method_index.read().unwrap().iter().cloned().collect();
        methods.sort();
        methods
    }

    /// Accepts connections until the listener fails. Spawns the
    /// registry heartbeat unless the registry address is empty.
    pub async fn listen(self: Arc<Self>, listener: TcpListener, heartbeat_period: Option<Duration>) {
        if !self.register_addr.is_empty() {
            tokio::spawn(heartbeat::run(Arc::clone(&self), heartbeat_period));
        }
        if let Ok(addr) = listener.local_addr() {
            info!("rpc server listening on {}", addr);
        }
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "connection accepted");
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = server.serve_conn(stream).await {
                            debug!("rpc server: connection ended: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("rpc server: accept error: {}", e);
                    return;
                }
            }
        }
    }

    /// Serves one connection: handshake, then the record loop.
    pub async fn serve_conn(self: Arc<Self>, mut stream: TcpStream) -> Result<()> {
        let options = negotiate(&mut stream).await?;
        if options.magic != MAGIC_NUMBER {
            warn!("rpc server: invalid magic number: {:#x}", options.magic);
            return Err(RpcError::InvalidMagic(options.magic));
        }
        let kind = CodecKind::from_name(&options.codec)
            .ok_or_else(|| RpcError::InvalidCodec(options.codec.clone()))?;

        let (read_half, write_half) = stream.into_split();
        self.serve_codec(
            RecordReader::new(read_half, kind),
            RecordWriter::new(write_half, kind),
            options.max_call_time(),
        )
        .await;
        Ok(())
    }

    async fn serve_codec(
        self: Arc<Self>,
        mut reader: RecordReader<OwnedReadHalf>,
        writer: RecordWriter<OwnedWriteHalf>,
        max_call_time: Duration,
    ) {
        let kind = reader.kind();
        let writer: SharedWriter = Arc::new(Mutex::new(writer));
        let mut handlers = JoinSet::new();

        loop {
            let header = match reader.read_header().await {
                Ok(header) => header,
                Err(e) => {
                    if !is_eof(&e) {
                        debug!("rpc server: read header error: {}", e);
                    }
                    break;
                }
            };

            let (service, method_name) = match self.find_service(&header.service_method) {
                Ok(found) => found,
                Err(e) => {
                    // The body frame still has to be drained to keep
                    // the stream aligned.
                    if reader.skip_body().await.is_err() {
                        break;
                    }
                    send_error_response(&writer, kind, header, e.to_string()).await;
                    continue;
                }
            };

            let argv = match reader.read_body_raw().await {
                Ok(argv) => argv,
                Err(e) => {
                    debug!("rpc server: read argv error: {}", e);
                    break;
                }
            };

            handlers.spawn(handle_request(
                Arc::clone(&writer),
                service,
                method_name,
                header,
                argv,
                max_call_time,
                kind,
            ));
        }

        while handlers.join_next().await.is_some() {}
        let _ = writer.lock().await.shutdown().await;
    }

    /// Splits `Service.Method` on the last dot and resolves both parts.
    fn find_service(&self, service_method: &str) -> Result<(Arc<Service>, String)> {
        let (service_name, method_name) = service_method
            .rsplit_once('.')
            .ok_or_else(|| RpcError::IllFormedMethod(service_method.to_string()))?;
        let service = self
            .services
            .read()
            .unwrap()
            .get(service_name)
            .cloned()
            .ok_or_else(|| RpcError::ServiceNotFound(service_name.to_string()))?;
        if service.method(method_name).is_none() {
            return Err(RpcError::MethodNotFound(method_name.to_string()));
        }
        Ok((service, method_name.to_string()))
    }
}

/// Runs one request: an invoker task executes the method and writes the
/// response, while this task arms the timeout. An atomic flag decides
/// which of the two gets to respond.
async fn handle_request(
    writer: SharedWriter,
    service: Arc<Service>,
    method_name: String,
    header: Header,
    argv: Vec<u8>,
    max_call_time: Duration,
    kind: CodecKind,
) {
    let replied = Arc::new(AtomicBool::new(false));
    let (called_tx, called_rx) = oneshot::channel::<()>();

    let invoker = tokio::spawn({
        let writer = Arc::clone(&writer);
        let replied = Arc::clone(&replied);
        let mut header = header.clone();
        async move {
            let outcome =
                tokio::task::spawn_blocking(move || service.invoke(&method_name, kind, &argv))
                    .await
                    .unwrap_or_else(|e| Err(RpcError::Handler(e.to_string())));
            let _ = called_tx.send(());

            if replied.swap(true, Ordering::SeqCst) {
                // Lost the race: the timeout arm already answered.
                return;
            }
            match outcome {
                Ok(reply) => send_response(&writer, &header, &reply).await,
                Err(e) => {
                    header.error = e.to_string();
                    let body = kind.encode(&()).unwrap_or_default();
                    send_response(&writer, &header, &body).await;
                }
            }
        }
    });

    if max_call_time.is_zero() {
        let _ = invoker.await;
        return;
    }

    tokio::select! {
        _ = tokio::time::sleep(max_call_time) => {
            if !replied.swap(true, Ordering::SeqCst) {
                let mut header = header;
                header.error = format!(
                    "rpc server: request handle timeout: expect within {:?}",
                    max_call_time
                );
                let body = kind.encode(&()).unwrap_or_default();
                send_response(&writer, &header, &body).await;
            }
            // The invoker keeps running; its response is dropped.
        }
        _ = called_rx => {
            let _ = invoker.await;
        }
    }
}

async fn send_response(writer: &SharedWriter, header: &Header, body: &[u8]) {
    let mut writer = writer.lock().await;
    if let Err(e) = writer.write_raw(header, body).await {
        warn!("rpc server: write response error: {}", e);
    }
}

async fn send_error_response(writer: &SharedWriter, kind: CodecKind, mut header: Header, error: String) {
    header.error = error;
    let body = kind.encode(&()).unwrap_or_default();
    send_response(writer, &header, &body).await;
}

/// Reads the handshake line, unwrapping an HTTP CONNECT preamble first
/// if the client tunnels in over `http`.
async fn negotiate(stream: &mut TcpStream) -> Result<Options> {
    let mut line = read_line(stream, MAX_HANDSHAKE_LINE).await?;

    if let Some(rest) = line.strip_prefix("CONNECT ") {
        let path = rest.split_whitespace().next().unwrap_or("");
        if path != DEFAULT_RPC_PATH {
            return Err(RpcError::InvalidAddress(path.to_string()));
        }
        // Drain the rest of the request head up to the blank line.
        loop {
            if read_line(stream, MAX_HANDSHAKE_LINE).await?.is_empty() {
                break;
            }
        }
        stream.write_all(format!("{}\n\n", CONNECTED).as_bytes()).await?;
        line = read_line(stream, MAX_HANDSHAKE_LINE).await?;
    }

    Ok(serde_json::from_str(&line)?)
}

fn is_eof(err: &RpcError) -> bool {
    matches!(err, RpcError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
}
