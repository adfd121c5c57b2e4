//! Single-connection call multiplexer.
//!
//! Many calls share one connection. The send path assigns each call a
//! fresh sequence number, parks a completion channel in the pending
//! map, and writes the record under the sending lock; a dedicated
//! receive task reads responses and resolves them by sequence number.
//! Responses whose call has vanished (cancelled, or failed at write
//! time) are drained and dropped. A transport error shuts the client
//! down and fails every pending call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

use zrpc_common::codec::{read_line, CodecKind, RecordReader, RecordWriter};
use zrpc_common::protocol::DEFAULT_RPC_PATH;
use zrpc_common::{Header, Options, Result, RpcError};

type CallOutcome = Result<Vec<u8>>;

/// An in-flight call.
///
/// Resolves exactly once: with the raw reply body, the remote error, a
/// write failure, or the connection's terminal error.
pub struct Call {
    pub seq: u64,
    done: oneshot::Receiver<CallOutcome>,
}

impl Call {
    /// Waits for the call to complete and yields the raw reply body.
    pub async fn done(self) -> CallOutcome {
        self.done
            .await
            .unwrap_or_else(|_| Err(RpcError::Shutdown("call dropped".to_string())))
    }
}

struct State {
    seq: u64,
    closing: bool,
    shutdown: bool,
}

struct Inner {
    kind: CodecKind,
    /// The sending lock: one outbound record at a time.
    writer: Mutex<RecordWriter<OwnedWriteHalf>>,
    state: StdMutex<State>,
    pending: StdMutex<HashMap<u64, oneshot::Sender<CallOutcome>>>,
}

impl Inner {
    fn remove_call(&self, seq: u64) -> Option<oneshot::Sender<CallOutcome>> {
        self.pending.lock().unwrap().remove(&seq)
    }

    fn terminate_calls(&self, cause: &str) {
        self.state.lock().unwrap().shutdown = true;
        let pending: Vec<_> = {
            let mut pending = self.pending.lock().unwrap();
            pending.drain().collect()
        };
        for (_, tx) in pending {
            let _ = tx.send(Err(RpcError::Shutdown(cause.to_string())));
        }
    }
}

/// A client over one connection. Cheap to clone; all clones share the
/// connection and its sequence space.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Dials a server and performs the handshake.
    ///
    /// `network` is `"tcp"` or `"http"`; the latter tunnels through a
    /// CONNECT upgrade before the handshake. A nonzero `timeout` bounds
    /// the TCP connect and the handshake separately; on expiry the
    /// connection is abandoned.
    pub async fn dial(
        network: &str,
        address: &str,
        timeout: Option<Duration>,
        options: Options,
    ) -> Result<Client> {
        let http = network == "http";
        let stream = match timeout {
            Some(limit) if !limit.is_zero() => {
                tokio::time::timeout(limit, TcpStream::connect(address))
                    .await
                    .map_err(|_| RpcError::ConnectTimeout(limit))??
            }
            _ => TcpStream::connect(address).await?,
        };
        match timeout {
            Some(limit) if !limit.is_zero() => {
                tokio::time::timeout(limit, Self::handshake(stream, http, options))
                    .await
                    .map_err(|_| RpcError::ConnectTimeout(limit))?
            }
            _ => Self::handshake(stream, http, options).await,
        }
    }

    async fn handshake(mut stream: TcpStream, http: bool, options: Options) -> Result<Client> {
        let kind = CodecKind::from_name(&options.codec)
            .ok_or_else(|| RpcError::InvalidCodec(options.codec.clone()))?;
        if http {
            connect_upgrade(&mut stream).await?;
        }

        let mut line = serde_json::to_vec(&options)?;
        line.push(b'\n');
        stream.write_all(&line).await?;

        let (read_half, write_half) = stream.into_split();
        let inner = Arc::new(Inner {
            kind,
            writer: Mutex::new(RecordWriter::new(write_half, kind)),
            state: StdMutex::new(State {
                seq: 1,
                closing: false,
                shutdown: false,
            }),
            pending: StdMutex::new(HashMap::new()),
        });
        tokio::spawn(receive(RecordReader::new(read_half, kind), Arc::clone(&inner)));
        Ok(Client { inner })
    }

    /// Neither closed by this side nor shut down by a transport error.
    pub fn is_available(&self) -> bool {
        let state = self.inner.state.lock().unwrap();
        !state.closing && !state.shutdown
    }

    /// Closes the connection. A second close reports that the client is
    /// already closing.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.closing {
                return Err(RpcError::Closing);
            }
            state.closing = true;
        }
        self.inner.writer.lock().await.shutdown().await
    }

    /// Submits a call and returns its handle immediately.
    ///
    /// The sequence number is assigned here, before the write is
    /// scheduled, so sequence numbers are strictly increasing in
    /// submission order. A write failure resolves the call with the
    /// error.
    pub fn go<A: Serialize>(&self, service_method: &str, args: &A) -> Result<Call> {
        let body = self.inner.kind.encode(args)?;
        let seq = {
            let mut state = self.inner.state.lock().unwrap();
            if state.closing || state.shutdown {
                return Err(RpcError::Closing);
            }
            let seq = state.seq;
            state.seq += 1;
            seq
        };

        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().unwrap().insert(seq, tx);

        let header = Header::request(service_method, seq);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut writer = inner.writer.lock().await;
            if let Err(e) = writer.write_raw(&header, &body).await {
                drop(writer);
                if let Some(tx) = inner.remove_call(seq) {
                    let _ = tx.send(Err(e));
                }
            }
        });

        Ok(Call { seq, done: rx })
    }

    /// Calls a method and waits for the typed reply.
    ///
    /// A nonzero `timeout` cancels the call when it expires: the
    /// pending entry is removed (a late response gets drained by the
    /// receive task) and a call-timeout error is returned.
    pub async fn call<A, Reply>(
        &self,
        service_method: &str,
        args: &A,
        timeout: Option<Duration>,
    ) -> Result<Reply>
    where
        A: Serialize,
        Reply: DeserializeOwned,
    {
        let Call { seq, done } = self.go(service_method, args)?;
        let outcome = match timeout {
            Some(limit) if !limit.is_zero() => match tokio::time::timeout(limit, done).await {
                Ok(received) => received,
                Err(_) => {
                    self.inner.remove_call(seq);
                    return Err(RpcError::CallTimeout);
                }
            },
            _ => done.await,
        };
        let body = outcome.unwrap_or_else(|_| Err(RpcError::Shutdown("call dropped".to_string())))?;
        self.inner.kind.decode(&body)
    }
}

/// The receive loop: correlate each response by sequence number, then
/// fail everything left when the transport dies.
async fn receive(mut reader: RecordReader<OwnedReadHalf>, inner: Arc<Inner>) {
    let cause = loop {
        let header = match reader.read_header().await {
            Ok(header) => header,
            Err(e) => break e.to_string(),
        };
        match inner.remove_call(header.seq) {
            None => {
                // The call was cancelled or its write failed; the body
                // still has to leave the stream.
                if let Err(e) = reader.skip_body().await {
                    break e.to_string();
                }
            }
            Some(tx) => {
                if !header.error.is_empty() {
                    let _ = tx.send(Err(RpcError::Remote(header.error)));
                    if let Err(e) = reader.skip_body().await {
                        break e.to_string();
                    }
                } else {
                    match reader.read_body_raw().await {
                        Ok(body) => {
                            let _ = tx.send(Ok(body));
                        }
                        Err(e) => {
                            let cause = format!("reading body error: {}", e);
                            let _ = tx.send(Err(RpcError::Shutdown(cause.clone())));
                            break cause;
                        }
                    }
                }
            }
        }
    };
    debug!("rpc client: receive loop ended: {}", cause);
    inner.terminate_calls(&cause);
}

/// Writes the CONNECT preamble and checks the server's status line.
async fn connect_upgrade(stream: &mut TcpStream) -> Result<()> {
    stream
        .write_all(format!("CONNECT {} HTTP/1.0\n\n", DEFAULT_RPC_PATH).as_bytes())
        .await?;

    let status = read_line(stream, 1024).await?;
    if status.split_whitespace().nth(1) != Some("200") {
        return Err(RpcError::HttpUpgrade(status));
    }
    // Drain the rest of the response head.
    loop {
        if read_line(stream, 1024).await?.is_empty() {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tokio::net::TcpListener;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Args {
        num1: i64,
        num2: i64,
    }

    /// A miniature server speaking the wire protocol directly: echoes
    /// request bodies, except `Foo.Fail` which answers with a header
    /// error.
    async fn spawn_echo_server() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let line = read_line(&mut stream, 4096).await.unwrap();
                    let options: Options = serde_json::from_str(&line).unwrap();
                    let kind = CodecKind::from_name(&options.codec).unwrap();
                    let (read_half, write_half) = stream.into_split();
                    let mut reader = RecordReader::new(read_half, kind);
                    let mut writer = RecordWriter::new(write_half, kind);
                    while let Ok(mut header) = reader.read_header().await {
                        let body = reader.read_body_raw().await.unwrap();
                        if header.service_method == "Foo.Fail" {
                            header.error = "boom".to_string();
                            let empty = kind.encode(&()).unwrap();
                            writer.write_raw(&header, &empty).await.unwrap();
                        } else {
                            writer.write_raw(&header, &body).await.unwrap();
                        }
                    }
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_call_round_trip() {
        let addr = spawn_echo_server().await;
        let client = Client::dial("tcp", &addr.to_string(), None, Options::default())
            .await
            .unwrap();

        let reply: Args = client
            .call("Foo.Echo", &Args { num1: 1, num2: 2 }, None)
            .await
            .unwrap();
        assert_eq!(reply, Args { num1: 1, num2: 2 });
    }

    #[tokio::test]
    async fn test_sequence_numbers_increase() {
        let addr = spawn_echo_server().await;
        let client = Client::dial("tcp", &addr.to_string(), None, Options::default())
            .await
            .unwrap();

        let first = client.go("Foo.Echo", &Args { num1: 0, num2: 0 }).unwrap();
        let second = client.go("Foo.Echo", &Args { num1: 0, num2: 0 }).unwrap();
        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);

        first.done().await.unwrap();
        second.done().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_calls_multiplex() {
        let addr = spawn_echo_server().await;
        let client = Client::dial("tcp", &addr.to_string(), None, Options::default())
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for i in 0..16 {
            let client = client.clone();
            tasks.push(tokio::spawn(async move {
                let reply: Args = client
                    .call("Foo.Echo", &Args { num1: i, num2: i * i }, None)
                    .await
                    .unwrap();
                assert_eq!(reply, Args { num1: i, num2: i * i });
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_remote_error_surfaces() {
        let addr = spawn_echo_server().await;
        let client = Client::dial("tcp", &addr.to_string(), None, Options::default())
            .await
            .unwrap();

        let err = client
            .call::<_, Args>("Foo.Fail", &Args { num1: 1, num2: 2 }, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));

        // A per-call error leaves the connection usable.
        let reply: Args = client
            .call("Foo.Echo", &Args { num1: 3, num2: 4 }, None)
            .await
            .unwrap();
        assert_eq!(reply, Args { num1: 3, num2: 4 });
    }

    #[tokio::test]
    async fn test_close_is_idempotent_to_error() {
        let addr = spawn_echo_server().await;
        let client = Client::dial("tcp", &addr.to_string(), None, Options::default())
            .await
            .unwrap();

        assert!(client.is_available());
        client.close().await.unwrap();
        assert!(!client.is_available());

        match client.close().await {
            Err(RpcError::Closing) => {}
            other => panic!("expected Closing, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_call_after_close_is_rejected() {
        let addr = spawn_echo_server().await;
        let client = Client::dial("tcp", &addr.to_string(), None, Options::default())
            .await
            .unwrap();
        client.close().await.unwrap();

        match client.go("Foo.Echo", &Args { num1: 1, num2: 2 }) {
            Err(RpcError::Closing) => {}
            other => panic!("expected Closing, got {:?}", other.map(|c| c.seq)),
        }
    }

    #[tokio::test]
    async fn test_unknown_codec_is_rejected() {
        let addr = spawn_echo_server().await;
        let options = Options {
            codec: "application/gob".to_string(),
            ..Options::default()
        };
        match Client::dial("tcp", &addr.to_string(), None, options).await {
            Err(RpcError::InvalidCodec(name)) => assert_eq!(name, "application/gob"),
            other => panic!("expected InvalidCodec, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_postcard_codec_round_trip() {
        let addr = spawn_echo_server().await;
        let options = Options {
            codec: "application/postcard".to_string(),
            ..Options::default()
        };
        let client = Client::dial("tcp", &addr.to_string(), None, options).await.unwrap();
        let reply: Args = client
            .call("Foo.Echo", &Args { num1: 7, num2: -7 }, None)
            .await
            .unwrap();
        assert_eq!(reply, Args { num1: 7, num2: -7 });
    }
}
