//! A concrete RPC transport over TCP (SPEC_FULL.md §4.10): length-prefixed
//! JSON frames, one fresh connection per call (no pooling, per the
//! Non-goals), used for both the Raft peer protocol and the KV client
//! protocol.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use raft::rpc_types::AppendEntriesRequest;
use raft::rpc_types::AppendEntriesResponse;
use raft::rpc_types::InstallSnapshotRequest;
use raft::rpc_types::InstallSnapshotResponse;
use raft::rpc_types::RequestVoteRequest;
use raft::rpc_types::RequestVoteResponse;
use raft::NodeId;
use raft::Raft;
use raft::RaftNetwork;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;

/// A courtesy bound on connect + roundtrip so a dead peer's spawned send
/// task doesn't hang forever; this is a transport-layer nicety, not a
/// Raft-level deadline the core depends on for correctness (SPEC_FULL.md
/// §5 Cancellation/timeouts).
const RPC_TIMEOUT: Duration = Duration::from_secs(2);

/// Write a 4-byte big-endian length prefix followed by `bytes`.
async fn write_frame(stream: &mut TcpStream, bytes: &[u8]) -> std::io::Result<()> {
    stream.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    stream.write_all(bytes).await?;
    stream.flush().await
}

/// Read one length-prefixed frame.
async fn read_frame(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

async fn call<Req: Serialize, Resp: DeserializeOwned>(addr: SocketAddr, request: &Req) -> anyhow::Result<Resp> {
    tokio::time::timeout(RPC_TIMEOUT, async {
        let mut stream = TcpStream::connect(addr).await?;
        let bytes = serde_json::to_vec(request)?;
        write_frame(&mut stream, &bytes).await?;
        let resp_bytes = read_frame(&mut stream).await?;
        Ok::<Resp, anyhow::Error>(serde_json::from_slice(&resp_bytes)?)
    })
    .await
    .map_err(|_| anyhow::anyhow!("timed out contacting {addr}"))?
}

/// The peer-RPC protocol's request envelope: one connection, one frame in,
/// one frame out.
#[derive(Serialize, Deserialize)]
enum PeerRequest {
    AppendEntries(AppendEntriesRequest),
    RequestVote(RequestVoteRequest),
    InstallSnapshot(InstallSnapshotRequest),
}

#[derive(Serialize, Deserialize)]
enum PeerResponse {
    AppendEntries(AppendEntriesResponse),
    RequestVote(RequestVoteResponse),
    InstallSnapshot(InstallSnapshotResponse),
}

/// A [`RaftNetwork`] that dials a peer's address fresh for every call.
pub struct TcpRaftNetwork {
    addrs: HashMap<NodeId, SocketAddr>,
}

impl TcpRaftNetwork {
    pub fn new(addrs: HashMap<NodeId, SocketAddr>) -> Self {
        Self { addrs }
    }

    fn addr_of(&self, target: NodeId) -> anyhow::Result<SocketAddr> {
        self.addrs.get(&target).copied().ok_or_else(|| anyhow::anyhow!("no known address for node {target}"))
    }
}

#[async_trait]
impl RaftNetwork for TcpRaftNetwork {
    async fn append_entries(&self, target: NodeId, rpc: AppendEntriesRequest) -> anyhow::Result<AppendEntriesResponse> {
        let addr = self.addr_of(target)?;
        match call::<_, PeerResponse>(addr, &PeerRequest::AppendEntries(rpc)).await? {
            PeerResponse::AppendEntries(resp) => Ok(resp),
            _ => anyhow::bail!("node {target} returned a mismatched response kind"),
        }
    }

    async fn request_vote(&self, target: NodeId, rpc: RequestVoteRequest) -> anyhow::Result<RequestVoteResponse> {
        let addr = self.addr_of(target)?;
        match call::<_, PeerResponse>(addr, &PeerRequest::RequestVote(rpc)).await? {
            PeerResponse::RequestVote(resp) => Ok(resp),
            _ => anyhow::bail!("node {target} returned a mismatched response kind"),
        }
    }

    async fn install_snapshot(&self, target: NodeId, rpc: InstallSnapshotRequest) -> anyhow::Result<InstallSnapshotResponse> {
        let addr = self.addr_of(target)?;
        match call::<_, PeerResponse>(addr, &PeerRequest::InstallSnapshot(rpc)).await? {
            PeerResponse::InstallSnapshot(resp) => Ok(resp),
            _ => anyhow::bail!("node {target} returned a mismatched response kind"),
        }
    }
}

/// Listens for inbound peer RPCs and dispatches each to the local [`Raft`]
/// handle, one task per connection.
pub struct PeerServer {
    listener: TcpListener,
    raft: Raft,
}

impl PeerServer {
    pub async fn bind(addr: SocketAddr, raft: Raft) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "peer RPC listener bound");
        Ok(Self { listener, raft })
    }

    /// Wrap an already-bound listener, e.g. one bound at an OS-assigned
    /// ephemeral port for a test harness.
    pub fn from_listener(listener: TcpListener, raft: Raft) -> Self {
        Self { listener, raft }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever, spawning a handler per connection.
    pub async fn serve(self) -> anyhow::Result<()> {
        loop {
            let (stream, peer_addr) = self.listener.accept().await?;
            let raft = self.raft.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, raft).await {
                    tracing::debug!(%peer_addr, error = %e, "peer connection closed with error");
                }
            });
        }
    }

    async fn handle_connection(mut stream: TcpStream, raft: Raft) -> anyhow::Result<()> {
        let frame = read_frame(&mut stream).await?;
        let request: PeerRequest = serde_json::from_slice(&frame)?;
        let response = match request {
            PeerRequest::AppendEntries(rpc) => PeerResponse::AppendEntries(raft.append_entries(rpc).await?),
            PeerRequest::RequestVote(rpc) => PeerResponse::RequestVote(raft.vote(rpc).await?),
            PeerRequest::InstallSnapshot(rpc) => PeerResponse::InstallSnapshot(raft.install_snapshot(rpc).await?),
        };
        let bytes = serde_json::to_vec(&response)?;
        write_frame(&mut stream, &bytes).await?;
        Ok(())
    }
}

/// The KV client protocol (spec.md §6): `Get`/`Set`/`Clear`/`Cas`/
/// `ChangeConfiguration`, each translated into a [`raft::Command`] and
/// forwarded to the Raft core.
#[derive(Serialize, Deserialize)]
pub enum ClientRequest {
    Get { key: String },
    Set { key: String, value: String },
    Clear,
    Cas { key: String, expected: String, new: String },
    ChangeConfiguration { members: Vec<NodeId> },
}

/// The tagged union spec.md §6 calls `Result`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ClientResponse {
    Redirect(Option<NodeId>),
    KeyValue { key: String, value: String },
    Success,
    Failure(String),
}

/// What the front-end needs, on top of the state machine's reply, to
/// reconstruct the client-visible `(key, value)` pair: [`raft::KvReply`] is
/// key-agnostic (a `HashMap` apply result doesn't carry its own key back),
/// and `Set`'s reply echoes the value the client itself sent rather than
/// anything the state machine returns.
enum ReplyContext {
    None,
    Key(String),
    KeyValue(String, String),
}

impl ClientRequest {
    fn into_command(self) -> (raft::Command, ReplyContext) {
        match self {
            ClientRequest::Get { key } => (raft::Command::Get { key: key.clone() }, ReplyContext::Key(key)),
            ClientRequest::Set { key, value } => {
                (raft::Command::Set { key: key.clone(), value: value.clone() }, ReplyContext::KeyValue(key, value))
            }
            ClientRequest::Clear => (raft::Command::Clear, ReplyContext::None),
            ClientRequest::Cas { key, expected, new } => {
                (raft::Command::CompareAndSet { key: key.clone(), expected, new }, ReplyContext::Key(key))
            }
            ClientRequest::ChangeConfiguration { members } => (raft::Command::ChangeConfiguration { members }, ReplyContext::None),
        }
    }
}

/// Translate the Raft core's generic apply-time reply into the client
/// protocol's `Result` (SPEC_FULL.md §4.9, §4.2).
fn to_client_response(result: raft::ClientResult, ctx: ReplyContext) -> ClientResponse {
    match result {
        raft::ClientResult::Redirect(leader) => ClientResponse::Redirect(leader),
        raft::ClientResult::Failure(msg) => ClientResponse::Failure(msg),
        raft::ClientResult::Applied(reply) => match (reply, ctx) {
            (raft::KvReply::Value(value), ReplyContext::Key(key)) => {
                ClientResponse::KeyValue { key, value: value.unwrap_or_default() }
            }
            (raft::KvReply::Ok, ReplyContext::KeyValue(key, value)) => ClientResponse::KeyValue { key, value },
            (raft::KvReply::Ok, _) => ClientResponse::Success,
            (raft::KvReply::Swapped { value, .. }, ReplyContext::Key(key)) => ClientResponse::KeyValue { key, value },
            (reply, ctx) => {
                // Unreachable given how `into_command` pairs commands with
                // contexts, but a protocol bug here shouldn't panic a
                // connection handler serving other clients.
                tracing::warn!(?reply, "reply/context mismatch in client front-end");
                let _ = ctx;
                ClientResponse::Failure("internal error: reply/context mismatch".to_string())
            }
        },
    }
}

/// Listens for inbound client RPCs and forwards each as a command to the
/// Raft core (§4.9 KV Front-End).
pub struct ClientServer {
    listener: TcpListener,
    raft: Raft,
}

impl ClientServer {
    pub async fn bind(addr: SocketAddr, raft: Raft) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "client RPC listener bound");
        Ok(Self { listener, raft })
    }

    pub fn from_listener(listener: TcpListener, raft: Raft) -> Self {
        Self { listener, raft }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn serve(self) -> anyhow::Result<()> {
        loop {
            let (stream, peer_addr) = self.listener.accept().await?;
            let raft = self.raft.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, raft).await {
                    tracing::debug!(%peer_addr, error = %e, "client connection closed with error");
                }
            });
        }
    }

    async fn handle_connection(mut stream: TcpStream, raft: Raft) -> anyhow::Result<()> {
        let frame = read_frame(&mut stream).await?;
        let request: ClientRequest = serde_json::from_slice(&frame)?;
        let (command, ctx) = request.into_command();
        let response = match raft.client_command(command).await {
            Ok(result) => to_client_response(result, ctx),
            Err(_) => ClientResponse::Failure("raft node is shutting down".to_string()),
        };
        let bytes = serde_json::to_vec(&response)?;
        write_frame(&mut stream, &bytes).await?;
        Ok(())
    }
}

/// A thin client for the KV protocol, shared by the `kvstore` CLI and
/// integration tests.
pub struct KvClient {
    addr: SocketAddr,
}

impl KvClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    pub async fn send(&self, request: ClientRequest) -> anyhow::Result<ClientResponse> {
        call(self.addr, &request).await
    }
}
