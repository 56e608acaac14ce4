//! End-to-end scenario 1 from spec.md §8: a 3-node cluster, all fresh,
//! elects a leader and commits a client write that every node converges on.
//! Runs over real TCP loopback sockets end to end (listener -> transport ->
//! Raft core -> state machine and back), exercising the full stack this
//! crate wires together rather than `RaftCore` in isolation.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use kvstore::config::NodeConfig;
use kvstore::config::PeerAddr;
use kvstore::transport::ClientRequest;
use kvstore::transport::ClientResponse;
use kvstore::ClientServer;
use kvstore::KvClient;
use kvstore::PeerServer;
use kvstore::TcpRaftNetwork;
use raft::metrics::RaftRole;
use raft::persister::MemPersister;
use raft::Raft;
use tokio::net::TcpListener;

struct Node {
    raft: Raft,
    client_addr: SocketAddr,
}

async fn spawn_cluster(node_ids: &[u64]) -> Vec<Node> {
    let mut peer_listeners = HashMap::new();
    let mut client_listeners = HashMap::new();
    for &id in node_ids {
        peer_listeners.insert(id, TcpListener::bind("127.0.0.1:0").await.unwrap());
        client_listeners.insert(id, TcpListener::bind("127.0.0.1:0").await.unwrap());
    }

    let peer_addrs: HashMap<u64, SocketAddr> =
        peer_listeners.iter().map(|(&id, l)| (id, l.local_addr().unwrap())).collect();

    let mut nodes = Vec::new();
    for &id in node_ids {
        let peers: Vec<PeerAddr> =
            node_ids.iter().filter(|&&other| other != id).map(|&other| PeerAddr { id: other, addr: peer_addrs[&other] }).collect();

        let config = NodeConfig {
            node_id: id,
            peers,
            peer_addr: peer_addrs[&id],
            client_addr: client_listeners[&id].local_addr().unwrap(),
            data_dir: std::path::PathBuf::new(), // unused: this test uses MemPersister.
            election_timeout_min_ms: 150,
            election_timeout_max_ms: 300,
            heartbeat_interval_ms: 50,
            compaction_threshold: None,
        };

        let network = Arc::new(TcpRaftNetwork::new(config.peer_addrs()));
        let persister = Arc::new(MemPersister::new());
        let raft = Raft::new(config.raft_config(), config.peer_registry(), network, persister);

        let peer_listener = peer_listeners.remove(&id).unwrap();
        let client_listener = client_listeners.remove(&id).unwrap();
        let client_addr = client_listener.local_addr().unwrap();

        tokio::spawn(PeerServer::from_listener(peer_listener, raft.clone()).serve());
        tokio::spawn(ClientServer::from_listener(client_listener, raft.clone()).serve());

        nodes.push(Node { raft, client_addr });
    }
    nodes
}

async fn wait_for_a_leader(nodes: &[Node]) -> usize {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            for (i, node) in nodes.iter().enumerate() {
                if node.raft.metrics().role == RaftRole::Leader {
                    return i;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("a leader should be elected within the timeout")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bootstrap_and_single_set_is_visible_cluster_wide() {
    let nodes = spawn_cluster(&[1, 2, 3]).await;
    let leader = wait_for_a_leader(&nodes).await;

    let client = KvClient::new(nodes[leader].client_addr);
    let response = client.send(ClientRequest::Set { key: "a".into(), value: "1".into() }).await.unwrap();
    assert_eq!(response, ClientResponse::KeyValue { key: "a".into(), value: "1".into() });

    // Read back through the leader; every node's state machine converges on
    // commit, but only the leader's reads are served through this protocol
    // (reads go through the log per spec.md's Non-goals, so we do not also
    // need to wait for follower apply to validate the read path itself).
    let get = client.send(ClientRequest::Get { key: "a".into() }).await.unwrap();
    assert_eq!(get, ClientResponse::KeyValue { key: "a".into(), value: "1".into() });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn compare_and_set_success_and_conflict() {
    let nodes = spawn_cluster(&[1, 2, 3]).await;
    let leader = wait_for_a_leader(&nodes).await;
    let client = KvClient::new(nodes[leader].client_addr);

    client.send(ClientRequest::Set { key: "x".into(), value: "A".into() }).await.unwrap();

    let swapped = client.send(ClientRequest::Cas { key: "x".into(), expected: "A".into(), new: "B".into() }).await.unwrap();
    assert_eq!(swapped, ClientResponse::KeyValue { key: "x".into(), value: "B".into() });

    let conflict = client.send(ClientRequest::Cas { key: "x".into(), expected: "A".into(), new: "C".into() }).await.unwrap();
    assert_eq!(conflict, ClientResponse::KeyValue { key: "x".into(), value: "B".into() });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn non_leader_redirects_client_writes() {
    let nodes = spawn_cluster(&[1, 2, 3]).await;
    let leader = wait_for_a_leader(&nodes).await;
    let follower = (0..nodes.len()).find(|&i| i != leader).unwrap();

    let client = KvClient::new(nodes[follower].client_addr);
    let response = client.send(ClientRequest::Set { key: "a".into(), value: "1".into() }).await.unwrap();
    match response {
        ClientResponse::Redirect(_) => {}
        other => panic!("expected a redirect from a non-leader node, got {other:?}"),
    }
}
