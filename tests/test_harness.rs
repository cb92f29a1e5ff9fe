//! Test harness for multi-node election tests.
//!
//! Provides an in-memory broadcast LAN and utilities for spawning, managing,
//! and observing clusters of dictator nodes.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use dictator::config::ElectionConfig;
use dictator::election::{DictatorNode, ElectionState};
use dictator::mission::{bootstrap_router, BootstrapMission, Mission, TenureContext};
use dictator::protocol::{Envelope, Kind, NodeId};
use dictator::router::CommandRouter;
use dictator::transport::Packet;

const CHANNEL_CAPACITY: usize = 256;

struct Member {
    inbox: mpsc::Sender<Packet>,
    isolated: bool,
}

struct NetworkState {
    members: HashMap<usize, Member>,
    next_id: usize,
    loss_rate: f64,
    duplicate_rate: f64,
}

/// An in-memory broadcast domain. Every packet sent by a member reaches
/// every member, the sender included, unless lost or isolated.
#[derive(Clone)]
pub struct TestNetwork {
    state: Arc<Mutex<NetworkState>>,
}

/// One member's view of the network.
pub struct Attachment {
    pub id: usize,
    pub addr: SocketAddr,
    pub inbound: mpsc::Receiver<Packet>,
    pub outbound: mpsc::Sender<Packet>,
}

impl TestNetwork {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(NetworkState {
                members: HashMap::new(),
                next_id: 1,
                loss_rate: 0.0,
                duplicate_rate: 0.0,
            })),
        }
    }

    /// Drop each delivery with probability `loss_rate`, and deliver a second
    /// copy with probability `duplicate_rate`.
    pub fn set_faults(&self, loss_rate: f64, duplicate_rate: f64) {
        let mut state = self.state.lock().unwrap();
        state.loss_rate = loss_rate;
        state.duplicate_rate = duplicate_rate;
    }

    pub fn attach(&self) -> Attachment {
        let (inbox_tx, inbound) = mpsc::channel(CHANNEL_CAPACITY);
        let (outbound, mut outbox_rx) = mpsc::channel::<Packet>(CHANNEL_CAPACITY);

        let id = {
            let mut state = self.state.lock().unwrap();
            let id = state.next_id;
            state.next_id += 1;
            state.members.insert(
                id,
                Member {
                    inbox: inbox_tx,
                    isolated: false,
                },
            );
            id
        };
        let addr = member_addr(id);

        let network = self.clone();
        tokio::spawn(async move {
            while let Some(packet) = outbox_rx.recv().await {
                for (inbox, copies) in network.route(id) {
                    for _ in 0..copies {
                        // A full inbox drops the packet, like a socket buffer would.
                        let _ = inbox.try_send(Packet::to(addr, packet.payload.clone()));
                    }
                }
            }
        });

        Attachment {
            id,
            addr,
            inbound,
            outbound,
        }
    }

    pub fn detach(&self, id: usize) {
        self.state.lock().unwrap().members.remove(&id);
    }

    /// Cut a member off: it only hears itself, and nobody hears it.
    pub fn isolate(&self, id: usize) {
        if let Some(member) = self.state.lock().unwrap().members.get_mut(&id) {
            member.isolated = true;
        }
    }

    pub fn heal(&self, id: usize) {
        if let Some(member) = self.state.lock().unwrap().members.get_mut(&id) {
            member.isolated = false;
        }
    }

    fn route(&self, from: usize) -> Vec<(mpsc::Sender<Packet>, usize)> {
        let state = self.state.lock().unwrap();
        let sender_isolated = state.members.get(&from).map_or(true, |m| m.isolated);
        let mut rng = rand::thread_rng();

        state
            .members
            .iter()
            .filter(|(id, member)| **id == from || (!sender_isolated && !member.isolated))
            .filter_map(|(_, member)| {
                if rng.gen_bool(state.loss_rate) {
                    return None;
                }
                let copies = if rng.gen_bool(state.duplicate_rate) { 2 } else { 1 };
                Some((member.inbox.clone(), copies))
            })
            .collect()
    }
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}

fn member_addr(id: usize) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, (id % 250) as u8 + 1], 43001))
}

/// A mission that only counts its launches.
pub fn recording_mission() -> (Arc<dyn Mission>, Arc<AtomicUsize>) {
    let launches = Arc::new(AtomicUsize::new(0));
    let counter = launches.clone();
    let mission: Arc<dyn Mission> = Arc::new(move |_tenure: TenureContext| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (mission, launches)
}

/// Handle to a running test node
pub struct TestNode {
    pub node_id: NodeId,
    pub member: usize,
    pub shutdown: CancellationToken,
    pub state: watch::Receiver<ElectionState>,
    pub launches: Arc<AtomicUsize>,
    handle: Option<JoinHandle<()>>,
}

impl TestNode {
    /// Spawn a node on `network` with the given router and mission.
    pub fn spawn(
        network: &TestNetwork,
        node_id: NodeId,
        router: CommandRouter,
        mission: Arc<dyn Mission>,
        launches: Arc<AtomicUsize>,
    ) -> Self {
        let attachment = network.attach();
        let shutdown = CancellationToken::new();

        let node = DictatorNode::new(
            ElectionConfig::default(),
            shutdown.clone(),
            attachment.inbound,
            attachment.outbound,
            router,
            mission,
        )
        .expect("default election config is valid")
        .with_node_id(node_id.clone());
        let state = node.subscribe();
        let handle = tokio::spawn(node.run());

        Self {
            node_id,
            member: attachment.id,
            shutdown,
            state,
            launches,
            handle: Some(handle),
        }
    }

    /// Spawn a node with a recording mission and an empty router.
    pub fn spawn_recording(network: &TestNetwork, node_id: &str) -> Self {
        let (mission, launches) = recording_mission();
        Self::spawn(
            network,
            NodeId::from(node_id),
            CommandRouter::new(),
            mission,
            launches,
        )
    }

    pub fn state(&self) -> ElectionState {
        *self.state.borrow()
    }

    pub fn is_leader(&self) -> bool {
        self.state() == ElectionState::Leading
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Wait until the node reports `target`.
    pub async fn wait_for_state(&self, target: ElectionState, timeout_duration: Duration) -> bool {
        let mut state = self.state.clone();
        let reached = matches!(
            tokio::time::timeout(timeout_duration, state.wait_for(|s| *s == target)).await,
            Ok(Ok(_))
        );
        reached
    }

    /// Cancel the node and wait for its loop to exit.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Test cluster managing multiple nodes on one network
pub struct TestCluster {
    pub network: TestNetwork,
    pub nodes: BTreeMap<usize, TestNode>,
}

impl TestCluster {
    /// Create and start a cluster with n recording nodes
    pub fn new(num_nodes: usize) -> Self {
        Self::on_network(num_nodes, TestNetwork::new())
    }

    pub fn on_network(num_nodes: usize, network: TestNetwork) -> Self {
        let nodes = (1..=num_nodes)
            .map(|i| {
                let node = TestNode::spawn_recording(&network, &format!("node-{}", i));
                (i, node)
            })
            .collect();
        Self { network, nodes }
    }

    /// Create a cluster whose nodes all run the bootstrap mission.
    pub fn bootstrap(num_nodes: usize, mission: BootstrapMission) -> Self {
        let network = TestNetwork::new();
        let nodes = (1..=num_nodes)
            .map(|i| {
                let node = TestNode::spawn(
                    &network,
                    NodeId::from(format!("node-{}", i)),
                    bootstrap_router(),
                    Arc::new(mission.clone()),
                    Arc::new(AtomicUsize::new(0)),
                );
                (i, node)
            })
            .collect();
        Self { network, nodes }
    }

    pub fn get_node(&self, index: usize) -> Option<&TestNode> {
        self.nodes.get(&index)
    }

    pub fn leader_ids(&self) -> Vec<usize> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.is_leader())
            .map(|(index, _)| *index)
            .collect()
    }

    /// Count the number of leaders in the cluster
    pub fn count_leaders(&self) -> usize {
        self.leader_ids().len()
    }

    /// Wait for any leader with timeout
    pub async fn wait_for_leader(&self, timeout_duration: Duration) -> Option<usize> {
        let found = wait_for(
            || async { self.count_leaders() > 0 },
            timeout_duration,
            Duration::from_millis(50),
        )
        .await;

        if found {
            self.leader_ids().first().copied()
        } else {
            None
        }
    }

    /// Wait until exactly one leader holds for `hold`, returning it.
    pub async fn wait_for_stable_leader(
        &self,
        hold: Duration,
        timeout_duration: Duration,
    ) -> Option<usize> {
        let start = tokio::time::Instant::now();
        while start.elapsed() < timeout_duration {
            let leaders = self.leader_ids();
            if leaders.len() == 1 {
                let leader = leaders[0];
                let stable = hold_for(
                    || self.leader_ids() == [leader],
                    hold,
                    Duration::from_millis(50),
                )
                .await;
                if stable {
                    return Some(leader);
                }
            } else {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
        None
    }

    /// Wait for a new leader among remaining nodes (excluding a specific node)
    pub async fn wait_for_new_leader(
        &self,
        excluded_node: usize,
        timeout_duration: Duration,
    ) -> Option<usize> {
        self.wait_for_leader_in_group(
            &self
                .nodes
                .keys()
                .copied()
                .filter(|id| *id != excluded_node)
                .collect::<Vec<_>>(),
            timeout_duration,
        )
        .await
    }

    /// Wait for a leader to emerge within a specific group of nodes
    pub async fn wait_for_leader_in_group(
        &self,
        group: &[usize],
        timeout_duration: Duration,
    ) -> Option<usize> {
        let leader_in_group = || {
            group
                .iter()
                .copied()
                .find(|id| self.nodes.get(id).is_some_and(|node| node.is_leader()))
        };

        let found = wait_for(
            || async { leader_in_group().is_some() },
            timeout_duration,
            Duration::from_millis(50),
        )
        .await;

        if found {
            leader_in_group()
        } else {
            None
        }
    }

    /// Wait until every node has terminated
    pub async fn wait_for_all_terminated(&self, timeout_duration: Duration) -> bool {
        wait_for(
            || async {
                self.nodes
                    .values()
                    .all(|node| node.state() == ElectionState::Terminated)
            },
            timeout_duration,
            Duration::from_millis(50),
        )
        .await
    }

    /// Shutdown a specific node (simulates crash)
    pub fn shutdown_node(&mut self, index: usize) -> bool {
        match self.nodes.remove(&index) {
            Some(node) => {
                self.network.detach(node.member);
                true
            }
            None => false,
        }
    }

    /// Isolate a node from all other nodes
    pub fn isolate_node(&self, index: usize) {
        if let Some(node) = self.nodes.get(&index) {
            self.network.isolate(node.member);
        }
    }

    /// Heal an isolated node (reconnect to all others)
    pub fn heal_node(&self, index: usize) {
        if let Some(node) = self.nodes.get(&index) {
            self.network.heal(node.member);
        }
    }

    /// Shutdown all nodes and wait for their loops to exit
    pub async fn shutdown(&mut self) {
        for node in self.nodes.values_mut() {
            node.stop().await;
        }
    }
}

/// Wait for the next heartbeat sent by `sender` on an observer attachment.
pub async fn next_heartbeat_from(
    observer: &mut Attachment,
    sender: &NodeId,
    timeout_duration: Duration,
) -> Option<tokio::time::Instant> {
    tokio::time::timeout(timeout_duration, async {
        while let Some(packet) = observer.inbound.recv().await {
            if let Ok(envelope) = Envelope::decode(&packet.payload) {
                if envelope.kind == Kind::Heartbeat && &envelope.sender_id == sender {
                    return Some(tokio::time::Instant::now());
                }
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

/// Discard whatever an observer has received so far.
pub fn drain(observer: &mut Attachment) {
    while observer.inbound.try_recv().is_ok() {}
}

/// Wait for a condition to become true with timeout
pub async fn wait_for<F, Fut>(
    condition: F,
    timeout_duration: Duration,
    poll_interval: Duration,
) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout_duration {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Check that a condition holds at every poll for the whole duration
pub async fn hold_for<F>(condition: F, duration: Duration, poll_interval: Duration) -> bool
where
    F: Fn() -> bool,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < duration {
        if !condition() {
            return false;
        }
        tokio::time::sleep(poll_interval).await;
    }
    condition()
}

/// Assert a condition eventually becomes true
pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(50)).await;
    assert!(result, "{}", message);
}
