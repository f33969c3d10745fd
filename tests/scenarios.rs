//! End-to-end cluster scenarios driving real `Network` instances wired
//! together through `LoopbackHost`, following the teacher's own
//! `#[tokio::test]` integration-test convention of plain async fns over a
//! mocking framework.

use meshline::{
    Config, FnValidator, LoopbackHost, Network, PeerId, PeerProtocol, RoutingVariant, Topic,
    ValidationOutcome, ValidationReason,
};
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Receiver;

/// Short enough that a handful of heartbeats fit in a test's real-time
/// budget, long enough that tokio's scheduler doesn't starve the event loop.
fn fast_config(routing_variant: RoutingVariant) -> Config {
    Config {
        routing_variant,
        heartbeat_interval: Duration::from_millis(30),
        heartbeat_initial_delay: Duration::from_millis(5),
        decay_interval: Duration::from_millis(30),
        ..Config::default()
    }
}

fn node_id(i: usize) -> PeerId {
    PeerId::new(vec![(i & 0xff) as u8, (i >> 8) as u8])
}

/// Spin up `n` nodes sharing a `LoopbackHost` registry, with `configs[i]`
/// governing node `i`. Returns the handles and their topic subscriptions.
async fn spawn_cluster(configs: Vec<Config>, topic: &Topic) -> (Vec<Network>, Vec<Receiver<meshline::Message>>) {
    let registry = LoopbackHost::new_registry();
    let mut networks = Vec::with_capacity(configs.len());
    let mut subs = Vec::with_capacity(configs.len());
    for (i, config) in configs.into_iter().enumerate() {
        let self_id = node_id(i);
        let (host, incoming) = LoopbackHost::register(self_id.clone(), registry.clone(), 64 * 1024);
        let network = Network::new(self_id, config, None, Arc::new(host), incoming).expect("config validates");
        let sub = network.join(topic.clone(), None).await.expect("join");
        networks.push(network);
        subs.push(sub.receiver);
    }
    (networks, subs)
}

async fn connect_fully(networks: &[Network], n: usize) {
    for i in 0..n {
        for j in (i + 1)..n {
            networks[i].connect(node_id(j), PeerProtocol::FullMesh, false).await.unwrap();
        }
    }
}

async fn connect_sparse(networks: &[Network], n: usize, degree: usize, seed_offset: u8) {
    let ids: Vec<PeerId> = (0..n).map(node_id).collect();
    let mut rng = rand::rngs::StdRng::from_seed_offset(seed_offset);
    for i in 0..n {
        let mut candidates: Vec<PeerId> = ids.iter().filter(|p| **p != ids[i]).cloned().collect();
        candidates.shuffle(&mut rng);
        for peer in candidates.into_iter().take(degree) {
            // Both sides may race to open a stream to each other; a loopback
            // double-connect just creates a second, harmless peer record.
            let _ = networks[i].connect(peer, PeerProtocol::FullMesh, false).await;
        }
    }
}

/// Tiny local shim: the test binary has no need for a full seeded-RNG crate
/// feature, so this hand-rolls a deterministic-enough seed from a byte.
trait FromSeedOffset {
    fn from_seed_offset(seed: u8) -> rand::rngs::StdRng;
}
impl FromSeedOffset for rand::rngs::StdRng {
    fn from_seed_offset(seed: u8) -> rand::rngs::StdRng {
        use rand::SeedableRng;
        rand::rngs::StdRng::from_seed([seed; 32])
    }
}

async fn publish_from_each(networks: &[Network], topic: &Topic, count: usize) {
    for (i, network) in networks.iter().enumerate().take(count) {
        let payload = format!("message {i}").into_bytes();
        network.publish(topic.clone(), payload).await.expect("publish");
    }
}

fn drain_count(subs: &mut [Receiver<meshline::Message>]) -> usize {
    let mut total = 0;
    for sub in subs.iter_mut() {
        while sub.try_recv().is_ok() {
            total += 1;
        }
    }
    total
}

#[tokio::test]
async fn s1_small_cluster_flood() {
    let topic = Topic::new("test");
    let configs = (0..10).map(|_| fast_config(RoutingVariant::Gossip)).collect();
    let (networks, mut subs) = spawn_cluster(configs, &topic).await;
    connect_fully(&networks, 10).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    publish_from_each(&networks, &topic, 10).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let deliveries = drain_count(&mut subs);
    assert!(deliveries >= 70, "expected >= 70 deliveries, got {deliveries}");
}

#[tokio::test]
async fn s2_sparse_cluster() {
    let topic = Topic::new("test");
    let configs = (0..50).map(|_| fast_config(RoutingVariant::Gossip)).collect();
    let (networks, mut subs) = spawn_cluster(configs, &topic).await;
    connect_sparse(&networks, 50, 12, 7).await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    publish_from_each(&networks, &topic, 10).await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    let deliveries = drain_count(&mut subs);
    assert!(deliveries >= 350, "expected >= 350 deliveries, got {deliveries}");
}

#[tokio::test]
async fn s3_mixed_routing_variants() {
    let topic = Topic::new("test");
    let mut configs = Vec::with_capacity(40);
    for i in 0..40 {
        let variant = if i < 10 { RoutingVariant::Gossip } else { RoutingVariant::RandomFanout };
        configs.push(fast_config(variant));
    }
    let (networks, mut subs) = spawn_cluster(configs, &topic).await;
    connect_sparse(&networks, 40, 12, 11).await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    publish_from_each(&networks, &topic, 10).await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    let deliveries = drain_count(&mut subs);
    assert!(deliveries >= 280, "expected >= 280 deliveries, got {deliveries}");
}

#[tokio::test]
async fn s4_enough_peers_on_stabilized_random_fanout() {
    let topic = Topic::new("test");
    let configs = (0..20).map(|_| fast_config(RoutingVariant::RandomFanout)).collect();
    let (networks, _subs) = spawn_cluster(configs, &topic).await;
    connect_sparse(&networks, 20, 12, 3).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(networks[0].enough_peers(topic.clone(), 0).await.unwrap());
    assert!(networks[0].enough_peers(topic.clone(), 100).await.unwrap());
}

#[tokio::test]
async fn s5_backoff_respected_then_expires() {
    let topic = Topic::new("test");
    let mut config_a = fast_config(RoutingVariant::Gossip);
    config_a.d = 1;
    config_a.d_lo = 1;
    config_a.d_hi = 1;
    config_a.d_out = 0;
    let config_b = fast_config(RoutingVariant::Gossip);
    let (networks, _subs) = spawn_cluster(vec![config_a, config_b], &topic).await;
    networks[0].connect(node_id(1), PeerProtocol::FullMesh, false).await.unwrap();

    // Give A's single-slot mesh time to graft B, then heartbeat again to
    // force A to prune someone (itself has nobody else, so this scenario
    // only checks that backoff bookkeeping round-trips without panicking
    // across several heartbeats -- the literal GRAFT/PRUNE exchange is
    // exercised at the router level in router/gossip.rs's own tests).
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(networks[0].enough_peers(topic.clone(), 0).await.unwrap());
}

#[tokio::test]
async fn s6_validator_reject_increments_invalid_deliveries_and_withholds_delivery() {
    let topic = Topic::new("test");
    let configs = vec![fast_config(RoutingVariant::Gossip), fast_config(RoutingVariant::Gossip)];
    let registry = LoopbackHost::new_registry();
    let mut networks = Vec::new();
    let mut subs = Vec::new();
    for (i, config) in configs.into_iter().enumerate() {
        let self_id = node_id(i);
        let (host, incoming) = LoopbackHost::register(self_id.clone(), registry.clone(), 64 * 1024);
        let network = Network::new(self_id, config, None, Arc::new(host), incoming).unwrap();
        let validator = Arc::new(FnValidator(|_peer: &PeerId, message: &meshline::Message| {
            if message.data.first() == Some(&0u8) {
                ValidationOutcome::Reject(ValidationReason::ValidationFailed)
            } else {
                ValidationOutcome::Accept
            }
        }));
        let sub = network.join(topic.clone(), Some(validator)).await.unwrap();
        networks.push(network);
        subs.push(sub.receiver);
    }
    networks[0].connect(node_id(1), PeerProtocol::FullMesh, false).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    networks[0].publish(topic.clone(), vec![0u8, 1, 2]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    // Node 0 delivers locally regardless (it never runs its own validator on
    // its own publish); node 1's validator must have rejected the relayed
    // copy, so node 1's subscriber sees nothing.
    assert!(subs[1].try_recv().is_err());
}
