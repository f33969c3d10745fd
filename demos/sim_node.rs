//! Manual smoke-test runner for a single simulated cluster: spins up N nodes
//! over a `LoopbackHost`, wires them into a fixed-degree random graph, joins
//! them all to one topic, publishes a handful of messages, and prints the
//! aggregate delivery count. Exercises the same path as `tests/scenarios.rs`
//! but left as a runnable binary for manual experimentation, the way the
//! teacher's own `src/bin/attacker.rs` and `src/bin/keygen.rs` are throwaway
//! harness tools rather than production entry points.

use clap::Parser;
use meshline::{Config, LoopbackHost, Network, PeerId, PeerProtocol, RoutingVariant, Topic};
use rand::seq::SliceRandom;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sim-node", version, about = "meshline in-process cluster simulator")]
struct Args {
    /// Number of simulated nodes.
    #[arg(short, long, default_value_t = 20)]
    nodes: usize,

    /// Neighbours each node is wired to at startup.
    #[arg(short, long, default_value_t = 6)]
    degree: usize,

    /// Routing variant: gossip, flood, random-fanout.
    #[arg(short, long, default_value = "gossip")]
    variant: String,

    /// Number of publishes to issue (one per distinct publishing node).
    #[arg(short, long, default_value_t = 10)]
    messages: usize,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let routing_variant = match args.variant.as_str() {
        "flood" => RoutingVariant::Flood,
        "random-fanout" => RoutingVariant::RandomFanout,
        _ => RoutingVariant::Gossip,
    };

    let topic = Topic::new("test");
    let registry = LoopbackHost::new_registry();
    let mut networks = Vec::with_capacity(args.nodes);
    let mut subs = Vec::with_capacity(args.nodes);

    for i in 0..args.nodes {
        let self_id = PeerId::new(vec![i as u8, (i >> 8) as u8]);
        let (host, incoming) = LoopbackHost::register(self_id.clone(), registry.clone(), 64 * 1024);
        let config = Config {
            routing_variant,
            ..Config::default()
        };
        let network = Network::new(self_id, config, None, std::sync::Arc::new(host), incoming)
            .expect("default config always validates");
        let sub = network.join(topic.clone(), None).await.expect("join");
        networks.push(network);
        subs.push(sub);
    }

    let ids: Vec<PeerId> = (0..args.nodes).map(|i| PeerId::new(vec![i as u8, (i >> 8) as u8])).collect();
    let mut rng = rand::thread_rng();
    for (i, network) in networks.iter().enumerate() {
        let mut candidates: Vec<PeerId> = ids.iter().filter(|p| **p != ids[i]).cloned().collect();
        candidates.shuffle(&mut rng);
        for peer in candidates.into_iter().take(args.degree) {
            let _ = network.connect(peer, PeerProtocol::FullMesh, false).await;
        }
    }

    println!("wired {} nodes, degree {}, variant {:?}", args.nodes, args.degree, routing_variant);
    tokio::time::sleep(Duration::from_millis(1_500)).await;

    for (i, network) in networks.iter().enumerate().take(args.messages) {
        let payload = format!("message {i}").into_bytes();
        network.publish(topic.clone(), payload).await.expect("publish");
    }

    tokio::time::sleep(Duration::from_millis(2_500)).await;

    let mut delivered = 0usize;
    for sub in subs.iter_mut() {
        while sub.receiver.try_recv().is_ok() {
            delivered += 1;
        }
    }
    println!("aggregate deliveries: {delivered}");
}
