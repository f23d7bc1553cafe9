use bytes::Bytes;
use tracing_subscriber::EnvFilter;

use anycast_mac::core::{MacConfig, NodeId};
use anycast_mac::network::Deployment;
use anycast_mac::sim::{Simulator, TrafficGenerator};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let nodes = 6;
    let config = MacConfig::default();
    let deployment = Deployment::line(nodes, 10.0, 12.0).expect("valid deployment");

    println!("Line of {} nodes, 10 m apart, 12 m radio range", nodes);
    println!("- Cycle: {:?}", config.cycle_length);
    println!("- Data ratio: {}", config.data_ratio);
    println!("- Max RTS bursts: {}", config.max_rts_sequences);

    let traffic = TrafficGenerator::poisson(0.05, 24, config.seed)
        .expect("valid rate")
        .with_flow(NodeId(0), NodeId(nodes - 1));
    let mut sim = Simulator::new(deployment, config)
        .expect("valid configuration")
        .with_traffic(traffic);
    sim.submit_at(0.1, NodeId(0), NodeId(nodes - 1), Bytes::from_static(b"first reading"));

    let timing = sim.timing();
    println!("\nDerived timing:");
    println!("- Sleep: {:.4} s, long carrier sense: {:.4} s", timing.sleep, timing.cs_long);
    println!("- RTS round: {:.4} s, preambles per burst: {}", timing.rts_round, timing.max_preambles);
    println!("- Hand-off: {:.4} s, FCS base size: {}", timing.handoff, timing.fcs_base_size);

    println!("\nRunning for 120 simulated seconds...");
    let result = match sim.run_until(120.0) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Simulation halted: {}", e);
            return;
        }
    };

    println!("\nDeliveries:");
    for delivery in &result.deliveries {
        println!("  {:>8.3} s  {} at {}  ({} bytes)", delivery.time, delivery.flow, delivery.node, delivery.payload.len());
    }

    println!("\nTotals over {} events:", result.events);
    println!("{}", result.stats);
    println!("Delivery ratio: {:.2}", result.stats.delivery_ratio());
}
