use anyhow::{Context, Result};
use embassy_time::Instant;
use env_logger::Builder;
use log::{LevelFilter, info, warn};
use std::io::Write;

use moonblokz_wifi_simulator::simulation::{Network, NodeStats, load_scene};

fn print_stats(stats: &[NodeStats]) {
    println!(
        "{:>6} {:>9} {:>9} {:>9} {:>9} {:>7} {:>9} {:>9} {:>8} {:>8} {:>9}",
        "node", "algorithm", "data_tx", "rts_tx", "delivered", "dropped", "miss_cts", "miss_ack", "rx_ok", "rx_err", "tx_ms"
    );
    for node in stats {
        println!(
            "{:>6} {:>9} {:>9} {:>9} {:>9} {:>7} {:>9} {:>9} {:>8} {:>8} {:>9.3}",
            node.node_id,
            node.algorithm,
            node.traffic.data_sent,
            node.traffic.rts_sent,
            node.traffic.delivered,
            node.traffic.dropped,
            node.traffic.missed_cts,
            node.traffic.missed_ack,
            node.airtime.rx_ok,
            node.airtime.rx_error,
            node.airtime.tx.as_micros() as f64 / 1000.0
        );
    }
}

fn main() -> Result<()> {
    // Logging setup: records carry the simulated time, not the host time.
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("moonblokz_wifi_simulator"), LevelFilter::Debug)
        .parse_default_env()
        .format(|buf, record| writeln!(buf, "[{:>10} us {:<5} {}] {}", Instant::now().as_micros(), record.level(), record.target(), record.args()))
        .init();

    let Some(path) = std::env::args().nth(1) else {
        anyhow::bail!("usage: moonblokz-wifi-simulator <scene.json|scene.toml>");
    };

    info!("Starting up");
    let scene = load_scene(&path).with_context(|| format!("failed to load scene {path}"))?;
    let mut network = Network::new(&scene).with_context(|| format!("failed to build network from {path}"))?;
    network.run_for(scene.duration());

    if network.trace().dropped() > 0 {
        warn!("{} trace records dropped, the trace log keeps the newest {}", network.trace().dropped(), network.trace().len());
    }
    print_stats(&network.stats());
    Ok(())
}
