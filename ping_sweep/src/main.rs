use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use icmp_prober::{Config, Pinger};
use tokio::task::JoinSet;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let network: Ipv4Addr = args
        .next()
        .expect("usage: ping_sweep <a.b.c.0> [count]")
        .parse()
        .unwrap();
    let count: u16 = args.next().map(|v| v.parse().unwrap()).unwrap_or(5);

    let pinger = Arc::new(
        Pinger::new(Config {
            timeout: Duration::from_secs(1),
            interval: Duration::from_millis(100),
            ..Config::default()
        })
        .unwrap(),
    );

    let [a, b, c, _] = network.octets();
    let mut sweeps = JoinSet::new();
    for host in 1..255u8 {
        let pinger = Arc::clone(&pinger);
        sweeps.spawn(async move {
            let dest = Ipv4Addr::new(a, b, c, host);
            match pinger.probe(dest, count).await {
                Ok(stats) => {
                    let answered = stats.iter().filter(|s| s.received).count();
                    if answered > 0 {
                        println!("{dest} - {answered}/{count}");
                    }
                }
                Err(e) => eprintln!("{dest}: {e}"),
            }
        });
    }
    while sweeps.join_next().await.is_some() {}

    if let Ok(pinger) = Arc::try_unwrap(pinger) {
        pinger.close().await;
    }
}
