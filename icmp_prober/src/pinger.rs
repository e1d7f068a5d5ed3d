use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::channel::{EchoSender, RawChannel};
use crate::error::ProbeError;
use crate::executor::{ProbeExecutor, Stat};
use crate::table::CorrelationTable;

/// Tunables for a [`Pinger`]. A zero `timeout`, `interval` or `workers`
/// falls back to its default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Per-echo wait before declaring the echo lost. Default 10 s.
    pub timeout: Duration,
    /// Pause between successive echoes of one probe request. Default 1 s.
    pub interval: Duration,
    /// Worker pool size, bounding concurrent probe requests. Default 1000.
    pub workers: usize,
    /// Filler payload size of each echo request, in bytes. Default 128.
    pub payload_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            interval: Duration::from_secs(1),
            workers: 1000,
            payload_size: 128,
        }
    }
}

impl Config {
    fn normalized(self) -> Self {
        let defaults = Self::default();
        Self {
            timeout: if self.timeout.is_zero() {
                defaults.timeout
            } else {
                self.timeout
            },
            interval: if self.interval.is_zero() {
                defaults.interval
            } else {
                self.interval
            },
            workers: if self.workers == 0 {
                defaults.workers
            } else {
                self.workers
            },
            payload_size: self.payload_size,
        }
    }
}

/// One caller-initiated unit of work: `count` echoes to one destination,
/// answered on a private response channel.
struct ProbeRequest {
    dest: Ipv4Addr,
    count: u16,
    response_channel: oneshot::Sender<Vec<Stat>>,
}

/// Concurrent ICMP echo prober.
///
/// One raw socket, one background receive loop, and a fixed pool of
/// workers pulling probe requests off a rendezvous queue. The queue has no
/// buffer: [`Pinger::probe`] waits until a worker is free, which is the
/// admission control keeping callers from outrunning the pool.
pub struct Pinger {
    queue: mpsc::Sender<ProbeRequest>,
    workers: Vec<JoinHandle<()>>,
    table: Arc<CorrelationTable>,
}

impl Pinger {
    /// Opens the raw ICMP socket and starts the receive loop and the
    /// worker pool. Fails when the socket cannot be opened, which on most
    /// systems means missing privileges. Must be called from within a
    /// tokio runtime.
    pub fn new(config: Config) -> Result<Self, ProbeError> {
        let config = config.normalized();
        let table = Arc::new(CorrelationTable::default());
        let channel = Arc::new(RawChannel::open(config.payload_size, Arc::clone(&table))?);
        Ok(Self::start(config, channel, table))
    }

    pub(crate) fn start(
        config: Config,
        channel: Arc<dyn EchoSender>,
        table: Arc<CorrelationTable>,
    ) -> Self {
        let executor = Arc::new(ProbeExecutor {
            channel,
            table: Arc::clone(&table),
            timeout: config.timeout,
            interval: config.interval,
        });
        let (queue, rx) = mpsc::channel(1);
        let rx = Arc::new(Mutex::new(rx));
        let workers = (0..config.workers)
            .map(|_| tokio::spawn(worker_loop(Arc::clone(&rx), Arc::clone(&executor))))
            .collect();
        Self {
            queue,
            workers,
            table,
        }
    }

    /// Sends `count` echoes to `dest` and waits for every outcome.
    ///
    /// Returns exactly `count` outcomes, indexed by sequence number; a
    /// `count` of zero returns an empty vec without touching the wire.
    /// Fails only when the pool is gone.
    pub async fn probe(&self, dest: Ipv4Addr, count: u16) -> Result<Vec<Stat>, ProbeError> {
        let (response_channel, response) = oneshot::channel();
        let request = ProbeRequest {
            dest,
            count,
            response_channel,
        };
        self.queue
            .send(request)
            .await
            .map_err(|_| ProbeError::Closed)?;
        response.await.map_err(|_| ProbeError::Closed)
    }

    /// Number of echoes currently awaiting a reply, across all requests.
    /// Drops back to zero once in-flight requests finish.
    pub fn pending_echoes(&self) -> usize {
        self.table.pending()
    }

    /// Stops accepting probe requests and waits for every worker to
    /// finish its current one. Consuming `self` makes a second close
    /// unrepresentable. The receive thread is left to die with the
    /// process.
    pub async fn close(self) {
        drop(self.queue);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

async fn worker_loop(queue: Arc<Mutex<mpsc::Receiver<ProbeRequest>>>, executor: Arc<ProbeExecutor>) {
    loop {
        // The guard is released as soon as one request is pulled, so the
        // pool drains the queue one request per free worker.
        let request = queue.lock().await.recv().await;
        let Some(request) = request else { break };
        let stats = executor.run(request.dest, request.count).await;
        // The caller may have stopped waiting; that is its business.
        let _ = request.response_channel.send(stats);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::channel::testing::FakeChannel;

    const DEST: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);
    const OTHER: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 2);

    fn config() -> Config {
        Config {
            timeout: Duration::from_millis(200),
            interval: Duration::from_millis(10),
            workers: 4,
            payload_size: 64,
        }
    }

    fn spawn_pinger(channel: Arc<FakeChannel>, table: Arc<CorrelationTable>) -> Pinger {
        Pinger::start(config(), channel, table)
    }

    #[tokio::test(start_paused = true)]
    async fn responsive_target_yields_all_outcomes() {
        let table = Arc::new(CorrelationTable::default());
        let mut channel = FakeChannel::new(Arc::clone(&table));
        channel.reply_after = Some(Duration::from_millis(2));
        let pinger = spawn_pinger(Arc::new(channel), Arc::clone(&table));

        let stats = pinger.probe(DEST, 5).await.unwrap();
        assert_eq!(stats.len(), 5);
        for stat in &stats {
            assert!(stat.received);
            assert!(stat.recv_time.unwrap() >= stat.send_time);
            assert!(stat.rtt().unwrap() < Duration::from_millis(200));
            assert_eq!(stat.size, 64);
        }
        assert_eq!(pinger.pending_echoes(), 0);
        pinger.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn zero_count_sends_nothing() {
        let table = Arc::new(CorrelationTable::default());
        let channel = Arc::new(FakeChannel::new(Arc::clone(&table)));
        let pinger = spawn_pinger(Arc::clone(&channel), Arc::clone(&table));

        let stats = pinger.probe(DEST, 0).await.unwrap();
        assert!(stats.is_empty());
        assert!(channel.sent.lock().is_empty());
        pinger.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unresponsive_target_times_out_per_echo() {
        let table = Arc::new(CorrelationTable::default());
        let channel = Arc::new(FakeChannel::new(Arc::clone(&table)));
        let pinger = Pinger::start(
            Config {
                timeout: Duration::from_millis(50),
                ..config()
            },
            Arc::clone(&channel) as Arc<dyn EchoSender>,
            Arc::clone(&table),
        );

        let started = tokio::time::Instant::now();
        let stats = pinger.probe(DEST, 3).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(stats.len(), 3);
        assert!(stats.iter().all(|s| !s.received && s.recv_time.is_none()));
        // Waiters overlap the pacing sleeps: the request takes about
        // count * interval + timeout, not count * (interval + timeout).
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(120));
        assert_eq!(pinger.pending_echoes(), 0);
        pinger.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn late_reply_is_dropped() {
        let table = Arc::new(CorrelationTable::default());
        let mut channel = FakeChannel::new(Arc::clone(&table));
        // Replies arrive well after the 200ms timeout.
        channel.reply_after = Some(Duration::from_millis(300));
        let pinger = spawn_pinger(Arc::new(channel), Arc::clone(&table));

        let stats = pinger.probe(DEST, 1).await.unwrap();
        assert!(!stats[0].received);

        // Let the straggler land in an empty table, then reuse the same
        // sequence number: the old reply must not complete the new echo.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(pinger.pending_echoes(), 0);

        let stats = pinger.probe(DEST, 1).await.unwrap();
        assert!(!stats[0].received);
        pinger.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_probes_do_not_cross_deliver() {
        let table = Arc::new(CorrelationTable::default());
        let mut channel = FakeChannel::new(Arc::clone(&table));
        channel.reply_after = Some(Duration::from_millis(2));
        channel.deaf_dests = vec![OTHER];
        let pinger = spawn_pinger(Arc::new(channel), Arc::clone(&table));

        // Same sequence numbers in flight for both destinations.
        let (answered, silent) = tokio::join!(pinger.probe(DEST, 3), pinger.probe(OTHER, 3));
        let answered = answered.unwrap();
        let silent = silent.unwrap();

        assert!(answered.iter().all(|s| s.received));
        assert!(silent.iter().all(|s| !s.received));
        assert_eq!(pinger.pending_echoes(), 0);
        pinger.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn close_drains_the_pool() {
        let table = Arc::new(CorrelationTable::default());
        let mut channel = FakeChannel::new(Arc::clone(&table));
        channel.reply_after = Some(Duration::from_millis(2));
        let pinger = spawn_pinger(Arc::new(channel), Arc::clone(&table));

        let stats = pinger.probe(DEST, 2).await.unwrap();
        assert_eq!(stats.len(), 2);
        // All workers must exit once the queue closes.
        pinger.close().await;
    }

    #[tokio::test]
    #[ignore = "requires raw-socket privileges"]
    async fn loopback_round_trip() {
        let pinger = Pinger::new(config()).unwrap();
        let stats = pinger.probe(Ipv4Addr::LOCALHOST, 5).await.unwrap();
        assert_eq!(stats.len(), 5);
        assert!(stats.iter().all(|s| s.received));
        assert_eq!(pinger.pending_echoes(), 0);
        pinger.close().await;
    }
}
