use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::warn;

use crate::channel::EchoSender;
use crate::table::{CorrelationTable, EchoKey};

/// Outcome of a single echo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// When the echo request was written to the socket.
    pub send_time: Instant,
    /// When the reply came in, if one did.
    pub recv_time: Option<Instant>,
    /// Whether a reply arrived before the timeout.
    pub received: bool,
    /// Payload size of the reply, in bytes. Zero for lost echoes.
    pub size: usize,
}

impl Stat {
    fn lost(send_time: Instant) -> Self {
        Self {
            send_time,
            recv_time: None,
            received: false,
            size: 0,
        }
    }

    /// Round-trip time, when the echo was answered.
    pub fn rtt(&self) -> Option<Duration> {
        self.recv_time.map(|recv| recv.duration_since(self.send_time))
    }
}

/// Runs one probe request from first echo to last outcome.
pub(crate) struct ProbeExecutor {
    pub(crate) channel: Arc<dyn EchoSender>,
    pub(crate) table: Arc<CorrelationTable>,
    pub(crate) timeout: Duration,
    pub(crate) interval: Duration,
}

impl ProbeExecutor {
    /// Emits `count` echoes to `dest`, one per interval, and returns one
    /// outcome per sequence number, indexed by sequence number.
    ///
    /// Each echo gets its own waiter task racing the reply slot against
    /// the timeout, so reply collection overlaps the pacing sleep instead
    /// of serializing behind it. A send failure costs only that sequence
    /// number; later echoes still go out.
    pub(crate) async fn run(&self, dest: Ipv4Addr, count: u16) -> Vec<Stat> {
        let mut stats: Vec<Option<Stat>> = vec![None; usize::from(count)];
        let mut waiters: JoinSet<(u16, Stat)> = JoinSet::new();

        for seq in 0..count {
            // Register before the request hits the wire so a sub-interval
            // reply cannot beat the table entry.
            let key = EchoKey { dest, seq };
            let slot = match self.table.register(key) {
                Ok(slot) => slot,
                Err(e) => {
                    warn!(dest = %dest, seq, error = %e, "echo registration failed");
                    stats[usize::from(seq)] = Some(Stat::lost(Instant::now()));
                    continue;
                }
            };
            let send_time = Instant::now();
            match self.channel.send_echo(dest, seq) {
                Ok(_) => {
                    let table = Arc::clone(&self.table);
                    let timeout = self.timeout;
                    waiters.spawn(async move {
                        let stat = match tokio::time::timeout(timeout, slot).await {
                            Ok(Ok(reply)) => Stat {
                                send_time,
                                recv_time: Some(reply.at),
                                received: true,
                                size: reply.size,
                            },
                            // Timed out, or the slot vanished underneath
                            // us: either way the echo is lost.
                            Ok(Err(_)) | Err(_) => Stat::lost(send_time),
                        };
                        table.remove(&key);
                        (seq, stat)
                    });
                }
                Err(e) => {
                    self.table.remove(&key);
                    warn!(dest = %dest, seq, error = %e, "echo send failed");
                    stats[usize::from(seq)] = Some(Stat::lost(send_time));
                }
            }
            tokio::time::sleep(self.interval).await;
        }

        while let Some(joined) = waiters.join_next().await {
            if let Ok((seq, stat)) = joined {
                stats[usize::from(seq)] = Some(stat);
            }
        }
        stats.into_iter().flatten().collect()
    }
}
