/// Forwarding table: bidirectional mapping between a client's source
/// address and the upstream WireGuard endpoint its traffic is routed to.
///
/// One entry per active client source. Each entry owns an ephemeral
/// outbound socket and a background reader task that pushes upstream
/// replies back through the shared listen socket. The table itself is a
/// single `Mutex`-guarded map — simple and sufficient at proxy scale; a
/// busier deployment would shard by source-address hash instead.
use crate::obfuscate::Obfuscator;
use crate::packet::{Flags, Packet};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

/// A live client ↔ upstream route. `last_activity` is recorded as seconds
/// since `origin`, so it can live behind an atomic rather than a lock.
///
/// `reader` holds the handle of the background task reading `outbound`;
/// it must be aborted explicitly on eviction or shutdown. The task keeps
/// its own `Arc<ForwardEntry>` clone, so dropping the table's map entry
/// alone never drops the entry (and never closes `outbound`) — the
/// reader's `recv()` would block on it forever.
struct ForwardEntry {
    client_source: SocketAddr,
    upstream: SocketAddr,
    outbound: UdpSocket,
    last_activity_secs: AtomicU64,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl ForwardEntry {
    fn touch(&self, origin: Instant) {
        self.last_activity_secs
            .store(origin.elapsed().as_secs(), Ordering::Relaxed);
    }

    fn idle_for(&self, origin: Instant) -> Duration {
        let last = self.last_activity_secs.load(Ordering::Relaxed);
        origin
            .elapsed()
            .saturating_sub(Duration::from_secs(last))
    }

    fn cancel_reader(&self) {
        if let Some(handle) = self.reader.lock().unwrap().take() {
            handle.abort();
        }
    }
}

pub struct ForwardingTable {
    listen: Arc<UdpSocket>,
    obfuscator: Arc<Obfuscator>,
    timeout: Duration,
    origin: Instant,
    entries: Mutex<HashMap<SocketAddr, Arc<ForwardEntry>>>,
}

impl ForwardingTable {
    pub fn new(listen: Arc<UdpSocket>, obfuscator: Arc<Obfuscator>, timeout: Duration) -> Self {
        Self {
            listen,
            obfuscator,
            timeout,
            origin: Instant::now(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Forward `payload` (already deobfuscated, destined for `upstream`) on
    /// behalf of `src`, creating a fresh entry and reader task if this is
    /// the first datagram seen from `src`.
    pub async fn forward_client_to_upstream(
        self: &Arc<Self>,
        src: SocketAddr,
        upstream: SocketAddr,
        payload: &[u8],
    ) -> std::io::Result<()> {
        let entry = self.entry_for(src, upstream).await?;
        entry.touch(self.origin);
        entry.outbound.send_to(payload, upstream).await?;
        Ok(())
    }

    async fn entry_for(
        self: &Arc<Self>,
        src: SocketAddr,
        upstream: SocketAddr,
    ) -> std::io::Result<Arc<ForwardEntry>> {
        if let Some(entry) = self.entries.lock().unwrap().get(&src) {
            return Ok(entry.clone());
        }

        let outbound = UdpSocket::bind((std::net::Ipv4Addr::UNSPECIFIED, 0)).await?;
        let entry = Arc::new(ForwardEntry {
            client_source: src,
            upstream,
            outbound,
            last_activity_secs: AtomicU64::new(self.origin.elapsed().as_secs()),
            reader: Mutex::new(None),
        });

        // Re-check under the lock: another task may have raced us here.
        let mut entries = self.entries.lock().unwrap();
        if let Some(existing) = entries.get(&src) {
            return Ok(existing.clone());
        }
        entries.insert(src, entry.clone());
        drop(entries);

        let table = self.clone();
        let entry_for_task = entry.clone();
        let handle = tokio::spawn(async move {
            table.run_reader(entry_for_task).await;
        });
        *entry.reader.lock().unwrap() = Some(handle);

        Ok(entry)
    }

    /// Read datagrams arriving from `entry`'s upstream and forward them
    /// back to the client source on the shared listen socket, obfuscating
    /// if this table's obfuscator is enabled.
    async fn run_reader(self: Arc<Self>, entry: Arc<ForwardEntry>) {
        let mut buf = [0u8; crate::packet::MAX_MTU];
        loop {
            let n = match entry.outbound.recv(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!(
                        upstream = %entry.upstream,
                        client = %entry.client_source,
                        error = %e,
                        "outbound socket closed"
                    );
                    break;
                }
            };
            entry.touch(self.origin);

            let mut packet = Packet::new();
            packet.reset(n);
            packet.as_mut_slice().copy_from_slice(&buf[..n]);
            packet.set_flag(Flags::OBFUSCATE_BEFORE_SEND);
            self.obfuscator.obfuscate(&mut packet);

            if let Err(e) = self
                .listen
                .send_to(packet.as_slice(), entry.client_source)
                .await
            {
                tracing::debug!(client = %entry.client_source, error = %e, "listen socket write failed");
                break;
            }
        }
    }

    /// Evict entries idle for longer than `timeout`. Aborting the reader
    /// task is what actually closes the outbound socket: the task holds
    /// its own `Arc<ForwardEntry>` clone, so merely removing the map entry
    /// would leave the task parked in `recv()` forever with the socket
    /// still open.
    pub fn sweep(&self) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, entry| {
            let keep = entry.idle_for(self.origin) <= self.timeout;
            if !keep {
                entry.cancel_reader();
            }
            keep
        });
    }

    /// Cancel every entry's reader task and drop the table's map, used at
    /// server shutdown (§5: closing the listen socket cancels all per-entry
    /// reader tasks and closes their outbound sockets).
    pub fn shutdown(&self) {
        let mut entries = self.entries.lock().unwrap();
        for entry in entries.values() {
            entry.cancel_reader();
        }
        entries.clear();
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// The upstream a previously established entry for `src` routes to, if
    /// one exists. Non-Initiation frames reuse this instead of decrypting.
    pub fn existing_upstream(&self, src: SocketAddr) -> Option<SocketAddr> {
        self.entries.lock().unwrap().get(&src).map(|e| e.upstream)
    }
}
