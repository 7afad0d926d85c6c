//! Worker connection pool
//!
//! Workers connect on the master's worker port and are parked here until a
//! distributed job reserves them. A handle is in exactly one place at a time:
//!
//! - **available**: queued inside the pool
//! - **reserved**: owned by a job (the pool only counts it)
//! - **dead**: dropped, which closes the socket
//!
//! All bookkeeping sits behind one `parking_lot` mutex. The lock is never held
//! across an `.await`; liveness checks are single non-blocking peeks.
//!
//! Every change publishes a [`PoolSnapshot`] on a `watch` channel. Delivery is
//! best effort and coalescing: a slow subscriber only sees the latest state.

use crate::error::PoolError;
use crate::protocol::{read_frame, write_frame, Command, Frame, FrameError, PoolState};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// One connected worker
#[derive(Debug)]
pub struct WorkerHandle {
    stream: TcpStream,
    addr: SocketAddr,
    /// Cleared when a failed exchange may have left unread bytes on the socket
    in_sync: bool,
}

impl WorkerHandle {
    pub fn new(stream: TcpStream, addr: SocketAddr) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%addr, error = %e, "failed to set TCP_NODELAY");
        }
        Self { stream, addr, in_sync: true }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn label(&self) -> String {
        self.addr.to_string()
    }

    pub async fn send(&mut self, command: Command, payload: &[u8]) -> Result<(), FrameError> {
        write_frame(&mut self.stream, command.code(), payload).await
    }

    pub async fn receive(&mut self) -> Result<Frame, FrameError> {
        read_frame(&mut self.stream).await
    }

    /// Probe an idle socket without blocking
    ///
    /// A pending peek means the peer is idle but connected. A zero-byte peek
    /// means the peer closed its side. Workers only speak when asked, so bytes
    /// waiting on an idle handle mean the stream can no longer be trusted.
    pub fn is_alive(&self) -> bool {
        let mut buf = [0u8; 1];
        match self.stream.peek(&mut buf).now_or_never() {
            None => true,
            Some(Ok(0)) => false,
            Some(Ok(_)) => {
                debug!(worker = %self.addr, "unsolicited bytes on idle worker");
                false
            }
            Some(Err(_)) => false,
        }
    }

    /// Mark the stream as unusable for further request/reply exchanges
    pub fn mark_out_of_sync(&mut self) {
        self.in_sync = false;
    }

    pub fn is_in_sync(&self) -> bool {
        self.in_sync
    }
}

/// Pool occupancy at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolSnapshot {
    pub available: usize,
    /// Available plus reserved
    pub total: usize,
}

impl From<PoolSnapshot> for PoolState {
    fn from(s: PoolSnapshot) -> Self {
        PoolState {
            available: s.available as i32,
            total: s.total as i32,
        }
    }
}

#[derive(Debug, Default)]
struct Slots {
    available: VecDeque<WorkerHandle>,
    reserved: usize,
}

impl Slots {
    fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            available: self.available.len(),
            total: self.available.len() + self.reserved,
        }
    }

    /// Drop handles whose peer has gone away, returning how many were removed
    fn prune(&mut self) -> usize {
        let before = self.available.len();
        self.available.retain(|h| {
            let alive = h.is_alive();
            if !alive {
                info!(worker = %h.addr, "worker disconnected, removing from pool");
            }
            alive
        });
        before - self.available.len()
    }
}

struct PoolInner {
    slots: Mutex<Slots>,
    poll_interval: Duration,
    events: watch::Sender<PoolSnapshot>,
}

/// Shared worker pool; clones refer to the same pool
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool").field("state", &self.snapshot()).finish()
    }
}

impl WorkerPool {
    /// Create an empty pool that polls every `poll_interval` while waiting
    pub fn new(poll_interval: Duration) -> Self {
        let (events, _) = watch::channel(PoolSnapshot::default());
        Self {
            inner: Arc::new(PoolInner {
                slots: Mutex::new(Slots::default()),
                poll_interval,
                events,
            }),
        }
    }

    fn publish(&self, snapshot: PoolSnapshot) {
        self.inner.events.send_replace(snapshot);
    }

    /// Subscribe to pool state changes
    pub fn subscribe(&self) -> watch::Receiver<PoolSnapshot> {
        self.inner.events.subscribe()
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        self.inner.slots.lock().snapshot()
    }

    pub fn available_count(&self) -> usize {
        self.inner.slots.lock().available.len()
    }

    pub fn total_count(&self) -> usize {
        self.snapshot().total
    }

    /// Park a freshly connected worker
    pub fn add(&self, handle: WorkerHandle) {
        let snapshot = {
            let mut slots = self.inner.slots.lock();
            slots.available.push_back(handle);
            slots.snapshot()
        };
        self.publish(snapshot);
    }

    /// Reserve exactly `count` live workers, waiting up to `timeout`
    ///
    /// Either all `count` handles are handed out at once or none are; on
    /// timeout the pool is left as it was (apart from pruning dead handles).
    pub async fn reserve_exact(
        &self,
        count: usize,
        timeout: Duration,
    ) -> Result<Vec<WorkerHandle>, PoolError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            let (taken, pruned, snapshot) = {
                let mut slots = self.inner.slots.lock();
                let pruned = slots.prune();
                let taken = if slots.available.len() >= count {
                    let taken: Vec<WorkerHandle> = slots.available.drain(..count).collect();
                    slots.reserved += count;
                    Some(taken)
                } else {
                    None
                };
                (taken, pruned, slots.snapshot())
            };

            if let Some(taken) = taken {
                self.publish(snapshot);
                debug!(count, "reserved workers");
                return Ok(taken);
            }
            if pruned > 0 {
                self.publish(snapshot);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(PoolError::Timeout {
                    requested: count,
                    available: snapshot.available,
                    waited: now - started,
                });
            }
            tokio::time::sleep(self.inner.poll_interval.min(deadline - now)).await;
        }
    }

    /// Reserve every live available worker (possibly none)
    pub fn reserve_all_available(&self) -> Vec<WorkerHandle> {
        let (taken, snapshot) = {
            let mut slots = self.inner.slots.lock();
            slots.prune();
            let taken: Vec<WorkerHandle> = slots.available.drain(..).collect();
            slots.reserved += taken.len();
            (taken, slots.snapshot())
        };
        self.publish(snapshot);
        taken
    }

    /// Hand reserved workers back
    ///
    /// Closed or out-of-sync handles are dropped instead of re-queued.
    pub fn return_workers(&self, handles: Vec<WorkerHandle>) {
        let snapshot = {
            let mut slots = self.inner.slots.lock();
            slots.reserved = slots.reserved.saturating_sub(handles.len());
            for handle in handles {
                if handle.is_in_sync() && handle.is_alive() {
                    slots.available.push_back(handle);
                } else {
                    info!(worker = %handle.addr, "dropping worker on return");
                }
            }
            slots.snapshot()
        };
        self.publish(snapshot);
    }

    /// Remove dead available workers now
    pub fn prune_dead(&self) -> usize {
        let (pruned, snapshot) = {
            let mut slots = self.inner.slots.lock();
            let pruned = slots.prune();
            (pruned, slots.snapshot())
        };
        if pruned > 0 {
            self.publish(snapshot);
        }
        pruned
    }

    /// Prune dead workers every `interval` until `shutdown` fires
    pub fn spawn_liveness_sweep(&self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let pruned = pool.prune_dead();
                        if pruned > 0 {
                            debug!(pruned, "liveness sweep removed workers");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tokio::net::TcpListener;

    /// Loopback connection: the master-side handle plus the worker-side stream
    pub(crate) async fn connected_pair() -> (WorkerHandle, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (server, peer) = accepted.unwrap();
        (WorkerHandle::new(server, peer), client.unwrap())
    }

    /// Add `count` workers running the real worker loop
    pub(crate) async fn spawn_workers(pool: &WorkerPool, count: usize) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::with_capacity(count);
        for _ in 0..count {
            let (handle, mut stream) = connected_pair().await;
            pool.add(handle);
            tasks.push(tokio::spawn(async move {
                let _ = crate::worker::serve(&mut stream).await;
            }));
        }
        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    fn pool() -> WorkerPool {
        WorkerPool::new(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_add_and_counts() {
        let pool = pool();
        let (a, _ka) = connected_pair().await;
        let (b, _kb) = connected_pair().await;
        pool.add(a);
        pool.add(b);
        assert_eq!(pool.snapshot(), PoolSnapshot { available: 2, total: 2 });

        let reserved = pool.reserve_exact(1, Duration::from_millis(100)).await.unwrap();
        assert_eq!(reserved.len(), 1);
        assert_eq!(pool.snapshot(), PoolSnapshot { available: 1, total: 2 });

        pool.return_workers(reserved);
        assert_eq!(pool.snapshot(), PoolSnapshot { available: 2, total: 2 });
    }

    #[tokio::test]
    async fn test_reserve_exact_timeout_leaves_pool_unchanged() {
        let pool = pool();
        let (a, _keep) = connected_pair().await;
        pool.add(a);

        let err = pool.reserve_exact(3, Duration::from_millis(100)).await.unwrap_err();
        match err {
            PoolError::Timeout { requested, available, .. } => {
                assert_eq!(requested, 3);
                assert_eq!(available, 1);
            }
        }
        assert_eq!(pool.snapshot(), PoolSnapshot { available: 1, total: 1 });
    }

    #[tokio::test]
    async fn test_reserve_exact_waits_for_arrivals() {
        let pool = pool();
        let (a, _ka) = connected_pair().await;
        pool.add(a);

        let late = pool.clone();
        let adder = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            let (b, kb) = connected_pair().await;
            late.add(b);
            kb
        });

        let reserved = pool.reserve_exact(2, Duration::from_secs(5)).await.unwrap();
        assert_eq!(reserved.len(), 2);
        assert_eq!(pool.snapshot(), PoolSnapshot { available: 0, total: 2 });
        let _kb = adder.await.unwrap();
    }

    #[tokio::test]
    async fn test_reserve_exact_skips_dead_workers() {
        let pool = pool();
        let (a, ka) = connected_pair().await;
        let (b, _kb) = connected_pair().await;
        pool.add(a);
        pool.add(b);
        drop(ka);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(pool.reserve_exact(2, Duration::from_millis(60)).await.is_err());
        let reserved = pool.reserve_exact(1, Duration::from_millis(60)).await.unwrap();
        assert!(reserved[0].is_alive());
    }

    #[tokio::test]
    async fn test_reserve_all_available() {
        let pool = pool();
        assert!(pool.reserve_all_available().is_empty());

        let (a, _ka) = connected_pair().await;
        let (b, _kb) = connected_pair().await;
        pool.add(a);
        pool.add(b);
        let all = pool.reserve_all_available();
        assert_eq!(all.len(), 2);
        assert_eq!(pool.snapshot(), PoolSnapshot { available: 0, total: 2 });
    }

    #[tokio::test]
    async fn test_return_drops_dead_and_out_of_sync() {
        let pool = pool();
        let (a, ka) = connected_pair().await;
        let (b, _kb) = connected_pair().await;
        let (c, _kc) = connected_pair().await;
        pool.add(a);
        pool.add(b);
        pool.add(c);

        let mut reserved = pool.reserve_all_available();
        drop(ka);
        tokio::time::sleep(Duration::from_millis(50)).await;
        reserved[1].mark_out_of_sync();

        pool.return_workers(reserved);
        assert_eq!(pool.snapshot(), PoolSnapshot { available: 1, total: 1 });
    }

    #[tokio::test]
    async fn test_liveness_sweep_removes_closed_worker() {
        let pool = pool();
        let (a, ka) = connected_pair().await;
        let (b, _kb) = connected_pair().await;
        pool.add(a);
        pool.add(b);

        let shutdown = CancellationToken::new();
        let sweep = pool.spawn_liveness_sweep(Duration::from_millis(50), shutdown.clone());

        drop(ka);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(pool.available_count(), 1);

        shutdown.cancel();
        sweep.await.unwrap();
    }

    #[tokio::test]
    async fn test_prune_drops_worker_with_unread_bytes() {
        use tokio::io::AsyncWriteExt;

        let pool = pool();
        let (a, mut ka) = connected_pair().await;
        let (b, mut kb) = connected_pair().await;
        let (c, _kc) = connected_pair().await;
        pool.add(a);
        pool.add(b);
        pool.add(c);

        // One peer leaves a stray reply and hangs up, the other stays connected
        ka.write_all(&[Command::TaskAccepted.code(), 0, 0, 0, 0]).await.unwrap();
        drop(ka);
        kb.write_all(&[0x42]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(pool.prune_dead(), 2);
        assert_eq!(pool.snapshot(), PoolSnapshot { available: 1, total: 1 });
    }

    #[tokio::test]
    async fn test_state_notifications() {
        let pool = pool();
        let mut rx = pool.subscribe();
        let (a, _ka) = connected_pair().await;
        pool.add(a);

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), PoolSnapshot { available: 1, total: 1 });

        let reserved = pool.reserve_all_available();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), PoolSnapshot { available: 0, total: 1 });

        pool.return_workers(reserved);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), PoolSnapshot { available: 1, total: 1 });
    }

    #[tokio::test]
    async fn test_handle_frames() {
        let (mut handle, mut peer) = connected_pair().await;
        handle.send(Command::Reset, &[]).await.unwrap();
        let frame = read_frame(&mut peer).await.unwrap();
        assert_eq!(frame, Frame::empty(Command::Reset.code()));

        write_frame(&mut peer, Command::TaskAccepted.code(), &[]).await.unwrap();
        assert_eq!(handle.receive().await.unwrap().command, Command::TaskAccepted.code());
    }
}
