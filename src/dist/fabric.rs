//! Point-to-point fabric: ranks, tags, and duplicated channels.
//!
//! This is the transport surface the distributed executors are written
//! against: blocking tagged sends and receives between numbered peers, a
//! reusable barrier, and channel duplication so background traffic (steal
//! requests, reduction payloads) never cross-talks with the main channel's
//! collectives.
//!
//! The implementation is in-process: [`Fabric::new`] builds one mailbox
//! router and hands out an [`Endpoint`] per peer; peers run as threads and
//! exchange owned byte vectors. Executors hold endpoints, not the fabric,
//! so the transport can be swapped without touching them.
//!
//! Delivery model, chosen to match what the executors assume of a
//! message-passing runtime:
//! - `send` is buffered and never blocks.
//! - `recv` blocks; messages from one sender on one `(channel, tag)` arrive
//!   in send order.
//! - `recv_from` filters by source; messages from other sources are stashed,
//!   not dropped, and remain available to later receives.

use crossbeam_channel::{unbounded, Receiver, Sender};
use crossbeam_utils::CachePadded;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Barrier, Mutex};

/// Peer index in `0..size`.
pub type Rank = usize;

/// Message tag; distinct protocol streams use distinct tags.
pub type Tag = u16;

type Packet = (Rank, Vec<u8>);

struct Mailbox {
    tx: Sender<Packet>,
    rx: Receiver<Packet>,
    /// Packets popped while waiting for a specific source.
    stash: Mutex<VecDeque<Packet>>,
}

impl Mailbox {
    fn new() -> Arc<Self> {
        let (tx, rx) = unbounded();
        Arc::new(Self {
            tx,
            rx,
            stash: Mutex::new(VecDeque::new()),
        })
    }

    fn recv_any(&self) -> Packet {
        if let Some(pkt) = self.stash.lock().expect("mailbox stash poisoned").pop_front() {
            return pkt;
        }
        self.rx.recv().expect("fabric torn down during recv")
    }

    fn recv_from(&self, src: Rank) -> Vec<u8> {
        {
            let mut stash = self.stash.lock().expect("mailbox stash poisoned");
            if let Some(pos) = stash.iter().position(|(s, _)| *s == src) {
                return stash.remove(pos).expect("position vanished").1;
            }
        }
        loop {
            let pkt = self.rx.recv().expect("fabric torn down during recv");
            if pkt.0 == src {
                return pkt.1;
            }
            self.stash
                .lock()
                .expect("mailbox stash poisoned")
                .push_back(pkt);
        }
    }
}

/// One peer's set of mailboxes, keyed by `(channel, tag)`.
#[derive(Default)]
struct PeerBoxes {
    map: Mutex<HashMap<(u32, Tag), Arc<Mailbox>>>,
}

impl PeerBoxes {
    fn get(&self, chan: u32, tag: Tag) -> Arc<Mailbox> {
        let mut map = self.map.lock().expect("mailbox map poisoned");
        Arc::clone(map.entry((chan, tag)).or_insert_with(Mailbox::new))
    }
}

struct Router {
    peers: Vec<CachePadded<PeerBoxes>>,
    barrier: Barrier,
}

/// Builder for an in-process peer group.
pub struct Fabric;

impl Fabric {
    /// Creates `n` connected endpoints, one per peer rank, all on the world
    /// channel. Move each into its peer's thread.
    pub fn new(n: usize) -> Vec<Endpoint> {
        assert!(n > 0, "fabric needs at least one peer");
        let router = Arc::new(Router {
            peers: (0..n).map(|_| CachePadded::new(PeerBoxes::default())).collect(),
            barrier: Barrier::new(n),
        });
        (0..n)
            .map(|rank| Endpoint {
                rank,
                size: n,
                chan: 0,
                dups: 0,
                router: Arc::clone(&router),
            })
            .collect()
    }
}

/// One peer's handle onto one channel of the fabric.
///
/// Cloning shares the channel (both clones see the same mailboxes); hand a
/// clone of the background endpoint to the listener thread. [`Endpoint::dup`]
/// instead opens a fresh channel with disjoint mailboxes.
pub struct Endpoint {
    rank: Rank,
    size: usize,
    chan: u32,
    dups: u32,
    router: Arc<Router>,
}

impl Clone for Endpoint {
    fn clone(&self) -> Self {
        Self {
            rank: self.rank,
            size: self.size,
            chan: self.chan,
            dups: 0,
            router: Arc::clone(&self.router),
        }
    }
}

impl Endpoint {
    /// This peer's rank.
    #[inline]
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Number of peers.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Opens a duplicated channel.
    ///
    /// Collective in spirit: every peer must dup the same parent channel the
    /// same number of times, in the same order, so corresponding endpoints
    /// land on the same channel id.
    pub fn dup(&mut self) -> Endpoint {
        self.dups += 1;
        Endpoint {
            rank: self.rank,
            size: self.size,
            chan: self.chan * 8 + self.dups,
            dups: 0,
            router: Arc::clone(&self.router),
        }
    }

    /// Sends `data` to `dst` under `tag`. Buffered; never blocks.
    pub fn send(&self, dst: Rank, tag: Tag, data: Vec<u8>) {
        debug_assert!(dst < self.size, "destination rank out of range");
        let mailbox = self.router.peers[dst].get(self.chan, tag);
        // A receiver that already exited drops its mailbox reads; losing the
        // packet is equivalent to the peer never reading it.
        let _ = mailbox.tx.send((self.rank, data));
    }

    /// Blocks for the next message under `tag` from any source.
    pub fn recv(&self, tag: Tag) -> (Rank, Vec<u8>) {
        self.router.peers[self.rank].get(self.chan, tag).recv_any()
    }

    /// Blocks for the next message under `tag` from `src` specifically.
    pub fn recv_from(&self, src: Rank, tag: Tag) -> Vec<u8> {
        self.router.peers[self.rank].get(self.chan, tag).recv_from(src)
    }

    /// Reusable all-peers barrier (shared across channels).
    pub fn barrier(&self) {
        self.router.barrier.wait();
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .field("chan", &self.chan)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn send_recv_roundtrip() {
        let mut eps = Fabric::new(2);
        let b = eps.pop().unwrap();
        let a = eps.pop().unwrap();

        a.send(1, 7, vec![1, 2, 3]);
        let (src, data) = b.recv(7);
        assert_eq!(src, 0);
        assert_eq!(data, vec![1, 2, 3]);
    }

    #[test]
    fn tags_are_independent_streams() {
        let mut eps = Fabric::new(2);
        let b = eps.pop().unwrap();
        let a = eps.pop().unwrap();

        a.send(1, 1, vec![1]);
        a.send(1, 2, vec![2]);

        // Tag 2 first: must not see tag 1's packet.
        assert_eq!(b.recv(2).1, vec![2]);
        assert_eq!(b.recv(1).1, vec![1]);
    }

    #[test]
    fn recv_from_stashes_other_sources() {
        let mut eps = Fabric::new(3);
        let c = eps.pop().unwrap();
        let b = eps.pop().unwrap();
        let a = eps.pop().unwrap();

        a.send(2, 5, vec![10]);
        b.send(2, 5, vec![20]);

        // Ask for rank 1 first even though rank 0's packet may be ahead.
        assert_eq!(c.recv_from(1, 5), vec![20]);
        // Rank 0's packet is still there.
        assert_eq!(c.recv_from(0, 5), vec![10]);
    }

    #[test]
    fn fifo_per_sender_and_tag() {
        let mut eps = Fabric::new(2);
        let b = eps.pop().unwrap();
        let a = eps.pop().unwrap();

        for i in 0..10u8 {
            a.send(1, 3, vec![i]);
        }
        for i in 0..10u8 {
            assert_eq!(b.recv(3).1, vec![i]);
        }
    }

    #[test]
    fn duplicated_channel_is_isolated() {
        let mut eps = Fabric::new(2);
        let mut b = eps.pop().unwrap();
        let mut a = eps.pop().unwrap();
        let a_bg = a.dup();
        let b_bg = b.dup();

        a.send(1, 9, vec![1]);
        a_bg.send(1, 9, vec![2]);

        assert_eq!(b_bg.recv(9).1, vec![2]);
        assert_eq!(b.recv(9).1, vec![1]);
    }

    #[test]
    fn clone_shares_the_channel() {
        let mut eps = Fabric::new(2);
        let b = eps.pop().unwrap();
        let a = eps.pop().unwrap();
        let b2 = b.clone();

        a.send(1, 4, vec![42]);
        assert_eq!(b2.recv(4).1, vec![42]);
    }

    #[test]
    fn barrier_synchronizes_all_peers() {
        let eps = Fabric::new(4);
        let flag = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        thread::scope(|s| {
            for ep in eps {
                let flag = Arc::clone(&flag);
                s.spawn(move || {
                    flag.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    ep.barrier();
                    // Everyone incremented before anyone passed.
                    assert_eq!(flag.load(std::sync::atomic::Ordering::SeqCst), 4);
                });
            }
        });
    }

    #[test]
    fn cross_thread_recv_blocks_until_send() {
        let mut eps = Fabric::new(2);
        let b = eps.pop().unwrap();
        let a = eps.pop().unwrap();

        let handle = thread::spawn(move || b.recv(11));
        thread::sleep(std::time::Duration::from_millis(20));
        a.send(1, 11, vec![99]);
        let (src, data) = handle.join().unwrap();
        assert_eq!((src, data), (0, vec![99]));
    }
}
