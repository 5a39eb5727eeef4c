//! Longest-prefix-match routing table.
//!
//! Routes are bucketed by prefix length, one ordered map per length keyed
//! by the (already masked) network address. A bitmask records which
//! lengths hold at least one route, so a lookup visits only occupied
//! lengths, longest first, and stops at the first hit. Cost per lookup is
//! bounded by the number of distinct prefix lengths in use, not by the
//! number of routes.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::net::{Ipv4Addr, SocketAddrV4};

use crate::constants::MAX_PREFIX_LEN;
use crate::net::{prefix_mask, Ipv4Net, Route};

const BUCKETS: usize = MAX_PREFIX_LEN as usize + 1;

#[derive(Debug, Clone)]
pub struct RoutingTable {
    /// `buckets[len]` maps masked network address -> next hop.
    buckets: Vec<BTreeMap<u32, SocketAddrV4>>,
    /// Bit `len` set iff `buckets[len]` is non-empty.
    occupied: u64,
    len: usize,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingTable {
    pub fn new() -> Self {
        RoutingTable {
            buckets: (0..BUCKETS).map(|_| BTreeMap::new()).collect(),
            occupied: 0,
            len: 0,
        }
    }

    /// Install `route`, replacing any route for the same network.
    ///
    /// Returns the next hop that was replaced, if any.
    pub fn insert_or_replace(&mut self, route: Route) -> Option<SocketAddrV4> {
        let len = route.net.prefix_len();
        let key = u32::from(route.net.network());
        let previous = self.buckets[len as usize].insert(key, route.next_hop);
        if previous.is_none() {
            self.len += 1;
            self.occupied |= 1u64 << len;
        }
        previous
    }

    /// Remove the route for exactly `net`. Absent networks are a no-op.
    pub fn remove(&mut self, net: &Ipv4Net) -> Option<SocketAddrV4> {
        let len = net.prefix_len();
        let bucket = &mut self.buckets[len as usize];
        let removed = bucket.remove(&u32::from(net.network()));
        if removed.is_some() {
            self.len -= 1;
            if bucket.is_empty() {
                self.occupied &= !(1u64 << len);
            }
        }
        removed
    }

    /// Next hop of the longest prefix containing `addr`.
    #[inline]
    pub fn lookup(&self, addr: Ipv4Addr) -> Option<SocketAddrV4> {
        self.lookup_route(addr).map(|r| r.next_hop)
    }

    /// The longest-prefix route containing `addr`.
    pub fn lookup_route(&self, addr: Ipv4Addr) -> Option<Route> {
        let addr = u32::from(addr);
        let mut lens = self.occupied;
        while lens != 0 {
            let len = (63 - lens.leading_zeros()) as u8;
            let key = addr & prefix_mask(len);
            if let Some(hop) = self.buckets[len as usize].get(&key) {
                return Some(Route::new(self.net_at(key, len), *hop));
            }
            lens &= !(1u64 << len);
        }
        None
    }

    /// Next hop installed for exactly `net`.
    pub fn get(&self, net: &Ipv4Net) -> Option<SocketAddrV4> {
        self.buckets[net.prefix_len() as usize]
            .get(&u32::from(net.network()))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        self.occupied = 0;
        self.len = 0;
    }

    /// All routes, most specific first; equal lengths by network address.
    pub fn iter(&self) -> impl Iterator<Item = Route> + '_ {
        self.buckets
            .iter()
            .enumerate()
            .rev()
            .flat_map(move |(len, bucket)| {
                bucket
                    .iter()
                    .map(move |(&key, &hop)| Route::new(self.net_at(key, len as u8), hop))
            })
    }

    fn net_at(&self, key: u32, len: u8) -> Ipv4Net {
        // Keys are stored pre-masked and `len` indexes a valid bucket.
        Ipv4Net::new(Ipv4Addr::from(key), len).unwrap_or_else(|_| Ipv4Net::default_route())
    }
}
