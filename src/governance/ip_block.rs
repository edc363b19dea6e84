//! Blocked client addresses (`blockIP` category).

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};

use crate::governance::error::PolicyError;
use crate::governance::RowOutcome;

/// Immutable membership structure built from one block list.
///
/// Exact addresses sit in a hash set. Networks are bucketed by prefix length,
/// so a lookup truncates the address once per distinct prefix length and
/// checks a hash set: the cost depends on how many prefix lengths are in
/// use, not on how many networks are listed.
#[derive(Debug, Default)]
pub struct BlockList {
    entries: Vec<String>,
    addrs: HashSet<IpAddr>,
    v4_nets: Vec<(u8, HashSet<Ipv4Net>)>,
    v6_nets: Vec<(u8, HashSet<Ipv6Net>)>,
}

impl BlockList {
    /// Build from IP/CIDR strings. Entries that do not parse are reported
    /// by their position in `items` and left out.
    pub fn build<'a>(items: impl IntoIterator<Item = &'a str>) -> (Self, RowOutcome) {
        let mut list = BlockList::default();
        let mut outcome = RowOutcome::default();

        for (index, item) in items.into_iter().enumerate() {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            if let Ok(addr) = item.parse::<IpAddr>() {
                list.addrs.insert(addr.to_canonical());
            } else if let Ok(net) = item.parse::<IpNet>() {
                match net.trunc() {
                    IpNet::V4(net) => insert_net(&mut list.v4_nets, net.prefix_len(), net),
                    IpNet::V6(net) => insert_net(&mut list.v6_nets, net.prefix_len(), net),
                }
            } else {
                outcome.rejected.push((index, PolicyError::InvalidAddress(item.to_string())));
                continue;
            }
            list.entries.push(item.to_string());
            outcome.applied += 1;
        }
        (list, outcome)
    }

    pub fn contains_addr(&self, addr: IpAddr) -> bool {
        let addr = addr.to_canonical();
        if self.addrs.contains(&addr) {
            return true;
        }
        match addr {
            IpAddr::V4(v4) => self.v4_nets.iter().any(|(len, nets)| {
                Ipv4Net::new(v4, *len).is_ok_and(|n| nets.contains(&n.trunc()))
            }),
            IpAddr::V6(v6) => self.v6_nets.iter().any(|(len, nets)| {
                Ipv6Net::new(v6, *len).is_ok_and(|n| nets.contains(&n.trunc()))
            }),
        }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn insert_net<N: std::hash::Hash + Eq>(buckets: &mut Vec<(u8, HashSet<N>)>, len: u8, net: N) {
    match buckets.iter_mut().find(|(l, _)| *l == len) {
        Some((_, nets)) => {
            nets.insert(net);
        }
        None => {
            buckets.push((len, HashSet::from([net])));
            buckets.sort_by(|a, b| b.0.cmp(&a.0));
        }
    }
}

/// Published block list, swapped as a unit.
#[derive(Debug, Default)]
pub struct IpBlockSet {
    current: ArcSwap<BlockList>,
}

impl IpBlockSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from scratch and publish. Unparseable entries are skipped.
    pub fn replace<'a>(&self, items: impl IntoIterator<Item = &'a str>) -> RowOutcome {
        let (list, outcome) = BlockList::build(items);
        self.current.store(Arc::new(list));
        outcome
    }

    /// Membership test for a textual address; unparseable input is never blocked.
    pub fn contains(&self, ip: &str) -> bool {
        match ip.trim().parse::<IpAddr>() {
            Ok(addr) => self.contains_addr(addr),
            Err(_) => false,
        }
    }

    pub fn contains_addr(&self, addr: IpAddr) -> bool {
        let list = self.current.load();
        !list.is_empty() && list.contains_addr(addr)
    }

    pub fn entries(&self) -> Vec<String> {
        self.current.load().entries().to_vec()
    }

    pub fn len(&self) -> usize {
        self.current.load().entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
