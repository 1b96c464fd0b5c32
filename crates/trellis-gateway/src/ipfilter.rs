//! IP allow/block filtering with CIDR support.
//!
//! An [`IpFilter`] classifies a client address against two CIDR lists; an
//! [`IpFilterChain`] is an ordered conjunction of filters inherited from
//! enclosing configuration levels (server, rule, path).

use std::net::IpAddr;
use std::sync::Arc;

use ipnet::IpNet;
use tracing::warn;

use crate::config::IpFilterConfig;

/// Compiled allow/block classifier.
///
/// Decision: a block-list hit denies; a non-empty allow-list without a hit
/// denies; everything else is allowed. An absent filter is allow-all, which
/// callers express by holding `None` and going through [`allow_ip`].
#[derive(Debug)]
pub struct IpFilter {
    allow: Vec<IpNet>,
    block: Vec<IpNet>,
}

impl IpFilter {
    pub fn new(config: &IpFilterConfig) -> Self {
        Self {
            allow: parse_nets(&config.allow_ips),
            block: parse_nets(&config.block_ips),
        }
    }

    /// `None` means the client IP could not be determined; it never hits the
    /// block-list but fails a non-empty allow-list.
    pub fn allow(&self, ip: Option<IpAddr>) -> bool {
        if let Some(ip) = ip {
            if self.block.iter().any(|net| net.contains(&ip)) {
                return false;
            }
            if !self.allow.is_empty() && !self.allow.iter().any(|net| net.contains(&ip)) {
                return false;
            }
            true
        } else {
            self.allow.is_empty()
        }
    }
}

/// Entries that fail to parse are logged and skipped so a reload stays total.
fn parse_nets(entries: &[String]) -> Vec<IpNet> {
    entries
        .iter()
        .filter_map(|entry| {
            entry
                .parse::<IpNet>()
                .or_else(|_| entry.parse::<IpAddr>().map(IpNet::from))
                .map_err(|err| {
                    warn!("invalid CIDR or IP address {:?} in ip filter: {}", entry, err);
                })
                .ok()
        })
        .collect()
}

/// Ordered conjunction of filters; a request passes only if every filter
/// allows it.
#[derive(Debug, Default)]
pub struct IpFilterChain {
    filters: Vec<Arc<IpFilter>>,
}

impl IpFilterChain {
    pub fn allow(&self, ip: Option<IpAddr>) -> bool {
        self.filters.iter().all(|f| f.allow(ip))
    }

    pub fn filters(&self) -> &[Arc<IpFilter>] {
        &self.filters
    }
}

pub fn new_ip_filter(config: Option<&IpFilterConfig>) -> Option<Arc<IpFilter>> {
    config.map(|c| Arc::new(IpFilter::new(c)))
}

/// Build `parent ⧺ child`. Returns `None` when the concatenation is empty so
/// callers can skip evaluation with a cheap check.
pub fn new_ip_filter_chain(
    parent: Option<&IpFilterChain>,
    child: Option<&Arc<IpFilter>>,
) -> Option<Arc<IpFilterChain>> {
    let mut filters: Vec<Arc<IpFilter>> = parent.map(|p| p.filters.clone()).unwrap_or_default();
    if let Some(child) = child {
        filters.push(Arc::clone(child));
    }
    if filters.is_empty() {
        None
    } else {
        Some(Arc::new(IpFilterChain { filters }))
    }
}

/// An absent filter allows everything.
pub fn allow_ip(filter: Option<&IpFilter>, ip: Option<IpAddr>) -> bool {
    filter.map(|f| f.allow(ip)).unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(allow: &[&str], block: &[&str]) -> IpFilterConfig {
        IpFilterConfig {
            allow_ips: allow.iter().map(|s| s.to_string()).collect(),
            block_ips: block.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn ip(s: &str) -> Option<IpAddr> {
        Some(s.parse().unwrap())
    }

    #[test]
    fn test_absent_filter_allows_all() {
        assert!(allow_ip(None, ip("192.168.1.1")));
        assert!(allow_ip(None, None));
    }

    #[test]
    fn test_allow_and_block_lists() {
        let filter = IpFilter::new(&config(&["192.168.1.0/24"], &["192.168.2.0/24"]));
        assert!(filter.allow(ip("192.168.1.1")));
        assert!(!filter.allow(ip("192.168.2.1")));
        // Neither list contains it but the allow-list is non-empty.
        assert!(!filter.allow(ip("10.0.1.2")));
    }

    #[test]
    fn test_block_only() {
        let filter = IpFilter::new(&config(&[], &["192.168.1.0/24"]));
        assert!(!filter.allow(ip("192.168.1.100")));
        assert!(filter.allow(ip("192.168.2.100")));
        assert!(filter.allow(ip("10.0.0.1")));
    }

    #[test]
    fn test_block_wins_over_allow() {
        let filter = IpFilter::new(&config(&["10.0.0.0/8"], &["10.0.0.1"]));
        assert!(!filter.allow(ip("10.0.0.1")));
        assert!(filter.allow(ip("10.0.0.2")));
    }

    #[test]
    fn test_bare_ip_entries() {
        let filter = IpFilter::new(&config(&["192.168.1.1"], &[]));
        assert!(filter.allow(ip("192.168.1.1")));
        assert!(!filter.allow(ip("192.168.1.2")));
    }

    #[test]
    fn test_ipv6() {
        let filter = IpFilter::new(&config(&["2001:db8::/32"], &[]));
        assert!(filter.allow(ip("2001:db8::1")));
        assert!(!filter.allow(ip("2001:db9::1")));
        // An IPv4 client never matches an IPv6-only allow-list.
        assert!(!filter.allow(ip("192.168.1.1")));
    }

    #[test]
    fn test_invalid_entries_skipped() {
        let filter = IpFilter::new(&config(&[], &["not-an-ip", "192.168.1.0/33", "10.0.0.1"]));
        assert!(!filter.allow(ip("10.0.0.1")));
        assert!(filter.allow(ip("192.168.1.1")));
    }

    #[test]
    fn test_unknown_ip() {
        let block_only = IpFilter::new(&config(&[], &["10.0.0.0/8"]));
        assert!(block_only.allow(None));

        let with_allow = IpFilter::new(&config(&["10.0.0.0/8"], &[]));
        assert!(!with_allow.allow(None));
    }

    #[test]
    fn test_chain_construction() {
        assert!(new_ip_filter_chain(None, None).is_none());

        let filter = new_ip_filter(Some(&config(&["192.168.1.0/24"], &[]))).unwrap();
        let chain = new_ip_filter_chain(None, Some(&filter)).unwrap();
        assert_eq!(chain.filters().len(), 1);

        // A child-less chain still carries the parent's filters.
        let grown = new_ip_filter_chain(Some(&chain), None).unwrap();
        assert_eq!(grown.filters().len(), 1);
    }

    #[test]
    fn test_chain_is_a_conjunction() {
        let server = new_ip_filter(Some(&config(&[], &["192.168.1.1"]))).unwrap();
        let path = new_ip_filter(Some(&config(&["192.168.1.0/24"], &[]))).unwrap();

        let chain = new_ip_filter_chain(None, Some(&server)).unwrap();
        let chain = new_ip_filter_chain(Some(&chain), Some(&path)).unwrap();
        assert_eq!(chain.filters().len(), 2);

        assert!(chain.allow(ip("192.168.1.2")));
        // Denied by the first link even though the second allows it.
        assert!(!chain.allow(ip("192.168.1.1")));
        // Denied by the second link.
        assert!(!chain.allow(ip("10.0.0.1")));
    }
}
