use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tracing::{debug, warn};
use url::{Host, Url};

const LOCAL_SUFFIXES: &[&str] = &[".localhost", ".local", ".internal", ".lan", ".home.arpa"];

/// Outcome of vetting one caller-supplied URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserTarget {
    pub url: String,
    pub parsed_host: Option<String>,
    pub resolved_addresses: Vec<IpAddr>,
    pub blocked: bool,
    pub reason: Option<String>,
}

impl BrowserTarget {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            parsed_host: None,
            resolved_addresses: Vec::new(),
            blocked: false,
            reason: None,
        }
    }

    fn block(mut self, reason: impl Into<String>) -> Self {
        self.blocked = true;
        self.reason = Some(reason.into());
        self
    }
}

#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>>;
}

pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, port)).await?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}

#[derive(Clone)]
pub struct SsrfGuard {
    allowed_hosts: Arc<Vec<String>>,
    resolver: Arc<dyn HostResolver>,
}

impl SsrfGuard {
    pub fn new(allowed_hosts: Vec<String>, resolver: Arc<dyn HostResolver>) -> Self {
        let allowed_hosts = allowed_hosts
            .into_iter()
            .map(|h| h.trim().trim_end_matches('.').to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        Self {
            allowed_hosts: Arc::new(allowed_hosts),
            resolver,
        }
    }

    pub async fn check(&self, raw_url: &str) -> BrowserTarget {
        let target = BrowserTarget::new(raw_url);

        let url = match Url::parse(raw_url.trim()) {
            Ok(url) => url,
            Err(e) => return target.block(format!("URL could not be parsed: {e}")),
        };
        if !matches!(url.scheme(), "http" | "https") {
            return target.block(format!("Scheme '{}' is not allowed", url.scheme()));
        }
        let host = match url.host() {
            Some(host) => host,
            None => return target.block("URL has no host"),
        };

        let mut target = target;
        match host {
            Host::Ipv4(ip) => {
                target.parsed_host = Some(ip.to_string());
                self.check_literal(target, IpAddr::V4(ip))
            }
            Host::Ipv6(ip) => {
                target.parsed_host = Some(ip.to_string());
                self.check_literal(target, IpAddr::V6(ip))
            }
            Host::Domain(domain) => {
                let domain = domain.trim_end_matches('.').to_ascii_lowercase();
                target.parsed_host = Some(domain.clone());

                if self.allowed_hosts.iter().any(|h| *h == domain) {
                    debug!(host = %domain, "Host is allow-listed");
                    return target;
                }
                if is_local_name(&domain) {
                    return target.block(format!("Host '{domain}' is a local name"));
                }

                let port = url.port_or_known_default().unwrap_or(80);
                self.check_resolved(target, &domain, port).await
            }
        }
    }

    fn check_literal(&self, target: BrowserTarget, ip: IpAddr) -> BrowserTarget {
        if self.allowed_hosts.iter().any(|h| h == &ip.to_string()) {
            return target;
        }
        if is_blocked_ip(ip) {
            return target.block(format!("Address {ip} is in a blocked range"));
        }
        target
    }

    async fn check_resolved(&self, mut target: BrowserTarget, host: &str, port: u16) -> BrowserTarget {
        let addrs = match self.resolver.resolve(host, port).await {
            Ok(addrs) => addrs,
            Err(e) => {
                warn!(host = %host, "Host resolution failed: {}", e);
                return target.block(format!("Failed to resolve host '{host}': {e}"));
            }
        };
        if addrs.is_empty() {
            return target.block(format!("Host '{host}' did not resolve to any address"));
        }

        target.resolved_addresses = addrs;
        let blocked = target
            .resolved_addresses
            .iter()
            .copied()
            .find(|ip| is_blocked_ip(*ip));
        match blocked {
            Some(ip) => target.block(format!("Host '{host}' resolves to blocked address {ip}")),
            None => target,
        }
    }
}

fn is_local_name(host: &str) -> bool {
    host == "localhost" || LOCAL_SUFFIXES.iter().any(|s| host.ends_with(s))
}

pub fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_v4(v4),
        IpAddr::V6(v6) => is_blocked_v6(v6),
    }
}

fn is_blocked_v4(ip: Ipv4Addr) -> bool {
    let [a, b, c, _] = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_multicast()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_unspecified()
        || a == 0
        // carrier-grade NAT
        || (a == 100 && (64..=127).contains(&b))
        || (a == 192 && b == 0 && c == 0)
        // benchmarking
        || (a == 198 && (b == 18 || b == 19))
        || a >= 240
}

fn is_blocked_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_blocked_v4(v4);
    }
    let seg = ip.segments();
    // NAT64 carries a v4 address in the low 32 bits
    if seg[0] == 0x64 && seg[1] == 0xff9b && seg[2..6] == [0, 0, 0, 0] {
        return is_blocked_v4(embedded_v4(seg[6], seg[7]));
    }
    // 6to4 carries one right after the prefix
    if seg[0] == 0x2002 {
        return is_blocked_v4(embedded_v4(seg[1], seg[2]));
    }
    ip.is_multicast()
        // ::/8 covers loopback, unspecified and the v4-compatible form
        || (seg[0] & 0xff00) == 0
        // discard-only 100::/64
        || (seg[0] == 0x100 && seg[1..4] == [0, 0, 0])
        // IETF protocol assignments 2001::/23, Teredo included
        || (seg[0] == 0x2001 && seg[1] < 0x200)
        // unique local fc00::/7
        || (seg[0] & 0xfe00) == 0xfc00
        // link-local fe80::/10
        || (seg[0] & 0xffc0) == 0xfe80
        // site-local fec0::/10
        || (seg[0] & 0xffc0) == 0xfec0
        || (seg[0] == 0x2001 && seg[1] == 0x0db8)
}

fn embedded_v4(high: u16, low: u16) -> Ipv4Addr {
    Ipv4Addr::new((high >> 8) as u8, high as u8, (low >> 8) as u8, low as u8)
}
