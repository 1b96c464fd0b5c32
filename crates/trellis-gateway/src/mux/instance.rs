//! The compiled matcher tree and its search algorithm.
//!
//! A [`MuxInstance`] is built once from the declarative config and never
//! mutated afterwards; reconfiguration compiles a fresh instance and swaps it
//! in (see [`super::Mux`]). Rule and path iteration order is exactly the
//! declared order and the first full match wins.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use hyper::header::HeaderMap;
use hyper::{Method, Request};
use regex::Regex;
use tracing::error;

use crate::config::{Config, FieldPredicate, PathConfig, RuleConfig};
use crate::ipfilter::{allow_ip, new_ip_filter, new_ip_filter_chain, IpFilter, IpFilterChain};
use crate::realip;

use super::cache::{CacheKey, CacheStats, RouteCache};
use super::verdict::Verdict;

/// Compile a pattern, logging a defect on failure. A failed compile leaves
/// the predicate in place but unable to match anything; the reload stays
/// total either way.
fn compile_regex(pattern: &str, context: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(err) => {
            error!("invalid {} regexp {:?}: {}", context, pattern, err);
            None
        }
    }
}

/// Header or query predicate with its regex pre-compiled.
#[derive(Debug)]
pub struct CompiledPredicate {
    key: String,
    values: Vec<String>,
    regexp: Option<Regex>,
}

impl CompiledPredicate {
    fn compile(config: &FieldPredicate, context: &str) -> Self {
        Self {
            key: config.key.clone(),
            values: config.values.clone(),
            regexp: config.regexp.as_deref().and_then(|p| compile_regex(p, context)),
        }
    }

    /// Equals-any over the literal values, or the regex if one compiled.
    fn matches(&self, value: &str) -> bool {
        if self.values.iter().any(|v| v == value) {
            return true;
        }
        if let Some(re) = &self.regexp {
            return re.is_match(value);
        }
        false
    }
}

/// One routing entry: path predicates, method set, header/query predicates,
/// rewrite target, and the backend it routes to.
#[derive(Debug)]
pub struct MuxPath {
    ip_filter: Option<Arc<IpFilter>>,
    ip_filter_chain: Option<Arc<IpFilterChain>>,

    path: Option<String>,
    path_prefix: Option<String>,
    path_regexp: Option<String>,
    path_re: Option<Regex>,
    methods: Vec<Method>,
    headers: Vec<CompiledPredicate>,
    queries: Vec<CompiledPredicate>,
    match_all_header: bool,
    rewrite_target: Option<String>,
    backend: String,
}

impl MuxPath {
    fn compile(config: &PathConfig, parent_chain: Option<&IpFilterChain>) -> Self {
        let ip_filter = new_ip_filter(config.ip_filter.as_ref());
        let ip_filter_chain = new_ip_filter_chain(parent_chain, ip_filter.as_ref());

        let path_re = config
            .path_regexp
            .as_deref()
            .and_then(|p| compile_regex(p, "path"));

        let methods = config
            .methods
            .iter()
            .filter_map(|m| {
                Method::from_bytes(m.as_bytes())
                    .map_err(|err| error!("invalid method {:?}: {}", m, err))
                    .ok()
            })
            .collect();

        Self {
            ip_filter,
            ip_filter_chain,
            path: config.path.clone(),
            path_prefix: config.path_prefix.clone(),
            path_regexp: config.path_regexp.clone(),
            path_re,
            methods,
            headers: config
                .headers
                .iter()
                .map(|h| CompiledPredicate::compile(h, "header"))
                .collect(),
            queries: config
                .queries
                .iter()
                .map(|q| CompiledPredicate::compile(q, "query"))
                .collect(),
            match_all_header: config.match_all_header,
            rewrite_target: config.rewrite_target.clone(),
            backend: config.backend.clone(),
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn ip_filter_chain(&self) -> Option<&IpFilterChain> {
        self.ip_filter_chain.as_deref()
    }

    fn match_path(&self, path: &str) -> bool {
        if self.path.is_none() && self.path_prefix.is_none() && self.path_regexp.is_none() {
            return true;
        }
        if self.path.as_deref() == Some(path) {
            return true;
        }
        if let Some(prefix) = &self.path_prefix {
            if path.starts_with(prefix) {
                return true;
            }
        }
        if let Some(re) = &self.path_re {
            return re.is_match(path);
        }
        false
    }

    fn match_method(&self, method: &Method) -> bool {
        self.methods.is_empty() || self.methods.contains(method)
    }

    /// Evaluates each predicate against the first header value for its key
    /// (missing headers evaluate against the empty string). Aggregation is
    /// any-one unless `match_all_header` is set.
    fn match_headers(&self, headers: &HeaderMap) -> bool {
        let value_of = |p: &CompiledPredicate| -> bool {
            let value = headers
                .get(&p.key)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            p.matches(value)
        };
        if self.match_all_header {
            self.headers.iter().all(value_of)
        } else {
            self.headers.iter().any(value_of)
        }
    }

    /// Query predicates evaluate against the first value per key and every
    /// predicate must match, short-circuiting on the first miss. The
    /// all-must-match aggregation here is deliberate and independent of
    /// `match_all_header`.
    fn match_queries(&self, raw_query: Option<&str>) -> bool {
        let params = parse_query(raw_query);
        self.queries
            .iter()
            .all(|p| p.matches(params.get(&p.key).map(String::as_str).unwrap_or("")))
    }

    /// The verdict for this path depends only on (host, method, path) when
    /// it has no header predicates, no query predicates, and no own IP
    /// filter. Ancestor filters are fine: cache hits re-validate the chain.
    fn cacheable(&self) -> bool {
        self.headers.is_empty() && self.queries.is_empty() && self.ip_filter.is_none()
    }

    /// Returns the rewritten path, or `None` when no rewrite applies.
    pub fn rewrite(&self, path: &str) -> Option<String> {
        let target = self.rewrite_target.as_deref().filter(|t| !t.is_empty())?;

        if let Some(re) = &self.path_re {
            return Some(re.replace_all(path, target).into_owned());
        }
        if self.path.as_deref() == Some(path) {
            return Some(target.to_string());
        }
        if let Some(prefix) = &self.path_prefix {
            if let Some(rest) = path.strip_prefix(prefix.as_str()) {
                return Some(format!("{target}{rest}"));
            }
        }
        None
    }
}

/// A host-scoped, ordered group of paths.
#[derive(Debug)]
pub struct MuxRule {
    ip_filter: Option<Arc<IpFilter>>,

    host: Option<String>,
    host_regexp: Option<String>,
    host_re: Option<Regex>,
    paths: Vec<Arc<MuxPath>>,
}

impl MuxRule {
    fn compile(config: &RuleConfig, parent_chain: Option<&IpFilterChain>) -> Self {
        let ip_filter = new_ip_filter(config.ip_filter.as_ref());
        let chain = new_ip_filter_chain(parent_chain, ip_filter.as_ref());

        let host_re = config
            .host_regexp
            .as_deref()
            .and_then(|p| compile_regex(p, "host"));

        let paths = config
            .paths
            .iter()
            .map(|p| Arc::new(MuxPath::compile(p, chain.as_deref())))
            .collect();

        Self {
            ip_filter,
            host: config.host.clone(),
            host_regexp: config.host_regexp.clone(),
            host_re,
            paths,
        }
    }

    /// A rule declaring neither host form matches any host. The port is
    /// already stripped by the caller.
    fn match_host(&self, host: &str) -> bool {
        if self.host.is_none() && self.host_regexp.is_none() {
            return true;
        }
        if self.host.as_deref() == Some(host) {
            return true;
        }
        if let Some(re) = &self.host_re {
            return re.is_match(host);
        }
        false
    }
}

/// Immutable matcher tree plus the cache bound to it.
#[derive(Debug, Default)]
pub struct MuxInstance {
    ip_filter: Option<Arc<IpFilter>>,
    cache: Option<RouteCache>,
    rules: Vec<MuxRule>,

    x_forwarded_for: bool,
    global_filter: Option<String>,
}

impl MuxInstance {
    /// Pure aside from defect logging; never touches the published instance.
    pub fn compile(config: &Config) -> Self {
        let ip_filter = new_ip_filter(config.ip_filter.as_ref());
        let chain = new_ip_filter_chain(None, ip_filter.as_ref());

        let rules = config
            .rules
            .iter()
            .map(|r| MuxRule::compile(r, chain.as_deref()))
            .collect();

        let cache = (config.cache_size > 0).then(|| RouteCache::new(config.cache_size as usize));

        Self {
            ip_filter,
            cache,
            rules,
            x_forwarded_for: config.x_forwarded_for,
            global_filter: config.global_filter.clone(),
        }
    }

    pub fn x_forwarded_for(&self) -> bool {
        self.x_forwarded_for
    }

    pub fn global_filter(&self) -> Option<&str> {
        self.global_filter.as_deref()
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|c| c.stats())
    }

    /// Match a request against the tree.
    ///
    /// Deterministic for a given (request, instance) pair; only the advisory
    /// cache makes repeated calls cheaper. `peer` is the accepted socket
    /// address, used when no forwarding header identifies the client.
    pub fn search<B>(&self, req: &Request<B>, peer: Option<SocketAddr>) -> Verdict {
        let ip = realip::from_request(req.headers(), peer);
        self.search_with_ip(req, ip)
    }

    fn search_with_ip<B>(&self, req: &Request<B>, ip: Option<IpAddr>) -> Verdict {
        let host = request_host(req);
        let path = req.uri().path();
        let key = CacheKey::new(host, req.method(), path);

        if let Some(cache) = &self.cache {
            if let Some(verdict) = cache.get(&key) {
                return match &verdict {
                    Verdict::Ok(matched) => match matched.ip_filter_chain() {
                        None => verdict,
                        Some(chain) if chain.allow(ip) => verdict,
                        Some(_) => Verdict::Forbidden,
                    },
                    _ => verdict,
                };
            }
        }

        if !allow_ip(self.ip_filter.as_deref(), ip) {
            return Verdict::Forbidden;
        }

        let mut header_mismatch = false;
        let mut method_mismatch = false;
        let mut ip_mismatch = false;

        let bare_host = strip_port(host);

        for rule in &self.rules {
            if !rule.match_host(bare_host) {
                continue;
            }
            if !allow_ip(rule.ip_filter.as_deref(), ip) {
                ip_mismatch = true;
                continue;
            }

            for mux_path in &rule.paths {
                if !mux_path.match_path(path) {
                    continue;
                }
                if !mux_path.match_method(req.method()) {
                    method_mismatch = true;
                    continue;
                }

                let verdict = Verdict::Ok(Arc::clone(mux_path));
                if mux_path.cacheable() {
                    if let Some(cache) = &self.cache {
                        cache.put(key.clone(), verdict.clone());
                    }
                }

                if !mux_path.headers.is_empty() && !mux_path.match_headers(req.headers()) {
                    header_mismatch = true;
                    continue;
                }
                if !mux_path.queries.is_empty() && !mux_path.match_queries(req.uri().query()) {
                    header_mismatch = true;
                    continue;
                }
                if !allow_ip(mux_path.ip_filter.as_deref(), ip) {
                    ip_mismatch = true;
                    continue;
                }

                return verdict;
            }
        }

        if header_mismatch {
            return Verdict::BadRequest;
        }
        if method_mismatch {
            self.put_terminal(&key, Verdict::MethodNotAllowed);
            return Verdict::MethodNotAllowed;
        }
        if ip_mismatch {
            return Verdict::Forbidden;
        }
        self.put_terminal(&key, Verdict::NotFound);
        Verdict::NotFound
    }

    fn put_terminal(&self, key: &CacheKey, verdict: Verdict) {
        if let Some(cache) = &self.cache {
            cache.put(key.clone(), verdict);
        }
    }
}

/// The authority as sent by the client, port included: the URI authority for
/// absolute-form requests, the Host header otherwise.
fn request_host<B>(req: &Request<B>) -> &str {
    if let Some(authority) = req.uri().authority() {
        return authority.as_str();
    }
    req.headers()
        .get(hyper::header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("")
}

/// Strip a `:port` suffix, handling bracketed IPv6 authorities.
fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return &rest[..end];
        }
    }
    match host.rsplit_once(':') {
        Some((bare, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => bare,
        _ => host,
    }
}

fn parse_query(raw: Option<&str>) -> HashMap<String, String> {
    let mut params = HashMap::new();
    if let Some(raw) = raw {
        for pair in raw.split('&') {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            // First value per key wins, like url.Values.Get.
            params
                .entry(key.to_string())
                .or_insert_with(|| urlencoding::decode(value).unwrap_or_default().into_owned());
        }
    }
    params
}
