//! Host rules, paths, and predicate configuration.

use serde::{Deserialize, Serialize};

/// Allow/block CIDR lists. Entries are CIDR blocks or bare IP addresses.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct IpFilterConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_ips: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub block_ips: Vec<String>,
}

/// A host-scoped group of paths.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuleConfig {
    /// Literal host to match, compared with the port stripped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Host regular expression. A rule with neither host form matches any host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_regexp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_filter: Option<IpFilterConfig>,
    #[serde(default)]
    pub paths: Vec<PathConfig>,
}

/// A single routing entry. A path with none of `path`, `path_prefix`,
/// `path_regexp` matches every request path.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PathConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_regexp: Option<String>,
    /// Allowed methods; empty means all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<FieldPredicate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub queries: Vec<FieldPredicate>,
    /// When true every header predicate must match; default is any-one.
    #[serde(default)]
    pub match_all_header: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite_target: Option<String>,
    /// Name of the downstream pipeline that handles matched requests.
    pub backend: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_filter: Option<IpFilterConfig>,
}

/// Predicate over a header or query value: matches when the value equals any
/// of `values` or, if set, `regexp` matches it.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FieldPredicate {
    pub key: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regexp: Option<String>,
}
