use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The closed set of handle-backed resource kinds the catalog can mint.
///
/// Kept as an enum (rather than an open string) so an unknown kind is a
/// compile error for module authors. Lock ordering across kinds follows
/// this declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    DbConnection,
    DbStatement,
    HttpSession,
    SftpSession,
    SmtpSession,
    Workbook,
    Worksheet,
    XmlDocument,
    Cipher,
    Logger,
    Lockfile,
    XmlDomParser,
    XmlDomDocument,
    XmlDomNode,
    XmlDomNodelist,
}

impl ResourceKind {
    pub const ALL: &'static [ResourceKind] = &[
        ResourceKind::DbConnection,
        ResourceKind::DbStatement,
        ResourceKind::HttpSession,
        ResourceKind::SftpSession,
        ResourceKind::SmtpSession,
        ResourceKind::Workbook,
        ResourceKind::Worksheet,
        ResourceKind::XmlDocument,
        ResourceKind::Cipher,
        ResourceKind::Logger,
        ResourceKind::Lockfile,
        ResourceKind::XmlDomParser,
        ResourceKind::XmlDomDocument,
        ResourceKind::XmlDomNode,
        ResourceKind::XmlDomNodelist,
    ];

    /// The handle prefix this kind encodes, e.g. `db_connection`.
    pub fn prefix(&self) -> &'static str {
        match self {
            ResourceKind::DbConnection => "db_connection",
            ResourceKind::DbStatement => "db_statement",
            ResourceKind::HttpSession => "http_session",
            ResourceKind::SftpSession => "sftp_session",
            ResourceKind::SmtpSession => "smtp_session",
            ResourceKind::Workbook => "workbook",
            ResourceKind::Worksheet => "worksheet",
            ResourceKind::XmlDocument => "xml_document",
            ResourceKind::Cipher => "cipher",
            ResourceKind::Logger => "logger",
            ResourceKind::Lockfile => "lockfile",
            ResourceKind::XmlDomParser => "xml_dom_parser",
            ResourceKind::XmlDomDocument => "xml_dom_document",
            ResourceKind::XmlDomNode => "xml_dom_node",
            ResourceKind::XmlDomNodelist => "xml_dom_nodelist",
        }
    }

    pub fn from_prefix(s: &str) -> Option<ResourceKind> {
        ResourceKind::ALL.iter().copied().find(|k| k.prefix() == s)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Daemon runtime configuration. Immutable after startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Unix socket path (POSIX) used as the primary endpoint.
    pub endpoint_path: String,
    /// Discovery sidecar file written on non-POSIX platforms.
    pub discovery_path: String,
    pub max_concurrent_requests: usize,
    pub max_requests_per_minute: u32,
    pub max_memory_mb: u64,
    pub max_cpu_percent: f32,
    #[serde(with = "kind_map_u64")]
    pub idle_ttl_seconds_by_kind: HashMap<ResourceKind, u64>,
    #[serde(with = "kind_map_usize")]
    pub capacity_by_kind: HashMap<ResourceKind, usize>,
    pub strict_validation: bool,
    pub max_request_bytes: usize,
    pub handler_timeout_seconds: u64,
    pub shutdown_grace_seconds: u64,
    pub suspicious_patterns: Vec<String>,
    pub debug: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let mut idle_ttl_seconds_by_kind = HashMap::new();
        let mut capacity_by_kind = HashMap::new();
        for kind in ResourceKind::ALL {
            idle_ttl_seconds_by_kind.insert(*kind, 300);
            capacity_by_kind.insert(*kind, 256);
        }
        // Connections and statements get their own defaults; everything
        // else keeps the uniform 256 above (see DESIGN.md).
        capacity_by_kind.insert(ResourceKind::DbConnection, 100);
        capacity_by_kind.insert(ResourceKind::DbStatement, 1000);

        BridgeConfig {
            endpoint_path: "/tmp/cpan_bridge.sock".to_string(),
            discovery_path: "cpan_bridge_socket.txt".to_string(),
            max_concurrent_requests: 100,
            max_requests_per_minute: 2000,
            max_memory_mb: 1024,
            max_cpu_percent: 200.0,
            idle_ttl_seconds_by_kind,
            capacity_by_kind,
            strict_validation: true,
            max_request_bytes: 10 * 1024 * 1024,
            handler_timeout_seconds: 30,
            shutdown_grace_seconds: 10,
            suspicious_patterns: vec![
                r"(?i)\bDROP\s+TABLE\b".to_string(),
                r"\.\./".to_string(),
            ],
            debug: false,
        }
    }
}

impl BridgeConfig {
    pub fn idle_ttl(&self, kind: ResourceKind) -> std::time::Duration {
        std::time::Duration::from_secs(
            *self.idle_ttl_seconds_by_kind.get(&kind).unwrap_or(&300),
        )
    }

    pub fn capacity(&self, kind: ResourceKind) -> usize {
        *self.capacity_by_kind.get(&kind).unwrap_or(&256)
    }
}

/// serde helpers for `HashMap<ResourceKind, _>`, since `ResourceKind` is
/// not a `String` and serde_yaml maps require string-like keys in the
/// wire representation for readability.
mod kind_map_u64 {
    use super::ResourceKind;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::HashMap;

    pub fn serialize<S: Serializer>(
        map: &HashMap<ResourceKind, u64>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        let as_strings: HashMap<String, u64> =
            map.iter().map(|(k, v)| (k.prefix().to_string(), *v)).collect();
        as_strings.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<HashMap<ResourceKind, u64>, D::Error> {
        let as_strings: HashMap<String, u64> = HashMap::deserialize(d)?;
        Ok(as_strings
            .into_iter()
            .filter_map(|(k, v)| ResourceKind::from_prefix(&k).map(|kind| (kind, v)))
            .collect())
    }
}

mod kind_map_usize {
    use super::ResourceKind;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::HashMap;

    pub fn serialize<S: Serializer>(
        map: &HashMap<ResourceKind, usize>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        let as_strings: HashMap<String, usize> =
            map.iter().map(|(k, v)| (k.prefix().to_string(), *v)).collect();
        as_strings.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<HashMap<ResourceKind, usize>, D::Error> {
        let as_strings: HashMap<String, usize> = HashMap::deserialize(d)?;
        Ok(as_strings
            .into_iter()
            .filter_map(|(k, v)| ResourceKind::from_prefix(&k).map(|kind| (kind, v)))
            .collect())
    }
}
