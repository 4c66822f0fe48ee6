//! Resource kind descriptors.

/// Static description of one kind of remote resource.
///
/// Kinds differ only in data: where they live in the API, which fields
/// identify them, which fields the API can filter on and which fields can be
/// changed in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceKind {
    /// Singular name used in messages and output, e.g. `image`.
    pub name: &'static str,
    /// API collection path, e.g. `images`.
    pub endpoint: &'static str,
    pub identity_keys: &'static [&'static str],
    pub filterable: &'static [&'static str],
    pub mutable: &'static [&'static str],
}

impl ResourceKind {
    pub fn is_filterable(&self, field: &str) -> bool {
        self.filterable.contains(&field)
    }

    /// Path of a single resource below the API base URL.
    pub fn resource_path(&self, id: &str) -> String {
        format!("{}/{}", self.endpoint, id)
    }
}

/// Linode Images.
pub const IMAGE: ResourceKind = ResourceKind {
    name: "image",
    endpoint: "images",
    identity_keys: &["label"],
    filterable: &["label", "is_public", "vendor", "deprecated", "size", "type"],
    mutable: &["description"],
};

/// Linode DNS Domains.
pub const DOMAIN: ResourceKind = ResourceKind {
    name: "domain",
    endpoint: "domains",
    identity_keys: &["domain"],
    filterable: &["domain", "group", "type"],
    mutable: &[
        "axfr_ips",
        "description",
        "expire_sec",
        "master_ips",
        "refresh_sec",
        "retry_sec",
        "soa_email",
        "status",
        "tags",
        "ttl_sec",
    ],
};
