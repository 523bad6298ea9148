//! Domain metadata cache. The executor consults it to decide whether a
//! replicated domain is registered locally and configured to replicate
//! into this cluster.

use crate::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct DomainEntry {
    pub id: String,
    pub name: String,
    /// Global domains replicate; local ones never do.
    pub is_global: bool,
    /// Names of the clusters this domain is provisioned in.
    pub clusters: Vec<String>,
}

impl DomainEntry {
    /// Whether replication tasks for this domain should be applied on
    /// `cluster`.
    pub fn replicates_to(&self, cluster: &str) -> bool {
        self.is_global && self.clusters.iter().any(|name| name == cluster)
    }
}

#[async_trait::async_trait]
pub trait DomainCache: Send + Sync + 'static {
    /// Look up a domain by ID. `Ok(None)` means the domain is not
    /// registered locally, which is not an error for replication: such
    /// tasks are skipped.
    async fn domain(&self, domain_id: &str) -> Result<Option<DomainEntry>>;
}
