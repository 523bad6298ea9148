//! Cluster metadata: which clusters exist, which one we are, and which one
//! is authoritative for a given failover version.

/// Read-only view of the cluster topology.
pub trait ClusterMetadata: Send + Sync + 'static {
    fn current_cluster_name(&self) -> &str;

    /// Cluster responsible for `failover_version`, or `None` when the
    /// version does not map onto any configured cluster.
    fn cluster_name_for_failover_version(&self, failover_version: i64) -> Option<String>;
}

/// Static topology configured at deployment time.
///
/// Failover versions are allocated as `initial_version + k * increment`,
/// so the owning cluster is recovered by reducing a version modulo the
/// increment and matching it against each cluster's initial version.
#[derive(Debug, Clone)]
pub struct StaticClusterMetadata {
    current_cluster: String,
    failover_version_increment: i64,
    /// `(cluster_name, initial_failover_version)` pairs.
    initial_failover_versions: Vec<(String, i64)>,
}

impl StaticClusterMetadata {
    pub fn new(
        current_cluster: impl Into<String>,
        failover_version_increment: i64,
        initial_failover_versions: Vec<(String, i64)>,
    ) -> Self {
        assert!(failover_version_increment > 0);
        Self {
            current_cluster: current_cluster.into(),
            failover_version_increment,
            initial_failover_versions,
        }
    }
}

impl ClusterMetadata for StaticClusterMetadata {
    fn current_cluster_name(&self) -> &str {
        &self.current_cluster
    }

    fn cluster_name_for_failover_version(&self, failover_version: i64) -> Option<String> {
        if failover_version < 0 {
            return None;
        }
        let initial = failover_version % self.failover_version_increment;
        self.initial_failover_versions
            .iter()
            .find(|(_, version)| *version == initial)
            .map(|(name, _)| name.clone())
    }
}
