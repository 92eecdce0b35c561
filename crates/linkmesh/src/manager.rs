//! Reconciliation of live kernel state against a desired configuration.
//!
//! A [`NetworkManager`] owns the desired [`NodeConfigSpec`] and drives one
//! [`Network`] towards it. A sync cycle loads the live state, diffs it
//! against the desired state, then applies every delete followed by every
//! create. Failures of individual categories are collected, never fatal,
//! and surface as [`SyncStatus::Exception`] with a reason.
//!
//! # Example
//!
//! ```ignore
//! use linkmesh::{NetworkManager, DefaultNetwork, ClusterCidrs};
//!
//! let manager = NetworkManager::new(DefaultNetwork::new(ClusterCidrs::default()).await?);
//! let status = manager.update_from_crd(&desired).await;
//! if status.is_exception() {
//!     eprintln!("{}", manager.get_reason().await);
//! }
//! ```

use std::fmt;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::diff::{ConfigDiff, diff};
use crate::network::{self, Network, NetworkError, Op};
use crate::nodeconfig::{CategoryKind, ClusterCidrs, NodeConfigSpec};

/// Outcome of the most recent sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Success,
    Exception,
}

impl SyncStatus {
    pub fn is_success(self) -> bool {
        self == SyncStatus::Success
    }

    pub fn is_exception(self) -> bool {
        self == SyncStatus::Exception
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Success => f.write_str("success"),
            SyncStatus::Exception => f.write_str("exception"),
        }
    }
}

/// A failed category operation, e.g. `add route`.
#[derive(Debug, thiserror::Error)]
#[error("{operation}: {error}")]
pub struct ApplyError {
    pub operation: String,
    #[source]
    pub error: NetworkError,
}

/// Why a sync cycle ended in [`SyncStatus::Exception`].
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Reading live state failed; nothing was applied.
    #[error("load system config: {0}")]
    Load(#[source] NetworkError),

    #[error("{}", join_apply(.0))]
    Apply(Vec<ApplyError>),
}

fn join_apply(errors: &[ApplyError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug)]
struct SyncState {
    /// None until the first desired configuration arrives.
    desired: Option<NodeConfigSpec>,
    from_config: NodeConfigSpec,
    status: SyncStatus,
    reason: String,
}

/// Drives a [`Network`] towards a desired configuration.
///
/// All entry points serialize on one lock, so at most one cycle runs at a
/// time per manager.
pub struct NetworkManager<N> {
    network: N,
    state: Mutex<SyncState>,
}

impl<N: Network> NetworkManager<N> {
    pub fn new(network: N) -> Self {
        Self {
            network,
            state: Mutex::new(SyncState {
                desired: None,
                from_config: NodeConfigSpec::default(),
                status: SyncStatus::Success,
                reason: String::new(),
            }),
        }
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    /// Accept a new desired configuration.
    ///
    /// If it equals the stored one, the previous status is returned without
    /// touching the kernel. Otherwise it replaces the stored one and a sync
    /// cycle runs.
    pub async fn update_from_crd(&self, desired: &NodeConfigSpec) -> SyncStatus {
        let mut state = self.state.lock().await;
        let desired = desired.normalized();
        let stored = state.desired.clone().unwrap_or_default();
        if diff(&stored, &desired).0 {
            debug!("desired config unchanged");
            return state.status;
        }
        state.desired = Some(desired);
        self.update_sync(&mut state).await
    }

    /// Re-run a sync cycle against the stored desired configuration.
    ///
    /// Before any desired configuration has been accepted this only reports
    /// the current status.
    pub async fn update_from_checker(&self) -> SyncStatus {
        let mut state = self.state.lock().await;
        if state.desired.is_none() {
            return state.status;
        }
        self.update_sync(&mut state).await
    }

    /// Forward new overlay CIDRs to the network.
    pub async fn update_config(&self, cidrs: &ClusterCidrs) {
        self.network.update_cidr_config(cidrs).await;
    }

    /// Reason of the last [`SyncStatus::Exception`]; empty after success.
    pub async fn get_reason(&self) -> String {
        self.state.lock().await.reason.clone()
    }

    pub async fn status(&self) -> SyncStatus {
        self.state.lock().await.status
    }

    pub async fn desired(&self) -> Option<NodeConfigSpec> {
        self.state.lock().await.desired.clone()
    }

    /// Live state seen by the most recent successful load.
    pub async fn observed(&self) -> NodeConfigSpec {
        self.state.lock().await.from_config.clone()
    }

    /// Diff live state against `desired` without applying anything.
    pub async fn plan(&self, desired: &NodeConfigSpec) -> Result<ConfigDiff, SyncError> {
        let _guard = self.state.lock().await;
        let live = self.network.load().await.map_err(SyncError::Load)?;
        Ok(diff(&live.normalized(), &desired.normalized()).1)
    }

    async fn update_sync(&self, state: &mut SyncState) -> SyncStatus {
        match self.sync_once(state).await {
            Ok(()) => {
                state.status = SyncStatus::Success;
                state.reason.clear();
            }
            Err(e) => {
                state.status = SyncStatus::Exception;
                state.reason = e.to_string();
            }
        }
        state.status
    }

    async fn sync_once(&self, state: &mut SyncState) -> Result<(), SyncError> {
        let live = self.network.load().await.map_err(SyncError::Load)?.normalized();
        state.from_config = live;

        let desired = state.desired.clone().unwrap_or_default();
        let (same, delta) = diff(&state.from_config, &desired);
        if same {
            debug!("live config matches desired");
            return Ok(());
        }
        debug!(delete = ?delta.delete_config, create = ?delta.create_config, "config diff");

        let errors = self.apply(&delta).await;
        if errors.is_empty() {
            Ok(())
        } else {
            Err(SyncError::Apply(errors))
        }
    }

    /// Every delete, in category order, then every create.
    async fn apply(&self, delta: &ConfigDiff) -> Vec<ApplyError> {
        let mut errors = Vec::new();
        for (op, spec) in [
            (Op::Delete, &delta.delete_config),
            (Op::Add, &delta.create_config),
        ] {
            for kind in CategoryKind::ALL {
                let count = kind.len(spec);
                if count == 0 {
                    continue;
                }
                info!(%op, category = %kind, count, "applying");
                if let Err(error) = network::apply(&self.network, kind, op, spec).await {
                    warn!(%op, category = %kind, %error, "apply failed");
                    errors.push(ApplyError {
                        operation: format!("{} {}", op, kind),
                        error,
                    });
                }
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use super::*;
    use crate::network::{ItemError, Result as NetResult};
    use crate::nodeconfig::{
        Arp, Device, Fdb, IpSet, Iptables, Route, XfrmPolicy, XfrmState,
    };

    /// Records calls; optionally fails loads or route adds.
    #[derive(Default)]
    struct Recorder {
        live: StdMutex<NodeConfigSpec>,
        calls: StdMutex<Vec<String>>,
        fail_load: bool,
        fail_route_add: bool,
    }

    impl Recorder {
        fn record(&self, op: Op, kind: &str, n: usize) {
            self.calls.lock().unwrap().push(format!("{} {} {}", op, kind, n));
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Network for Recorder {
        async fn load(&self) -> NetResult<NodeConfigSpec> {
            if self.fail_load {
                return Err(NetworkError::Invalid("netlink down".into()));
            }
            Ok(self.live.lock().unwrap().clone())
        }

        async fn devices(&self, op: Op, items: &[Device]) -> NetResult<()> {
            self.record(op, "device", items.len());
            Ok(())
        }

        async fn routes(&self, op: Op, items: &[Route]) -> NetResult<()> {
            self.record(op, "route", items.len());
            if op == Op::Add && self.fail_route_add {
                return Err(NetworkError::Batch(vec![ItemError::new(
                    &items[0],
                    NetworkError::Invalid("no such device".into()),
                )]));
            }
            Ok(())
        }

        async fn iptables(&self, op: Op, items: &[Iptables]) -> NetResult<()> {
            self.record(op, "iptables", items.len());
            Ok(())
        }

        async fn fdbs(&self, op: Op, items: &[Fdb]) -> NetResult<()> {
            self.record(op, "fdb", items.len());
            Ok(())
        }

        async fn arps(&self, op: Op, items: &[Arp]) -> NetResult<()> {
            self.record(op, "arp", items.len());
            Ok(())
        }

        async fn xfrm_policies(&self, op: Op, items: &[XfrmPolicy]) -> NetResult<()> {
            self.record(op, "xfrm policy", items.len());
            Ok(())
        }

        async fn xfrm_states(&self, op: Op, items: &[XfrmState]) -> NetResult<()> {
            self.record(op, "xfrm state", items.len());
            Ok(())
        }

        async fn ipsets(&self, op: Op, items: &[IpSet]) -> NetResult<()> {
            self.record(op, "ipset", items.len());
            Ok(())
        }

        async fn update_cidr_config(&self, _cidrs: &ClusterCidrs) {}

        async fn init_sys(&self) {}
    }

    fn route(cidr: &str) -> Route {
        Route {
            cidr: cidr.into(),
            gw: "220.0.0.7".into(),
            dev: "vx-bridge".into(),
        }
    }

    fn desired() -> NodeConfigSpec {
        NodeConfigSpec {
            routes: vec![route("10.233.0.0/16")],
            ipsets: vec![IpSet {
                cidr: "10.234.0.0/16".into(),
                name: "kosmosipset".into(),
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_initial_status() {
        let manager = NetworkManager::new(Recorder::default());
        assert_eq!(manager.status().await, SyncStatus::Success);
        assert!(manager.get_reason().await.is_empty());
    }

    #[tokio::test]
    async fn test_deletes_then_creates() {
        let recorder = Recorder::default();
        *recorder.live.lock().unwrap() = NodeConfigSpec {
            devices: vec![Device {
                name: "vx-local".into(),
                ..Default::default()
            }],
            routes: vec![route("10.240.0.0/16")],
            ..Default::default()
        };
        let manager = NetworkManager::new(recorder);

        assert_eq!(manager.update_from_crd(&desired()).await, SyncStatus::Success);
        assert_eq!(
            manager.network().calls(),
            [
                "delete device 1",
                "delete route 1",
                "add route 1",
                "add ipset 1",
            ]
        );
    }

    #[tokio::test]
    async fn test_load_failure_applies_nothing() {
        let manager = NetworkManager::new(Recorder {
            fail_load: true,
            ..Default::default()
        });
        assert_eq!(manager.update_from_crd(&desired()).await, SyncStatus::Exception);
        assert_eq!(
            manager.get_reason().await,
            "load system config: netlink down"
        );
        assert!(manager.network().calls().is_empty());
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_other_categories() {
        let manager = NetworkManager::new(Recorder {
            fail_route_add: true,
            ..Default::default()
        });
        assert_eq!(manager.update_from_crd(&desired()).await, SyncStatus::Exception);
        assert_eq!(manager.network().calls(), ["add route 1", "add ipset 1"]);
        assert_eq!(
            manager.get_reason().await,
            "add route: 10.233.0.0/16 via 220.0.0.7 dev vx-bridge: no such device"
        );
    }

    #[tokio::test]
    async fn test_same_desired_short_circuits() {
        let manager = NetworkManager::new(Recorder::default());
        manager.update_from_crd(&desired()).await;
        let calls = manager.network().calls().len();

        assert_eq!(manager.update_from_crd(&desired()).await, SyncStatus::Success);
        assert_eq!(manager.network().calls().len(), calls);
    }

    #[tokio::test]
    async fn test_desired_is_normalized() {
        let manager = NetworkManager::new(Recorder::default());
        let mut spec = desired();
        spec.routes[0].cidr = "10.233.7.1/16".into();
        manager.update_from_crd(&spec).await;
        let stored = manager.desired().await.unwrap();
        assert_eq!(stored.routes[0].cidr, "10.233.0.0/16");
    }

    #[tokio::test]
    async fn test_success_clears_reason() {
        let manager = NetworkManager::new(Recorder {
            fail_route_add: true,
            ..Default::default()
        });
        manager.update_from_crd(&desired()).await;
        assert!(!manager.get_reason().await.is_empty());

        *manager.network().live.lock().unwrap() = desired();
        assert_eq!(manager.update_from_checker().await, SyncStatus::Success);
        assert!(manager.get_reason().await.is_empty());
        assert_eq!(manager.observed().await, desired());
    }

    #[tokio::test]
    async fn test_checker_waits_for_desired() {
        let recorder = Recorder::default();
        *recorder.live.lock().unwrap() = desired();
        let manager = NetworkManager::new(recorder);

        assert_eq!(manager.update_from_checker().await, SyncStatus::Success);
        assert!(manager.network().calls().is_empty());
        assert!(manager.observed().await.is_empty());
    }

    #[tokio::test]
    async fn test_plan_does_not_apply() {
        let manager = NetworkManager::new(Recorder::default());
        let plan = manager.plan(&desired()).await.unwrap();
        assert_eq!(plan.create_config, desired());
        assert!(manager.network().calls().is_empty());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(SyncStatus::Success.to_string(), "success");
        assert_eq!(
            serde_json::to_string(&SyncStatus::Exception).unwrap(),
            "\"exception\""
        );
    }
}
