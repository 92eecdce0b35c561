//! In-memory [`Network`] backend.
//!
//! [`FakeNetwork`] keeps a live [`NodeConfigSpec`] and applies category
//! operations to it, so the reconciliation loop can be exercised without
//! touching the kernel. Loads and per-item operations can be made to fail.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::network::{LoadErrors, Network, NetworkError, Op, Result, for_each_item};
use crate::nodeconfig::{
    Arp, Category, CategoryKind, ClusterCidrs, Device, Fdb, IpSet, Iptables, NodeConfigSpec, Route,
    XfrmPolicy, XfrmState,
};

#[derive(Debug, Default)]
struct LabState {
    live: NodeConfigSpec,
    cidrs: ClusterCidrs,
    loads: usize,
    applies: usize,
    init_calls: usize,
    load_error: Option<String>,
    category_load_errors: BTreeMap<CategoryKind, String>,
    failing: HashSet<String>,
    log: Vec<String>,
}

/// A [`Network`] whose kernel is a [`NodeConfigSpec`].
#[derive(Debug, Default)]
pub struct FakeNetwork {
    state: Mutex<LabState>,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `live` already installed.
    pub fn with_live(live: NodeConfigSpec) -> Self {
        Self {
            state: Mutex::new(LabState {
                live,
                ..Default::default()
            }),
        }
    }

    pub async fn live(&self) -> NodeConfigSpec {
        self.state.lock().await.live.clone()
    }

    /// Replace live state behind the manager's back, e.g. to simulate drift.
    pub async fn set_live(&self, live: NodeConfigSpec) {
        self.state.lock().await.live = live;
    }

    /// Number of `load` calls so far.
    pub async fn loads(&self) -> usize {
        self.state.lock().await.loads
    }

    /// Number of category operations so far.
    pub async fn applies(&self) -> usize {
        self.state.lock().await.applies
    }

    pub async fn init_calls(&self) -> usize {
        self.state.lock().await.init_calls
    }

    pub async fn cidrs(&self) -> ClusterCidrs {
        self.state.lock().await.cidrs.clone()
    }

    /// Every attempted item as `"<op> <category> <key>"`, in order.
    pub async fn log(&self) -> Vec<String> {
        self.state.lock().await.log.clone()
    }

    /// Make every following `load` fail with `message`; `None` clears it.
    pub async fn fail_load(&self, message: Option<&str>) {
        self.state.lock().await.load_error = message.map(str::to_string);
    }

    /// Make loading one category fail with `message`.
    pub async fn fail_load_category(&self, kind: CategoryKind, message: &str) {
        self.state
            .lock()
            .await
            .category_load_errors
            .insert(kind, message.to_string());
    }

    /// Make operations on the item with this [`Category::key`] fail.
    pub async fn fail_item(&self, key: impl Into<String>) {
        self.state.lock().await.failing.insert(key.into());
    }

    pub async fn clear_failures(&self) {
        let mut state = self.state.lock().await;
        state.failing.clear();
        state.load_error = None;
        state.category_load_errors.clear();
    }

    async fn apply_items<T: Category>(&self, op: Op, items: &[T]) -> Result<()> {
        self.state.lock().await.applies += 1;
        for_each_item(items, |item| self.apply_one(op, item)).await
    }

    async fn apply_one<T: Category>(&self, op: Op, item: &T) -> Result<()> {
        let mut state = self.state.lock().await;
        let key = item.key();
        state.log.push(format!("{} {} {}", op, T::KIND, key));
        if state.failing.contains(&key) {
            return Err(NetworkError::Invalid("injected failure".into()));
        }

        let live = T::items_mut(&mut state.live);
        match op {
            Op::Add => {
                if !live.iter().any(|l| l.equal(item)) {
                    live.push(item.clone());
                }
            }
            Op::Delete => live.retain(|l| !l.equal(item)),
        }
        Ok(())
    }
}

#[async_trait]
impl Network for FakeNetwork {
    async fn load(&self) -> Result<NodeConfigSpec> {
        let mut state = self.state.lock().await;
        state.loads += 1;
        if let Some(message) = &state.load_error {
            return Err(NetworkError::Invalid(message.clone()));
        }
        let mut errors = LoadErrors::default();
        for (&kind, message) in &state.category_load_errors {
            errors.record(kind, NetworkError::Invalid(message.clone()));
        }
        errors.finish(state.live.clone())
    }

    async fn devices(&self, op: Op, items: &[Device]) -> Result<()> {
        self.apply_items(op, items).await
    }

    async fn routes(&self, op: Op, items: &[Route]) -> Result<()> {
        self.apply_items(op, items).await
    }

    async fn iptables(&self, op: Op, items: &[Iptables]) -> Result<()> {
        self.apply_items(op, items).await
    }

    async fn fdbs(&self, op: Op, items: &[Fdb]) -> Result<()> {
        self.apply_items(op, items).await
    }

    async fn arps(&self, op: Op, items: &[Arp]) -> Result<()> {
        self.apply_items(op, items).await
    }

    async fn xfrm_policies(&self, op: Op, items: &[XfrmPolicy]) -> Result<()> {
        self.apply_items(op, items).await
    }

    async fn xfrm_states(&self, op: Op, items: &[XfrmState]) -> Result<()> {
        self.apply_items(op, items).await
    }

    async fn ipsets(&self, op: Op, items: &[IpSet]) -> Result<()> {
        self.apply_items(op, items).await
    }

    async fn update_cidr_config(&self, cidrs: &ClusterCidrs) {
        debug!(?cidrs, "lab cidrs updated");
        self.state.lock().await.cidrs = cidrs.clone();
    }

    async fn init_sys(&self) {
        self.state.lock().await.init_calls += 1;
    }
}
