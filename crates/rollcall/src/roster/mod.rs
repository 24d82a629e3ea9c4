//! Node roster (coordinator role).
//!
//! The coordinator's view of connected data nodes, kept in step with the
//! membership table: a paginated scan at startup, then change
//! notifications routed through [`NotificationDispatcher`].
//!
//! Nodes are keyed by their membership identifier. Each node also keeps
//! the row's monotonic index, which only orders listings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rollcall_common::{
    MembershipRow, NodeDescriptor, NodeStatus, RollcallError, RollcallResult,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

mod dispatch;
mod postgres;

pub use dispatch::NotificationDispatcher;
pub use postgres::{NotificationListener, PgMembership, PgNodeConnector};

/// Reads the membership table
#[async_trait]
pub trait MembershipSource: Send + Sync {
    /// Rows ordered by index, `limit` rows starting at `offset`
    async fn fetch_page(&self, offset: i64, limit: i64) -> RollcallResult<Vec<MembershipRow>>;

    /// A single row by identifier
    async fn fetch(&self, id: &str) -> RollcallResult<Option<MembershipRow>>;
}

/// An open connection to a data node
#[async_trait]
pub trait NodeConnection: Send + Sync {
    async fn close(&mut self);
    fn is_closed(&self) -> bool;
}

/// Opens connections to data nodes
#[async_trait]
pub trait NodeConnector: Send + Sync {
    async fn connect(&self, descriptor: &NodeDescriptor) -> RollcallResult<Box<dyn NodeConnection>>;
}

/// Per-node synchronization run after a node joins the roster
#[async_trait]
pub trait BootstrapSync: Send + Sync {
    async fn sync(&self, node_id: &str, descriptor: &NodeDescriptor) -> RollcallResult<()>;
}

/// Default hook: nothing to synchronize
pub struct LoggingSync;

#[async_trait]
impl BootstrapSync for LoggingSync {
    async fn sync(&self, node_id: &str, descriptor: &NodeDescriptor) -> RollcallResult<()> {
        tracing::info!(node = %node_id, url = %descriptor.redacted_url(), "Bootstrap sync (no-op)");
        Ok(())
    }
}

/// A connected data node
pub struct Node {
    pub id: String,
    pub mode: i32,
    pub descriptor: NodeDescriptor,
    /// Resolved connection URL, credentials redacted
    pub url: String,
    pub status: NodeStatus,
    /// Membership row index
    pub index: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    connection: Box<dyn NodeConnection>,
}

impl Node {
    fn new(row: MembershipRow, descriptor: NodeDescriptor, connection: Box<dyn NodeConnection>) -> Self {
        Self {
            url: descriptor.redacted_url(),
            id: row.id,
            mode: row.mode,
            descriptor,
            status: NodeStatus::Idle,
            index: row.index,
            created_at: row.created_at,
            updated_at: row.updated_at,
            connection,
        }
    }

    fn transition(&mut self, next: NodeStatus) -> RollcallResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(RollcallError::InvalidTransition {
                node: self.id.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    fn view(&self) -> NodeView {
        NodeView {
            id: self.id.clone(),
            mode: self.mode,
            url: self.url.clone(),
            status: self.status,
            index: self.index,
            connected: !self.connection.is_closed(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Read-only snapshot of a roster node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeView {
    pub id: String,
    pub mode: i32,
    pub url: String,
    pub status: NodeStatus,
    pub index: i64,
    pub connected: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// In-memory roster of connected data nodes
pub struct Roster {
    nodes: RwLock<IndexMap<String, Node>>,
    /// Serializes load, refresh and unload per node id
    node_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    source: Arc<dyn MembershipSource>,
    connector: Arc<dyn NodeConnector>,
    sync: Arc<dyn BootstrapSync>,
    page_size: i64,
}

impl Roster {
    pub fn new(
        source: Arc<dyn MembershipSource>,
        connector: Arc<dyn NodeConnector>,
        sync: Arc<dyn BootstrapSync>,
        page_size: i64,
    ) -> Self {
        Self {
            nodes: RwLock::new(IndexMap::new()),
            node_locks: Mutex::new(HashMap::new()),
            source,
            connector,
            sync,
            page_size: page_size.max(1),
        }
    }

    /// Load every membership row, page by page, until an empty page.
    ///
    /// Each row is re-read under its node lock before loading, so a row
    /// deleted while the scan runs is not loaded back. Source failures
    /// abort the scan; a node that fails to connect is logged and skipped.
    pub async fn bootstrap(self: &Arc<Self>) -> RollcallResult<usize> {
        let mut offset = 0;
        let mut loaded = 0;

        loop {
            let page = self.source.fetch_page(offset, self.page_size).await?;
            if page.is_empty() {
                break;
            }
            offset += page.len() as i64;

            for row in page {
                let _guard = self.lock_node(&row.id).await;
                let current = match self.source.fetch(&row.id).await? {
                    Some(current) => current,
                    None => {
                        tracing::debug!(node = %row.id, "Membership row gone before load");
                        continue;
                    }
                };
                match self.load_locked(current).await {
                    Ok(()) => loaded += 1,
                    Err(e) => tracing::warn!(node = %row.id, error = %e, "Skipping node during bootstrap"),
                }
            }
        }

        tracing::info!(loaded, "📋 Roster bootstrapped");
        Ok(loaded)
    }

    /// Add a node from its membership row, or refresh an existing entry.
    ///
    /// New nodes are connected, marked Active and handed to the bootstrap
    /// sync hook in the background. For a known node the row's mode and
    /// index are refreshed; if its connection descriptor changed it is
    /// reconnected.
    pub async fn load_node(self: &Arc<Self>, row: MembershipRow) -> RollcallResult<()> {
        let _guard = self.lock_node(&row.id).await;
        self.load_locked(row).await
    }

    async fn load_locked(self: &Arc<Self>, row: MembershipRow) -> RollcallResult<()> {
        let descriptor = NodeDescriptor::from_payload(&row.payload)?;

        {
            let mut nodes = self.nodes.write().await;
            if let Some(node) = nodes.get_mut(&row.id) {
                node.mode = row.mode;
                node.index = row.index;
                node.updated_at = row.updated_at;
                if node.descriptor == descriptor {
                    tracing::debug!(node = %row.id, "Roster entry refreshed");
                    return Ok(());
                }
            }
        }

        let connection = match self.connector.connect(&descriptor).await {
            Ok(connection) => connection,
            Err(e) => {
                self.mark_error(&row.id).await;
                return Err(e);
            }
        };

        let id = row.id.clone();
        let mut node = Node::new(row, descriptor.clone(), connection);
        node.transition(NodeStatus::Active)?;
        let url = node.url.clone();

        let replaced = self.nodes.write().await.insert(id.clone(), node);
        match replaced {
            Some(mut old) => {
                old.connection.close().await;
                tracing::info!(node = %id, url = %url, "🔌 Node reconnected");
            }
            None => tracing::info!(node = %id, url = %url, "🔌 Node loaded"),
        }

        let roster = Arc::clone(self);
        tokio::spawn(async move {
            roster.run_bootstrap_sync(&id, &descriptor).await;
        });

        Ok(())
    }

    /// Re-read a node's row and load it; a vanished row unloads the node
    pub async fn refresh(self: &Arc<Self>, id: &str) -> RollcallResult<()> {
        let _guard = self.lock_node(id).await;
        match self.source.fetch(id).await? {
            Some(row) => self.load_locked(row).await,
            None if self.contains(id).await => {
                tracing::debug!(node = %id, "Membership row gone; unloading");
                self.unload_locked(id).await
            }
            None => Err(RollcallError::NotFound(format!("membership row {id}"))),
        }
    }

    /// Mark a node Idle, close its connection and drop it from the roster
    pub async fn unload_node(&self, id: &str) -> RollcallResult<()> {
        let guard = self.lock_node(id).await;
        let result = self.unload_locked(id).await;
        drop(guard);
        self.forget_lock(id).await;
        result
    }

    async fn unload_locked(&self, id: &str) -> RollcallResult<()> {
        let mut node = self
            .nodes
            .write()
            .await
            .shift_remove(id)
            .ok_or_else(|| RollcallError::NotFound(format!("node {id}")))?;

        // Idle is reachable from every status
        node.status = NodeStatus::Idle;
        node.connection.close().await;

        tracing::info!(node = %id, "🔌 Node unloaded");
        Ok(())
    }

    async fn lock_node(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .node_locks
            .lock()
            .await
            .entry(id.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Drop the lock entry of an unloaded node nobody is waiting on
    async fn forget_lock(&self, id: &str) {
        let mut locks = self.node_locks.lock().await;
        if locks.get(id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(id);
        }
    }

    /// Move a node to `status`, enforcing the allowed transitions
    pub async fn set_status(&self, id: &str, status: NodeStatus) -> RollcallResult<()> {
        let mut nodes = self.nodes.write().await;
        let node = nodes
            .get_mut(id)
            .ok_or_else(|| RollcallError::NotFound(format!("node {id}")))?;
        node.transition(status)
    }

    async fn mark_error(&self, id: &str) {
        if let Some(node) = self.nodes.write().await.get_mut(id) {
            // Error is reachable from every status
            node.status = NodeStatus::Error;
        }
    }

    async fn run_bootstrap_sync(&self, id: &str, descriptor: &NodeDescriptor) {
        if let Err(e) = self.set_status(id, NodeStatus::Sync).await {
            tracing::debug!(node = %id, error = %e, "Bootstrap sync skipped");
            return;
        }

        match self.sync.sync(id, descriptor).await {
            Ok(()) => {
                if let Err(e) = self.set_status(id, NodeStatus::Active).await {
                    tracing::debug!(node = %id, error = %e, "Node changed during bootstrap sync");
                }
            }
            Err(e) => {
                tracing::warn!(node = %id, error = %e, "Bootstrap sync failed");
                self.mark_error(id).await;
            }
        }
    }

    pub async fn get(&self, id: &str) -> RollcallResult<NodeView> {
        self.nodes
            .read()
            .await
            .get(id)
            .map(Node::view)
            .ok_or_else(|| RollcallError::NotFound(format!("node {id}")))
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.nodes.read().await.contains_key(id)
    }

    /// All nodes, in membership index order
    pub async fn list(&self) -> Vec<NodeView> {
        let mut views: Vec<_> = self.nodes.read().await.values().map(Node::view).collect();
        views.sort_by_key(|v| v.index);
        views
    }

    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory collaborators for roster tests.

    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    pub struct MemoryMembership {
        rows: StdMutex<BTreeMap<String, MembershipRow>>,
        pub page_calls: AtomicUsize,
    }

    impl MemoryMembership {
        pub fn upsert(&self, row: MembershipRow) {
            self.rows.lock().unwrap().insert(row.id.clone(), row);
        }

        pub fn remove(&self, id: &str) {
            self.rows.lock().unwrap().remove(id);
        }
    }

    #[async_trait]
    impl MembershipSource for MemoryMembership {
        async fn fetch_page(&self, offset: i64, limit: i64) -> RollcallResult<Vec<MembershipRow>> {
            self.page_calls.fetch_add(1, Ordering::SeqCst);
            let mut rows: Vec<_> = self.rows.lock().unwrap().values().cloned().collect();
            rows.sort_by_key(|r| r.index);
            Ok(rows
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .collect())
        }

        async fn fetch(&self, id: &str) -> RollcallResult<Option<MembershipRow>> {
            Ok(self.rows.lock().unwrap().get(id).cloned())
        }
    }

    pub struct FakeConnection {
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl NodeConnection for FakeConnection {
        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    /// Hands out connections and remembers their close flags, by host
    #[derive(Default)]
    pub struct FakeConnector {
        opened: StdMutex<Vec<(String, Arc<AtomicBool>)>>,
        pub refuse_host: StdMutex<Option<String>>,
    }

    impl FakeConnector {
        pub fn closed_flags(&self, host: &str) -> Vec<bool> {
            self.opened
                .lock()
                .unwrap()
                .iter()
                .filter(|(h, _)| h == host)
                .map(|(_, flag)| flag.load(Ordering::SeqCst))
                .collect()
        }

        pub fn opened(&self) -> usize {
            self.opened.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl NodeConnector for FakeConnector {
        async fn connect(&self, d: &NodeDescriptor) -> RollcallResult<Box<dyn NodeConnection>> {
            if self.refuse_host.lock().unwrap().as_deref() == Some(d.host.as_str()) {
                return Err(RollcallError::Connection(format!("{} refused", d.host)));
            }
            let closed = Arc::new(AtomicBool::new(false));
            self.opened
                .lock()
                .unwrap()
                .push((d.host.clone(), closed.clone()));
            Ok(Box::new(FakeConnection { closed }))
        }
    }

    /// Holds connects to one host until released
    pub struct GatedConnector {
        pub inner: FakeConnector,
        host: String,
        pub entered: tokio::sync::Notify,
        release: tokio::sync::Semaphore,
    }

    impl GatedConnector {
        pub fn new(host: &str) -> Self {
            Self {
                inner: FakeConnector::default(),
                host: host.to_string(),
                entered: tokio::sync::Notify::new(),
                release: tokio::sync::Semaphore::new(0),
            }
        }

        pub fn open(&self) {
            self.release.add_permits(1);
        }
    }

    #[async_trait]
    impl NodeConnector for GatedConnector {
        async fn connect(&self, d: &NodeDescriptor) -> RollcallResult<Box<dyn NodeConnection>> {
            if d.host == self.host {
                self.entered.notify_one();
                self.release.acquire().await.unwrap().forget();
            }
            self.inner.connect(d).await
        }
    }

    pub fn row(id: &str, index: i64, host: &str) -> MembershipRow {
        let now = Utc::now();
        MembershipRow {
            id: id.to_string(),
            mode: 1,
            payload: serde_json::json!({
                "driver": "postgres",
                "host": host,
                "port": 5432,
                "database": "shard",
                "user": "app",
                "password": "pw"
            }),
            index,
            created_at: now,
            updated_at: now,
        }
    }

    /// Counts finished bootstrap syncs
    #[derive(Default)]
    pub struct CountingSync {
        pub done: AtomicUsize,
    }

    #[async_trait]
    impl BootstrapSync for CountingSync {
        async fn sync(&self, _node_id: &str, _descriptor: &NodeDescriptor) -> RollcallResult<()> {
            self.done.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    pub fn roster(
        source: Arc<MemoryMembership>,
        connector: Arc<FakeConnector>,
        page_size: i64,
    ) -> Arc<Roster> {
        Arc::new(Roster::new(source, connector, Arc::new(LoggingSync), page_size))
    }

    pub fn counting_roster(
        source: Arc<MemoryMembership>,
        connector: Arc<FakeConnector>,
    ) -> (Arc<Roster>, Arc<CountingSync>) {
        let sync = Arc::new(CountingSync::default());
        let roster = Arc::new(Roster::new(source, connector, sync.clone(), 30));
        (roster, sync)
    }

    /// Wait until `count` bootstrap syncs finished and `id` is Active again
    pub async fn settled(roster: &Arc<Roster>, sync: &Arc<CountingSync>, id: &str, count: usize) {
        eventually(|| {
            let roster = roster.clone();
            let sync = sync.clone();
            let id = id.to_string();
            async move {
                sync.done.load(Ordering::SeqCst) >= count
                    && matches!(roster.get(&id).await, Ok(v) if v.status == NodeStatus::Active)
            }
        })
        .await;
    }

    /// Poll `check` until it passes or two seconds elapse
    pub async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_bootstrap_pages_until_empty() {
        let source = Arc::new(MemoryMembership::default());
        for i in 0..7 {
            source.upsert(row(&format!("n{i}"), i, &format!("10.0.0.{i}")));
        }
        let connector = Arc::new(FakeConnector::default());
        let roster = roster(source.clone(), connector.clone(), 3);

        let loaded = roster.bootstrap().await.unwrap();
        assert_eq!(loaded, 7);
        assert_eq!(roster.len().await, 7);
        // 3 + 3 + 1 + empty page
        assert_eq!(source.page_calls.load(Ordering::SeqCst), 4);

        let ids: Vec<_> = roster.list().await.into_iter().map(|v| v.id).collect();
        assert_eq!(ids, vec!["n0", "n1", "n2", "n3", "n4", "n5", "n6"]);
    }

    #[tokio::test]
    async fn test_bootstrap_skips_unreachable_node() {
        let source = Arc::new(MemoryMembership::default());
        source.upsert(row("a", 1, "10.0.0.1"));
        source.upsert(row("b", 2, "10.0.0.2"));
        let connector = Arc::new(FakeConnector::default());
        *connector.refuse_host.lock().unwrap() = Some("10.0.0.2".into());
        let roster = roster(source, connector, 30);

        assert_eq!(roster.bootstrap().await.unwrap(), 1);
        assert!(roster.contains("a").await);
        assert!(!roster.contains("b").await);
    }

    #[tokio::test]
    async fn test_load_node_settles_active_after_sync() {
        let source = Arc::new(MemoryMembership::default());
        let connector = Arc::new(FakeConnector::default());
        let (roster, sync) = counting_roster(source, connector);

        roster.load_node(row("a", 1, "10.0.0.1")).await.unwrap();
        let view = roster.get("a").await.unwrap();
        assert!(matches!(view.status, NodeStatus::Active | NodeStatus::Sync));
        assert!(view.connected);
        assert!(!view.url.contains("pw"));

        settled(&roster, &sync, "a", 1).await;
    }

    #[tokio::test]
    async fn test_unload_closes_connection_and_forgets_node() {
        let source = Arc::new(MemoryMembership::default());
        let connector = Arc::new(FakeConnector::default());
        let roster = roster(source, connector.clone(), 30);

        roster.load_node(row("a", 1, "10.0.0.1")).await.unwrap();
        roster.load_node(row("b", 2, "10.0.0.2")).await.unwrap();
        roster.load_node(row("c", 3, "10.0.0.3")).await.unwrap();

        roster.unload_node("b").await.unwrap();

        assert!(matches!(roster.get("b").await, Err(RollcallError::NotFound(_))));
        assert_eq!(connector.closed_flags("10.0.0.2"), vec![true]);
        assert_eq!(connector.closed_flags("10.0.0.3"), vec![false]);

        // Entries after the removed one are still addressable by id
        assert_eq!(roster.get("c").await.unwrap().index, 3);
        assert!(matches!(
            roster.unload_node("b").await,
            Err(RollcallError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reload_with_same_descriptor_keeps_connection() {
        let source = Arc::new(MemoryMembership::default());
        let connector = Arc::new(FakeConnector::default());
        let roster = roster(source, connector.clone(), 30);

        roster.load_node(row("a", 1, "10.0.0.1")).await.unwrap();
        let mut updated = row("a", 1, "10.0.0.1");
        updated.mode = 2;
        roster.load_node(updated).await.unwrap();

        assert_eq!(connector.opened(), 1);
        assert_eq!(roster.get("a").await.unwrap().mode, 2);
    }

    #[tokio::test]
    async fn test_changed_descriptor_reconnects() {
        let source = Arc::new(MemoryMembership::default());
        let connector = Arc::new(FakeConnector::default());
        let roster = roster(source, connector.clone(), 30);

        roster.load_node(row("a", 1, "10.0.0.1")).await.unwrap();
        roster.load_node(row("a", 1, "10.0.0.9")).await.unwrap();

        assert_eq!(connector.closed_flags("10.0.0.1"), vec![true]);
        assert_eq!(connector.closed_flags("10.0.0.9"), vec![false]);
        assert_eq!(roster.len().await, 1);
        assert!(roster.get("a").await.unwrap().url.contains("10.0.0.9"));
    }

    #[tokio::test]
    async fn test_bad_descriptor_is_configuration_error() {
        let source = Arc::new(MemoryMembership::default());
        let connector = Arc::new(FakeConnector::default());
        let roster = roster(source, connector, 30);

        let mut bad = row("x", 1, "h");
        bad.payload = serde_json::json!({ "driver": "postgres" });
        assert!(matches!(
            roster.load_node(bad).await,
            Err(RollcallError::Configuration(_))
        ));
        assert!(!roster.contains("x").await);
    }

    #[tokio::test]
    async fn test_set_status_enforces_transitions() {
        let source = Arc::new(MemoryMembership::default());
        let connector = Arc::new(FakeConnector::default());
        let (roster, sync) = counting_roster(source, connector);

        roster.load_node(row("a", 1, "10.0.0.1")).await.unwrap();
        settled(&roster, &sync, "a", 1).await;

        roster.set_status("a", NodeStatus::Working).await.unwrap();
        assert!(matches!(
            roster.set_status("a", NodeStatus::Sync).await,
            Err(RollcallError::InvalidTransition { .. })
        ));
        roster.set_status("a", NodeStatus::Error).await.unwrap();
        assert!(roster.set_status("a", NodeStatus::Active).await.is_err());
        assert!(matches!(
            roster.set_status("zzz", NodeStatus::Idle).await,
            Err(RollcallError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_during_bootstrap_connect_wins() {
        let source = Arc::new(MemoryMembership::default());
        source.upsert(row("x", 1, "10.0.0.7"));
        let connector = Arc::new(GatedConnector::new("10.0.0.7"));
        let roster = Arc::new(Roster::new(
            source.clone(),
            connector.clone(),
            Arc::new(LoggingSync),
            30,
        ));
        let dispatcher = NotificationDispatcher::new(roster.clone(), 8, std::time::Duration::from_secs(5));

        let scan = {
            let roster = roster.clone();
            tokio::spawn(async move { roster.bootstrap().await })
        };
        connector.entered.notified().await;

        source.remove("x");
        dispatcher
            .dispatch(rollcall_common::NodeNotification {
                action: rollcall_common::Action::Delete,
                node: "x".to_string(),
            })
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        connector.open();

        assert_eq!(scan.await.unwrap().unwrap(), 1);
        let c = connector.clone();
        eventually(|| {
            let c = c.clone();
            async move { c.inner.closed_flags("10.0.0.7") == vec![true] }
        })
        .await;
        assert!(!roster.contains("x").await);
    }

    #[tokio::test]
    async fn test_bootstrap_skips_row_deleted_after_page_read() {
        let source = Arc::new(MemoryMembership::default());
        source.upsert(row("a", 1, "10.0.0.1"));
        source.upsert(row("x", 2, "10.0.0.7"));
        let connector = Arc::new(GatedConnector::new("10.0.0.1"));
        let roster = Arc::new(Roster::new(
            source.clone(),
            connector.clone(),
            Arc::new(LoggingSync),
            30,
        ));

        let scan = {
            let roster = roster.clone();
            tokio::spawn(async move { roster.bootstrap().await })
        };
        // The page holding x is already read; x goes away and its delete finds nothing
        connector.entered.notified().await;
        source.remove("x");
        assert!(matches!(
            roster.unload_node("x").await,
            Err(RollcallError::NotFound(_))
        ));
        connector.open();

        assert_eq!(scan.await.unwrap().unwrap(), 1);
        assert!(roster.contains("a").await);
        assert!(!roster.contains("x").await);
        assert!(connector.inner.closed_flags("10.0.0.7").is_empty());
    }

    #[tokio::test]
    async fn test_refresh_of_vanished_row_unloads() {
        let source = Arc::new(MemoryMembership::default());
        source.upsert(row("a", 1, "10.0.0.1"));
        let connector = Arc::new(FakeConnector::default());
        let roster = roster(source.clone(), connector.clone(), 30);

        roster.refresh("a").await.unwrap();
        assert!(roster.contains("a").await);

        source.remove("a");
        roster.refresh("a").await.unwrap();
        assert!(!roster.contains("a").await);
        assert_eq!(connector.closed_flags("10.0.0.1"), vec![true]);
    }
}
