//! StateStore: redb-backed persistence for deploys and their tasks.
//!
//! Values are JSON-serialized into `&[u8]` columns. Deploy and task ids come
//! from sequences in the same write transaction that inserts the row, so id
//! order equals creation order. Multi-record updates (a task together with
//! its deploy, a failure cascade, a run submission that binds a reservation)
//! each commit as a single write transaction.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use hubdeploy_core::{DeployType, epoch_secs};

use crate::error::{StateError, StateResult};
use crate::lifecycle::{self, TaskEvent};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

const CASCADE_MESSAGE: &str = "cancel as previous task failed";

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(DEPLOYS).map_err(map_err!(Table))?;
        txn.open_table(DEPLOY_TASKS).map_err(map_err!(Table))?;
        txn.open_table(USER_RESOURCES).map_err(map_err!(Table))?;
        txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        txn.open_table(SPACES).map_err(map_err!(Table))?;
        txn.open_table(MODELS).map_err(map_err!(Table))?;
        txn.open_table(RUNTIME_FRAMEWORKS).map_err(map_err!(Table))?;
        txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Deploys ────────────────────────────────────────────────────

    /// Insert a new deploy, assigning its id and timestamps.
    pub fn create_deploy(&self, deploy: &Deploy) -> StateResult<Deploy> {
        let (deploy, _) = self.create_deploy_with_tasks(deploy, Vec::new())?;
        Ok(deploy)
    }

    /// Insert a deploy and its tasks atomically. Task `deploy_id`s are
    /// rewritten to the new deploy id; tasks get ids in the given order.
    pub fn create_deploy_with_tasks(
        &self,
        deploy: &Deploy,
        tasks: Vec<DeployTask>,
    ) -> StateResult<(Deploy, Vec<DeployTask>)> {
        let now = epoch_secs();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut deploy = deploy.clone();
        deploy.id = next_id(&txn, DEPLOY_SEQ)?;
        deploy.created_at = now;
        deploy.updated_at = now;

        let mut created = Vec::with_capacity(tasks.len());
        for mut task in tasks {
            task.id = next_id(&txn, TASK_SEQ)?;
            task.deploy_id = deploy.id;
            task.created_at = now;
            task.updated_at = now;
            created.push(task);
        }

        write_deploy(&txn, &deploy)?;
        for task in &created {
            write_task(&txn, task)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(deploy_id = deploy.id, tasks = created.len(), "deploy created");
        Ok((deploy, created))
    }

    pub fn get_deploy(&self, id: DeployId) -> StateResult<Option<Deploy>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYS).map_err(map_err!(Table))?;
        get_by_id(&table, id)
    }

    /// Overwrite an existing deploy. Fails if the deploy does not exist.
    pub fn update_deploy(&self, deploy: &Deploy) -> StateResult<Deploy> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut deploy = deploy.clone();
        {
            let table = txn.open_table(DEPLOYS).map_err(map_err!(Table))?;
            if get_by_id::<Deploy>(&table, deploy.id)?.is_none() {
                return Err(StateError::NotFound(format!("deploy {}", deploy.id)));
            }
        }
        deploy.updated_at = epoch_secs();
        write_deploy(&txn, &deploy)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(deploy_id = deploy.id, status = %deploy.status, "deploy updated");
        Ok(deploy)
    }

    pub fn list_deploys(&self) -> StateResult<Vec<Deploy>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// Most recent deploy of a space.
    pub fn latest_deploy_for_space(&self, space_id: u64) -> StateResult<Option<Deploy>> {
        self.find_latest_deploy(|d| d.space_id == Some(space_id))
    }

    /// Most recent deploy of a model with the given deploy type.
    pub fn latest_deploy_for_model(
        &self,
        model_id: u64,
        deploy_type: DeployType,
    ) -> StateResult<Option<Deploy>> {
        self.find_latest_deploy(|d| d.model_id == Some(model_id) && d.deploy_type == deploy_type)
    }

    fn find_latest_deploy(&self, matches: impl Fn(&Deploy) -> bool) -> StateResult<Option<Deploy>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYS).map_err(map_err!(Table))?;
        for entry in table.iter().map_err(map_err!(Read))?.rev() {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let deploy: Deploy = decode(value.value())?;
            if matches(&deploy) {
                return Ok(Some(deploy));
            }
        }
        Ok(None)
    }

    // ── Deploy tasks ───────────────────────────────────────────────

    pub fn create_deploy_task(&self, task: &DeployTask) -> StateResult<DeployTask> {
        let now = epoch_secs();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let table = txn.open_table(DEPLOYS).map_err(map_err!(Table))?;
            if get_by_id::<Deploy>(&table, task.deploy_id)?.is_none() {
                return Err(StateError::NotFound(format!("deploy {}", task.deploy_id)));
            }
        }
        let mut task = task.clone();
        task.id = next_id(&txn, TASK_SEQ)?;
        task.created_at = now;
        task.updated_at = now;
        write_task(&txn, &task)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(task_id = task.id, deploy_id = task.deploy_id, "deploy task created");
        Ok(task)
    }

    pub fn get_deploy_task(&self, id: TaskId) -> StateResult<Option<DeployTask>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOY_TASKS).map_err(map_err!(Table))?;
        get_by_id(&table, id)
    }

    /// Oldest task the scheduler should pick up.
    pub fn get_new_task_first(&self) -> StateResult<Option<DeployTask>> {
        self.first_schedulable_from(0)
    }

    /// Oldest schedulable task created after `last_id`.
    pub fn get_new_task_after(&self, last_id: TaskId) -> StateResult<Option<DeployTask>> {
        self.first_schedulable_from(last_id.saturating_add(1))
    }

    fn first_schedulable_from(&self, start: TaskId) -> StateResult<Option<DeployTask>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOY_TASKS).map_err(map_err!(Table))?;
        for entry in table.range(start..).map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let task: DeployTask = decode(value.value())?;
            if task.phase.is_schedulable() {
                return Ok(Some(task));
            }
        }
        Ok(None)
    }

    pub fn update_deploy_task(&self, task: &DeployTask) -> StateResult<DeployTask> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut task = task.clone();
        task.updated_at = epoch_secs();
        write_task(&txn, &task)?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(task)
    }

    /// Tasks of a deploy in creation order.
    pub fn get_deploy_tasks_of_deploy(&self, deploy_id: DeployId) -> StateResult<Vec<DeployTask>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOY_TASKS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let task: DeployTask = decode(value.value())?;
            if task.deploy_id == deploy_id {
                results.push(task);
            }
        }
        Ok(results)
    }

    /// Persist a deploy together with some of its tasks in one transaction.
    pub fn update_in_tx(&self, deploy: &Deploy, tasks: &[DeployTask]) -> StateResult<()> {
        let now = epoch_secs();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut deploy = deploy.clone();
        deploy.updated_at = now;
        write_deploy(&txn, &deploy)?;
        for task in tasks {
            let mut task = task.clone();
            task.updated_at = now;
            write_task(&txn, &task)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(deploy_id = deploy.id, tasks = tasks.len(), status = %deploy.status, "deploy and tasks updated");
        Ok(())
    }

    /// Apply a lifecycle event to a task and its deploy atomically.
    ///
    /// A `RunSubmitted` event on a deploy with an order detail also binds
    /// that reservation to the deploy in the same transaction; if the
    /// reservation is held by another deploy nothing is written.
    pub fn apply_transition(
        &self,
        task_id: TaskId,
        event: &TaskEvent,
    ) -> StateResult<(Deploy, DeployTask)> {
        let now = epoch_secs();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut task = read_task(&txn, task_id)?;
        let mut deploy = read_deploy(&txn, task.deploy_id)?;

        lifecycle::apply(&mut deploy, &mut task, event)?;
        deploy.updated_at = now;
        task.updated_at = now;

        if matches!(event, TaskEvent::RunSubmitted { .. }) {
            task.submitted_at = now;
            if deploy.order_detail_id != 0 {
                bind_reservation(&txn, deploy.order_detail_id, deploy.id)?;
            }
        }

        write_deploy(&txn, &deploy)?;
        write_task(&txn, &task)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            task_id,
            deploy_id = deploy.id,
            status = %deploy.status,
            task_status = task.phase.status_code(),
            "task transition applied"
        );
        Ok((deploy, task))
    }

    /// Mark a task failed and cancel every later task of the same deploy.
    ///
    /// A failing task that already reached a terminal status keeps it, and
    /// so does its deploy: the runner recorded the outcome itself. Otherwise
    /// the task fails and the deploy moves to the failure status of the
    /// task's kind with `reason` as its message. Returns the later tasks
    /// that were cancelled.
    pub fn fail_following_tasks(&self, task_id: TaskId, reason: &str) -> StateResult<Vec<DeployTask>> {
        let now = epoch_secs();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut failed = read_task(&txn, task_id)?;
        let mut deploy = read_deploy(&txn, failed.deploy_id)?;

        let siblings: Vec<DeployTask> = {
            let table = txn.open_table(DEPLOY_TASKS).map_err(map_err!(Table))?;
            let mut out = Vec::new();
            for entry in table.range(task_id.saturating_add(1)..).map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let task: DeployTask = decode(value.value())?;
                if task.deploy_id == failed.deploy_id {
                    out.push(task);
                }
            }
            out
        };

        let already_terminal = failed.phase.is_terminal();
        if !already_terminal {
            failed.phase = failed.phase.failed();
            failed.message = reason.to_string();
            failed.updated_at = now;
            write_task(&txn, &failed)?;
        }

        let mut cancelled = Vec::new();
        for mut task in siblings {
            if task.phase.is_terminal() {
                continue;
            }
            task.phase = task.phase.cancelled();
            task.message = CASCADE_MESSAGE.to_string();
            task.updated_at = now;
            write_task(&txn, &task)?;
            cancelled.push(task);
        }

        if !already_terminal {
            deploy.status = failed.phase.failed_deploy_status();
            deploy.message = reason.to_string();
            deploy.updated_at = now;
            write_deploy(&txn, &deploy)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            task_id,
            deploy_id = deploy.id,
            cancelled = cancelled.len(),
            "failure cascaded to following tasks"
        );
        Ok(cancelled)
    }

    // ── Reservations ───────────────────────────────────────────────

    pub fn put_user_resources(&self, res: &UserResources) -> StateResult<()> {
        let value = encode(res)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(USER_RESOURCES).map_err(map_err!(Table))?;
            table
                .insert(res.order_detail_id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub fn find_user_resources_by_order_detail_id(
        &self,
        order_detail_id: u64,
    ) -> StateResult<Option<UserResources>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(USER_RESOURCES).map_err(map_err!(Table))?;
        get_by_id(&table, order_detail_id)
    }

    /// Set the deploy holding a reservation; 0 releases it.
    pub fn update_deploy_id(&self, order_detail_id: u64, deploy_id: DeployId) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut res = read_user_resources(&txn, order_detail_id)?;
        res.deploy_id = deploy_id;
        write_user_resources(&txn, &res)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(order_detail_id, deploy_id, "reservation holder updated");
        Ok(())
    }

    /// Reservations on a cluster not yet held by a deploy. An empty
    /// cluster id matches every cluster.
    pub fn reserved_user_resources(&self, cluster_id: &str) -> StateResult<Vec<UserResources>> {
        let now = epoch_secs();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(USER_RESOURCES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let res: UserResources = decode(value.value())?;
            if res.is_pending_reservation(now)
                && (cluster_id.is_empty() || res.cluster_id == cluster_id)
            {
                results.push(res);
            }
        }
        Ok(results)
    }

    // ── Clusters ───────────────────────────────────────────────────

    pub fn put_cluster_info(&self, info: &ClusterInfo) -> StateResult<()> {
        let value = encode(info)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            table
                .insert(info.cluster_id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub fn cluster_info_by_cluster_id(&self, cluster_id: &str) -> StateResult<Option<ClusterInfo>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        match table.get(cluster_id).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn list_cluster_infos(&self) -> StateResult<Vec<ClusterInfo>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    // ── Repositories ───────────────────────────────────────────────

    pub fn put_space(&self, space: &Space) -> StateResult<()> {
        self.put_by_id(SPACES, space.id, space)
    }

    pub fn get_space(&self, id: u64) -> StateResult<Option<Space>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SPACES).map_err(map_err!(Table))?;
        get_by_id(&table, id)
    }

    pub fn put_model(&self, model: &Model) -> StateResult<()> {
        self.put_by_id(MODELS, model.id, model)
    }

    pub fn get_model(&self, id: u64) -> StateResult<Option<Model>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(MODELS).map_err(map_err!(Table))?;
        get_by_id(&table, id)
    }

    pub fn put_runtime_framework(&self, framework: &RuntimeFramework) -> StateResult<()> {
        let value = encode(framework)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RUNTIME_FRAMEWORKS).map_err(map_err!(Table))?;
            table
                .insert(framework.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub fn find_enabled_runtime_framework(&self, name: &str) -> StateResult<Option<RuntimeFramework>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RUNTIME_FRAMEWORKS).map_err(map_err!(Table))?;
        let framework: Option<RuntimeFramework> = match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => Some(decode(guard.value())?),
            None => None,
        };
        Ok(framework.filter(|f| f.enabled))
    }

    fn put_by_id<T: Serialize>(
        &self,
        def: TableDefinition<'static, u64, &'static [u8]>,
        id: u64,
        value: &T,
    ) -> StateResult<()> {
        let value = encode(value)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table.insert(id, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

// ── Transaction helpers ────────────────────────────────────────────

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

fn get_by_id<T: DeserializeOwned>(
    table: &impl ReadableTable<u64, &'static [u8]>,
    id: u64,
) -> StateResult<Option<T>> {
    match table.get(id).map_err(map_err!(Read))? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

/// Bump and return a sequence inside the caller's transaction.
fn next_id(txn: &WriteTransaction, seq: &str) -> StateResult<u64> {
    let mut table = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
    let current = table
        .get(seq)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value())
        .unwrap_or(0);
    table.insert(seq, current + 1).map_err(map_err!(Write))?;
    Ok(current + 1)
}

fn read_deploy(txn: &WriteTransaction, id: DeployId) -> StateResult<Deploy> {
    let table = txn.open_table(DEPLOYS).map_err(map_err!(Table))?;
    get_by_id(&table, id)?.ok_or_else(|| StateError::NotFound(format!("deploy {id}")))
}

fn read_task(txn: &WriteTransaction, id: TaskId) -> StateResult<DeployTask> {
    let table = txn.open_table(DEPLOY_TASKS).map_err(map_err!(Table))?;
    get_by_id(&table, id)?.ok_or_else(|| StateError::NotFound(format!("deploy task {id}")))
}

fn read_user_resources(txn: &WriteTransaction, order_detail_id: u64) -> StateResult<UserResources> {
    let table = txn.open_table(USER_RESOURCES).map_err(map_err!(Table))?;
    get_by_id(&table, order_detail_id)?
        .ok_or_else(|| StateError::NotFound(format!("user resources for order detail {order_detail_id}")))
}

fn write_deploy(txn: &WriteTransaction, deploy: &Deploy) -> StateResult<()> {
    let value = encode(deploy)?;
    let mut table = txn.open_table(DEPLOYS).map_err(map_err!(Table))?;
    table.insert(deploy.id, value.as_slice()).map_err(map_err!(Write))?;
    Ok(())
}

fn write_task(txn: &WriteTransaction, task: &DeployTask) -> StateResult<()> {
    let value = encode(task)?;
    let mut table = txn.open_table(DEPLOY_TASKS).map_err(map_err!(Table))?;
    table.insert(task.id, value.as_slice()).map_err(map_err!(Write))?;
    Ok(())
}

fn write_user_resources(txn: &WriteTransaction, res: &UserResources) -> StateResult<()> {
    let value = encode(res)?;
    let mut table = txn.open_table(USER_RESOURCES).map_err(map_err!(Table))?;
    table
        .insert(res.order_detail_id, value.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}

fn bind_reservation(txn: &WriteTransaction, order_detail_id: u64, deploy_id: DeployId) -> StateResult<()> {
    let mut res = read_user_resources(txn, order_detail_id)?;
    if res.deploy_id != 0 && res.deploy_id != deploy_id {
        return Err(StateError::OrderDetailInUse(order_detail_id));
    }
    res.deploy_id = deploy_id;
    write_user_resources(txn, &res)
}
