//! Reserved-resource ledger.
//!
//! A reservation ties an order detail to at most one deploy. New deploys
//! are refused while the order detail is held; stopping or purging a
//! deploy hands the reservation back. Binding happens in the store, in
//! the same transaction that marks the run task submitted.

use hubdeploy_core::NodeResourceInfo;
use hubdeploy_placement::apply_reservations;
use hubdeploy_state::{DeployId, StateStore};
use tracing::{debug, info};

use crate::error::{DeployerError, DeployerResult};

#[derive(Clone)]
pub struct Ledger {
    store: StateStore,
}

impl Ledger {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Refuse an order detail held by a deploy other than `deploy_id`.
    /// Pass 0 for a deploy that does not exist yet. Order detail 0 means
    /// no reservation and always passes.
    pub fn check_order_detail(&self, order_detail_id: u64, deploy_id: DeployId) -> DeployerResult<()> {
        if order_detail_id == 0 {
            return Ok(());
        }
        let res = self
            .store
            .find_user_resources_by_order_detail_id(order_detail_id)?
            .ok_or(DeployerError::OrderDetailNotFound(order_detail_id))?;
        if res.deploy_id != 0 && res.deploy_id != deploy_id {
            debug!(order_detail_id, holder = res.deploy_id, "order detail already used");
            return Err(DeployerError::OrderDetailInUse(order_detail_id));
        }
        Ok(())
    }

    /// Free the reservation so a new deploy can take it.
    pub fn release(&self, order_detail_id: u64) -> DeployerResult<()> {
        if order_detail_id == 0 {
            return Ok(());
        }
        if self
            .store
            .find_user_resources_by_order_detail_id(order_detail_id)?
            .is_none()
        {
            return Err(DeployerError::OrderDetailNotFound(order_detail_id));
        }
        self.store.update_deploy_id(order_detail_id, 0)?;
        info!(order_detail_id, "reservation released");
        Ok(())
    }

    /// Take accelerators booked by pending reservations on `cluster_id`
    /// off the nodes.
    pub fn reserve_nodes(&self, cluster_id: &str, nodes: &mut [NodeResourceInfo]) -> DeployerResult<()> {
        let reservations = self.store.reserved_user_resources(cluster_id)?;
        apply_reservations(nodes, &reservations);
        Ok(())
    }
}
