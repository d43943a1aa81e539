//! Smooth weighted round-robin dispatcher.
//!
//! Distributes selections across a fixed, ordered set of backends in
//! proportion to their weights. Every call to [`WeightedDispatcher::select`]
//! adds each node's weight to its running credit, picks the node with the
//! highest credit (earliest node wins a tie), and charges the winner the
//! pool's total weight. For weights `{A: 5, B: 3, C: 2}` this yields
//! `A B C A A B A C B A` rather than five `A`s in a row, and after any
//! multiple of the total weight every credit returns to zero.
//!
//! Selection and weight updates share one mutex over the whole node list,
//! since each selection reads and writes every node's credit. The served
//! counters live on the [`BackendTarget`]s, outside that lock.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::backend::check_weight;
use crate::{BackendTarget, DispatchError, Result};

/// A weighted dispatcher over an ordered pool of [`BackendTarget`]s.
///
/// Cloning yields another handle to the same pool, so a single dispatcher
/// can be shared across request handlers and the administrative path.
#[derive(Debug, Clone)]
pub struct WeightedDispatcher {
    pool: Arc<Mutex<NodePool>>,
}

/// One row of [`WeightedDispatcher::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendSnapshot {
    pub backend_id: String,
    pub weight: u32,
    pub served_count: u64,
}

#[derive(Debug)]
struct NodePool {
    /// Insertion-ordered nodes. Order only decides ties.
    nodes: Vec<DispatchNode>,
    /// Sum of every node's `effective_weight`.
    total_weight: u64,
}

#[derive(Debug)]
struct DispatchNode {
    backend: BackendTarget,
    effective_weight: u32,
    running_credit: i64,
}

impl DispatchNode {
    fn new(backend: BackendTarget) -> Self {
        Self {
            effective_weight: backend.weight(),
            backend,
            running_credit: 0,
        }
    }
}

impl NodePool {
    fn new(nodes: Vec<DispatchNode>) -> Self {
        let mut pool = Self {
            nodes,
            total_weight: 0,
        };
        pool.recalculate_total_weight();
        pool
    }

    fn recalculate_total_weight(&mut self) {
        self.total_weight = self
            .nodes
            .iter()
            .map(|node| u64::from(node.effective_weight))
            .sum();
    }

    fn reset_credits(&mut self) {
        self.nodes
            .iter_mut()
            .for_each(|node| node.running_credit = 0);
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|node| node.backend.id() == id)
    }

    fn rows(&self) -> Vec<BackendSnapshot> {
        self.nodes
            .iter()
            .map(|node| BackendSnapshot {
                backend_id: node.backend.id().to_owned(),
                weight: node.effective_weight,
                served_count: node.backend.served_count(),
            })
            .collect()
    }

    fn select(&mut self) -> Result<BackendTarget> {
        if self.nodes.is_empty() {
            return Err(DispatchError::InvalidState(
                "no backend nodes configured".into(),
            ));
        }

        for node in &mut self.nodes {
            node.running_credit += i64::from(node.effective_weight);
        }

        let mut best = 0;
        for idx in 1..self.nodes.len() {
            if self.nodes[idx].running_credit > self.nodes[best].running_credit {
                best = idx;
            }
        }

        let winner = &mut self.nodes[best];
        winner.running_credit -= self.total_weight as i64;
        Ok(winner.backend.clone())
    }
}

impl WeightedDispatcher {
    /// Creates a dispatcher over `targets`, preserving their order.
    ///
    /// Returns [`DispatchError::InvalidArgument`] if `targets` is empty or
    /// two targets share an identifier.
    pub fn new(targets: Vec<BackendTarget>) -> Result<Self> {
        if targets.is_empty() {
            return Err(DispatchError::InvalidArgument(
                "backends list must not be empty".into(),
            ));
        }

        let mut nodes: Vec<DispatchNode> = Vec::with_capacity(targets.len());
        for target in targets {
            if nodes.iter().any(|node| node.backend.id() == target.id()) {
                return Err(DispatchError::InvalidArgument(format!(
                    "duplicate backend id: {}",
                    target.id()
                )));
            }
            nodes.push(DispatchNode::new(target));
        }

        Ok(Self {
            pool: Arc::new(Mutex::new(NodePool::new(nodes))),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, NodePool>> {
        self.pool
            .lock()
            .map_err(|_| DispatchError::InvalidState("dispatcher lock poisoned".into()))
    }

    /// Selects the backend that should receive the next request.
    ///
    /// The caller is expected to call [`BackendTarget::record_served`] on
    /// the returned target once it has been used.
    pub fn select(&self) -> Result<BackendTarget> {
        self.lock()?.select()
    }

    /// Sets the weight of the backend identified by `id`.
    ///
    /// On success the total weight is recomputed and every node's running
    /// credit is reset to zero, so the new ratio applies from the very next
    /// selection. On failure nothing changes.
    pub fn update_weight(&self, id: &str, new_weight: u32) -> Result<()> {
        self.update_weight_and_snapshot(id, new_weight).map(|_| ())
    }

    /// Same as [`update_weight`](Self::update_weight), but also returns the
    /// snapshot taken under the same lock acquisition, so the rows reflect
    /// exactly this update and no later one.
    pub fn update_weight_and_snapshot(
        &self,
        id: &str,
        new_weight: u32,
    ) -> Result<Vec<BackendSnapshot>> {
        if id.trim().is_empty() {
            return Err(DispatchError::InvalidArgument(
                "backend id must not be blank".into(),
            ));
        }
        check_weight(new_weight)?;

        let mut pool = self.lock()?;
        let idx = pool
            .position(id)
            .ok_or_else(|| DispatchError::NotFound(id.to_owned()))?;

        let node = &mut pool.nodes[idx];
        node.effective_weight = new_weight;
        node.backend.set_weight(new_weight);

        pool.recalculate_total_weight();
        pool.reset_credits();
        Ok(pool.rows())
    }

    /// Appends a backend to the end of the pool.
    ///
    /// Like a weight update this changes every node's share, so all running
    /// credits are reset. Returns [`DispatchError::InvalidArgument`] if a
    /// backend with the same identifier is already present.
    pub fn add_backend(&self, target: BackendTarget) -> Result<()> {
        let mut pool = self.lock()?;
        if pool.position(target.id()).is_some() {
            return Err(DispatchError::InvalidArgument(format!(
                "duplicate backend id: {}",
                target.id()
            )));
        }

        pool.nodes.push(DispatchNode::new(target));
        pool.recalculate_total_weight();
        pool.reset_credits();
        Ok(())
    }

    /// Returns `(id, weight, served_count)` for every backend, in pool
    /// order, as of a single instant.
    pub fn snapshot(&self) -> Result<Vec<BackendSnapshot>> {
        Ok(self.lock()?.rows())
    }

    /// Returns handles to every backend, in pool order.
    pub fn backends(&self) -> Result<Vec<BackendTarget>> {
        let pool = self.lock()?;
        Ok(pool.nodes.iter().map(|node| node.backend.clone()).collect())
    }

    /// Returns the current sum of all weights.
    pub fn total_weight(&self) -> Result<u64> {
        Ok(self.lock()?.total_weight)
    }

    /// Returns the number of backends in the pool.
    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.nodes.len())
    }

    /// Returns `true` if the pool holds no backends.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
