//! Per-backend identity, weight, and service counter.
//!
//! Each backend is represented by a [`BackendTarget`] handle over shared
//! state. Cloning a handle is cheap and every clone observes the same
//! counters, so the dispatcher and metrics readers can hold the same target.
//! The served counter is lock-free: increments use [`AtomicU64::fetch_add`]
//! and reads never block selection.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::{DispatchError, Result};

/// Runtime state for a single backend target.
#[derive(Debug, Clone)]
pub struct BackendTarget {
    state: Arc<InnerState>,
}

#[derive(Debug)]
struct InnerState {
    /// Stable, unique, non-blank identifier.
    id: String,
    /// Nominal traffic share. Written only by the owning dispatcher.
    weight: AtomicU32,
    /// Number of selections this backend has served.
    served: AtomicU64,
}

impl BackendTarget {
    /// Creates a new target with a zeroed served counter.
    ///
    /// Returns [`DispatchError::InvalidArgument`] if `id` is blank or
    /// `weight` is zero.
    pub fn new(id: impl Into<String>, weight: u32) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(DispatchError::InvalidArgument(
                "backend id must not be blank".into(),
            ));
        }
        check_weight(weight)?;

        Ok(Self {
            state: Arc::new(InnerState {
                id,
                weight: AtomicU32::new(weight),
                served: AtomicU64::new(0),
            }),
        })
    }

    /// Returns the backend identifier.
    pub fn id(&self) -> &str {
        &self.state.id
    }

    /// Returns the current weight.
    pub fn weight(&self) -> u32 {
        self.state.weight.load(Ordering::Acquire)
    }

    /// Overwrites the weight. Only the dispatcher calls this, while holding
    /// its lock, so that its cached total stays in step.
    pub(crate) fn set_weight(&self, weight: u32) {
        self.state.weight.store(weight, Ordering::Release);
    }

    /// Records one served request and returns the updated count.
    pub fn record_served(&self) -> u64 {
        self.state.served.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns the number of requests served so far.
    pub fn served_count(&self) -> u64 {
        self.state.served.load(Ordering::Acquire)
    }

    /// Returns `true` if both handles point at the same backend state.
    pub fn same_target(&self, other: &BackendTarget) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

/// Rejects a zero weight.
pub(crate) fn check_weight(weight: u32) -> Result<()> {
    if weight == 0 {
        return Err(DispatchError::InvalidArgument(
            "weight must be positive".into(),
        ));
    }
    Ok(())
}
