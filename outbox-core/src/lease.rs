//! Drain lease arbitration.
//!
//! Contexts sharing a durable store claim a short-lived lease before they
//! dispatch anything, so only one of them sends at a time. The store keeps
//! the lease record; this module decides who may take it.

use serde::{Deserialize, Serialize};

use outbox_types::ContextId;

/// Name of the lease guarding drain passes.
pub const DRAIN_LEASE: &str = "drain";

/// A time-bounded claim held by one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    /// Context holding the lease.
    pub holder: ContextId,
    /// Expiry (Unix millis). The lease is void at or after this time.
    pub expires_at: i64,
}

impl Lease {
    /// Create a lease for `holder` valid for `ttl_ms` from `now`.
    pub fn new(holder: ContextId, now: i64, ttl_ms: i64) -> Self {
        Self {
            holder,
            expires_at: now.saturating_add(ttl_ms),
        }
    }

    /// Check if the lease has lapsed at `now`.
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    /// Decide whether `holder` may take (or renew) the lease.
    ///
    /// Allowed when no lease exists, the existing one expired, or `holder`
    /// already owns it.
    pub fn can_acquire(existing: Option<&Lease>, holder: ContextId, now: i64) -> bool {
        match existing {
            None => true,
            Some(lease) => lease.holder == holder || lease.is_expired(now),
        }
    }
}
