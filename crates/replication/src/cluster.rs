//! Epoch-fenced role state shared by a node's replication tasks.

use crate::error::{ReplicationError, ReplicationResult};
use crate::role::Role;
use parking_lot::RwLock;
use velox_core::Lsn;

/// A node's current role and epoch, with the succession rule enforced on
/// every transition: a new primary's `lastAppliedLSN` must be at least the
/// previously advertised durable LSN, and the new epoch must be strictly
/// greater than the current one.
///
/// Split-brain prevention is advisory only: this type does not coordinate
/// with peers to agree on the promotion, it only rejects a
/// locally-observed transition that violates the rule. Clients carrying a
/// stale epoch are expected to reject replies from the old primary
/// themselves.
pub struct ClusterState {
    inner: RwLock<(Role, u64, Lsn)>,
}

impl ClusterState {
    /// A node starting in `role` at epoch 0 with no durable history.
    pub fn new(role: Role) -> Self {
        Self {
            inner: RwLock::new((role, 0, Lsn::ZERO)),
        }
    }

    /// The node's current role.
    pub fn role(&self) -> Role {
        self.inner.read().0
    }

    /// The node's current epoch.
    pub fn epoch(&self) -> u64 {
        self.inner.read().1
    }

    /// The durable LSN last advertised at this node's current epoch.
    pub fn durable_lsn(&self) -> Lsn {
        self.inner.read().2
    }

    /// Record that the primary has durably flushed through `lsn`, without
    /// changing role or epoch. Called from the commit path on every flush.
    pub fn advance_durable_lsn(&self, lsn: Lsn) {
        let mut guard = self.inner.write();
        if lsn > guard.2 {
            guard.2 = lsn;
        }
    }

    /// Apply a `RoleChange` to `new_role` at `new_epoch`, claiming
    /// `candidate_lsn` as the candidate's last applied LSN.
    ///
    /// Rejected if `new_epoch` does not exceed the current epoch, or if
    /// promoting to `Primary` and `candidate_lsn` is behind the durable LSN
    /// already advertised at the current epoch.
    pub fn apply_role_change(
        &self,
        new_role: Role,
        new_epoch: u64,
        candidate_lsn: Lsn,
    ) -> ReplicationResult<()> {
        let mut guard = self.inner.write();
        let (_, current_epoch, durable_lsn) = *guard;
        if new_epoch <= current_epoch {
            return Err(ReplicationError::InvalidTransition(format!(
                "new epoch {new_epoch} does not exceed current epoch {current_epoch}"
            )));
        }
        if new_role == Role::Primary && candidate_lsn < durable_lsn {
            return Err(ReplicationError::InvalidTransition(format!(
                "candidate lastAppliedLSN {candidate_lsn} is behind durable LSN {durable_lsn}"
            )));
        }
        *guard = (new_role, new_epoch, candidate_lsn.max(durable_lsn));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_with_caught_up_lsn_and_higher_epoch_succeeds() {
        let state = ClusterState::new(Role::Standby);
        state.advance_durable_lsn(Lsn::new(1, 100));
        state
            .apply_role_change(Role::Primary, 1, Lsn::new(1, 100))
            .unwrap();
        assert_eq!(state.role(), Role::Primary);
        assert_eq!(state.epoch(), 1);
    }

    #[test]
    fn promotion_behind_the_durable_watermark_is_rejected() {
        let state = ClusterState::new(Role::Standby);
        state.advance_durable_lsn(Lsn::new(1, 100));
        let result = state.apply_role_change(Role::Primary, 1, Lsn::new(1, 50));
        assert!(matches!(result, Err(ReplicationError::InvalidTransition(_))));
        assert_eq!(state.role(), Role::Standby);
    }

    #[test]
    fn non_increasing_epoch_is_rejected() {
        let state = ClusterState::new(Role::Standby);
        state.apply_role_change(Role::Primary, 5, Lsn::ZERO).unwrap();
        let result = state.apply_role_change(Role::Standby, 5, Lsn::ZERO);
        assert!(matches!(result, Err(ReplicationError::InvalidTransition(_))));
    }
}
