//! Points ledger: the weekly/all-time counters on each pairing. They move only through
//! submission approval and manual adjustment, and every move commits together with an
//! audit entry carrying the delta, so the audit log replays to the stored total.

use serde::Serialize;
use tracing::info;

use super::audit::{self, AuditDraft, AuditSubject};
use super::domain::{
    AuditAction, AuditChanges, AuditLogEntry, EntityType, Pairing, PairingId, PointsChange,
    UserId,
};
use super::error::{require_reason, ProgramError};
use super::store::{run_transaction, DocumentStore, DocumentStoreExt, Transaction};

/// Applies a signed delta to both counters. The all-time total may never go negative; the
/// weekly counter floors at zero because it is reset out of band.
pub(crate) fn apply_delta(pairing: &mut Pairing, delta: i64) -> Result<PointsChange, ProgramError> {
    let previous_points = pairing.total_points;
    let new_points = previous_points.checked_add_signed(delta).ok_or_else(|| {
        ProgramError::Validation(format!(
            "adjustment of {delta} would take pairing {} below zero ({previous_points} points)",
            pairing.id
        ))
    })?;

    pairing.total_points = new_points;
    pairing.weekly_points = pairing.weekly_points.saturating_add_signed(delta);

    Ok(PointsChange {
        previous_points,
        delta,
        new_points,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct AdjustmentReceipt {
    pub pairing_id: PairingId,
    pub change: PointsChange,
    pub weekly_points: u64,
    pub audit_entry: AuditLogEntry,
}

/// Result of replaying a pairing's audit deltas against its stored total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerVerification {
    pub pairing_id: PairingId,
    pub stored_total: u64,
    pub replayed_total: i64,
    pub entries: usize,
    pub consistent: bool,
}

pub struct PointsLedger<'a> {
    store: &'a dyn DocumentStore,
    attempts: u32,
}

impl<'a> PointsLedger<'a> {
    pub fn new(store: &'a dyn DocumentStore, attempts: u32) -> Self {
        Self { store, attempts }
    }

    /// Manual administrator adjustment. `delta` is signed and must be nonzero.
    pub fn adjust(
        &self,
        pairing_id: &PairingId,
        actor_id: &UserId,
        delta: i64,
        reason: &str,
    ) -> Result<AdjustmentReceipt, ProgramError> {
        if delta == 0 {
            return Err(ProgramError::Validation(
                "adjustment amount must be nonzero".to_string(),
            ));
        }
        let reason = require_reason(reason)?;

        let receipt = run_transaction(self.store, self.attempts, |txn| {
            apply_adjustment(txn, pairing_id, actor_id, delta, &reason)
        })?;

        info!(
            pairing = %pairing_id,
            actor = %actor_id,
            delta,
            new_points = receipt.change.new_points,
            "points adjusted"
        );
        Ok(receipt)
    }

    /// Sum of every recorded delta for the pairing, starting from zero.
    pub fn replay(&self, pairing_id: &PairingId) -> Result<(i64, usize), ProgramError> {
        let entries = audit::trail(self.store, &AuditSubject::Pairing(pairing_id.clone()))?;
        let deltas: Vec<i64> = entries
            .iter()
            .filter_map(|entry| entry.changes.points.map(|points| points.delta))
            .collect();
        Ok((deltas.iter().sum(), deltas.len()))
    }

    pub fn verify(&self, pairing_id: &PairingId) -> Result<LedgerVerification, ProgramError> {
        let pairing: Pairing = self
            .store
            .fetch(pairing_id.as_str())?
            .ok_or_else(|| ProgramError::not_found("pairing", pairing_id))?;
        let (replayed_total, entries) = self.replay(pairing_id)?;

        Ok(LedgerVerification {
            pairing_id: pairing_id.clone(),
            stored_total: pairing.total_points,
            replayed_total,
            entries,
            consistent: i64::try_from(pairing.total_points)
                .map(|stored| stored == replayed_total)
                .unwrap_or(false),
        })
    }
}

fn apply_adjustment(
    txn: &mut Transaction<'_>,
    pairing_id: &PairingId,
    actor_id: &UserId,
    delta: i64,
    reason: &str,
) -> Result<AdjustmentReceipt, ProgramError> {
    let mut pairing: Pairing = txn
        .get(pairing_id.as_str())?
        .ok_or_else(|| ProgramError::not_found("pairing", pairing_id))?;

    let change = apply_delta(&mut pairing, delta)?;
    txn.set(&pairing)?;

    let audit_entry = audit::stage(
        txn,
        AuditDraft::new(
            AuditAction::PointsAdjusted,
            EntityType::Pairing,
            pairing_id.as_str(),
            actor_id,
        )
        .pairing(pairing_id)
        .changes(AuditChanges {
            points: Some(change),
            reason: Some(reason.to_string()),
            ..AuditChanges::default()
        }),
    )?;

    Ok(AdjustmentReceipt {
        pairing_id: pairing_id.clone(),
        change,
        weekly_points: pairing.weekly_points,
        audit_entry,
    })
}
