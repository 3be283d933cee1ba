//! Leaderboard read model. Family totals are always summed from their pairings here and
//! never stored.

use std::collections::HashMap;

use serde::Serialize;

use super::domain::{Family, FamilyId, Pairing, PairingId, UserId};
use super::store::{DocumentStore, DocumentStoreExt, Filter, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FamilyStanding {
    pub rank: u32,
    pub family_id: FamilyId,
    pub name: String,
    pub total_points: u64,
    pub weekly_points: u64,
    pub pairings: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairingStanding {
    pub rank: u32,
    pub pairing_id: PairingId,
    pub family_id: FamilyId,
    pub mentor_id: UserId,
    pub total_points: u64,
    pub weekly_points: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Standings {
    pub families: Vec<FamilyStanding>,
    pub pairings: Vec<PairingStanding>,
}

/// Ranks active families and their pairings. Equal scores share a rank and the next rank
/// skips accordingly (1, 1, 3).
pub fn standings(store: &dyn DocumentStore) -> Result<Standings, StoreError> {
    let families: Vec<Family> = store
        .find::<Family>(&Filter::All)?
        .into_iter()
        .filter(|family| !family.is_archived)
        .collect();
    let active: HashMap<&FamilyId, &Family> =
        families.iter().map(|family| (&family.id, family)).collect();

    let mut pairings: Vec<Pairing> = store
        .find::<Pairing>(&Filter::All)?
        .into_iter()
        .filter(|pairing| active.contains_key(&pairing.family_id))
        .collect();

    let mut totals: HashMap<&FamilyId, (u64, u64, u32)> = HashMap::new();
    for pairing in &pairings {
        let entry = totals.entry(&pairing.family_id).or_insert((0, 0, 0));
        entry.0 = entry.0.saturating_add(pairing.total_points);
        entry.1 = entry.1.saturating_add(pairing.weekly_points);
        entry.2 += 1;
    }

    let mut family_rows: Vec<FamilyStanding> = families
        .iter()
        .map(|family| {
            let (total_points, weekly_points, count) =
                totals.get(&family.id).copied().unwrap_or((0, 0, 0));
            FamilyStanding {
                rank: 0,
                family_id: family.id.clone(),
                name: family.name.clone(),
                total_points,
                weekly_points,
                pairings: count,
            }
        })
        .collect();
    family_rows.sort_by(|left, right| {
        right
            .total_points
            .cmp(&left.total_points)
            .then_with(|| left.name.cmp(&right.name))
            .then_with(|| left.family_id.cmp(&right.family_id))
    });
    assign_ranks(
        &mut family_rows,
        |row| (row.total_points, 0),
        |row, rank| row.rank = rank,
    );

    pairings.sort_by(|left, right| {
        right
            .total_points
            .cmp(&left.total_points)
            .then_with(|| right.weekly_points.cmp(&left.weekly_points))
            .then_with(|| left.id.cmp(&right.id))
    });
    let mut pairing_rows: Vec<PairingStanding> = pairings
        .into_iter()
        .map(|pairing| PairingStanding {
            rank: 0,
            pairing_id: pairing.id,
            family_id: pairing.family_id,
            mentor_id: pairing.mentor_id,
            total_points: pairing.total_points,
            weekly_points: pairing.weekly_points,
        })
        .collect();
    assign_ranks(
        &mut pairing_rows,
        |row| (row.total_points, row.weekly_points),
        |row, rank| row.rank = rank,
    );

    Ok(Standings {
        families: family_rows,
        pairings: pairing_rows,
    })
}

fn assign_ranks<T>(
    rows: &mut [T],
    score: impl Fn(&T) -> (u64, u64),
    mut set_rank: impl FnMut(&mut T, u32),
) {
    let mut previous: Option<((u64, u64), u32)> = None;
    for (index, row) in rows.iter_mut().enumerate() {
        let current = score(row);
        let position = u32::try_from(index + 1).unwrap_or(u32::MAX);
        let rank = match previous {
            Some((last, last_rank)) if last == current => last_rank,
            _ => position,
        };
        set_rank(row, rank);
        previous = Some((current, rank));
    }
}
