//! Missed-week sweep: resets streaks and applies point penalties for
//! members who did not post in the week that is ending.
//!
//! The sweep is a fan-out of independent per-record transactions with
//! bounded concurrency; one member's failure never aborts the batch. It
//! must run while the group's week key still names the ending week; the
//! rotation engine calls it immediately before advancing the tag state.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};

use crate::db::Repository;
use crate::errors::AppError;
use crate::models::{Group, LedgerRecord};
use crate::week;

use super::{streak, MAX_TXN_RETRIES};

/// Per-record transactions in flight at once.
const SWEEP_CONCURRENCY: usize = 8;

/// What one sweep pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub penalized: usize,
    pub failed: usize,
}

enum SweepOutcome {
    NoOp,
    Penalized,
    Failed,
}

/// Sweep every member of `group`, penalizing those who missed the week.
pub async fn sweep_missed_streaks(repo: &Repository, group: &Group) -> SweepReport {
    let week_start = week::current_week_start(group.next_tag_switch_at);

    let records = match repo.ledger_for_group(&group.id).await {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!(group = %group.id, "missed-week sweep could not list ledger: {}", e);
            return SweepReport::default();
        }
    };

    let scanned = records.len();
    let outcomes: Vec<SweepOutcome> = stream::iter(records)
        .map(|record| async move { sweep_one(repo, record, week_start).await })
        .buffer_unordered(SWEEP_CONCURRENCY)
        .collect()
        .await;

    let mut report = SweepReport {
        scanned,
        ..SweepReport::default()
    };
    for outcome in outcomes {
        match outcome {
            SweepOutcome::Penalized => report.penalized += 1,
            SweepOutcome::Failed => report.failed += 1,
            SweepOutcome::NoOp => {}
        }
    }

    if report.penalized > 0 || report.failed > 0 {
        tracing::info!(
            group = %group.id,
            scanned = report.scanned,
            penalized = report.penalized,
            failed = report.failed,
            "missed-week sweep finished"
        );
    }
    report
}

/// Penalize a single record if it missed the week. The penalty is computed
/// from the same read the conditional write validates, so a concurrent
/// like/unlike or post invalidates the version and we re-read.
async fn sweep_one(
    repo: &Repository,
    mut record: LedgerRecord,
    week_start: DateTime<Utc>,
) -> SweepOutcome {
    for _attempt in 0..MAX_TXN_RETRIES {
        let penalty = match streak::missed_week_penalty(
            record.streak,
            record.points,
            record.last_tag_week,
            week_start,
        ) {
            Some(penalty) => penalty,
            None => return SweepOutcome::NoOp,
        };

        match repo.apply_missed_penalty(&record, record.points - penalty).await {
            Ok(()) => {
                tracing::info!(
                    user = %record.user_id,
                    group = %record.group_id,
                    penalty,
                    "streak reset for missed week"
                );
                return SweepOutcome::Penalized;
            }
            Err(AppError::Conflict(_)) => {
                match repo.get_ledger(&record.user_id, &record.group_id).await {
                    Ok(Some(fresh)) => record = fresh,
                    Ok(None) => return SweepOutcome::NoOp,
                    Err(e) => {
                        tracing::warn!(
                            user = %record.user_id,
                            group = %record.group_id,
                            "sweep re-read failed: {}",
                            e
                        );
                        return SweepOutcome::Failed;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    user = %record.user_id,
                    group = %record.group_id,
                    "sweep skipped record: {}",
                    e
                );
                return SweepOutcome::Failed;
            }
        }
    }

    tracing::warn!(
        user = %record.user_id,
        group = %record.group_id,
        "sweep gave up after {} conflicts",
        MAX_TXN_RETRIES
    );
    SweepOutcome::Failed
}
