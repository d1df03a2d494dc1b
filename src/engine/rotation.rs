//! Tag rotation: the weekly advancement of every group's
//! current/queued/past tag state.
//!
//! Rotation is idempotent: `next_tag_switch_at <= now` is the sole gate,
//! and the deadline is advanced strictly past `now` in the same conditional
//! write that moves the tags, so a second firing for the same deadline
//! finds nothing to do. The missed-week sweep for the ending week runs
//! immediately before the tags advance, while the shared week key still
//! names that week.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};

use crate::db::Repository;
use crate::errors::AppError;
use crate::events::{AppEvent, EventBus};
use crate::models::NO_TAG_SENTINEL;
use crate::week;

use super::{sweep, MAX_TXN_RETRIES};

/// Group rotations in flight at once during the scheduled sweep.
const ROTATION_CONCURRENCY: usize = 8;

/// Per-group budget; a stuck group is logged and retried next tick. A
/// timeout says nothing about whether the mutation landed; the idempotence
/// gate sorts that out on the retry.
const GROUP_ROTATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Advance one group's tag lists: current (or the no-tag placeholder) is
/// pushed onto the front of history, the next queued tag becomes current,
/// and an empty queue leaves the placeholder in place.
pub fn advance_tags(
    current: &str,
    queued: &[String],
    past: &[String],
) -> (String, Vec<String>, Vec<String>) {
    let mut new_past = Vec::with_capacity(past.len() + 1);
    if current.trim().is_empty() {
        new_past.push(NO_TAG_SENTINEL.to_string());
    } else {
        new_past.push(current.to_string());
    }
    new_past.extend_from_slice(past);

    let mut new_queued = queued.to_vec();
    let new_current = if new_queued.is_empty() {
        NO_TAG_SENTINEL.to_string()
    } else {
        new_queued.remove(0)
    };

    (new_current, new_queued, new_past)
}

/// Scheduled sweep: rotate every group whose deadline has passed. Returns
/// the number of groups rotated. Per-group failures are isolated.
pub async fn rotate_due_groups(repo: &Repository, bus: &EventBus, now: DateTime<Utc>) -> usize {
    let groups = match repo.due_groups(now).await {
        Ok(groups) => groups,
        Err(e) => {
            tracing::error!("rotation sweep could not list due groups: {}", e);
            return 0;
        }
    };

    if groups.is_empty() {
        return 0;
    }
    tracing::info!(due = groups.len(), "rotation sweep starting");

    let results: Vec<bool> = stream::iter(groups)
        .map(|group| {
            let group_id = group.id.clone();
            async move {
                match tokio::time::timeout(
                    GROUP_ROTATION_TIMEOUT,
                    check_and_rotate_if_due(repo, bus, &group_id, now),
                )
                .await
                {
                    Ok(Ok(rotated)) => rotated,
                    Ok(Err(e)) => {
                        tracing::warn!(group = %group_id, "rotation failed: {}", e);
                        false
                    }
                    Err(_) => {
                        tracing::warn!(group = %group_id, "rotation timed out");
                        false
                    }
                }
            }
        })
        .buffer_unordered(ROTATION_CONCURRENCY)
        .collect()
        .await;

    results.into_iter().filter(|rotated| *rotated).count()
}

/// Rotate a single group if its deadline has passed; the on-demand variant
/// of the scheduled sweep, safe to call at any time. Returns whether a
/// rotation was applied.
pub async fn check_and_rotate_if_due(
    repo: &Repository,
    bus: &EventBus,
    group_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, AppError> {
    let group = repo
        .get_group(group_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Group {} not found", group_id)))?;

    if group.next_tag_switch_at > now {
        return Ok(false);
    }

    // The week key must still name the ending week when the sweep reads it.
    sweep::sweep_missed_streaks(repo, &group).await;

    for _attempt in 0..MAX_TXN_RETRIES {
        let group = match repo.get_group(group_id).await? {
            Some(group) => group,
            None => return Ok(false),
        };
        if group.next_tag_switch_at > now {
            // Another firing already applied this deadline.
            return Ok(false);
        }

        let (new_current, new_queued, new_past) =
            advance_tags(&group.current_tag, &group.queued_tags, &group.past_tags);
        let next = week::next_rotation_after(now);

        match repo
            .apply_rotation(
                &group.id,
                group.version,
                &new_current,
                &new_queued,
                &new_past,
                next,
            )
            .await
        {
            Ok(()) => {
                tracing::info!(
                    group = %group.id,
                    new_tag = %new_current,
                    next_switch = %next,
                    "tags rotated"
                );
                bus.emit(AppEvent::TagRotated {
                    group_id: group.id.clone(),
                    new_tag: new_current,
                });
                return Ok(true);
            }
            Err(AppError::Conflict(_)) => continue,
            Err(e) => return Err(e),
        }
    }

    Err(AppError::Conflict(format!(
        "Could not rotate group {} after {} attempts",
        group_id, MAX_TXN_RETRIES
    )))
}

/// Background task: check for due groups on a fixed interval.
pub async fn run_scheduler(repo: Arc<Repository>, bus: EventBus, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    tracing::info!(period_secs = period.as_secs(), "rotation scheduler running");

    loop {
        ticker.tick().await;
        let rotated = rotate_due_groups(&repo, &bus, Utc::now()).await;
        if rotated > 0 {
            tracing::info!(rotated, "rotation sweep applied");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_advance_pops_queue_and_records_history() {
        let (current, queued, past) = advance_tags(
            "Golden hour",
            &tags(&["Reflections", "Street food"]),
            &tags(&["Pets"]),
        );
        assert_eq!(current, "Reflections");
        assert_eq!(queued, tags(&["Street food"]));
        assert_eq!(past, tags(&["Golden hour", "Pets"]));
    }

    #[test]
    fn test_advance_empty_queue_leaves_placeholder() {
        let (current, queued, past) = advance_tags("Golden hour", &[], &[]);
        assert_eq!(current, NO_TAG_SENTINEL);
        assert!(queued.is_empty());
        assert_eq!(past, tags(&["Golden hour"]));
    }

    #[test]
    fn test_advance_unset_current_records_placeholder() {
        let (current, queued, past) = advance_tags("", &tags(&["Reflections"]), &[]);
        assert_eq!(current, "Reflections");
        assert!(queued.is_empty());
        assert_eq!(past, tags(&[NO_TAG_SENTINEL]));
    }

    #[test]
    fn test_history_is_most_recent_first() {
        let (_, _, past) = advance_tags("c", &[], &tags(&["b", "a"]));
        assert_eq!(past, tags(&["c", "b", "a"]));
    }
}
