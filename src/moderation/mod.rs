//! Moderation gate: settles each new post's image-safety verdict.
//!
//! Consumes `PostCreated` events, asks the external classifier, and writes
//! `approved` or `rejected`. A classifier failure leaves the post `pending`
//! for a later pass or manual review, never silently approved.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;

use crate::db::Repository;
use crate::events::{AppEvent, EventBus};
use crate::models::ModerationStatus;
use crate::services::SafetyClient;

/// Run the moderation gate until the event bus closes.
pub async fn run(repo: Arc<Repository>, client: Option<SafetyClient>, bus: EventBus) {
    let Some(client) = client else {
        tracing::info!("no classifier configured; posts stay pending");
        return;
    };

    let mut rx = bus.subscribe();
    tracing::info!("moderation gate running");

    loop {
        match rx.recv().await {
            Ok(AppEvent::PostCreated {
                post_id,
                group_id,
                image_url,
                ..
            }) => {
                moderate_post(&repo, &client, &bus, &post_id, &group_id, &image_url).await;
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "moderation gate lagged behind the event bus");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn moderate_post(
    repo: &Repository,
    client: &SafetyClient,
    bus: &EventBus,
    post_id: &str,
    group_id: &str,
    image_url: &str,
) {
    let status = match client.classify(image_url).await {
        Ok(verdict) if verdict.is_unsafe() => ModerationStatus::Rejected,
        Ok(_) => ModerationStatus::Approved,
        Err(e) => {
            tracing::warn!(post = post_id, "classifier unavailable, post stays pending: {}", e);
            return;
        }
    };

    match repo.set_moderation_status(post_id, status).await {
        Ok(()) => {
            tracing::info!(post = post_id, status = status.as_str(), "moderation verdict recorded");
            bus.emit(AppEvent::PostModerated {
                post_id: post_id.to_string(),
                group_id: group_id.to_string(),
                status,
            });
        }
        Err(e) => {
            // Post may have been deleted while classification was in flight.
            tracing::warn!(post = post_id, "could not record moderation verdict: {}", e);
        }
    }
}
