//! Notification fanout: turns rotation and social events into push
//! deliveries.
//!
//! Strictly best-effort: failures are logged and never retried; losing a
//! notification loses nothing but the notification.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;

use crate::db::Repository;
use crate::events::{AppEvent, EventBus};
use crate::services::PushClient;

/// Deliveries in flight at once per event.
const PUSH_CONCURRENCY: usize = 4;

/// Run the fanout until the event bus closes.
pub async fn run(repo: Arc<Repository>, client: Option<PushClient>, bus: EventBus) {
    let Some(client) = client else {
        tracing::info!("no push service configured; notifications disabled");
        return;
    };

    let mut rx = bus.subscribe();
    tracing::info!("notification fanout running");

    loop {
        match rx.recv().await {
            Ok(AppEvent::TagRotated { group_id, new_tag }) => {
                notify_rotation(&repo, &client, &group_id, &new_tag).await;
            }
            Ok(AppEvent::LikeToggled {
                post_id,
                author_id,
                liker_id,
                liked: true,
                ..
            }) => {
                if liker_id != author_id {
                    notify_like(&repo, &client, &author_id, &post_id).await;
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "notification fanout lagged behind the event bus");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Tell every member with a registered device about the new tag.
async fn notify_rotation(repo: &Repository, client: &PushClient, group_id: &str, new_tag: &str) {
    let title = match repo.get_group(group_id).await {
        Ok(Some(group)) => group.title,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(group = group_id, "fanout could not load group: {}", e);
            return;
        }
    };

    let tokens = match repo.member_device_tokens(group_id).await {
        Ok(tokens) => tokens,
        Err(e) => {
            tracing::warn!(group = group_id, "fanout could not resolve tokens: {}", e);
            return;
        }
    };

    let body = format!("New tag this week: {}", new_tag);
    let data = json!({ "groupId": group_id, "tag": new_tag });

    stream::iter(tokens)
        .for_each_concurrent(PUSH_CONCURRENCY, |token| {
            let data = data.clone();
            let title = title.clone();
            let body = body.clone();
            async move {
                if let Err(e) = client.send(&token, &title, &body, data).await {
                    tracing::warn!(group = group_id, "push delivery failed: {}", e);
                }
            }
        })
        .await;
}

/// Tell an author their photo was liked.
async fn notify_like(repo: &Repository, client: &PushClient, author_id: &str, post_id: &str) {
    let token = match repo.get_user(author_id).await {
        Ok(Some(user)) => user.device_token,
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(user = author_id, "fanout could not load user: {}", e);
            return;
        }
    };

    let Some(token) = token else { return };

    let data = json!({ "postId": post_id });
    if let Err(e) = client
        .send(&token, "Tagged", "Someone liked your photo", data)
        .await
    {
        tracing::warn!(user = author_id, "push delivery failed: {}", e);
    }
}
