//! Terminal consumer for the notification hub.
//!
//! Connects to the broker configured by `BLOGWIRE_WS_URL` and logs presence,
//! notifications and toasts until Ctrl-C.

use blogwire::types::ToastItem;
use blogwire::{ClientConfig, Hub};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blogwire=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ClientConfig::from_env();
    info!("Watching {}", config.ws_url);

    let hub = Hub::new(config);
    let consumer = hub.attach();
    let mut snapshots = consumer.subscribe();
    let mut toasts = consumer.toasts().subscribe();
    let mut shown: Vec<i64> = Vec::new();

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                info!(
                    "{} | online {} | unread {} | {} recent",
                    snapshot.connection,
                    snapshot.online_count,
                    snapshot.unread_count,
                    snapshot.notifications.len()
                );
            }
            changed = toasts.changed() => {
                if changed.is_err() {
                    break;
                }
                let visible = toasts.borrow_and_update().clone();
                if let Some(toast) = newest_unseen(&visible, &shown) {
                    info!(
                        "[{}] {}: {}",
                        toast.notification_type.as_str(),
                        toast.title,
                        toast.content
                    );
                }
                shown = visible.iter().map(|t| t.id).collect();
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    hub.shutdown();
    drop(consumer);
    Ok(())
}

/// The head toast when it was not visible last time. Only a push puts an
/// unseen toast at the head.
fn newest_unseen<'a>(visible: &'a [ToastItem], shown: &[i64]) -> Option<&'a ToastItem> {
    visible.first().filter(|toast| !shown.contains(&toast.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use blogwire::types::NotificationType;

    fn toast(id: i64) -> ToastItem {
        ToastItem {
            id,
            notification_type: NotificationType::System,
            title: "t".to_string(),
            content: "c".to_string(),
            sender_name: "admin".to_string(),
        }
    }

    #[test]
    fn test_only_new_head_is_reported() {
        let visible = vec![toast(3), toast(2), toast(1)];
        assert_eq!(newest_unseen(&visible, &[2, 1]).map(|t| t.id), Some(3));
        assert!(newest_unseen(&visible, &[3, 2, 1]).is_none());

        // Dismissing the head exposes an older toast that was already shown.
        let after_dismiss = vec![toast(2), toast(1)];
        assert!(newest_unseen(&after_dismiss, &[3, 2, 1]).is_none());
        assert!(newest_unseen(&[], &[1]).is_none());
    }
}
