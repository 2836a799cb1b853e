use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use buddybar::{
    core::app_data_dir, BackendClient, BubbleHost, BubblePool, BubblePosition, BubbleView,
    ConnectionSupervisor, EventBus, SettingsStore, UnreadTracker,
};

/// Headless host: the real bubble windows belong to the UI layer, which
/// plugs in its own [`BubbleHost`]. This one just logs what it would do.
struct LogBubbleHost;

impl BubbleHost for LogBubbleHost {
    fn create(&self, user_id: &str, position: BubblePosition, view: &BubbleView) {
        tracing::info!(user_id, ?position, count = view.count, "bubble created");
    }

    fn update(&self, user_id: &str, view: &BubbleView) {
        tracing::info!(user_id, count = view.count, "bubble updated");
    }

    fn move_to(&self, user_id: &str, position: BubblePosition) {
        tracing::debug!(user_id, ?position, "bubble moved");
    }

    fn destroy(&self, user_id: &str) {
        tracing::info!(user_id, "bubble destroyed");
    }

    fn set_visible(&self, user_id: &str, visible: bool) {
        tracing::debug!(user_id, visible, "bubble visibility changed");
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("buddybar=info")),
        )
        .init();

    let data_dir = app_data_dir();
    let store = Arc::new(SettingsStore::load(data_dir.join("config.json")));
    let settings = store.settings();

    let client = match BackendClient::new(settings.base_url.clone(), data_dir.join("avatars")) {
        Ok(client) => Arc::new(client),
        Err(error) => {
            tracing::error!(%error, "failed to build HTTP client");
            return;
        }
    };
    let bus = Arc::new(EventBus::new());
    let supervisor = ConnectionSupervisor::new(Arc::clone(&client), Arc::clone(&bus));
    let tracker = UnreadTracker::new(
        Arc::clone(&client),
        Arc::clone(&store),
        data_dir.join("watermarks.json"),
    );
    let pool = BubblePool::new(
        Box::new(LogBubbleHost),
        Box::new(|user_id| {
            tracing::info!(user_id, "bubble clicked, conversation popup requested");
        }),
        Arc::clone(&client),
        Arc::clone(&store),
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(Arc::clone(&tracker).run_push_loop(Arc::clone(&bus), stop_rx.clone()));
    tokio::spawn(Arc::clone(&tracker).run_poll_loop(stop_rx.clone()));
    tokio::spawn(Arc::clone(&pool).run(tracker.subscribe(), stop_rx.clone()));
    supervisor.start();

    if let Some(me) = client.get_me().await {
        tracing::info!(display_name = %me.display_name, "signed in");
    } else {
        tracing::info!("backend not reachable yet, will keep retrying");
    }

    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutting down");
    supervisor.stop();
    let _ = stop_tx.send(true);
    if let Err(error) = tracker.persist_watermarks() {
        tracing::warn!(%error, "failed to persist watermarks on shutdown");
    }
}
