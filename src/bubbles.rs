use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::{broadcast, watch};

use crate::{
    client::BackendClient,
    settings::{BubbleEdge, Settings, SettingsStore},
    tracker::TrackerEvent,
};

/// Slot along the configured screen edge. Slots are positional, not stable:
/// they are recomputed whenever removals or settings changes reshuffle the
/// stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BubblePosition {
    pub edge: BubbleEdge,
    pub offset: u32,
}

/// What a bubble window displays.
#[derive(Debug, Clone)]
pub struct BubbleView {
    pub display_name: String,
    pub count: usize,
    pub avatar: Option<Vec<u8>>,
}

/// The OS-facing side of bubble windows, implemented by the UI layer. The
/// pool decides lifecycle and placement; the host only executes.
pub trait BubbleHost: Send + Sync {
    fn create(&self, user_id: &str, position: BubblePosition, view: &BubbleView);
    fn update(&self, user_id: &str, view: &BubbleView);
    fn move_to(&self, user_id: &str, position: BubblePosition);
    fn destroy(&self, user_id: &str);
    fn set_visible(&self, user_id: &str, visible: bool);
}

struct PoolState {
    /// Live windows in slot order.
    order: Vec<String>,
    /// Avatar bytes fetched once per contact for the process lifetime;
    /// `None` remembers a contact with no usable photo.
    avatars: HashMap<String, Option<Vec<u8>>>,
    visible: bool,
}

/// Caps the set of indicator windows and keeps them stacked without overlap.
/// Consumes the tracker's unread-changed stream; forwards clicks to an
/// injected callback without knowing what it opens.
pub struct BubblePool {
    host: Box<dyn BubbleHost>,
    on_click: Box<dyn Fn(&str) + Send + Sync>,
    client: Arc<BackendClient>,
    store: Arc<SettingsStore>,
    state: Mutex<PoolState>,
}

impl BubblePool {
    pub fn new(
        host: Box<dyn BubbleHost>,
        on_click: Box<dyn Fn(&str) + Send + Sync>,
        client: Arc<BackendClient>,
        store: Arc<SettingsStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            host,
            on_click,
            client,
            store,
            state: Mutex::new(PoolState {
                order: Vec::new(),
                avatars: HashMap::new(),
                visible: true,
            }),
        })
    }

    pub fn window_count(&self) -> usize {
        self.lock().order.len()
    }

    pub async fn on_unread_changed(&self, user_id: &str, count: usize) {
        if count == 0 {
            self.remove_window(user_id);
            return;
        }

        if self.lock().order.iter().any(|u| u == user_id) {
            let view = self.view_for(user_id, count).await;
            self.host.update(user_id, &view);
            return;
        }

        let settings = self.store.settings();
        if self.lock().order.len() >= settings.max_bubbles {
            // At capacity: the unread count still ticks in the tracker, we
            // just don't surface another window.
            tracing::debug!(user_id, "bubble pool at capacity");
            return;
        }

        let view = self.view_for(user_id, count).await;
        let created = {
            let mut state = self.lock();
            // Re-check under the lock; the avatar fetch awaited in between.
            if state.order.iter().any(|u| u == user_id)
                || state.order.len() >= settings.max_bubbles
            {
                None
            } else {
                let index = state.order.len();
                state.order.push(user_id.to_string());
                Some((slot_position(index, &settings), state.visible))
            }
        };

        if let Some((position, visible)) = created {
            self.host.create(user_id, position, &view);
            if !visible {
                self.host.set_visible(user_id, false);
            }
        }
    }

    /// Recompute compact slots for every live window, in order.
    pub fn reposition_all(&self) {
        let settings = self.store.settings();
        let order = self.lock().order.clone();
        for (index, user_id) in order.iter().enumerate() {
            self.host.move_to(user_id, slot_position(index, &settings));
        }
    }

    /// Global visibility toggle; windows are suppressed, not destroyed.
    pub fn show_all(&self) {
        self.set_all_visible(true);
    }

    pub fn hide_all(&self) {
        self.set_all_visible(false);
    }

    pub fn handle_click(&self, user_id: &str) {
        (self.on_click)(user_id);
    }

    /// Drive the pool from the tracker's event stream until shutdown.
    pub async fn run(
        self: Arc<Self>,
        mut events: broadcast::Receiver<TrackerEvent>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        return;
                    }
                }
                event = events.recv() => {
                    match event {
                        Ok(TrackerEvent::UnreadChanged { user_id, count }) => {
                            self.on_unread_changed(&user_id, count).await;
                        }
                        Ok(TrackerEvent::NewMessage { .. }) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "bubble pool lagged behind tracker events");
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        }
    }

    fn remove_window(&self, user_id: &str) {
        let removed = {
            let mut state = self.lock();
            match state.order.iter().position(|u| u == user_id) {
                Some(index) => {
                    state.order.remove(index);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.host.destroy(user_id);
            self.reposition_all();
        }
    }

    fn set_all_visible(&self, visible: bool) {
        let order = {
            let mut state = self.lock();
            state.visible = visible;
            state.order.clone()
        };
        for user_id in order {
            self.host.set_visible(&user_id, visible);
        }
    }

    async fn view_for(&self, user_id: &str, count: usize) -> BubbleView {
        let display_name = self
            .store
            .contact(user_id)
            .map(|contact| contact.display_name)
            .unwrap_or_else(|| user_id.to_string());
        let avatar = self.ensure_avatar(user_id).await;
        BubbleView {
            display_name,
            count,
            avatar,
        }
    }

    /// Fetch avatar bytes at most once per contact per process; staleness is
    /// bounded by the client's on-disk cache.
    async fn ensure_avatar(&self, user_id: &str) -> Option<Vec<u8>> {
        if let Some(cached) = self.lock().avatars.get(user_id) {
            return cached.clone();
        }
        let fetched = self.client.get_profile_photo(user_id).await;
        self.lock()
            .avatars
            .insert(user_id.to_string(), fetched.clone());
        fetched
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn slot_position(index: usize, settings: &Settings) -> BubblePosition {
    let step = settings.bubble_size + settings.bubble_gap;
    BubblePosition {
        edge: settings.bubble_edge,
        offset: settings.bubble_base_offset + index as u32 * step,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContactEntry;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum HostCall {
        Create(String, u32),
        Update(String, usize),
        Move(String, u32),
        Destroy(String),
        Visible(String, bool),
    }

    #[derive(Clone, Default)]
    struct RecordingHost {
        calls: Arc<Mutex<Vec<HostCall>>>,
    }

    impl RecordingHost {
        fn calls(&self) -> Vec<HostCall> {
            self.calls.lock().unwrap().clone()
        }

        fn take(&self) -> Vec<HostCall> {
            std::mem::take(&mut *self.calls.lock().unwrap())
        }
    }

    impl BubbleHost for RecordingHost {
        fn create(&self, user_id: &str, position: BubblePosition, _view: &BubbleView) {
            self.calls
                .lock()
                .unwrap()
                .push(HostCall::Create(user_id.to_string(), position.offset));
        }

        fn update(&self, user_id: &str, view: &BubbleView) {
            self.calls
                .lock()
                .unwrap()
                .push(HostCall::Update(user_id.to_string(), view.count));
        }

        fn move_to(&self, user_id: &str, position: BubblePosition) {
            self.calls
                .lock()
                .unwrap()
                .push(HostCall::Move(user_id.to_string(), position.offset));
        }

        fn destroy(&self, user_id: &str) {
            self.calls
                .lock()
                .unwrap()
                .push(HostCall::Destroy(user_id.to_string()));
        }

        fn set_visible(&self, user_id: &str, visible: bool) {
            self.calls
                .lock()
                .unwrap()
                .push(HostCall::Visible(user_id.to_string(), visible));
        }
    }

    struct Fixture {
        pool: Arc<BubblePool>,
        host: RecordingHost,
        clicks: Arc<Mutex<Vec<String>>>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SettingsStore::load(dir.path().join("config.json")));
        for id in 1..=8 {
            store
                .add_contact(ContactEntry {
                    user_id: id.to_string(),
                    username: None,
                    display_name: format!("Contact {id}"),
                })
                .unwrap();
        }
        let client = Arc::new(BackendClient::new("http://127.0.0.1:9", dir.path()).unwrap());
        let host = RecordingHost::default();
        let clicks: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let clicks_sink = Arc::clone(&clicks);
        let pool = BubblePool::new(
            Box::new(host.clone()),
            Box::new(move |user_id| clicks_sink.lock().unwrap().push(user_id.to_string())),
            client,
            store,
        );
        Fixture {
            pool,
            host,
            clicks,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn pool_never_exceeds_max_bubbles() {
        let fx = fixture();
        for id in 1..=8 {
            fx.pool.on_unread_changed(&id.to_string(), 1).await;
        }

        assert_eq!(fx.pool.window_count(), 5);
        let creates = fx
            .host
            .calls()
            .into_iter()
            .filter(|c| matches!(c, HostCall::Create(..)))
            .count();
        assert_eq!(creates, 5);
    }

    #[tokio::test]
    async fn existing_window_is_updated_not_recreated() {
        let fx = fixture();
        fx.pool.on_unread_changed("1", 1).await;
        fx.pool.on_unread_changed("1", 2).await;

        let calls = fx.host.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(calls[0], HostCall::Create(..)));
        assert_eq!(calls[1], HostCall::Update("1".to_string(), 2));
        assert_eq!(fx.pool.window_count(), 1);
    }

    #[tokio::test]
    async fn windows_stack_without_overlap() {
        let fx = fixture();
        fx.pool.on_unread_changed("1", 1).await;
        fx.pool.on_unread_changed("2", 1).await;
        fx.pool.on_unread_changed("3", 1).await;

        // Defaults: base 120, size 64, gap 12.
        assert_eq!(
            fx.host.calls(),
            vec![
                HostCall::Create("1".to_string(), 120),
                HostCall::Create("2".to_string(), 196),
                HostCall::Create("3".to_string(), 272),
            ]
        );
    }

    #[tokio::test]
    async fn removal_compacts_remaining_slots() {
        let fx = fixture();
        fx.pool.on_unread_changed("1", 1).await;
        fx.pool.on_unread_changed("2", 1).await;
        fx.pool.on_unread_changed("3", 1).await;
        fx.host.take();

        fx.pool.on_unread_changed("1", 0).await;

        assert_eq!(
            fx.host.calls(),
            vec![
                HostCall::Destroy("1".to_string()),
                HostCall::Move("2".to_string(), 120),
                HostCall::Move("3".to_string(), 196),
            ]
        );
        assert_eq!(fx.pool.window_count(), 2);
    }

    #[tokio::test]
    async fn destroy_on_zero_is_idempotent() {
        let fx = fixture();
        fx.pool.on_unread_changed("1", 1).await;
        fx.pool.on_unread_changed("1", 0).await;
        fx.host.take();

        fx.pool.on_unread_changed("1", 0).await;
        assert!(fx.host.calls().is_empty());
    }

    #[tokio::test]
    async fn capacity_frees_up_after_removal() {
        let fx = fixture();
        for id in 1..=5 {
            fx.pool.on_unread_changed(&id.to_string(), 1).await;
        }
        fx.pool.on_unread_changed("6", 1).await;
        assert_eq!(fx.pool.window_count(), 5);

        fx.pool.on_unread_changed("3", 0).await;
        fx.pool.on_unread_changed("6", 1).await;
        assert_eq!(fx.pool.window_count(), 5);
        assert!(fx
            .host
            .calls()
            .contains(&HostCall::Create("6".to_string(), 120 + 4 * 76)));
    }

    #[tokio::test]
    async fn visibility_toggle_suppresses_without_destroying() {
        let fx = fixture();
        fx.pool.on_unread_changed("1", 1).await;
        fx.host.take();

        fx.pool.hide_all();
        assert_eq!(
            fx.host.take(),
            vec![HostCall::Visible("1".to_string(), false)]
        );
        assert_eq!(fx.pool.window_count(), 1);

        // A bubble created while hidden starts suppressed.
        fx.pool.on_unread_changed("2", 1).await;
        assert_eq!(
            fx.host.take(),
            vec![
                HostCall::Create("2".to_string(), 196),
                HostCall::Visible("2".to_string(), false),
            ]
        );

        fx.pool.show_all();
        let calls = fx.host.take();
        assert!(calls.contains(&HostCall::Visible("1".to_string(), true)));
        assert!(calls.contains(&HostCall::Visible("2".to_string(), true)));
    }

    #[tokio::test]
    async fn clicks_are_forwarded_to_the_callback() {
        let fx = fixture();
        fx.pool.handle_click("42");
        assert_eq!(fx.clicks.lock().unwrap().as_slice(), ["42".to_string()]);
    }

    #[test]
    fn slot_positions_follow_the_configured_edge() {
        let settings = Settings {
            bubble_edge: BubbleEdge::Left,
            ..Settings::default()
        };
        let position = slot_position(2, &settings);
        assert_eq!(position.edge, BubbleEdge::Left);
        assert_eq!(position.offset, 120 + 2 * 76);
    }
}
