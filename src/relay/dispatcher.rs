//! Relay dispatcher: admission, persistence and fan-out.
//!
//! Every room runs one serialized task that owns that room's
//! [`DedupGuard`] and processes publishes in arrival order, giving
//! per-room FIFO delivery without any cross-room contention. The
//! dispatcher feeds those tasks, tracks live sessions, and runs the
//! periodic maintenance pass that sweeps guards and reaps idle rooms.
//!
//! A publish never fails outward: duplicates and stale results are
//! dropped quietly, store writes happen off the hot path, and a dead
//! member discovered during fan-out is detached without aborting
//! delivery to the rest of the room.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::current_timestamp;
use crate::relay::dedup::{DedupConfig, DedupGuard, ResultCheck};
use crate::relay::event::{Event, RoomId, SessionId};
use crate::relay::registry::RoomRegistry;
use crate::relay::session::{SessionCommand, SessionHandle};
use crate::relay::store::EventStore;
use crate::RelayConfig;

/// Commands processed by a room's serialized task.
#[derive(Debug)]
enum RoomCommand {
    /// Admit and fan out one event.
    Publish(Event),
    /// Start a translation cycle with the given baseline (Unix ms).
    BeginCycle { at: u64 },
    /// Purge aged dedup entries.
    Sweep,
}

/// What a join changed, plus the membership snapshot for the ack.
#[derive(Debug)]
pub struct JoinSummary {
    /// Room that was joined.
    pub room_id: RoomId,
    /// Current members as (session ID, identity) pairs.
    pub members: Vec<(SessionId, String)>,
    /// Room the session left to get here, if any.
    pub left: Option<RoomId>,
    /// True when the session was already in this room.
    pub rejoined: bool,
}

struct Shared {
    registry: RoomRegistry,
    store: Arc<dyn EventStore>,
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
    rooms: RwLock<HashMap<RoomId, mpsc::UnboundedSender<RoomCommand>>>,
    dedup: DedupConfig,
    linger: Duration,
    history_limit: usize,
}

/// Entry point for everything that happens to an event after it has
/// been read off a connection.
#[derive(Clone)]
pub struct RelayDispatcher {
    shared: Arc<Shared>,
}

impl RelayDispatcher {
    pub fn new(store: Arc<dyn EventStore>, config: &RelayConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: RoomRegistry::new(),
                store,
                sessions: RwLock::new(HashMap::new()),
                rooms: RwLock::new(HashMap::new()),
                dedup: config.dedup.clone(),
                linger: Duration::from_secs(config.room_linger_secs),
                history_limit: config.history_limit,
            }),
        }
    }

    /// Track a connected session so fan-out can reach it.
    pub async fn register_session(&self, handle: SessionHandle) {
        debug!(session_id = %handle.id, identity = %handle.identity, "session registered");
        let mut sessions = self.shared.sessions.write().await;
        sessions.insert(handle.id.clone(), handle);
    }

    /// Put a session into a room and return the membership snapshot.
    pub async fn join(&self, session_id: &str, room_id: &str) -> JoinSummary {
        let outcome = self.shared.registry.join(session_id, room_id).await;
        // Room task up before the first publish can race the join.
        ensure_room(&self.shared, room_id).await;

        let member_ids = self.shared.registry.members_of(room_id).await;
        let members = {
            let sessions = self.shared.sessions.read().await;
            member_ids
                .into_iter()
                .map(|id| {
                    let identity = sessions
                        .get(&id)
                        .map(|h| h.identity.clone())
                        .unwrap_or_default();
                    (id, identity)
                })
                .collect()
        };

        info!(
            session_id,
            room_id,
            rejoined = outcome.rejoined,
            left = ?outcome.left,
            "session joined room"
        );

        JoinSummary {
            room_id: room_id.to_string(),
            members,
            left: outcome.left,
            rejoined: outcome.rejoined,
        }
    }

    /// Remove a session from its room, keeping the connection alive.
    /// Returns the room left, or None if it was not in one.
    pub async fn leave(&self, session_id: &str) -> Option<RoomId> {
        let left = self.shared.registry.leave(session_id).await;
        if let Some(room_id) = &left {
            info!(session_id, room_id = %room_id, "session left room");
        }
        left
    }

    /// Tear a session down: close latch, forget the handle, leave its
    /// room. Safe to call more than once; later calls are no-ops.
    pub async fn disconnect(&self, session_id: &str) -> Option<RoomId> {
        detach_session(&self.shared, session_id).await
    }

    /// Queue an event for admission and fan-out in its room.
    pub async fn publish(&self, event: Event) {
        let room = self.shared.registry.get_or_create(&event.room_id).await;
        room.touch().await;

        let room_id = event.room_id.clone();
        let tx = ensure_room(&self.shared, &room_id).await;
        if let Err(rejected) = tx.send(RoomCommand::Publish(event)) {
            // The room task died between lookup and send; rebuild it
            // and retry once rather than dropping the event.
            let tx = ensure_room(&self.shared, &room_id).await;
            if tx.send(rejected.0).is_err() {
                warn!(room_id = %room_id, "room task unavailable, event dropped");
            }
        }
    }

    /// Start a translation cycle for a room: the result watermark resets
    /// to now and the cycle deadline is re-armed.
    pub async fn begin_cycle(&self, room_id: &str) {
        let at = current_timestamp();
        let room = self.shared.registry.get_or_create(room_id).await;
        room.touch().await;

        debug!(room_id, at, "translation cycle triggered");
        let tx = ensure_room(&self.shared, room_id).await;
        let _ = tx.send(RoomCommand::BeginCycle { at });
    }

    /// Recent room history for join replay. A failing store yields an
    /// empty history rather than an error.
    pub async fn history(&self, room_id: &str) -> Vec<Event> {
        match self
            .shared
            .store
            .recent(room_id, self.shared.history_limit)
            .await
        {
            Ok(events) => events,
            Err(e) => {
                warn!(room_id, error = %e, "history fetch failed, replaying nothing");
                Vec::new()
            }
        }
    }

    /// Member session IDs of a room. Empty for unknown rooms.
    pub async fn members_of(&self, room_id: &str) -> Vec<SessionId> {
        self.shared.registry.members_of(room_id).await
    }

    /// Room a session currently occupies, if any.
    pub async fn room_of(&self, session_id: &str) -> Option<RoomId> {
        self.shared.registry.room_of(session_id).await
    }

    pub async fn room_count(&self) -> usize {
        self.shared.registry.room_count().await
    }

    pub async fn session_count(&self) -> usize {
        let sessions = self.shared.sessions.read().await;
        sessions.len()
    }

    /// Run one maintenance pass: per-room guard sweeps plus reaping of
    /// rooms idle past the linger.
    pub async fn sweep_now(&self) {
        sweep_pass(&self.shared).await;
    }

    /// Spawn the periodic maintenance task. Admission never waits on
    /// this; it only bounds how long aged state lingers.
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let interval = shared.dedup.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                sweep_pass(&shared).await;
            }
        })
    }
}

/// Fetch a room's command channel, spawning its task on first use.
async fn ensure_room(
    shared: &Arc<Shared>,
    room_id: &str,
) -> mpsc::UnboundedSender<RoomCommand> {
    {
        let rooms = shared.rooms.read().await;
        if let Some(tx) = rooms.get(room_id) {
            return tx.clone();
        }
    }

    let mut rooms = shared.rooms.write().await;
    if let Some(tx) = rooms.get(room_id) {
        return tx.clone();
    }

    let (tx, rx) = mpsc::unbounded_channel();
    rooms.insert(room_id.to_string(), tx.clone());
    tokio::spawn(room_task(
        Arc::clone(shared),
        room_id.to_string(),
        rx,
    ));
    tx
}

/// Serialized per-room loop. Owns the room's dedup guard, so admission
/// state survives the room emptying out and only dies when the room is
/// reaped. The sweeper stops a room by dropping its sender; the loop
/// keeps draining until the channel closes, so a publish that raced
/// the reap is still processed rather than stranded in the queue.
async fn room_task(
    shared: Arc<Shared>,
    room_id: RoomId,
    mut rx: mpsc::UnboundedReceiver<RoomCommand>,
) {
    let mut guard = DedupGuard::new(&shared.dedup);
    debug!(room_id = %room_id, "room task started");

    while let Some(command) = rx.recv().await {
        match command {
            RoomCommand::Publish(event) => {
                handle_publish(&shared, &room_id, &mut guard, event).await;
            }
            RoomCommand::BeginCycle { at } => {
                guard.begin_cycle(at);
            }
            RoomCommand::Sweep => {
                let removed = guard.sweep(current_timestamp());
                if removed > 0 {
                    debug!(room_id = %room_id, removed, "dedup entries swept");
                }
            }
        }
    }

    debug!(room_id = %room_id, "room task stopped");
}

async fn handle_publish(
    shared: &Arc<Shared>,
    room_id: &str,
    guard: &mut DedupGuard,
    event: Event,
) {
    let now = current_timestamp();

    if event.is_result() {
        match guard.check_result(event.origin_ts, now) {
            ResultCheck::Pass => {}
            ResultCheck::Stale => {
                debug!(
                    room_id,
                    event_id = %event.id,
                    origin_ts = event.origin_ts,
                    watermark = guard.watermark(),
                    "dropping stale result"
                );
                return;
            }
            ResultCheck::CycleExpired => {
                debug!(
                    room_id,
                    event_id = %event.id,
                    "dropping result after cycle deadline"
                );
                return;
            }
        }
    }

    if !guard.admit(event.fingerprint(), now).accepted() {
        debug!(
            room_id,
            event_id = %event.id,
            kind = event.kind(),
            "dropping duplicate event"
        );
        return;
    }

    if event.is_result() {
        guard.advance_watermark(event.origin_ts);
    }

    // Persist off the hot path; a slow or failing store must not hold
    // up fan-out.
    {
        let store = Arc::clone(&shared.store);
        let event = event.clone();
        tokio::spawn(async move {
            if let Err(e) = store.append(&event).await {
                warn!(event_id = %event.id, error = %e, "event store append failed");
            }
        });
    }

    let members = shared.registry.members_of(room_id).await;
    let mut gone: Vec<SessionId> = Vec::new();
    {
        let sessions = shared.sessions.read().await;
        for session_id in &members {
            if let Some(handle) = sessions.get(session_id) {
                if !handle.send(SessionCommand::Deliver(event.clone())) {
                    gone.push(session_id.clone());
                }
            }
        }
    }

    // Failed sends mean the peer is gone; detach outside the read lock.
    for session_id in gone {
        debug!(room_id, session_id = %session_id, "send failed, detaching session");
        detach_session(shared, &session_id).await;
    }
}

/// Forget a session and remove it from its room. The sessions map is
/// the idempotence gate: only the caller that removes the handle runs
/// the leave.
async fn detach_session(shared: &Shared, session_id: &str) -> Option<RoomId> {
    let handle = {
        let mut sessions = shared.sessions.write().await;
        sessions.remove(session_id)
    }?;

    handle.begin_close();
    let left = shared.registry.leave(session_id).await;
    info!(session_id, room_id = ?left, "session disconnected");
    left
}

async fn sweep_pass(shared: &Arc<Shared>) {
    let txs: Vec<mpsc::UnboundedSender<RoomCommand>> = {
        let rooms = shared.rooms.read().await;
        rooms.values().cloned().collect()
    };
    for tx in txs {
        let _ = tx.send(RoomCommand::Sweep);
    }

    let reaped = shared.registry.sweep_idle(shared.linger).await;
    if !reaped.is_empty() {
        // Dropping the sender ends a room task once its queue drains.
        let mut rooms = shared.rooms.write().await;
        for room_id in &reaped {
            rooms.remove(room_id);
        }
        debug!(count = reaped.len(), "idle rooms reaped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RelayError, Result};
    use crate::relay::event::EventBody;
    use crate::relay::store::MemoryStore;
    use async_trait::async_trait;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::timeout;

    fn dispatcher() -> RelayDispatcher {
        RelayDispatcher::new(Arc::new(MemoryStore::new()), &RelayConfig::default())
    }

    async fn connect(
        d: &RelayDispatcher,
        id: &str,
        identity: &str,
    ) -> UnboundedReceiver<SessionCommand> {
        let (tx, rx) = mpsc::unbounded_channel();
        d.register_session(SessionHandle::new(id, identity, tx)).await;
        rx
    }

    async fn next_delivery(rx: &mut UnboundedReceiver<SessionCommand>) -> Event {
        match timeout(Duration::from_secs(1), rx.recv()).await {
            Ok(Some(SessionCommand::Deliver(event))) => event,
            other => panic!("expected a delivery, got {other:?}"),
        }
    }

    fn chat_text(event: &Event) -> &str {
        match &event.body {
            EventBody::ChatMessage { text } => text,
            other => panic!("expected chat body, got {other:?}"),
        }
    }

    struct FailingStore;

    #[async_trait]
    impl EventStore for FailingStore {
        async fn append(&self, _event: &Event) -> Result<()> {
            Err(RelayError::store("injected append failure"))
        }

        async fn recent(&self, _room_id: &str, _limit: usize) -> Result<Vec<Event>> {
            Err(RelayError::store("injected recent failure"))
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_all_members() {
        let d = dispatcher();
        let mut rx1 = connect(&d, "s1", "alice").await;
        let mut rx2 = connect(&d, "s2", "bob").await;
        d.join("s1", "r1").await;
        d.join("s2", "r1").await;

        d.publish(Event::chat("r1", "alice", "hello room", 100)).await;

        let e1 = next_delivery(&mut rx1).await;
        let e2 = next_delivery(&mut rx2).await;
        assert_eq!(e1.id, e2.id);
        assert_eq!(chat_text(&e1), "hello room");
    }

    #[tokio::test]
    async fn test_duplicate_publish_delivers_once() {
        let d = dispatcher();
        let mut rx = connect(&d, "s1", "alice").await;
        d.join("s1", "r1").await;

        // The same content published twice, as separate events.
        d.publish(Event::chat("r1", "alice", "hi", 100)).await;
        d.publish(Event::chat("r1", "alice", "hi", 100)).await;
        d.publish(Event::chat("r1", "alice", "marker", 101)).await;

        assert_eq!(chat_text(&next_delivery(&mut rx).await), "hi");
        // FIFO: if the duplicate had been delivered, it would precede
        // the marker.
        assert_eq!(chat_text(&next_delivery(&mut rx).await), "marker");
    }

    #[tokio::test]
    async fn test_per_room_delivery_is_fifo() {
        let d = dispatcher();
        let mut rx = connect(&d, "s1", "alice").await;
        d.join("s1", "r1").await;

        for i in 0..5 {
            d.publish(Event::chat("r1", "alice", format!("m{i}"), 100 + i))
                .await;
        }

        for i in 0..5 {
            let event = next_delivery(&mut rx).await;
            assert_eq!(chat_text(&event), format!("m{i}"));
        }
    }

    #[tokio::test]
    async fn test_no_cross_room_leakage() {
        let d = dispatcher();
        let mut rx1 = connect(&d, "s1", "alice").await;
        let mut rx2 = connect(&d, "s2", "bob").await;
        d.join("s1", "r1").await;
        d.join("s2", "r2").await;

        d.publish(Event::chat("r1", "alice", "for r1 only", 100)).await;
        assert_eq!(chat_text(&next_delivery(&mut rx1).await), "for r1 only");

        d.publish(Event::chat("r2", "bob", "r2 marker", 200)).await;
        assert_eq!(chat_text(&next_delivery(&mut rx2).await), "r2 marker");
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dead_member_does_not_abort_fanout() {
        let d = dispatcher();
        let mut rx1 = connect(&d, "s1", "alice").await;
        let rx2 = connect(&d, "s2", "bob").await;
        d.join("s1", "r1").await;
        d.join("s2", "r1").await;
        // s2's writer is gone before the publish.
        drop(rx2);

        d.publish(Event::chat("r1", "alice", "still flowing", 100)).await;
        assert_eq!(chat_text(&next_delivery(&mut rx1).await), "still flowing");

        // The failed send detached s2 from the room and the session map.
        d.publish(Event::chat("r1", "alice", "marker", 101)).await;
        next_delivery(&mut rx1).await;
        assert_eq!(d.members_of("r1").await, vec!["s1".to_string()]);
        assert_eq!(d.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_detach_after_send_failure_is_idempotent() {
        let d = dispatcher();
        let mut rx1 = connect(&d, "s1", "alice").await;
        let rx2 = connect(&d, "s2", "bob").await;
        d.join("s1", "r1").await;
        d.join("s2", "r1").await;
        drop(rx2);

        // Two publishes both observe the dead writer.
        d.publish(Event::chat("r1", "alice", "one", 100)).await;
        d.publish(Event::chat("r1", "alice", "two", 101)).await;
        next_delivery(&mut rx1).await;
        next_delivery(&mut rx1).await;

        // The disconnect already ran; a later explicit one is a no-op.
        assert!(d.disconnect("s2").await.is_none());
        assert_eq!(d.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_stale_results_are_dropped() {
        let d = dispatcher();
        let mut rx = connect(&d, "s1", "alice").await;
        d.join("s1", "r1").await;

        d.begin_cycle("r1").await;
        let t0 = current_timestamp();

        // Behind the trigger baseline: output of an earlier cycle.
        d.publish(Event::translation("r1", "pipeline", "late sentence", t0 - 60_000))
            .await;
        // Ahead of the baseline: delivered, and only once.
        d.publish(Event::translation("r1", "pipeline", "fresh sentence", t0 + 60_000))
            .await;
        d.publish(Event::translation("r1", "pipeline", "fresh sentence", t0 + 60_000))
            .await;
        // Behind the advanced watermark now.
        d.publish(Event::translation("r1", "pipeline", "middle sentence", t0 + 30_000))
            .await;
        d.publish(Event::chat("r1", "alice", "marker", 1)).await;

        let delivered = next_delivery(&mut rx).await;
        assert!(delivered.is_result());
        match &delivered.body {
            EventBody::TranslationResult { sentence } => {
                assert_eq!(sentence, "fresh sentence")
            }
            other => panic!("unexpected body: {other:?}"),
        }
        assert_eq!(chat_text(&next_delivery(&mut rx).await), "marker");
    }

    #[tokio::test]
    async fn test_new_cycle_rebaselines_watermark() {
        let d = dispatcher();
        let mut rx = connect(&d, "s1", "alice").await;
        d.join("s1", "r1").await;

        d.begin_cycle("r1").await;
        let t0 = current_timestamp();
        d.publish(Event::translation("r1", "pipeline", "cycle one", t0 + 60_000))
            .await;
        assert!(next_delivery(&mut rx).await.is_result());

        // A fresh trigger resets the baseline below the old watermark,
        // so a timestamp between the two is accepted again.
        d.begin_cycle("r1").await;
        d.publish(Event::translation("r1", "pipeline", "cycle two", t0 + 5_000))
            .await;

        let delivered = next_delivery(&mut rx).await;
        match &delivered.body {
            EventBody::TranslationResult { sentence } => assert_eq!(sentence, "cycle two"),
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_video_results_share_the_watermark() {
        let d = dispatcher();
        let mut rx = connect(&d, "s1", "alice").await;
        d.join("s1", "r1").await;

        d.begin_cycle("r1").await;
        let t0 = current_timestamp();

        // A video left over from the previous cycle is behind the baseline.
        d.publish(Event::video("r1", "renderer", "https://cdn/v/old.mp4", t0 - 60_000))
            .await;
        d.publish(Event::video("r1", "renderer", "https://cdn/v/new.mp4", t0 + 60_000))
            .await;

        let delivered = next_delivery(&mut rx).await;
        match &delivered.body {
            EventBody::VideoReady { url } => assert_eq!(url, "https://cdn/v/new.mp4"),
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_store_failure_does_not_block_fanout() {
        let d = RelayDispatcher::new(Arc::new(FailingStore), &RelayConfig::default());
        let mut rx = connect(&d, "s1", "alice").await;
        d.join("s1", "r1").await;

        d.publish(Event::chat("r1", "alice", "persisted nowhere", 100))
            .await;
        assert_eq!(
            chat_text(&next_delivery(&mut rx).await),
            "persisted nowhere"
        );

        // History degrades to empty instead of failing the join path.
        assert!(d.history("r1").await.is_empty());
    }

    #[tokio::test]
    async fn test_admission_survives_memberless_publish() {
        let d = dispatcher();

        // Nobody is in the room yet; the event is still admitted.
        d.publish(Event::chat("ghost", "alice", "early", 100)).await;

        let mut rx = connect(&d, "s1", "alice").await;
        d.join("s1", "ghost").await;

        // Same content again: refused by the surviving guard, so the
        // new member only sees the marker.
        d.publish(Event::chat("ghost", "alice", "early", 100)).await;
        d.publish(Event::chat("ghost", "alice", "marker", 200)).await;
        assert_eq!(chat_text(&next_delivery(&mut rx).await), "marker");
    }

    #[tokio::test]
    async fn test_history_replays_recent_events() {
        let d = dispatcher();
        let mut rx = connect(&d, "s1", "alice").await;
        d.join("s1", "r1").await;

        d.publish(Event::chat("r1", "alice", "first", 100)).await;
        d.publish(Event::chat("r1", "alice", "second", 200)).await;
        next_delivery(&mut rx).await;
        next_delivery(&mut rx).await;

        // Store appends are fire-and-forget; poll until both landed.
        let mut events = Vec::new();
        for _ in 0..100 {
            events = d.history("r1").await;
            if events.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(events.len(), 2);
        assert_eq!(chat_text(&events[0]), "first");
        assert_eq!(chat_text(&events[1]), "second");
    }

    #[tokio::test]
    async fn test_join_summary_lists_members() {
        let d = dispatcher();
        let _rx1 = connect(&d, "s1", "alice").await;
        let _rx2 = connect(&d, "s2", "bob").await;

        d.join("s1", "r1").await;
        let summary = d.join("s2", "r1").await;

        assert_eq!(summary.room_id, "r1");
        assert!(!summary.rejoined);
        assert!(summary.left.is_none());
        let mut members = summary.members;
        members.sort();
        assert_eq!(
            members,
            vec![
                ("s1".to_string(), "alice".to_string()),
                ("s2".to_string(), "bob".to_string()),
            ]
        );

        let again = d.join("s2", "r1").await;
        assert!(again.rejoined);
    }

    #[tokio::test]
    async fn test_switching_rooms_updates_membership() {
        let d = dispatcher();
        let _rx = connect(&d, "s1", "alice").await;

        d.join("s1", "r1").await;
        let summary = d.join("s1", "r2").await;

        assert_eq!(summary.left.as_deref(), Some("r1"));
        assert!(d.members_of("r1").await.is_empty());
        assert_eq!(d.members_of("r2").await, vec!["s1".to_string()]);
    }

    #[tokio::test]
    async fn test_sweep_reaps_idle_rooms() {
        let config = RelayConfig::default().with_room_linger_secs(0);
        let d = RelayDispatcher::new(Arc::new(MemoryStore::new()), &config);
        let _rx = connect(&d, "s1", "alice").await;

        d.join("s1", "r1").await;
        d.leave("s1").await;
        assert_eq!(d.room_count().await, 1);

        d.sweep_now().await;
        assert_eq!(d.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_publish_racing_reap_is_not_lost() {
        let config = RelayConfig::default().with_room_linger_secs(0);
        let d = RelayDispatcher::new(Arc::new(MemoryStore::new()), &config);

        // Memberless room with zero linger: every pass reaps it. Race
        // publishes against the reap; whichever side wins a round, no
        // event may be dropped.
        for i in 0..20u64 {
            d.publish(Event::chat("r1", "pipeline", format!("m{i}"), i))
                .await;
            tokio::join!(
                d.publish(Event::chat("r1", "pipeline", format!("n{i}"), 1_000 + i)),
                d.sweep_now(),
            );
        }

        let mut events = Vec::new();
        for _ in 0..100 {
            events = d.history("r1").await;
            if events.len() == 40 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(events.len(), 40);
    }

    #[tokio::test]
    async fn test_disconnect_cleans_up() {
        let d = dispatcher();
        let _rx = connect(&d, "s1", "alice").await;
        d.join("s1", "r1").await;

        assert_eq!(d.disconnect("s1").await.as_deref(), Some("r1"));
        assert!(d.members_of("r1").await.is_empty());
        assert_eq!(d.session_count().await, 0);

        // Second disconnect is a no-op.
        assert!(d.disconnect("s1").await.is_none());
    }

    #[tokio::test]
    async fn test_leave_keeps_session_connected() {
        let d = dispatcher();
        let mut rx = connect(&d, "s1", "alice").await;

        d.join("s1", "r1").await;
        assert_eq!(d.leave("s1").await.as_deref(), Some("r1"));
        // Not in a room: leave again is a no-op.
        assert!(d.leave("s1").await.is_none());
        assert_eq!(d.session_count().await, 1);

        // Rejoining still works on the same session.
        d.join("s1", "r1").await;
        d.publish(Event::chat("r1", "alice", "back again", 100)).await;
        assert_eq!(chat_text(&next_delivery(&mut rx).await), "back again");
    }
}
