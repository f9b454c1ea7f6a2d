//! The single-writer DeliveryHub actor.
//!
//! One `tokio::task` owns every live session. Nothing else ever reads or
//! mutates the session table — all state transitions (register, unregister,
//! broadcast) enter through bounded channels and are applied one at a time
//! inside `run()`. This is what makes per-user caps, eviction, and rate
//! limiting race-free without a lock: there is only ever one writer.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use nexus_core_common::config::HubConfig;
use nexus_core_common::event::{Event, EventTarget};
use nexus_core_db::repository::participants;
use nexus_core_db::Database;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::session::SessionHandle;

/// Outcome of a connect attempt, handed back to the caller over a oneshot.
#[derive(Debug)]
pub enum RegisterOutcome {
    Registered { session_id: Uuid },
    RateLimited,
}

struct RegisterRequest {
    user_id: Uuid,
    device_id: Uuid,
    outbound_tx: mpsc::Sender<Event>,
    respond_to: oneshot::Sender<RegisterOutcome>,
}

struct UnregisterRequest {
    user_id: Uuid,
    session_id: Uuid,
}

struct BroadcastRequest {
    target: EventTarget,
    event: Event,
}

/// Cloneable front door to the hub. Every `axum` connection handler and
/// every REST endpoint that needs to fan out an event holds one of these —
/// never the actor itself.
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<RegisterRequest>,
    unregister_tx: mpsc::Sender<UnregisterRequest>,
    broadcast_tx: mpsc::Sender<BroadcastRequest>,
}

impl HubHandle {
    /// Register a new session for `(user_id, device_id)`. Connection K+1
    /// for the same user evicts the oldest live session for that user;
    /// exceeding the per-user connect rate limit returns `RateLimited`
    /// instead of registering.
    pub async fn register(
        &self,
        user_id: Uuid,
        device_id: Uuid,
        outbound_tx: mpsc::Sender<Event>,
    ) -> RegisterOutcome {
        let (respond_to, rx) = oneshot::channel();
        if self
            .register_tx
            .send(RegisterRequest {
                user_id,
                device_id,
                outbound_tx,
                respond_to,
            })
            .await
            .is_err()
        {
            return RegisterOutcome::RateLimited;
        }
        rx.await.unwrap_or(RegisterOutcome::RateLimited)
    }

    pub async fn unregister(&self, user_id: Uuid, session_id: Uuid) {
        let _ = self
            .unregister_tx
            .send(UnregisterRequest { user_id, session_id })
            .await;
    }

    /// Fan an event out to its target. Never blocks indefinitely — the
    /// control channel itself is bounded and callers should treat a full
    /// channel as backpressure from the hub.
    pub async fn dispatch(&self, target: EventTarget, event: Event) {
        let _ = self.broadcast_tx.send(BroadcastRequest { target, event }).await;
    }
}

struct HubActor {
    db: Database,
    cfg: HubConfig,
    /// user_id -> live sessions, ordered oldest-first. Eviction always
    /// drops index 0.
    sessions: HashMap<Uuid, Vec<SessionHandle>>,
    /// user_id -> recent connect timestamps, pruned to the rate-limit window.
    connect_times: HashMap<Uuid, VecDeque<Instant>>,
}

impl HubActor {
    fn handle_register(&mut self, req: RegisterRequest) {
        let now = Instant::now();
        let window = Duration::from_secs(60);

        let times = self.connect_times.entry(req.user_id).or_default();
        while times.front().is_some_and(|t| now.duration_since(*t) > window) {
            times.pop_front();
        }
        if times.len() as u32 >= self.cfg.connect_rate_limit_per_minute {
            let _ = req.respond_to.send(RegisterOutcome::RateLimited);
            return;
        }
        times.push_back(now);

        let session_id = Uuid::now_v7();
        let handle = SessionHandle {
            session_id,
            device_id: req.device_id,
            outbound_tx: req.outbound_tx,
            connected_at: now,
        };

        let user_sessions = self.sessions.entry(req.user_id).or_default();
        user_sessions.push(handle);
        while user_sessions.len() as u32 > self.cfg.max_sessions_per_user {
            let evicted = user_sessions.remove(0);
            tracing::info!(
                user_id = %req.user_id,
                session_id = %evicted.session_id,
                "evicting oldest session — per-user connection cap exceeded"
            );
            // Dropping `evicted` closes its outbound channel; the write
            // pump observes the close and tears the socket down.
        }

        let _ = req.respond_to.send(RegisterOutcome::Registered { session_id });
    }

    fn handle_unregister(&mut self, req: UnregisterRequest) {
        if let Some(sessions) = self.sessions.get_mut(&req.user_id) {
            sessions.retain(|s| s.session_id != req.session_id);
            if sessions.is_empty() {
                self.sessions.remove(&req.user_id);
            }
        }
    }

    async fn handle_broadcast(&mut self, req: BroadcastRequest) {
        let user_ids = match req.target {
            EventTarget::Users(ids) => ids,
            EventTarget::Conversation(conversation_id) => {
                match participants::list_active_participants(&self.db.pool, conversation_id).await {
                    Ok(rows) => rows.into_iter().map(|p| p.user_id).collect(),
                    Err(e) => {
                        tracing::error!(error = %e, %conversation_id, "failed to resolve conversation membership for fan-out");
                        return;
                    }
                }
            }
        };

        for user_id in user_ids {
            let Some(sessions) = self.sessions.get(&user_id) else {
                continue;
            };
            for session in sessions {
                // try_send: a session whose outbound queue is full gets this
                // event dropped rather than stalling the whole hub. Clients
                // reconcile via the REST history endpoint.
                if session.outbound_tx.try_send(req.event.clone()).is_err() {
                    tracing::warn!(
                        %user_id,
                        session_id = %session.session_id,
                        "dropping event — session outbound queue full"
                    );
                }
            }
        }
    }

    async fn run(
        mut self,
        mut register_rx: mpsc::Receiver<RegisterRequest>,
        mut unregister_rx: mpsc::Receiver<UnregisterRequest>,
        mut broadcast_rx: mpsc::Receiver<BroadcastRequest>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    tracing::info!("hub actor shutting down");
                    break;
                }
                Some(req) = register_rx.recv() => self.handle_register(req),
                Some(req) = unregister_rx.recv() => self.handle_unregister(req),
                Some(req) = broadcast_rx.recv() => self.handle_broadcast(req).await,
                else => break,
            }
        }
    }
}

/// Spawn the hub actor and return a handle to it. `shutdown` lets the
/// server orchestrate a graceful stop — in-flight sends finish before the
/// actor observes cancellation on its next select iteration.
pub fn spawn(db: Database, cfg: HubConfig, shutdown: CancellationToken) -> HubHandle {
    let depth = cfg.control_channel_depth;
    let (register_tx, register_rx) = mpsc::channel(depth);
    let (unregister_tx, unregister_rx) = mpsc::channel(depth);
    let (broadcast_tx, broadcast_rx) = mpsc::channel(depth);

    let actor = HubActor {
        db,
        cfg,
        sessions: HashMap::new(),
        connect_times: HashMap::new(),
    };

    tokio::spawn(actor.run(register_rx, unregister_rx, broadcast_rx, shutdown));

    HubHandle {
        register_tx,
        unregister_tx,
        broadcast_tx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_core_common::event::{Event, EventKind};
    use nexus_core_db::DbBackend;
    use sqlx::any::AnyPoolOptions;

    async fn test_db() -> Database {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(
            r#"
            CREATE TABLE participants (
                conversation_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                role TEXT NOT NULL,
                last_read_sequence BIGINT NOT NULL DEFAULT 0,
                joined_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                removed_at TEXT
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();
        Database {
            pool,
            redis: None,
            backend: DbBackend::Sqlite,
        }
    }

    fn test_cfg() -> HubConfig {
        HubConfig {
            max_sessions_per_user: 2,
            connect_rate_limit_per_minute: 3,
            session_outbound_queue_depth: 8,
            control_channel_depth: 32,
            membership_snapshot_page_cap: 1000,
            write_deadline_secs: 10,
            ping_interval_secs: 30,
            shutdown_grace_secs: 5,
        }
    }

    #[tokio::test]
    async fn registering_beyond_the_cap_evicts_the_oldest_session() {
        let db = test_db().await;
        let shutdown = CancellationToken::new();
        let hub = spawn(db, test_cfg(), shutdown.clone());
        let user_id = Uuid::now_v7();

        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, _rx2) = mpsc::channel(8);
        let (tx3, _rx3) = mpsc::channel(8);

        let RegisterOutcome::Registered { .. } =
            hub.register(user_id, Uuid::now_v7(), tx1).await
        else {
            panic!("expected registration to succeed");
        };
        let RegisterOutcome::Registered { .. } =
            hub.register(user_id, Uuid::now_v7(), tx2).await
        else {
            panic!("expected registration to succeed");
        };
        let RegisterOutcome::Registered { .. } =
            hub.register(user_id, Uuid::now_v7(), tx3).await
        else {
            panic!("expected registration to succeed");
        };

        // The first session was evicted once the cap of 2 was exceeded —
        // its outbound channel should now be closed.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx1.recv().await.is_none());

        shutdown.cancel();
    }

    #[tokio::test]
    async fn connect_rate_limit_rejects_excess_attempts() {
        let db = test_db().await;
        let shutdown = CancellationToken::new();
        let mut cfg = test_cfg();
        cfg.connect_rate_limit_per_minute = 2;
        let hub = spawn(db, cfg, shutdown.clone());
        let user_id = Uuid::now_v7();

        for _ in 0..2 {
            let (tx, _rx) = mpsc::channel(8);
            let outcome = hub.register(user_id, Uuid::now_v7(), tx).await;
            assert!(matches!(outcome, RegisterOutcome::Registered { .. }));
        }

        let (tx, _rx) = mpsc::channel(8);
        let outcome = hub.register(user_id, Uuid::now_v7(), tx).await;
        assert!(matches!(outcome, RegisterOutcome::RateLimited));

        shutdown.cancel();
    }

    #[tokio::test]
    async fn dispatch_to_users_reaches_every_live_session() {
        let db = test_db().await;
        let shutdown = CancellationToken::new();
        let hub = spawn(db, test_cfg(), shutdown.clone());
        let alice = Uuid::now_v7();
        let bob = Uuid::now_v7();

        let (alice_tx, mut alice_rx) = mpsc::channel(8);
        let (bob_tx, mut bob_rx) = mpsc::channel(8);
        hub.register(alice, Uuid::now_v7(), alice_tx).await;
        hub.register(bob, Uuid::now_v7(), bob_tx).await;

        let event = Event::new(EventKind::TypingStarted, serde_json::json!({"ok": true}));
        hub.dispatch(EventTarget::Users(vec![alice, bob]), event.clone()).await;

        let got_alice = alice_rx.recv().await.unwrap();
        let got_bob = bob_rx.recv().await.unwrap();
        assert_eq!(got_alice.kind, EventKind::TypingStarted);
        assert_eq!(got_bob.kind, EventKind::TypingStarted);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn dispatch_to_conversation_resolves_membership_from_the_database() {
        let db = test_db().await;
        let conversation_id = Uuid::now_v7();
        let alice = Uuid::now_v7();
        sqlx::query(
            "INSERT INTO participants (conversation_id, user_id, role, last_read_sequence, joined_at) VALUES (?, ?, 'MEMBER', 0, CURRENT_TIMESTAMP)",
        )
        .bind(conversation_id.to_string())
        .bind(alice.to_string())
        .execute(&db.pool)
        .await
        .unwrap();

        let shutdown = CancellationToken::new();
        let hub = spawn(db, test_cfg(), shutdown.clone());

        let (alice_tx, mut alice_rx) = mpsc::channel(8);
        hub.register(alice, Uuid::now_v7(), alice_tx).await;

        let event = Event::new(EventKind::MessageNew, serde_json::json!({"ok": true}));
        hub.dispatch(EventTarget::Conversation(conversation_id), event).await;

        let got = alice_rx.recv().await.unwrap();
        assert_eq!(got.kind, EventKind::MessageNew);

        shutdown.cancel();
    }
}
