//! End-to-end flow: subscribe, deliver live, buffer while disconnected,
//! replay on resume.

use pulse_core::error::{CapacityError, PulseError};
use pulse_core::types::{DeliveryMethod, Identity, Priority, Record};
use pulse_engine::alert::{AlertDispatcher, DispatchConfig, QueueHandler};
use pulse_engine::filter::{FilterCondition, FilterExpression, FilterLogic, FilterOperator};
use pulse_engine::pipeline::AlertPipeline;
use pulse_engine::subscription::{NewSubscription, SubscriptionManager, SubscriptionManagerConfig};
use pulse_gateway::{
    Envelope, Gateway, GatewayConfig, PoolConfig, PoolConnState, ReconnectConfig, ReconnectState,
    RoomType, SessionConfig,
};
use pulse_resilience::CircuitBreakerRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn gateway(config: GatewayConfig) -> Arc<Gateway> {
    let dispatcher = Arc::new(AlertDispatcher::new(
        DispatchConfig::default(),
        Arc::new(CircuitBreakerRegistry::default()),
    ));
    let subscriptions = Arc::new(SubscriptionManager::new(SubscriptionManagerConfig::default()));
    let pipeline = Arc::new(AlertPipeline::new(subscriptions, dispatcher));
    Arc::new(Gateway::new(config, pipeline))
}

fn moutai_watch() -> NewSubscription {
    let filter = FilterExpression::new("moutai", FilterLogic::And)
        .with_condition(FilterCondition::new("symbol", FilterOperator::Eq, "600519"))
        .with_condition(FilterCondition::new("price", FilterOperator::Gte, 1800.0));
    NewSubscription::new("moutai breakout", filter).with_priority(Priority::High)
}

fn tick(price: f64) -> Record {
    Record::new().with("symbol", "600519").with("price", price)
}

fn drain(receiver: &mut mpsc::Receiver<Envelope>) -> Vec<Envelope> {
    let mut out = Vec::new();
    while let Ok(envelope) = receiver.try_recv() {
        out.push(envelope);
    }
    out
}

#[tokio::test]
async fn test_live_delivery_then_buffer_and_replay() {
    let gw = gateway(GatewayConfig::default());
    let alice = Identity::user("alice");
    gw.pipeline().subscribe(&alice, moutai_watch()).await.unwrap();

    let mut session = gw.connect(&alice).await.unwrap();
    let alerts = gw.process_record(&tick(1850.0)).await;
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].is_delivered());

    let live = drain(&mut session.receiver);
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].event, "alert");
    assert!(!live[0].replayed);

    // While disconnected, alerts are buffered and still count as delivered.
    let connection_id = session.connection_id.clone();
    gw.disconnect(&connection_id, false);
    for price in [1860.0, 1870.0, 1880.0] {
        let alerts = gw.process_record(&tick(price)).await;
        assert!(alerts[0].is_delivered());
    }
    assert_eq!(gw.coordinator().unsent_messages(&connection_id).len(), 3);
    assert_eq!(gw.reconnect_hint(&connection_id), Some(Duration::from_secs(1)));

    let mut resumed = gw.resume(&alice, &connection_id).await.unwrap();
    assert_eq!(resumed.replay.sent, 3);
    assert_eq!(resumed.replay.remaining, 0);

    let replayed = drain(&mut resumed.receiver);
    let prices: Vec<f64> = replayed
        .iter()
        .map(|e| e.payload["data"]["price"].as_f64().unwrap())
        .collect();
    assert_eq!(prices, vec![1860.0, 1870.0, 1880.0]);
    assert!(replayed.iter().all(|e| e.replayed));
    assert_eq!(gw.coordinator().state(&connection_id), Some(ReconnectState::Connected));
}

#[tokio::test]
async fn test_resume_rejects_other_users() {
    let gw = gateway(GatewayConfig::default());
    let alice = Identity::user("alice");
    let session = gw.connect(&alice).await.unwrap();
    gw.disconnect(&session.connection_id, false);

    let err = gw
        .resume(&Identity::user("mallory"), &session.connection_id)
        .await
        .unwrap_err();
    assert!(err.is_validation_error());

    // Resuming a live connection is rejected too.
    gw.resume(&alice, &session.connection_id).await.unwrap();
    assert!(gw.resume(&alice, &session.connection_id).await.is_err());
}

#[tokio::test]
async fn test_reconnecting_user_gets_parked_connection_back() {
    let gw = gateway(GatewayConfig::default());
    let alice = Identity::user("alice");
    gw.pipeline().subscribe(&alice, moutai_watch()).await.unwrap();

    let first = gw.connect(&alice).await.unwrap();
    gw.disconnect(&first.connection_id, false);
    gw.process_record(&tick(1900.0)).await;

    let mut second = gw.connect(&alice).await.unwrap();
    assert_eq!(second.connection_id, first.connection_id);
    assert_eq!(second.replay.sent, 1);
    assert_eq!(drain(&mut second.receiver).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pool_exhaustion_is_retryable() {
    let gw = gateway(GatewayConfig {
        pool: PoolConfig {
            max_size: 1,
            acquire_timeout: Duration::from_millis(100),
            ..PoolConfig::default()
        },
        ..GatewayConfig::default()
    });
    let _alice = gw.connect(&Identity::user("alice")).await.unwrap();

    let err = gw.connect(&Identity::user("bob")).await.unwrap_err();
    assert!(matches!(
        err,
        PulseError::Capacity(CapacityError::PoolExhausted { max_size: 1, .. })
    ));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_sweep_purges_failed_connections() {
    let gw = gateway(GatewayConfig {
        reconnect: ReconnectConfig {
            max_retries: 0,
            ..ReconnectConfig::default()
        },
        ..GatewayConfig::default()
    });
    let alice = Identity::user("alice");
    let session = gw.connect(&alice).await.unwrap();
    gw.disconnect(&session.connection_id, true);

    assert!(gw.resume(&alice, &session.connection_id).await.is_err());
    assert_eq!(
        gw.coordinator().state(&session.connection_id),
        Some(ReconnectState::ReconnectFailed)
    );

    let report = gw.sweep();
    assert_eq!(report.failed_purged, 1);
    assert!(!gw.pool().contains(&session.connection_id));
    assert!(!gw.coordinator().is_tracked(&session.connection_id));
}

#[tokio::test]
async fn test_room_broadcast_reaches_sessions() {
    let gw = gateway(GatewayConfig::default());
    let owner = Identity::user("owner");
    let alice = Identity::user("alice");
    let mut session = gw.connect(&alice).await.unwrap();

    let room = gw
        .rooms()
        .create_room(&owner, "a-share desk", RoomType::Public, Some(2))
        .unwrap();
    gw.rooms().join_room(&alice, &room.id).unwrap();

    let report = gw
        .rooms()
        .broadcast(None, &room.id, Record::new().with("text", "limit up"))
        .await
        .unwrap();
    assert_eq!(report.delivered, 1);

    let frames = drain(&mut session.receiver);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].event, "room_message");
    assert_eq!(frames[0].room.as_ref(), Some(&room.id));
}

#[tokio::test]
async fn test_email_outage_does_not_block_websocket() {
    let gw = gateway(GatewayConfig::default());
    let (email, email_rx) = QueueHandler::channel(DeliveryMethod::Email, 4);
    gw.pipeline().dispatcher().register_handler(Arc::new(email));
    drop(email_rx);

    let alice = Identity::user("alice");
    gw.pipeline()
        .subscribe(
            &alice,
            moutai_watch().with_methods([DeliveryMethod::WebSocket, DeliveryMethod::Email]),
        )
        .await
        .unwrap();
    let mut session = gw.connect(&alice).await.unwrap();

    for _ in 0..4 {
        let alerts = gw.process_record(&tick(1850.0)).await;
        assert!(alerts[0].is_delivered());
    }
    assert_eq!(drain(&mut session.receiver).len(), 4);

    let email_breaker = gw.pipeline().dispatcher().breakers().get("email");
    assert!(email_breaker.is_open());
    let stats = gw.stats();
    assert_eq!(stats.dispatcher.methods[DeliveryMethod::Email.index()].breaker_rejected, 1);
    assert_eq!(stats.breakers.open, 1);
    assert_eq!(stats.sessions, 1);
}

#[tokio::test]
async fn test_shutdown_closes_everything() {
    let gw = gateway(GatewayConfig::default());
    gw.start();
    let mut session = gw.connect(&Identity::user("alice")).await.unwrap();

    gw.shutdown();
    assert!(session.receiver.recv().await.is_none());
    let err = gw.connect(&Identity::user("alice")).await.unwrap_err();
    assert!(matches!(err, PulseError::Capacity(CapacityError::PoolClosed)));
    assert_eq!(gw.stats().pool.total, 0);
}

/// Six stalled sessions time out side by side, well inside the dispatcher's
/// handler timeout, so none is left active and the alert is buffered.
#[tokio::test(start_paused = true)]
async fn test_stalled_sessions_are_released_and_buffered() {
    let gw = gateway(GatewayConfig {
        session: SessionConfig {
            queue_size: 1,
            ..SessionConfig::default()
        },
        ..GatewayConfig::default()
    });
    let alice = Identity::user("alice");
    gw.pipeline().subscribe(&alice, moutai_watch()).await.unwrap();

    let mut sessions = Vec::new();
    for _ in 0..6 {
        sessions.push(gw.connect(&alice).await.unwrap());
    }

    // The first alert fills every queue; nobody reads them.
    assert!(gw.process_record(&tick(1850.0)).await[0].is_delivered());
    let alerts = gw.process_record(&tick(1860.0)).await;
    assert!(alerts[0].is_delivered());

    for session in &sessions {
        let id = &session.connection_id;
        let conn = gw.pool().get(id).unwrap();
        assert_ne!(conn.state, PoolConnState::Active);
        assert_eq!(conn.error_count, 1);
        assert_eq!(gw.coordinator().state(id), Some(ReconnectState::Disconnected));
        assert_eq!(gw.coordinator().unsent_messages(id).len(), 1);
    }

    let breaker = gw.pipeline().dispatcher().breakers().get("websocket").snapshot();
    assert_eq!(breaker.total_successes, 1);
    assert_eq!(breaker.total_failures, 1);
}
