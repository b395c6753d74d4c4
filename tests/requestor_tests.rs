use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use majordomo_lite::config::RequestorConfig;
use majordomo_lite::requestor::{RequestSettings, Requestor};
use majordomo_lite::transport::{Envelope, LoopbackBus, MessageTransport};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct CreateOrder {
    sku: String,
    quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct OrderCreated {
    order_id: u64,
}

/// Remote command handler: answers every request on the channel.
fn spawn_echo_responder(bus: Arc<LoopbackBus>, channel: &str, order_id: u64) {
    let mut requests = bus.subscribe(channel);
    tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            let response = Envelope::respond_to(&request, "svc-remote")
                .with_payload(serde_json::to_vec(&OrderCreated { order_id }).unwrap());
            let _ = bus.transmit(response);
        }
    });
}

#[tokio::test]
async fn round_trip_through_response_pump() {
    let bus = Arc::new(LoopbackBus::new());
    spawn_echo_responder(bus.clone(), "orders", 42);

    let requestor = Arc::new(Requestor::new(
        RequestorConfig::new("replies"),
        "svc-a",
        bus.clone(),
    ));
    let cancel = CancellationToken::new();
    let pump = requestor.spawn_response_pump(bus.subscribe("replies"), cancel.clone());

    let wrapper = requestor
        .process_outgoing::<CreateOrder, OrderCreated>(
            "orders",
            "command",
            "create",
            &CreateOrder {
                sku: "A-100".into(),
                quantity: 3,
            },
            RequestSettings::default(),
            None,
        )
        .await
        .unwrap();

    assert!(wrapper.is_success());
    assert_eq!(wrapper.response, Some(OrderCreated { order_id: 42 }));
    assert_eq!(requestor.pending_len(), 0);
    assert_eq!(requestor.metrics().active(), 0);
    assert_eq!(requestor.metrics().completed(), 1);

    cancel.cancel();
    let _ = pump.await;
}

#[tokio::test]
async fn concurrent_requests_correlate_independently() {
    let bus = Arc::new(LoopbackBus::new());
    spawn_echo_responder(bus.clone(), "orders", 7);

    let requestor = Arc::new(Requestor::new(
        RequestorConfig::new("replies"),
        "svc-a",
        bus.clone(),
    ));
    let cancel = CancellationToken::new();
    let pump = requestor.spawn_response_pump(bus.subscribe("replies"), cancel.clone());

    let mut calls = Vec::new();
    for i in 0..8u32 {
        let requestor = requestor.clone();
        calls.push(tokio::spawn(async move {
            requestor
                .process_outgoing::<CreateOrder, OrderCreated>(
                    "orders",
                    "command",
                    "create",
                    &CreateOrder {
                        sku: format!("A-{i}"),
                        quantity: i,
                    },
                    RequestSettings::default(),
                    None,
                )
                .await
        }));
    }

    for call in calls {
        let wrapper = call.await.unwrap().unwrap();
        assert_eq!(wrapper.response_code, 200);
        assert_eq!(wrapper.response, Some(OrderCreated { order_id: 7 }));
    }
    assert_eq!(requestor.pending_len(), 0);
    assert_eq!(requestor.metrics().completed(), 8);

    cancel.cancel();
    let _ = pump.await;
}

#[tokio::test]
async fn no_responder_resolves_timeout_not_error() {
    let bus = Arc::new(LoopbackBus::new());
    let requestor = Arc::new(Requestor::new(
        RequestorConfig::new("replies"),
        "svc-a",
        bus.clone(),
    ));
    let cancel = CancellationToken::new();
    let pump = requestor.spawn_response_pump(bus.subscribe("replies"), cancel.clone());

    let wrapper = requestor
        .process_outgoing::<CreateOrder, OrderCreated>(
            "orders",
            "command",
            "create",
            &CreateOrder {
                sku: "A-1".into(),
                quantity: 1,
            },
            RequestSettings {
                wait_time: Some(Duration::from_millis(60)),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();

    assert_eq!(wrapper.response_code, 408);
    assert!(!wrapper.is_success());
    assert_eq!(requestor.pending_len(), 0);

    cancel.cancel();
    let _ = pump.await;
}

#[tokio::test]
async fn late_response_after_timeout_is_discarded() {
    let bus = Arc::new(LoopbackBus::new());
    let mut requests = bus.subscribe("orders");

    let requestor = Arc::new(Requestor::new(
        RequestorConfig::new("replies"),
        "svc-a",
        bus.clone(),
    ));
    let cancel = CancellationToken::new();
    let pump = requestor.spawn_response_pump(bus.subscribe("replies"), cancel.clone());

    // Responder that answers well past the caller's timeout.
    let slow_bus = bus.clone();
    tokio::spawn(async move {
        let request = requests.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        let response = Envelope::respond_to(&request, "svc-remote")
            .with_payload(serde_json::to_vec(&OrderCreated { order_id: 1 }).unwrap());
        let _ = slow_bus.transmit(response);
    });

    let wrapper = requestor
        .process_outgoing::<CreateOrder, OrderCreated>(
            "orders",
            "command",
            "create",
            &CreateOrder {
                sku: "A-1".into(),
                quantity: 1,
            },
            RequestSettings {
                wait_time: Some(Duration::from_millis(40)),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(wrapper.response_code, 408);

    // The straggler arrives, finds nothing pending, and is dropped.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(requestor.pending_len(), 0);

    cancel.cancel();
    let _ = pump.await;
}

#[tokio::test]
async fn fallback_timeout_applies_when_settings_silent() {
    let bus = Arc::new(LoopbackBus::new());
    let requestor = Arc::new(Requestor::new(
        RequestorConfig::new("replies"),
        "svc-a",
        bus.clone(),
    ));

    let started = std::time::Instant::now();
    let wrapper = requestor
        .process_outgoing::<CreateOrder, OrderCreated>(
            "orders",
            "command",
            "create",
            &CreateOrder {
                sku: "A-1".into(),
                quantity: 1,
            },
            RequestSettings::default(),
            Some(Duration::from_millis(50)),
        )
        .await
        .unwrap();

    assert_eq!(wrapper.response_code, 408);
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn async_send_reaches_the_wire_untracked() {
    let bus = Arc::new(LoopbackBus::new());
    let mut requests = bus.subscribe("orders");
    let requestor = Arc::new(Requestor::new(
        RequestorConfig::new("replies"),
        "svc-a",
        bus.clone(),
    ));

    let wrapper = requestor
        .process_outgoing::<CreateOrder, OrderCreated>(
            "orders",
            "command",
            "create",
            &CreateOrder {
                sku: "A-9".into(),
                quantity: 9,
            },
            RequestSettings {
                process_async: true,
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();

    assert_eq!(wrapper.response_code, 202);
    assert_eq!(requestor.pending_len(), 0);

    let envelope = requests.recv().await.unwrap();
    assert_eq!(envelope.action_type, "create");
    assert_eq!(envelope.channel_priority, 0);
    let body: CreateOrder = serde_json::from_slice(&envelope.payload.unwrap()).unwrap();
    assert_eq!(body.quantity, 9);
}
