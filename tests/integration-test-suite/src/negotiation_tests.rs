//! Transport negotiation between agent cards and client configs.

use agentfabric_client::{negotiate, A2aClientFactory};
use agentfabric_core::a2a::{AgentCard, TransportTag};
use agentfabric_core::{ClientConfig, FabricError, NatsConnectionConfig};

fn slimrpc_card() -> AgentCard {
    AgentCard::new(
        "weather",
        "1.0.0",
        "slim://default/default/weather",
        TransportTag::SlimRpc,
    )
}

#[tokio::test]
async fn test_disjoint_transports_fail_negotiation() {
    // Server speaks only slimrpc; client only natspatterns.
    let config = ClientConfig::new().with_nats(NatsConnectionConfig::default());
    let factory = A2aClientFactory::new(config);

    let err = factory.create(slimrpc_card()).await.unwrap_err();
    assert!(matches!(err, FabricError::NoCompatibleTransport { .. }));
    assert!(err.to_string().contains("weather"));
}

#[test]
fn test_negotiation_follows_card_preference_order() {
    let card = AgentCard::new(
        "multi",
        "1.0.0",
        "nats://default/default/multi",
        TransportTag::NatsPatterns,
    )
    .with_additional_transport(TransportTag::JsonRpc);

    let both = ClientConfig::new()
        .with_nats(NatsConnectionConfig::default())
        .with_http_url("http://localhost:9999");
    assert_eq!(
        negotiate(&card, &both).unwrap(),
        TransportTag::NatsPatterns
    );

    let http_only = ClientConfig::new().with_http_url("http://localhost:9999");
    assert_eq!(negotiate(&card, &http_only).unwrap(), TransportTag::JsonRpc);
}

#[test]
fn test_negotiation_is_stable_across_calls() {
    let card = AgentCard::new(
        "multi",
        "1.0.0",
        "nats://default/default/multi",
        TransportTag::NatsPatterns,
    )
    .with_additional_transport(TransportTag::JsonRpc);
    let config = ClientConfig::new()
        .with_nats(NatsConnectionConfig::default())
        .with_http_url("http://localhost:9999");

    let first = negotiate(&card, &config).unwrap();
    for _ in 0..50 {
        assert_eq!(negotiate(&card, &config).unwrap(), first);
    }
}

#[test]
fn test_empty_client_config_never_negotiates() {
    let err = negotiate(&slimrpc_card(), &ClientConfig::new()).unwrap_err();
    assert!(matches!(err, FabricError::NoCompatibleTransport { .. }));
}
