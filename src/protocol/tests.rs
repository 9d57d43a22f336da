use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tungstenite::protocol::Message as WsMessage;

use crate::identity::stub::StaticResolver;
use crate::identity::IdentityResolver;
use crate::protocol::handler::handle_message;
use crate::registry::{Registry, SharedRegistry, Subscription, PUBLIC_KEY};
use crate::utils::error::{
    CLOSE_BAD_REQUEST, CLOSE_CONFLICT, CLOSE_FORBIDDEN, CLOSE_INTERNAL, CLOSE_METHOD_NOT_ALLOWED,
};

fn setup(resolver: StaticResolver) -> (SharedRegistry, Arc<dyn IdentityResolver>) {
    let registry: SharedRegistry = Arc::new(Mutex::new(Registry::new(Duration::ZERO)));
    (registry, Arc::new(resolver))
}

fn connect(registry: &SharedRegistry, single_key: bool) -> (String, UnboundedReceiver<WsMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = registry
        .lock()
        .unwrap()
        .register_connection(tx, "127.0.0.1:9999", single_key);
    (id, rx)
}

fn next_event(rx: &mut UnboundedReceiver<WsMessage>) -> Value {
    match rx.try_recv() {
        Ok(WsMessage::Text(text)) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected a text event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_create_subscriptions_with_valid_topics() {
    let (registry, resolver) = setup(
        StaticResolver::new().with_key("K1", &["/users/123456", "/groups/234567"]),
    );
    let (conn, mut rx) = connect(&registry, false);

    let command = json!({
        "action": "createSubscriptions",
        "subscriptions": [{"apiKey": "K1", "topics": ["/users/123456", "/groups/234567"]}]
    })
    .to_string();
    handle_message(&registry, &resolver, &conn, &command).await.unwrap();

    let event = next_event(&mut rx);
    assert_eq!(event["event"], "subscriptionsCreated");
    assert_eq!(event["subscriptions"].as_array().unwrap().len(), 1);
    assert_eq!(event["subscriptions"][0]["apiKey"], "K1");
    assert_eq!(
        event["subscriptions"][0]["topics"],
        json!(["/users/123456", "/groups/234567"])
    );
    assert_eq!(event["errors"], json!([]));
    assert_eq!(registry.lock().unwrap().subscription_count(), 2);
}

#[tokio::test]
async fn test_create_subscriptions_mixed_accessibility() {
    // K1 may only see one of the requested topics, and the keyless topic
    // is not publicly accessible
    let (registry, resolver) = setup(StaticResolver::new().with_key("K1", &["/groups/234567"]));
    let (conn, mut rx) = connect(&registry, false);

    let command = json!({
        "action": "createSubscriptions",
        "subscriptions": [
            {"apiKey": "K1", "topics": ["/groups/234567", "/groups/345678"]},
            {"topics": ["/groups/456789"]}
        ]
    })
    .to_string();
    handle_message(&registry, &resolver, &conn, &command).await.unwrap();

    let event = next_event(&mut rx);
    assert_eq!(event["event"], "subscriptionsCreated");
    let subscriptions = event["subscriptions"].as_array().unwrap();
    assert_eq!(subscriptions.len(), 1);
    assert_eq!(subscriptions[0]["apiKey"], "K1");
    assert_eq!(subscriptions[0]["topics"], json!(["/groups/234567"]));

    let errors = event["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0]["apiKey"], "K1");
    assert_eq!(errors[0]["topic"], "/groups/345678");
    assert_eq!(errors[0]["error"], "Topic is not valid for provided API key");
    assert!(errors[1].get("apiKey").is_none());
    assert_eq!(errors[1]["topic"], "/groups/456789");
    assert_eq!(errors[1]["error"], "Topic is not accessible without an API key");
}

#[tokio::test]
async fn test_create_subscriptions_public_topic() {
    let (registry, resolver) = setup(StaticResolver::new().with_public("/styles/abc"));
    let (conn, mut rx) = connect(&registry, false);

    let command = json!({
        "action": "createSubscriptions",
        "subscriptions": [{"topics": ["/styles/abc"]}]
    })
    .to_string();
    handle_message(&registry, &resolver, &conn, &command).await.unwrap();

    let event = next_event(&mut rx);
    let subscriptions = event["subscriptions"].as_array().unwrap();
    assert_eq!(subscriptions.len(), 1);
    assert!(subscriptions[0].get("apiKey").is_none());
    assert_eq!(subscriptions[0]["topics"], json!(["/styles/abc"]));
    assert!(registry
        .lock()
        .unwrap()
        .key_subscriptions(PUBLIC_KEY)
        .contains(&Subscription::new(&conn, PUBLIC_KEY, "/styles/abc")));
}

#[tokio::test]
async fn test_create_subscriptions_key_only_enables_tracking() {
    let (registry, resolver) = setup(
        StaticResolver::new().with_key("K1", &["/users/123456", "/groups/234567"]),
    );
    let (conn, mut rx) = connect(&registry, false);

    let command = json!({
        "action": "createSubscriptions",
        "subscriptions": [{"apiKey": "K1"}]
    })
    .to_string();
    handle_message(&registry, &resolver, &conn, &command).await.unwrap();

    let event = next_event(&mut rx);
    assert_eq!(event["subscriptions"][0]["apiKey"], "K1");
    assert_eq!(
        event["subscriptions"][0]["topics"],
        json!(["/users/123456", "/groups/234567"])
    );
    let reg = registry.lock().unwrap();
    assert!(reg.is_access_tracked(&conn, "K1"));
    assert_eq!(reg.subscription_count(), 2);
}

#[tokio::test]
async fn test_command_on_single_key_connection_is_rejected() {
    let (registry, resolver) = setup(StaticResolver::new().with_key("K1", &["/users/123456"]));
    let (conn, _rx) = connect(&registry, true);

    let command = json!({
        "action": "createSubscriptions",
        "subscriptions": [{"apiKey": "K1"}]
    })
    .to_string();
    let err = handle_message(&registry, &resolver, &conn, &command)
        .await
        .unwrap_err();
    assert_eq!(err.code, CLOSE_METHOD_NOT_ALLOWED);
    assert_eq!(err.reason, "Single-key connection cannot be modified");
}

#[tokio::test]
async fn test_empty_subscriptions_array_is_rejected() {
    let (registry, resolver) = setup(StaticResolver::new());
    let (conn, _rx) = connect(&registry, false);

    let command = json!({"action": "createSubscriptions", "subscriptions": []}).to_string();
    let err = handle_message(&registry, &resolver, &conn, &command)
        .await
        .unwrap_err();
    assert_eq!(err.code, CLOSE_BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_action_is_rejected() {
    let (registry, resolver) = setup(StaticResolver::new());
    let (conn, _rx) = connect(&registry, false);

    let err = handle_message(&registry, &resolver, &conn, r#"{"action": "publish"}"#)
        .await
        .unwrap_err();
    assert_eq!(err.code, CLOSE_BAD_REQUEST);
}

#[tokio::test]
async fn test_entry_without_key_or_topics_is_rejected() {
    let (registry, resolver) = setup(StaticResolver::new());
    let (conn, _rx) = connect(&registry, false);

    let command = json!({"action": "createSubscriptions", "subscriptions": [{}]}).to_string();
    let err = handle_message(&registry, &resolver, &conn, &command)
        .await
        .unwrap_err();
    assert_eq!(err.code, CLOSE_BAD_REQUEST);
    assert_eq!(registry.lock().unwrap().subscription_count(), 0);
}

#[tokio::test]
async fn test_topic_without_leading_slash_is_rejected() {
    let (registry, resolver) = setup(StaticResolver::new().with_key("K1", &["/users/123456"]));
    let (conn, _rx) = connect(&registry, false);

    let command = json!({
        "action": "createSubscriptions",
        "subscriptions": [{"apiKey": "K1", "topics": ["users/123456"]}]
    })
    .to_string();
    let err = handle_message(&registry, &resolver, &conn, &command)
        .await
        .unwrap_err();
    assert_eq!(err.code, CLOSE_BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_key_fails_with_forbidden() {
    let (registry, resolver) = setup(StaticResolver::new());
    let (conn, _rx) = connect(&registry, false);

    let command = json!({
        "action": "createSubscriptions",
        "subscriptions": [{"apiKey": "NOPE", "topics": ["/users/123456"]}]
    })
    .to_string();
    let err = handle_message(&registry, &resolver, &conn, &command)
        .await
        .unwrap_err();
    assert_eq!(err.code, CLOSE_FORBIDDEN);
    assert_eq!(registry.lock().unwrap().subscription_count(), 0);
}

#[tokio::test]
async fn test_resolver_failure_leaves_registry_untouched() {
    let (registry, resolver) = setup(StaticResolver::new().failing());
    let (conn, _rx) = connect(&registry, false);

    let command = json!({
        "action": "createSubscriptions",
        "subscriptions": [{"apiKey": "K1"}]
    })
    .to_string();
    let err = handle_message(&registry, &resolver, &conn, &command)
        .await
        .unwrap_err();
    assert_eq!(err.code, CLOSE_INTERNAL);

    let reg = registry.lock().unwrap();
    assert_eq!(reg.subscription_count(), 0);
    assert!(!reg.is_access_tracked(&conn, "K1"));
}

#[tokio::test]
async fn test_delete_subscriptions_by_key_and_topic() {
    let (registry, resolver) = setup(StaticResolver::new());
    let (conn, mut rx) = connect(&registry, false);
    {
        let mut reg = registry.lock().unwrap();
        reg.add_subscription(&conn, "K1", "/users/123456");
        reg.add_subscription(&conn, "K1", "/groups/234567");
    }

    let command = json!({
        "action": "deleteSubscriptions",
        "subscriptions": [{"apiKey": "K1", "topic": "/users/123456"}]
    })
    .to_string();
    handle_message(&registry, &resolver, &conn, &command).await.unwrap();

    let event = next_event(&mut rx);
    assert_eq!(event["event"], "subscriptionsDeleted");
    assert_eq!(registry.lock().unwrap().subscription_count(), 1);
}

#[tokio::test]
async fn test_delete_without_match_fails_with_conflict() {
    let (registry, resolver) = setup(StaticResolver::new());
    let (conn, _rx) = connect(&registry, false);

    let command = json!({
        "action": "deleteSubscriptions",
        "subscriptions": [{"apiKey": "K1", "topic": "/users/123456"}]
    })
    .to_string();
    let err = handle_message(&registry, &resolver, &conn, &command)
        .await
        .unwrap_err();
    assert_eq!(err.code, CLOSE_CONFLICT);
    assert_eq!(err.reason, "No matching subscription");
}
