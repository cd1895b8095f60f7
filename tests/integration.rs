#![cfg(test)]

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use futures::future::join_all;
use mockall::{Sequence, mock};
use ptal_bot::{
    base::{
        config::{Config, ConfigInner},
        types::{ChannelConfigPatch, ChannelFeature, ChannelFeatures, GuildConfigPatch, Patch, PrKey, PtalMessageMapping, RenderedMessage, Res, Void},
    },
    interaction::{
        config_command::{self, ConfigCommand},
        verify,
    },
    runtime::Runtime,
    service::{
        chat::{ChatClient, DeliveryError, GenericChatClient},
        db::DbClient,
        render::{GenericRenderer, RenderRequest, RendererClient},
    },
};
use serde_json::{Value, json};
use tokio_util::task::TaskTracker;
use tower::ServiceExt;

const SECRET: &str = "webhook-secret";

// Mocks.

mock! {
    pub Chat {}

    #[async_trait]
    impl GenericChatClient for Chat {
        async fn edit_message(&self, channel_id: &str, message_id: &str, webhook_token: &str, message: &RenderedMessage) -> Void;
    }
}

mock! {
    pub Renderer {}

    #[async_trait]
    impl GenericRenderer for Renderer {
        async fn render(&self, request: &RenderRequest) -> Res<RenderedMessage>;
    }
}

/// Renderer that echoes the pull request URL as content.
fn echo_renderer() -> MockRenderer {
    let mut mock = MockRenderer::new();

    mock.expect_render().returning(|request| {
        Ok(RenderedMessage {
            content: Some(request.github_url.clone()),
            ..Default::default()
        })
    });

    mock
}

fn idle_chat() -> MockChat {
    let mut mock = MockChat::new();
    mock.expect_edit_message().never();
    mock
}

fn test_config() -> Config {
    Config {
        inner: Arc::new(ConfigInner {
            github_webhook_secret: SECRET.to_string(),
            discord_token: "discord-token".to_string(),
            delivery_max_attempts: 3,
            delivery_retry_base_ms: 1,
            ..Default::default()
        }),
    }
}

/// Helper function to setup the test environment.
async fn setup_test_environment(chat: MockChat, renderer: MockRenderer) -> Runtime {
    let db = DbClient::surreal_memory().await.expect("Failed to create DB client");

    Runtime {
        config: test_config(),
        db,
        renderer: RendererClient::new(Arc::new(renderer)),
        chat: ChatClient::new(Arc::new(chat)),
        tasks: TaskTracker::new(),
    }
}

async fn setup_db() -> DbClient {
    DbClient::surreal_memory().await.expect("Failed to create DB client")
}

fn mapping(channel_id: &str, message_id: &str) -> PtalMessageMapping {
    PtalMessageMapping {
        channel_id: channel_id.to_string(),
        message_id: message_id.to_string(),
        webhook_token: format!("token-{message_id}"),
        github_url: "https://github.com/acme/widgets/pull/42".to_string(),
        deployment_url: None,
        other_urls: None,
        emoji: None,
    }
}

fn widgets_42() -> PrKey {
    PrKey::new("acme", "widgets", 42)
}

fn pull_request_body(owner: &str, repo: &str, number: u64) -> Vec<u8> {
    json!({
        "action": "synchronize",
        "repository": { "name": repo, "owner": { "login": owner } },
        "pull_request": { "number": number }
    })
    .to_string()
    .into_bytes()
}

fn webhook_request(event: &str, body: Vec<u8>, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri("/github/webhook").header("x-github-event", event);

    if let Some(signature) = signature {
        builder = builder.header("x-hub-signature-256", signature);
    }

    builder.body(Body::from(body)).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// Config store.

#[tokio::test]
async fn test_default_repository_scenario() {
    let db = setup_db().await;

    assert_eq!(db.get_guild_config("G1").await.unwrap(), None);

    db.set_default_repository("G1", "acme/widgets", None).await.unwrap();
    assert_eq!(db.get_default_repository("G1", None).await.unwrap().as_deref(), Some("acme/widgets"));

    db.set_default_repository("G1", "acme/other", Some("C1")).await.unwrap();
    assert_eq!(db.get_default_repository("G1", Some("C1")).await.unwrap().as_deref(), Some("acme/other"));
    assert_eq!(db.get_default_repository("G1", Some("C2")).await.unwrap().as_deref(), Some("acme/widgets"));
}

#[tokio::test]
async fn test_default_repository_resolution_order() {
    let db = setup_db().await;

    // Neither set.
    assert_eq!(db.get_default_repository("G", Some("C")).await.unwrap(), None);

    // Only channel set.
    db.set_default_repository("G", "acme/channel", Some("C")).await.unwrap();
    assert_eq!(db.get_default_repository("G", Some("C")).await.unwrap().as_deref(), Some("acme/channel"));
    assert_eq!(db.get_default_repository("G", None).await.unwrap(), None);

    // Both set.
    db.set_default_repository("G", "acme/guild", None).await.unwrap();
    assert_eq!(db.get_default_repository("G", Some("C")).await.unwrap().as_deref(), Some("acme/channel"));

    // Only guild set.
    db.clear_default_repository("G", Some("C")).await.unwrap();
    assert_eq!(db.get_default_repository("G", Some("C")).await.unwrap().as_deref(), Some("acme/guild"));
}

#[tokio::test]
async fn test_channel_config_isolation() {
    let db = setup_db().await;

    db.set_default_repository("G", "acme/b", Some("B")).await.unwrap();
    let before = db.get_channel_config("G", "B").await.unwrap();

    let mut features = ChannelFeatures::default();
    features.entries.insert("auto_update".to_string(), ChannelFeature::Flag(true));

    db.set_channel_config(
        "G",
        "A",
        ChannelConfigPatch {
            default_repository: Patch::Set("acme/a".to_string()),
            features: Patch::Set(features.clone()),
        },
    )
    .await
    .unwrap();

    assert_eq!(db.get_channel_config("G", "B").await.unwrap(), before);

    let a = db.get_channel_config("G", "A").await.unwrap().unwrap();
    assert_eq!(a.default_repository.as_deref(), Some("acme/a"));
    assert_eq!(a.features, Some(features));
}

#[tokio::test]
async fn test_guild_merge_keeps_other_fields() {
    let db = setup_db().await;

    db.set_default_repository("G", "acme/c", Some("C")).await.unwrap();
    db.set_default_repository("G", "acme/guild", None).await.unwrap();

    let merged = db
        .set_guild_config(
            "G",
            GuildConfigPatch {
                github_app_installed: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(merged.guild_id, "G");
    assert!(merged.github_app_installed);
    assert_eq!(merged.default_repository.as_deref(), Some("acme/guild"));
    assert_eq!(merged.channels["C"].default_repository.as_deref(), Some("acme/c"));

    let cleared = db.clear_default_repository("G", None).await.unwrap();
    assert_eq!(cleared.default_repository, None);
    assert!(cleared.github_app_installed);
    assert_eq!(db.get_guild_config("G").await.unwrap(), Some(cleared));
}

#[tokio::test]
async fn test_mark_installed_and_delete_are_idempotent() {
    let db = setup_db().await;

    let first = db.mark_installed("G").await.unwrap();
    let second = db.mark_installed("G").await.unwrap();
    assert!(first.github_app_installed);
    assert_eq!(first, second);

    db.delete_guild_config("G").await.unwrap();
    assert_eq!(db.get_guild_config("G").await.unwrap(), None);

    db.delete_guild_config("G").await.unwrap();
    db.delete_guild_config("never-existed").await.unwrap();
}

#[tokio::test]
async fn test_concurrent_channel_writes_are_serialized() {
    let db = setup_db().await;

    let writes = (0..20).map(|i| {
        let db = db.clone();
        async move { db.set_default_repository("G", &format!("acme/repo-{i}"), Some(&format!("C{i}"))).await }
    });

    for result in join_all(writes).await {
        result.unwrap();
    }

    let guild = db.get_guild_config("G").await.unwrap().unwrap();
    assert_eq!(guild.channels.len(), 20);
    assert_eq!(guild.channels["C7"].default_repository.as_deref(), Some("acme/repo-7"));
}

// PR-message index.

#[tokio::test]
async fn test_store_list_remove() {
    let db = setup_db().await;
    let key = widgets_42();

    assert!(db.list_ptal_messages(&key).await.unwrap().is_empty());

    let stored = mapping("C1", "M1");
    db.store_ptal_message(&key, &stored).await.unwrap();
    assert_eq!(db.list_ptal_messages(&key).await.unwrap(), vec![stored]);

    db.remove_ptal_messages(&key).await.unwrap();
    assert!(db.list_ptal_messages(&key).await.unwrap().is_empty());

    db.remove_ptal_messages(&key).await.unwrap();
}

#[tokio::test]
async fn test_index_keeps_every_announcement() {
    let db = setup_db().await;
    let key = widgets_42();

    db.store_ptal_message(&key, &mapping("C1", "M1")).await.unwrap();
    db.store_ptal_message(&key, &mapping("C2", "M2")).await.unwrap();

    // Re-storing the same message replaces it in place.
    let updated = PtalMessageMapping {
        emoji: Some("🚀".to_string()),
        ..mapping("C1", "M1")
    };
    db.store_ptal_message(&key, &updated).await.unwrap();

    let listed = db.list_ptal_messages(&key).await.unwrap();
    assert_eq!(listed, vec![updated, mapping("C2", "M2")]);
}

#[tokio::test]
async fn test_index_keys_do_not_collide() {
    let db = setup_db().await;

    db.store_ptal_message(&PrKey::new("ab", "c", 1), &mapping("C1", "M1")).await.unwrap();

    assert!(db.list_ptal_messages(&PrKey::new("a", "bc", 1)).await.unwrap().is_empty());
    assert!(db.list_ptal_messages(&PrKey::new("ab", "c", 11)).await.unwrap().is_empty());
    assert_eq!(db.list_ptal_messages(&PrKey::new("ab", "c", 1)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_index_ignores_repository_case() {
    let db = setup_db().await;

    db.store_ptal_message(&PrKey::new("Acme", "Widgets", 42), &mapping("C1", "M1")).await.unwrap();

    assert_eq!(db.list_ptal_messages(&widgets_42()).await.unwrap(), vec![mapping("C1", "M1")]);

    db.remove_ptal_messages(&widgets_42()).await.unwrap();
    assert!(db.list_ptal_messages(&PrKey::new("Acme", "Widgets", 42)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_stores_for_one_pull_request() {
    let db = setup_db().await;
    let key = widgets_42();

    let stores = (0..20).map(|i| {
        let db = db.clone();
        let key = key.clone();
        async move { db.store_ptal_message(&key, &mapping("C", &format!("M{i}"))).await }
    });

    for result in join_all(stores).await {
        result.unwrap();
    }

    assert_eq!(db.list_ptal_messages(&key).await.unwrap().len(), 20);
}

// Reconciler.

#[tokio::test]
async fn test_reconcile_without_mappings_is_a_no_op() {
    let mut renderer = MockRenderer::new();
    renderer.expect_render().never();

    let runtime = setup_test_environment(idle_chat(), renderer).await;

    let report = runtime.reconciler().reconcile(&widgets_42()).await.unwrap();

    assert!(report.updated.is_empty());
    assert!(report.failed.is_empty());
}

#[tokio::test]
async fn test_reconcile_isolates_delivery_failures() {
    let mut chat = MockChat::new();
    chat.expect_edit_message().times(3).returning(|_, message_id, _, _| {
        if message_id == "M2" {
            Err(DeliveryError::Permanent("HTTP 404: Unknown Message".to_string()).into())
        } else {
            Ok(())
        }
    });

    let runtime = setup_test_environment(chat, echo_renderer()).await;
    let key = widgets_42();

    for (channel, message) in [("C1", "M1"), ("C2", "M2"), ("C3", "M3")] {
        runtime.db.store_ptal_message(&key, &mapping(channel, message)).await.unwrap();
    }

    let report = runtime.reconciler().reconcile(&key).await.unwrap();

    assert_eq!(report.updated, vec!["M1", "M3"]);
    assert_eq!(report.failed, vec!["M2"]);
}

#[tokio::test]
async fn test_reconcile_isolates_render_failures() {
    let mut renderer = MockRenderer::new();
    renderer.expect_render().returning(|request| {
        if request.emoji.as_deref() == Some("💥") {
            Err(anyhow::anyhow!("GitHub is down"))
        } else {
            Ok(RenderedMessage::default())
        }
    });

    let mut chat = MockChat::new();
    chat.expect_edit_message().times(1).returning(|_, _, _, _| Ok(()));

    let runtime = setup_test_environment(chat, renderer).await;
    let key = widgets_42();

    let broken = PtalMessageMapping {
        emoji: Some("💥".to_string()),
        ..mapping("C1", "M1")
    };
    runtime.db.store_ptal_message(&key, &broken).await.unwrap();
    runtime.db.store_ptal_message(&key, &mapping("C2", "M2")).await.unwrap();

    let report = runtime.reconciler().reconcile(&key).await.unwrap();

    assert_eq!(report.updated, vec!["M2"]);
    assert_eq!(report.failed, vec!["M1"]);
}

#[tokio::test]
async fn test_reconcile_passes_mapping_to_collaborators() {
    let mut renderer = MockRenderer::new();
    renderer
        .expect_render()
        .withf(|request| {
            request.github_url == "https://github.com/acme/widgets/pull/42"
                && request.deployment_url.as_deref() == Some("https://preview.acme.dev")
                && request.other_urls == vec!["https://docs.acme.dev".to_string()]
                && request.emoji.as_deref() == Some("👀")
        })
        .times(1)
        .returning(|_| {
            Ok(RenderedMessage {
                content: Some("fresh".to_string()),
                ..Default::default()
            })
        });

    let mut chat = MockChat::new();
    chat.expect_edit_message()
        .withf(|channel_id, message_id, webhook_token, message| {
            channel_id == "C1" && message_id == "M1" && webhook_token == "token-M1" && message.content.as_deref() == Some("fresh")
        })
        .times(1)
        .returning(|_, _, _, _| Ok(()));

    let runtime = setup_test_environment(chat, renderer).await;
    let key = widgets_42();

    let decorated = PtalMessageMapping {
        deployment_url: Some("https://preview.acme.dev".to_string()),
        other_urls: Some(vec!["https://docs.acme.dev".to_string()]),
        emoji: Some("👀".to_string()),
        ..mapping("C1", "M1")
    };
    runtime.db.store_ptal_message(&key, &decorated).await.unwrap();

    let report = runtime.reconciler().reconcile(&key).await.unwrap();
    assert_eq!(report.updated, vec!["M1"]);
}

#[tokio::test]
async fn test_reconcile_retries_transient_failures() {
    let mut sequence = Sequence::new();
    let mut chat = MockChat::new();

    chat.expect_edit_message()
        .times(1)
        .in_sequence(&mut sequence)
        .returning(|_, _, _, _| Err(DeliveryError::Transient("HTTP 502: Bad Gateway".to_string()).into()));
    chat.expect_edit_message().times(1).in_sequence(&mut sequence).returning(|_, _, _, _| Ok(()));

    let runtime = setup_test_environment(chat, echo_renderer()).await;
    let key = widgets_42();
    runtime.db.store_ptal_message(&key, &mapping("C1", "M1")).await.unwrap();

    let report = runtime.reconciler().reconcile(&key).await.unwrap();

    assert_eq!(report.updated, vec!["M1"]);
    assert!(report.failed.is_empty());
}

#[tokio::test]
async fn test_reconcile_gives_up_after_max_attempts() {
    let mut chat = MockChat::new();
    chat.expect_edit_message()
        .times(3)
        .returning(|_, _, _, _| Err(DeliveryError::Transient("HTTP 429: rate limited".to_string()).into()));

    let runtime = setup_test_environment(chat, echo_renderer()).await;
    let key = widgets_42();
    runtime.db.store_ptal_message(&key, &mapping("C1", "M1")).await.unwrap();

    let report = runtime.reconciler().reconcile(&key).await.unwrap();

    assert_eq!(report.failed, vec!["M1"]);
}

#[tokio::test]
async fn test_reconcile_does_not_retry_permanent_failures() {
    let mut chat = MockChat::new();
    chat.expect_edit_message()
        .times(1)
        .returning(|_, _, _, _| Err(DeliveryError::Forbidden("HTTP 401: invalid token".to_string()).into()));

    let runtime = setup_test_environment(chat, echo_renderer()).await;
    let key = widgets_42();
    runtime.db.store_ptal_message(&key, &mapping("C1", "M1")).await.unwrap();

    let report = runtime.reconciler().reconcile(&key).await.unwrap();

    assert_eq!(report.failed, vec!["M1"]);
}

// Webhook admission.

#[tokio::test]
async fn test_webhook_schedules_reconciliation() {
    let mut chat = MockChat::new();
    chat.expect_edit_message().times(2).returning(|_, _, _, _| Ok(()));

    let runtime = setup_test_environment(chat, echo_renderer()).await;
    let key = widgets_42();
    runtime.db.store_ptal_message(&key, &mapping("C1", "M1")).await.unwrap();
    runtime.db.store_ptal_message(&key, &mapping("C2", "M2")).await.unwrap();

    let body = pull_request_body("acme", "widgets", 42);
    let signature = verify::sign_payload(SECRET, &body).unwrap();

    let response = runtime.router().oneshot(webhook_request("pull_request_review", body, Some(signature))).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "success": true, "message": "Webhook received" }));

    // Background work completes even though the response has been returned.
    runtime.drain().await;
}

#[tokio::test]
async fn test_webhook_rejects_missing_signature() {
    let runtime = setup_test_environment(idle_chat(), echo_renderer()).await;

    let response = runtime.router().oneshot(webhook_request("pull_request", pull_request_body("acme", "widgets", 42), None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await, json!({ "error": "Missing signature" }));
}

#[tokio::test]
async fn test_webhook_rejects_tampered_body() {
    let runtime = setup_test_environment(idle_chat(), echo_renderer()).await;
    runtime.db.store_ptal_message(&widgets_42(), &mapping("C1", "M1")).await.unwrap();

    let body = pull_request_body("acme", "widgets", 42);
    let signature = verify::sign_payload(SECRET, &body).unwrap();

    let mut tampered = body.clone();
    let last = tampered.len() - 2;
    tampered[last] ^= 0x01;

    let response = runtime.router().oneshot(webhook_request("pull_request", tampered, Some(signature))).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await, json!({ "error": "Invalid signature" }));

    runtime.drain().await;
}

#[tokio::test]
async fn test_webhook_ignores_other_events() {
    let runtime = setup_test_environment(idle_chat(), echo_renderer()).await;
    runtime.db.store_ptal_message(&widgets_42(), &mapping("C1", "M1")).await.unwrap();

    let body = pull_request_body("acme", "widgets", 42);
    let signature = verify::sign_payload(SECRET, &body).unwrap();

    let response = runtime.router().oneshot(webhook_request("push", body, Some(signature))).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "success": true, "message": "Event ignored" }));

    runtime.drain().await;
}

#[tokio::test]
async fn test_webhook_acknowledges_malformed_events() {
    let runtime = setup_test_environment(idle_chat(), echo_renderer()).await;

    let body = json!({ "action": "opened", "repository": { "name": "widgets" } }).to_string().into_bytes();
    let signature = verify::sign_payload(SECRET, &body).unwrap();

    let response = runtime.router().oneshot(webhook_request("pull_request", body, Some(signature))).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "success": true, "message": "Malformed event ignored" }));

    runtime.drain().await;
}

#[tokio::test]
async fn test_webhook_accepts_large_payloads() {
    let mut chat = MockChat::new();
    chat.expect_edit_message().times(1).returning(|_, _, _, _| Ok(()));

    let runtime = setup_test_environment(chat, echo_renderer()).await;
    runtime.db.store_ptal_message(&widgets_42(), &mapping("C1", "M1")).await.unwrap();

    let body = json!({
        "action": "edited",
        "repository": { "name": "widgets", "owner": { "login": "acme" } },
        "pull_request": { "number": 42, "body": "x".repeat(3 * 1024 * 1024) }
    })
    .to_string()
    .into_bytes();
    let signature = verify::sign_payload(SECRET, &body).unwrap();

    let response = runtime.router().oneshot(webhook_request("pull_request", body, Some(signature))).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "success": true, "message": "Webhook received" }));

    runtime.drain().await;
}

// Administrative commands.

#[tokio::test]
async fn test_admin_commands_refuse_in_memory_database() {
    let config = Config {
        inner: Arc::new(ConfigInner {
            db_endpoint: "mem://".to_string(),
            ..(*test_config().inner).clone()
        }),
    };

    let err = ptal_bot::clear_guild(config.clone(), "G").await.unwrap_err();
    assert!(err.to_string().contains("in-memory"));

    let err = ptal_bot::forget_pull_request(config, &widgets_42()).await.unwrap_err();
    assert!(err.to_string().contains("in-memory"));
}

// Config commands.

#[tokio::test]
async fn test_config_commands() {
    let db = setup_db().await;

    let reply = config_command::execute(&db, Some("G"), Some("C"), ConfigCommand::View { channel: false }).await.unwrap();
    assert!(reply.contains("No configuration set"));

    let reply = config_command::execute(
        &db,
        Some("G"),
        Some("C"),
        ConfigCommand::SetDefaultRepo {
            repository: "not a repo".to_string(),
            channel: false,
        },
    )
    .await
    .unwrap();
    assert!(reply.contains("Invalid repository format"));
    assert_eq!(db.get_guild_config("G").await.unwrap(), None);

    let reply = config_command::execute(
        &db,
        Some("G"),
        Some("C"),
        ConfigCommand::SetDefaultRepo {
            repository: "acme/widgets".to_string(),
            channel: true,
        },
    )
    .await
    .unwrap();
    assert_eq!(reply, "✅ Default repository for <#C> set to `acme/widgets`");
    assert_eq!(db.get_default_repository("G", Some("C")).await.unwrap().as_deref(), Some("acme/widgets"));
    assert_eq!(db.get_default_repository("G", None).await.unwrap(), None);

    config_command::execute(&db, Some("G"), Some("C"), ConfigCommand::MarkInstalled).await.unwrap();

    let reply = config_command::execute(&db, Some("G"), Some("C"), ConfigCommand::View { channel: false }).await.unwrap();
    assert!(reply.contains("**GitHub App Installed:** Yes"));
    assert!(reply.contains("**Configured Channels:** 1"));

    let reply = config_command::execute(&db, Some("G"), Some("C"), ConfigCommand::View { channel: true }).await.unwrap();
    assert!(reply.contains("**Default Repository:** acme/widgets"));

    config_command::execute(&db, Some("G"), Some("C"), ConfigCommand::ClearDefaultRepo { channel: true }).await.unwrap();
    assert_eq!(db.get_default_repository("G", Some("C")).await.unwrap(), None);

    let reply = config_command::execute(&db, None, None, ConfigCommand::MarkInstalled).await.unwrap();
    assert!(reply.contains("only be used in a server"));
}
