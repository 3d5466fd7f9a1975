#![allow(clippy::unwrap_used)]
// Credential session and broker lease renewal against wiremock.

mod common;

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use serde_json::json;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use embercloud_api::auth::COGNITO_CLIENT_ID;
use embercloud_api::{CloudClient, IdentityClient, TransportConfig};
use embercloud_core::{CoreError, CredentialSession, LeaseManager};

use common::lease_mock;

const MARGIN: Duration = Duration::from_secs(60);

// ── Helpers ─────────────────────────────────────────────────────────

fn session_for(server: &MockServer) -> Arc<CredentialSession> {
    let url = Url::parse(&format!("{}/identity/", server.uri())).unwrap();
    let identity =
        IdentityClient::new(url, COGNITO_CLIENT_ID.to_string(), &TransportConfig::default())
            .unwrap();
    Arc::new(CredentialSession::new(
        identity,
        "cook@example.com".into(),
        SecretString::from("pw".to_string()),
        MARGIN,
    ))
}

fn lease_manager_for(server: &MockServer, session: Arc<CredentialSession>) -> LeaseManager {
    let base = Url::parse(&format!("{}/prod/", server.uri())).unwrap();
    let cloud = Arc::new(CloudClient::new(base, &TransportConfig::default()).unwrap());
    LeaseManager::new(session, cloud, MARGIN)
}

fn identity_response(token: &str, expires_in: u64) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "AuthenticationResult": { "IdToken": token, "ExpiresIn": expires_in }
    }))
}

// ── Credential session ──────────────────────────────────────────────

#[tokio::test]
async fn fresh_token_skips_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/identity/"))
        .respond_with(identity_response("tok-1", 3600))
        .expect(1)
        .mount(&server)
        .await;

    let session = session_for(&server);
    let first = session.token().await.unwrap();
    let second = session.token().await.unwrap();

    assert_eq!(first.expose(), "tok-1");
    assert!(Arc::ptr_eq(&first, &second));
    assert!(!session.needs_renewal());
}

#[tokio::test]
async fn stale_token_is_renewed_with_later_expiry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/identity/"))
        .respond_with(identity_response("tok-short", 30))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/identity/"))
        .respond_with(identity_response("tok-long", 3600))
        .mount(&server)
        .await;

    let session = session_for(&server);
    let short = session.renew_if_needed().await.unwrap();
    assert!(session.needs_renewal(), "30s token is inside the 60s margin");

    let long = session.renew_if_needed().await.unwrap();
    assert_ne!(short.expose(), long.expose());
    assert!(long.expires_at() > short.expires_at());
}

#[tokio::test]
async fn concurrent_callers_share_one_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/identity/"))
        .respond_with(identity_response("tok-shared", 3600).set_delay(Duration::from_millis(100)))
        .expect(1)
        .mount(&server)
        .await;

    let session = session_for(&server);
    let (a, b, c, d) = tokio::join!(
        session.token(),
        session.token(),
        session.token(),
        session.token()
    );

    for token in [a, b, c, d] {
        assert_eq!(token.unwrap().expose(), "tok-shared");
    }
}

#[tokio::test]
async fn failed_exchange_keeps_previous_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/identity/"))
        .respond_with(identity_response("tok-old", 30))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/identity/"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "__type": "NotAuthorizedException",
            "message": "Password attempts exceeded"
        })))
        .mount(&server)
        .await;

    let session = session_for(&server);
    session.renew_if_needed().await.unwrap();

    let err = session.renew_if_needed().await.unwrap_err();
    match err {
        CoreError::AuthenticationFailed { message } => {
            assert!(message.contains("Password attempts exceeded"), "{message}");
        }
        other => panic!("expected AuthenticationFailed, got {other:?}"),
    }
    assert_eq!(session.current().unwrap().expose(), "tok-old");
}

// ── Broker lease ────────────────────────────────────────────────────

#[tokio::test]
async fn valid_lease_is_reused() {
    let server = MockServer::start().await;
    common::mount_identity(&server, "tok", 3600).await;
    lease_mock(3600).expect(1).mount(&server).await;

    let leases = lease_manager_for(&server, session_for(&server));
    let first = leases.renew_if_needed().await.unwrap();
    let second = leases.renew_if_needed().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.endpoint.scheme(), "wss");
    assert!(!leases.needs_renewal());
    assert!(leases.remaining() > Duration::from_secs(3500));
}

#[tokio::test]
async fn short_lease_is_renewed_on_next_call() {
    let server = MockServer::start().await;
    common::mount_identity(&server, "tok", 3600).await;
    lease_mock(5).expect(2).mount(&server).await;

    let leases = lease_manager_for(&server, session_for(&server));
    leases.renew_if_needed().await.unwrap();
    assert!(leases.needs_renewal(), "5s lease is inside the 60s margin");
    leases.renew_if_needed().await.unwrap();
}

#[tokio::test]
async fn failed_lease_request_keeps_stale_lease() {
    let server = MockServer::start().await;
    common::mount_identity(&server, "tok", 3600).await;
    lease_mock(30).up_to_n_times(1).mount(&server).await;
    Mock::given(method("POST"))
        .and(path("/prod/mqtt-connections"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let leases = lease_manager_for(&server, session_for(&server));
    let stale = leases.renew_if_needed().await.unwrap();

    let err = leases.renew_if_needed().await.unwrap_err();
    assert!(matches!(err, CoreError::LeaseRequestFailed { .. }), "got {err:?}");
    assert_eq!(leases.current().unwrap(), stale);
}

#[tokio::test]
async fn rejected_token_is_an_auth_failure() {
    let server = MockServer::start().await;
    common::mount_identity(&server, "tok", 3600).await;
    Mock::given(method("POST"))
        .and(path("/prod/mqtt-connections"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .mount(&server)
        .await;

    let leases = lease_manager_for(&server, session_for(&server));
    let err = leases.renew_if_needed().await.unwrap_err();
    assert!(matches!(err, CoreError::AuthenticationFailed { .. }), "got {err:?}");
}

#[tokio::test]
async fn invalidate_forces_a_new_lease() {
    let server = MockServer::start().await;
    common::mount_identity(&server, "tok", 3600).await;
    lease_mock(3600).expect(2).mount(&server).await;

    let leases = lease_manager_for(&server, session_for(&server));
    leases.renew_if_needed().await.unwrap();
    leases.invalidate();
    assert!(leases.needs_renewal());
    assert_eq!(leases.remaining(), Duration::ZERO);
    leases.renew_if_needed().await.unwrap();
}
