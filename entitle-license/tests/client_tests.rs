use entitle_license::{
    DeviceInfo, HttpLicenseClient, LicenseCheck, LicenseConfig, LicenseError, LicenseServer,
};
use entitle_types::{DeviceId, ErrorKind};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn device_info() -> DeviceInfo {
    DeviceInfo {
        os_name: "linux".to_string(),
        os_version: "24.04".to_string(),
        hostname: "studio".to_string(),
        arch: "x86_64".to_string(),
    }
}

fn client_for(server: &MockServer) -> HttpLicenseClient {
    let config = LicenseConfig {
        api_base_url: format!("{}/", server.uri()),
        organization_id: "org_test".to_string(),
        ..Default::default()
    };
    HttpLicenseClient::with_device_info(config, device_info()).unwrap()
}

// ── checkLicense ────────────────────────────────────────────────

#[tokio::test]
async fn check_granted_key_requiring_activation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/licenses/validate"))
        .and(body_partial_json(json!({
            "key": "ABC-VALID",
            "organization_id": "org_test"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "lk_1",
            "status": "granted",
            "limit_activations": 3
        })))
        .expect(1)
        .mount(&server)
        .await;

    let check = client_for(&server).check_license("ABC-VALID").await.unwrap();
    assert_eq!(
        check,
        LicenseCheck {
            valid: true,
            requires_activation: true,
            activations_limit: Some(3),
        }
    );
}

#[tokio::test]
async fn check_granted_key_without_limit_needs_no_activation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/licenses/validate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "granted"})))
        .mount(&server)
        .await;

    let check = client_for(&server).check_license("FREE").await.unwrap();
    assert!(check.valid);
    assert!(!check.requires_activation);
}

#[tokio::test]
async fn check_revoked_key_is_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/licenses/validate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "revoked"})))
        .mount(&server)
        .await;

    let check = client_for(&server).check_license("OLD").await.unwrap();
    assert!(!check.valid);
}

#[tokio::test]
async fn check_unknown_key_is_validation_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/licenses/validate"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": "ResourceNotFound",
            "detail": "License key not found"
        })))
        .mount(&server)
        .await;

    let err = client_for(&server).check_license("NOPE").await.unwrap_err();
    match err {
        LicenseError::ValidationFailed(reason) => assert_eq!(reason, "License key not found"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn malformed_response_is_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/licenses/validate"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let err = client_for(&server).check_license("ABC").await.unwrap_err();
    assert!(matches!(err, LicenseError::Protocol(_)));
    assert_eq!(err.kind(), Some(ErrorKind::ValidationFailed));
    assert!(!err.is_retryable());
    assert!(!err.is_key_rejection());
}

#[tokio::test]
async fn server_error_is_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .mount(&server)
        .await;

    let err = client_for(&server).check_license("ABC").await.unwrap_err();
    assert!(matches!(err, LicenseError::Network(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn unreachable_server_is_network_error() {
    let config = LicenseConfig {
        api_base_url: "http://127.0.0.1:9".to_string(),
        request_timeout_secs: 2,
        ..Default::default()
    };
    let client = HttpLicenseClient::with_device_info(config, device_info()).unwrap();

    let err = client.check_license("ABC").await.unwrap_err();
    assert!(matches!(err, LicenseError::Network(_)));
}

#[tokio::test]
async fn bearer_token_is_sent_when_configured() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer secret-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "granted"})))
        .expect(1)
        .mount(&server)
        .await;

    let config = LicenseConfig {
        api_base_url: server.uri(),
        api_token: Some("secret-token".to_string()),
        ..Default::default()
    };
    let client = HttpLicenseClient::with_device_info(config, device_info()).unwrap();
    assert!(client.check_license("ABC").await.unwrap().valid);
}

// ── activate ────────────────────────────────────────────────────

#[tokio::test]
async fn activate_sends_device_and_returns_activation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/licenses/activate"))
        .and(body_partial_json(json!({
            "key": "ABC-VALID",
            "organization_id": "org_test",
            "label": "studio",
            "meta": {"device_id": "dev-1", "os": "linux"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "act_42",
            "license_key": {"limit_activations": 1, "status": "granted"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let activation = client_for(&server)
        .activate("ABC-VALID", &DeviceId::from_raw("dev-1"))
        .await
        .unwrap();
    assert_eq!(activation.activation_id, "act_42");
    assert_eq!(activation.activations_limit, 1);
}

#[tokio::test]
async fn activate_over_limit_is_limit_reached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/licenses/activate"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": "NotPermitted",
            "detail": "License key only allows 1 activations."
        })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .activate("ABC-VALID", &DeviceId::from_raw("dev-2"))
        .await
        .unwrap_err();
    assert!(matches!(err, LicenseError::ActivationLimitReached { limit: 1 }));
}

#[tokio::test]
async fn activate_not_required_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/licenses/activate"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "ActivationNotRequired",
            "detail": "This license key does not require activation."
        })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .activate("FREE", &DeviceId::from_raw("dev-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, LicenseError::ActivationNotRequired));
}

#[tokio::test]
async fn activate_other_rejection_is_activation_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/licenses/activate"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "error": "RequestValidationError",
            "detail": [{"loc": ["body", "label"], "msg": "too long"}]
        })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .activate("ABC", &DeviceId::from_raw("dev-1"))
        .await
        .unwrap_err();
    match err {
        LicenseError::ActivationFailed(reason) => assert!(reason.contains("too long")),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn activate_of_disabled_key_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/licenses/activate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "act_1",
            "license_key": {"limit_activations": 2, "status": "disabled"}
        })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .activate("ABC", &DeviceId::from_raw("dev-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, LicenseError::ActivationFailed(_)));
}

// ── revalidate ──────────────────────────────────────────────────

#[tokio::test]
async fn revalidate_confirms_matching_activation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/licenses/validate"))
        .and(body_partial_json(json!({"activation_id": "act_42"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "granted",
            "limit_activations": 1,
            "activation": {"id": "act_42"}
        })))
        .mount(&server)
        .await;

    assert!(client_for(&server).revalidate("ABC", "act_42").await.unwrap());
}

#[tokio::test]
async fn revalidate_mismatched_activation_is_false() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "granted",
            "activation": {"id": "act_other"}
        })))
        .mount(&server)
        .await;

    assert!(!client_for(&server).revalidate("ABC", "act_42").await.unwrap());
}

#[tokio::test]
async fn revalidate_deleted_activation_is_false() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": "ResourceNotFound",
            "detail": "Activation not found"
        })))
        .mount(&server)
        .await;

    assert!(!client_for(&server).revalidate("ABC", "act_42").await.unwrap());
}

#[tokio::test]
async fn revalidate_outage_is_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let err = client_for(&server).revalidate("ABC", "act_42").await.unwrap_err();
    assert!(matches!(err, LicenseError::Network(_)));
}

#[tokio::test]
async fn revalidate_with_bad_token_is_not_revocation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "Invalid token"})))
        .mount(&server)
        .await;

    let err = client_for(&server).revalidate("ABC", "act_42").await.unwrap_err();
    assert!(matches!(err, LicenseError::Protocol(_)));
}

#[tokio::test]
async fn revalidate_bad_request_is_not_revocation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "BadRequest",
            "detail": "Unsupported field"
        })))
        .mount(&server)
        .await;

    let err = client_for(&server).revalidate("ABC", "act_42").await.unwrap_err();
    assert!(matches!(err, LicenseError::Protocol(_)));
}

#[tokio::test]
async fn check_with_forbidden_token_is_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": "NotPermitted",
            "detail": "Token lacks license scope"
        })))
        .mount(&server)
        .await;

    let err = client_for(&server).check_license("ABC").await.unwrap_err();
    assert!(matches!(err, LicenseError::Protocol(_)));
}
