mod common;

use common::clock;
use entitle_license::{
    Clock, DeviceIdentity, DeviceInfo, EntitlementMachine, HttpLicenseClient, LicenseConfig,
    LicenseServer, NoHardwareId, RevalidationOutcome,
};
use entitle_store::LicenseStore;
use entitle_types::{ActivationRecord, LicenseState};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn http_machine(server: &MockServer, store: &LicenseStore) -> EntitlementMachine {
    let config = LicenseConfig {
        api_base_url: server.uri(),
        organization_id: "org_test".to_string(),
        ..Default::default()
    };
    let info = DeviceInfo {
        os_name: "linux".to_string(),
        os_version: "24.04".to_string(),
        hostname: "studio".to_string(),
        arch: "x86_64".to_string(),
    };
    let client: Arc<dyn LicenseServer> =
        Arc::new(HttpLicenseClient::with_device_info(config.clone(), info).unwrap());
    let clock: Arc<dyn Clock> = clock();
    let device = DeviceIdentity::with_hardware(store.clone(), Arc::new(NoHardwareId));
    EntitlementMachine::with_parts(store.clone(), device, client, clock, config)
}

async fn answer_validate(server: &MockServer, status: u16, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/v1/licenses/validate"))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn stateless_key_not_found_is_revoked() {
    let server = MockServer::start().await;
    answer_validate(&server, 404, json!({"error": "ResourceNotFound"})).await;
    let store = LicenseStore::in_memory();
    store.save_stateless_license("FREE-KEY").unwrap();
    let m = http_machine(&server, &store);
    assert!(m.state().is_licensed());

    assert_eq!(m.revalidate().await.unwrap(), RevalidationOutcome::Revoked);
    assert_eq!(m.state(), LicenseState::TrialActive { days_remaining: 7 });
    assert!(store.stateless_license_key().is_none());
}

#[tokio::test]
async fn stateless_key_with_malformed_reply_is_deferred() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;
    let store = LicenseStore::in_memory();
    store.save_stateless_license("FREE-KEY").unwrap();
    let m = http_machine(&server, &store);

    assert_eq!(
        m.revalidate().await.unwrap(),
        RevalidationOutcome::Deferred {
            consecutive_failures: 1
        }
    );
    assert!(m.state().is_licensed());
}

#[tokio::test]
async fn bad_token_defers_instead_of_revoking_activation() {
    let server = MockServer::start().await;
    answer_validate(&server, 401, json!({"detail": "Invalid token"})).await;
    let store = LicenseStore::in_memory();
    let record = ActivationRecord::new("ABC", "act-1", 1);
    store.save_activation_record(&record).unwrap();
    let m = http_machine(&server, &store);

    assert_eq!(
        m.revalidate().await.unwrap(),
        RevalidationOutcome::Deferred {
            consecutive_failures: 1
        }
    );
    assert!(m.state().is_licensed());
    assert_eq!(store.activation_record(), Some(record));
    assert!(store.needs_revalidation());
}

#[tokio::test]
async fn deleted_activation_is_revoked() {
    let server = MockServer::start().await;
    answer_validate(&server, 404, json!({"detail": "Activation not found"})).await;
    let store = LicenseStore::in_memory();
    store
        .save_activation_record(&ActivationRecord::new("ABC", "act-1", 1))
        .unwrap();
    let m = http_machine(&server, &store);

    assert_eq!(m.revalidate().await.unwrap(), RevalidationOutcome::Revoked);
    assert!(store.activation_record().is_none());
}
