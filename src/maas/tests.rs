//! Tests for the MAAS gateway plumbing that does not need a live server.

use rstest::{fixture, rstest};

use super::types::{classify_response, conflict_as_unavailable, decode, encode_user_data};
use super::{MaasError, MaasGateway, MachineRecord, api_root};
use crate::config::MaasConfig;
use crate::gateway::{GatewayError, MachineHandle, MachineStatus};

#[fixture]
fn config() -> MaasConfig {
    MaasConfig {
        api_url: String::from("http://maas.example:5240/MAAS"),
        api_key: String::from("ck:tk:secret"),
        http_timeout_secs: 30,
    }
}

#[rstest]
#[case("http://maas.example:5240/MAAS", "http://maas.example:5240/MAAS/api/2.0/")]
#[case("http://maas.example:5240/MAAS/", "http://maas.example:5240/MAAS/api/2.0/")]
#[case("https://maas.example/MAAS/api/2.0/", "https://maas.example/MAAS/api/2.0/")]
fn api_root_appends_version_path_once(#[case] url: &str, #[case] expected: &str) {
    assert_eq!(api_root(url), expected);
}

#[rstest]
fn gateway_builds_without_contacting_the_server(config: MaasConfig) {
    let gateway = MaasGateway::new(&config)
        .unwrap_or_else(|err| panic!("gateway should build: {err}"));

    assert_eq!(gateway.api_root(), "http://maas.example:5240/MAAS/api/2.0/");
}

#[rstest]
fn malformed_api_key_is_rejected(config: MaasConfig) {
    let bad = MaasConfig {
        api_key: String::from("not-a-key"),
        ..config
    };

    let outcome = MaasGateway::new(&bad);

    assert!(matches!(outcome, Err(MaasError::ApiKey(_))));
}

#[rstest]
fn invalid_config_is_rejected(config: MaasConfig) {
    let bad = MaasConfig {
        api_url: String::from("maas.example"),
        ..config
    };

    let outcome = MaasGateway::new(&bad);

    assert!(matches!(outcome, Err(MaasError::Config(_))));
}

#[rstest]
#[case(200, Ok(String::from("{}")))]
#[case(404, Err(GatewayError::NotFound { resource: String::from("machine m1") }))]
#[case(409, Err(GatewayError::Rejected { status: 409, body: String::from("{}") }))]
#[case(503, Err(GatewayError::Rejected { status: 503, body: String::from("{}") }))]
fn responses_map_to_gateway_errors(
    #[case] status: u16,
    #[case] expected: Result<String, GatewayError>,
) {
    assert_eq!(
        classify_response(status, String::from("{}"), "machine m1"),
        expected
    );
}

#[rstest]
fn allocation_conflict_means_no_machine_available() {
    let err = conflict_as_unavailable(
        GatewayError::Rejected {
            status: 409,
            body: String::from("No available machine matches constraints"),
        },
        "machine with 4 CPUs and 8192 MiB",
    );

    let GatewayError::Unavailable { message } = err else {
        panic!("expected Unavailable, got {err:?}");
    };
    assert!(message.contains("4 CPUs"), "unexpected message: {message}");
}

#[rstest]
fn machine_record_ignores_unknown_fields() {
    let body = r#"{
        "system_id": "4y3h7n",
        "hostname": "node-1",
        "status": 10,
        "status_name": "Allocated",
        "cpu_count": 8,
        "memory": 16384,
        "tag_names": ["gpu"],
        "power_state": "on"
    }"#;

    let record: MachineRecord =
        decode(body).unwrap_or_else(|err| panic!("record should decode: {err}"));
    let handle = MachineHandle::from(record);

    assert_eq!(handle.system_id, "4y3h7n");
    assert_eq!(handle.status, MachineStatus::Allocated);
    assert_eq!(handle.hostname.as_deref(), Some("node-1"));
}

#[rstest]
fn unexpected_body_is_a_decode_error() {
    let outcome = decode::<MachineRecord>("<html>login</html>");

    assert!(matches!(outcome, Err(GatewayError::Decode { .. })));
}

#[rstest]
fn user_data_is_base64_encoded() {
    assert_eq!(encode_user_data("echo hi"), "ZWNobyBoaQ==");
}
