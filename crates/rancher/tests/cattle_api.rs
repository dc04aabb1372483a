//! Cattle API walkthrough against a mock server: list, create, re-fetch,
//! and bind a certificate the way a provisioning pass does.

use std::time::Duration;

use autocrypt_common::CertificateId;
use autocrypt_rancher::{Certificate, LoadBalancer, PlatformApi, RancherClient, RancherError};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const AUTH: &str = "Basic YWdlbnQ6c2VjcmV0";
const LABEL: &str = "ch.compile.letsencrypt";

async fn client(server: &MockServer) -> RancherClient {
    RancherClient::new(
        format!("{}/v2-beta", server.uri()),
        AUTH,
        LABEL,
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn test_provisioning_pass() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2-beta/services"))
        .and(header("Authorization", AUTH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"id": "1s1", "name": "web", "stackId": "1st5", "state": "active",
                 "launchConfig": {"labels": {LABEL: "true"}},
                 "lbConfig": {"portRules": [
                     {"hostname": "svc.example", "sourcePort": 80},
                     {"hostname": "www.svc.example", "sourcePort": 80}
                 ]}},
                {"id": "1s2", "name": "db", "state": "active", "launchConfig": null}
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2-beta/loadbalancerservices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{
                "id": "1s9",
                "name": "edge",
                "type": "loadBalancerService",
                "lbConfig": {"certificateIds": null, "defaultCertificateId": null}
            }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2-beta/projects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "1a5", "name": "Default"}]
        })))
        .mount(&server)
        .await;

    // absent on the first lookup, present after the POST
    Mock::given(method("GET"))
        .and(path("/v2-beta/certificates"))
        .and(query_param("name", "svc.example"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2-beta/certificates"))
        .and(query_param("name", "svc.example"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "1c4", "name": "svc.example", "cert": "LEAF", "certChain": "CHAIN"}]
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v2-beta/projects/1a5/certificates"))
        .and(body_partial_json(json!({"name": "svc.example", "cert": "LEAF"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "1c4"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v2-beta/loadbalancerservices/1s9"))
        .and(body_partial_json(json!({
            "type": "loadBalancerService",
            "lbConfig": {"certificateIds": ["1c4"]}
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server).await;

    let services = client.eligible_services().await.unwrap();
    assert_eq!(services.len(), 1);
    let hostnames = services[0].hostnames();
    assert_eq!(hostnames, vec!["svc.example", "www.svc.example"]);

    let mut balancers = client.load_balancers().await.unwrap();
    assert!(client.find_certificate(&hostnames[0]).await.unwrap().is_none());

    let record = Certificate {
        name: hostnames[0].clone(),
        cert: "LEAF".to_string(),
        cert_chain: "CHAIN".to_string(),
        key: Some("KEY".to_string()),
        ..Default::default()
    };
    client.upsert_certificate(&record).await.unwrap();

    let created = client.find_certificate(&hostnames[0]).await.unwrap().unwrap();
    let id = created.id.unwrap();
    assert_eq!(id, CertificateId::new("1c4"));

    assert!(balancers[0].attach_certificate(&id));
    client.update_load_balancer(&balancers[0]).await.unwrap();
}

#[tokio::test]
async fn test_rejected_load_balancer_update() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/v2-beta/loadbalancerservices/1s9"))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;

    let balancer: LoadBalancer =
        serde_json::from_value(json!({"id": "1s9", "name": "edge"})).unwrap();
    let err = client(&server)
        .await
        .update_load_balancer(&balancer)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RancherError::Status { method: "PUT", status: 409, .. }
    ));
}
