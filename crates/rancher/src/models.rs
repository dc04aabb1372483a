//! Cattle resource models.
//!
//! Only the fields autocrypt reads or writes are typed. Load balancer
//! records keep every other field in `extra` so a PUT sends back exactly
//! what was fetched, with only the certificate list changed.

use std::collections::BTreeMap;

use autocrypt_common::{CertificateId, LoadBalancerId, ProjectId, ServiceId};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Cattle wraps every listing in a collection envelope
#[derive(Debug, Clone, Deserialize)]
pub struct Collection<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

/// Cattle sends `null` for empty nested objects and lists
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A platform service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: ServiceId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub stack_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub state: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub launch_config: LaunchConfig,
    #[serde(default, deserialize_with = "null_as_default")]
    pub lb_config: ServiceLbConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaunchConfig {
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceLbConfig {
    #[serde(default, deserialize_with = "null_as_default")]
    pub port_rules: Vec<PortRule>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortRule {
    #[serde(default)]
    pub hostname: Option<String>,
}

impl Service {
    /// Label presence check; the label value is ignored
    pub fn has_label(&self, label: &str) -> bool {
        self.launch_config.labels.contains_key(label)
    }

    pub fn is_active(&self) -> bool {
        self.state == "active"
    }

    /// Active and carrying the eligibility label
    pub fn is_eligible(&self, label: &str) -> bool {
        self.has_label(label) && self.is_active()
    }

    /// Hostnames from the port rules, in rule order
    ///
    /// Rules without a hostname are skipped and a hostname served on several
    /// ports appears once. The first entry is the certificate's common name.
    pub fn hostnames(&self) -> Vec<String> {
        let mut hostnames: Vec<String> = Vec::new();
        for rule in &self.lb_config.port_rules {
            match rule.hostname.as_deref() {
                Some(host) if !host.is_empty() => {
                    if !hostnames.iter().any(|h| h == host) {
                        hostnames.push(host.to_string());
                    }
                }
                _ => {}
            }
        }
        hostnames
    }

    /// `stack/name` for log output
    pub fn display_name(&self) -> String {
        match &self.stack_id {
            Some(stack) => format!("{}/{}", stack, self.name),
            None => self.name.clone(),
        }
    }
}

/// A load balancer service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancer {
    pub id: LoadBalancerId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub lb_config: LbConfig,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LbConfig {
    #[serde(default, deserialize_with = "null_as_default")]
    pub certificate_ids: Vec<CertificateId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LoadBalancer {
    /// Add a certificate to the served set
    ///
    /// Returns `false` if the certificate was already bound.
    pub fn attach_certificate(&mut self, id: &CertificateId) -> bool {
        if self.lb_config.certificate_ids.contains(id) {
            return false;
        }
        self.lb_config.certificate_ids.push(id.clone());
        true
    }
}

/// A stored certificate
///
/// A record without `id` has not been created on the platform yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<CertificateId>,
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub cert: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub cert_chain: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service(value: Value) -> Service {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_hostnames_skip_empty_and_duplicates() {
        let svc = service(json!({
            "id": "1s1",
            "name": "web",
            "state": "active",
            "lbConfig": {
                "portRules": [
                    {"hostname": "www.example.com", "sourcePort": 80},
                    {"hostname": "", "sourcePort": 8080},
                    {"sourcePort": 9000},
                    {"hostname": "example.com", "sourcePort": 443},
                    {"hostname": "www.example.com", "sourcePort": 443}
                ]
            }
        }));

        assert_eq!(svc.hostnames(), vec!["www.example.com", "example.com"]);
    }

    #[test]
    fn test_null_nested_objects() {
        let svc = service(json!({
            "id": "1s2",
            "name": null,
            "state": "active",
            "launchConfig": null,
            "lbConfig": {"portRules": null}
        }));

        assert!(svc.hostnames().is_empty());
        assert!(!svc.has_label("ch.compile.letsencrypt"));
    }

    #[test]
    fn test_eligibility() {
        let labelled = service(json!({
            "id": "1s3",
            "name": "api",
            "state": "active",
            "launchConfig": {"labels": {"ch.compile.letsencrypt": "true"}}
        }));
        let inactive = service(json!({
            "id": "1s4",
            "name": "old",
            "state": "inactive",
            "launchConfig": {"labels": {"ch.compile.letsencrypt": ""}}
        }));

        assert!(labelled.is_eligible("ch.compile.letsencrypt"));
        assert!(!labelled.is_eligible("other.label"));
        assert!(!inactive.is_eligible("ch.compile.letsencrypt"));
    }

    #[test]
    fn test_display_name() {
        let svc = service(json!({"id": "1s5", "name": "web", "stackId": "1st2"}));
        assert_eq!(svc.display_name(), "1st2/web");
    }

    #[test]
    fn test_load_balancer_preserves_unknown_fields() {
        let original = json!({
            "id": "1s9",
            "name": "edge",
            "type": "loadBalancerService",
            "launchConfig": {"ports": ["80:80", "443:443"]},
            "lbConfig": {
                "certificateIds": ["1c1"],
                "defaultCertificateId": "1c1",
                "portRules": [{"hostname": "a.example", "targetPort": 80}]
            }
        });

        let mut lb: LoadBalancer = serde_json::from_value(original).unwrap();
        assert!(lb.attach_certificate(&CertificateId::new("1c2")));
        assert!(!lb.attach_certificate(&CertificateId::new("1c2")));

        let round_tripped = serde_json::to_value(&lb).unwrap();
        assert_eq!(round_tripped["type"], "loadBalancerService");
        assert_eq!(round_tripped["launchConfig"]["ports"][1], "443:443");
        assert_eq!(round_tripped["lbConfig"]["defaultCertificateId"], "1c1");
        assert_eq!(round_tripped["lbConfig"]["certificateIds"], json!(["1c1", "1c2"]));
        assert_eq!(
            round_tripped["lbConfig"]["portRules"][0]["hostname"],
            "a.example"
        );
    }

    #[test]
    fn test_collection_without_data_is_empty() {
        let services: Collection<Service> = serde_json::from_value(json!({
            "type": "collection",
            "resourceType": "service"
        }))
        .unwrap();
        assert!(services.data.is_empty());

        let balancers: Collection<LoadBalancer> =
            serde_json::from_value(json!({"data": [{"id": "1s9", "lbConfig": null}]})).unwrap();
        assert_eq!(balancers.data[0].id.as_str(), "1s9");
        assert!(balancers.data[0].lb_config.certificate_ids.is_empty());
    }

    #[test]
    fn test_new_certificate_omits_id() {
        let cert = Certificate {
            name: "a.example".to_string(),
            cert: "PEM".to_string(),
            ..Default::default()
        };

        let value = serde_json::to_value(&cert).unwrap();
        assert!(value.get("id").is_none());
        assert_eq!(value["certChain"], "");
    }
}
