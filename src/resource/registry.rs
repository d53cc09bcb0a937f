//! Resource Registry - Load resource definitions from JSON
//!
//! This module loads all AWS resource definitions from embedded JSON files
//! and provides lookup functions for the rest of the application. A
//! definition says which listing call produces a kind, where its records
//! sit in the response, how to page, how to flatten nested lists and
//! whether the kind is account-global.

use super::sdk_dispatch::ListingCall;
use crate::aws::service::Service;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Embedded resource JSON files (compiled into the binary)
const RESOURCE_FILES: &[&str] = &[
    include_str!("../resources/ec2.json"),
    include_str!("../resources/s3.json"),
    include_str!("../resources/iam.json"),
    include_str!("../resources/elb.json"),
    include_str!("../resources/autoscaling.json"),
    include_str!("../resources/cloudwatch.json"),
];

/// Normalize a list of single-key records into a map keyed by `key`.
///
/// With `value` set, each entry maps to that field (`Key` -> `Value` for
/// tags); otherwise to the whole element.
#[derive(Debug, Clone, Deserialize)]
pub struct FlattenRule {
    pub field: String,
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
}

/// Resource definition from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceDef {
    pub display_name: String,
    pub service: Service,
    pub listing: ListingCall,
    /// Dot path to the record list; `*` fans out through an array
    pub response_path: String,
    /// Parent fields copied onto each record at a `*` fan-out
    #[serde(default)]
    pub inherit_fields: Vec<String>,
    /// Provider-assigned unique name or id
    #[serde(default)]
    pub natural_key: Option<String>,
    /// Account-wide kind: de-duplicated across profiles, no region
    #[serde(default)]
    pub is_global: bool,
    #[serde(default)]
    pub flatten: Vec<FlattenRule>,
    /// Dot path to the next-page token in a response
    #[serde(default)]
    pub next_token_path: Option<String>,
}

/// Root structure of resources/*.json
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceConfig {
    /// XML element renames per service (`reservationSet` -> `Reservations`)
    #[serde(default)]
    pub key_aliases: HashMap<Service, HashMap<String, String>>,
    #[serde(default)]
    pub resources: HashMap<String, ResourceDef>,
}

/// Global registry loaded from JSON
static REGISTRY: OnceLock<ResourceConfig> = OnceLock::new();

/// Get the resource registry (loads from embedded JSON on first access)
pub fn get_registry() -> &'static ResourceConfig {
    REGISTRY.get_or_init(|| {
        let mut final_config = ResourceConfig {
            key_aliases: HashMap::new(),
            resources: HashMap::new(),
        };

        for content in RESOURCE_FILES {
            let partial: ResourceConfig = serde_json::from_str(content)
                .unwrap_or_else(|e| panic!("Failed to parse embedded resource JSON: {}", e));
            for (service, aliases) in partial.key_aliases {
                final_config
                    .key_aliases
                    .entry(service)
                    .or_default()
                    .extend(aliases);
            }
            final_config.resources.extend(partial.resources);
        }

        final_config
    })
}

/// Get a resource definition by key
pub fn get_resource(key: &str) -> Option<&'static ResourceDef> {
    get_registry().resources.get(key)
}

/// Get all resource keys, sorted
pub fn get_all_resource_keys() -> Vec<&'static str> {
    let mut keys: Vec<&'static str> = get_registry()
        .resources
        .keys()
        .map(|s| s.as_str())
        .collect();
    keys.sort_unstable();
    keys
}

/// XML element aliases for a service
pub fn key_aliases(service: Service) -> Option<&'static HashMap<String, String>> {
    get_registry().key_aliases.get(&service)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_loads_successfully() {
        let registry = get_registry();
        assert!(
            !registry.resources.is_empty(),
            "Registry should have resources"
        );
    }

    #[test]
    fn test_ec2_instances_resource_exists() {
        let resource = get_resource("ec2-instances").expect("ec2-instances should exist");
        assert_eq!(resource.display_name, "EC2 Instances");
        assert_eq!(resource.service, Service::Ec2);
        assert_eq!(resource.listing, ListingCall::DescribeInstances);
        assert_eq!(resource.natural_key.as_deref(), Some("InstanceId"));
        assert!(!resource.is_global);
    }

    #[test]
    fn test_every_kind_is_registered() {
        let keys = get_all_resource_keys();
        for key in [
            "ec2-instances",
            "ec2-security-groups",
            "ec2-tags",
            "s3-buckets",
            "iam-users",
            "iam-groups",
            "iam-roles",
            "elb-load-balancers",
            "autoscaling-groups",
            "scaling-policies",
            "cloudwatch-alarms",
        ] {
            assert!(keys.contains(&key), "missing {}", key);
        }
    }

    #[test]
    fn test_global_kinds_declare_natural_keys() {
        for key in get_all_resource_keys() {
            let def = get_resource(key).unwrap();
            assert_eq!(def.is_global, def.service.is_global(), "{}", key);
            if def.is_global {
                assert!(def.natural_key.is_some(), "{} needs a natural key", key);
            }
        }
    }

    #[test]
    fn test_ec2_aliases_loaded() {
        let aliases = key_aliases(Service::Ec2).expect("ec2 aliases");
        assert_eq!(aliases.get("reservationSet").map(String::as_str), Some("Reservations"));
        assert!(key_aliases(Service::Iam).is_none());
    }
}
