//! Security group synthesis against the in-memory cloud

mod common;

use common::*;
use fleetstack_cloud::{
    AccessRule, AccessRuleType, AccessRules, CloudConfig, CloudError, MachineRequest,
    ServiceNetwork, ServiceScope,
};
use fleetstack_openstack::models::Direction;
use fleetstack_openstack::{NetworkApi, ProvisioningContext, SecurityGroupSynthesizer};
use std::sync::Arc;

fn shop_web() -> ServiceScope {
    ServiceScope::new("shop", "web")
}

fn service_ctx(config: &CloudConfig, access_rules: AccessRules) -> ProvisioningContext {
    let request = MachineRequest::service(template(&["private-net"]), shop_web()).with_network(
        ServiceNetwork {
            access_rules,
            ..Default::default()
        },
    );
    ProvisioningContext::new(config, &request).unwrap()
}

async fn with_management_groups(config: &CloudConfig) -> (Arc<FakeCloud>, SecurityGroupSynthesizer) {
    let cloud = FakeCloud::new();
    let security = SecurityGroupSynthesizer::new(cloud.clone());
    let management = ProvisioningContext::management(config).unwrap();
    security.ensure_management_groups(&management).await.unwrap();
    (cloud, security)
}

#[tokio::test]
async fn test_management_groups_are_idempotent() {
    let config = compute_network_config();
    let (cloud, security) = with_management_groups(&config).await;

    assert_eq!(
        cloud.security_group_names(),
        vec![
            "fleetstack-manager-cluster",
            "fleetstack-manager-management",
            "fleetstack-manager-agent",
        ]
    );
    // 7 component entries, 4 agent entries, 3 public entries
    assert_eq!(cloud.count("create_rule:"), 14);
    assert_eq!(cloud.count("create_rule:fleetstack-manager-agent:ingress"), 4);

    let management = ProvisioningContext::management(&config).unwrap();
    security.ensure_management_groups(&management).await.unwrap();
    assert_eq!(cloud.count("create_security_group:"), 3);
    assert_eq!(cloud.count("create_rule:"), 14);
}

#[tokio::test]
async fn test_management_subnets_reach_components() {
    let config = managed_network_config();
    let (cloud, _security) = with_management_groups(&config).await;

    assert_eq!(cloud.count("create_rule:fleetstack-manager-management:ingress"), 17);

    let state = cloud.state();
    let management = state
        .security_groups
        .iter()
        .find(|g| g.name == "fleetstack-manager-management")
        .unwrap();
    let from_subnet = management
        .security_group_rules
        .iter()
        .filter(|r| r.remote_ip_prefix.as_deref() == Some("10.4.0.0/24"))
        .count();
    assert_eq!(from_subnet, 7);
}

#[tokio::test]
async fn test_access_rule_creates_one_rule_per_port_entry() {
    let config = compute_network_config();
    let (_cloud, security) = with_management_groups(&config).await;
    let ctx = service_ctx(&config, AccessRules::default());
    let groups = security.ensure_service_groups(&ctx).await.unwrap();
    assert!(groups.public.is_none());

    let rule = AccessRule::new(AccessRuleType::Cluster, "80,443,8000-8010");
    let created = security
        .apply_access_rule(&ctx, &groups, Direction::Ingress, &rule)
        .await
        .unwrap();
    assert_eq!(created, 3);

    let again = security
        .apply_access_rule(&ctx, &groups, Direction::Ingress, &rule)
        .await
        .unwrap();
    assert_eq!(again, 0);
}

#[tokio::test]
async fn test_rule_target_validation() {
    let config = compute_network_config();
    let (_cloud, security) = with_management_groups(&config).await;
    let ctx = service_ctx(&config, AccessRules::default());
    let groups = security.ensure_service_groups(&ctx).await.unwrap();

    let private = AccessRule::new(AccessRuleType::Private, "80");
    let err = security
        .apply_access_rule(&ctx, &groups, Direction::Ingress, &private)
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::UnsupportedRuleType(_)));

    let range = AccessRule::new(AccessRuleType::Range, "80");
    let err = security
        .apply_access_rule(&ctx, &groups, Direction::Ingress, &range)
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::InvalidConfig(_)));

    let group = AccessRule::new(AccessRuleType::Group, "80");
    let err = security
        .apply_access_rule(&ctx, &groups, Direction::Ingress, &group)
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::InvalidConfig(_)));

    let unknown = AccessRule::new(AccessRuleType::Group, "80").with_target("nope");
    let err = security
        .apply_access_rule(&ctx, &groups, Direction::Ingress, &unknown)
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::ResourceNotFound(_)));

    let range = AccessRule::new(AccessRuleType::Range, "5432").with_target("192.168.0.0/16");
    let created = security
        .apply_access_rule(&ctx, &groups, Direction::Ingress, &range)
        .await
        .unwrap();
    assert_eq!(created, 1);
}

#[tokio::test]
async fn test_outgoing_rules_replace_default_egress() {
    let config = compute_network_config();
    let (cloud, security) = with_management_groups(&config).await;
    let rules = AccessRules {
        incoming: vec![],
        outgoing: vec![
            AccessRule::new(AccessRuleType::Application, "5432"),
            AccessRule::new(AccessRuleType::Range, "53").with_target("10.0.0.0/8"),
        ],
    };
    let ctx = service_ctx(&config, rules);
    let groups = security.ensure_service_groups(&ctx).await.unwrap();

    security.apply_service_rules(&ctx, &groups).await.unwrap();

    // One default egress rule on the one target group
    assert_eq!(cloud.count("delete_rule:"), 1);

    let state = cloud.state();
    let service = state
        .security_groups
        .iter()
        .find(|g| g.name == "fleetstack-manager-shop-web")
        .unwrap();
    let egress: Vec<_> = service
        .security_group_rules
        .iter()
        .filter(|r| r.direction == Direction::Egress)
        .collect();
    assert_eq!(egress.len(), 2);
    assert!(egress.iter().all(|r| r.port_range_min.is_some()));

    // File transfer port from the management group
    let management_id = state
        .security_groups
        .iter()
        .find(|g| g.name == "fleetstack-manager-management")
        .map(|g| g.id.clone())
        .unwrap();
    assert!(service.security_group_rules.iter().any(|r| {
        r.direction == Direction::Ingress
            && r.port_range_min == Some(22)
            && r.remote_group_id.as_deref() == Some(management_id.as_str())
    }));
}

#[tokio::test]
async fn test_restart_keeps_installed_egress_rules() {
    let config = compute_network_config();
    let (cloud, security) = with_management_groups(&config).await;
    let rules = AccessRules {
        incoming: vec![],
        outgoing: vec![AccessRule::new(AccessRuleType::Range, "53").with_target("10.0.0.0/8")],
    };
    let ctx = service_ctx(&config, rules);

    let groups = security.ensure_service_groups(&ctx).await.unwrap();
    security.apply_service_rules(&ctx, &groups).await.unwrap();
    assert_eq!(cloud.count("delete_rule:"), 1);

    let groups = security.ensure_service_groups(&ctx).await.unwrap();
    security.apply_service_rules(&ctx, &groups).await.unwrap();

    assert_eq!(cloud.count("delete_rule:"), 1);
    assert_eq!(cloud.count("create_rule:fleetstack-manager-shop-web:egress:53-53"), 1);
    let state = cloud.state();
    let service = state
        .security_groups
        .iter()
        .find(|g| g.name == "fleetstack-manager-shop-web")
        .unwrap();
    let egress: Vec<_> = service
        .security_group_rules
        .iter()
        .filter(|r| r.direction == Direction::Egress)
        .collect();
    assert_eq!(egress.len(), 1);
    assert_eq!(egress[0].remote_ip_prefix.as_deref(), Some("10.0.0.0/8"));
}

#[tokio::test]
async fn test_service_groups_created_once() {
    let config = compute_network_config();
    let (cloud, security) = with_management_groups(&config).await;
    let ctx = service_ctx(&config, AccessRules::default());
    let before = cloud.count("create_security_group:");

    let first = security.ensure_service_groups(&ctx).await.unwrap();
    assert_eq!(cloud.count("create_security_group:"), before + 2);

    let second = security.ensure_service_groups(&ctx).await.unwrap();
    assert_eq!(cloud.count("create_security_group:"), before + 2);
    assert_eq!(first.service.id, second.service.id);
    assert_eq!(first.application.id, second.application.id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_service_groups_created_once() {
    let config = compute_network_config();
    let (cloud, security) = with_management_groups(&config).await;
    let before = cloud.count("create_security_group:");
    let security = Arc::new(security);
    let ctx = Arc::new(service_ctx(&config, AccessRules::default()));

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let security = security.clone();
        let ctx = ctx.clone();
        tasks.spawn(async move { security.ensure_service_groups(&ctx).await.map(|g| g.service.id) });
    }
    let mut service_ids = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        service_ids.push(joined.unwrap().unwrap());
    }

    assert_eq!(cloud.count("create_security_group:"), before + 2);
    service_ids.dedup();
    assert_eq!(service_ids.len(), 1);
    let names = cloud.security_group_names();
    assert_eq!(names.iter().filter(|n| *n == "fleetstack-manager-shop").count(), 1);
    assert_eq!(names.iter().filter(|n| *n == "fleetstack-manager-shop-web").count(), 1);
}

#[tokio::test]
async fn test_public_rules_use_public_group() {
    let config = compute_network_config();
    let (cloud, security) = with_management_groups(&config).await;
    let rules = AccessRules {
        incoming: vec![AccessRule::new(AccessRuleType::Public, "443")],
        outgoing: vec![],
    };
    let ctx = service_ctx(&config, rules);
    let groups = security.ensure_service_groups(&ctx).await.unwrap();
    security.apply_service_rules(&ctx, &groups).await.unwrap();

    let public = groups.public.expect("public group");
    assert_eq!(public.name, "fleetstack-manager-shop-web-public");
    assert_eq!(cloud.count("create_rule:fleetstack-manager-shop-web-public:ingress:443-443"), 1);
}

#[tokio::test]
async fn test_uninstall_and_clean_all() {
    let config = compute_network_config();
    let (cloud, security) = with_management_groups(&config).await;
    cloud.create_security_group("default", "").await.unwrap();
    let rules = AccessRules {
        incoming: vec![AccessRule::new(AccessRuleType::Public, "443")],
        outgoing: vec![],
    };
    let ctx = service_ctx(&config, rules);
    security.ensure_service_groups(&ctx).await.unwrap();

    security
        .delete_service_groups(ctx.prefixes(), &shop_web())
        .await
        .unwrap();
    let names = cloud.security_group_names();
    assert!(names.contains(&"fleetstack-manager-shop".to_string()));
    assert!(!names.iter().any(|n| n.starts_with("fleetstack-manager-shop-web")));

    security
        .delete_application_group(ctx.prefixes(), "shop")
        .await
        .unwrap();
    assert!(!cloud.security_group_names().contains(&"fleetstack-manager-shop".to_string()));

    security.clean_all(ctx.prefixes()).await.unwrap();
    assert_eq!(cloud.security_group_names(), vec!["default"]);
}
