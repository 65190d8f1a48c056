//! Driver operations and management cluster bootstrap

mod common;

use common::*;
use fleetstack_cloud::{
    APPLICATION_NETWORK_IP, CloudError, MachineRequest, ProvisioningDriver, ServiceNetwork,
    ServiceScope,
};
use fleetstack_openstack::models::ServerStatus;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(120);

#[tokio::test(start_paused = true)]
async fn test_bootstrap_management_cluster() {
    let cloud = FakeCloud::new();
    cloud.seed_network("private-net", &["10.0.0.0/24"], false);
    let driver = driver(compute_network_config(), &cloud);
    assert_eq!(driver.name(), "openstack");

    let machines = driver.start_management_machines(3, TIMEOUT).await.unwrap();

    let mut names: Vec<_> = machines.iter().map(|m| m.name.clone()).collect();
    names.sort();
    assert_eq!(
        names,
        vec!["fleetstack-manager-1", "fleetstack-manager-2", "fleetstack-manager-3"]
    );
    assert!(machines.iter().all(|m| m.public_address.is_none()));
    assert_eq!(cloud.count("create_security_group:"), 3);

    let existing = driver.get_existing_management_servers().await.unwrap();
    assert_eq!(existing.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_rolls_back_on_partial_failure() {
    let cloud = FakeCloud::with_script(|name| {
        if name.ends_with("-2") {
            vec![ServerStatus::Build, ServerStatus::Error]
        } else {
            vec![ServerStatus::Build, ServerStatus::Active]
        }
    });
    cloud.seed_network("public", &["203.0.113.0/24"], true);
    let driver = driver(managed_network_config(), &cloud);

    let err = driver.start_management_machines(3, TIMEOUT).await.unwrap_err();

    match &err {
        CloudError::ProvisioningFailed { message, source } => {
            assert!(message.contains("1 of 3 management machines failed"), "{}", message);
            assert!(source.is_some());
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(cloud.server_names().is_empty());
    assert!(cloud.security_group_names().is_empty());
    assert_eq!(cloud.network_names(), vec!["public"]);

    let state = cloud.state();
    assert!(state.floating_ips.is_empty());
    assert!(state.routers.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_sweeps_servers_of_crashed_starts() {
    let cloud = FakeCloud::with_script(|_| vec![ServerStatus::Build, ServerStatus::Active]);
    cloud.seed_network("private-net", &["10.0.0.0/24"], false);
    cloud.crash_on_first_poll("-2");
    let driver = driver(compute_network_config(), &cloud);

    let err = driver.start_management_machines(3, TIMEOUT).await.unwrap_err();

    assert!(err.to_string().contains("machine start task failed"), "{}", err);
    assert!(cloud.server_names().is_empty());
    assert_eq!(cloud.count("delete_server:fleetstack-manager-2"), 1);
    assert!(cloud.security_group_names().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_with_unbounded_timeout() {
    let cloud = FakeCloud::new();
    cloud.seed_network("private-net", &["10.0.0.0/24"], false);
    let driver = driver(compute_network_config(), &cloud);

    let machines = driver
        .start_management_machines(1, Duration::from_secs(u64::MAX))
        .await
        .unwrap();

    assert_eq!(machines.len(), 1);
    driver.stop_management_machines(Duration::MAX).await.unwrap();
    assert!(cloud.server_names().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_refuses_existing_servers() {
    let cloud = FakeCloud::new();
    cloud.seed_network("private-net", &["10.0.0.0/24"], false);
    cloud.seed_server("fleetstack-manager-7");
    let driver = driver(compute_network_config(), &cloud);

    let err = driver.start_management_machines(1, TIMEOUT).await.unwrap_err();

    match err {
        CloudError::ExistingServers { prefix, description } => {
            assert_eq!(prefix, "fleetstack-manager-");
            assert!(description.contains("fleetstack-manager-7"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(cloud.security_group_names().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_management_machines() {
    let cloud = FakeCloud::new();
    cloud.seed_network("public", &["203.0.113.0/24"], true);
    let driver = driver(managed_network_config(), &cloud);

    let machines = driver.start_management_machines(2, TIMEOUT).await.unwrap();
    assert!(machines.iter().all(|m| m.public_address.is_some()));

    let existing = driver.get_existing_management_servers().await.unwrap();
    let mut public: Vec<_> = existing.iter().filter_map(|m| m.public_address.clone()).collect();
    public.sort();
    assert_eq!(public, vec!["203.0.113.1", "203.0.113.2"]);

    driver.stop_management_machines(TIMEOUT).await.unwrap();
    assert!(cloud.server_names().is_empty());
    assert!(cloud.security_group_names().is_empty());
    assert_eq!(cloud.network_names(), vec!["public"]);
    assert!(cloud.state().floating_ips.is_empty());

    let err = driver.stop_management_machines(TIMEOUT).await.unwrap_err();
    assert!(matches!(err, CloudError::ResourceNotFound(_)));
}

#[tokio::test(start_paused = true)]
async fn test_service_on_template_network_lifecycle() {
    let cloud = FakeCloud::new();
    cloud.seed_network("private-net", &["10.0.0.0/24"], false);
    let mut config = compute_network_config();
    config
        .network
        .templates
        .insert("web-net".to_string(), managed_network("web", "10.5.0.0/24", false));
    let driver = driver(config, &cloud);
    driver.start_management_machines(1, TIMEOUT).await.unwrap();

    let scope = ServiceScope::new("shop", "web");
    let network = ServiceNetwork {
        template: Some("web-net".to_string()),
        ..Default::default()
    };
    let request = MachineRequest::service(template(&[]), scope.clone()).with_network(network.clone());
    let machine = driver.start_machine(&request, TIMEOUT).await.unwrap();

    assert!(cloud.network_names().contains(&"fleetstack-manager-web".to_string()));
    assert_eq!(machine.public_address, None);
    assert_eq!(
        machine.environment.get(APPLICATION_NETWORK_IP),
        Some(&machine.private_address)
    );

    // Another service's group does not match
    let other = ServiceScope::new("shop", "db");
    assert!(!driver
        .stop_machine(&machine.private_address, Some(&other), TIMEOUT)
        .await
        .unwrap());
    assert!(driver
        .stop_machine(&machine.private_address, Some(&scope), TIMEOUT)
        .await
        .unwrap());

    driver
        .on_service_uninstalled(&scope, Some(&network), true)
        .await
        .unwrap();
    let groups = cloud.security_group_names();
    assert!(!groups.iter().any(|g| g.starts_with("fleetstack-manager-shop")));
    assert!(groups.contains(&"fleetstack-manager-management".to_string()));
    assert!(!cloud.network_names().contains(&"fleetstack-manager-web".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_uninstall_keeps_application_group_while_in_use() {
    let cloud = FakeCloud::new();
    cloud.seed_network("private-net", &["10.0.0.0/24"], false);
    let driver = driver(compute_network_config(), &cloud);
    driver.start_management_machines(1, TIMEOUT).await.unwrap();

    let scope = ServiceScope::new("shop", "web");
    let request = MachineRequest::service(template(&["private-net"]), scope.clone());
    driver.start_machine(&request, TIMEOUT).await.unwrap();

    driver.on_service_uninstalled(&scope, None, false).await.unwrap();

    let groups = cloud.security_group_names();
    assert!(groups.contains(&"fleetstack-manager-shop".to_string()));
    assert!(!groups.contains(&"fleetstack-manager-shop-web".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_machine_failure_releases_floating_ip() {
    let cloud = FakeCloud::new();
    cloud.seed_network("public", &["203.0.113.0/24"], true);
    let driver = driver(managed_network_config(), &cloud);
    let machines = driver.start_management_machines(1, TIMEOUT).await.unwrap();
    assert_eq!(cloud.state().floating_ips.len(), 1);

    driver.on_machine_failure(&machines[0]).await.unwrap();

    assert!(cloud.state().floating_ips.is_empty());
    assert_eq!(cloud.server_names().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_terminate_all_resources() {
    let cloud = FakeCloud::new();
    cloud.seed_network("public", &["203.0.113.0/24"], true);
    cloud.seed_network("private-net", &["10.0.0.0/24"], false);
    let driver = driver(managed_network_config(), &cloud);
    driver.start_management_machines(2, TIMEOUT).await.unwrap();

    let request = MachineRequest::service(template(&["private-net"]), ServiceScope::new("shop", "web"));
    driver.start_machine(&request, TIMEOUT).await.unwrap();
    cloud.seed_server("unrelated-vm");

    driver.terminate_all_resources(TIMEOUT).await.unwrap();

    assert_eq!(cloud.server_names(), vec!["unrelated-vm"]);
    assert!(cloud.security_group_names().is_empty());
    let mut networks = cloud.network_names();
    networks.sort();
    assert_eq!(networks, vec!["private-net", "public"]);
}
