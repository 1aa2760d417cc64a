//! Instance type selection and driver authentication

mod common;

use cirrus_cloud::{Accelerators, CloudConnector, CloudError, Credential, Disk, System};
use cirrus_cloud_openstack::auth::OIDC_ACCESS_TOKEN;
use cirrus_cloud_openstack::{AuthScheme, PROVIDER_TYPE};
use common::{Harness, credentials};

fn front() -> System {
    System::new("front")
        .with_cpu(1)
        .with_memory_mb(512)
        .with_disk(Disk::image(0, "ost://server.com/imageid"))
}

#[tokio::test]
async fn test_cheapest_plain_flavor_first() {
    let h = Harness::standard();

    let types = h.connector.concrete_system(&front(), &credentials()).await.unwrap();

    assert_eq!(types.len(), 1);
    assert_eq!(types[0].instance_type, "small");
    assert_eq!(types[0].system.instance_type.as_deref(), Some("small"));
    assert_eq!(types[0].system.cpu_count, Some(1));
    assert_eq!(types[0].system.memory_mb, Some(512));
}

#[tokio::test]
async fn test_instance_type_pattern_selects_accelerator_flavor() {
    let h = Harness::standard();
    let system = front().with_instance_type("g.*");

    let types = h.connector.concrete_system(&system, &credentials()).await.unwrap();

    assert_eq!(types.len(), 1);
    assert_eq!(types[0].instance_type, "g.small");
    assert_eq!(types[0].accelerators.count, Some(2));
}

#[tokio::test]
async fn test_accelerator_request() {
    let h = Harness::standard();
    let mut system = front();
    system.accelerators = Accelerators {
        count: Some(1),
        ..Default::default()
    };

    let types = h.connector.concrete_system(&system, &credentials()).await.unwrap();
    let names: Vec<&str> = types.iter().map(|t| t.instance_type.as_str()).collect();
    assert_eq!(names, vec!["g.small"]);
}

#[tokio::test]
async fn test_unsatisfiable_constraints() {
    let h = Harness::standard();
    let system = front().with_cpu(64);

    let types = h.connector.concrete_system(&system, &credentials()).await.unwrap();
    assert!(types.is_empty());
}

#[tokio::test]
async fn test_image_of_another_site_yields_nothing() {
    let h = Harness::standard();
    let system = System::new("front").with_disk(Disk::image(0, "ost://other.com/imageid"));

    let types = h.connector.concrete_system(&system, &credentials()).await.unwrap();
    assert!(types.is_empty());

    let system = System::new("front").with_disk(Disk::image(0, "one://server.com/1"));
    let types = h.connector.concrete_system(&system, &credentials()).await.unwrap();
    assert!(types.is_empty());
}

#[tokio::test]
async fn test_driver_authenticates_once() {
    let h = Harness::standard();

    h.connector.concrete_system(&front(), &credentials()).await.unwrap();
    h.connector.concrete_system(&front(), &credentials()).await.unwrap();

    assert_eq!(h.factory.connects(), 1);
    let params = h.factory.params.lock().unwrap();
    assert_eq!(params[0].scheme, AuthScheme::Password);
    assert_eq!(params[0].auth_url, "https://server.com:5000");
    assert_eq!(params[0].username.as_deref(), Some("user"));
}

#[tokio::test]
async fn test_changed_password_reauthenticates() {
    let h = Harness::standard();
    h.connector.concrete_system(&front(), &credentials()).await.unwrap();

    let mut changed = credentials();
    changed[1].password = Some("new-pass".into());
    h.connector.concrete_system(&front(), &changed).await.unwrap();

    assert_eq!(h.factory.connects(), 2);
    assert_eq!(h.factory.params.lock().unwrap()[1].secret, "new-pass");
}

#[tokio::test]
async fn test_token_credentials() {
    let h = Harness::standard();
    let token = vec![Credential {
        username: Some("egi.eu".into()),
        password: Some("access_token".into()),
        tenant: Some("openid".into()),
        domain: Some("project".into()),
        auth_version: Some(OIDC_ACCESS_TOKEN.into()),
        host: Some("https://server.com:5000".into()),
        ..Credential::new("ost", PROVIDER_TYPE)
    }];

    h.connector.concrete_system(&front(), &token).await.unwrap();

    let params = h.factory.params.lock().unwrap();
    assert_eq!(params[0].scheme, AuthScheme::OidcAccessToken);
    assert_eq!(params[0].tenant.as_deref(), Some("openid"));
}

#[tokio::test]
async fn test_incompatible_credentials() {
    let h = Harness::standard();
    let only_other_host = vec![Credential {
        username: Some("user".into()),
        password: Some("pass".into()),
        host: Some("https://other.com:5000".into()),
        ..Credential::new("ost", PROVIDER_TYPE)
    }];

    let err = h
        .connector
        .concrete_system(&front(), &only_other_host)
        .await
        .unwrap_err();

    assert!(matches!(err, CloudError::IncompatibleCredentials(_)));
    assert_eq!(h.factory.connects(), 0);
}
