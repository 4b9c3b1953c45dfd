use super::simulated::SimulatedAws;
use super::*;
use crate::kubernetes::{SimulatedConnector, SimulatedKubernetes};
use crate::models::ResourceState;
use crate::provider::{CloudConfigRenderer, StaticEtcdDiscovery};
use crate::store::LocalStore;
use std::time::Duration;

struct Harness {
    aws: Arc<SimulatedAws>,
    storage: Storage,
    provider: AwsProvider,
}

fn fast() -> PollBudget {
    PollBudget::new(Duration::from_secs(2), Duration::from_millis(5))
}

fn harness_with(cluster: Arc<SimulatedKubernetes>, kubernetes_api: PollBudget) -> Harness {
    let aws = SimulatedAws::new("us-east-1");
    let storage = Storage::new(Arc::new(LocalStore::new()));
    let collaborators = Collaborators {
        userdata: Arc::new(CloudConfigRenderer),
        etcd: Arc::new(StaticEtcdDiscovery::new("https://discovery.local/token")),
        kubernetes: Arc::new(SimulatedConnector::new(cluster)),
    };
    let config = AwsProviderConfig {
        master_launch: fast(),
        kubernetes_api,
        instance_terminate: fast(),
        gateway_detach: fast(),
        subnet_delete: fast(),
        efs_mount_target: fast(),
        ..Default::default()
    };
    let provider = AwsProvider::new(aws.clients(), storage.clone(), collaborators, config);

    Harness {
        aws,
        storage,
        provider,
    }
}

fn harness() -> Harness {
    harness_with(SimulatedKubernetes::new(), fast())
}

fn kube() -> Kube {
    let mut kube = Kube::new("prod");
    kube.username = "admin".to_string();
    kube.password = "secret".to_string();
    kube
}

#[tokio::test]
async fn test_create_kube_single_master() {
    let h = harness();
    let mut kube = kube();

    h.provider
        .create_kube(&mut kube, &ActionStatus::default())
        .await
        .unwrap();

    assert_eq!(kube.aws_config.master_nodes.len(), 1);
    let master = h.aws.instance(&kube.aws_config.master_nodes[0]).unwrap();
    assert_eq!(Some(kube.master_public_ip.clone()), master.public_ip);
    assert_eq!(Some(kube.master_private_ip.clone()), master.private_ip);
    assert_eq!(h.aws.calls("create_load_balancer"), 0);
    assert!(kube.ready);

    // Only the configured zone gets a subnet
    assert_eq!(kube.aws_config.subnets.len(), 1);
    assert_eq!(kube.aws_config.subnets[0].zone, "us-east-1b");
    assert_eq!(kube.aws_config.subnets[0].ip_range, "172.20.1.0/24");

    let stored = h.storage.kubes.get(&[], "prod").await.unwrap();
    assert!(stored.ready);
    assert_eq!(stored.aws_config.master_nodes, kube.aws_config.master_nodes);

    let nodes = h.storage.nodes.list(&["prod"]).await.unwrap();
    assert_eq!(nodes.len(), 1);
    assert!(nodes[0].name.starts_with("prod-minion-"));
    assert!(nodes[0].provider_id.is_provisioned());
    assert!(!nodes[0].private_dns_name.is_empty());
}

#[test]
fn test_newest_image_by_creation_date() {
    let image = |id: &str, date: &str| capabilities::Image {
        id: id.to_string(),
        name: format!("CoreOS-stable-{id}-hvm"),
        creation_date: date.to_string(),
    };
    let images = vec![
        image("ami-old", "2016-05-10T00:00:00.000Z"),
        image("ami-1234", "2016-08-24T00:00:00.000Z"),
        image("ami-older", "2015-12-01T00:00:00.000Z"),
    ];

    assert_eq!(newest_image(images).unwrap().id, "ami-1234");
    assert!(newest_image(Vec::new()).is_none());
}

#[tokio::test]
async fn test_create_kube_without_images_fails() {
    let h = harness();
    h.aws.set_images(Vec::new());
    let mut kube = kube();

    let err = h
        .provider
        .create_kube(&mut kube, &ActionStatus::default())
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "No image matches CoreOS-stable-*");
    assert_eq!(h.aws.calls("run_instance"), 0);
}

#[tokio::test]
async fn test_create_kube_stops_at_failing_step() {
    let h = harness();
    h.aws
        .fail("create_vpc", CloudError::from_message("CreateVpc ERROR"));
    let mut kube = kube();

    let err = h
        .provider
        .create_kube(&mut kube, &ActionStatus::default())
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "CreateVpc ERROR");
    assert_eq!(h.aws.calls("create_internet_gateway"), 0);
    assert_eq!(h.aws.calls("run_instance"), 0);
    assert!(!kube.aws_config.vpc.is_provisioned());
    // Earlier steps were persisted
    assert!(kube.aws_config.private_key.is_some());
    assert!(kube.aws_config.bucket_name.is_some());
}

#[tokio::test]
async fn test_create_kube_resumes_after_failure() {
    let h = harness();
    h.aws
        .fail("create_vpc", CloudError::from_message("CreateVpc ERROR"));
    let mut kube = kube();
    let status = ActionStatus::new("creating", 3);

    assert!(h.provider.create_kube(&mut kube, &status).await.is_err());
    assert_eq!(status.error().as_deref(), Some("CreateVpc ERROR"));

    h.aws.clear_failure("create_vpc");
    h.provider.create_kube(&mut kube, &status).await.unwrap();

    assert_eq!(h.aws.calls("create_key_pair"), 1);
    assert_eq!(h.aws.calls("create_bucket"), 1);
    assert_eq!(h.aws.vpc_count(), 1);
    assert!(kube.ready);
}

#[tokio::test]
async fn test_create_kube_rerun_creates_nothing_new() {
    let h = harness();
    let mut kube = kube();
    let status = ActionStatus::default();

    h.provider.create_kube(&mut kube, &status).await.unwrap();
    h.provider.create_kube(&mut kube, &status).await.unwrap();

    assert_eq!(h.aws.calls("create_vpc"), 1);
    assert_eq!(h.aws.calls("create_internet_gateway"), 1);
    assert_eq!(h.aws.calls("create_subnet"), 1);
    assert_eq!(h.aws.calls("create_security_group"), 2);
    assert_eq!(h.aws.calls("run_instance"), 2);
    assert_eq!(h.aws.calls("create_role"), 2);
    assert_eq!(h.storage.nodes.list(&["prod"]).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_create_kube_multi_master_gets_load_balancer() {
    let h = harness();
    let mut kube = kube();
    kube.kube_master_count = 3;
    kube.aws_config.multi_az = true;

    h.provider
        .create_kube(&mut kube, &ActionStatus::default())
        .await
        .unwrap();

    assert_eq!(kube.aws_config.subnets.len(), 3);
    assert_eq!(kube.aws_config.master_nodes.len(), 3);
    assert_eq!(h.aws.calls("create_load_balancer"), 1);
    assert_eq!(h.aws.calls("register_instances"), 1);
    assert_eq!(
        kube.aws_config.master_load_balancer,
        ResourceState::Provisioned("prod-api".to_string())
    );
    assert!(kube.master_private_ip.ends_with(".elb.amazonaws.com"));
    assert!(!kube.master_public_ip.is_empty());
}

#[tokio::test]
async fn test_create_kube_relaunches_first_minion_after_failure() {
    let h = harness();
    let mut kube = kube();
    kube.kube_master_count = 3;
    let status = ActionStatus::default();

    // Stop right after the masters are up
    h.aws.fail(
        "create_load_balancer",
        CloudError::from_message("CreateLoadBalancer ERROR"),
    );
    assert!(h.provider.create_kube(&mut kube, &status).await.is_err());
    assert_eq!(kube.aws_config.master_nodes.len(), 3);
    h.aws.clear_failure("create_load_balancer");

    h.aws.fail(
        "run_instance",
        CloudError::from_message("InsufficientInstanceCapacity"),
    );
    let err = h.provider.create_kube(&mut kube, &status).await.unwrap_err();
    assert_eq!(err.to_string(), "InsufficientInstanceCapacity");
    let nodes = h.storage.nodes.list(&["prod"]).await.unwrap();
    assert_eq!(nodes.len(), 1);
    assert!(!nodes[0].provider_id.is_provisioned());

    h.aws.clear_failure("run_instance");
    h.provider.create_kube(&mut kube, &status).await.unwrap();

    let nodes = h.storage.nodes.list(&["prod"]).await.unwrap();
    assert_eq!(nodes.len(), 1);
    let instance_id = nodes[0].provider_id.id().unwrap();
    assert_eq!(h.aws.tags(instance_id)["Name"], nodes[0].name);
    // Three masters, the failed launch, the relaunch
    assert_eq!(h.aws.calls("run_instance"), 5);
    assert!(kube.ready);
}

#[tokio::test]
async fn test_create_kube_retags_existing_bucket() {
    let h = harness();
    let mut kube = kube();
    let status = ActionStatus::default();

    h.aws
        .fail("tag_bucket", CloudError::from_message("TagBucket ERROR"));
    assert!(h.provider.create_kube(&mut kube, &status).await.is_err());
    let bucket = kube.aws_config.bucket_name.clone().unwrap();
    assert!(h.aws.tags(&bucket).is_empty());

    h.aws.clear_failure("tag_bucket");
    h.provider.create_kube(&mut kube, &status).await.unwrap();

    assert_eq!(h.aws.calls("create_bucket"), 1);
    assert_eq!(h.aws.tags(&bucket)["KubernetesCluster"], "prod");
}

#[tokio::test]
async fn test_create_kube_duplicate_key_pair() {
    let h = harness();
    h.aws.insert_key_pair("prod-key");
    let mut kube = kube();

    let err = h
        .provider
        .create_kube(&mut kube, &ActionStatus::default())
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "KeyPair existed, but key material was not captured. Deleted KeyPair... will retry"
    );
    assert_eq!(h.aws.calls("delete_key_pair"), 1);
    assert_eq!(h.aws.calls("create_bucket"), 0);

    // The retry captures fresh key material
    h.provider
        .create_kube(&mut kube, &ActionStatus::default())
        .await
        .unwrap();
    assert!(kube.aws_config.private_key.is_some());
}

#[tokio::test]
async fn test_create_kube_iam_lookup_failure_is_fatal() {
    let h = harness();
    h.aws.fail(
        "get_role",
        CloudError::from_message("InternalError: status code: 500"),
    );
    let mut kube = kube();

    let err = h
        .provider
        .create_kube(&mut kube, &ActionStatus::default())
        .await
        .unwrap_err();

    assert!(format!("{err:#}").contains("status code: 500"));
    assert_eq!(h.aws.calls("create_role"), 0);
    assert_eq!(h.aws.calls("create_key_pair"), 0);
}

#[tokio::test]
async fn test_create_kube_skips_iam_for_supplied_roles() {
    let h = harness();
    let mut kube = kube();
    kube.aws_config.master_role_name = Some("custom-master".to_string());
    kube.aws_config.node_role_name = Some("custom-node".to_string());

    h.provider
        .create_kube(&mut kube, &ActionStatus::default())
        .await
        .unwrap();

    assert_eq!(h.aws.calls("get_role"), 0);
    assert_eq!(h.aws.calls("create_instance_profile"), 0);
}

#[tokio::test]
async fn test_create_kube_with_file_system() {
    let h = harness();
    let mut kube = kube();
    kube.aws_config.build_elastic_file_system = true;

    h.provider
        .create_kube(&mut kube, &ActionStatus::default())
        .await
        .unwrap();

    assert!(kube.aws_config.elastic_file_system.is_provisioned());
    assert_eq!(kube.aws_config.efs_mount_targets.len(), 1);
    assert_eq!(
        kube.aws_config.efs_mount_targets[0].subnet_id,
        kube.aws_config.subnet_ids()[0]
    );

    let bucket = kube.aws_config.bucket_name.clone().unwrap();
    let objects = h.aws.bucket_objects(&bucket).unwrap();
    assert!(objects["build/master.yaml"].contains("efs.service"));
}

#[tokio::test]
async fn test_create_kube_times_out_without_nodes() {
    let h = harness_with(
        SimulatedKubernetes::without_nodes(),
        PollBudget::new(Duration::from_millis(100), Duration::from_millis(10)),
    );
    let mut kube = kube();

    let err = h
        .provider
        .create_kube(&mut kube, &ActionStatus::default())
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "Timed out waiting for Kubernetes API and first minion"
    );
    assert!(!kube.ready);
    assert!(!kube.master_public_ip.is_empty());
}

#[tokio::test]
async fn test_create_kube_cancelled_while_waiting() {
    let h = harness_with(SimulatedKubernetes::without_nodes(), fast());
    let mut kube = kube();
    let status = ActionStatus::new("creating", 1);
    status.cancel();

    let err = h.provider.create_kube(&mut kube, &status).await.unwrap_err();

    assert_eq!(
        err.to_string(),
        "Action cancelled while waiting for Kubernetes master launch"
    );
    assert_eq!(kube.aws_config.master_nodes.len(), 1);
}

#[tokio::test]
async fn test_delete_kube_keeps_managed_vpc() {
    let h = harness();
    let mut kube = kube();
    kube.aws_config.vpc_managed = true;
    kube.aws_config.vpc.provision("vpc-external");
    kube.aws_config.node_security_group.provision("sg-node");
    kube.aws_config.elb_security_group.provision("sg-elb");

    h.provider.delete_kube(&mut kube).await.unwrap();

    assert_eq!(h.aws.calls("delete_vpc"), 0);
    assert_eq!(h.aws.calls("delete_internet_gateway"), 0);
    assert_eq!(h.aws.calls("delete_subnet"), 0);
    assert_eq!(h.aws.calls("delete_security_group"), 2);
    assert_eq!(
        kube.aws_config.vpc,
        ResourceState::Provisioned("vpc-external".to_string())
    );
    assert!(!kube.aws_config.node_security_group.is_provisioned());
}

#[tokio::test]
async fn test_delete_kube_with_nothing_created() {
    let h = harness();
    let mut kube = kube();

    h.provider.delete_kube(&mut kube).await.unwrap();

    for operation in [
        "terminate_instance",
        "delete_mount_target",
        "disassociate_route_table",
        "detach_internet_gateway",
        "delete_internet_gateway",
        "delete_route_table",
        "delete_subnet",
        "delete_security_group",
        "delete_bucket",
        "delete_vpc",
    ] {
        assert_eq!(h.aws.calls(operation), 0, "{operation}");
    }
    assert!(h.storage.kubes.get(&[], "prod").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_delete_kube_removes_everything() {
    let h = harness();
    let mut kube = kube();
    kube.aws_config.build_elastic_file_system = true;
    h.provider
        .create_kube(&mut kube, &ActionStatus::default())
        .await
        .unwrap();

    h.provider.delete_kube(&mut kube).await.unwrap();

    assert_eq!(h.aws.vpc_count(), 0);
    assert_eq!(h.aws.running_instances(), 0);
    assert!(h.storage.nodes.list(&["prod"]).await.unwrap().is_empty());
    assert!(kube.aws_config.master_nodes.is_empty());
    assert!(kube.aws_config.efs_mount_targets.is_empty());
    assert!(kube.aws_config.route_table_associations.is_empty());
    assert!(kube.aws_config.bucket_name.is_none());
    assert!(kube.aws_config.private_key.is_none());
    assert!(kube.aws_config.subnet_ids().is_empty());
    assert!(kube.aws_config.pending_resources().contains(&"vpc"));

    // Deleting again is a no-op
    h.provider.delete_kube(&mut kube).await.unwrap();
    assert_eq!(h.aws.calls("delete_vpc"), 1);
}

#[tokio::test]
async fn test_delete_kube_resumes_after_failure() {
    let h = harness();
    let mut kube = kube();
    h.provider
        .create_kube(&mut kube, &ActionStatus::default())
        .await
        .unwrap();

    h.aws.fail(
        "delete_route_table",
        CloudError::from_message("DependencyViolation: route table has dependencies"),
    );
    let err = h.provider.delete_kube(&mut kube).await.unwrap_err();
    assert!(err.to_string().starts_with("DependencyViolation"));
    assert!(kube.aws_config.master_nodes.is_empty());
    assert!(!kube.aws_config.internet_gateway.is_provisioned());
    assert!(kube.aws_config.vpc.is_provisioned());

    h.aws.clear_failure("delete_route_table");
    h.provider.delete_kube(&mut kube).await.unwrap();
    assert_eq!(h.aws.vpc_count(), 0);
    assert_eq!(h.aws.calls("delete_internet_gateway"), 1);
}

#[tokio::test]
async fn test_delete_kube_treats_refused_bucket_as_gone() {
    let h = harness();
    let mut kube = kube();
    h.provider
        .create_kube(&mut kube, &ActionStatus::default())
        .await
        .unwrap();

    h.aws.fail(
        "delete_bucket",
        CloudError::from_message(
            "MethodNotAllowed: The specified method is not allowed against this resource.",
        ),
    );
    h.provider.delete_kube(&mut kube).await.unwrap();

    assert!(kube.aws_config.bucket_name.is_none());
    assert_eq!(h.aws.calls("delete_vpc"), 1);
    assert_eq!(h.aws.calls("delete_key_pair"), 1);
    assert_eq!(h.aws.vpc_count(), 0);
}

#[tokio::test]
async fn test_delete_kube_treats_unlistable_bucket_as_gone() {
    let h = harness();
    let mut kube = kube();
    h.provider
        .create_kube(&mut kube, &ActionStatus::default())
        .await
        .unwrap();

    h.aws.fail(
        "list_objects",
        CloudError::from_message("AuthorizationHeaderMalformed: The authorization header is malformed"),
    );
    h.provider.delete_kube(&mut kube).await.unwrap();

    assert!(kube.aws_config.bucket_name.is_none());
    assert_eq!(h.aws.calls("delete_bucket"), 0);
    assert_eq!(h.aws.calls("delete_vpc"), 1);
}

#[tokio::test]
async fn test_create_and_delete_node() {
    let h = harness();
    let mut kube = kube();
    h.provider
        .create_kube(&mut kube, &ActionStatus::default())
        .await
        .unwrap();

    let mut node = Node::new("prod", "m4.xlarge");
    node.name = "prod-minion-extra".to_string();
    h.provider
        .create_node(&mut node, &ActionStatus::default())
        .await
        .unwrap();

    let instance_id = node.provider_id.id().unwrap().to_string();
    assert_eq!(h.aws.tags(&instance_id)["Name"], "prod-minion-extra");
    assert_eq!(h.aws.tags(&instance_id)["KubernetesCluster"], "prod");
    assert!(node.provider_creation_timestamp.is_some());
    assert_eq!(h.storage.nodes.list(&["prod"]).await.unwrap().len(), 2);

    // Launching again keeps the existing instance
    h.provider
        .create_node(&mut node, &ActionStatus::default())
        .await
        .unwrap();
    assert_eq!(h.aws.calls("run_instance"), 3);

    h.provider.delete_node(&mut node).await.unwrap();
    assert!(!node.provider_id.is_provisioned());
    assert_eq!(
        h.aws.instance(&instance_id).unwrap().state,
        capabilities::InstanceState::Terminated
    );

    // Already terminated
    h.provider.delete_node(&mut node).await.unwrap();
    assert_eq!(h.aws.calls("terminate_instance"), 1);
}

#[tokio::test]
async fn test_create_node_for_missing_kube() {
    let h = harness();
    let mut node = Node::new("ghost", "m4.large");

    let err = h
        .provider
        .create_node(&mut node, &ActionStatus::default())
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Failed to load kube ghost");
    assert_eq!(h.aws.calls("run_instance"), 0);
}

#[tokio::test]
async fn test_validate_account() {
    let h = harness();
    h.provider.validate_account().await.unwrap();

    h.aws.fail(
        "describe_key_pairs",
        CloudError::from_message("AuthFailure: AWS was not able to validate the provided access credentials"),
    );
    let err = h.provider.validate_account().await.unwrap_err();
    assert_eq!(err.to_string(), "Failed to validate AWS credentials");
}
