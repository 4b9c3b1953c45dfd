//! Instance userdata for masters and minions

use crate::models::{Kube, Node};
use anyhow::{Context, Result};

/// Produces the cloud-init document an instance boots with
pub trait UserdataRenderer: Send + Sync {
    fn master(&self, kube: &Kube) -> Result<String>;

    fn minion(&self, kube: &Kube, node: &Node) -> Result<String>;
}

/// CoreOS cloud-config renderer
#[derive(Debug, Clone, Default)]
pub struct CloudConfigRenderer;

/// `major.minor` of a Kubernetes version string
fn minor_version(version: &str) -> Result<(u32, u32)> {
    let mut parts = version.trim_start_matches('v').split('.');
    let major = parts
        .next()
        .and_then(|p| p.parse().ok())
        .with_context(|| format!("Unsupported Kubernetes version {version:?}"))?;
    let minor = parts
        .next()
        .and_then(|p| p.parse().ok())
        .with_context(|| format!("Unsupported Kubernetes version {version:?}"))?;
    Ok((major, minor))
}

fn efs_units(kube: &Kube) -> String {
    let Some(fs_id) = kube.aws_config.elastic_file_system.id() else {
        return String::new();
    };
    format!(
        r#"
    - name: rpc-statd.service
      command: start
      enable: true
    - name: efs.service
      command: start
      content: |
        [Unit]
        After=network-online.target
        [Service]
        Type=oneshot
        ExecStartPre=-/usr/bin/mkdir -p /efs
        ExecStart=/bin/sh -c 'grep -qs /efs /proc/mounts || /usr/bin/mount -t nfs4 -o nfsvers=4.1,rsize=1048576,wsize=1048576,hard,timeo=600,retrans=2 $(/usr/bin/curl -s http://169.254.169.254/latest/meta-data/placement/availability-zone).{fs_id}.efs.{region}.amazonaws.com:/ /efs'
        ExecStop=/usr/bin/umount /efs
        RemainAfterExit=yes
        [Install]
        WantedBy=kubelet.service"#,
        region = kube.aws_config.region,
    )
}

impl UserdataRenderer for CloudConfigRenderer {
    fn master(&self, kube: &Kube) -> Result<String> {
        let (major, minor) = minor_version(&kube.kubernetes_version)?;
        Ok(format!(
            r#"#cloud-config
hostname: {name}-master
write_files:
  - path: /etc/kubernetes/basic_auth.csv
    permissions: "0600"
    content: |
      {password},{username},admin
  - path: /etc/kubernetes/cluster.env
    content: |
      KUBERNETES_VERSION={version}
      KUBERNETES_RELEASE={major}.{minor}
      KUBERNETES_CLUSTER={name}
      ASSET_BUCKET={bucket}
      MASTER_COUNT={masters}
coreos:
  etcd2:
    discovery: {discovery}
    advertise-client-urls: http://$private_ipv4:2379
    initial-advertise-peer-urls: http://$private_ipv4:2380
    listen-client-urls: http://0.0.0.0:2379
    listen-peer-urls: http://$private_ipv4:2380
  units:
    - name: etcd2.service
      command: start
    - name: kubelet.service
      command: start{efs}
"#,
            name = kube.name,
            username = kube.username,
            password = kube.password,
            version = kube.kubernetes_version,
            bucket = kube.aws_config.bucket_name.as_deref().unwrap_or_default(),
            masters = kube.kube_master_count,
            discovery = kube.etcd_discovery_url,
            efs = efs_units(kube),
        ))
    }

    fn minion(&self, kube: &Kube, node: &Node) -> Result<String> {
        minor_version(&kube.kubernetes_version)?;
        Ok(format!(
            r#"#cloud-config
hostname: {node}
write_files:
  - path: /etc/kubernetes/cluster.env
    content: |
      KUBERNETES_VERSION={version}
      KUBERNETES_CLUSTER={name}
      KUBERNETES_MASTER={master}
coreos:
  units:
    - name: kubelet.service
      command: start{efs}
"#,
            node = node.name,
            name = kube.name,
            version = kube.kubernetes_version,
            master = kube.master_private_ip,
            efs = efs_units(kube),
        ))
    }
}
