//! IAM roles and instance profiles for masters and minions

use super::capabilities::Iam;
use anyhow::{Context, Result};
use tracing::debug;

pub const MASTER_ROLE: &str = "kubernetes-master";
pub const MINION_ROLE: &str = "kubernetes-minion";

pub const ASSUME_ROLE_POLICY: &str = r#"{
  "Version": "2012-10-17",
  "Statement": [
    {
      "Effect": "Allow",
      "Principal": { "Service": "ec2.amazonaws.com" },
      "Action": "sts:AssumeRole"
    }
  ]
}"#;

pub const MASTER_POLICY: &str = r#"{
  "Version": "2012-10-17",
  "Statement": [
    { "Effect": "Allow", "Action": ["ec2:*"], "Resource": ["*"] },
    { "Effect": "Allow", "Action": ["elasticloadbalancing:*"], "Resource": ["*"] },
    { "Effect": "Allow", "Action": ["route53:*"], "Resource": ["*"] },
    { "Effect": "Allow", "Action": "s3:*", "Resource": ["*"] }
  ]
}"#;

pub const MINION_POLICY: &str = r#"{
  "Version": "2012-10-17",
  "Statement": [
    { "Effect": "Allow", "Action": "s3:*", "Resource": ["*"] },
    { "Effect": "Allow", "Action": "ec2:Describe*", "Resource": "*" },
    { "Effect": "Allow", "Action": "ec2:AttachVolume", "Resource": "*" },
    { "Effect": "Allow", "Action": "ec2:DetachVolume", "Resource": "*" },
    { "Effect": "Allow", "Action": ["route53:*"], "Resource": ["*"] },
    {
      "Effect": "Allow",
      "Action": [
        "ecr:GetAuthorizationToken",
        "ecr:BatchCheckLayerAvailability",
        "ecr:GetDownloadUrlForLayer",
        "ecr:GetRepositoryPolicy",
        "ecr:DescribeRepositories",
        "ecr:ListImages",
        "ecr:BatchGetImage"
      ],
      "Resource": "*"
    }
  ]
}"#;

/// Create the role unless it exists; lookup failures other than NotFound abort
pub async fn ensure_role(iam: &dyn Iam, name: &str) -> Result<()> {
    match iam.get_role(name).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => {
            debug!(role = %name, "Creating IAM role");
            iam.create_role(name, ASSUME_ROLE_POLICY)
                .await
                .with_context(|| format!("Failed to create IAM role {name}"))
        }
        Err(e) => Err(e).with_context(|| format!("Failed to look up IAM role {name}")),
    }
}

pub async fn ensure_role_policy(iam: &dyn Iam, role: &str, document: &str) -> Result<()> {
    match iam.get_role_policy(role, role).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => {
            debug!(role = %role, "Putting IAM role policy");
            iam.put_role_policy(role, role, document)
                .await
                .with_context(|| format!("Failed to put IAM role policy {role}"))
        }
        Err(e) => Err(e).with_context(|| format!("Failed to look up IAM role policy {role}")),
    }
}

/// Create the instance profile and attach the same-named role
pub async fn ensure_instance_profile(iam: &dyn Iam, name: &str) -> Result<()> {
    let roles = match iam.get_instance_profile(name).await {
        Ok(roles) => roles,
        Err(e) if e.is_not_found() => {
            debug!(profile = %name, "Creating IAM instance profile");
            iam.create_instance_profile(name)
                .await
                .with_context(|| format!("Failed to create instance profile {name}"))?;
            Vec::new()
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to look up instance profile {name}"))
        }
    };

    if !roles.iter().any(|r| r == name) {
        iam.add_role_to_instance_profile(name, name)
            .await
            .with_context(|| format!("Failed to add role {name} to instance profile"))?;
    }
    Ok(())
}
