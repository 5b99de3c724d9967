use async_trait::async_trait;
use pkg_constants::auth::PRINCIPAL_INGRESS_GATEWAY;
use pkg_constants::labels::{
    ANNOTATION_OWNER, ANNOTATION_OWNER_NAME, ANNOTATION_ROLE, LABEL_OWNER_ID, LABEL_VISIBILITY,
    VISIBILITY_PUBLIC,
};
use pkg_constants::resources::{
    CLUSTER_ROLE_KIND, PRIVATE_POLICY_SUFFIX, PUBLIC_POLICY_SUFFIX, RBAC_API_GROUP,
};
use pkg_state::watch::WatchEvent;
use pkg_state::{IgnoreNotFound, ListParams, Registry};
use pkg_types::authorization::{
    AuthorizationPolicy, AuthorizationPolicySpec, Condition, PolicyAction, Rule, RuleFrom,
    Source, WorkloadSelector,
};
use pkg_types::config::ManagerConfig;
use pkg_types::contributor::Contributor;
use pkg_types::identity;
use pkg_types::meta::{ObjectKey, Resource, set_controller_reference};
use pkg_types::rbac::{RoleBinding, RoleRef, Subject};
use pkg_types::serviceaccount::ServiceAccount;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::apply::create_or_patch;
use crate::engine::{Nop, Outcome, ReconcileStep, Steps};
use crate::runtime::{Reconciler, controller_key, parse_registry_key};

/// Converges a Contributor into its service account, role binding and
/// mesh authorization policies.
pub struct ContributorReconciler {
    registry: Registry,
    steps: Steps<Contributor>,
}

impl ContributorReconciler {
    pub fn new(registry: Registry, config: Arc<ManagerConfig>) -> Self {
        let policies: Box<dyn ReconcileStep<Contributor>> = if config.features.network_policy {
            Box::new(PolicyStep {
                registry: registry.clone(),
                header_key: format!("request.headers[{}]", config.userid_header),
                userid_prefix: config.userid_prefix.clone(),
            })
        } else {
            Box::new(Nop::new(PolicyStep::NAME))
        };

        let steps = Steps::new()
            .with(ServiceAccountStep {
                registry: registry.clone(),
            })
            .with(RoleBindingStep {
                registry: registry.clone(),
                cluster_role: config.contributor_cluster_role.clone(),
            })
            .with_boxed(policies);

        Self { registry, steps }
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.names()
    }
}

#[async_trait]
impl Reconciler for ContributorReconciler {
    fn name(&self) -> &'static str {
        "contributor"
    }

    async fn reconcile(&self, key: &ObjectKey) -> anyhow::Result<()> {
        let Some(contributor) = self
            .registry
            .get::<Contributor>(key)
            .await
            .ignore_not_found()?
        else {
            debug!("Contributor {} no longer exists", key);
            return Ok(());
        };
        self.steps.run(&contributor).await?;
        Ok(())
    }

    async fn list_keys(&self) -> anyhow::Result<Vec<ObjectKey>> {
        let contributors: Vec<Contributor> = self.registry.list(&ListParams::default()).await?;
        Ok(contributors.iter().map(|c| c.key()).collect())
    }

    fn map_event(&self, event: &WatchEvent) -> Vec<ObjectKey> {
        match parse_registry_key(&event.key) {
            Some((plural, key)) if plural == Contributor::PLURAL => vec![key],
            Some(_) => controller_key::<Contributor>(event).into_iter().collect(),
            None => Vec::new(),
        }
    }
}

fn namespace_of(contributor: &Contributor) -> &str {
    contributor.metadata.namespace.as_deref().unwrap_or_default()
}

struct ServiceAccountStep {
    registry: Registry,
}

#[async_trait]
impl ReconcileStep<Contributor> for ServiceAccountStep {
    fn name(&self) -> &'static str {
        "service account"
    }

    async fn reconcile(&self, contributor: &Contributor) -> anyhow::Result<Outcome> {
        let user = &contributor.spec.name;
        let base = ServiceAccount::new(namespace_of(contributor), &contributor.metadata.name);
        create_or_patch(&self.registry, base, |sa| {
            set_controller_reference(contributor, sa)?;
            sa.metadata.add_label(LABEL_OWNER_ID, identity::hash(user));
            sa.metadata.add_annotation(ANNOTATION_OWNER_NAME, user.clone());
            Ok(())
        })
        .await?;
        Ok(Outcome::Continue)
    }
}

struct RoleBindingStep {
    registry: Registry,
    cluster_role: String,
}

#[async_trait]
impl ReconcileStep<Contributor> for RoleBindingStep {
    fn name(&self) -> &'static str {
        "role binding"
    }

    async fn reconcile(&self, contributor: &Contributor) -> anyhow::Result<Outcome> {
        let user = &contributor.spec.name;
        let base = RoleBinding::new(namespace_of(contributor), &contributor.metadata.name);
        create_or_patch(&self.registry, base, |binding| {
            set_controller_reference(contributor, binding)?;
            let meta = &mut binding.metadata;
            meta.add_label(LABEL_OWNER_ID, identity::hash(user));
            meta.add_annotation(ANNOTATION_OWNER_NAME, user.clone());
            // Older readers look up bindings by these two.
            meta.add_annotation(ANNOTATION_OWNER, user.clone());
            meta.add_annotation(ANNOTATION_ROLE, contributor.spec.role.as_str());
            binding.role_ref = RoleRef {
                api_group: RBAC_API_GROUP.to_string(),
                kind: CLUSTER_ROLE_KIND.to_string(),
                name: self.cluster_role.clone(),
            };
            binding.subjects = vec![Subject::user(user.clone())];
            Ok(())
        })
        .await?;
        Ok(Outcome::Continue)
    }
}

struct PolicyStep {
    registry: Registry,
    /// `request.headers[<userid header>]`
    header_key: String,
    userid_prefix: String,
}

impl PolicyStep {
    const NAME: &'static str = "authorization policy";

    fn policy(
        &self,
        contributor: &Contributor,
        principals: Vec<String>,
        selector: (&str, String),
    ) -> AuthorizationPolicySpec {
        AuthorizationPolicySpec {
            action: PolicyAction::Allow,
            rules: vec![Rule {
                from: vec![RuleFrom {
                    source: Source { principals },
                }],
                when: vec![Condition {
                    key: self.header_key.clone(),
                    values: vec![format!("{}{}", self.userid_prefix, contributor.spec.name)],
                }],
                ..Default::default()
            }],
            selector: Some(WorkloadSelector {
                match_labels: BTreeMap::from([(selector.0.to_string(), selector.1)]),
            }),
        }
    }

    /// Reachable through the gateway on workloads marked public.
    fn public_policy(&self, contributor: &Contributor) -> AuthorizationPolicySpec {
        self.policy(
            contributor,
            vec![PRINCIPAL_INGRESS_GATEWAY.to_string()],
            (LABEL_VISIBILITY, VISIBILITY_PUBLIC.to_string()),
        )
    }

    /// The contributor's own workloads, through the gateway or its service account.
    fn private_policy(&self, contributor: &Contributor) -> AuthorizationPolicySpec {
        let service_account = format!(
            "cluster.local/ns/{}/sa/{}",
            namespace_of(contributor),
            contributor.metadata.name
        );
        self.policy(
            contributor,
            vec![PRINCIPAL_INGRESS_GATEWAY.to_string(), service_account],
            (LABEL_OWNER_ID, identity::hash(&contributor.spec.name)),
        )
    }

    async fn apply(
        &self,
        contributor: &Contributor,
        suffix: &str,
        spec: AuthorizationPolicySpec,
    ) -> anyhow::Result<()> {
        let name = format!("{}-{}", contributor.metadata.name, suffix);
        let base = AuthorizationPolicy::new(namespace_of(contributor), &name);
        create_or_patch(&self.registry, base, |policy| {
            set_controller_reference(contributor, policy)?;
            policy.spec = spec;
            Ok(())
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ReconcileStep<Contributor> for PolicyStep {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn reconcile(&self, contributor: &Contributor) -> anyhow::Result<Outcome> {
        self.apply(contributor, PUBLIC_POLICY_SUFFIX, self.public_policy(contributor))
            .await?;
        self.apply(contributor, PRIVATE_POLICY_SUFFIX, self.private_policy(contributor))
            .await?;
        Ok(Outcome::Continue)
    }
}
