use anyhow::Context;
use async_trait::async_trait;
use pkg_constants::auth::{PRINCIPAL_NOTEBOOK_CONTROLLER, SEMANTIC_ROLE_ADMIN};
use pkg_constants::labels::{
    ANNOTATION_OWNER, LABEL_CONTRIBUTOR_ROLE, LABEL_OWNER_ID, LABEL_PART_OF, PART_OF_PROFILE,
};
use pkg_constants::resources::{
    CONTROL_PLANE_POLICY_NAME, KERNEL_API_PATH, PROBE_PATHS, RESOURCE_QUOTA_NAME,
};
use pkg_state::watch::WatchEvent;
use pkg_state::{IgnoreNotFound, ListParams, Registry};
use pkg_types::authorization::{
    AuthorizationPolicy, AuthorizationPolicySpec, Operation, PolicyAction, Rule, RuleFrom,
    RuleTo, Source,
};
use pkg_types::config::ManagerConfig;
use pkg_types::contributor::{Contributor, ContributorRole, ContributorSpec};
use pkg_types::identity;
use pkg_types::meta::{ObjectKey, ObjectMeta, Resource, set_controller_reference};
use pkg_types::namespace::Namespace;
use pkg_types::profile::{ConditionStatus, LocalObjectReference, Profile, ProfileCondition};
use pkg_types::quota::{ResourceQuota, ResourceQuotaSpec};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::apply::create_or_patch;
use crate::engine::{Nop, Outcome, PassResult, ReconcileStep, Steps};
use crate::runtime::{Reconciler, controller_key, parse_registry_key};

/// Converges a Profile into its namespace, owner contributor, quota and
/// control-plane policy, and keeps its contributor roster current.
pub struct ProfileReconciler {
    registry: Registry,
    steps: Steps<Profile>,
}

impl ProfileReconciler {
    pub fn new(registry: Registry, config: Arc<ManagerConfig>) -> Self {
        let policy: Box<dyn ReconcileStep<Profile>> = if config.features.network_policy {
            Box::new(ControlPlanePolicyStep {
                registry: registry.clone(),
            })
        } else {
            Box::new(Nop::new(ControlPlanePolicyStep::NAME))
        };

        let steps = Steps::new()
            .with(NamespaceStep {
                registry: registry.clone(),
                adoption: config.features.namespace_adoption,
                labels: config.effective_namespace_labels(),
            })
            .with(OwnerContributorStep {
                registry: registry.clone(),
            })
            .with(QuotaStep {
                registry: registry.clone(),
                default_quota: config.default_resource_quota.clone(),
            })
            .with_boxed(policy);

        Self { registry, steps }
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.names()
    }

    async fn update_roster(&self, profile: Profile) -> anyhow::Result<Profile> {
        let contributors: Vec<Contributor> = self
            .registry
            .list(&ListParams::in_namespace(profile.metadata.name.clone()))
            .await?;
        let roster = roster(contributors.into_iter().map(|c| c.metadata.name));
        if profile.status.contributors == roster {
            return Ok(profile);
        }

        let mut updated = profile;
        updated.status.contributors = roster;
        Ok(self.registry.update(updated).await?)
    }

    async fn record_condition(
        &self,
        key: &ObjectKey,
        condition: ProfileCondition,
    ) -> anyhow::Result<()> {
        let Some(mut profile) = self.registry.get::<Profile>(key).await.ignore_not_found()? else {
            return Ok(());
        };
        if profile.status.set_condition(condition) {
            self.registry.update(profile).await?;
        }
        Ok(())
    }
}

/// Sorted, de-duplicated roster of contributor names.
pub fn roster(names: impl IntoIterator<Item = String>) -> Vec<LocalObjectReference> {
    names
        .into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(|name| LocalObjectReference { name })
        .collect()
}

#[async_trait]
impl Reconciler for ProfileReconciler {
    fn name(&self) -> &'static str {
        "profile"
    }

    async fn reconcile(&self, key: &ObjectKey) -> anyhow::Result<()> {
        let Some(profile) = self.registry.get::<Profile>(key).await.ignore_not_found()? else {
            debug!("Profile {} no longer exists", key);
            return Ok(());
        };

        let profile = self
            .update_roster(profile)
            .await
            .context("failed to update contributor roster")?;

        let result = self.steps.run(&profile).await;
        let condition = match &result {
            Ok(PassResult::Completed) => ProfileCondition::ready(ConditionStatus::Successful, ""),
            Ok(PassResult::Stopped { reason, .. }) => {
                ProfileCondition::ready(ConditionStatus::Unknown, reason.clone())
            }
            Err(e) => ProfileCondition::ready(ConditionStatus::Failed, format!("{:#}", e)),
        };
        let recorded = self
            .record_condition(key, condition)
            .await
            .context("failed to record profile status");

        result?;
        recorded
    }

    async fn list_keys(&self) -> anyhow::Result<Vec<ObjectKey>> {
        let profiles: Vec<Profile> = self.registry.list(&ListParams::default()).await?;
        Ok(profiles.iter().map(|p| p.key()).collect())
    }

    fn map_event(&self, event: &WatchEvent) -> Vec<ObjectKey> {
        let Some((plural, key)) = parse_registry_key(&event.key) else {
            return Vec::new();
        };
        if plural == Profile::PLURAL {
            vec![key]
        } else if plural == Contributor::PLURAL {
            // The roster of the profile governing the namespace changed.
            key.namespace.map(ObjectKey::cluster).into_iter().collect()
        } else {
            controller_key::<Profile>(event).into_iter().collect()
        }
    }
}

/// Whether `namespace` already belongs to `profile`.
fn namespace_owned_by(namespace: &Namespace, profile: &Profile) -> bool {
    match namespace.metadata.controller() {
        Some(owner) => owner.uid == profile.metadata.uid,
        None => {
            namespace.metadata.annotations.get(ANNOTATION_OWNER)
                == Some(&profile.spec.owner.name)
        }
    }
}

struct NamespaceStep {
    registry: Registry,
    adoption: bool,
    labels: BTreeMap<String, String>,
}

#[async_trait]
impl ReconcileStep<Profile> for NamespaceStep {
    fn name(&self) -> &'static str {
        "namespace"
    }

    async fn reconcile(&self, profile: &Profile) -> anyhow::Result<Outcome> {
        let name = &profile.metadata.name;
        let existing = self
            .registry
            .get::<Namespace>(&ObjectKey::cluster(name.as_str()))
            .await
            .ignore_not_found()?;
        if let Some(ns) = existing
            && !self.adoption
            && !namespace_owned_by(&ns, profile)
        {
            warn!(
                "Namespace {} exists and is not owned by profile {}, refusing to adopt it",
                name, name
            );
            return Ok(Outcome::Stop(format!(
                "namespace {} is not owned by this profile",
                name
            )));
        }

        create_or_patch(&self.registry, Namespace::new(name), |ns| {
            for (key, value) in &self.labels {
                if !ns.metadata.has_label(key) {
                    ns.metadata.add_label(key, value.clone());
                }
            }
            ns.metadata
                .add_annotation(ANNOTATION_OWNER, profile.spec.owner.name.clone());
            set_controller_reference(profile, ns)?;
            Ok(())
        })
        .await?;
        Ok(Outcome::Continue)
    }
}

struct OwnerContributorStep {
    registry: Registry,
}

#[async_trait]
impl ReconcileStep<Profile> for OwnerContributorStep {
    fn name(&self) -> &'static str {
        "owner contributor"
    }

    async fn reconcile(&self, profile: &Profile) -> anyhow::Result<Outcome> {
        let owner = &profile.spec.owner;
        if !owner.is_user() {
            debug!(
                "Profile {} is owned by a {}, skipping owner contributor",
                profile.metadata.name, owner.kind
            );
            return Ok(Outcome::Continue);
        }

        let name = &profile.metadata.name;
        let base = Contributor {
            metadata: ObjectMeta::namespaced(name.as_str(), name.as_str()),
            ..Default::default()
        };
        create_or_patch(&self.registry, base, |c| {
            set_controller_reference(profile, c)?;
            c.metadata.add_label(LABEL_OWNER_ID, identity::hash(&owner.name));
            c.metadata.add_label(LABEL_CONTRIBUTOR_ROLE, SEMANTIC_ROLE_ADMIN);
            c.spec = ContributorSpec {
                name: owner.name.clone(),
                role: ContributorRole::Owner,
            };
            Ok(())
        })
        .await?;
        Ok(Outcome::Continue)
    }
}

struct QuotaStep {
    registry: Registry,
    default_quota: Option<ResourceQuotaSpec>,
}

#[async_trait]
impl ReconcileStep<Profile> for QuotaStep {
    fn name(&self) -> &'static str {
        "resource quota"
    }

    async fn reconcile(&self, profile: &Profile) -> anyhow::Result<Outcome> {
        // Profile spec, then the configured default, then no limits at all.
        let spec = profile
            .spec
            .resource_quota_spec
            .clone()
            .or_else(|| self.default_quota.clone())
            .unwrap_or_default();

        let base = ResourceQuota::new(&profile.metadata.name, RESOURCE_QUOTA_NAME);
        create_or_patch(&self.registry, base, |quota| {
            set_controller_reference(profile, quota)?;
            quota.metadata.add_label(LABEL_PART_OF, PART_OF_PROFILE);
            quota.spec = spec;
            Ok(())
        })
        .await?;
        Ok(Outcome::Continue)
    }
}

struct ControlPlanePolicyStep {
    registry: Registry,
}

impl ControlPlanePolicyStep {
    const NAME: &'static str = "control plane policy";
}

/// Lets probes reach every workload and the notebook controller reach kernels.
fn control_plane_policy() -> AuthorizationPolicySpec {
    AuthorizationPolicySpec {
        action: PolicyAction::Allow,
        rules: vec![
            Rule {
                to: vec![RuleTo {
                    operation: Operation {
                        paths: PROBE_PATHS.iter().map(|p| p.to_string()).collect(),
                        ..Default::default()
                    },
                }],
                ..Default::default()
            },
            Rule {
                from: vec![RuleFrom {
                    source: Source {
                        principals: vec![PRINCIPAL_NOTEBOOK_CONTROLLER.to_string()],
                    },
                }],
                to: vec![RuleTo {
                    operation: Operation {
                        methods: vec!["GET".to_string()],
                        paths: vec![KERNEL_API_PATH.to_string()],
                    },
                }],
                ..Default::default()
            },
        ],
        selector: None,
    }
}

#[async_trait]
impl ReconcileStep<Profile> for ControlPlanePolicyStep {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn reconcile(&self, profile: &Profile) -> anyhow::Result<Outcome> {
        let base = AuthorizationPolicy::new(&profile.metadata.name, CONTROL_PLANE_POLICY_NAME);
        create_or_patch(&self.registry, base, |policy| {
            set_controller_reference(profile, policy)?;
            policy.metadata.add_label(LABEL_PART_OF, PART_OF_PROFILE);
            policy.spec = control_plane_policy();
            Ok(())
        })
        .await?;
        Ok(Outcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_constants::labels::LABEL_ISTIO_INJECTION;
    use pkg_state::watch::EventType;
    use pkg_types::config::Features;
    use pkg_types::profile::ProfileSpec;
    use pkg_types::rbac::Subject;

    const STARLORD: &str = "starlord@guardians.net";

    fn profile(name: &str, owner: &str) -> Profile {
        Profile {
            metadata: ObjectMeta::cluster(name),
            spec: ProfileSpec {
                owner: Subject::user(owner),
                resource_quota_spec: None,
            },
            ..Default::default()
        }
    }

    fn config(features: Features) -> Arc<ManagerConfig> {
        Arc::new(ManagerConfig {
            features,
            ..Default::default()
        })
    }

    async fn setup(config: Arc<ManagerConfig>) -> (Registry, ProfileReconciler) {
        let registry = Registry::in_memory().await.unwrap();
        let reconciler = ProfileReconciler::new(registry.clone(), config);
        (registry, reconciler)
    }

    async fn get<T: Resource>(registry: &Registry, key: ObjectKey) -> Option<T> {
        registry.get::<T>(&key).await.ignore_not_found().unwrap()
    }

    fn quota_key() -> ObjectKey {
        ObjectKey::namespaced("starlord", RESOURCE_QUOTA_NAME)
    }

    #[test]
    fn roster_is_sorted_and_deduplicated() {
        let names = ["b", "a", "b", "a"].map(String::from);
        let got = roster(names);
        let names: Vec<&str> = got.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);

        let dup = roster(["a", "b", "a"].map(String::from));
        assert_eq!(dup.len(), 2);
    }

    #[tokio::test]
    async fn step_list_follows_features() {
        let (_, enabled) = setup(config(Features::default())).await;
        assert_eq!(
            enabled.step_names(),
            vec![
                "namespace",
                "owner contributor",
                "resource quota",
                "control plane policy"
            ]
        );
        let (_, disabled) = setup(config(Features {
            network_policy: false,
            ..Default::default()
        }))
        .await;
        assert_eq!(disabled.step_names().len(), 4);
    }

    #[tokio::test]
    async fn converges_new_profile() {
        let (registry, reconciler) = setup(config(Features::default())).await;
        let created = registry.create(profile("starlord", STARLORD)).await.unwrap();
        let key = ObjectKey::cluster("starlord");

        reconciler.reconcile(&key).await.unwrap();

        let ns: Namespace = get(&registry, ObjectKey::cluster("starlord")).await.unwrap();
        assert_eq!(
            ns.metadata.annotations.get(ANNOTATION_OWNER).map(String::as_str),
            Some(STARLORD)
        );
        assert_eq!(
            ns.metadata.labels.get(LABEL_ISTIO_INJECTION).map(String::as_str),
            Some("true")
        );
        assert!(ns.metadata.is_controlled_by(&created.metadata.uid));

        let owner: Contributor = get(&registry, ObjectKey::namespaced("starlord", "starlord"))
            .await
            .unwrap();
        assert_eq!(owner.spec.role, ContributorRole::Owner);
        assert_eq!(owner.spec.name, STARLORD);
        assert_eq!(
            owner.metadata.labels.get(LABEL_OWNER_ID),
            Some(&identity::hash(STARLORD))
        );
        assert_eq!(
            owner.metadata.labels.get(LABEL_CONTRIBUTOR_ROLE).map(String::as_str),
            Some("admin")
        );

        let quota: ResourceQuota = get(&registry, quota_key()).await.unwrap();
        assert!(quota.spec.is_empty());
        assert_eq!(
            quota.metadata.labels.get(LABEL_PART_OF).map(String::as_str),
            Some(PART_OF_PROFILE)
        );

        let policy: AuthorizationPolicy = get(
            &registry,
            ObjectKey::namespaced("starlord", CONTROL_PLANE_POLICY_NAME),
        )
        .await
        .unwrap();
        assert_eq!(policy.spec, control_plane_policy());
        assert_eq!(policy.spec.rules[0].to[0].operation.paths.len(), 3);

        let stored: Profile = get(&registry, key.clone()).await.unwrap();
        assert_eq!(stored.status.conditions.len(), 1);
        assert_eq!(stored.status.conditions[0].status, ConditionStatus::Successful);

        // The owner contributor appears in the roster on the next pass.
        reconciler.reconcile(&key).await.unwrap();
        let stored: Profile = get(&registry, key).await.unwrap();
        assert_eq!(stored.status.contributor_names(), vec!["starlord"]);
    }

    #[tokio::test]
    async fn repeated_passes_write_nothing() {
        let (registry, reconciler) = setup(config(Features::default())).await;
        registry.create(profile("starlord", STARLORD)).await.unwrap();
        let key = ObjectKey::cluster("starlord");
        reconciler.reconcile(&key).await.unwrap();
        reconciler.reconcile(&key).await.unwrap();

        let before = registry.events().current_seq();
        let quota_before: ResourceQuota = get(&registry, quota_key()).await.unwrap();
        for _ in 0..3 {
            reconciler.reconcile(&key).await.unwrap();
        }
        assert_eq!(registry.events().current_seq(), before);
        let quota_after: ResourceQuota = get(&registry, quota_key()).await.unwrap();
        assert_eq!(quota_after, quota_before);
    }

    #[tokio::test]
    async fn refuses_foreign_namespace() {
        let (registry, reconciler) = setup(config(Features::default())).await;
        let mut ns = Namespace::new("starlord");
        ns.metadata.add_annotation(ANNOTATION_OWNER, "gamora@guardians.net");
        registry.create(ns).await.unwrap();
        registry.create(profile("starlord", STARLORD)).await.unwrap();
        let key = ObjectKey::cluster("starlord");

        reconciler.reconcile(&key).await.unwrap();

        assert!(get::<ResourceQuota>(&registry, quota_key()).await.is_none());
        assert!(
            get::<Contributor>(&registry, ObjectKey::namespaced("starlord", "starlord"))
                .await
                .is_none()
        );
        let ns: Namespace = get(&registry, ObjectKey::cluster("starlord")).await.unwrap();
        assert!(ns.metadata.controller().is_none());
        assert_eq!(
            ns.metadata.annotations.get(ANNOTATION_OWNER).map(String::as_str),
            Some("gamora@guardians.net")
        );

        let stored: Profile = get(&registry, key).await.unwrap();
        assert_eq!(stored.status.conditions[0].status, ConditionStatus::Unknown);
    }

    #[tokio::test]
    async fn continues_in_namespace_annotated_for_owner() {
        let (registry, reconciler) = setup(config(Features::default())).await;
        let mut ns = Namespace::new("starlord");
        ns.metadata.add_annotation(ANNOTATION_OWNER, STARLORD);
        ns.metadata.add_label(LABEL_ISTIO_INJECTION, "false");
        registry.create(ns).await.unwrap();
        let created = registry.create(profile("starlord", STARLORD)).await.unwrap();

        reconciler
            .reconcile(&ObjectKey::cluster("starlord"))
            .await
            .unwrap();

        assert!(get::<ResourceQuota>(&registry, quota_key()).await.is_some());
        let ns: Namespace = get(&registry, ObjectKey::cluster("starlord")).await.unwrap();
        assert!(ns.metadata.is_controlled_by(&created.metadata.uid));
        // Labels set externally keep their value.
        assert_eq!(
            ns.metadata.labels.get(LABEL_ISTIO_INJECTION).map(String::as_str),
            Some("false")
        );
    }

    #[tokio::test]
    async fn adopts_namespace_when_enabled() {
        let (registry, reconciler) = setup(config(Features {
            namespace_adoption: true,
            ..Default::default()
        }))
        .await;
        registry.create(Namespace::new("starlord")).await.unwrap();
        let created = registry.create(profile("starlord", STARLORD)).await.unwrap();

        reconciler
            .reconcile(&ObjectKey::cluster("starlord"))
            .await
            .unwrap();

        let ns: Namespace = get(&registry, ObjectKey::cluster("starlord")).await.unwrap();
        assert!(ns.metadata.is_controlled_by(&created.metadata.uid));
        assert!(get::<ResourceQuota>(&registry, quota_key()).await.is_some());
    }

    #[tokio::test]
    async fn quota_precedence_and_clearing() {
        let mut default_quota = ResourceQuotaSpec::default();
        default_quota.hard.insert("requests.cpu".into(), "8".into());
        let cfg = Arc::new(ManagerConfig {
            default_resource_quota: Some(default_quota.clone()),
            ..Default::default()
        });
        let (registry, reconciler) = setup(cfg).await;
        let key = ObjectKey::cluster("starlord");

        let mut p = profile("starlord", STARLORD);
        let mut own = ResourceQuotaSpec::default();
        own.hard.insert("configmaps".into(), "10".into());
        p.spec.resource_quota_spec = Some(own.clone());
        registry.create(p).await.unwrap();
        reconciler.reconcile(&key).await.unwrap();
        let quota: ResourceQuota = get(&registry, quota_key()).await.unwrap();
        assert_eq!(quota.spec, own);

        let mut p: Profile = get(&registry, key.clone()).await.unwrap();
        p.spec.resource_quota_spec = None;
        registry.update(p).await.unwrap();
        reconciler.reconcile(&key).await.unwrap();
        let quota: ResourceQuota = get(&registry, quota_key()).await.unwrap();
        assert_eq!(quota.spec, default_quota);

        // Without a default the limits are cleared.
        let (registry, reconciler) = setup(config(Features::default())).await;
        let mut p = profile("starlord", STARLORD);
        p.spec.resource_quota_spec = Some(own);
        registry.create(p).await.unwrap();
        reconciler.reconcile(&key).await.unwrap();
        let mut p: Profile = get(&registry, key.clone()).await.unwrap();
        p.spec.resource_quota_spec = None;
        registry.update(p).await.unwrap();
        reconciler.reconcile(&key).await.unwrap();
        let quota: ResourceQuota = get(&registry, quota_key()).await.unwrap();
        assert!(quota.spec.is_empty());
    }

    #[tokio::test]
    async fn disabled_network_policy_skips_policy_and_label() {
        let (registry, reconciler) = setup(config(Features {
            network_policy: false,
            ..Default::default()
        }))
        .await;
        registry.create(profile("starlord", STARLORD)).await.unwrap();
        reconciler
            .reconcile(&ObjectKey::cluster("starlord"))
            .await
            .unwrap();

        assert!(
            get::<AuthorizationPolicy>(
                &registry,
                ObjectKey::namespaced("starlord", CONTROL_PLANE_POLICY_NAME)
            )
            .await
            .is_none()
        );
        let ns: Namespace = get(&registry, ObjectKey::cluster("starlord")).await.unwrap();
        assert!(!ns.metadata.has_label(LABEL_ISTIO_INJECTION));
    }

    #[tokio::test]
    async fn non_user_owner_gets_no_contributor() {
        let (registry, reconciler) = setup(config(Features::default())).await;
        let mut p = profile("pipelines", "pipeline-runner");
        p.spec.owner.kind = "ServiceAccount".into();
        registry.create(p).await.unwrap();
        reconciler
            .reconcile(&ObjectKey::cluster("pipelines"))
            .await
            .unwrap();

        let contributors: Vec<Contributor> = registry
            .list(&ListParams::in_namespace("pipelines"))
            .await
            .unwrap();
        assert!(contributors.is_empty());
        assert!(
            get::<ResourceQuota>(
                &registry,
                ObjectKey::namespaced("pipelines", RESOURCE_QUOTA_NAME)
            )
            .await
            .is_some()
        );
    }

    #[tokio::test]
    async fn missing_profile_is_not_an_error() {
        let (_, reconciler) = setup(config(Features::default())).await;
        reconciler
            .reconcile(&ObjectKey::cluster("nobody"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn maps_events_to_profiles() {
        let (_, reconciler) = setup(config(Features::default())).await;
        let event = |key: &str, value: Option<Vec<u8>>| WatchEvent {
            seq: 1,
            event_type: EventType::Put,
            key: key.to_string(),
            value,
        };

        assert_eq!(
            reconciler.map_event(&event("/registry/profiles/starlord", None)),
            vec![ObjectKey::cluster("starlord")]
        );
        assert_eq!(
            reconciler.map_event(&event("/registry/contributors/starlord/gamora", None)),
            vec![ObjectKey::cluster("starlord")]
        );

        let mut owner = profile("starlord", STARLORD);
        owner.metadata.uid = "uid-1".into();
        let mut quota = ResourceQuota::new("starlord", RESOURCE_QUOTA_NAME);
        set_controller_reference(&owner, &mut quota).unwrap();
        let owned = event(
            "/registry/resourcequotas/starlord/kf-resource-quota",
            Some(serde_json::to_vec(&quota).unwrap()),
        );
        assert_eq!(reconciler.map_event(&owned), vec![ObjectKey::cluster("starlord")]);

        let unowned = event(
            "/registry/serviceaccounts/starlord/default",
            Some(serde_json::to_vec(&ResourceQuota::new("starlord", "default")).unwrap()),
        );
        assert!(reconciler.map_event(&unowned).is_empty());
    }
}
