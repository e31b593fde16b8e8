use crate::assignment::{Assignment, AssignmentOutcome, PodSetAssignment};
use crate::cluster_queue::{usage_get, ClusterQueueConfig, ClusterQueueState, Usage};
use crate::cohort::{GroupId, QuotaGroup};
use crate::filter::{default_filters, FlavorPredicate};
use crate::snapshot::{CacheSnapshot, ClusterQueueUsage, FlavorUsage};
use admiral_core::{
    AdmiralError, ClusterQueue, ObjectKey, PodSpec, Resource, ResourceFlavor, Result, WorkloadInfo,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Default)]
struct Registry {
    flavors: HashMap<String, Arc<ResourceFlavor>>,
    groups: HashMap<GroupId, Arc<Mutex<QuotaGroup>>>,
    /// cluster queue -> group holding it
    membership: HashMap<String, GroupId>,
    generation: u64,
}

impl Registry {
    fn group_of(&self, cluster_queue: &str) -> Option<Arc<Mutex<QuotaGroup>>> {
        self.membership
            .get(cluster_queue)
            .and_then(|id| self.groups.get(id))
            .cloned()
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn insert_member(&mut self, state: ClusterQueueState) {
        let name = state.config.name.clone();
        let id = GroupId::for_queue(&name, state.config.cohort.as_deref());
        self.groups
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(QuotaGroup::new(id.clone()))))
            .lock()
            .members
            .insert(name.clone(), state);
        self.membership.insert(name, id);
    }

    fn remove_member(&mut self, cluster_queue: &str) -> Option<ClusterQueueState> {
        let id = self.membership.remove(cluster_queue)?;
        let group = self.groups.get(&id)?.clone();
        let (state, empty) = {
            let mut group = group.lock();
            let state = group.members.remove(cluster_queue);
            (state, group.members.is_empty())
        };
        if empty {
            self.groups.remove(&id);
        }
        state
    }

    fn missing_flavors(&self, config: &ClusterQueueConfig) -> Vec<String> {
        config
            .flavor_names()
            .into_iter()
            .filter(|f| !self.flavors.contains_key(*f))
            .map(str::to_string)
            .collect()
    }

    fn warn_missing_flavors(&self, config: &ClusterQueueConfig) {
        for flavor in self.missing_flavors(config) {
            warn!("{}", AdmiralError::unknown_flavor(&config.name, flavor));
        }
    }
}

/// In-memory view of flavors, cluster queues, cohorts and quota usage.
///
/// Lock order is registry, then a single quota group, then the admitted
/// index. Fit checks and commits for queues in different groups do not
/// contend.
pub struct Cache {
    registry: RwLock<Registry>,
    /// workload -> cluster queue charged for it
    admitted: Mutex<HashMap<ObjectKey, String>>,
    predicates: Vec<Box<dyn FlavorPredicate>>,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache {
    /// Create an empty cache with the default flavor predicates
    pub fn new() -> Self {
        Self::with_predicates(default_filters())
    }

    pub fn with_predicates(predicates: Vec<Box<dyn FlavorPredicate>>) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            admitted: Mutex::new(HashMap::new()),
            predicates,
        }
    }

    /// Register or replace a flavor
    pub fn add_or_update_flavor(&self, flavor: ResourceFlavor) -> Result<()> {
        flavor.validate()?;
        let name = flavor.name().to_string();
        let mut registry = self.registry.write();
        if registry
            .flavors
            .insert(name.clone(), Arc::new(flavor))
            .is_none()
        {
            info!("Registered resource flavor {}", name);
        } else {
            debug!("Updated resource flavor {}", name);
        }
        Ok(())
    }

    /// Remove a flavor; queues referencing it see zero capacity again
    pub fn delete_flavor(&self, name: &str) -> bool {
        let mut registry = self.registry.write();
        if registry.flavors.remove(name).is_none() {
            return false;
        }
        info!("Removed resource flavor {}", name);

        let mut referencing = Vec::new();
        for group in registry.groups.values() {
            for (cq, state) in &group.lock().members {
                if state.config.flavor_names().contains(&name) {
                    referencing.push(cq.clone());
                }
            }
        }
        for cq in referencing {
            warn!("{}", AdmiralError::unknown_flavor(cq, name));
        }
        true
    }

    pub fn has_flavor(&self, name: &str) -> bool {
        self.registry.read().flavors.contains_key(name)
    }

    /// Register a new cluster queue
    pub fn add_cluster_queue(&self, cq: &ClusterQueue) -> Result<()> {
        let mut registry = self.registry.write();
        if registry.membership.contains_key(cq.name()) {
            return Err(AdmiralError::resource_already_exists(format!(
                "ClusterQueue/{}",
                cq.name()
            )));
        }

        let generation = registry.next_generation();
        let config = Arc::new(ClusterQueueConfig::compile(cq, generation)?);
        registry.warn_missing_flavors(&config);

        info!(
            "Added cluster queue {} (cohort: {})",
            config.name,
            config.cohort.as_deref().unwrap_or("<none>")
        );
        registry.insert_member(ClusterQueueState::new(config));
        Ok(())
    }

    /// Replace the configuration of an existing cluster queue.
    ///
    /// Usage and admitted workloads are kept, and follow the queue if it
    /// moves to another cohort. An invalid update leaves the previous
    /// configuration in place.
    pub fn update_cluster_queue(&self, cq: &ClusterQueue) -> Result<()> {
        let mut registry = self.registry.write();
        if !registry.membership.contains_key(cq.name()) {
            return Err(AdmiralError::resource_not_found(format!(
                "ClusterQueue/{}",
                cq.name()
            )));
        }

        let generation = registry.generation + 1;
        let config = Arc::new(ClusterQueueConfig::compile(cq, generation)?);
        registry.generation = generation;
        registry.warn_missing_flavors(&config);

        let Some(mut state) = registry.remove_member(cq.name()) else {
            return Err(AdmiralError::internal_error(format!(
                "cluster queue {} is registered without a quota group",
                cq.name()
            )));
        };
        if state.config.cohort != config.cohort {
            info!(
                "Cluster queue {} moved from cohort {} to {}",
                config.name,
                state.config.cohort.as_deref().unwrap_or("<none>"),
                config.cohort.as_deref().unwrap_or("<none>")
            );
        }
        debug!(
            "Updated cluster queue {} to generation {}",
            config.name, config.generation
        );
        state.config = config;
        registry.insert_member(state);
        Ok(())
    }

    /// Add the queue, or update it if it is already registered
    pub fn apply_cluster_queue(&self, cq: &ClusterQueue) -> Result<()> {
        if self.contains_cluster_queue(cq.name()) {
            self.update_cluster_queue(cq)
        } else {
            self.add_cluster_queue(cq)
        }
    }

    /// Forget a cluster queue together with the quota its workloads hold
    pub fn delete_cluster_queue(&self, name: &str) -> bool {
        let mut registry = self.registry.write();
        let Some(state) = registry.remove_member(name) else {
            return false;
        };

        let mut admitted = self.admitted.lock();
        for key in state.workloads.keys() {
            admitted.remove(key);
        }
        info!(
            "Deleted cluster queue {} ({} admitted workloads dropped)",
            name,
            state.workloads.len()
        );
        true
    }

    pub fn contains_cluster_queue(&self, name: &str) -> bool {
        self.registry.read().membership.contains_key(name)
    }

    /// Sorted names of all registered cluster queues
    pub fn cluster_queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.read().membership.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn cluster_queue_config(&self, name: &str) -> Option<Arc<ClusterQueueConfig>> {
        let group = self.registry.read().group_of(name)?;
        let group = group.lock();
        group.members.get(name).map(|m| m.config.clone())
    }

    /// Flavors referenced by a cluster queue that are not registered
    pub fn unknown_flavors(&self, cluster_queue: &str) -> Vec<String> {
        match self.cluster_queue_config(cluster_queue) {
            Some(config) => self.registry.read().missing_flavors(&config),
            None => Vec::new(),
        }
    }

    /// Cluster queue currently charged for a workload
    pub fn admitted_in(&self, key: &ObjectKey) -> Option<String> {
        self.admitted.lock().get(key).cloned()
    }

    /// Compute a flavor assignment for a workload without changing any usage.
    ///
    /// Each pod set walks each requested resource's flavors in declared
    /// order and takes the first one that passes the flavor predicates and
    /// has quota for the request, including requests of earlier pod sets of
    /// the same workload. Codependent resources are resolved together.
    pub fn fits_and_assign(&self, cluster_queue: &str, info: &WorkloadInfo) -> Result<AssignmentOutcome> {
        let registry = self.registry.read();
        let group = registry
            .group_of(cluster_queue)
            .ok_or_else(|| AdmiralError::unknown_queue(cluster_queue))?;
        let group = group.lock();
        let config = group
            .members
            .get(cluster_queue)
            .map(|m| m.config.clone())
            .ok_or_else(|| AdmiralError::unknown_queue(cluster_queue))?;

        let mut assignment = Assignment::new(cluster_queue, config.generation);
        for ps in &info.total_requests {
            let pod_spec = info
                .obj
                .spec
                .pod_sets
                .iter()
                .find(|p| p.name == ps.name)
                .map(|p| &p.spec);

            let mut flavors = BTreeMap::new();
            for (resource, &qty) in &ps.requests {
                if flavors.contains_key(resource) {
                    continue;
                }
                let Some(index) = config.resource_index(resource) else {
                    if qty == 0 {
                        continue;
                    }
                    return Ok(AssignmentOutcome::no_fit(format!(
                        "resource {} unavailable in ClusterQueue {}",
                        resource, cluster_queue
                    )));
                };

                let mut requests: Vec<(&str, i64)> = config
                    .codependent_with(index)
                    .iter()
                    .filter_map(|&i| {
                        let name = config.resources[i].name.as_str();
                        ps.requests.get(name).map(|q| (name, *q))
                    })
                    .collect();
                if requests.is_empty() {
                    requests.push((resource.as_str(), qty));
                }

                match self.find_flavor(
                    &registry.flavors,
                    &group,
                    &config,
                    &assignment.usage,
                    index,
                    &requests,
                    pod_spec,
                ) {
                    Ok((flavor, borrows)) => {
                        for (name, _) in &requests {
                            flavors.insert(name.to_string(), flavor.clone());
                        }
                        assignment.borrows |= borrows;
                    }
                    Err(reason) => {
                        return Ok(AssignmentOutcome::no_fit(format!(
                            "couldn't assign flavors to pod set {}: {}",
                            ps.name, reason
                        )));
                    }
                }
            }

            assignment.push_pod_set(PodSetAssignment {
                name: ps.name.clone(),
                flavors,
                requests: ps.requests.clone(),
            });
        }

        Ok(AssignmentOutcome::Fits(assignment))
    }

    #[allow(clippy::too_many_arguments)]
    fn find_flavor(
        &self,
        flavors: &HashMap<String, Arc<ResourceFlavor>>,
        group: &QuotaGroup,
        config: &ClusterQueueConfig,
        pending: &Usage,
        index: usize,
        requests: &[(&str, i64)],
        pod_spec: Option<&PodSpec>,
    ) -> std::result::Result<(String, bool), String> {
        let mut reasons = Vec::new();

        'flavors: for limits in &config.resources[index].flavors {
            let Some(flavor) = flavors.get(&limits.name) else {
                reasons.push(format!("flavor {} not found", limits.name));
                continue;
            };

            if let Some(spec) = pod_spec {
                for predicate in &self.predicates {
                    let result = predicate.filter(spec, flavor);
                    if !result.passed {
                        let reason = result.reason.unwrap_or_default();
                        debug!(
                            "Flavor {} filtered out by {}: {}",
                            limits.name,
                            predicate.name(),
                            reason
                        );
                        reasons.push(format!("flavor {}: {}", limits.name, reason));
                        continue 'flavors;
                    }
                }
            }

            let mut borrows = false;
            for (resource, qty) in requests {
                let Some(val) = qty.checked_add(usage_get(pending, resource, &limits.name)) else {
                    reasons.push(format!(
                        "request for {} in flavor {} is too large",
                        resource, limits.name
                    ));
                    continue 'flavors;
                };
                match group.check(&config.name, resource, &limits.name, val) {
                    Ok(b) => borrows |= b,
                    Err(reason) => {
                        reasons.push(reason);
                        continue 'flavors;
                    }
                }
            }
            return Ok((limits.name.clone(), borrows));
        }

        Err(reasons.join("; "))
    }

    /// Commit an assignment computed by [`Cache::fits_and_assign`].
    ///
    /// Fit is checked again under the group lock; a changed queue, a
    /// vanished flavor or lost headroom yields `ConcurrentInvalidation`
    /// and leaves usage untouched.
    pub fn assign(&self, key: &ObjectKey, assignment: &Assignment) -> Result<()> {
        let cq = assignment.cluster_queue.as_str();
        let registry = self.registry.read();
        let group = registry.group_of(cq).ok_or_else(|| {
            AdmiralError::concurrent_invalidation(key.to_string(), format!("cluster queue {} no longer exists", cq))
        })?;
        let mut group = group.lock();

        let generation = group
            .members
            .get(cq)
            .map(|m| m.config.generation)
            .ok_or_else(|| {
                AdmiralError::concurrent_invalidation(key.to_string(), format!("cluster queue {} no longer exists", cq))
            })?;
        if generation != assignment.generation {
            return Err(AdmiralError::concurrent_invalidation(
                key.to_string(),
                format!(
                    "cluster queue {} changed since the assignment was computed",
                    cq
                ),
            ));
        }
        if let Some(holder) = self.admitted.lock().get(key) {
            return Err(AdmiralError::concurrent_invalidation(
                key.to_string(),
                format!("workload already holds quota in cluster queue {}", holder),
            ));
        }

        for (resource, flavor, qty) in assignment.usage_entries() {
            if !registry.flavors.contains_key(flavor) {
                return Err(AdmiralError::concurrent_invalidation(
                    key.to_string(),
                    format!("flavor {} was removed", flavor),
                ));
            }
            group
                .check(cq, resource, flavor, qty)
                .map_err(|reason| AdmiralError::concurrent_invalidation(key.to_string(), reason))?;
        }

        group.charge(cq, key.clone(), assignment.clone());
        self.admitted.lock().insert(key.clone(), cq.to_string());
        debug!("Charged {} for workload {}", assignment, key);
        Ok(())
    }

    /// Return the quota held by a workload. Releasing a workload that holds
    /// nothing is a no-op.
    pub fn release(&self, key: &ObjectKey) -> Option<Assignment> {
        let registry = self.registry.read();
        let cq = self.admitted.lock().get(key).cloned();
        let Some(cq) = cq else {
            debug!("Workload {} holds no quota", key);
            return None;
        };

        let released = registry
            .group_of(&cq)
            .and_then(|group| group.lock().uncharge(&cq, key));
        self.admitted.lock().remove(key);
        if released.is_some() {
            debug!("Released quota of workload {} in cluster queue {}", key, cq);
        }
        released
    }

    /// Account a workload that already carries an admission, e.g. after a
    /// restart. Usage is charged without a fit check.
    pub fn add_or_update_workload(&self, info: &WorkloadInfo) -> Result<bool> {
        let Some(cq) = info.cluster_queue.as_deref() else {
            return Ok(false);
        };
        self.release(&info.key);

        let registry = self.registry.read();
        let group = registry
            .group_of(cq)
            .ok_or_else(|| AdmiralError::unknown_queue(cq))?;
        let mut group = group.lock();
        let Some(member) = group.members.get(cq) else {
            return Err(AdmiralError::unknown_queue(cq));
        };

        let mut assignment = Assignment::new(cq, member.config.generation);
        for ps in &info.total_requests {
            assignment.push_pod_set(PodSetAssignment {
                name: ps.name.clone(),
                flavors: ps.flavors.clone(),
                requests: ps.requests.clone(),
            });
        }
        let borrows = assignment.usage_entries().any(|(r, f, q)| {
            let min = member.config.limits(r, f).map_or(0, |l| l.min);
            member.used(r, f).saturating_add(q) > min
        });
        assignment.borrows = borrows;

        group.charge(cq, info.key.clone(), assignment);
        self.admitted.lock().insert(info.key.clone(), cq.to_string());
        debug!("Accounted admitted workload {} in cluster queue {}", info.key, cq);
        Ok(true)
    }

    /// Drop a workload from the cache, returning its quota
    pub fn delete_workload(&self, key: &ObjectKey) -> Option<Assignment> {
        self.release(key)
    }

    /// Copy every counter for reporting
    pub fn snapshot(&self) -> CacheSnapshot {
        let registry = self.registry.read();
        let mut snapshot = CacheSnapshot::default();

        for group in registry.groups.values() {
            let group = group.lock();
            for (name, state) in &group.members {
                let config = &state.config;
                let mut usage = Vec::new();
                for resource in &config.resources {
                    for limits in &resource.flavors {
                        usage.push(FlavorUsage {
                            resource: resource.name.clone(),
                            flavor: limits.name.clone(),
                            total: state.used(&resource.name, &limits.name),
                            borrowing: state.borrowing(&resource.name, &limits.name),
                            min: limits.min,
                            max: limits.max,
                        });
                    }
                }
                // Usage left over from an earlier configuration
                for (resource, flavors) in &state.usage {
                    for (flavor, total) in flavors {
                        if *total > 0 && config.limits(resource, flavor).is_none() {
                            usage.push(FlavorUsage {
                                resource: resource.clone(),
                                flavor: flavor.clone(),
                                total: *total,
                                borrowing: *total,
                                min: 0,
                                max: None,
                            });
                        }
                    }
                }

                snapshot.cluster_queues.insert(
                    name.clone(),
                    ClusterQueueUsage {
                        cohort: config.cohort.clone(),
                        generation: config.generation,
                        admitted_workloads: state.workloads.len(),
                        usage,
                        missing_flavors: registry.missing_flavors(config),
                    },
                );
            }
        }

        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use admiral_core::{Admission, FlavorQuota, PodSetFlavors, ResourceSpec, Workload};
    use k8s_openapi::api::core::v1::{Container, ResourceRequirements, Toleration};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    const GPU: &str = "example.com/gpu";

    fn make_pod_spec(requests: &[(&str, &str)]) -> PodSpec {
        PodSpec {
            containers: vec![Container {
                name: "main".to_string(),
                resources: Some(ResourceRequirements {
                    requests: Some(
                        requests
                            .iter()
                            .map(|(r, q)| (r.to_string(), Quantity(q.to_string())))
                            .collect(),
                    ),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn make_info(name: &str, requests: &[(&str, &str)]) -> WorkloadInfo {
        let wl = Workload::new("ns", name, "main").with_pod_set("main", 1, make_pod_spec(requests));
        WorkloadInfo::new(&wl).unwrap()
    }

    fn make_cq(name: &str, cohort: Option<&str>, resource: &str, flavors: &[(&str, &str)]) -> ClusterQueue {
        let mut cq = ClusterQueue::new(name).with_resource(ResourceSpec::new(
            resource,
            flavors
                .iter()
                .map(|(f, min)| FlavorQuota::new(*f, *min))
                .collect(),
        ));
        if let Some(cohort) = cohort {
            cq = cq.with_cohort(cohort);
        }
        cq
    }

    fn create_test_cache(flavors: &[&str]) -> Cache {
        let cache = Cache::new();
        for f in flavors {
            cache.add_or_update_flavor(ResourceFlavor::new(*f)).unwrap();
        }
        cache
    }

    fn admit(cache: &Cache, cq: &str, info: &WorkloadInfo) -> Assignment {
        match cache.fits_and_assign(cq, info).unwrap() {
            AssignmentOutcome::Fits(a) => {
                cache.assign(&info.key, &a).unwrap();
                a
            }
            AssignmentOutcome::NoFit { reason } => panic!("{} does not fit: {}", info.key, reason),
        }
    }

    fn no_fit_reason(outcome: AssignmentOutcome) -> String {
        match outcome {
            AssignmentOutcome::NoFit { reason } => reason,
            AssignmentOutcome::Fits(a) => panic!("unexpected fit {}", a),
        }
    }

    #[test]
    fn test_first_eligible_flavor_in_declared_order() {
        let cache = create_test_cache(&["a", "b"]);
        cache
            .add_cluster_queue(&make_cq("cq", None, GPU, &[("a", "10"), ("b", "10")]))
            .unwrap();

        let first = admit(&cache, "cq", &make_info("first", &[(GPU, "10")]));
        assert_eq!(first.pod_sets[0].flavors[GPU], "a");

        let second = admit(&cache, "cq", &make_info("second", &[(GPU, "5")]));
        assert_eq!(second.pod_sets[0].flavors[GPU], "b");
        assert!(!second.borrows);

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.total("cq", GPU, "a"), 10);
        assert_eq!(snapshot.total("cq", GPU, "b"), 5);
        assert_eq!(snapshot.cluster_queue("cq").unwrap().admitted_workloads, 2);
    }

    #[test]
    fn test_pod_sets_share_pending_usage() {
        let cache = create_test_cache(&["a", "b"]);
        cache
            .add_cluster_queue(&make_cq("cq", None, GPU, &[("a", "10"), ("b", "10")]))
            .unwrap();

        let wl = Workload::new("ns", "wl", "main")
            .with_pod_set("driver", 1, make_pod_spec(&[(GPU, "6")]))
            .with_pod_set("workers", 2, make_pod_spec(&[(GPU, "3")]));
        let info = WorkloadInfo::new(&wl).unwrap();

        let outcome = cache.fits_and_assign("cq", &info).unwrap();
        let assignment = outcome.assignment().unwrap();
        assert_eq!(assignment.pod_sets[0].flavors[GPU], "a");
        assert_eq!(assignment.pod_sets[1].flavors[GPU], "b");
    }

    #[test]
    fn test_codependent_resources_get_same_flavor() {
        let cache = create_test_cache(&["spot", "on-demand"]);
        let cq = ClusterQueue::new("cq")
            .with_resource(ResourceSpec::new(
                "cpu",
                vec![FlavorQuota::new("spot", "4"), FlavorQuota::new("on-demand", "10")],
            ))
            .with_resource(ResourceSpec::new(
                "memory",
                vec![FlavorQuota::new("spot", "10Gi"), FlavorQuota::new("on-demand", "1Gi")],
            ));
        cache.add_cluster_queue(&cq).unwrap();

        // cpu only fits on-demand, memory only fits spot
        let info = make_info("split", &[("cpu", "6"), ("memory", "2Gi")]);
        assert!(!cache.fits_and_assign("cq", &info).unwrap().fits());

        let info = make_info("small", &[("cpu", "2"), ("memory", "2Gi")]);
        let outcome = cache.fits_and_assign("cq", &info).unwrap();
        let flavors = &outcome.assignment().unwrap().pod_sets[0].flavors;
        assert_eq!(flavors["cpu"], "spot");
        assert_eq!(flavors["memory"], "spot");

        let info = make_info("cpu-heavy", &[("cpu", "6"), ("memory", "512Mi")]);
        let outcome = cache.fits_and_assign("cq", &info).unwrap();
        let flavors = &outcome.assignment().unwrap().pod_sets[0].flavors;
        assert_eq!(flavors["cpu"], "on-demand");
        assert_eq!(flavors["memory"], "on-demand");
    }

    #[test]
    fn test_unknown_flavor_is_zero_capacity_until_registered() {
        let cache = create_test_cache(&[]);
        cache
            .add_cluster_queue(&make_cq("cq", None, GPU, &[("k80", "8")]))
            .unwrap();
        assert_eq!(cache.unknown_flavors("cq"), vec!["k80".to_string()]);

        let info = make_info("wl", &[(GPU, "1")]);
        let reason = no_fit_reason(cache.fits_and_assign("cq", &info).unwrap());
        assert!(reason.contains("flavor k80 not found"));

        cache.add_or_update_flavor(ResourceFlavor::new("k80")).unwrap();
        assert!(cache.unknown_flavors("cq").is_empty());
        assert!(cache.fits_and_assign("cq", &info).unwrap().fits());

        assert!(cache.delete_flavor("k80"));
        assert!(!cache.fits_and_assign("cq", &info).unwrap().fits());
    }

    #[test]
    fn test_tainted_flavor_skipped() {
        let cache = Cache::new();
        cache
            .add_or_update_flavor(ResourceFlavor::new("spot").with_taint("spot", Some("true"), "NoSchedule"))
            .unwrap();
        cache.add_or_update_flavor(ResourceFlavor::new("on-demand")).unwrap();
        cache
            .add_cluster_queue(&make_cq("cq", None, GPU, &[("spot", "8"), ("on-demand", "8")]))
            .unwrap();

        let info = make_info("wl", &[(GPU, "1")]);
        let outcome = cache.fits_and_assign("cq", &info).unwrap();
        assert_eq!(outcome.assignment().unwrap().pod_sets[0].flavors[GPU], "on-demand");

        let mut spec = make_pod_spec(&[(GPU, "1")]);
        spec.tolerations = Some(vec![Toleration {
            key: Some("spot".to_string()),
            operator: Some("Exists".to_string()),
            ..Default::default()
        }]);
        let wl = Workload::new("ns", "tolerant", "main").with_pod_set("main", 1, spec);
        let info = WorkloadInfo::new(&wl).unwrap();
        let outcome = cache.fits_and_assign("cq", &info).unwrap();
        assert_eq!(outcome.assignment().unwrap().pod_sets[0].flavors[GPU], "spot");
    }

    #[test]
    fn test_resource_missing_from_queue() {
        let cache = create_test_cache(&["k80"]);
        cache
            .add_cluster_queue(&make_cq("cq", None, GPU, &[("k80", "8")]))
            .unwrap();
        let info = make_info("wl", &[("cpu", "1")]);
        let reason = no_fit_reason(cache.fits_and_assign("cq", &info).unwrap());
        assert!(reason.contains("resource cpu unavailable"));
    }

    #[test]
    fn test_unknown_cluster_queue() {
        let cache = create_test_cache(&["k80"]);
        let info = make_info("wl", &[(GPU, "1")]);
        let err = cache.fits_and_assign("missing", &info).unwrap_err();
        assert!(matches!(err, AdmiralError::UnknownQueue { .. }));
    }

    #[test]
    fn test_cohort_ceiling() {
        let cache = create_test_cache(&["k80"]);
        cache
            .add_cluster_queue(&make_cq("t1", Some("research"), GPU, &[("k80", "5")]))
            .unwrap();
        cache
            .add_cluster_queue(&make_cq("t2", Some("research"), GPU, &[("k80", "5")]))
            .unwrap();

        let big = admit(&cache, "t1", &make_info("big", &[(GPU, "9")]));
        assert!(big.borrows);

        let snapshot = cache.snapshot();
        let usage = snapshot.cluster_queue("t1").unwrap().flavor(GPU, "k80").unwrap();
        assert_eq!(usage.total, 9);
        assert_eq!(usage.borrowing, 4);

        assert!(cache.fits_and_assign("t2", &make_info("one", &[(GPU, "1")])).unwrap().fits());
        let reason = no_fit_reason(cache.fits_and_assign("t2", &make_info("two", &[(GPU, "2")])).unwrap());
        assert!(reason.contains("insufficient unused quota"));
    }

    #[test]
    fn test_assign_revalidates_under_lock() {
        let cache = create_test_cache(&["k80"]);
        cache
            .add_cluster_queue(&make_cq("t1", Some("research"), GPU, &[("k80", "5")]))
            .unwrap();
        cache
            .add_cluster_queue(&make_cq("t2", Some("research"), GPU, &[("k80", "5")]))
            .unwrap();

        let a = make_info("a", &[(GPU, "6")]);
        let b = make_info("b", &[(GPU, "6")]);
        let outcome_a = cache.fits_and_assign("t1", &a).unwrap();
        let outcome_b = cache.fits_and_assign("t2", &b).unwrap();

        cache.assign(&a.key, outcome_a.assignment().unwrap()).unwrap();
        let err = cache.assign(&b.key, outcome_b.assignment().unwrap()).unwrap_err();
        assert!(matches!(err, AdmiralError::ConcurrentInvalidation { .. }));
        assert_eq!(cache.snapshot().total("t2", GPU, "k80"), 0);
    }

    #[test]
    fn test_generation_invalidates_assignment() {
        let cache = create_test_cache(&["k80"]);
        cache
            .add_cluster_queue(&make_cq("cq", None, GPU, &[("k80", "5")]))
            .unwrap();
        let info = make_info("wl", &[(GPU, "1")]);
        let outcome = cache.fits_and_assign("cq", &info).unwrap();

        cache
            .update_cluster_queue(&make_cq("cq", None, GPU, &[("k80", "6")]))
            .unwrap();
        let err = cache.assign(&info.key, outcome.assignment().unwrap()).unwrap_err();
        assert!(err.is_retryable());
        assert!(cache.admitted_in(&info.key).is_none());
    }

    #[test]
    fn test_release_is_idempotent() {
        let cache = create_test_cache(&["k80"]);
        cache
            .add_cluster_queue(&make_cq("cq", None, GPU, &[("k80", "5")]))
            .unwrap();
        let info = make_info("wl", &[(GPU, "3")]);
        admit(&cache, "cq", &info);
        assert_eq!(cache.admitted_in(&info.key).as_deref(), Some("cq"));

        assert!(cache.release(&info.key).is_some());
        assert!(cache.release(&info.key).is_none());
        assert_eq!(cache.snapshot().total("cq", GPU, "k80"), 0);
        assert_eq!(cache.snapshot().cluster_queue("cq").unwrap().admitted_workloads, 0);
    }

    #[test]
    fn test_update_moves_usage_between_cohorts() {
        let cache = create_test_cache(&["k80"]);
        cache
            .add_cluster_queue(&make_cq("t1", Some("a"), GPU, &[("k80", "5")]))
            .unwrap();
        let info = make_info("wl", &[(GPU, "4")]);
        admit(&cache, "t1", &info);

        cache
            .update_cluster_queue(&make_cq("t1", Some("b"), GPU, &[("k80", "5")]))
            .unwrap();
        cache
            .add_cluster_queue(&make_cq("t2", Some("b"), GPU, &[("k80", "2")]))
            .unwrap();

        let snapshot = cache.snapshot();
        let t1 = snapshot.cluster_queue("t1").unwrap();
        assert_eq!(t1.cohort.as_deref(), Some("b"));
        assert_eq!(t1.flavor(GPU, "k80").unwrap().total, 4);

        // cohort b: min 7, used 4
        assert!(cache.fits_and_assign("t2", &make_info("x", &[(GPU, "3")])).unwrap().fits());
        assert!(!cache.fits_and_assign("t2", &make_info("y", &[(GPU, "4")])).unwrap().fits());

        assert!(cache.release(&info.key).is_some());
        assert_eq!(cache.snapshot().total("t1", GPU, "k80"), 0);
    }

    #[test]
    fn test_invalid_update_keeps_previous_config() {
        let cache = create_test_cache(&["spot", "on-demand"]);
        cache
            .add_cluster_queue(&make_cq("cq", None, "cpu", &[("spot", "4")]))
            .unwrap();
        let generation = cache.cluster_queue_config("cq").unwrap().generation;

        let bad = ClusterQueue::new("cq")
            .with_resource(ResourceSpec::new(
                "cpu",
                vec![FlavorQuota::new("spot", "4"), FlavorQuota::new("on-demand", "4")],
            ))
            .with_resource(ResourceSpec::new(
                "memory",
                vec![FlavorQuota::new("on-demand", "1Gi"), FlavorQuota::new("spot", "1Gi")],
            ));
        let err = cache.update_cluster_queue(&bad).unwrap_err();
        assert!(matches!(err, AdmiralError::InvalidSpec { .. }));

        let config = cache.cluster_queue_config("cq").unwrap();
        assert_eq!(config.generation, generation);
        assert_eq!(config.resources.len(), 1);
    }

    #[test]
    fn test_add_duplicate_and_update_missing() {
        let cache = create_test_cache(&["k80"]);
        let cq = make_cq("cq", None, GPU, &[("k80", "5")]);
        cache.add_cluster_queue(&cq).unwrap();
        assert!(matches!(
            cache.add_cluster_queue(&cq).unwrap_err(),
            AdmiralError::ResourceAlreadyExists { .. }
        ));
        assert!(matches!(
            cache.update_cluster_queue(&make_cq("other", None, GPU, &[("k80", "5")])).unwrap_err(),
            AdmiralError::ResourceNotFound { .. }
        ));
        cache.apply_cluster_queue(&cq).unwrap();
        assert_eq!(cache.cluster_queue_names(), vec!["cq".to_string()]);
    }

    #[test]
    fn test_add_or_update_admitted_workload() {
        let cache = create_test_cache(&["k80"]);
        cache
            .add_cluster_queue(&make_cq("cq", None, GPU, &[("k80", "5")]))
            .unwrap();

        let wl = Workload::new("ns", "restored", "main")
            .with_pod_set("main", 2, make_pod_spec(&[(GPU, "4")]))
            .with_admission(Admission {
                cluster_queue: "cq".to_string(),
                pod_set_flavors: vec![PodSetFlavors {
                    name: "main".to_string(),
                    flavors: BTreeMap::from([(GPU.to_string(), "k80".to_string())]),
                }],
            });
        let info = WorkloadInfo::new(&wl).unwrap();

        // Charged without a fit check, even above min
        assert!(cache.add_or_update_workload(&info).unwrap());
        assert_eq!(cache.snapshot().total("cq", GPU, "k80"), 8);

        // Replaying the same event does not double count
        assert!(cache.add_or_update_workload(&info).unwrap());
        assert_eq!(cache.snapshot().total("cq", GPU, "k80"), 8);

        assert!(!cache
            .add_or_update_workload(&make_info("pending", &[(GPU, "1")]))
            .unwrap());
    }

    #[test]
    fn test_saturated_request_is_no_fit() {
        let cache = create_test_cache(&["default"]);
        cache
            .add_cluster_queue(&make_cq("cq", None, "memory", &[("default", "1Gi")]))
            .unwrap();
        admit(&cache, "cq", &make_info("small", &[("memory", "1")]));

        // 5P times i32::MAX replicas saturates to i64::MAX
        let wl = Workload::new("ns", "huge", "main")
            .with_pod_set("main", i32::MAX, make_pod_spec(&[("memory", "5P")]));
        let info = WorkloadInfo::new(&wl).unwrap();
        assert_eq!(info.total()["memory"], i64::MAX);

        let reason = no_fit_reason(cache.fits_and_assign("cq", &info).unwrap());
        assert!(reason.contains("too large"));
        assert_eq!(cache.snapshot().total("cq", "memory", "default"), 1);
    }

    #[test]
    fn test_pod_sets_summing_past_i64_are_no_fit() {
        let cache = create_test_cache(&["default"]);
        cache
            .add_cluster_queue(&make_cq("cq", None, "memory", &[("default", "1Gi")]))
            .unwrap();

        let wl = Workload::new("ns", "huge", "main")
            .with_pod_set("a", 1, make_pod_spec(&[("memory", "1Ki")]))
            .with_pod_set("b", i32::MAX, make_pod_spec(&[("memory", "5P")]));
        let info = WorkloadInfo::new(&wl).unwrap();
        let reason = no_fit_reason(cache.fits_and_assign("cq", &info).unwrap());
        assert!(reason.contains("pod set b"));
        assert!(reason.contains("too large"));
    }

    #[test]
    fn test_concurrent_assign_and_release_keep_cohort_within_min() {
        let cache = Arc::new(create_test_cache(&["k80"]));
        for name in ["t1", "t2", "t3", "t4"] {
            cache
                .add_cluster_queue(&make_cq(name, Some("research"), GPU, &[("k80", "5")]))
                .unwrap();
        }

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    let cq = format!("t{}", t % 4 + 1);
                    for i in 0..200 {
                        let info = make_info(&format!("wl-{}-{}", t, i), &[(GPU, "3")]);
                        if let Ok(AssignmentOutcome::Fits(a)) = cache.fits_and_assign(&cq, &info) {
                            if cache.assign(&info.key, &a).is_ok() && i % 2 == 0 {
                                cache.release(&info.key);
                            }
                        }
                        let snapshot = cache.snapshot();
                        let total: i64 = ["t1", "t2", "t3", "t4"]
                            .iter()
                            .map(|cq| snapshot.total(cq, GPU, "k80"))
                            .sum();
                        assert!(total <= 20, "cohort usage {} above its min sum", total);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = cache.snapshot();
        let admitted: usize = snapshot
            .cluster_queues
            .values()
            .map(|cq| cq.admitted_workloads)
            .sum();
        let total: i64 = ["t1", "t2", "t3", "t4"]
            .iter()
            .map(|cq| snapshot.total(cq, GPU, "k80"))
            .sum();
        assert_eq!(total, 3 * admitted as i64);
        assert!(total <= 20);
    }

    #[test]
    fn test_delete_cluster_queue_forgets_workloads() {
        let cache = create_test_cache(&["k80"]);
        cache
            .add_cluster_queue(&make_cq("cq", None, GPU, &[("k80", "5")]))
            .unwrap();
        let info = make_info("wl", &[(GPU, "1")]);
        admit(&cache, "cq", &info);

        assert!(cache.delete_cluster_queue("cq"));
        assert!(!cache.delete_cluster_queue("cq"));
        assert!(cache.admitted_in(&info.key).is_none());
        assert!(cache.release(&info.key).is_none());
        assert!(cache.snapshot().cluster_queues.is_empty());
    }
}
