use crate::cluster_queue::{usage_add, Usage};
use admiral_core::{Admission, PodSetFlavors, Requests};
use std::collections::BTreeMap;
use std::fmt;

/// Flavors chosen for one pod set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSetAssignment {
    pub name: String,
    /// resource name -> flavor name
    pub flavors: BTreeMap<String, String>,
    /// Requests of the whole pod set, count included
    pub requests: Requests,
}

/// A speculative or committed flavor assignment for a workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub cluster_queue: String,
    /// Generation of the cluster queue this was computed against
    pub generation: u64,
    pub pod_sets: Vec<PodSetAssignment>,
    /// Quota consumed, summed over pod sets
    pub usage: Usage,
    /// Whether any (resource, flavor) goes above the queue's min
    pub borrows: bool,
}

impl Assignment {
    pub fn new(cluster_queue: impl Into<String>, generation: u64) -> Self {
        Self {
            cluster_queue: cluster_queue.into(),
            generation,
            pod_sets: Vec::new(),
            usage: Usage::new(),
            borrows: false,
        }
    }

    /// Append a pod set and charge its requests to the flavors it was given.
    /// Resources without a flavor are not charged.
    pub fn push_pod_set(&mut self, pod_set: PodSetAssignment) {
        for (resource, qty) in &pod_set.requests {
            if let Some(flavor) = pod_set.flavors.get(resource) {
                usage_add(&mut self.usage, resource, flavor, *qty);
            }
        }
        self.pod_sets.push(pod_set);
    }

    /// Iterate (resource, flavor, quantity) triples of the total usage
    pub fn usage_entries(&self) -> impl Iterator<Item = (&str, &str, i64)> {
        self.usage.iter().flat_map(|(resource, flavors)| {
            flavors
                .iter()
                .map(move |(flavor, qty)| (resource.as_str(), flavor.as_str(), *qty))
        })
    }

    /// Admission record to write onto the workload
    pub fn to_admission(&self) -> Admission {
        Admission {
            cluster_queue: self.cluster_queue.clone(),
            pod_set_flavors: self
                .pod_sets
                .iter()
                .map(|ps| PodSetFlavors {
                    name: ps.name.clone(),
                    flavors: ps.flavors.clone(),
                })
                .collect(),
        }
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.cluster_queue)?;
        for (i, ps) in self.pod_sets.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:", ps.name)?;
            for (j, (resource, flavor)) in ps.flavors.iter().enumerate() {
                if j > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{}={}", resource, flavor)?;
            }
        }
        write!(f, "]")
    }
}

/// Outcome of a fit check. A negative answer is an expected result, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentOutcome {
    Fits(Assignment),
    NoFit { reason: String },
}

impl AssignmentOutcome {
    pub fn no_fit(reason: impl Into<String>) -> Self {
        Self::NoFit {
            reason: reason.into(),
        }
    }

    pub fn fits(&self) -> bool {
        matches!(self, Self::Fits(_))
    }

    pub fn assignment(&self) -> Option<&Assignment> {
        match self {
            Self::Fits(a) => Some(a),
            Self::NoFit { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_pod_set(name: &str, requests: &[(&str, i64, &str)]) -> PodSetAssignment {
        PodSetAssignment {
            name: name.to_string(),
            flavors: requests
                .iter()
                .map(|(r, _, f)| (r.to_string(), f.to_string()))
                .collect(),
            requests: requests.iter().map(|(r, q, _)| (r.to_string(), *q)).collect(),
        }
    }

    #[test]
    fn test_push_pod_set_accumulates_usage() {
        let mut assignment = Assignment::new("cq", 3);
        assignment.push_pod_set(make_pod_set("driver", &[("cpu", 1000, "on-demand")]));
        assignment.push_pod_set(make_pod_set(
            "workers",
            &[("cpu", 3000, "spot"), ("memory", 1024, "spot")],
        ));
        assignment.push_pod_set(make_pod_set("extra", &[("cpu", 500, "spot")]));

        let entries: Vec<_> = assignment.usage_entries().collect();
        assert_eq!(
            entries,
            vec![
                ("cpu", "on-demand", 1000),
                ("cpu", "spot", 3500),
                ("memory", "spot", 1024)
            ]
        );
        assert_eq!(
            assignment.to_string(),
            "cq[driver:cpu=on-demand, workers:cpu=spot,memory=spot, extra:cpu=spot]"
        );
    }

    #[test]
    fn test_to_admission() {
        let mut assignment = Assignment::new("cq", 1);
        assignment.push_pod_set(make_pod_set("main", &[("cpu", 1000, "spot")]));
        let admission = assignment.to_admission();
        assert_eq!(admission.cluster_queue, "cq");
        assert_eq!(admission.pod_set_flavors.len(), 1);
        assert_eq!(admission.pod_set_flavors[0].flavors["cpu"], "spot");
    }

    #[test]
    fn test_outcome_accessors() {
        let outcome = AssignmentOutcome::no_fit("insufficient quota");
        assert!(!outcome.fits());
        assert!(outcome.assignment().is_none());

        let outcome = AssignmentOutcome::Fits(Assignment::new("cq", 1));
        assert!(outcome.fits());
        assert_eq!(outcome.assignment().map(|a| a.generation), Some(1));
    }
}
