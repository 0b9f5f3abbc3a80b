use std::collections::BTreeSet;

use crate::models::Configuration;

/// The `links` graph of the configuration contains a cycle, so no start
/// order exists.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cyclic dependency in container links")]
pub struct CyclicDependency;

/// The dependency a link entry points at: the part before the alias.
pub(crate) fn link_target(link: &str) -> &str {
    link.split_once(':').map(|(target, _)| target).unwrap_or(link)
}

/// Orders container names so that every name comes after its dependencies.
///
/// Repeated-pass Kahn: each pass appends every name whose dependencies are
/// already placed. Link targets without a spec are treated as satisfied, the
/// agent does not gate on containers it doesn't manage. A pass that places
/// nothing while names remain means the remaining graph is cyclic.
pub(crate) fn dependency_chain(cfg: &Configuration) -> Result<Vec<String>, CyclicDependency> {
    let mut chain = Vec::with_capacity(cfg.len());
    let mut placed: BTreeSet<&str> = BTreeSet::new();

    while chain.len() < cfg.len() {
        let mut progressed = false;

        for (name, spec) in cfg.iter() {
            if placed.contains(name.as_str()) {
                continue;
            }

            let ready = spec
                .links
                .iter()
                .map(|link| link_target(link))
                .all(|dep| placed.contains(dep) || !cfg.contains(dep));

            if ready {
                chain.push(name.clone());
                placed.insert(name.as_str());
                progressed = true;
            }
        }

        if !progressed {
            return Err(CyclicDependency);
        }
    }

    Ok(chain)
}

/// Names whose `links` point at the given container.
pub(crate) fn dependents_of(cfg: &Configuration, name: &str) -> Vec<String> {
    cfg.iter()
        .filter(|(_, spec)| spec.links.iter().any(|link| link_target(link) == name))
        .map(|(dependent, _)| dependent.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContainerSpec;
    use pretty_assertions::assert_eq;

    fn spec(links: &[&str]) -> ContainerSpec {
        ContainerSpec {
            links: links.iter().map(|s| s.to_string()).collect(),
            ..crate::support::spec("x", "1")
        }
    }

    fn config(entries: &[(&str, &[&str])]) -> Configuration {
        entries
            .iter()
            .map(|(name, links)| (name.to_string(), spec(links)))
            .collect()
    }

    fn position(chain: &[String], name: &str) -> usize {
        chain.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn dependencies_come_before_their_dependents() {
        let cfg = config(&[
            ("app", &["db:db", "cache"]),
            ("cache", &[]),
            ("db", &[]),
            ("worker", &["app:app"]),
        ]);

        let chain = dependency_chain(&cfg).unwrap();
        assert_eq!(chain.len(), 4);
        assert!(position(&chain, "db") < position(&chain, "app"));
        assert!(position(&chain, "cache") < position(&chain, "app"));
        assert!(position(&chain, "app") < position(&chain, "worker"));
    }

    #[test]
    fn missing_link_targets_are_satisfied() {
        let cfg = config(&[("app", &["external:ext"])]);
        let chain = dependency_chain(&cfg).unwrap();
        assert_eq!(chain, vec!["app".to_string()]);
    }

    #[test]
    fn a_two_node_cycle_is_rejected() {
        let cfg = config(&[("a", &["b"]), ("b", &["a"])]);
        assert_eq!(dependency_chain(&cfg), Err(CyclicDependency));
    }

    #[test]
    fn a_self_link_is_rejected() {
        let cfg = config(&[("a", &["a"])]);
        assert_eq!(dependency_chain(&cfg), Err(CyclicDependency));
    }

    #[test]
    fn a_cycle_behind_a_valid_prefix_is_rejected() {
        let cfg = config(&[("ok", &[]), ("x", &["y"]), ("y", &["x"])]);
        assert_eq!(dependency_chain(&cfg), Err(CyclicDependency));
    }

    #[test]
    fn dependents_follow_links_backwards() {
        let cfg = config(&[("app", &["db:alias"]), ("db", &[]), ("other", &[])]);
        assert_eq!(dependents_of(&cfg, "db"), vec!["app".to_string()]);
        assert_eq!(dependents_of(&cfg, "other"), Vec::<String>::new());
    }
}
