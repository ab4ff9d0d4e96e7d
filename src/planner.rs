/// Dependency resolution for resource execution
///
/// Produces the ordered list of resources to run for a target: depth-first
/// post-order over `data_requirements` in declaration order, so every
/// resource comes after everything it reads from and the target comes last.
use std::collections::HashSet;

use crate::error::{Result, WeftError};
use crate::registry::Registry;
use crate::resource::MetadataObject;

/// Dependency resolution context
pub struct DependencyResolver<'a> {
    registry: &'a Registry,
    /// Resources on the current DFS path, in visit order
    stack: Vec<MetadataObject>,
    done: HashSet<String>,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            stack: Vec::new(),
            done: HashSet::new(),
        }
    }

    /// Resolve the execution plan for `target`
    ///
    /// Fails with `CycleDetected` (full cycle path), `MissingDependency`,
    /// `NotFound` for the target itself, or `Conflict` for ambiguous names.
    pub fn resolve(mut self, target: &str) -> Result<Vec<MetadataObject>> {
        let root = self.registry.lookup_by_name(target)?;
        let mut plan = Vec::new();
        self.visit(root, &mut plan)?;
        Ok(plan)
    }

    fn visit(&mut self, resource: MetadataObject, plan: &mut Vec<MetadataObject>) -> Result<()> {
        if self.done.contains(&resource.id) {
            return Ok(());
        }

        if let Some(position) = self.stack.iter().position(|r| r.id == resource.id) {
            let mut cycle: Vec<String> = self.stack[position..]
                .iter()
                .map(|r| r.name.clone())
                .collect();
            cycle.push(resource.name.clone());
            return Err(WeftError::CycleDetected { cycle });
        }

        let requirements: Vec<String> = resource
            .unique_requirements()
            .into_iter()
            .map(str::to_string)
            .collect();

        self.stack.push(resource);

        for name in requirements {
            let dependency = match self.registry.lookup_by_name(&name) {
                Ok(dependency) => dependency,
                Err(WeftError::NotFound(_)) => {
                    let declaring = self.stack.last().map(|r| r.name.clone()).unwrap_or_default();
                    return Err(WeftError::MissingDependency {
                        resource: declaring,
                        missing: name,
                    });
                }
                Err(other) => return Err(other),
            };
            self.visit(dependency, plan)?;
        }

        if let Some(resource) = self.stack.pop() {
            self.done.insert(resource.id.clone());
            plan.push(resource);
        }

        Ok(())
    }
}

/// Convenience wrapper around [`DependencyResolver`]
pub fn plan(registry: &Registry, target: &str) -> Result<Vec<MetadataObject>> {
    DependencyResolver::new(registry).resolve(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourcePatch;

    fn add(registry: &Registry, name: &str, requires: &[&str]) {
        let id = format!("src/{}.sh:{}", name, name);
        registry.register(&id, &ResourcePatch::default()).unwrap();
        for requirement in requires {
            registry.register(&id, &ResourcePatch::load_data(*requirement)).unwrap();
        }
    }

    fn names(plan: &[MetadataObject]) -> Vec<&str> {
        plan.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_plan_two_resources() {
        let registry = Registry::new();
        add(&registry, "alias2", &[]);
        add(&registry, "alias1", &["alias2"]);

        let plan = plan(&registry, "alias1").unwrap();
        assert_eq!(names(&plan), vec!["alias2", "alias1"]);
    }

    #[test]
    fn test_plan_diamond_runs_shared_dependency_once() {
        let registry = Registry::new();
        add(&registry, "base", &[]);
        add(&registry, "left", &["base"]);
        add(&registry, "right", &["base"]);
        add(&registry, "top", &["right", "left", "right"]);

        let plan = plan(&registry, "top").unwrap();
        assert_eq!(names(&plan), vec!["base", "right", "left", "top"]);
    }

    #[test]
    fn test_plan_is_idempotent() {
        let registry = Registry::new();
        add(&registry, "a", &[]);
        add(&registry, "b", &["a"]);
        add(&registry, "c", &["a"]);
        add(&registry, "d", &["c", "b"]);

        let first = plan(&registry, "d").unwrap();
        for _ in 0..5 {
            assert_eq!(plan(&registry, "d").unwrap(), first);
        }
    }

    #[test]
    fn test_cycle_names_every_member() {
        let registry = Registry::new();
        add(&registry, "A", &["B"]);
        add(&registry, "B", &["A"]);

        match plan(&registry, "A").unwrap_err() {
            WeftError::CycleDetected { cycle } => assert_eq!(cycle, vec!["A", "B", "A"]),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_cycle_below_target_reports_only_the_loop() {
        let registry = Registry::new();
        add(&registry, "top", &["x"]);
        add(&registry, "x", &["y"]);
        add(&registry, "y", &["z"]);
        add(&registry, "z", &["x"]);

        match plan(&registry, "top").unwrap_err() {
            WeftError::CycleDetected { cycle } => assert_eq!(cycle, vec!["x", "y", "z", "x"]),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_requirement_is_cycle() {
        let registry = Registry::new();
        add(&registry, "loop", &["loop"]);
        assert!(matches!(
            plan(&registry, "loop"),
            Err(WeftError::CycleDetected { .. })
        ));
    }

    #[test]
    fn test_missing_dependency_names_both_sides() {
        let registry = Registry::new();
        add(&registry, "A", &["B"]);

        match plan(&registry, "A").unwrap_err() {
            WeftError::MissingDependency { resource, missing } => {
                assert_eq!(resource, "A");
                assert_eq!(missing, "B");
            }
            other => panic!("expected missing dependency, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_target_is_not_found() {
        let registry = Registry::new();
        assert!(matches!(plan(&registry, "nope"), Err(WeftError::NotFound(_))));
    }

    #[test]
    fn test_ambiguous_dependency_is_conflict() {
        let registry = Registry::new();
        add(&registry, "top", &["dup"]);
        registry
            .register(
                "src/one.sh:one",
                &ResourcePatch {
                    name: Some("dup".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        registry
            .register(
                "src/two.sh:two",
                &ResourcePatch {
                    name: Some("dup".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(matches!(plan(&registry, "top"), Err(WeftError::Conflict { .. })));
    }
}
