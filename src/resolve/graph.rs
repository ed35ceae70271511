//! Service dependency graph

use crate::descriptor::Document;
use crate::error::{BerthError, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Startup stages: every service's dependencies live in earlier stages
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StartupPlan {
    pub stages: Vec<Vec<String>>,
}

impl StartupPlan {
    /// Flattened startup order
    pub fn order(&self) -> Vec<String> {
        self.stages.iter().flatten().cloned().collect()
    }

    /// Shutdown order (startup reversed)
    pub fn shutdown_order(&self) -> Vec<String> {
        let mut order = self.order();
        order.reverse();
        order
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Visited,
}

/// Dependency edges between declared services
///
/// Edges to services the document does not declare are dropped; reporting
/// them is the job of reference checking.
pub struct DependencyGraph<'a> {
    edges: BTreeMap<&'a str, BTreeSet<&'a str>>,
}

impl<'a> DependencyGraph<'a> {
    /// Build the graph from a document
    pub fn from_document(document: &'a Document) -> Self {
        let edges = document
            .services
            .iter()
            .map(|(name, service)| {
                let deps = service
                    .dependency_names()
                    .into_iter()
                    .filter(|dep| document.services.contains_key(*dep))
                    .collect();
                (name.as_str(), deps)
            })
            .collect();

        Self { edges }
    }

    /// Dependencies of a service
    pub fn dependencies(&self, service: &str) -> impl Iterator<Item = &&'a str> {
        self.edges.get(service).into_iter().flatten()
    }

    /// Find a dependency cycle, returned as a closed path (`a -> b -> a`)
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut marks = HashMap::new();
        let mut path = Vec::new();

        for &service in self.edges.keys() {
            if let Some(cycle) = self.visit(service, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    fn visit(
        &self,
        service: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match marks.get(service) {
            Some(Mark::Visited) => return None,
            Some(Mark::Visiting) => {
                let start = path.iter().position(|s| *s == service).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(service.to_string());
                return Some(cycle);
            }
            None => {}
        }

        marks.insert(service, Mark::Visiting);
        path.push(service);

        for &dep in self.dependencies(service) {
            if let Some(cycle) = self.visit(dep, marks, path) {
                return Some(cycle);
            }
        }

        path.pop();
        marks.insert(service, Mark::Visited);
        None
    }

    /// Group services into startup stages
    pub fn startup_plan(&self) -> Result<StartupPlan> {
        let mut remaining: BTreeMap<&str, BTreeSet<&str>> = self.edges.clone();
        let mut stages = Vec::new();

        while !remaining.is_empty() {
            let ready: Vec<&str> = remaining
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(name, _)| *name)
                .collect();

            if ready.is_empty() {
                let cycle = self
                    .find_cycle()
                    .unwrap_or_else(|| remaining.keys().map(|s| s.to_string()).collect());
                return Err(BerthError::CircularDependency(cycle));
            }

            for name in &ready {
                remaining.remove(name);
            }
            for deps in remaining.values_mut() {
                for name in &ready {
                    deps.remove(name);
                }
            }

            stages.push(ready.into_iter().map(str::to_string).collect());
        }

        Ok(StartupPlan { stages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorParser;

    #[test]
    fn test_reference_stages() {
        let doc = DescriptorParser::parse_str(include_str!("../../demos/docker-compose.yml")).unwrap();
        let plan = DependencyGraph::from_document(&doc).startup_plan().unwrap();
        assert_eq!(
            plan.stages,
            vec![
                vec!["db".to_string()],
                vec!["backend".to_string(), "frontend".to_string()],
                vec!["nginx".to_string()],
            ]
        );
        assert_eq!(plan.shutdown_order().first().map(String::as_str), Some("nginx"));
    }

    #[test]
    fn test_chain_order() {
        let yaml = r#"
services:
  web:
    image: nginx
    depends_on:
      - api
  api:
    image: node
    depends_on:
      - db
  db:
    image: postgres
"#;
        let doc = DescriptorParser::parse_str(yaml).unwrap();
        let order = DependencyGraph::from_document(&doc).startup_plan().unwrap().order();
        assert_eq!(order, vec!["db", "api", "web"]);
    }

    #[test]
    fn test_circular_dependency_detection() {
        let yaml = r#"
services:
  a:
    image: nginx
    depends_on:
      - b
  b:
    image: nginx
    depends_on:
      - a
  c:
    image: nginx
"#;
        let doc = DescriptorParser::parse_str(yaml).unwrap();
        let graph = DependencyGraph::from_document(&doc);
        assert_eq!(graph.find_cycle(), Some(vec!["a".to_string(), "b".to_string(), "a".to_string()]));
        match graph.startup_plan() {
            Err(BerthError::CircularDependency(cycle)) => assert_eq!(cycle, vec!["a", "b", "a"]),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let doc = DescriptorParser::parse_str("services:\n  a:\n    image: x\n    depends_on: [a]\n").unwrap();
        assert_eq!(
            DependencyGraph::from_document(&doc).find_cycle(),
            Some(vec!["a".to_string(), "a".to_string()])
        );
    }

    #[test]
    fn test_dangling_edges_are_ignored() {
        let doc = DescriptorParser::parse_str("services:\n  a:\n    image: x\n    depends_on: [ghost]\n").unwrap();
        let plan = DependencyGraph::from_document(&doc).startup_plan().unwrap();
        assert_eq!(plan.order(), vec!["a"]);
    }
}
