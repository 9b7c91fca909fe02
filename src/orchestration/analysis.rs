//! Description heuristics used when a work item does not declare its own
//! resources, dependencies or steps.
//!
//! These are best-effort keyword scans. Explicit declarations on a
//! [`WorkItem`] always take precedence.

use super::work_item::{ResourceKind, ResourceRequirement, WorkItem};

const BASE_CPU: u64 = 10;
const BASE_MEMORY: u64 = 20;
const BASE_NETWORK: u64 = 5;
const EXTERNAL_API_UNITS: u64 = 10;

const HEAVY_KEYWORDS: [&str; 6] = [
    "complex",
    "analysis",
    "analyze",
    "optimization",
    "optimize",
    "synthesis",
];
const EXTERNAL_KEYWORDS: [&str; 4] = ["external", "api", "integration", "fetch"];
const PARALLEL_KEYWORDS: [&str; 3] = ["parallel", "concurrent", "distributed"];
const DEPENDENCY_MARKERS: [&str; 5] = ["after", "following", "based on", "using", "requires"];

fn mentions_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| text.contains(keyword))
}

/// Estimate resource needs from the description
///
/// Baseline is 10 cpu, 20 memory, 5 network. Heavy computation doubles cpu and
/// memory, external calls triple network and add external API units, parallel
/// work scales cpu and memory by 1.5.
pub fn estimate_resources(description: &str) -> Vec<ResourceRequirement> {
    let text = description.to_lowercase();
    let mut cpu = BASE_CPU as f64;
    let mut memory = BASE_MEMORY as f64;
    let mut network = BASE_NETWORK as f64;
    let mut external_api = 0.0;

    if mentions_any(&text, &HEAVY_KEYWORDS) {
        cpu *= 2.0;
        memory *= 2.0;
    }
    if mentions_any(&text, &EXTERNAL_KEYWORDS) {
        network *= 3.0;
        external_api = EXTERNAL_API_UNITS as f64;
    }
    if mentions_any(&text, &PARALLEL_KEYWORDS) {
        cpu *= 1.5;
        memory *= 1.5;
    }

    let mut requirements = vec![
        ResourceRequirement::new(ResourceKind::Cpu, cpu.ceil() as u64),
        ResourceRequirement::new(ResourceKind::Memory, memory.ceil() as u64),
        ResourceRequirement::new(ResourceKind::Network, network.ceil() as u64),
    ];
    if external_api > 0.0 {
        requirements.push(ResourceRequirement::new(
            ResourceKind::ExternalApi,
            external_api as u64,
        ));
    }
    requirements
}

/// Infer which of `candidates` the item depends on from phrases like
/// "after X" or "based on X", where X is a candidate's id or the first word of
/// its description.
pub fn infer_dependencies(item: &WorkItem, candidates: &[WorkItem]) -> Vec<String> {
    let text = item.description.to_lowercase();
    candidates
        .iter()
        .filter(|candidate| candidate.id != item.id)
        .filter(|candidate| {
            let mut references = vec![candidate.id.to_lowercase()];
            if let Some(first_word) = candidate.description.split_whitespace().next() {
                references.push(first_word.to_lowercase());
            }
            DEPENDENCY_MARKERS.iter().any(|marker| {
                references
                    .iter()
                    .any(|reference| text.contains(&format!("{marker} {reference}")))
            })
        })
        .map(|candidate| candidate.id.clone())
        .collect()
}

/// Step run for a description with nothing to split
pub const DEFAULT_STEP: &str = "execute";

/// Split a description into ordered steps on commas and the word "and"
pub fn decompose_steps(description: &str) -> Vec<String> {
    let steps: Vec<String> = description
        .split(',')
        .flat_map(|part| part.split(" and "))
        .map(str::trim)
        .filter(|step| !step.is_empty())
        .map(str::to_string)
        .collect();

    if steps.is_empty() {
        vec![DEFAULT_STEP.to_string()]
    } else {
        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amount(requirements: &[ResourceRequirement], kind: ResourceKind) -> u64 {
        requirements
            .iter()
            .find(|r| r.kind == kind)
            .map(|r| r.amount)
            .unwrap_or(0)
    }

    #[test]
    fn test_baseline_estimate() {
        let estimate = estimate_resources("Write the landing page copy");
        assert_eq!(amount(&estimate, ResourceKind::Cpu), 10);
        assert_eq!(amount(&estimate, ResourceKind::Memory), 20);
        assert_eq!(amount(&estimate, ResourceKind::Network), 5);
        assert_eq!(amount(&estimate, ResourceKind::ExternalApi), 0);
    }

    #[test]
    fn test_heavy_external_parallel_estimate() {
        let estimate =
            estimate_resources("Complex analysis of competitor API data in parallel");
        assert_eq!(amount(&estimate, ResourceKind::Cpu), 30);
        assert_eq!(amount(&estimate, ResourceKind::Memory), 60);
        assert_eq!(amount(&estimate, ResourceKind::Network), 15);
        assert_eq!(amount(&estimate, ResourceKind::ExternalApi), 10);
    }

    #[test]
    fn test_infer_dependencies_by_id_and_first_word() {
        let schema = WorkItem::new("schema", "Design database schema");
        let api = WorkItem::new("api", "Implement endpoints based on schema");
        let ui = WorkItem::new("ui", "Build screens after design is approved");
        let all = vec![schema.clone(), api.clone(), ui.clone()];

        assert_eq!(infer_dependencies(&api, &all), vec!["schema"]);
        assert_eq!(infer_dependencies(&ui, &all), vec!["schema"]);
        assert!(infer_dependencies(&schema, &all).is_empty());
    }

    #[test]
    fn test_decompose_steps() {
        assert_eq!(
            decompose_steps("Set up repo, write models and add tests"),
            vec!["Set up repo", "write models", "add tests"]
        );
        assert_eq!(decompose_steps("single step"), vec!["single step"]);
    }

    #[test]
    fn test_separator_only_descriptions_fall_back_to_default_step() {
        for description in ["", "   ", " , ", ",,", " and ", ", and ,"] {
            assert_eq!(
                decompose_steps(description),
                vec![DEFAULT_STEP],
                "description {description:?}"
            );
        }
        assert_eq!(decompose_steps(", ship it ,"), vec!["ship it"]);
    }
}
