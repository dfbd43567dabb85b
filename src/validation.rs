//! Contribution validation engine
//!
//! Runs an adapter's scoring and then the competition's own acceptance rules
//! on top of it.

use serde_json::json;

use crate::models::{Requirement, ValidationRule};
use crate::platforms::{ContributionData, PlatformAdapter, ValidationResult};

const ANY: &str = "any";

#[derive(Debug, Clone, Copy, Default)]
pub struct ContributionValidationEngine;

impl ContributionValidationEngine {
    pub fn new() -> Self {
        Self
    }

    /// Score with the adapter, then apply every matching rule in order
    pub fn evaluate(
        &self,
        adapter: &dyn PlatformAdapter,
        contribution: &ContributionData,
        requirements: &[Requirement],
        rules: &[ValidationRule],
    ) -> ValidationResult {
        let result = adapter.validate_contribution(contribution, requirements);
        apply_rules(result, contribution, rules)
    }

    /// Indices of requirements the contribution can count towards
    pub fn matching_requirements(
        &self,
        contribution: &ContributionData,
        requirements: &[Requirement],
    ) -> Vec<usize> {
        requirements
            .iter()
            .enumerate()
            .filter(|(_, req)| type_matches(&req.kind, contribution))
            .map(|(i, _)| i)
            .collect()
    }
}

fn type_matches(kind: &str, contribution: &ContributionData) -> bool {
    if kind.eq_ignore_ascii_case(ANY) {
        return true;
    }
    crate::platforms::ContributionType::parse(kind) == Some(contribution.kind)
}

fn rule_applies(rule: &ValidationRule, contribution: &ContributionData) -> bool {
    let platform_ok =
        rule.platform.eq_ignore_ascii_case(ANY) || rule.platform.eq_ignore_ascii_case(&contribution.platform);
    platform_ok && type_matches(&rule.contribution_type, contribution)
}

pub fn apply_rules(
    mut result: ValidationResult,
    contribution: &ContributionData,
    rules: &[ValidationRule],
) -> ValidationResult {
    let mut weight = 1.0;
    let mut applied = Vec::new();

    for rule in rules.iter().filter(|r| rule_applies(r, contribution)) {
        applied.push(rule.name.clone());

        if let Some(min) = rule.min_score {
            if result.score < min {
                result.valid = false;
                result.reasons.push(format!(
                    "{}: score {:.0} below minimum {:.0}",
                    rule.name, result.score, min
                ));
            }
        }

        let missing: Vec<&str> = rule
            .required_labels
            .iter()
            .filter(|l| !contribution.has_label(l))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            result.valid = false;
            result
                .reasons
                .push(format!("{}: missing label(s) {}", rule.name, missing.join(", ")));
        }

        weight *= rule.weight;
    }

    if !applied.is_empty() {
        result.metadata.insert("rules_applied".into(), json!(applied));
        result
            .metadata
            .insert("weighted_score".into(), json!(result.score * weight));
    }
    result
}
