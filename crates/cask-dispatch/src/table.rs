use std::collections::BTreeSet;

use cask_types::PropertyValue;

use crate::clause::{parse_clauses, Clause};
use crate::config::DispatchDescriptor;
use crate::error::{DispatchError, Result};

/// An ordered, non-empty conjunction of clauses selecting a provider.
#[derive(Clone, Debug)]
pub struct Rule {
    clauses: Vec<Clause>,
    provider: String,
}

impl Rule {
    pub fn new(clauses: Vec<Clause>, provider: impl Into<String>) -> Result<Self> {
        let provider = provider.into();
        if clauses.is_empty() {
            return Err(DispatchError::Configuration(format!(
                "rule for provider '{provider}' has no clauses"
            )));
        }
        Ok(Self { clauses, provider })
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Whether every clause matches the values produced by `lookup`.
    pub fn matches<F>(&self, mut lookup: F) -> bool
    where
        F: FnMut(&str) -> Option<PropertyValue>,
    {
        self.clauses
            .iter()
            .all(|clause| clause.matches(lookup(clause.path()).as_ref()))
    }
}

/// A validated dispatch configuration.
#[derive(Clone, Debug)]
pub enum DispatchTable {
    /// Each repository writes to the provider named after it.
    RepositoryName,
    /// First matching rule wins, else the default provider.
    Rules { rules: Vec<Rule>, default: String },
}

impl DispatchTable {
    /// Validate a descriptor.
    ///
    /// Fails when rules are configured without a default, when more than
    /// one default is named, or when any clause is malformed.
    pub fn from_descriptor(descriptor: &DispatchDescriptor) -> Result<Self> {
        if descriptor.is_empty() {
            return Ok(Self::RepositoryName);
        }

        let mut rules = Vec::new();
        let mut default: Option<String> = None;
        for entry in &descriptor.rules {
            let provider = entry.provider.trim();
            if provider.is_empty() {
                return Err(DispatchError::Configuration(format!(
                    "rule '{}' names no provider",
                    entry.clauses
                )));
            }
            if entry.is_default() {
                if let Some(existing) = &default {
                    return Err(DispatchError::Configuration(format!(
                        "multiple default providers: '{existing}' and '{provider}'"
                    )));
                }
                default = Some(provider.to_string());
                continue;
            }
            rules.push(Rule::new(parse_clauses(&entry.clauses)?, provider)?);
        }

        let default = default.ok_or_else(|| {
            DispatchError::Configuration("dispatch rules configured without a default provider".into())
        })?;
        Ok(Self::Rules { rules, default })
    }

    pub fn is_rule_mode(&self) -> bool {
        matches!(self, Self::Rules { .. })
    }

    pub fn rules(&self) -> &[Rule] {
        match self {
            Self::RepositoryName => &[],
            Self::Rules { rules, .. } => rules,
        }
    }

    pub fn default_provider(&self) -> Option<&str> {
        match self {
            Self::RepositoryName => None,
            Self::Rules { default, .. } => Some(default),
        }
    }

    /// The provider chosen for the values produced by `lookup`.
    pub fn select<F>(&self, mut lookup: F) -> Option<&str>
    where
        F: FnMut(&str) -> Option<PropertyValue>,
    {
        match self {
            Self::RepositoryName => None,
            Self::Rules { rules, default } => Some(
                rules
                    .iter()
                    .find(|rule| rule.matches(&mut lookup))
                    .map_or(default.as_str(), Rule::provider),
            ),
        }
    }

    /// Every provider the rules can select, default included.
    pub fn rule_providers(&self) -> BTreeSet<String> {
        match self {
            Self::RepositoryName => BTreeSet::new(),
            Self::Rules { rules, default } => rules
                .iter()
                .map(|rule| rule.provider().to_string())
                .chain(std::iter::once(default.clone()))
                .collect(),
        }
    }

    /// Every path any clause reads.
    pub fn clause_paths(&self) -> BTreeSet<String> {
        self.rules()
            .iter()
            .flat_map(|rule| rule.clauses().iter().map(|c| c.path().to_string()))
            .collect()
    }
}
