//! Selects the stacks of one account/region that a target is interested in.

use regex::Regex;

use crate::stacks::{RawStack, StackTag};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagFilter {
    pub key: String,
    pub value: String,
}

/// Predicate on a stack name.
///
/// A pattern that fails to compile becomes [`NameFilter::Malformed`], which matches nothing
/// instead of aborting the scan.
#[derive(Debug, Clone)]
pub enum NameFilter {
    Any,
    Regex(Regex),
    Prefix(String),
    Malformed { pattern: String, reason: String },
}

impl NameFilter {
    pub fn regex(pattern: &str) -> Self {
        if pattern.is_empty() {
            return NameFilter::Any;
        }

        match Regex::new(pattern) {
            Ok(regex) => NameFilter::Regex(regex),
            Err(error) => NameFilter::Malformed {
                pattern: pattern.to_string(),
                reason: error.to_string(),
            },
        }
    }

    pub fn prefix(prefix: &str) -> Self {
        if prefix.is_empty() {
            return NameFilter::Any;
        }
        NameFilter::Prefix(prefix.to_string())
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, NameFilter::Malformed { .. })
    }

    pub fn matches(&self, stack_name: &str) -> bool {
        match self {
            NameFilter::Any => true,
            NameFilter::Regex(regex) => regex.is_match(stack_name),
            NameFilter::Prefix(prefix) => stack_name.starts_with(prefix.as_str()),
            NameFilter::Malformed { .. } => false,
        }
    }
}

impl PartialEq for NameFilter {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (NameFilter::Any, NameFilter::Any) => true,
            (NameFilter::Regex(a), NameFilter::Regex(b)) => a.as_str() == b.as_str(),
            (NameFilter::Prefix(a), NameFilter::Prefix(b)) => a == b,
            (
                NameFilter::Malformed { pattern: a, .. },
                NameFilter::Malformed { pattern: b, .. },
            ) => a == b,
            _ => false,
        }
    }
}

/// Every filter tag must be carried with the exact same value. An empty filter set passes all stacks.
pub fn has_all_tags(stack_tags: &[StackTag], tag_filters: &[TagFilter]) -> bool {
    tag_filters.iter().all(|filter| {
        stack_tags
            .iter()
            .any(|tag| tag.key == filter.key && tag.value == filter.value)
    })
}

pub fn is_match(stack: &RawStack, name_filter: &NameFilter, tag_filters: &[TagFilter]) -> bool {
    name_filter.matches(&stack.name) && has_all_tags(&stack.tags, tag_filters)
}

pub fn match_stacks(
    stacks: Vec<RawStack>,
    name_filter: &NameFilter,
    tag_filters: &[TagFilter],
) -> Vec<RawStack> {
    stacks
        .into_iter()
        .filter(|stack| is_match(stack, name_filter, tag_filters))
        .collect()
}
