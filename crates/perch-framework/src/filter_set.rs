//! Filter sets: the filters attached to one controller or action.
//!
//! A [`FilterSet`] keeps three views of the same attachments:
//!
//! - a flat list, used for identity-based duplicate detection;
//! - order buckets (`order -> filters`, attachment order inside a bucket);
//! - the [`FilterState`] the filters' option functions write into, i.e. the
//!   target's info and merged rules.
//!
//! Every controller and action definition owns its set outright. Inherited
//! filters are copied in once, at registration, via
//! [`merge_inherited`](FilterSet::merge_inherited).

use std::collections::BTreeMap;

use perch_core::StructuralError;
use perch_core::http::Method;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::filter::{Filter, FilterAttachment};

/// Descriptive metadata of a controller or action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterInfo {
    pub name: Option<String>,
    pub desc: Option<String>,
}

/// Rules accumulated by attached filters.
///
/// The HTTP method constraint is typed; anything else lives in a free-form
/// map keyed by rule name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterRules {
    pub http_method: Option<Vec<Method>>,
    custom: Map<String, Value>,
}

impl FilterRules {
    pub fn set_value(&mut self, key: impl Into<String>, value: Value) {
        self.custom.insert(key.into(), value);
    }

    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.custom.get(key)
    }

    /// Reads a custom rule as `T`; `None` when missing or mistyped.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.custom
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Merges rule layers; later layers override earlier ones key by key.
    pub fn layered<'a>(layers: impl IntoIterator<Item = &'a FilterRules>) -> Self {
        let mut merged = Self::default();
        for layer in layers {
            if layer.http_method.is_some() {
                merged.http_method.clone_from(&layer.http_method);
            }
            for (key, value) in &layer.custom {
                merged.custom.insert(key.clone(), value.clone());
            }
        }
        merged
    }
}

/// The mutable bag a filter's option function writes into.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterState {
    pub info: FilterInfo,
    pub rules: FilterRules,
}

/// Filters attached to one target.
#[derive(Clone, Default)]
pub struct FilterSet {
    list: Vec<Filter>,
    buckets: BTreeMap<i64, Vec<Filter>>,
    state: FilterState,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, filter: &Filter) -> bool {
        self.list.iter().any(|f| f == filter)
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Filters in the order they were added.
    pub fn filters(&self) -> &[Filter] {
        &self.list
    }

    pub fn buckets(&self) -> &BTreeMap<i64, Vec<Filter>> {
        &self.buckets
    }

    /// The bucket a filter was placed in.
    pub fn order_of(&self, filter: &Filter) -> Option<i64> {
        self.buckets
            .iter()
            .find(|(_, filters)| filters.contains(filter))
            .map(|(order, _)| *order)
    }

    /// Filters by descending order, attachment order within a bucket.
    pub fn iter_descending(&self) -> impl Iterator<Item = &Filter> {
        self.buckets.values().rev().flatten()
    }

    /// Filters by ascending order, attachment order within a bucket.
    pub fn iter_ascending(&self) -> impl Iterator<Item = &Filter> {
        self.buckets.values().flatten()
    }

    pub fn info(&self) -> &FilterInfo {
        &self.state.info
    }

    pub fn rules(&self) -> &FilterRules {
        &self.state.rules
    }

    pub fn state(&self) -> &FilterState {
        &self.state
    }

    pub(crate) fn set_rules(&mut self, rules: FilterRules) {
        self.state.rules = rules;
    }

    /// Attaches a filter and applies its option to this set's state.
    ///
    /// `target` only names the owner in the error.
    pub fn attach(
        &mut self,
        attachment: FilterAttachment,
        target: &str,
    ) -> Result<(), StructuralError> {
        let (filter, order, apply) = attachment.into_parts();
        if self.contains(&filter) {
            return Err(StructuralError::DuplicateFilter {
                filter: filter.name().to_string(),
                target: target.to_string(),
            });
        }
        self.insert(filter, order);
        apply(&mut self.state);
        Ok(())
    }

    /// Copies in the filters of `other` that are not present yet, keeping
    /// the bucket each one had there. Rules and info are not touched.
    pub fn merge_inherited(&mut self, other: &FilterSet) {
        for (order, filters) in &other.buckets {
            for filter in filters {
                if !self.contains(filter) {
                    self.insert(filter.clone(), *order);
                }
            }
        }
    }

    fn insert(&mut self, filter: Filter, order: i64) {
        self.list.push(filter.clone());
        self.buckets.entry(order).or_default().push(filter);
    }
}

impl std::fmt::Debug for FilterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let buckets: BTreeMap<_, Vec<_>> = self
            .buckets
            .iter()
            .map(|(order, filters)| (*order, filters.iter().map(Filter::name).collect()))
            .collect();
        f.debug_struct("FilterSet")
            .field("buckets", &buckets)
            .field("state", &self.state)
            .finish()
    }
}
