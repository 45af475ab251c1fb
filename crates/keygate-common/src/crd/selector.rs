//! Label selectors used for namespace admission and workload matching
//!
//! Mirrors Kubernetes `metav1.LabelSelector` semantics: `matchLabels` and
//! `matchExpressions` are ANDed together, and an empty selector matches
//! every label set.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How a `matchExpressions` entry compares a label against its values
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum LabelSelectorOperator {
    /// Value is one of `values`
    In,
    /// Value is none of `values`; a missing label passes
    NotIn,
    /// Key is present
    Exists,
    /// Key is absent
    DoesNotExist,
}

impl LabelSelectorOperator {
    /// Apply the operator to `value` (`None` when the key is missing)
    pub fn matches(&self, value: Option<&str>, values: &[String]) -> bool {
        let listed = value.is_some_and(|v| values.iter().any(|candidate| candidate == v));
        match self {
            Self::In => listed,
            Self::NotIn => !listed,
            Self::Exists => value.is_some(),
            Self::DoesNotExist => value.is_none(),
        }
    }

    /// Whether this operator takes a value list
    pub fn requires_values(&self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }
}

impl std::fmt::Display for LabelSelectorOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::In => "In",
            Self::NotIn => "NotIn",
            Self::Exists => "Exists",
            Self::DoesNotExist => "DoesNotExist",
        })
    }
}

/// One `matchExpressions` entry
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelectorRequirement {
    /// Label key to test
    pub key: String,
    /// Comparison applied to the key's value
    pub operator: LabelSelectorOperator,
    /// Candidate values; required by `In`/`NotIn`, forbidden otherwise
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl LabelSelectorRequirement {
    /// Whether `labels` satisfies this entry
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.operator
            .matches(labels.get(&self.key).map(String::as_str), &self.values)
    }

    fn validate(&self) -> Result<(), String> {
        if self.key.is_empty() {
            return Err("matchExpressions key must not be empty".to_string());
        }
        match (self.operator.requires_values(), self.values.is_empty()) {
            (true, true) => Err(format!(
                "operator {} on key '{}' requires at least one value",
                self.operator, self.key
            )),
            (false, false) => Err(format!(
                "operator {} on key '{}' must not have values",
                self.operator, self.key
            )),
            _ => Ok(()),
        }
    }
}

/// Label selector over namespaces or pods
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    /// Exact key/value pairs, all required
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_labels: Option<BTreeMap<String, String>>,

    /// Expressions, all required
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

impl LabelSelector {
    /// Selector requiring exactly the given labels
    pub fn from_labels<K, V>(labels: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            match_labels: Some(
                labels
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
            match_expressions: vec![],
        }
    }

    /// Whether `labels` satisfies both `matchLabels` and `matchExpressions`
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let exact = self
            .match_labels
            .iter()
            .flatten()
            .all(|(key, wanted)| labels.get(key) == Some(wanted));
        exact && self.match_expressions.iter().all(|expr| expr.matches(labels))
    }

    /// True when the selector has no terms and so selects everything
    pub fn is_empty(&self) -> bool {
        self.match_expressions.is_empty()
            && self.match_labels.as_ref().map_or(true, BTreeMap::is_empty)
    }

    /// Check operator/value consistency the way the API server would
    pub fn validate(&self) -> Result<(), String> {
        self.match_expressions
            .iter()
            .try_for_each(LabelSelectorRequirement::validate)
    }
}
