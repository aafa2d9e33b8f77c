//! The record of one concrete draw.
//!
//! A base outcome holds the value a leaf produced. A composite outcome
//! holds every child outcome that was drawn, which of them counted toward
//! the total, and the total itself. During an advantage roll both child
//! dice appear in `children`, but only one index appears in `kept`.

use crate::types::Value;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Base {
        value: Value,
    },
    Composite {
        children: Vec<Outcome>,
        /// Indices into `children`, in selection order.
        kept:     Vec<usize>,
        total:    Value,
    },
}

impl Outcome {
    pub fn total(&self) -> Value {
        match self {
            Outcome::Base { value } => *value,
            Outcome::Composite { total, .. } => *total,
        }
    }

    pub fn is_base(&self) -> bool {
        matches!(self, Outcome::Base { .. })
    }

    pub fn children(&self) -> &[Outcome] {
        match self {
            Outcome::Base { .. } => &[],
            Outcome::Composite { children, .. } => children,
        }
    }

    /// Totals of the children that contributed, in selection order.
    /// A base outcome contributes its own value.
    pub fn kept_values(&self) -> Vec<Value> {
        match self {
            Outcome::Base { value } => vec![*value],
            Outcome::Composite { children, kept, .. } => {
                kept.iter().map(|&i| children[i].total()).collect()
            }
        }
    }

    /// Totals of the children that were drawn but did not count.
    pub fn dropped_values(&self) -> Vec<Value> {
        match self {
            Outcome::Base { .. } => Vec::new(),
            Outcome::Composite { children, kept, .. } => children
                .iter()
                .enumerate()
                .filter(|(i, _)| !kept.contains(i))
                .map(|(_, child)| child.total())
                .collect(),
        }
    }
}
