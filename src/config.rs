// src/config.rs
//! Tunables for the grammar backend and the reduction engine

use serde::{Deserialize, Serialize};

/// Settings of the weighted reduction engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReductionConfig {
    /// Upper bound on rule applications for one input stream
    pub max_rewrites: usize,
    /// When set, the chosen parse must be a single node of this category
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_category: Option<String>,
}

impl Default for ReductionConfig {
    fn default() -> Self {
        Self {
            max_rewrites: 100_000,
            root_category: None,
        }
    }
}

/// Settings of the generated grammar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrammarConfig {
    /// Emit `GLUE` productions joining partial parses
    pub glue_rules: bool,
    /// Semantic value type constructed by every action
    pub node_type: String,
    /// Symbol standing for the blank between two pattern positions
    pub separator: String,
}

impl Default for GrammarConfig {
    fn default() -> Self {
        Self {
            glue_rules: true,
            node_type: "ParserNode".to_string(),
            separator: "_".to_string(),
        }
    }
}

impl ReductionConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl GrammarConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_take_defaults() {
        let config = ReductionConfig::from_json(r#"{"root_category":"S"}"#).unwrap();
        assert_eq!(config.max_rewrites, 100_000);
        assert_eq!(config.root_category.as_deref(), Some("S"));

        let grammar = GrammarConfig::from_json(r#"{"glue_rules":false}"#).unwrap();
        assert!(!grammar.glue_rules);
        assert_eq!(grammar.separator, "_");
    }

    #[test]
    fn test_serializes_without_empty_root() {
        let json = serde_json::to_string(&ReductionConfig::default()).unwrap();
        assert!(!json.contains("root_category"));
    }
}
