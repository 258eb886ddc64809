//! Token Utilities
//! Lowercased alphanumeric tokens and overlap arithmetic for identity
//! scoring.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Wired / wireless / dual connection classes for variant matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionClass {
    Wired,
    Wireless,
    Dual,
}

impl ConnectionClass {
    pub fn as_str(&self) -> &str {
        match self {
            ConnectionClass::Wired => "wired",
            ConnectionClass::Wireless => "wireless",
            ConnectionClass::Dual => "dual",
        }
    }

    /// Dual covers both single classes
    pub fn covers(&self, other: ConnectionClass) -> bool {
        *self == other || *self == ConnectionClass::Dual
    }
}

pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            current.push(c.to_ascii_lowercase());
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

pub fn token_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// Fraction of `required` tokens present in `have`
pub fn coverage(required: &[String], have: &HashSet<String>) -> f64 {
    if required.is_empty() {
        return 1.0;
    }
    let hit = required.iter().filter(|t| have.contains(*t)).count();
    hit as f64 / required.len() as f64
}

/// Overlap between two token sets relative to the smaller one
pub fn overlap(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let hit = a.intersection(b).count();
    hit as f64 / a.len().min(b.len()) as f64
}

/// Numeric tokens ("2", "v3", "30") distinguish sibling models
pub fn numeric_tokens(tokens: &[String]) -> Vec<&String> {
    tokens
        .iter()
        .filter(|t| t.chars().any(|c| c.is_ascii_digit()))
        .collect()
}

/// Detect the connection class a text advertises
pub fn connection_class(text: &str) -> Option<ConnectionClass> {
    let tokens = token_set(text);
    let wireless = tokens.contains("wireless") || tokens.contains("bluetooth");
    let wired = tokens.contains("wired") || tokens.contains("usb") || tokens.contains("cable");
    let dual = tokens.contains("dual") || tokens.contains("hybrid");

    if dual || (wired && wireless) {
        Some(ConnectionClass::Dual)
    } else if wireless {
        Some(ConnectionClass::Wireless)
    } else if wired {
        Some(ConnectionClass::Wired)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_splits_on_non_alnum() {
        assert_eq!(tokenize("Razer Viper-V3 Pro!"), vec!["razer", "viper", "v3", "pro"]);
    }

    #[test]
    fn coverage_counts_required_hits() {
        let required = vec!["razer".to_string(), "viper".to_string(), "v3".to_string()];
        let have = token_set("The Razer Viper V3 Pro wireless mouse");
        assert!((coverage(&required, &have) - 1.0).abs() < 1e-9);

        let have = token_set("Razer Viper gaming mouse");
        assert!((coverage(&required, &have) - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn numeric_tokens_found() {
        let tokens = tokenize("G Pro X 2");
        let numeric = numeric_tokens(&tokens);
        assert_eq!(numeric.len(), 1);
        assert_eq!(numeric[0], "2");
    }

    #[test]
    fn connection_class_detection() {
        assert_eq!(connection_class("Wireless gaming mouse"), Some(ConnectionClass::Wireless));
        assert_eq!(connection_class("Wired USB mouse"), Some(ConnectionClass::Wired));
        assert_eq!(
            connection_class("dual mode wired and wireless"),
            Some(ConnectionClass::Dual)
        );
        assert_eq!(connection_class("ergonomic shape"), None);
    }

    #[test]
    fn dual_covers_both() {
        assert!(ConnectionClass::Dual.covers(ConnectionClass::Wired));
        assert!(ConnectionClass::Dual.covers(ConnectionClass::Wireless));
        assert!(!ConnectionClass::Wired.covers(ConnectionClass::Wireless));
    }
}
