//! Expert persona presets
//!
//! A persona is a named expert role in the panel. The defaults cover the
//! domains the panel is most often asked about; callers can merge in their
//! own presets per session.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A named expert role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    /// Display name
    pub name: String,
    /// Role title used in prompts
    pub role: String,
    /// Domains of expertise
    pub expertise: Vec<String>,
}

impl Persona {
    /// Create a persona
    #[must_use]
    pub fn new(name: impl Into<String>, role: impl Into<String>, expertise: &[&str]) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            expertise: expertise.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

/// The built-in expert panel, keyed by persona key
#[must_use]
pub fn default_personas() -> HashMap<String, Persona> {
    let presets = [
        (
            "biologist",
            Persona::new("Dr. Bio", "Senior Biologist", &["ecology", "genetics", "anatomy"]),
        ),
        (
            "historian",
            Persona::new(
                "Prof. Gist",
                "Historian",
                &["political history", "warfare", "social archaeology"],
            ),
        ),
        (
            "mathematician",
            Persona::new(
                "Euler Pro",
                "Mathematician",
                &["calculus", "statistics", "algorithms"],
            ),
        ),
        (
            "economist",
            Persona::new(
                "Adam S.",
                "Economist",
                &["macroeconomics", "market dynamics", "sustainability"],
            ),
        ),
        (
            "data_scientist",
            Persona::new(
                "Dr. Matrix",
                "Data Scientist",
                &[
                    "machine learning",
                    "data mining",
                    "statistical modeling",
                    "visualization",
                ],
            ),
        ),
        (
            "scientific_researcher",
            Persona::new(
                "Dr. Curie",
                "Scientific Researcher",
                &[
                    "methodology",
                    "peer review",
                    "experimental design",
                    "academic writing",
                ],
            ),
        ),
    ];

    presets
        .into_iter()
        .map(|(key, persona)| (key.to_string(), persona))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_panel_covers_six_domains() {
        let personas = default_personas();
        assert_eq!(personas.len(), 6);
        assert!(personas.contains_key("biologist"));
        assert!(personas.contains_key("scientific_researcher"));
    }
}
