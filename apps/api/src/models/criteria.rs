use serde::{Deserialize, Serialize};

/// Ideal-customer-profile criteria supplied when a run or qualification starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualificationCriteria {
    #[serde(default)]
    pub target_titles: Vec<String>,
    #[serde(default)]
    pub target_industries: Vec<String>,
    /// Free-text ICP context forwarded to the AI calls.
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub exclude_titles: Vec<String>,
    #[serde(default)]
    pub exclude_companies: Vec<String>,
}

impl QualificationCriteria {
    /// Criteria count as set once they carry at least one target or a description.
    pub fn is_set(&self) -> bool {
        self.target_titles.iter().any(|t| !t.trim().is_empty())
            || self.target_industries.iter().any(|t| !t.trim().is_empty())
            || !self.description.trim().is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeywordList {
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Two named keyword lists. A match in company or title exempts a record from removal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtectedKeywords {
    #[serde(default)]
    pub primary: KeywordList,
    #[serde(default)]
    pub secondary: KeywordList,
}

impl ProtectedKeywords {
    pub fn lists(&self) -> [&KeywordList; 2] {
        [&self.primary, &self.secondary]
    }
}
