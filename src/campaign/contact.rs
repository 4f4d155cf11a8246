//! Contact records and targeting filters.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// A contact from the contact store, with its pre-computed buying score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub email: String,
    pub name: Option<String>,
    pub role: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub category: Option<String>,
    pub phone: Option<String>,
    pub preferred_time: Option<String>,
    pub email_click_rate: Option<f64>,
    pub linkedin_click_rate: Option<f64>,
    pub call_answer_rate: Option<f64>,
    pub buying_probability: Option<f64>,
}

impl Contact {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    /// Set engagement scores (email, professional network, call).
    pub fn with_scores(mut self, email: Option<f64>, linkedin: Option<f64>, call: Option<f64>) -> Self {
        self.email_click_rate = email;
        self.linkedin_click_rate = linkedin;
        self.call_answer_rate = call;
        self
    }
}

// ── Filters ─────────────────────────────────────────────────────────────

/// A filterable contact column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterField {
    Role,
    Location,
    Category,
    Company,
}

impl FilterField {
    /// Columns sampled for grounding, in prompt order.
    pub const GROUNDED: [FilterField; 4] = [
        FilterField::Role,
        FilterField::Location,
        FilterField::Category,
        FilterField::Company,
    ];

    /// Order in which filters are dropped when retrieval finds nothing.
    pub const RELAXATION_ORDER: [FilterField; 4] = [
        FilterField::Company,
        FilterField::Location,
        FilterField::Category,
        FilterField::Role,
    ];

    /// Contact store column name.
    pub fn column(&self) -> &'static str {
        match self {
            Self::Role => "role",
            Self::Location => "location",
            Self::Category => "category",
            Self::Company => "company",
        }
    }
}

/// Structured targeting filters. An empty list matches everyone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetFilters {
    #[serde(default, deserialize_with = "deserialize_terms")]
    pub role: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_terms")]
    pub location: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_terms")]
    pub category: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_terms")]
    pub company: Vec<String>,
}

impl TargetFilters {
    pub fn terms(&self, field: FilterField) -> &[String] {
        match field {
            FilterField::Role => &self.role,
            FilterField::Location => &self.location,
            FilterField::Category => &self.category,
            FilterField::Company => &self.company,
        }
    }

    pub fn clear(&mut self, field: FilterField) {
        match field {
            FilterField::Role => self.role.clear(),
            FilterField::Location => self.location.clear(),
            FilterField::Category => self.category.clear(),
            FilterField::Company => self.company.clear(),
        }
    }

    pub fn is_empty(&self) -> bool {
        FilterField::GROUNDED.iter().all(|f| self.terms(*f).is_empty())
    }
}

/// Accept `"a, b"`, `["a", "b"]`, or null; yield trimmed non-empty terms.
fn deserialize_terms<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Terms {
        One(String),
        Many(Vec<Option<String>>),
    }

    let raw: Option<Terms> = Option::deserialize(deserializer)?;
    let terms = match raw {
        None => Vec::new(),
        Some(Terms::One(s)) => s.split(',').map(str::to_string).collect(),
        Some(Terms::Many(items)) => items
            .into_iter()
            .flatten()
            .flat_map(|s| s.split(',').map(str::to_string).collect::<Vec<_>>())
            .collect(),
    };
    Ok(terms
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect())
}

/// Distinct real values per grounded column.
pub type ColumnSamples = BTreeMap<FilterField, Vec<String>>;
