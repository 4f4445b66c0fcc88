//! Subject records and the manual form that seed the first workflow step.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// A business owned by the signed-in user, as returned by the subject listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Business {
    pub id: i64,
    pub business_name: String,
    #[serde(default)]
    pub business_number: Option<String>,
    #[serde(default)]
    pub business_content: Option<String>,
    #[serde(default)]
    pub business_location: Option<String>,
    #[serde(default)]
    pub business_start_date: Option<String>,
    #[serde(default)]
    pub business_platform: Option<String>,
    #[serde(default)]
    pub business_scale: Option<String>,
    #[serde(default)]
    pub investment_status: Option<String>,
    #[serde(default)]
    pub customer_type: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub business_type: Option<String>,
}

impl Business {
    /// Normalized request profile sent to the analysis endpoints.
    ///
    /// Descriptive fields the backend treats as optional are sent as empty
    /// strings rather than omitted.
    pub fn profile(&self) -> Value {
        json!({
            "id": self.id,
            "businessName": self.business_name,
            "businessNumber": self.business_number,
            "businessContent": self.business_content,
            "businessLocation": self.business_location,
            "businessStartDate": self.business_start_date,
            "businessPlatform": self.business_platform.clone().unwrap_or_default(),
            "businessScale": self.business_scale.clone().unwrap_or_default(),
            "investmentStatus": self.investment_status.clone().unwrap_or_default(),
            "customerType": self.customer_type.clone().unwrap_or_default(),
        })
    }
}

/// Free-form subject description entered when no business is selected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ManualFields {
    pub category: String,
    pub scale: String,
    pub nation: String,
    pub customer_type: String,
    pub business_type: String,
    pub business_content: String,
    pub business_platform: String,
    pub business_scale: String,
    pub investment_status: String,
}

impl ManualFields {
    /// Precompute the form from a selected business.
    pub fn from_business(business: &Business) -> Self {
        Self {
            category: business.category.clone().unwrap_or_default(),
            scale: business.business_scale.clone().unwrap_or_default(),
            nation: business.business_location.clone().unwrap_or_default(),
            customer_type: business.customer_type.clone().unwrap_or_default(),
            business_type: business.business_type.clone().unwrap_or_default(),
            business_content: business.business_content.clone().unwrap_or_default(),
            ..Self::default()
        }
    }

    /// A form is usable once a category has been chosen.
    pub fn is_minimally_filled(&self) -> bool {
        !self.category.trim().is_empty()
    }

    /// The form as a JSON object with camelCase keys.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Seed data for step 1. Whichever entry point ran last wins; the two never merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectSeed {
    Selected(Business),
    Manual(ManualFields),
}

impl SubjectSeed {
    pub fn is_usable(&self) -> bool {
        match self {
            Self::Selected(_) => true,
            Self::Manual(fields) => fields.is_minimally_filled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_business() -> Business {
        Business {
            id: 7,
            business_name: "Corner Bakery".into(),
            business_location: Some("Seoul".into()),
            business_scale: Some("small".into()),
            category: Some("retail".into()),
            ..Business::default()
        }
    }

    #[test]
    fn profile_defaults_optional_descriptors_to_empty_strings() {
        let profile = sample_business().profile();
        assert_eq!(profile["id"], json!(7));
        assert_eq!(profile["businessName"], json!("Corner Bakery"));
        assert_eq!(profile["businessScale"], json!("small"));
        assert_eq!(profile["businessPlatform"], json!(""));
        assert_eq!(profile["businessNumber"], Value::Null);
    }

    #[test]
    fn manual_fields_are_precomputed_from_business() {
        let fields = ManualFields::from_business(&sample_business());
        assert_eq!(fields.category, "retail");
        assert_eq!(fields.nation, "Seoul");
        assert_eq!(fields.scale, "small");
        assert!(fields.is_minimally_filled());
    }

    #[test]
    fn blank_category_is_not_usable() {
        let seed = SubjectSeed::Manual(ManualFields {
            category: "   ".into(),
            nation: "KR".into(),
            ..ManualFields::default()
        });
        assert!(!seed.is_usable());
        assert!(SubjectSeed::Selected(sample_business()).is_usable());
    }

    #[test]
    fn business_listing_tolerates_missing_fields() {
        let business: Business = serde_json::from_value(json!({"id": 1, "businessName": "A"})).unwrap();
        assert_eq!(business.business_content, None);
    }
}
