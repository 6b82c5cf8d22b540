//! Harvested connection records.

use serde::{Deserialize, Serialize};

/// One structured record extracted from a rendered profile card.
///
/// All fields default to the empty string rather than being absent; a record
/// is only valid when `first_name` is non-empty (derived from a non-empty
/// full name on the card). Immutable once created; ownership transfers to the
/// batch dispatcher on creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvestRecord {
    pub first_name: String,
    pub last_name: String,
    pub url: String,
    pub email_address: String,
    pub company: String,
    pub position: String,
    pub connected_on: String,
}

impl HarvestRecord {
    /// A record without a first name never leaves the extraction engine.
    pub fn is_valid(&self) -> bool {
        !self.first_name.is_empty()
    }

    pub fn full_name(&self) -> String {
        if self.last_name.is_empty() {
            self.first_name.clone()
        } else {
            format!("{} {}", self.first_name, self.last_name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_without_first_name_is_invalid() {
        let record = HarvestRecord::default();
        assert!(!record.is_valid());

        let record = HarvestRecord {
            first_name: "Ada".to_string(),
            ..Default::default()
        };
        assert!(record.is_valid());
    }

    #[test]
    fn record_serializes_with_camel_case_keys() {
        let record = HarvestRecord {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            url: "https://www.linkedin.com/in/ada".to_string(),
            email_address: String::new(),
            company: "Initech".to_string(),
            position: "Engineer".to_string(),
            connected_on: "2024-01-15".to_string(),
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["firstName"], "Ada");
        assert_eq!(json["connectedOn"], "2024-01-15");
        assert_eq!(json["emailAddress"], "");
    }

    #[test]
    fn full_name_omits_missing_last_name() {
        let record = HarvestRecord {
            first_name: "Cher".to_string(),
            ..Default::default()
        };
        assert_eq!(record.full_name(), "Cher");
    }
}
