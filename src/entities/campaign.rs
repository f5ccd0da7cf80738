// 📣 Campaign Entity - marketing campaigns and customer responses

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One row of `marketing_campaigns_*.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedCampaign {
    pub campaign_id: String,
    pub campaign_name: String,
    pub campaign_type: Option<String>,
    pub channel: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub budget: Option<f64>,
    pub target_audience: Option<String>,
    pub campaign_status: Option<String>,
}

/// Insert-only dimension row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignDimension {
    pub campaign_key: Option<i64>,
    pub campaign_id: String,
    pub campaign_name: String,
    pub campaign_type: Option<String>,
    pub channel: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub duration_days: i64,
    pub budget: Option<f64>,
    pub target_audience: Option<String>,
    pub campaign_status: Option<String>,
}

impl CampaignDimension {
    pub fn from_staged(staged: &StagedCampaign) -> Self {
        CampaignDimension {
            campaign_key: None,
            campaign_id: staged.campaign_id.clone(),
            campaign_name: staged.campaign_name.clone(),
            campaign_type: staged.campaign_type.clone(),
            channel: staged.channel.clone(),
            start_date: staged.start_date,
            end_date: staged.end_date,
            duration_days: (staged.end_date - staged.start_date).num_days(),
            budget: staged.budget,
            target_audience: staged.target_audience.clone(),
            campaign_status: staged.campaign_status.clone(),
        }
    }
}

/// One row of `campaign_responses_*.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedResponse {
    pub response_id: String,
    pub campaign_id: String,
    pub customer_id: String,
    pub response_date: String,
    pub response_type: String,
    pub conversion_value: Option<f64>,
}

// ============================================================================
// RESPONSE TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    Opened,
    Clicked,
    Converted,
}

impl ResponseType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "opened" => Some(ResponseType::Opened),
            "clicked" => Some(ResponseType::Clicked),
            "converted" => Some(ResponseType::Converted),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Opened => "opened",
            ResponseType::Clicked => "clicked",
            ResponseType::Converted => "converted",
        }
    }

    /// (is_opened, is_clicked, is_converted); exactly one is true
    pub fn flags(&self) -> (bool, bool, bool) {
        (
            *self == ResponseType::Opened,
            *self == ResponseType::Clicked,
            *self == ResponseType::Converted,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_flags_are_one_hot() {
        for raw in ["opened", "Clicked", " CONVERTED "] {
            let kind = ResponseType::parse(raw).unwrap();
            let (o, c, v) = kind.flags();
            assert_eq!([o, c, v].iter().filter(|f| **f).count(), 1, "{raw}");
        }
        assert_eq!(ResponseType::parse("bounced"), None);
    }

    #[test]
    fn test_campaign_duration() {
        let staged = StagedCampaign {
            campaign_id: "CAMP0001".to_string(),
            campaign_name: "Spring Sale".to_string(),
            campaign_type: Some("Email".to_string()),
            channel: Some("Email".to_string()),
            start_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            budget: Some(5000.0),
            target_audience: None,
            campaign_status: Some("Completed".to_string()),
        };

        assert_eq!(CampaignDimension::from_staged(&staged).duration_days, 30);
    }
}
