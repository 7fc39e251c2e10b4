use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct DonationRequest {
    pub project_id: Uuid,
    pub amount: Decimal,
    pub currency: Option<String>,
    pub donor_name: Option<String>,
    pub donor_email: Option<String>,
    pub donor_phone: Option<String>,
    pub message: Option<String>,
    /// Donations are anonymous unless the donor opts out.
    #[serde(default = "default_anonymous")]
    pub anonymous: bool,
    pub payment_method: Option<String>,
}

fn default_anonymous() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_defaults_to_true() {
        let json = r#"{"project_id":"7f2c5cb0-4f2a-4b8a-9d8a-0a1b2c3d4e5f","amount":"500"}"#;
        let request: DonationRequest = serde_json::from_str(json).unwrap();
        assert!(request.anonymous);
        assert_eq!(request.amount, Decimal::from(500));
        assert!(request.donor_name.is_none());
    }

    #[test]
    fn donor_can_opt_out_of_anonymity() {
        let json = r#"{"project_id":"7f2c5cb0-4f2a-4b8a-9d8a-0a1b2c3d4e5f","amount":"500","anonymous":false,"donor_name":"Wanjiku"}"#;
        let request: DonationRequest = serde_json::from_str(json).unwrap();
        assert!(!request.anonymous);
        assert_eq!(request.donor_name.as_deref(), Some("Wanjiku"));
    }
}
