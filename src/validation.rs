//! Wallet data-callback validation.
//!
//! The wallet posts requested profile data under `capabilities.dataCallback`
//! before the user signs. We answer with `{"success": true}` or a tree of
//! per-field messages under `errors`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("valid email regex")
});

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataCallbackRequest {
    #[serde(default)]
    pub capabilities: Option<Capabilities>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    #[serde(default)]
    pub data_callback: Option<DataCallback>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataCallback {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub physical_address: Option<PhysicalAddressEnvelope>,
}

/// The wallet nests the address one level deeper than the other fields.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhysicalAddressEnvelope {
    #[serde(default)]
    pub physical_address: Option<PhysicalAddress>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhysicalAddress {
    #[serde(default)]
    pub address1: Option<String>,
    #[serde(default)]
    pub address2: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub name: Option<serde_json::Value>,
}

impl DataCallbackRequest {
    fn data_callback(&self) -> Option<&DataCallback> {
        self.capabilities.as_ref()?.data_callback.as_ref()
    }

    pub fn email(&self) -> Option<&str> {
        self.data_callback()?.email.as_deref()
    }

    pub fn physical_address(&self) -> Option<&PhysicalAddress> {
        self.data_callback()?
            .physical_address
            .as_ref()?
            .physical_address
            .as_ref()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressErrors {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

impl AddressErrors {
    fn is_empty(&self) -> bool {
        self.postal_code.is_none() && self.country_code.is_none() && self.city.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationErrors {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub physical_address: Option<AddressErrors>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.physical_address.is_none() && self.server.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ValidationResponse {
    Success { success: bool },
    Errors { errors: ValidationErrors },
}

impl ValidationResponse {
    pub fn success() -> Self {
        Self::Success { success: true }
    }

    fn from_errors(errors: ValidationErrors) -> Self {
        if errors.is_empty() {
            Self::success()
        } else {
            Self::Errors { errors }
        }
    }

    pub fn email_error(message: impl Into<String>) -> Self {
        Self::Errors {
            errors: ValidationErrors {
                email: Some(message.into()),
                ..Default::default()
            },
        }
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::Errors {
            errors: ValidationErrors {
                server: Some(message.into()),
                ..Default::default()
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Rules applied to data callbacks. Defaults mirror the demo storefront.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationRules {
    pub blocked_email_domains: Vec<String>,
    pub blocked_countries: Vec<String>,
    pub restricted_cities: Vec<String>,
    pub postal_code_min_len: usize,
    pub postal_code_max_len: usize,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            blocked_email_domains: vec!["example.com".to_string()],
            blocked_countries: vec!["XY".to_string()],
            restricted_cities: vec!["restricted".to_string()],
            postal_code_min_len: 5,
            postal_code_max_len: 10,
        }
    }
}

impl ValidationRules {
    /// Returns the blocked domain, if the email ends with one.
    fn blocked_domain(&self, email: &str) -> Option<&str> {
        let lower = email.to_lowercase();
        self.blocked_email_domains
            .iter()
            .find(|domain| lower.ends_with(&format!("@{}", domain.to_lowercase())))
            .map(String::as_str)
    }

    fn blocked_domain_message(domain: &str) -> String {
        let mut chars = domain.chars();
        let capitalized: String = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        };
        format!("{capitalized} emails are not allowed")
    }

    fn check_address(&self, address: &PhysicalAddress) -> AddressErrors {
        let mut errors = AddressErrors::default();

        if let Some(postal_code) = address.postal_code.as_deref().filter(|p| !p.is_empty()) {
            let len = postal_code.chars().count();
            if len < self.postal_code_min_len || len > self.postal_code_max_len {
                errors.postal_code = Some("Invalid postal code format".to_string());
            }
        }

        if let Some(country) = address.country_code.as_deref() {
            if self.blocked_countries.iter().any(|c| c == country) {
                errors.country_code = Some("We don't ship to this country".to_string());
            }
        }

        if let Some(city) = address.city.as_deref() {
            if self
                .restricted_cities
                .iter()
                .any(|c| c.eq_ignore_ascii_case(city))
            {
                errors.city = Some("We don't ship to this city".to_string());
            }
        }

        errors
    }
}

/// Validates email and physical address together; all failing fields are reported.
pub fn validate_data_callback(
    request: &DataCallbackRequest,
    rules: &ValidationRules,
) -> ValidationResponse {
    let mut errors = ValidationErrors::default();

    if let Some(domain) = request.email().and_then(|email| rules.blocked_domain(email)) {
        errors.email = Some(ValidationRules::blocked_domain_message(domain));
    }

    if let Some(address) = request.physical_address() {
        let address_errors = rules.check_address(address);
        if !address_errors.is_empty() {
            errors.physical_address = Some(address_errors);
        }
    }

    if !errors.is_empty() {
        tracing::info!(?errors, "Data callback rejected");
    }
    ValidationResponse::from_errors(errors)
}

/// Validates only the email field, stopping at the first problem.
pub fn validate_email_callback(
    request: &DataCallbackRequest,
    rules: &ValidationRules,
) -> ValidationResponse {
    let email = request.email().unwrap_or_default();

    if email.is_empty() {
        return ValidationResponse::email_error("Email is required");
    }
    if !EMAIL_RE.is_match(email) {
        return ValidationResponse::email_error("Invalid email format");
    }
    if let Some(domain) = rules.blocked_domain(email) {
        return ValidationResponse::email_error(ValidationRules::blocked_domain_message(domain));
    }

    ValidationResponse::success()
}
