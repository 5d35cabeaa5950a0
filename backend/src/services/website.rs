//! # Website Service
//!
//! Marketing endpoints: the waitlist and the figures shown on the public
//! website.
//!
//! ## Waitlist Flow
//!
//! ```text
//! 1. Validate email / name / country / newsletter
//!               ↓
//! 2. Read the email column of the waitlist sheet
//!               ↓
//! 3. Already listed? ── yes ──► "Email already exists in waitlist"
//!               ↓ no
//! 4. Append the row, bump the CMS waitlist counter, send the welcome email
//! ```
//!
//! ## Website Data
//!
//! - Yield: USDC deposit rate after the protocol's cut, as a percentage
//!   rounded to 2 decimals.
//! - Value lost: a fixed USD amount plus fixed quantities of assets lost to
//!   custodian failures, priced through the price feed, in whole billions.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::account_service::AccountService;
use super::price_feed::PriceFeed;
use crate::config::CmsConfig;
use crate::errors::ServiceError;
use crate::integrations::{Cms, CmsItemFields, IntegrationError, Mailer, Spreadsheet};
use crate::protocol::markets::USDC_MARKET_INDEX;
use crate::utils::{format_sheet_timestamp, is_valid_email};

/// Email column of the waitlist sheet, header included.
const WAITLIST_EMAIL_RANGE: &str = "waitlist!B:B";

/// Full row range of the waitlist sheet.
const WAITLIST_APPEND_RANGE: &str = "waitlist!A:F";

const WELCOME_TEMPLATE_ID: u32 = 3;

/// USD lost to custodian failures, on top of [`ASSETS_LOST`].
pub const USD_LOST: f64 = 8_592_500_000.0;

/// Asset quantities lost to custodian failures, by price id.
pub const ASSETS_LOST: [(&str, f64); 9] = [
    ("bitcoin", 1_226_903.0),
    ("litecoin", 56_733.0),
    ("nem", 9_000_000.0),
    ("nano", 17_000_000.0),
    ("ripple", 48_100_000.0),
    ("eos", 3_000_000.0),
    ("ethereum", 11_543.0),
    ("cardano", 2_500_000.0),
    ("tether", 20_800_000.0),
];

/// A validated waitlist signup.
#[derive(Debug, Clone, PartialEq)]
pub struct WaitlistEntry {
    pub email: String,
    pub name: String,
    pub country: String,
    pub newsletter: bool,
}

impl WaitlistEntry {
    /// Validate raw signup fields, in the order the form shows them.
    pub fn validate(
        email: Option<String>,
        name: Option<String>,
        country: Option<String>,
        newsletter: Option<Value>,
    ) -> Result<Self, ServiceError> {
        let email = required(email, "Email is required")?;
        if !is_valid_email(&email) {
            return Err(ServiceError::InvalidInput("Invalid email".to_string()));
        }

        let name = required(name, "Name is required")?;
        let country = required(country, "Country is required")?;

        let newsletter = match newsletter {
            None | Some(Value::Null) => {
                return Err(ServiceError::InvalidInput("Newsletter is required".to_string()))
            }
            Some(Value::Bool(flag)) => flag,
            Some(_) => {
                return Err(ServiceError::InvalidInput(
                    "Newsletter must be a boolean".to_string(),
                ))
            }
        };

        Ok(Self {
            email,
            name,
            country,
            newsletter,
        })
    }

    fn to_row(&self) -> Vec<String> {
        vec![
            format_sheet_timestamp(Utc::now()),
            self.email.clone(),
            self.name.clone(),
            self.country.clone(),
            if self.newsletter { "TRUE" } else { "FALSE" }.to_string(),
            "1".to_string(),
        ]
    }
}

fn required(value: Option<String>, message: &str) -> Result<String, ServiceError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ServiceError::InvalidInput(message.to_string()))
}

/// Result of a waitlist signup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitlistOutcome {
    Added,
    AlreadyListed,
}

impl WaitlistOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            WaitlistOutcome::Added => "Email added to waitlist",
            WaitlistOutcome::AlreadyListed => "Email already exists in waitlist",
        }
    }
}

/// Figures pushed to the website.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebsiteData {
    /// Deposit APY after the protocol cut, in percent.
    #[serde(rename = "yield")]
    pub yield_apy: f64,
    /// Value lost to custodians, in billions of USD.
    pub value_lost: u64,
}

/// CMS client with the ids of the items it maintains.
#[derive(Clone)]
pub struct CmsTarget {
    pub cms: Arc<dyn Cms>,
    pub waitlist_item_id: String,
    pub yield_item_id: String,
    pub value_lost_item_id: String,
}

impl CmsTarget {
    pub fn new(cms: Arc<dyn Cms>, config: &CmsConfig) -> Self {
        Self {
            cms,
            waitlist_item_id: config.waitlist_item_id.clone(),
            yield_item_id: config.yield_item_id.clone(),
            value_lost_item_id: config.value_lost_item_id.clone(),
        }
    }
}

/// Waitlist and website data.
#[derive(Clone)]
pub struct WebsiteService {
    accounts: AccountService,
    prices: PriceFeed,
    yield_cut: f64,
    spreadsheet: Option<Arc<dyn Spreadsheet>>,
    cms: Option<CmsTarget>,
    mailer: Option<Arc<dyn Mailer>>,
}

impl WebsiteService {
    pub fn new(
        accounts: AccountService,
        prices: PriceFeed,
        yield_cut: f64,
        spreadsheet: Option<Arc<dyn Spreadsheet>>,
        cms: Option<CmsTarget>,
        mailer: Option<Arc<dyn Mailer>>,
    ) -> Self {
        Self {
            accounts,
            prices,
            yield_cut,
            spreadsheet,
            cms,
            mailer,
        }
    }

    /// Add a signup to the waitlist.
    ///
    /// ## Returns
    ///
    /// * `Ok(WaitlistOutcome)` - Added, or already on the list
    /// * `Err(ServiceError::NotConfigured)` - Spreadsheet, CMS or email missing
    /// * `Err(ServiceError::Integration)` - A third-party call failed
    pub async fn add_to_waitlist(&self, entry: WaitlistEntry) -> Result<WaitlistOutcome, ServiceError> {
        let spreadsheet = self.spreadsheet.as_ref().ok_or(ServiceError::NotConfigured("Spreadsheet"))?;
        let cms = self.cms.as_ref().ok_or(ServiceError::NotConfigured("CMS"))?;
        let mailer = self.mailer.as_ref().ok_or(ServiceError::NotConfigured("Email"))?;

        let rows = spreadsheet.read_rows(WAITLIST_EMAIL_RANGE).await?;
        let emails: Vec<&str> = rows
            .iter()
            .skip(1)
            .map(|row| row.first().map(String::as_str).unwrap_or_default())
            .collect();

        if emails.is_empty() {
            return Err(IntegrationError::InvalidResponse {
                service: "Google Sheets",
                message: "Failed to fetch data from spreadsheet".to_string(),
            }
            .into());
        }

        if emails.contains(&entry.email.as_str()) {
            info!("Waitlist signup already present: {}", entry.email);
            return Ok(WaitlistOutcome::AlreadyListed);
        }

        spreadsheet.append_row(WAITLIST_APPEND_RANGE, entry.to_row()).await?;

        let count = emails.len() as u64 + 1;
        cms.cms
            .update_item(
                &cms.waitlist_item_id,
                CmsItemFields {
                    name: "Waitlist",
                    slug: "waitlist",
                    count: json!(count),
                },
            )
            .await?;

        mailer
            .send_template(
                WELCOME_TEMPLATE_ID,
                &entry.email,
                &entry.name,
                json!({ "NAME": entry.name }),
            )
            .await?;

        info!("Added {} to waitlist ({} entries)", entry.email, count);
        Ok(WaitlistOutcome::Added)
    }

    /// Recompute the website figures and push them to the CMS.
    pub async fn update_website_data(&self) -> Result<WebsiteData, ServiceError> {
        let cms = self.cms.as_ref().ok_or(ServiceError::NotConfigured("CMS"))?;

        let rates = self.accounts.get_rates(&[USDC_MARKET_INDEX]).await?;
        let deposit_rate = rates
            .first()
            .map(|(_, rates)| rates.deposit_rate)
            .unwrap_or_default();
        let yield_apy = apy_after_cut(deposit_rate, self.yield_cut)?;

        cms.cms
            .update_item(
                &cms.yield_item_id,
                CmsItemFields {
                    name: "Yield",
                    slug: "yield",
                    count: json!(yield_apy),
                },
            )
            .await?;

        let ids: Vec<String> = ASSETS_LOST.iter().map(|(id, _)| id.to_string()).collect();
        let prices = self.prices.get_prices(&ids).await?;
        let value_lost = value_lost_billions(&prices);

        cms.cms
            .update_item(
                &cms.value_lost_item_id,
                CmsItemFields {
                    name: "Value Lost",
                    slug: "value-lost",
                    count: json!(value_lost),
                },
            )
            .await?;

        info!("Website data updated: yield {}% value lost ${}B", yield_apy, value_lost);

        Ok(WebsiteData { yield_apy, value_lost })
    }
}

/// Deposit rate after the protocol cut, as a percentage with 2 decimals.
pub fn apy_after_cut(deposit_rate: f64, yield_cut: f64) -> Result<f64, ServiceError> {
    if deposit_rate <= 0.0 {
        return Err(ServiceError::Consistency("Invalid rate fetched".to_string()));
    }

    let apy = 100.0 * deposit_rate * (1.0 - yield_cut);
    Ok(((apy + f64::EPSILON) * 100.0).round() / 100.0)
}

/// Total value lost to custodians, truncated to whole billions.
///
/// Assets without a quote are left out of the total.
pub fn value_lost_billions(prices: &[(String, f64)]) -> u64 {
    let mut total = USD_LOST;

    for (id, amount) in ASSETS_LOST {
        match prices.iter().find(|(priced, _)| priced == id) {
            Some((_, price)) => total += price * amount,
            None => warn!("No price for {}, left out of value lost", id),
        }
    }

    (total / 1_000_000_000.0).trunc() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TtlCache;
    use crate::services::retry::RetryPolicy;
    use crate::testing::{test_ids, usdc_market, FakeCms, FakeLedger, FakeMailer, FakePriceSource, FakeSpreadsheet};
    use std::time::Duration;

    struct Harness {
        service: WebsiteService,
        spreadsheet: Arc<FakeSpreadsheet>,
        cms: Arc<FakeCms>,
        mailer: Arc<FakeMailer>,
    }

    fn harness(rows: &[&str]) -> Harness {
        let ledger = Arc::new(FakeLedger::new());
        let mut usdc = usdc_market();
        // 40% utilization: 5% borrow, 2% deposit
        usdc.deposit_balance = 1_000 * 1_000_000 * 1_000;
        usdc.borrow_balance = 400 * 1_000_000 * 1_000;
        usdc.optimal_utilization = 800_000;
        usdc.optimal_borrow_rate = 100_000;
        usdc.max_borrow_rate = 1_000_000;
        ledger.insert_spot_market(&test_ids(), &usdc);

        let accounts = AccountService::new(ledger, test_ids(), RetryPolicy::default(), Duration::from_secs(60));
        let prices = PriceFeed::with_cache(
            Arc::new(FakePriceSource::new(&[("bitcoin", 60_000.0), ("ethereum", 3_000.0)])),
            TtlCache::new(Duration::from_secs(60)),
        );

        let spreadsheet = Arc::new(FakeSpreadsheet::new(rows));
        let cms = Arc::new(FakeCms::default());
        let mailer = Arc::new(FakeMailer::default());

        let service = WebsiteService::new(
            accounts,
            prices,
            0.5,
            Some(spreadsheet.clone()),
            Some(CmsTarget {
                cms: cms.clone(),
                waitlist_item_id: "waitlist-item".to_string(),
                yield_item_id: "yield-item".to_string(),
                value_lost_item_id: "value-lost-item".to_string(),
            }),
            Some(mailer.clone()),
        );

        Harness { service, spreadsheet, cms, mailer }
    }

    fn entry(email: &str) -> WaitlistEntry {
        WaitlistEntry {
            email: email.to_string(),
            name: "Ada".to_string(),
            country: "UK".to_string(),
            newsletter: true,
        }
    }

    #[test]
    fn test_waitlist_validation_messages() {
        let s = |v: &str| Some(v.to_string());
        let cases = [
            (None, s("Ada"), s("UK"), Some(json!(true)), "Email is required"),
            (s("not-an-email"), s("Ada"), s("UK"), Some(json!(true)), "Invalid email"),
            (s("a@b.co"), None, s("UK"), Some(json!(true)), "Name is required"),
            (s("a@b.co"), s("Ada"), s(""), Some(json!(true)), "Country is required"),
            (s("a@b.co"), s("Ada"), s("UK"), None, "Newsletter is required"),
            (s("a@b.co"), s("Ada"), s("UK"), Some(json!("yes")), "Newsletter must be a boolean"),
        ];

        for (email, name, country, newsletter, message) in cases {
            let err = WaitlistEntry::validate(email, name, country, newsletter).unwrap_err();
            assert_eq!(err.to_string(), message);
        }

        let ok = WaitlistEntry::validate(s("a@b.co"), s("Ada"), s("UK"), Some(json!(false))).unwrap();
        assert!(!ok.newsletter);
    }

    #[tokio::test]
    async fn test_new_signup_is_appended_counted_and_emailed() {
        let h = harness(&["Email", "old@example.com"]);

        let outcome = h.service.add_to_waitlist(entry("new@example.com")).await.unwrap();
        assert_eq!(outcome, WaitlistOutcome::Added);

        let appended = h.spreadsheet.appended();
        assert_eq!(appended.len(), 1);
        assert_eq!(appended[0].0, "waitlist!A:F");
        assert_eq!(&appended[0].1[1..], ["new@example.com", "Ada", "UK", "TRUE", "1"]);

        let updates = h.cms.updates();
        assert_eq!(updates[0].0, "waitlist-item");
        assert_eq!(updates[0].1.count, json!(2));

        let sent = h.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 3);
        assert_eq!(sent[0].3, json!({ "NAME": "Ada" }));
    }

    #[tokio::test]
    async fn test_existing_email_is_not_added_again() {
        let h = harness(&["Email", "ada@example.com"]);

        let outcome = h.service.add_to_waitlist(entry("ada@example.com")).await.unwrap();
        assert_eq!(outcome, WaitlistOutcome::AlreadyListed);
        assert_eq!(outcome.message(), "Email already exists in waitlist");
        assert!(h.spreadsheet.appended().is_empty());
        assert!(h.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_empty_sheet_is_an_integration_error() {
        let h = harness(&["Email"]);
        let err = h.service.add_to_waitlist(entry("ada@example.com")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Integration(_)));
    }

    #[tokio::test]
    async fn test_missing_integrations_are_reported() {
        let h = harness(&["Email"]);
        let service = WebsiteService { spreadsheet: None, ..h.service };

        let err = service.add_to_waitlist(entry("ada@example.com")).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotConfigured("Spreadsheet")));
    }

    #[tokio::test]
    async fn test_update_website_data() {
        let h = harness(&[]);

        let data = h.service.update_website_data().await.unwrap();

        // 2% deposit rate, half kept by the protocol
        assert_eq!(data.yield_apy, 1.0);
        // 8.5925B + 1_226_903 * 60_000 + 11_543 * 3_000 = 82.24B
        assert_eq!(data.value_lost, 82);

        let updates = h.cms.updates();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].1.slug, "yield");
        assert_eq!(updates[1].1.slug, "value-lost");
        assert_eq!(updates[1].1.count, json!(82));
    }

    #[test]
    fn test_apy_after_cut() {
        assert_eq!(apy_after_cut(0.0412, 0.5).unwrap(), 2.06);
        assert_eq!(apy_after_cut(0.12345, 0.5).unwrap(), 6.17);
        assert!(apy_after_cut(0.0, 0.5).is_err());
    }

    #[test]
    fn test_website_data_json_shape() {
        let data = WebsiteData { yield_apy: 2.5, value_lost: 82 };
        assert_eq!(serde_json::to_value(data).unwrap(), json!({ "yield": 2.5, "valueLost": 82 }));
    }
}
