//! Checkout form controller.
//!
//! Card details never reach this service: the browser tokenizes them with the
//! public key and posts back only the method token. This module decides
//! whether the card form is offered and hands the browser what it needs.

use crate::{
    config::{GatewayConfig, GatewayMode, StoreConfig},
    entities::order::Model as OrderModel,
    paymongo::GATEWAY_ID,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use utoipa::ToSchema;

/// Form field carrying the tokenized payment method.
pub const METHOD_TOKEN_FIELD: &str = "methodToken";
/// Older storefront scripts post the token under this name.
pub const LEGACY_METHOD_TOKEN_FIELD: &str = "cynder_paymongo_method_id";

pub const ORDER_RECEIVED_TEXT: &str = "Thank You! Order has been received.";

const TEST_MODE_NOTICE: &str = " TEST MODE ENABLED. In test mode, you can use the card numbers listed in the <a href=\"https://developers.paymongo.com/docs/testing\" target=\"_blank\" rel=\"noopener noreferrer\">documentation</a>.";

/// Why the card form is not offered.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum FormUnavailable {
    #[error("gateway is disabled")]
    Disabled,
    #[error("API keys for the active mode are not configured")]
    MissingKeys,
    #[error("live payments require the storefront to be served over https")]
    InsecureStorefront,
}

/// Page the form is rendered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FormPage {
    #[default]
    Checkout,
    OrderPay,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct BillingDetails {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub address_1: Option<String>,
    pub address_2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postcode: Option<String>,
    pub country: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl From<&OrderModel> for BillingDetails {
    fn from(order: &OrderModel) -> Self {
        Self {
            first_name: order.billing_first_name.clone(),
            last_name: order.billing_last_name.clone(),
            address_1: order.billing_line1.clone(),
            address_2: order.billing_line2.clone(),
            city: order.billing_city.clone(),
            state: order.billing_state.clone(),
            postcode: order.billing_postal_code.clone(),
            country: order.billing_country.clone(),
            email: order.billing_email.clone(),
            phone: order.billing_phone.clone(),
        }
    }
}

/// Values handed to the browser-side tokenization script. Only the public
/// key is ever included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CheckoutFormParams {
    pub public_key: String,
    pub client_key: Option<String>,
    pub home_url: String,
    pub is_checkout: bool,
    pub is_order_pay: bool,
    pub total_amount: Decimal,
    pub test_mode: bool,
    pub method_token_field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_pay_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing: Option<BillingDetails>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CheckoutForm {
    pub title: String,
    pub params: CheckoutFormParams,
    /// Card input markup; the description carries a notice in test mode
    pub fields_html: String,
}

#[derive(Clone)]
pub struct CheckoutFormController {
    gateway: Arc<GatewayConfig>,
    store: StoreConfig,
}

impl CheckoutFormController {
    pub fn new(gateway: Arc<GatewayConfig>, store: StoreConfig) -> Self {
        Self { gateway, store }
    }

    /// The form is offered only when the gateway is enabled, the active mode
    /// has keys, and live payments are served over https.
    pub fn availability(&self) -> Result<(), FormUnavailable> {
        if !self.gateway.enabled {
            return Err(FormUnavailable::Disabled);
        }
        if !self.gateway.has_keys() {
            return Err(FormUnavailable::MissingKeys);
        }
        if self.gateway.mode() == GatewayMode::Live && !self.store.is_https() {
            return Err(FormUnavailable::InsecureStorefront);
        }
        Ok(())
    }

    pub fn form_for(
        &self,
        order: &OrderModel,
        page: FormPage,
        order_pay_url: Option<String>,
    ) -> Result<CheckoutForm, FormUnavailable> {
        self.availability()?;

        let credentials = self.gateway.credentials();
        let is_order_pay = page == FormPage::OrderPay;
        let params = CheckoutFormParams {
            public_key: credentials.public_key.to_string(),
            client_key: order.paymongo_client_key.clone(),
            home_url: self.store.home_url.trim_end_matches('/').to_string(),
            is_checkout: !is_order_pay,
            is_order_pay,
            total_amount: order.total_amount,
            test_mode: credentials.mode == GatewayMode::Test,
            method_token_field: METHOD_TOKEN_FIELD.to_string(),
            order_pay_url: order_pay_url.filter(|_| is_order_pay),
            billing: is_order_pay.then(|| BillingDetails::from(order)),
        };

        Ok(CheckoutForm {
            title: self.gateway.title.clone(),
            params,
            fields_html: self.fields_html(),
        })
    }

    /// Description paragraph plus the card input fieldset.
    pub fn fields_html(&self) -> String {
        let mut html = String::new();

        let mut description = escape_html(self.gateway.description.trim());
        if !description.is_empty() {
            if self.gateway.mode() == GatewayMode::Test {
                description.push_str(TEST_MODE_NOTICE);
            }
            html.push_str("<p>");
            html.push_str(description.trim());
            html.push_str("</p>");
        }

        html.push_str(&format!(
            concat!(
                "<fieldset id=\"cynder-{id}-form\" class=\"cynder-credit-card-form cynder-payment-form\" style=\"background:transparent;\">",
                "<div class=\"form-row form-row-wide\"><label>Card Number <span class=\"required\">*</span></label>",
                "<input id=\"paymongo_ccNo\" class=\"paymongo_ccNo\" type=\"text\" autocomplete=\"off\"></div>",
                "<div class=\"form-row form-row-first\"><label>Expiry Date <span class=\"required\">*</span></label>",
                "<input id=\"paymongo_expdate\" class=\"paymongo_expdate\" type=\"text\" autocomplete=\"off\" placeholder=\"MM / YY\"></div>",
                "<div class=\"form-row form-row-last\"><label>Card Code (CVC) <span class=\"required\">*</span></label>",
                "<input id=\"paymongo_cvv\" class=\"paymongo_cvv\" type=\"password\" autocomplete=\"off\" placeholder=\"CVC\"></div>",
                "<input type=\"hidden\" name=\"{field}\" id=\"{legacy}\" value=\"\">",
                "<div class=\"clear\"></div></fieldset>"
            ),
            id = GATEWAY_ID,
            field = METHOD_TOKEN_FIELD,
            legacy = LEGACY_METHOD_TOKEN_FIELD,
        ));

        html
    }

    /// Thank-you page heading for orders paid through this gateway; other
    /// orders keep the storefront's text.
    pub fn order_received_text(&self, order: &OrderModel, default_text: &str) -> String {
        if order.uses_gateway(GATEWAY_ID) {
            ORDER_RECEIVED_TEXT.to_string()
        } else {
            default_text.to_string()
        }
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
