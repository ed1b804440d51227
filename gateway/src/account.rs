//! Caller identity supplied by the account layer in front of the relay.
//!
//! The relay does not authenticate anyone. It trusts the headers the
//! account layer sets after doing so.

use axum::http::HeaderMap;
use relay_common::Tier;

use crate::error::{Result, ServiceError};

pub const ACCOUNT_ID_HEADER: &str = "x-account-id";
pub const ACCOUNT_TIER_HEADER: &str = "x-account-tier";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub tier: Tier,
}

impl Account {
    /// Read the account from request headers.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self> {
        let id = header_value(headers, ACCOUNT_ID_HEADER)?;
        let tier = header_value(headers, ACCOUNT_TIER_HEADER)?;
        let tier = Tier::parse(tier).ok_or_else(|| {
            ServiceError::InvalidRequest(format!("unknown account tier: {tier}"))
        })?;

        Ok(Self {
            id: id.to_string(),
            tier,
        })
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str> {
    let value = headers
        .get(name)
        .ok_or_else(|| ServiceError::InvalidRequest(format!("missing {name} header")))?
        .to_str()
        .map_err(|_| ServiceError::InvalidRequest(format!("invalid {name} header")))?
        .trim();

    if value.is_empty() {
        return Err(ServiceError::InvalidRequest(format!("empty {name} header")));
    }
    Ok(value)
}
