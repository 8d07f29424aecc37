//! Value objects for the marketplace domain.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest accepted image data URL, in characters (~5 MB once decoded).
pub const MAX_IMAGE_URL_LEN: usize = 7_000_000;

pub const DEFAULT_PROFILE_IMAGE: &str = "/images/default-profile.png";

const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp", ".svg"];

/// Email address, trimmed and lower-cased.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl Email {
    pub fn parse(value: impl AsRef<str>) -> Result<Self, EmailError> {
        let value = value.as_ref().trim().to_lowercase();
        if value.is_empty() { return Err(EmailError::Empty); }
        let (local, domain) = value.split_once('@').ok_or(EmailError::Malformed)?;
        if local.is_empty() || domain.is_empty() || domain.contains('@') || !domain.contains('.') {
            return Err(EmailError::Malformed);
        }
        Ok(Self(value))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl TryFrom<String> for Email {
    type Error = EmailError;
    fn try_from(value: String) -> Result<Self, Self::Error> { Self::parse(value) }
}

impl From<Email> for String {
    fn from(email: Email) -> Self { email.0 }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmailError {
    #[error("email is required")]
    Empty,
    #[error("email address is malformed")]
    Malformed,
}

/// Strictly positive product price, bounded by the `NUMERIC(12, 2)` money columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Price(Decimal);

impl Price {
    /// 9,999,999,999.99
    pub const MAX: Decimal = Decimal::from_parts(0xD4A5_0FFF, 0xE8, 0, false, 2);

    pub fn new(amount: Decimal) -> Result<Self, PriceError> {
        let amount = amount.round_dp(2);
        if amount <= Decimal::ZERO { return Err(PriceError::NotPositive); }
        if amount > Self::MAX { return Err(PriceError::TooLarge); }
        Ok(Self(amount))
    }
    pub fn amount(&self) -> Decimal { self.0 }
    /// `None` when the product does not fit in a `Decimal`.
    pub fn times(&self, qty: Quantity) -> Option<Decimal> { self.0.checked_mul(Decimal::from(qty.value())) }
}

impl TryFrom<Decimal> for Price {
    type Error = PriceError;
    fn try_from(value: Decimal) -> Result<Self, Self::Error> { Self::new(value) }
}

impl From<Price> for Decimal {
    fn from(price: Price) -> Self { price.0 }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PriceError {
    #[error("price must be greater than 0")]
    NotPositive,
    #[error("price must not exceed 9999999999.99")]
    TooLarge,
}

/// Line-item quantity, always at least one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i32")]
pub struct Quantity(i32);

impl Quantity {
    pub fn new(value: i64) -> Result<Self, QuantityError> {
        if value <= 0 { return Err(QuantityError::NotPositive); }
        i32::try_from(value).map(Self).map_err(|_| QuantityError::TooLarge)
    }
    pub fn value(&self) -> i32 { self.0 }
    pub fn add(&self, other: Quantity) -> Result<Self, QuantityError> {
        self.0.checked_add(other.0).map(Self).ok_or(QuantityError::TooLarge)
    }
}

impl TryFrom<i64> for Quantity {
    type Error = QuantityError;
    fn try_from(value: i64) -> Result<Self, Self::Error> { Self::new(value) }
}

impl From<Quantity> for i32 {
    fn from(qty: Quantity) -> Self { qty.0 }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("quantity must be greater than 0")]
    NotPositive,
    #[error("quantity is too large")]
    TooLarge,
}

/// Product image carried inline as a `data:image/...;base64,` URL.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ImagePayload(String);

impl ImagePayload {
    pub fn parse(data_url: impl Into<String>) -> Result<Self, ImageError> {
        let data_url = data_url.into();
        if !data_url.starts_with("data:image/") { return Err(ImageError::NotDataUrl); }
        if data_url.len() > MAX_IMAGE_URL_LEN { return Err(ImageError::TooLarge); }
        let mut parts = data_url.split(',');
        let (Some(_header), Some(body), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(ImageError::NotDataUrl);
        };
        STANDARD.decode(body).map_err(|_| ImageError::NotBase64)?;
        Ok(Self(data_url))
    }
    pub fn as_str(&self) -> &str { &self.0 }
    pub fn into_inner(self) -> String { self.0 }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("must be a data:image URL")]
    NotDataUrl,
    #[error("must be a valid base64 encoded image")]
    NotBase64,
    #[error("exceeds size limit")]
    TooLarge,
}

/// Reference to a user's profile picture: inline data URL, absolute URL or site path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileImage(String);

impl ProfileImage {
    /// Blank input falls back to [`DEFAULT_PROFILE_IMAGE`].
    pub fn parse(value: &str) -> Result<Self, ImageError> {
        let value = value.trim();
        if value.is_empty() { return Ok(Self::default()); }
        if value.starts_with("data:image/") { return Ok(Self(value.to_string())); }
        let addressable = value.starts_with('/') || value.starts_with("http://") || value.starts_with("https://");
        let lower = value.to_lowercase();
        let path = lower.split(['?', '#']).next().unwrap_or_default();
        if addressable && IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
            Ok(Self(value.to_string()))
        } else {
            Err(ImageError::NotDataUrl)
        }
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl Default for ProfileImage {
    fn default() -> Self { Self(DEFAULT_PROFILE_IMAGE.to_string()) }
}

impl FromStr for ProfileImage {
    type Err = ImageError;
    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}
