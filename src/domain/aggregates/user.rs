//! User and Address

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ids::{AddressId, UserId};
use crate::domain::value_objects::{Email, ProfileImage};

#[derive(Clone, Debug, Serialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: Email,
    pub profile_image_url: ProfileImage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user together with the stored password hash. Social-login accounts have none.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub user: User,
    pub password_hash: Option<String>,
}

#[derive(Clone, Debug)]
pub struct NewUser {
    pub name: String,
    pub email: Email,
    pub password_hash: Option<String>,
    pub profile_image_url: ProfileImage,
    pub initial_address: Option<NewAddress>,
}

/// Partial profile update; `None` leaves the field untouched.
#[derive(Clone, Debug, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<Email>,
    pub profile_image_url: Option<ProfileImage>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct Address {
    pub id: AddressId,
    pub user_id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub postal_code: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewAddress {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub postal_code: String,
    pub is_default: bool,
}

impl NewAddress {
    /// Checkout requires every field of an inline shipping address.
    pub fn is_complete(&self) -> bool {
        [&self.first_name, &self.last_name, &self.email, &self.phone, &self.address, &self.city, &self.postal_code]
            .iter()
            .all(|f| !f.trim().is_empty())
    }

    pub fn into_address(self, user_id: UserId, is_default: bool) -> Address {
        Address {
            id: AddressId::generate(), user_id, first_name: self.first_name, last_name: self.last_name,
            email: self.email, phone: self.phone, address: self.address, city: self.city,
            postal_code: self.postal_code, is_default, created_at: Utc::now(),
        }
    }
}

/// Default address first, otherwise the oldest one.
pub fn resolve_shipping_address(addresses: &[Address]) -> Option<&Address> {
    addresses
        .iter()
        .find(|a| a.is_default)
        .or_else(|| addresses.iter().min_by_key(|a| a.created_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn addr(user: UserId, line: &str, is_default: bool, age_minutes: i64) -> Address {
        let mut a = NewAddress { address: line.into(), ..Default::default() }.into_address(user, is_default);
        a.created_at = Utc::now() - Duration::minutes(age_minutes);
        a
    }

    #[test]
    fn shipping_prefers_default_then_oldest() {
        let user = UserId::generate();
        assert!(resolve_shipping_address(&[]).is_none());

        let list = vec![addr(user, "newer", false, 1), addr(user, "older", false, 10)];
        assert_eq!(resolve_shipping_address(&list).unwrap().address, "older");

        let list = vec![addr(user, "older", false, 10), addr(user, "home", true, 1)];
        assert_eq!(resolve_shipping_address(&list).unwrap().address, "home");
    }

    #[test]
    fn inline_address_must_be_complete() {
        let mut a = NewAddress {
            first_name: "Ada".into(), last_name: "L".into(), email: "ada@example.com".into(), phone: "0800".into(),
            address: "1 Main St".into(), city: "Bangkok".into(), postal_code: "10110".into(), is_default: false,
        };
        assert!(a.is_complete());
        a.city = "  ".into();
        assert!(!a.is_complete());
    }
}
