//! Signup, signin, social login, profile and addresses.

use serde::Serialize;

use crate::domain::aggregates::{Address, NewAddress, NewUser, ProfileUpdate, User};
use crate::domain::ids::UserId;
use crate::domain::value_objects::{Email, ProfileImage};
use crate::error::{AppError, Result};
use crate::services::auth::{self, AuthError, IdentityVerifier, TokenService};
use crate::store::{Store, StoreError};

#[derive(Debug, Clone)]
pub struct Signup {
    pub name: String,
    pub email: Email,
    pub password: String,
    pub profile_image_url: ProfileImage,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    #[serde(flatten)]
    pub user: User,
    #[serde(rename = "address")]
    pub addresses: Vec<Address>,
}

pub struct AccountService<'a> {
    store: &'a dyn Store,
    tokens: &'a TokenService,
}

impl<'a> AccountService<'a> {
    pub fn new(store: &'a dyn Store, tokens: &'a TokenService) -> Self { Self { store, tokens } }

    pub async fn signup(&self, input: Signup) -> Result<User> {
        auth::ensure_password_strength(&input.password)?;
        let password_hash = auth::hash_password(&input.password)?;

        let initial_address = (input.phone.is_some() || input.address.is_some()).then(|| NewAddress {
            phone: input.phone.unwrap_or_default(),
            address: input.address.unwrap_or_default(),
            ..Default::default()
        });
        let user = self
            .store
            .create_user(NewUser {
                name: input.name.trim().to_string(),
                email: input.email,
                password_hash: Some(password_hash),
                profile_image_url: input.profile_image_url,
                initial_address,
            })
            .await?;
        tracing::info!(user_id = %user.id, "user signed up");
        Ok(user)
    }

    pub async fn signin(&self, email: &Email, password: &str) -> Result<Session> {
        let creds = self.store.credentials(email).await?.ok_or(AuthError::InvalidCredentials)?;
        let hash = creds.password_hash.as_deref().ok_or(AuthError::InvalidCredentials)?;
        if let Err(e) = auth::verify_password(password, hash) {
            tracing::warn!(user_id = %creds.user.id, "signin rejected");
            return Err(e.into());
        }
        let token = self.tokens.issue(&creds.user)?;
        Ok(Session { token, user: creds.user })
    }

    /// Signs in with a verified third-party identity, creating the account on first use.
    pub async fn social_login(&self, verifier: Option<&dyn IdentityVerifier>, provider: &str, token: &str) -> Result<Session> {
        let verifier = verifier.ok_or(AuthError::IdentityUnavailable)?;
        let identity = verifier.verify(provider, token).await?;

        let user = match self.store.credentials(&identity.email).await? {
            Some(creds) => creds.user,
            None => {
                let name = identity
                    .name
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| identity.email.as_str().split('@').next().unwrap_or_default().to_string());
                let profile_image_url = identity.picture.as_deref().and_then(|p| ProfileImage::parse(p).ok()).unwrap_or_default();
                let new = NewUser { name, email: identity.email.clone(), password_hash: None, profile_image_url, initial_address: None };
                match self.store.create_user(new).await {
                    Ok(user) => {
                        tracing::info!(user_id = %user.id, provider, "user created via social login");
                        user
                    }
                    // Lost a race with a concurrent first login.
                    Err(StoreError::Conflict(_)) => {
                        self.store.credentials(&identity.email).await?.ok_or(AuthError::InvalidCredentials)?.user
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };
        let token = self.tokens.issue(&user)?;
        Ok(Session { token, user })
    }

    pub async fn profile(&self, id: UserId) -> Result<Profile> {
        let user = self.store.user(id).await?.ok_or(StoreError::NotFound("user"))?;
        let addresses = self.store.addresses(id).await?;
        Ok(Profile { user, addresses })
    }

    pub async fn update_profile(&self, id: UserId, update: ProfileUpdate) -> Result<User> {
        if update.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(AppError::BadRequest("name is required".into()));
        }
        Ok(self.store.update_profile(id, update).await?)
    }

    pub async fn update_profile_image(&self, id: UserId, image: ProfileImage) -> Result<User> {
        let update = ProfileUpdate { profile_image_url: Some(image), ..Default::default() };
        Ok(self.store.update_profile(id, update).await?)
    }

    pub async fn change_password(&self, id: UserId, current: &str, new: &str) -> Result<()> {
        let user = self.store.user(id).await?.ok_or(StoreError::NotFound("user"))?;
        let creds = self.store.credentials(&user.email).await?.ok_or(StoreError::NotFound("user"))?;
        let hash = creds.password_hash.as_deref().ok_or_else(|| AppError::BadRequest("account has no password set".into()))?;
        auth::verify_password(current, hash).map_err(|_| AppError::Unauthorized("current password is incorrect".into()))?;
        auth::ensure_password_strength(new)?;
        self.store.set_password_hash(id, &auth::hash_password(new)?).await?;
        tracing::info!(user_id = %id, "password changed");
        Ok(())
    }

    pub async fn addresses(&self, id: UserId) -> Result<Vec<Address>> { Ok(self.store.addresses(id).await?) }

    pub async fn add_address(&self, id: UserId, new: NewAddress) -> Result<Address> {
        if new.address.trim().is_empty() {
            return Err(AppError::BadRequest("address is required".into()));
        }
        Ok(self.store.add_address(id, new).await?)
    }
}
