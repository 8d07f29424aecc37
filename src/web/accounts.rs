//! Signup, signin, social login, profile and address handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use validator::Validate;

use crate::domain::aggregates::{Address, NewAddress, ProfileUpdate, User};
use crate::domain::ids::UserId;
use crate::domain::value_objects::{Email, ProfileImage};
use crate::error::Result;
use crate::services::accounts::{AccountService, Profile, Session, Signup};
use crate::state::AppState;
use crate::web::{CurrentUser, ValidJson};

#[derive(Debug, Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,
    #[validate(length(min = 1, message = "email is required"))]
    pub email: String,
    #[validate(length(min = 1, message = "password is required"))]
    pub password: String,
    #[serde(default)]
    pub profile_image_url: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub message: &'static str,
    pub id: UserId,
    pub name: String,
    pub email: Email,
    pub profile_image_url: ProfileImage,
}

pub async fn signup(State(state): State<AppState>, ValidJson(req): ValidJson<SignupRequest>) -> Result<(StatusCode, Json<SignupResponse>)> {
    let input = Signup {
        name: req.name,
        email: Email::parse(&req.email)?,
        password: req.password,
        profile_image_url: ProfileImage::parse(req.profile_image_url.as_deref().unwrap_or_default())?,
        phone: req.phone.filter(|p| !p.trim().is_empty()),
        address: req.address.filter(|a| !a.trim().is_empty()),
    };
    let user = AccountService::new(state.store.as_ref(), &state.tokens).signup(input).await?;
    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            message: "User created successfully",
            id: user.id,
            name: user.name,
            email: user.email,
            profile_image_url: user.profile_image_url,
        }),
    ))
}

#[derive(Debug, Deserialize, Validate)]
pub struct SigninRequest {
    #[validate(length(min = 1, message = "email is required"))]
    pub email: String,
    #[validate(length(min = 1, message = "password is required"))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub token_type: &'static str,
    pub token: String,
    pub id: UserId,
    pub name: String,
    pub email: Email,
    pub profile_image_url: ProfileImage,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        let User { id, name, email, profile_image_url, .. } = session.user;
        Self { token_type: "Bearer", token: session.token, id, name, email, profile_image_url }
    }
}

pub async fn signin(State(state): State<AppState>, ValidJson(req): ValidJson<SigninRequest>) -> Result<Json<SessionResponse>> {
    let email = Email::parse(&req.email)?;
    let session = AccountService::new(state.store.as_ref(), &state.tokens).signin(&email, &req.password).await?;
    Ok(Json(session.into()))
}

#[derive(Debug, Deserialize, Validate)]
pub struct SocialLoginRequest {
    #[validate(length(min = 1, message = "token is required"))]
    pub token: String,
    #[validate(length(min = 1, message = "provider is required"))]
    pub provider: String,
}

pub async fn social_login(State(state): State<AppState>, ValidJson(req): ValidJson<SocialLoginRequest>) -> Result<Json<SessionResponse>> {
    let session = AccountService::new(state.store.as_ref(), &state.tokens)
        .social_login(state.identity.as_deref(), &req.provider, &req.token)
        .await?;
    Ok(Json(session.into()))
}

pub async fn current_user(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> Result<Json<Profile>> {
    Ok(Json(AccountService::new(state.store.as_ref(), &state.tokens).profile(user).await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, message = "name is required"))]
    pub name: Option<String>,
    pub email: Option<String>,
    pub profile_image_url: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

pub async fn update_profile(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ValidJson(req): ValidJson<UpdateProfileRequest>,
) -> Result<Json<Value>> {
    let update = ProfileUpdate {
        name: req.name,
        email: req.email.as_deref().map(Email::parse).transpose()?,
        profile_image_url: req.profile_image_url.as_deref().map(ProfileImage::parse).transpose()?,
        phone: req.phone,
        address: req.address,
    };
    let user = AccountService::new(state.store.as_ref(), &state.tokens).update_profile(user, update).await?;
    Ok(Json(json!({ "message": "Profile updated successfully", "user": user })))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ProfileImageRequest {
    pub profile_image_url: String,
}

pub async fn update_profile_image(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ValidJson(req): ValidJson<ProfileImageRequest>,
) -> Result<Json<Value>> {
    let image = ProfileImage::parse(&req.profile_image_url)?;
    let user = AccountService::new(state.store.as_ref(), &state.tokens).update_profile_image(user, image).await?;
    Ok(Json(json!({ "message": "Profile image updated successfully", "profile_image_url": user.profile_image_url })))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "current password is required"))]
    pub current_password: String,
    #[validate(length(min = 1, message = "new password is required"))]
    pub new_password: String,
}

pub async fn change_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ValidJson(req): ValidJson<ChangePasswordRequest>,
) -> Result<Json<Value>> {
    AccountService::new(state.store.as_ref(), &state.tokens)
        .change_password(user, &req.current_password, &req.new_password)
        .await?;
    Ok(Json(json!({ "message": "Password changed successfully" })))
}

pub async fn list_addresses(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> Result<Json<Vec<Address>>> {
    Ok(Json(AccountService::new(state.store.as_ref(), &state.tokens).addresses(user).await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddressRequest {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[validate(length(min = 1, message = "address is required"))]
    pub address: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub postal_code: String,
    #[serde(default)]
    pub is_default: bool,
}

impl From<AddressRequest> for NewAddress {
    fn from(r: AddressRequest) -> Self {
        Self {
            first_name: r.first_name, last_name: r.last_name, email: r.email, phone: r.phone,
            address: r.address, city: r.city, postal_code: r.postal_code, is_default: r.is_default,
        }
    }
}

pub async fn add_address(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ValidJson(req): ValidJson<AddressRequest>,
) -> Result<(StatusCode, Json<Address>)> {
    let address = AccountService::new(state.store.as_ref(), &state.tokens).add_address(user, req.into()).await?;
    Ok((StatusCode::CREATED, Json(address)))
}
