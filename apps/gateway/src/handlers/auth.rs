//! Owner bootstrap, password login, session/profile endpoints, user
//! management, and invite lifecycle (all OWNER-scoped where noted in the
//! route taxonomy). Grounded on `auth-service/app/api/auth.py` and the
//! teacher's handler module shape (one struct per concern, async fns).

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::extract::{Extension, Path, State};
use axum::Json;
use chrono::{Duration as ChronoDuration, Utc};
use fabric_domain_identity::IdentityRepository;
use fabric_domain_models::{Invite, InviteStatus, Role, User};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::middleware::AuthenticatedUser;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SetupStatus {
    pub is_setup_complete: bool,
    pub owner_exists: bool,
    pub total_users: u64,
}

pub async fn setup_status(State(state): State<AppState>) -> Result<Json<SetupStatus>, ApiError> {
    let owner_exists = state.identity_store.owner_exists().await;
    let total_users = state.identity_store.count_users().await;
    Ok(Json(SetupStatus { is_setup_complete: owner_exists, owner_exists, total_users }))
}

#[derive(Debug, Deserialize)]
pub struct CreateOwnerRequest {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar_url: Option<String>,
    pub role: Role,
    pub is_active: bool,
    pub is_verified: bool,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            avatar_url: user.avatar_url,
            role: user.role,
            is_active: user.is_active,
            is_verified: user.is_verified,
        }
    }
}

pub async fn setup_owner(
    State(state): State<AppState>,
    Json(req): Json<CreateOwnerRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    if state.identity_store.owner_exists().await {
        return Err(ApiError::Validation("Setup already complete".to_string()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::Validation("password must be at least 8 characters".to_string()));
    }

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        username: User::normalize(&req.username),
        email: User::normalize(&req.email),
        password_hash: hash_password(&req.password)?,
        first_name: req.first_name,
        last_name: req.last_name,
        avatar_url: None,
        role: Role::Owner,
        is_active: true,
        is_verified: true,
        created_at: now,
        updated_at: now,
        last_login_at: None,
    };

    let user = state.identity_store.create_user(user).await?;
    info!(user_id = %user.id, "owner created via setup bootstrap");
    Ok(Json(user.into()))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username_or_email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub csrf_token: String,
    pub user: UserResponse,
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let normalized = User::normalize(&req.username_or_email);
    let user = match state.identity_store.find_user_by_username(&normalized).await {
        Some(user) => user,
        None => state.identity_store.find_user_by_email(&normalized).await.ok_or(ApiError::Unauthenticated)?,
    };

    if !user.is_active {
        return Err(ApiError::Unauthenticated);
    }
    if user.password_hash.is_empty() || !verify_password(&req.password, &user.password_hash) {
        return Err(ApiError::Unauthenticated);
    }

    let token = state
        .token_authority
        .issue_user_token(user.id, &user.username, user.role, ChronoDuration::hours(state.settings.jwt_expiration_hours))?;

    let mut updated = user.clone();
    updated.last_login_at = Some(Utc::now());
    let updated = state.identity_store.update_user(updated).await?;

    let csrf_token = hex::encode(Sha256::digest(Uuid::new_v4().as_bytes()));

    Ok(Json(LoginResponse { token, csrf_token, user: updated.into() }))
}

pub async fn verify(State(state): State<AppState>, body: String) -> Result<Json<serde_json::Value>, ApiError> {
    let token = body.trim().trim_matches('"');
    let claims = state.token_authority.verify(token).map_err(ApiError::from)?;
    Ok(Json(serde_json::json!({ "valid": true, "is_service": claims.is_service })))
}

pub async fn session(Extension(user): Extension<AuthenticatedUser>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "userId": user.user_id,
        "username": user.username,
        "role": user.role,
        "isService": user.is_service,
    }))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<UserResponse>, ApiError> {
    let user_id = user.user_id.ok_or(ApiError::Unauthenticated)?;
    let user = state.identity_store.find_user_by_id(user_id).await.ok_or(ApiError::NotFound)?;
    Ok(Json(user.into()))
}

#[derive(Debug, Deserialize)]
pub struct UpdateMeRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar_url: Option<String>,
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<UpdateMeRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let user_id = auth.user_id.ok_or(ApiError::Unauthenticated)?;
    let mut user = state.identity_store.find_user_by_id(user_id).await.ok_or(ApiError::NotFound)?;
    if let Some(first_name) = req.first_name {
        user.first_name = first_name;
    }
    if let Some(last_name) = req.last_name {
        user.last_name = last_name;
    }
    if let Some(avatar_url) = req.avatar_url {
        user.avatar_url = Some(avatar_url);
    }
    user.updated_at = Utc::now();
    let user = state.identity_store.update_user(user).await?;
    Ok(Json(user.into()))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let Some(user_id) = user.user_id {
        let _ = state.identity_provider.revoke_session(&user_id.to_string()).await;
    }
    Ok(Json(serde_json::json!({ "loggedOut": true })))
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<UserResponse>>, ApiError> {
    Ok(Json(state.identity_store.list_users().into_iter().map(UserResponse::from).collect()))
}

pub async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    if req.role == Role::Owner {
        return Err(ApiError::Validation("cannot create a second owner".to_string()));
    }
    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        username: User::normalize(&req.username),
        email: User::normalize(&req.email),
        password_hash: hash_password(&req.password)?,
        first_name: req.first_name,
        last_name: req.last_name,
        avatar_url: None,
        role: req.role,
        is_active: true,
        is_verified: false,
        created_at: now,
        updated_at: now,
        last_login_at: None,
    };
    let user = state.identity_store.create_user(user).await?;
    Ok(Json(user.into()))
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let mut user = state.identity_store.find_user_by_id(user_id).await.ok_or(ApiError::NotFound)?;
    if user.role == Role::Owner && req.role.is_some_and(|r| r != Role::Owner) {
        return Err(ApiError::Validation("cannot demote the sole owner".to_string()));
    }
    if let Some(first_name) = req.first_name {
        user.first_name = first_name;
    }
    if let Some(last_name) = req.last_name {
        user.last_name = last_name;
    }
    if let Some(role) = req.role {
        user.role = role;
    }
    if let Some(is_active) = req.is_active {
        user.is_active = is_active;
    }
    user.updated_at = Utc::now();
    let user = state.identity_store.update_user(user).await?;
    Ok(Json(user.into()))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if caller.user_id == Some(user_id) {
        return Err(ApiError::Validation("a user cannot delete itself".to_string()));
    }
    let user = state.identity_store.find_user_by_id(user_id).await.ok_or(ApiError::NotFound)?;
    if user.role == Role::Owner {
        return Err(ApiError::Validation("cannot delete the sole owner".to_string()));
    }
    state.identity_store.delete_user(user_id).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[derive(Debug, Deserialize)]
pub struct CreateInviteRequest {
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct InviteResponse {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub status: InviteStatus,
    pub expires_at: chrono::DateTime<Utc>,
}

impl From<Invite> for InviteResponse {
    fn from(invite: Invite) -> Self {
        Self { id: invite.id, email: invite.email, role: invite.role, status: invite.status, expires_at: invite.expires_at }
    }
}

pub async fn create_invite(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    Json(req): Json<CreateInviteRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.role == Role::Owner {
        return Err(ApiError::Validation("cannot invite a second owner".to_string()));
    }
    let normalized_email = User::normalize(&req.email);
    if let Some(existing) = state.identity_store.find_pending_invite_by_email(&normalized_email).await {
        if existing.effective_status(Utc::now()) == InviteStatus::Pending {
            return Err(ApiError::Conflict("a pending invite already exists for this email".to_string()));
        }
    }

    let raw_token = Uuid::new_v4().to_string();
    let hashed_token = hex::encode(Sha256::digest(raw_token.as_bytes()));
    let now = Utc::now();
    let inviter_name = caller.username.clone().unwrap_or_else(|| "owner".to_string());

    let invite = Invite {
        id: Uuid::new_v4(),
        email: normalized_email,
        role: req.role,
        status: InviteStatus::Pending,
        hashed_token,
        inviter_id: caller.user_id.ok_or(ApiError::Unauthenticated)?,
        inviter_display_name: inviter_name,
        created_at: now,
        expires_at: now + ChronoDuration::hours(state.settings.invite_expiration_hours),
        accepted_at: None,
    };
    let invite = state.identity_store.create_invite(invite).await?;
    Ok(Json(serde_json::json!({ "invite": InviteResponse::from(invite), "token": raw_token })))
}

pub async fn list_invites(State(state): State<AppState>) -> Json<Vec<InviteResponse>> {
    Json(state.identity_store.list_invites().into_iter().map(InviteResponse::from).collect())
}

pub async fn revoke_invite(
    State(state): State<AppState>,
    Path(invite_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut invite = state.identity_store.find_invite_by_id(invite_id).ok_or(ApiError::NotFound)?;
    invite.status = InviteStatus::Revoked;
    state.identity_store.update_invite(invite).await?;
    Ok(Json(serde_json::json!({ "revoked": true })))
}

pub async fn verify_invite(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let hashed_token = hex::encode(Sha256::digest(token.as_bytes()));
    let invite = state.identity_store.find_invite_by_hashed_token(&hashed_token).await.ok_or(ApiError::NotFound)?;
    if invite.effective_status(Utc::now()) != InviteStatus::Pending {
        return Err(ApiError::Validation("invite is no longer pending".to_string()));
    }
    Ok(Json(serde_json::json!({ "email": invite.email, "role": invite.role })))
}

#[derive(Debug, Deserialize)]
pub struct AcceptInviteRequest {
    pub token: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
}

pub async fn accept_invite(
    State(state): State<AppState>,
    Json(req): Json<AcceptInviteRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let hashed_token = hex::encode(Sha256::digest(req.token.as_bytes()));
    let mut invite = state.identity_store.find_invite_by_hashed_token(&hashed_token).await.ok_or(ApiError::NotFound)?;
    if invite.effective_status(Utc::now()) != InviteStatus::Pending {
        return Err(ApiError::Validation("invite is no longer pending".to_string()));
    }

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        username: User::normalize(&req.username),
        email: invite.email.clone(),
        password_hash: hash_password(&req.password)?,
        first_name: req.first_name,
        last_name: req.last_name,
        avatar_url: None,
        role: invite.role,
        is_active: true,
        is_verified: true,
        created_at: now,
        updated_at: now,
        last_login_at: None,
    };
    let user = state.identity_store.create_user(user).await?;

    invite.status = InviteStatus::Accepted;
    invite.accepted_at = Some(now);
    state.identity_store.update_invite(invite).await?;

    info!(user_id = %user.id, "invite accepted");
    Ok(Json(user.into()))
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| ApiError::Internal(anyhow::anyhow!("password hashing failed: {err}")))
}

fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        warn!("stored password hash is not valid argon2 encoding");
        return false;
    };
    Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
}
