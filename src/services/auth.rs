use chrono::{DateTime, Months, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::entities::user::{self, UserRole};
use crate::entities::{admin, caretaker, doctor, owner, password_reset};
use crate::error::{AppError, AppResult};
use crate::services::mailer::{self, Mailer};
use crate::utils::jwt::{Claims, TokenPurpose, TokenService};
use crate::utils::password::{hash_password_blocking, verify_password_blocking, MIN_PASSWORD_LENGTH};

pub const MINIMUM_AGE_YEARS: u32 = 18;

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
    #[validate(length(min = 8, message = "must be at least 8 characters"))]
    pub password: String,
    #[validate(length(min = 1, max = 100, message = "must be between 1 and 100 characters"))]
    pub name: String,
    pub birth_date: NaiveDate,
    #[validate(length(min = 3, max = 32, message = "must be between 3 and 32 characters"))]
    pub telephone: String,
    #[validate(length(min = 1, message = "must not be empty"))]
    pub address: String,
    // caretaker and doctor
    pub start_work_time: Option<NaiveTime>,
    pub end_work_time: Option<NaiveTime>,
    // caretaker
    pub specialization: Option<String>,
    // doctor
    pub license_number: Option<String>,
    pub start_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserInfo,
}

#[derive(Debug, Serialize)]
pub struct UserInfo {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: UserRole,
}

impl From<user::Model> for UserInfo {
    fn from(user: user::Model) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            role: user.role,
        }
    }
}

/// Role row to create next to the user row.
#[derive(Debug, Clone, PartialEq)]
pub enum RoleProfile {
    Owner,
    Caretaker {
        specialization: String,
        start_work_time: NaiveTime,
        end_work_time: NaiveTime,
    },
    Doctor {
        license_number: String,
        start_date: NaiveDate,
        start_work_time: NaiveTime,
        end_work_time: NaiveTime,
    },
    Admin,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// True once the 18th birthday has been reached on `today`. A 29 February
/// birthday rolls to 28 February in non-leap years.
pub fn is_adult(birth_date: NaiveDate, today: NaiveDate) -> bool {
    birth_date
        .checked_add_months(Months::new(MINIMUM_AGE_YEARS * 12))
        .is_some_and(|adult_on| adult_on <= today)
}

fn work_hours(req: &RegisterRequest) -> AppResult<(NaiveTime, NaiveTime)> {
    let (Some(start), Some(end)) = (req.start_work_time, req.end_work_time) else {
        return Err(AppError::Unprocessable(
            "start_work_time and end_work_time are required for staff".to_string(),
        ));
    };

    if end <= start {
        return Err(AppError::Unprocessable(
            "end_work_time must be after start_work_time".to_string(),
        ));
    }

    Ok((start, end))
}

pub fn validate_registration(
    role: UserRole,
    req: &RegisterRequest,
    today: NaiveDate,
) -> AppResult<RoleProfile> {
    req.validate()?;

    if !is_adult(req.birth_date, today) {
        return Err(AppError::Unprocessable(
            "birth_date: must be at least 18 years old".to_string(),
        ));
    }

    match role {
        UserRole::Owner => Ok(RoleProfile::Owner),
        UserRole::Admin => Ok(RoleProfile::Admin),
        UserRole::Caretaker => {
            let (start_work_time, end_work_time) = work_hours(req)?;
            let specialization = req
                .specialization
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| AppError::Unprocessable("specialization: must not be empty".to_string()))?;

            Ok(RoleProfile::Caretaker {
                specialization: specialization.to_string(),
                start_work_time,
                end_work_time,
            })
        }
        UserRole::Doctor => {
            let (start_work_time, end_work_time) = work_hours(req)?;
            let license_number = req
                .license_number
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| AppError::Unprocessable("license_number: must not be empty".to_string()))?;

            Ok(RoleProfile::Doctor {
                license_number: license_number.to_string(),
                start_date: req.start_date.unwrap_or(today),
                start_work_time,
                end_work_time,
            })
        }
    }
}

async fn insert_role_row<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    profile: RoleProfile,
    now: DateTime<Utc>,
) -> AppResult<()> {
    match profile {
        RoleProfile::Owner => {
            owner::ActiveModel {
                user_id: Set(user_id),
                total_spending: Set(Decimal::ZERO),
            }
            .insert(db)
            .await?;
        }
        RoleProfile::Caretaker {
            specialization,
            start_work_time,
            end_work_time,
        } => {
            caretaker::ActiveModel {
                user_id: Set(user_id),
                specialization: Set(specialization),
                start_work_time: Set(start_work_time),
                end_work_time: Set(end_work_time),
                rating: Set(Decimal::ZERO),
                updated_at: Set(now.into()),
            }
            .insert(db)
            .await?;
        }
        RoleProfile::Doctor {
            license_number,
            start_date,
            start_work_time,
            end_work_time,
        } => {
            doctor::ActiveModel {
                user_id: Set(user_id),
                license_number: Set(license_number),
                start_date: Set(start_date),
                start_work_time: Set(start_work_time),
                end_work_time: Set(end_work_time),
                updated_at: Set(now.into()),
            }
            .insert(db)
            .await?;
        }
        RoleProfile::Admin => {
            admin::ActiveModel {
                user_id: Set(user_id),
            }
            .insert(db)
            .await?;
        }
    }

    Ok(())
}

pub async fn find_by_email_and_role<C: ConnectionTrait>(
    db: &C,
    email: &str,
    role: UserRole,
) -> AppResult<Option<user::Model>> {
    Ok(user::Entity::find()
        .filter(user::Column::Email.eq(normalize_email(email)))
        .filter(user::Column::Role.eq(role))
        .one(db)
        .await?)
}

/// Creates the user row and its role row in one transaction.
pub async fn register(
    db: &DatabaseConnection,
    tokens: &TokenService,
    role: UserRole,
    req: RegisterRequest,
    now: DateTime<Utc>,
) -> AppResult<AuthResponse> {
    let profile = validate_registration(role, &req, now.date_naive())?;
    let email = normalize_email(&req.email);

    if find_by_email_and_role(db, &email, role).await?.is_some() {
        return Err(AppError::Conflict(
            "Email already registered for this role".to_string(),
        ));
    }

    let password_hash = hash_password_blocking(req.password).await?;

    let txn = db.begin().await?;

    let user = user::ActiveModel {
        id: Set(Uuid::new_v4()),
        email: Set(email),
        password_hash: Set(password_hash),
        role: Set(role),
        name: Set(req.name.trim().to_string()),
        birth_date: Set(req.birth_date),
        telephone: Set(req.telephone),
        address: Set(req.address),
        profile_image_url: Set(None),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(&txn)
    .await?;

    insert_role_row(&txn, user.id, profile, now).await?;
    txn.commit().await?;

    tracing::info!(user_id = %user.id, role = ?role, "User registered");

    let token = tokens.issue(user.id, role, TokenPurpose::Access, None, now)?;

    Ok(AuthResponse {
        token,
        user: user.into(),
    })
}

pub async fn login(
    db: &DatabaseConnection,
    tokens: &TokenService,
    role: UserRole,
    req: LoginRequest,
) -> AppResult<AuthResponse> {
    let invalid = || AppError::Unauthorized("Invalid email or password".to_string());

    let Some(user) = find_by_email_and_role(db, &req.email, role).await? else {
        tracing::warn!(role = ?role, "Login attempt for unknown account");
        return Err(invalid());
    };

    if !verify_password_blocking(req.password, user.password_hash.clone()).await? {
        tracing::warn!(user_id = %user.id, "Login failed: wrong password");
        return Err(invalid());
    }

    let token = tokens.issue_access(user.id, user.role)?;

    Ok(AuthResponse {
        token,
        user: user.into(),
    })
}

/// Verifies an access token and that its subject still exists.
pub async fn check_token<C: ConnectionTrait>(
    db: &C,
    tokens: &TokenService,
    token: &str,
) -> AppResult<(Claims, user::Model)> {
    let claims = tokens.verify(token, TokenPurpose::Access)?;

    let user = user::Entity::find_by_id(claims.sub)
        .one(db)
        .await?
        .filter(|u| u.role == claims.role)
        .ok_or_else(|| AppError::Unauthorized("User no longer exists".to_string()))?;

    Ok((claims, user))
}

/// Issues a single-use reset token and mails it. Unknown accounts are
/// answered the same way so the endpoint does not reveal who is registered.
pub async fn request_password_reset(
    db: &DatabaseConnection,
    tokens: &TokenService,
    mailer: &dyn Mailer,
    frontend_url: &str,
    email: &str,
    role: UserRole,
    now: DateTime<Utc>,
) -> AppResult<()> {
    let Some(user) = find_by_email_and_role(db, email, role).await? else {
        tracing::info!(role = ?role, "Password reset requested for unknown account");
        return Ok(());
    };

    let nonce = Uuid::new_v4();
    let txn = db.begin().await?;

    password_reset::Entity::delete_many()
        .filter(password_reset::Column::UserId.eq(user.id))
        .filter(password_reset::Column::ConsumedAt.is_null())
        .exec(&txn)
        .await?;

    password_reset::ActiveModel {
        nonce: Set(nonce),
        user_id: Set(user.id),
        expires_at: Set((now + TokenPurpose::Reset.lifetime()).into()),
        consumed_at: Set(None),
        created_at: Set(now.into()),
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;

    let token = tokens.issue(user.id, user.role, TokenPurpose::Reset, Some(nonce), now)?;
    mailer
        .send(mailer::password_reset_email(&user.email, frontend_url, &token))
        .await?;

    tracing::info!(user_id = %user.id, "Password reset email sent");
    Ok(())
}

pub fn ensure_nonce_usable(
    nonce: &password_reset::Model,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> AppResult<()> {
    let usable = nonce.user_id == user_id
        && nonce.consumed_at.is_none()
        && nonce.expires_at.with_timezone(&Utc) > now;

    if usable {
        Ok(())
    } else {
        Err(AppError::Unauthorized(
            "Reset link is invalid or has already been used".to_string(),
        ))
    }
}

pub async fn reset_password(
    db: &DatabaseConnection,
    tokens: &TokenService,
    token: &str,
    new_password: String,
    now: DateTime<Utc>,
) -> AppResult<()> {
    let claims = tokens.verify(token, TokenPurpose::Reset)?;
    let nonce_id = claims
        .nonce
        .ok_or_else(|| AppError::Unauthorized("Reset token carries no nonce".to_string()))?;

    if new_password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AppError::Unprocessable(
            "password: must be at least 8 characters".to_string(),
        ));
    }

    let password_hash = hash_password_blocking(new_password).await?;

    let txn = db.begin().await?;

    let nonce = password_reset::Entity::find_by_id(nonce_id)
        .lock_exclusive()
        .one(&txn)
        .await?
        .ok_or_else(|| {
            AppError::Unauthorized("Reset link is invalid or has already been used".to_string())
        })?;
    ensure_nonce_usable(&nonce, claims.sub, now)?;

    let user = user::Entity::find_by_id(claims.sub)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::Unauthorized("User no longer exists".to_string()))?;

    let mut nonce: password_reset::ActiveModel = nonce.into();
    nonce.consumed_at = Set(Some(now.into()));
    nonce.update(&txn).await?;

    let mut user: user::ActiveModel = user.into();
    user.password_hash = Set(password_hash);
    user.updated_at = Set(now.into());
    let user = user.update(&txn).await?;

    txn.commit().await?;

    tracing::info!(user_id = %user.id, "Password reset");
    Ok(())
}

/// Creates the bootstrap admin unless one with that email already exists.
pub async fn seed_admin(
    db: &DatabaseConnection,
    email: &str,
    password: &str,
    now: DateTime<Utc>,
) -> AppResult<()> {
    if find_by_email_and_role(db, email, UserRole::Admin).await?.is_some() {
        tracing::debug!("Bootstrap admin already exists");
        return Ok(());
    }

    let password_hash = hash_password_blocking(password.to_string()).await?;
    let birth_date = NaiveDate::from_ymd_opt(1970, 1, 1)
        .ok_or_else(|| AppError::Internal("Invalid bootstrap birth date".to_string()))?;

    let txn = db.begin().await?;

    let user = user::ActiveModel {
        id: Set(Uuid::new_v4()),
        email: Set(normalize_email(email)),
        password_hash: Set(password_hash),
        role: Set(UserRole::Admin),
        name: Set("Administrator".to_string()),
        birth_date: Set(birth_date),
        telephone: Set("-".to_string()),
        address: Set("-".to_string()),
        profile_image_url: Set(None),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(&txn)
    .await?;

    insert_role_row(&txn, user.id, RoleProfile::Admin, now).await?;
    txn.commit().await?;

    tracing::info!(user_id = %user.id, "Bootstrap admin created");
    Ok(())
}
