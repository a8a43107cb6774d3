use std::time::{Duration, SystemTime};

use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::models::{PendingTokenEntity, RelationshipEntity, UserEntity},
    dto::{
        auth::{LoginRequest, LoginResponse, RegisterRequest, ResetPasswordRequest},
        profile::ProfileResponse,
    },
    error::ServiceError,
    services::{
        credentials::{digest_hex, hash_password, matches_digest, random_token, verify_password},
        mailer::{MailKind, OutgoingMail},
        profile_service::modify_user,
    },
    state::{SharedState, tokens::AuthSession},
};

const INVALID_CREDENTIALS: &str = "invalid email or password";
const INVALID_TOKEN: &str = "invalid or expired token";

/// Create an unverified account and mail its verification link.
pub async fn register(
    state: &SharedState,
    request: RegisterRequest,
) -> Result<ProfileResponse, ServiceError> {
    let RegisterRequest {
        email,
        password,
        name,
        phone,
        sex,
    } = request;

    let email = normalise_email(&email);
    ensure_password_strength(state, &password)?;

    let now = SystemTime::now();
    let id = Uuid::new_v4();
    let password_hash = hash_password(&password)?;
    let (token, pending) = issue_pending_token(id, state.config().verification_ttl);
    let user = UserEntity {
        id,
        email: email.clone(),
        password_hash,
        name: name.trim().to_string(),
        phone: phone.map(|phone| phone.trim().to_string()),
        sex: sex.trim().to_string(),
        profile_image: None,
        email_verified: false,
        relationship: RelationshipEntity::Single,
        partner_code: None,
        verification: Some(pending),
        password_reset: None,
        created_at: now,
        updated_at: now,
        revision: 0,
    };

    let store = state.require_store().await?;
    if !store.insert_user(user.clone()).await? {
        return Err(ServiceError::InvalidState(format!(
            "email `{email}` is already registered"
        )));
    }
    info!(uid = %id, "account registered");

    send_mail(state, &email, MailKind::Verification, &token).await;
    Ok(user.into())
}

/// Confirm an email address from the token of a verification link.
///
/// Verifying an already verified account succeeds without a write.
pub async fn verify_email(state: &SharedState, token: &str) -> Result<ProfileResponse, ServiceError> {
    let (uid, secret) = split_token(token)?;
    let user = modify_user(state, uid, |user| {
        if user.email_verified {
            return Ok(false);
        }
        check_pending(user.verification.as_ref(), secret)?;
        user.email_verified = true;
        user.verification = None;
        Ok(true)
    })
    .await
    .map_err(hide_missing_user)?;

    state.tokens().mark_verified(uid);
    info!(%uid, "email verified");
    Ok(user.into())
}

/// Mail a new verification link unless one went out within the cooldown.
pub async fn resend_verification(state: &SharedState, uid: Uuid) -> Result<(), ServiceError> {
    let cooldown = state.config().verification_resend_cooldown;
    let ttl = state.config().verification_ttl;
    let mut issued = None;
    let user = modify_user(state, uid, |user| {
        if user.email_verified {
            return Err(ServiceError::InvalidState("email is already verified".into()));
        }
        if let Some(pending) = &user.verification {
            let elapsed = SystemTime::now()
                .duration_since(pending.issued_at)
                .unwrap_or_default();
            if elapsed < cooldown {
                return Err(ServiceError::InvalidState(format!(
                    "a verification email was sent recently, retry in {}s",
                    (cooldown - elapsed).as_secs().max(1)
                )));
            }
        }
        let (token, pending) = issue_pending_token(user.id, ttl);
        user.verification = Some(pending);
        issued = Some(token);
        Ok(true)
    })
    .await?;

    if let Some(token) = issued {
        send_mail(state, &user.email, MailKind::Verification, &token).await;
    }
    Ok(())
}

/// Exchange credentials for a bearer token.
pub async fn login(state: &SharedState, request: LoginRequest) -> Result<LoginResponse, ServiceError> {
    let store = state.require_store().await?;
    let email = normalise_email(&request.email);
    let Some(user) = store.find_user_by_email(email).await? else {
        return Err(ServiceError::Unauthorized(INVALID_CREDENTIALS.into()));
    };
    if !verify_password(&request.password, &user.password_hash) {
        return Err(ServiceError::Unauthorized(INVALID_CREDENTIALS.into()));
    }

    let token = state.tokens().issue(user.id, user.email_verified);
    info!(uid = %user.id, "user logged in");
    Ok(LoginResponse {
        token,
        profile: user.into(),
    })
}

/// Revoke the presented bearer token.
pub fn logout(state: &SharedState, token: &str) {
    state.tokens().revoke(token);
}

/// Mail a password reset link when `email` belongs to an account.
///
/// Unknown addresses succeed silently so the endpoint cannot be used to discover
/// accounts.
pub async fn request_password_reset(state: &SharedState, email: &str) -> Result<(), ServiceError> {
    let store = state.require_store().await?;
    let Some(user) = store.find_user_by_email(normalise_email(email)).await? else {
        info!("password reset requested for an unknown email");
        return Ok(());
    };

    let ttl = state.config().password_reset_ttl;
    let mut issued = None;
    let user = modify_user(state, user.id, |user| {
        let (token, pending) = issue_pending_token(user.id, ttl);
        user.password_reset = Some(pending);
        issued = Some(token);
        Ok(true)
    })
    .await?;

    if let Some(token) = issued {
        send_mail(state, &user.email, MailKind::PasswordReset, &token).await;
    }
    Ok(())
}

/// Replace the password using a reset token and sign out every device.
pub async fn reset_password(
    state: &SharedState,
    request: ResetPasswordRequest,
) -> Result<(), ServiceError> {
    let (uid, secret) = split_token(&request.token)?;
    ensure_password_strength(state, &request.new_password)?;
    let password_hash = hash_password(&request.new_password)?;

    modify_user(state, uid, |user| {
        check_pending(user.password_reset.as_ref(), secret)?;
        user.password_hash = password_hash.clone();
        user.password_reset = None;
        Ok(true)
    })
    .await
    .map_err(hide_missing_user)?;

    state.tokens().revoke_all(uid);
    info!(%uid, "password reset");
    Ok(())
}

/// Resolve a bearer token into the identity it was issued for.
pub fn authenticate(state: &SharedState, token: &str) -> Result<AuthSession, ServiceError> {
    state
        .tokens()
        .resolve(token)
        .ok_or_else(|| ServiceError::Unauthorized("invalid or expired bearer token".into()))
}

/// Trimmed, lower-cased form under which emails are stored and looked up.
pub fn normalise_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn ensure_password_strength(state: &SharedState, password: &str) -> Result<(), ServiceError> {
    let min = state.config().min_password_len;
    if password.chars().count() < min {
        return Err(ServiceError::InvalidInput(format!(
            "password must be at least {min} characters long"
        )));
    }
    Ok(())
}

/// Mailed tokens read `<uid>.<secret>`; only a digest of the secret is stored.
fn issue_pending_token(uid: Uuid, ttl: Duration) -> (String, PendingTokenEntity) {
    let secret = random_token();
    let issued_at = SystemTime::now();
    let pending = PendingTokenEntity {
        digest: digest_hex(&secret),
        issued_at,
        expires_at: issued_at + ttl,
    };
    (format!("{uid}.{secret}"), pending)
}

fn split_token(token: &str) -> Result<(Uuid, &str), ServiceError> {
    let (uid, secret) = token
        .trim()
        .split_once('.')
        .ok_or_else(|| ServiceError::InvalidInput(INVALID_TOKEN.into()))?;
    let uid = Uuid::parse_str(uid).map_err(|_| ServiceError::InvalidInput(INVALID_TOKEN.into()))?;
    Ok((uid, secret))
}

fn check_pending(pending: Option<&PendingTokenEntity>, secret: &str) -> Result<(), ServiceError> {
    match pending {
        Some(pending)
            if pending.expires_at > SystemTime::now() && matches_digest(secret, &pending.digest) =>
        {
            Ok(())
        }
        _ => Err(ServiceError::InvalidInput(INVALID_TOKEN.into())),
    }
}

/// A token naming an unknown account is just an invalid token.
fn hide_missing_user(err: ServiceError) -> ServiceError {
    match err {
        ServiceError::NotFound(_) => ServiceError::InvalidInput(INVALID_TOKEN.into()),
        other => other,
    }
}

async fn send_mail(state: &SharedState, to: &str, kind: MailKind, token: &str) {
    let base = state.config().public_base_url.trim_end_matches('/');
    let (subject, link) = match kind {
        MailKind::Verification => (
            "Confirm your email address",
            format!("{base}/auth/verify?token={token}"),
        ),
        MailKind::PasswordReset => (
            "Reset your password",
            format!("{base}/auth/password/reset?token={token}"),
        ),
    };
    let mail = OutgoingMail {
        to: to.to_string(),
        kind,
        subject: subject.to_string(),
        link,
    };
    if let Err(err) = state.mailer().send(mail).await {
        warn!(error = %err, ?kind, "failed to send account email");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_split_into_uid_and_secret() {
        let uid = Uuid::new_v4();
        let token = format!("{uid}.abc");
        assert_eq!(split_token(&token).unwrap(), (uid, "abc"));
        assert!(split_token("no-dot").is_err());
        assert!(split_token("not-a-uuid.abc").is_err());
    }

    #[test]
    fn pending_tokens_expire() {
        let now = SystemTime::now();
        let live = PendingTokenEntity {
            digest: digest_hex("secret"),
            issued_at: now,
            expires_at: now + Duration::from_secs(60),
        };
        assert!(check_pending(Some(&live), "secret").is_ok());
        assert!(check_pending(Some(&live), "other").is_err());
        assert!(check_pending(None, "secret").is_err());

        let expired = PendingTokenEntity {
            expires_at: now - Duration::from_secs(1),
            ..live
        };
        assert!(check_pending(Some(&expired), "secret").is_err());
    }

    #[test]
    fn emails_are_normalised() {
        assert_eq!(normalise_email("  Ada@Example.COM "), "ada@example.com");
    }
}
