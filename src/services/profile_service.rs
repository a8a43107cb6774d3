use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::models::{RelationshipEntity, UserEntity},
    dto::profile::{OverviewResponse, ProfileResponse, UpdateProfileRequest, UserSummary},
    error::ServiceError,
    services::pairing_service,
    state::SharedState,
};

/// Read-modify-write a user document with compare-and-swap, re-reading on
/// conflicts up to the configured number of attempts.
///
/// `apply` returns `false` when the document already has the wanted shape, in
/// which case nothing is written.
pub(crate) async fn modify_user<F>(
    state: &SharedState,
    uid: Uuid,
    mut apply: F,
) -> Result<UserEntity, ServiceError>
where
    F: FnMut(&mut UserEntity) -> Result<bool, ServiceError>,
{
    let store = state.require_store().await?;
    for attempt in 1..=state.config().max_write_attempts {
        let Some(mut user) = store.find_user(uid).await? else {
            return Err(ServiceError::NotFound(format!("user `{uid}` not found")));
        };
        if !apply(&mut user)? {
            return Ok(user);
        }
        let expected = user.bump();
        if store.update_user(user.clone(), expected).await? {
            return Ok(user);
        }
        warn!(%uid, attempt, "user document changed concurrently, retrying");
    }
    Err(ServiceError::InvalidState(format!(
        "user `{uid}` is being modified concurrently, retry later"
    )))
}

/// The caller's own profile.
pub async fn get_profile(state: &SharedState, uid: Uuid) -> Result<ProfileResponse, ServiceError> {
    Ok(load_user(state, uid).await?.into())
}

/// Apply a partial profile update. A new name is mirrored on the partner's
/// relationship record.
pub async fn update_profile(
    state: &SharedState,
    uid: Uuid,
    request: UpdateProfileRequest,
) -> Result<ProfileResponse, ServiceError> {
    let UpdateProfileRequest {
        name,
        profile_image,
        phone,
        sex,
    } = request;

    let name = name.map(|name| name.trim().to_string());
    let mut renamed = false;
    let user = modify_user(state, uid, |user| {
        let before = user.clone();
        if let Some(name) = &name {
            renamed = user.name != *name;
            user.name = name.clone();
        }
        if let Some(image) = &profile_image {
            user.profile_image = Some(image.trim().to_string()).filter(|image| !image.is_empty());
        }
        if let Some(phone) = &phone {
            user.phone = Some(phone.trim().to_string());
        }
        if let Some(sex) = &sex {
            user.sex = sex.trim().to_string();
        }
        Ok(*user != before)
    })
    .await?;

    if let Some(partner_uid) = user.partner_uid().filter(|_| renamed) {
        let new_name = user.name.clone();
        let mirrored = modify_user(state, partner_uid, |partner| match &mut partner.relationship {
            RelationshipEntity::InRelationship {
                partner_uid,
                partner_name,
            } if *partner_uid == uid && *partner_name != new_name => {
                *partner_name = new_name.clone();
                Ok(true)
            }
            _ => Ok(false),
        })
        .await;
        if let Err(err) = mirrored {
            warn!(%uid, %partner_uid, error = %err, "failed to mirror new name on partner");
        }
    }

    Ok(user.into())
}

/// Home screen projection.
///
/// Repairs a one-sided relationship (another account names this user as its
/// partner) and hands a pairing code to single users that have none.
pub async fn overview(state: &SharedState, uid: Uuid) -> Result<OverviewResponse, ServiceError> {
    let user = load_user(state, uid).await?;
    if user.partner_uid().is_some() {
        return Ok(OverviewResponse::from(&user));
    }

    let store = state.require_store().await?;
    if let Some(claimant) = store.find_user_by_partner(uid).await? {
        let _guards = state.user_locks().lock_all(&[uid, claimant.id]).await;
        let still_claims = store
            .find_user(claimant.id)
            .await?
            .is_some_and(|claimant| claimant.partner_uid() == Some(uid));
        if !still_claims {
            return Ok(OverviewResponse::from(&load_user(state, uid).await?));
        }
        let repaired = modify_user(state, uid, |user| {
            if user.partner_uid().is_some() {
                return Ok(false);
            }
            user.relationship = RelationshipEntity::InRelationship {
                partner_uid: claimant.id,
                partner_name: claimant.name.clone(),
            };
            user.partner_code = None;
            Ok(true)
        })
        .await?;
        info!(%uid, partner_uid = %claimant.id, "reconciled one-sided relationship");
        return Ok(OverviewResponse::from(&repaired));
    }

    if user.partner_code.is_none() {
        let user = pairing_service::assign_new_code(state, uid).await?;
        return Ok(OverviewResponse::from(&user));
    }

    Ok(OverviewResponse::from(&user))
}

/// Other users with at least one live stream or socket.
pub async fn online_users(state: &SharedState, uid: Uuid) -> Result<Vec<UserSummary>, ServiceError> {
    let ids: Vec<Uuid> = state
        .presence()
        .online()
        .into_iter()
        .filter(|online| *online != uid)
        .collect();
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let store = state.require_store().await?;
    let mut users: Vec<UserSummary> = store
        .find_users(ids)
        .await?
        .into_iter()
        .map(UserSummary::from)
        .collect();
    users.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(users)
}

pub(crate) async fn load_user(state: &SharedState, uid: Uuid) -> Result<UserEntity, ServiceError> {
    let store = state.require_store().await?;
    store
        .find_user(uid)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("user `{uid}` not found")))
}
