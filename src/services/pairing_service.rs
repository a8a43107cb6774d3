//! Partner pairing: short codes, relationship establishment and dissolution.
//!
//! A relationship lives on both user documents. Every change touching the two
//! of them runs under the in-process locks of both users and writes each
//! document with a compare-and-swap; the first write is undone when the second
//! one does not apply, so no caller ever observes a one-sided relationship that
//! it created.

use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        chat_store::ChatStore,
        models::{RelationshipEntity, UserEntity},
    },
    dto::{pairing::PartnerCodeResponse, profile::OverviewResponse},
    error::ServiceError,
    services::{
        profile_service::{load_user, modify_user},
        sse_events,
    },
    state::{SharedState, codes::PairCode},
};

/// Random draws before giving up on finding an unused pairing code.
const CODE_ATTEMPTS: usize = 16;

/// Replace the caller's pairing code with a fresh one.
pub async fn generate_code(
    state: &SharedState,
    uid: Uuid,
) -> Result<PartnerCodeResponse, ServiceError> {
    let user = assign_new_code(state, uid).await?;
    let code = user.partner_code.ok_or_else(|| {
        ServiceError::InvalidState("pairing code was not stored".into())
    })?;
    Ok(PartnerCodeResponse { code })
}

/// Record that the caller stays single for now and give them a code to share
/// later.
pub async fn stay_single(state: &SharedState, uid: Uuid) -> Result<OverviewResponse, ServiceError> {
    let user = assign_new_code(state, uid).await?;
    info!(%uid, "user chose to stay single");
    Ok(OverviewResponse::from(&user))
}

/// Store a fresh pairing code on a single user.
pub(crate) async fn assign_new_code(
    state: &SharedState,
    uid: Uuid,
) -> Result<UserEntity, ServiceError> {
    let store = state.require_store().await?;
    let _guard = state.user_locks().lock(uid).await;
    let mut code = fresh_code(&store).await?;
    modify_user(state, uid, |user| {
        if user.partner_uid().is_some() {
            return Err(ServiceError::InvalidState(
                "you are already in a relationship".into(),
            ));
        }
        user.relationship = RelationshipEntity::Single;
        user.partner_code = Some(code.to_string());
        // The store refuses a code another account took meanwhile; retries draw anew.
        code = PairCode::generate();
        Ok(true)
    })
    .await
}

/// Pair the caller with the holder of `code`.
pub async fn redeem_code(
    state: &SharedState,
    uid: Uuid,
    code: &str,
) -> Result<OverviewResponse, ServiceError> {
    let code = PairCode::parse(code)?;
    let store = state.require_store().await?;

    let Some(holder) = store
        .find_user_by_partner_code(code.to_string())
        .await?
    else {
        return Err(ServiceError::NotFound(format!("pairing code `{code}` not found")));
    };
    if holder.id == uid {
        return Err(ServiceError::InvalidInput(
            "you cannot redeem your own pairing code".into(),
        ));
    }

    let _guards = state.user_locks().lock_all(&[uid, holder.id]).await;

    // Both documents may have moved while we waited for the locks.
    let holder = load_user(state, holder.id).await?;
    let redeemer = load_user(state, uid).await?;
    if redeemer.partner_uid().is_some() {
        return Err(ServiceError::InvalidState(
            "you are already in a relationship".into(),
        ));
    }
    if holder.partner_uid().is_some() {
        return Err(ServiceError::InvalidState(
            "the owner of this code is already in a relationship".into(),
        ));
    }
    if holder.partner_code.as_deref() != Some(code.as_str()) {
        return Err(ServiceError::NotFound(format!("pairing code `{code}` not found")));
    }

    let holder_change = Change::new(holder, |user| {
        user.relationship = RelationshipEntity::InRelationship {
            partner_uid: redeemer.id,
            partner_name: redeemer.name.clone(),
        };
        user.partner_code = None;
    });
    let redeemer_change = Change::new(redeemer, |user| {
        user.relationship = RelationshipEntity::InRelationship {
            partner_uid: holder_change.before.id,
            partner_name: holder_change.before.name.clone(),
        };
        user.partner_code = None;
    });

    let holder_id = holder_change.before.id;
    let holder_name = holder_change.before.name.clone();
    let redeemer_name = redeemer_change.before.name.clone();
    let redeemer = write_both(&store, holder_change, redeemer_change).await?;

    info!(%uid, partner_uid = %holder_id, "relationship established");
    sse_events::notify_partner_paired(state, uid, holder_id, &holder_name);
    sse_events::notify_partner_paired(state, holder_id, uid, &redeemer_name);
    Ok(OverviewResponse::from(&redeemer))
}

/// Dissolve the caller's relationship on both sides. The caller gets a new
/// pairing code right away.
pub async fn unpair(state: &SharedState, uid: Uuid) -> Result<OverviewResponse, ServiceError> {
    let store = state.require_store().await?;
    let Some(partner_uid) = load_user(state, uid).await?.partner_uid() else {
        return Err(ServiceError::InvalidState(
            "you are not in a relationship".into(),
        ));
    };

    let _guards = state.user_locks().lock_all(&[uid, partner_uid]).await;

    let user = load_user(state, uid).await?;
    if user.partner_uid() != Some(partner_uid) {
        return Err(ServiceError::InvalidState(
            "relationship changed concurrently, retry".into(),
        ));
    }
    let code = fresh_code(&store).await?;
    let user_change = Change::new(user, |user| {
        user.relationship = RelationshipEntity::Single;
        user.partner_code = Some(code.to_string());
    });

    let user = match store.find_user(partner_uid).await? {
        Some(partner) if partner.partner_uid() == Some(uid) => {
            let partner_change = Change::new(partner, |user| {
                user.relationship = RelationshipEntity::Single;
                user.partner_code = None;
            });
            let caller = user_change.after.clone();
            write_both(&store, user_change, partner_change).await?;
            caller
        }
        _ => {
            warn!(%uid, %partner_uid, "partner no longer points back, clearing one side");
            write_one(&store, user_change).await?
        }
    };

    info!(%uid, %partner_uid, "relationship dissolved");
    sse_events::notify_partner_unpaired(state, uid, partner_uid);
    sse_events::notify_partner_unpaired(state, partner_uid, uid);
    Ok(OverviewResponse::from(&user))
}

/// Draw a pairing code no account currently advertises.
async fn fresh_code(store: &Arc<dyn ChatStore>) -> Result<PairCode, ServiceError> {
    for _ in 0..CODE_ATTEMPTS {
        let code = PairCode::generate();
        if store
            .find_user_by_partner_code(code.to_string())
            .await?
            .is_none()
        {
            return Ok(code);
        }
    }
    Err(ServiceError::InvalidState(
        "could not allocate a free pairing code, retry".into(),
    ))
}

/// A pending compare-and-swap write of one user document.
struct Change {
    before: UserEntity,
    after: UserEntity,
}

impl Change {
    fn new(before: UserEntity, edit: impl FnOnce(&mut UserEntity)) -> Self {
        let mut after = before.clone();
        edit(&mut after);
        after.bump();
        Self { before, after }
    }

    async fn apply(&self, store: &Arc<dyn ChatStore>) -> Result<bool, ServiceError> {
        Ok(store
            .update_user(self.after.clone(), self.before.revision)
            .await?)
    }

    /// Put the previous content back on top of the applied write.
    async fn revert(&self, store: &Arc<dyn ChatStore>) -> Result<bool, ServiceError> {
        let mut restored = self.before.clone();
        restored.revision = self.after.revision;
        let expected = restored.bump();
        Ok(store.update_user(restored, expected).await?)
    }
}

async fn write_one(store: &Arc<dyn ChatStore>, change: Change) -> Result<UserEntity, ServiceError> {
    if !change.apply(store).await? {
        return Err(conflict(change.before.id));
    }
    Ok(change.after)
}

/// Write `first`, then `second`; undo `first` when `second` does not apply.
/// Resolves to the second document as written.
async fn write_both(
    store: &Arc<dyn ChatStore>,
    first: Change,
    second: Change,
) -> Result<UserEntity, ServiceError> {
    if !first.apply(store).await? {
        return Err(conflict(first.before.id));
    }

    let failure = match second.apply(store).await {
        Ok(true) => return Ok(second.after),
        Ok(false) => conflict(second.before.id),
        Err(err) => err,
    };

    match first.revert(store).await {
        Ok(true) => {}
        Ok(false) => error!(uid = %first.before.id, "rollback lost a race, document left modified"),
        Err(err) => error!(uid = %first.before.id, error = %err, "rollback failed"),
    }
    Err(failure)
}

fn conflict(uid: Uuid) -> ServiceError {
    ServiceError::InvalidState(format!(
        "user `{uid}` was modified concurrently, retry"
    ))
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::dao::chat_store::memory::MemoryChatStore;

    fn user(name: &str) -> UserEntity {
        let now = SystemTime::now();
        UserEntity {
            id: Uuid::new_v4(),
            email: format!("{name}@example.com"),
            password_hash: String::new(),
            name: name.into(),
            phone: None,
            sex: "n/a".into(),
            profile_image: None,
            email_verified: true,
            relationship: RelationshipEntity::Single,
            partner_code: None,
            verification: None,
            password_reset: None,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    #[tokio::test]
    async fn failed_second_write_restores_the_first_document() {
        let store: Arc<dyn ChatStore> = Arc::new(MemoryChatStore::new());
        let ada = user("ada");
        let bob = user("bob");
        assert!(store.insert_user(ada.clone()).await.unwrap());
        assert!(store.insert_user(bob.clone()).await.unwrap());

        // Bob moves on before the second write lands.
        let mut moved = bob.clone();
        let expected = moved.bump();
        assert!(store.update_user(moved, expected).await.unwrap());

        let first = Change::new(ada.clone(), |user| user.partner_code = Some("AB12".into()));
        let second = Change::new(bob.clone(), |user| user.partner_code = Some("CD34".into()));
        let err = write_both(&store, first, second).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));

        let ada_now = store.find_user(ada.id).await.unwrap().unwrap();
        assert_eq!(ada_now.partner_code, None);
        assert_eq!(ada_now.revision, 2);
    }

    #[tokio::test]
    async fn fresh_codes_avoid_taken_ones() {
        let store: Arc<dyn ChatStore> = Arc::new(MemoryChatStore::new());
        let code = fresh_code(&store).await.unwrap();
        assert_eq!(code.as_str().len(), 4);
    }
}
