use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::upsert::excluded;
use uuid::Uuid;

use fitclub_shared::clients::db::{checkout, DbPool};
use fitclub_shared::errors::{AppError, AppResult};
use fitclub_shared::types::{NotificationRecord, Platform, PushTokenRecord, RegistrationOutcome};

use super::{NotificationStore, PushTokenStore, SetAddition};
use crate::models::{
    NewDeletion, NewNotification, NewPushToken, NewRead, NewTenant, Notification, NotificationDraft,
    PushToken,
};
use crate::schema::{notification_deletions, notification_reads, notifications, push_tokens, tenants};

/// Diesel-backed store. Queries run on the blocking pool so request tasks
/// never stall the runtime.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn run<T, F>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce(&mut PgConnection) -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = checkout(&pool)?;
            f(&mut *conn)
        })
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("database task failed: {e}")))?
    }
}

fn group_members(pairs: Vec<(Uuid, Uuid)>) -> HashMap<Uuid, BTreeSet<Uuid>> {
    let mut grouped: HashMap<Uuid, BTreeSet<Uuid>> = HashMap::new();
    for (notification_id, user_id) in pairs {
        grouped.entry(notification_id).or_default().insert(user_id);
    }
    grouped
}

fn owning_tenant(conn: &mut PgConnection, notification_id: Uuid) -> QueryResult<Option<Uuid>> {
    notifications::table
        .find(notification_id)
        .select(notifications::tenant_id)
        .first::<Uuid>(conn)
        .optional()
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn upsert_tenant(&self, tenant_id: Uuid, name: &str) -> AppResult<bool> {
        let name = name.to_string();
        self.run(move |conn| {
            let inserted = diesel::insert_into(tenants::table)
                .values(&NewTenant { id: tenant_id, name })
                .on_conflict(tenants::id)
                .do_nothing()
                .execute(conn)?;
            Ok(inserted > 0)
        })
        .await
    }

    async fn tenant_exists(&self, tenant_id: Uuid) -> AppResult<bool> {
        self.run(move |conn| {
            let exists = diesel::select(diesel::dsl::exists(tenants::table.find(tenant_id)))
                .get_result::<bool>(conn)?;
            Ok(exists)
        })
        .await
    }

    async fn insert_notification(&self, draft: &NotificationDraft) -> AppResult<NotificationRecord> {
        let new_notification = NewNotification::from_draft(draft);
        self.run(move |conn| {
            let row = diesel::insert_into(notifications::table)
                .values(&new_notification)
                .returning(Notification::as_returning())
                .get_result::<Notification>(conn)?;

            tracing::debug!(
                notification_id = %row.id,
                tenant_id = %row.tenant_id,
                notification_type = %row.notification_type,
                "notification inserted"
            );

            Ok(row.into_record(BTreeSet::new(), BTreeSet::new()))
        })
        .await
    }

    async fn tenant_notifications(&self, tenant_id: Uuid) -> AppResult<Vec<NotificationRecord>> {
        self.run(move |conn| {
            let rows = notifications::table
                .filter(notifications::tenant_id.eq(tenant_id))
                .select(Notification::as_select())
                .load::<Notification>(conn)?;

            let ids: Vec<Uuid> = rows.iter().map(|n| n.id).collect();

            let reads = notification_reads::table
                .filter(notification_reads::notification_id.eq_any(ids.clone()))
                .select((notification_reads::notification_id, notification_reads::user_id))
                .load::<(Uuid, Uuid)>(conn)?;

            let deletions = notification_deletions::table
                .filter(notification_deletions::notification_id.eq_any(ids))
                .select((notification_deletions::notification_id, notification_deletions::user_id))
                .load::<(Uuid, Uuid)>(conn)?;

            let mut read_by = group_members(reads);
            let mut deleted_by = group_members(deletions);

            Ok(rows
                .into_iter()
                .map(|row| {
                    let id = row.id;
                    row.into_record(
                        read_by.remove(&id).unwrap_or_default(),
                        deleted_by.remove(&id).unwrap_or_default(),
                    )
                })
                .collect())
        })
        .await
    }

    async fn notification_tenant(&self, notification_id: Uuid) -> AppResult<Option<Uuid>> {
        self.run(move |conn| Ok(owning_tenant(conn, notification_id)?)).await
    }

    async fn add_reader(&self, notification_id: Uuid, user_id: Uuid) -> AppResult<SetAddition> {
        self.run(move |conn| {
            let Some(tenant_id) = owning_tenant(conn, notification_id)? else {
                return Ok(SetAddition::MissingDocument);
            };

            let inserted = diesel::insert_into(notification_reads::table)
                .values(&NewRead { notification_id, user_id })
                .on_conflict((notification_reads::notification_id, notification_reads::user_id))
                .do_nothing()
                .execute(conn)?;

            Ok(if inserted > 0 {
                SetAddition::Added { tenant_id }
            } else {
                SetAddition::AlreadyPresent
            })
        })
        .await
    }

    async fn add_deleter(&self, notification_id: Uuid, user_id: Uuid) -> AppResult<SetAddition> {
        self.run(move |conn| {
            let Some(tenant_id) = owning_tenant(conn, notification_id)? else {
                return Ok(SetAddition::MissingDocument);
            };

            let inserted = diesel::insert_into(notification_deletions::table)
                .values(&NewDeletion { notification_id, user_id })
                .on_conflict((notification_deletions::notification_id, notification_deletions::user_id))
                .do_nothing()
                .execute(conn)?;

            Ok(if inserted > 0 {
                SetAddition::Added { tenant_id }
            } else {
                SetAddition::AlreadyPresent
            })
        })
        .await
    }

    async fn ping(&self) -> AppResult<()> {
        self.run(|conn| {
            diesel::sql_query("SELECT 1").execute(conn)?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl PushTokenStore for PgStore {
    async fn find_token(&self, user_id: Uuid, token: &str) -> AppResult<Option<PushTokenRecord>> {
        let token = token.to_string();
        self.run(move |conn| {
            push_tokens::table
                .filter(push_tokens::user_id.eq(user_id))
                .filter(push_tokens::token.eq(&token))
                .select(PushToken::as_select())
                .first::<PushToken>(conn)
                .optional()?
                .map(PushTokenRecord::try_from)
                .transpose()
        })
        .await
    }

    async fn upsert_token(
        &self,
        user_id: Uuid,
        token: &str,
        platform: Platform,
    ) -> AppResult<(PushTokenRecord, RegistrationOutcome)> {
        let token = token.to_string();
        self.run(move |conn| {
            let new_token = NewPushToken {
                id: Uuid::now_v7(),
                user_id,
                token,
                platform: platform.as_str().to_string(),
            };

            // One statement, so a concurrent delete can never leave us with
            // nothing to update. The row keeps its original id on conflict.
            let row = diesel::insert_into(push_tokens::table)
                .values(&new_token)
                .on_conflict((push_tokens::user_id, push_tokens::token))
                .do_update()
                .set((
                    push_tokens::last_registered_at.eq(Utc::now()),
                    push_tokens::platform.eq(excluded(push_tokens::platform)),
                ))
                .returning(PushToken::as_returning())
                .get_result::<PushToken>(conn)?;

            let outcome = if row.id == new_token.id {
                RegistrationOutcome::Created
            } else {
                RegistrationOutcome::Existing
            };
            Ok((PushTokenRecord::try_from(row)?, outcome))
        })
        .await
    }

    async fn delete_token(&self, user_id: Uuid, token: &str) -> AppResult<bool> {
        let token = token.to_string();
        self.run(move |conn| {
            let deleted = diesel::delete(
                push_tokens::table
                    .filter(push_tokens::user_id.eq(user_id))
                    .filter(push_tokens::token.eq(&token)),
            )
            .execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn delete_all_tokens(&self, user_id: Uuid) -> AppResult<usize> {
        self.run(move |conn| {
            let deleted = diesel::delete(push_tokens::table.filter(push_tokens::user_id.eq(user_id)))
                .execute(conn)?;
            Ok(deleted)
        })
        .await
    }

    async fn tokens_for_user(&self, user_id: Uuid) -> AppResult<Vec<PushTokenRecord>> {
        self.run(move |conn| {
            push_tokens::table
                .filter(push_tokens::user_id.eq(user_id))
                .order(push_tokens::last_registered_at.desc())
                .select(PushToken::as_select())
                .load::<PushToken>(conn)?
                .into_iter()
                .map(PushTokenRecord::try_from)
                .collect()
        })
        .await
    }
}
