//! Bearer sessions opened by a successful admin login
//!
//! Only the SHA-256 of a token is stored, the token itself is handed to the client once.

use base64ct::Base64UrlUnpadded;
use base64ct::Encoding as _;
use chrono::Duration;
use chrono::NaiveDateTime;
use database::DbConnection;
use database::tables::admin_sessions;
use database::tables::admin_users;
use diesel::ExpressionMethods as _;
use diesel::OptionalExtension as _;
use diesel::QueryDsl as _;
use diesel::RunQueryDsl as _;
use diesel::SelectableHelper as _;
use sha2::Digest as _;
use sha2::Sha256;

use super::AdminUser;
use crate::Error;

#[derive(Debug, Clone, PartialEq, diesel::Queryable, diesel::Selectable)]
#[diesel(table_name = admin_sessions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AdminSession {
    pub token_hash: String,
    pub user_id: i64,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

fn hash_token(token: &str) -> String {
    Base64UrlUnpadded::encode_string(&Sha256::digest(token.as_bytes()))
}

fn generate_token() -> String {
    let bytes: [u8; 32] = rand::random();
    Base64UrlUnpadded::encode_string(&bytes)
}

impl AdminSession {
    pub fn is_expired(&self, now: NaiveDateTime) -> bool {
        self.expires_at <= now
    }

    /// Opens a session for `user` valid for `ttl`
    ///
    /// Returns the stored session and the bearer token to give to the client.
    #[tracing::instrument(name = "model:admin_session:open", skip_all, fields(user_id = user.id))]
    pub async fn open(
        conn: &mut DbConnection,
        user: &AdminUser,
        ttl: Duration,
        now: NaiveDateTime,
    ) -> Result<(Self, String), Error> {
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or(Error::SessionExpiryOutOfRange {
                ttl_seconds: ttl.num_seconds(),
            })?;
        let token = generate_token();
        let token_hash = hash_token(&token);
        let user_id = user.id;
        let session = conn
            .interact(move |conn| {
                diesel::insert_into(admin_sessions::table)
                    .values((
                        admin_sessions::token_hash.eq(token_hash),
                        admin_sessions::user_id.eq(user_id),
                        admin_sessions::created_at.eq(now),
                        admin_sessions::expires_at.eq(expires_at),
                    ))
                    .returning(AdminSession::as_returning())
                    .get_result(conn)
                    .map_err(Error::from)
            })
            .await?;
        Ok((session, token))
    }

    /// Resolves `token` to its admin, `None` when unknown or expired at `now`
    pub async fn authenticate(
        conn: &mut DbConnection,
        token: &str,
        now: NaiveDateTime,
    ) -> Result<Option<AdminUser>, Error> {
        let token_hash = hash_token(token);
        let found = conn
            .interact(move |conn| {
                admin_sessions::table
                    .inner_join(admin_users::table)
                    .filter(admin_sessions::token_hash.eq(token_hash))
                    .select((AdminSession::as_select(), AdminUser::as_select()))
                    .first::<(AdminSession, AdminUser)>(conn)
                    .optional()
                    .map_err(Error::from)
            })
            .await?;
        Ok(found
            .filter(|(session, _)| !session.is_expired(now))
            .map(|(_, user)| user))
    }

    /// Revokes the session of `token`, `false` if there was none
    pub async fn revoke(conn: &mut DbConnection, token: &str) -> Result<bool, Error> {
        let token_hash = hash_token(token);
        conn.interact(move |conn| {
            diesel::delete(admin_sessions::table.find(token_hash))
                .execute(conn)
                .map(|deleted| deleted > 0)
                .map_err(Error::from)
        })
        .await
    }

    /// Deletes the sessions expired at `now`, returns how many were removed
    pub async fn purge_expired(
        conn: &mut DbConnection,
        now: NaiveDateTime,
    ) -> Result<usize, Error> {
        conn.interact(move |conn| {
            diesel::delete(admin_sessions::table.filter(admin_sessions::expires_at.le(now)))
                .execute(conn)
                .map_err(Error::from)
        })
        .await
    }
}
