use chrono::NaiveDateTime;
use chrono::Utc;
use database::DbConnection;
use database::tables::admin_users;
use diesel::ExpressionMethods as _;
use diesel::OptionalExtension as _;
use diesel::QueryDsl as _;
use diesel::RunQueryDsl as _;
use diesel::SelectableHelper as _;

use super::password;
use crate::Error;

#[derive(Debug, Clone, PartialEq, diesel::Queryable, diesel::Selectable)]
#[diesel(table_name = admin_users)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AdminUser {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub created_at: NaiveDateTime,
}

impl AdminUser {
    /// Creates the bootstrap admin when no admin exists yet
    ///
    /// Returns the created user, `None` if the table already had one.
    #[tracing::instrument(name = "model:admin_user:ensure_bootstrap", skip(conn, password))]
    pub async fn ensure_bootstrap(
        conn: &mut DbConnection,
        username: String,
        password: String,
    ) -> Result<Option<Self>, Error> {
        conn.interact(move |conn| {
            let password_hash = password::hash_password(&password)?;
            conn.immediate_transaction(|conn| {
                let existing = admin_users::table.count().get_result::<i64>(conn)?;
                if existing > 0 {
                    return Ok(None);
                }
                let user = diesel::insert_into(admin_users::table)
                    .values((
                        admin_users::username.eq(username.as_str()),
                        admin_users::password_hash.eq(password_hash),
                        admin_users::created_at.eq(Utc::now().naive_utc()),
                    ))
                    .returning(AdminUser::as_returning())
                    .get_result(conn)?;
                Ok(Some(user))
            })
        })
        .await
    }

    pub async fn retrieve_by_username(
        conn: &mut DbConnection,
        username: String,
    ) -> Result<Option<Self>, Error> {
        conn.interact(move |conn| {
            admin_users::table
                .filter(admin_users::username.eq(username))
                .select(AdminUser::as_select())
                .first(conn)
                .optional()
                .map_err(Error::from)
        })
        .await
    }

    pub fn verify_password(&self, password: &str) -> bool {
        password::verify_password(password, &self.password_hash)
    }

    /// Does the work of [AdminUser::verify_password] for a login whose username matched no admin
    pub fn reject_unknown(password: &str) {
        password::verify_decoy(password);
    }
}
