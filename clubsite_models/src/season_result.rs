//! Season results: one image per `(category, year)`

use chrono::NaiveDateTime;
use chrono::Utc;
use database::DbConnection;
use database::tables::results;
use diesel::ExpressionMethods as _;
use diesel::OptionalExtension as _;
use diesel::QueryDsl as _;
use diesel::RunQueryDsl as _;
use diesel::SelectableHelper as _;
use diesel::upsert::excluded;

use crate::Attachment;
use crate::Error;
use crate::prelude::DeleteStatic;
use crate::prelude::Retrieve;

#[derive(Debug, Clone, PartialEq, diesel::Queryable, diesel::Selectable)]
#[diesel(table_name = results)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SeasonResult {
    pub id: i64,
    pub category: String,
    pub year: String,
    pub image_data: Vec<u8>,
    pub image_filename: String,
    pub image_mimetype: String,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// A [SeasonResult] without its payload
#[derive(Debug, Clone, PartialEq, diesel::Queryable, diesel::Selectable)]
#[diesel(table_name = results)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SeasonResultSummary {
    pub id: i64,
    pub category: String,
    pub year: String,
    pub image_filename: String,
    pub image_mimetype: String,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct NewSeasonResult {
    pub category: String,
    pub year: String,
    pub description: Option<String>,
    pub image: Attachment,
}

/// Partial update of a [SeasonResult], `None` fields are left untouched
#[derive(Debug, Clone, Default)]
pub struct SeasonResultChangeset {
    pub category: Option<String>,
    pub year: Option<String>,
    /// `Some(None)` clears the description
    pub description: Option<Option<String>>,
    pub image: Option<Attachment>,
}

#[derive(diesel::AsChangeset)]
#[diesel(table_name = results)]
struct SeasonResultRowChangeset<'a> {
    category: Option<&'a str>,
    year: Option<&'a str>,
    image_data: Option<&'a [u8]>,
    image_filename: Option<&'a str>,
    image_mimetype: Option<&'a str>,
    description: Option<Option<&'a str>>,
    updated_at: NaiveDateTime,
}

impl SeasonResultChangeset {
    fn as_row(&self, now: NaiveDateTime) -> SeasonResultRowChangeset<'_> {
        SeasonResultRowChangeset {
            category: self.category.as_deref(),
            year: self.year.as_deref(),
            image_data: self.image.as_ref().map(|image| image.data.as_slice()),
            image_filename: self.image.as_ref().map(|image| image.filename.as_str()),
            image_mimetype: self.image.as_ref().map(|image| image.mimetype.as_str()),
            description: self.description.as_ref().map(Option::as_deref),
            updated_at: now,
        }
    }
}

impl From<SeasonResult> for SeasonResultSummary {
    fn from(result: SeasonResult) -> Self {
        Self {
            id: result.id,
            category: result.category,
            year: result.year,
            image_filename: result.image_filename,
            image_mimetype: result.image_mimetype,
            description: result.description,
            created_at: result.created_at,
            updated_at: result.updated_at,
        }
    }
}

impl SeasonResult {
    /// Inserts the result, or replaces the one already stored for its `(category, year)`
    ///
    /// On conflict the payload, description and `updated_at` are overwritten while
    /// `id` and `created_at` are kept.
    #[tracing::instrument(name = "model:season_result:upsert", skip_all, fields(category = %new.category, year = %new.year))]
    pub async fn upsert(conn: &mut DbConnection, new: NewSeasonResult) -> Result<Self, Error> {
        conn.interact(move |conn| {
            let now = Utc::now().naive_utc();
            diesel::insert_into(results::table)
                .values((
                    results::category.eq(new.category.as_str()),
                    results::year.eq(new.year.as_str()),
                    results::image_data.eq(new.image.data.as_slice()),
                    results::image_filename.eq(new.image.filename.as_str()),
                    results::image_mimetype.eq(new.image.mimetype.as_str()),
                    results::description.eq(new.description.as_deref()),
                    results::created_at.eq(now),
                    results::updated_at.eq(now),
                ))
                .on_conflict((results::category, results::year))
                .do_update()
                .set((
                    results::image_data.eq(excluded(results::image_data)),
                    results::image_filename.eq(excluded(results::image_filename)),
                    results::image_mimetype.eq(excluded(results::image_mimetype)),
                    results::description.eq(excluded(results::description)),
                    results::updated_at.eq(excluded(results::updated_at)),
                ))
                .returning(SeasonResult::as_returning())
                .get_result(conn)
                .map_err(Error::from)
        })
        .await
    }

    /// Stored payload of the result #`id`
    pub async fn retrieve_image(
        conn: &mut DbConnection,
        id: i64,
    ) -> Result<Option<Attachment>, Error> {
        conn.interact(move |conn| {
            results::table
                .find(id)
                .select((
                    results::image_data,
                    results::image_filename,
                    results::image_mimetype,
                ))
                .first::<Attachment>(conn)
                .optional()
                .map_err(Error::from)
        })
        .await
    }

    /// Applies `changeset` to the result #`id`
    ///
    /// Returns `None` if the row doesn't exist. Moving the row onto a `(category, year)`
    /// that is already taken fails with [Error::UniqueViolation].
    #[tracing::instrument(name = "model:season_result:update", skip(conn, changeset))]
    pub async fn update(
        conn: &mut DbConnection,
        id: i64,
        changeset: SeasonResultChangeset,
    ) -> Result<Option<Self>, Error> {
        conn.interact(move |conn| {
            let now = Utc::now().naive_utc();
            diesel::update(results::table.find(id))
                .set(&changeset.as_row(now))
                .returning(SeasonResult::as_returning())
                .get_result(conn)
                .optional()
                .map_err(Error::from)
        })
        .await
    }
}

impl Retrieve<i64> for SeasonResult {
    async fn retrieve(conn: &mut DbConnection, id: i64) -> Result<Option<Self>, Error> {
        conn.interact(move |conn| {
            results::table
                .find(id)
                .select(SeasonResult::as_select())
                .first(conn)
                .optional()
                .map_err(Error::from)
        })
        .await
    }
}

impl DeleteStatic<i64> for SeasonResult {
    async fn delete_static(conn: &mut DbConnection, id: i64) -> Result<bool, Error> {
        conn.interact(move |conn| {
            diesel::delete(results::table.find(id))
                .execute(conn)
                .map(|deleted| deleted > 0)
                .map_err(Error::from)
        })
        .await
    }
}

impl SeasonResultSummary {
    /// Looks a result up by its business key
    pub async fn retrieve_by_business_key(
        conn: &mut DbConnection,
        category: String,
        year: String,
    ) -> Result<Option<Self>, Error> {
        conn.interact(move |conn| {
            results::table
                .filter(results::category.eq(category))
                .filter(results::year.eq(year))
                .select(SeasonResultSummary::as_select())
                .first(conn)
                .optional()
                .map_err(Error::from)
        })
        .await
    }

    /// All results, most recent season first
    pub async fn list(conn: &mut DbConnection) -> Result<Vec<Self>, Error> {
        conn.interact(|conn| {
            results::table
                .select(SeasonResultSummary::as_select())
                .order((results::year.desc(), results::category.asc()))
                .load(conn)
                .map_err(Error::from)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use database::DbConnectionPool;
    use pretty_assertions::assert_eq;

    use super::*;

    fn new_result(category: &str, year: &str, description: &str, data: &[u8]) -> NewSeasonResult {
        NewSeasonResult {
            category: category.to_owned(),
            year: year.to_owned(),
            description: Some(description.to_owned()),
            image: Attachment::new(data.to_vec(), format!("{category}.png"), "image/png"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn upsert_replaces_payload_and_keeps_identity() {
        let pool = DbConnectionPool::for_tests();
        let mut conn = pool.get().await.unwrap();

        let first = SeasonResult::upsert(&mut conn, new_result("mini-odbojka", "2024", "A", b"one"))
            .await
            .unwrap();
        let second =
            SeasonResult::upsert(&mut conn, new_result("mini-odbojka", "2024", "B", b"two"))
                .await
                .unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(second.image_data, b"two".to_vec());
        assert_eq!(second.description.as_deref(), Some("B"));

        let listed = SeasonResultSummary::list(&mut conn).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].description.as_deref(), Some("B"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_upserts_converge_on_one_row() {
        let pool = DbConnectionPool::for_tests();

        let writers = (0..16)
            .map(|writer| {
                let pool = pool.clone();
                tokio::spawn(async move {
                    let mut conn = pool.get().await.unwrap();
                    let description = format!("writer {writer}");
                    SeasonResult::upsert(
                        &mut conn,
                        new_result("kadeti", "2024", &description, description.as_bytes()),
                    )
                    .await
                })
            })
            .collect::<Vec<_>>();
        let mut ids = Vec::new();
        for writer in writers {
            let result = writer.await.unwrap().expect("no upsert should fail");
            ids.push(result.id);
        }

        ids.dedup();
        assert_eq!(ids.len(), 1);
        let mut conn = pool.get().await.unwrap();
        let listed = SeasonResultSummary::list(&mut conn).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, ids[0]);
        let stored = SeasonResult::retrieve(&mut conn, ids[0]).await.unwrap().unwrap();
        assert_eq!(
            stored.image_data,
            stored.description.unwrap().into_bytes(),
            "payload and description come from the same write"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn list_orders_by_year_then_category() {
        let pool = DbConnectionPool::for_tests();
        let mut conn = pool.get().await.unwrap();
        for (category, year) in [
            ("mini-odbojka", "2023"),
            ("kadeti", "2024"),
            ("mini-odbojka", "2024"),
            ("kadeti", "2023"),
        ] {
            SeasonResult::upsert(&mut conn, new_result(category, year, "", b"x"))
                .await
                .unwrap();
        }

        let keys = SeasonResultSummary::list(&mut conn)
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.category, r.year))
            .collect::<Vec<_>>();

        assert_eq!(
            keys,
            vec![
                ("kadeti".to_owned(), "2024".to_owned()),
                ("mini-odbojka".to_owned(), "2024".to_owned()),
                ("kadeti".to_owned(), "2023".to_owned()),
                ("mini-odbojka".to_owned(), "2023".to_owned()),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn retrieve_by_business_key() {
        let pool = DbConnectionPool::for_tests();
        let mut conn = pool.get().await.unwrap();
        let stored = SeasonResult::upsert(&mut conn, new_result("kadeti", "2023/24", "", b"x"))
            .await
            .unwrap();

        let found = SeasonResultSummary::retrieve_by_business_key(
            &mut conn,
            "kadeti".to_owned(),
            "2023/24".to_owned(),
        )
        .await
        .unwrap();
        let missing = SeasonResultSummary::retrieve_by_business_key(
            &mut conn,
            "kadeti".to_owned(),
            "2022".to_owned(),
        )
        .await
        .unwrap();

        assert_eq!(found, Some(SeasonResultSummary::from(stored)));
        assert_eq!(missing, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn update_is_partial() {
        let pool = DbConnectionPool::for_tests();
        let mut conn = pool.get().await.unwrap();
        let stored = SeasonResult::upsert(&mut conn, new_result("kadeti", "2024", "old", b"x"))
            .await
            .unwrap();

        let updated = SeasonResult::update(
            &mut conn,
            stored.id,
            SeasonResultChangeset {
                description: Some(None),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .expect("result should exist");

        assert_eq!(updated.description, None);
        assert_eq!(updated.image_data, stored.image_data);
        assert_eq!(updated.category, stored.category);

        let image = Attachment::new(b"GIF89a".to_vec(), "new.gif", "image/gif");
        SeasonResult::update(
            &mut conn,
            stored.id,
            SeasonResultChangeset {
                image: Some(image.clone()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(
            SeasonResult::retrieve_image(&mut conn, stored.id)
                .await
                .unwrap(),
            Some(image)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn update_onto_taken_key_is_a_unique_violation() {
        let pool = DbConnectionPool::for_tests();
        let mut conn = pool.get().await.unwrap();
        SeasonResult::upsert(&mut conn, new_result("kadeti", "2024", "", b"x"))
            .await
            .unwrap();
        let other = SeasonResult::upsert(&mut conn, new_result("kadeti", "2023", "", b"y"))
            .await
            .unwrap();

        let error = SeasonResult::update(
            &mut conn,
            other.id,
            SeasonResultChangeset {
                year: Some("2024".to_owned()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(error, Error::UniqueViolation { ref table, .. } if table == "results"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn update_missing_row() {
        let pool = DbConnectionPool::for_tests();
        let mut conn = pool.get().await.unwrap();
        let outcome = SeasonResult::update(
            &mut conn,
            42,
            SeasonResultChangeset {
                year: Some("2024".to_owned()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(outcome, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn deleted_ids_are_not_reused() {
        let pool = DbConnectionPool::for_tests();
        let mut conn = pool.get().await.unwrap();
        let first = SeasonResult::upsert(&mut conn, new_result("kadeti", "2024", "", b"x"))
            .await
            .unwrap();

        assert!(SeasonResult::delete_static(&mut conn, first.id).await.unwrap());
        assert!(!SeasonResult::delete_static(&mut conn, first.id).await.unwrap());
        assert_eq!(SeasonResult::retrieve(&mut conn, first.id).await.unwrap(), None);

        let second = SeasonResult::upsert(&mut conn, new_result("kadeti", "2024", "", b"x"))
            .await
            .unwrap();
        assert!(second.id > first.id);
    }
}
