//! Traits shared by the models, but not the models themselves

use database::DbConnection;

/// Describes how a model can be read from the database given its key
pub trait Retrieve<K>: Sized
where
    K: Send,
{
    /// Retrieves the row #`id`, `None` if it doesn't exist
    async fn retrieve(conn: &mut DbConnection, id: K) -> Result<Option<Self>, crate::Error>;

    /// Just like [Retrieve::retrieve] but returns `Err(fail())` if the row didn't exist
    async fn retrieve_or_fail<E, F>(conn: &mut DbConnection, id: K, fail: F) -> Result<Self, E>
    where
        E: From<crate::Error>,
        F: FnOnce() -> E + Send,
    {
        match Self::retrieve(conn, id).await {
            Ok(Some(obj)) => Ok(obj),
            Ok(None) => Err(fail()),
            Err(e) => Err(E::from(e)),
        }
    }
}

/// Describes how a model can be deleted from the database without retrieving it first
pub trait DeleteStatic<K>: Sized
where
    K: Send,
{
    /// Deletes the row #`id` from the database
    ///
    /// Returns `true` if the row was deleted, `false` if it didn't exist
    async fn delete_static(conn: &mut DbConnection, id: K) -> Result<bool, crate::Error>;

    /// Just like [DeleteStatic::delete_static] but returns `Err(fail())` if the row didn't exist
    async fn delete_static_or_fail<E, F>(conn: &mut DbConnection, id: K, fail: F) -> Result<(), E>
    where
        E: From<crate::Error>,
        F: FnOnce() -> E + Send,
    {
        match Self::delete_static(conn, id).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(fail()),
            Err(e) => Err(E::from(e)),
        }
    }
}
