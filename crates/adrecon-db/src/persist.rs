//! Find-or-create persistence shared by every importable record type.
//!
//! Each record type knows how to look itself up by natural key, bulk-load the
//! ids of many keys at once, insert itself, and overwrite an existing row.
//! [`write_record`] combines those into the single decision the importer
//! makes per row.

use std::collections::HashMap;

use adrecon_core::NaturalKey;
use sqlx::PgConnection;

/// Result of looking a natural key up in the database or the key cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> From<Option<T>> for Lookup<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Lookup::NotFound, Lookup::Found)
    }
}

/// A record that can be written to its table by natural key.
#[allow(async_fn_in_trait)]
pub trait Persist: NaturalKey + Sized {
    /// Id of the row holding `key`.
    ///
    /// The default suits keyless records, which never match an existing row.
    async fn find(_conn: &mut PgConnection, _key: &Self::Key) -> Result<Lookup<i64>, sqlx::Error> {
        Ok(Lookup::NotFound)
    }

    /// Ids of every existing row among `keys`, in one round trip.
    ///
    /// Keyless records have nothing to preload.
    async fn preload(
        _conn: &mut PgConnection,
        _keys: &[Self::Key],
    ) -> Result<HashMap<Self::Key, i64>, sqlx::Error> {
        Ok(HashMap::new())
    }

    async fn insert(&self, conn: &mut PgConnection) -> Result<i64, sqlx::Error>;

    /// Replace every non-key column of row `id` with this record's values.
    async fn update(&self, conn: &mut PgConnection, id: i64) -> Result<(), sqlx::Error>;
}

/// Where existing-row ids come from during one import.
#[derive(Debug)]
pub enum KeyCache<K> {
    /// Every key in the file was bulk-loaded up front.
    Preloaded(HashMap<K, i64>),
    /// Each row queries the database on its own.
    PerRow,
}

impl<K: std::hash::Hash + Eq> KeyCache<K> {
    /// Drop keys whose rows were rolled back with a failed batch.
    pub fn forget<'a, I>(&mut self, keys: I)
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        if let KeyCache::Preloaded(map) = self {
            for key in keys {
                map.remove(key);
            }
        }
    }

    #[must_use]
    pub fn is_preloaded(&self) -> bool {
        matches!(self, KeyCache::Preloaded(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    Updated,
    /// A row with the same key exists and overwrite was off.
    Skipped,
}

/// Write one record: insert when its key is new (or it has no key),
/// otherwise update in overwrite mode or skip.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if any lookup or write fails.
pub async fn write_record<R: Persist>(
    conn: &mut PgConnection,
    cache: &mut KeyCache<R::Key>,
    record: &R,
    overwrite: bool,
) -> Result<WriteOutcome, sqlx::Error> {
    let Some(key) = record.natural_key() else {
        record.insert(conn).await?;
        return Ok(WriteOutcome::Inserted);
    };

    let existing = match cache {
        KeyCache::Preloaded(map) => Lookup::from(map.get(&key).copied()),
        KeyCache::PerRow => R::find(conn, &key).await?,
    };

    match existing {
        Lookup::Found(id) if overwrite => {
            record.update(conn, id).await?;
            Ok(WriteOutcome::Updated)
        }
        Lookup::Found(_) => Ok(WriteOutcome::Skipped),
        Lookup::NotFound => {
            let id = record.insert(conn).await?;
            if let KeyCache::Preloaded(map) = cache {
                map.insert(key, id);
            }
            Ok(WriteOutcome::Inserted)
        }
    }
}
