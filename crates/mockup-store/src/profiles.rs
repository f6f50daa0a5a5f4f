use mockup_shared::types::Tier;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::convert::{amount, now, parse_enum, parse_ts, parse_uuid, ts};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Profile;

const PROFILE_COLUMNS: &str = "id, email, tier, credits, created_at";

impl Database {
    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    pub fn get_profile(&self, id: Uuid) -> Result<Profile> {
        self.conn()
            .query_row(
                &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?1"),
                params![id.to_string()],
                row_to_profile,
            )
            .map_err(StoreError::from_query)
    }

    /// Case-insensitive lookup by email; the oldest profile wins when
    /// several share an address.
    pub fn find_profile_by_email(&self, email: &str) -> Result<Option<Profile>> {
        let profile = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {PROFILE_COLUMNS} FROM profiles
                     WHERE lower(email) = lower(?1)
                     ORDER BY created_at ASC LIMIT 1"
                ),
                params![email],
                row_to_profile,
            )
            .optional()?;
        Ok(profile)
    }

    pub fn get_credits(&self, id: Uuid) -> Result<i64> {
        self.conn()
            .query_row(
                "SELECT credits FROM profiles WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .map_err(StoreError::from_query)
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    pub fn insert_profile(&self, profile: &Profile) -> Result<()> {
        self.conn().execute(
            &format!("INSERT INTO profiles ({PROFILE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
            params![
                profile.id.to_string(),
                profile.email,
                profile.tier.as_str(),
                profile.credits.max(0),
                ts(&profile.created_at),
            ],
        )?;
        Ok(())
    }

    /// Return the profile for `id`, creating a free-tier one with
    /// `starting_credits` if it does not exist yet.
    pub fn ensure_profile(&self, id: Uuid, starting_credits: i64) -> Result<Profile> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO profiles (id, email, tier, credits, created_at)
             VALUES (?1, NULL, ?2, ?3, ?4)",
            params![
                id.to_string(),
                Tier::Free.as_str(),
                starting_credits.max(0),
                ts(&now()),
            ],
        )?;
        if inserted > 0 {
            tracing::info!(user = %id, credits = starting_credits, "provisioned profile");
        }
        self.get_profile(id)
    }

    // -----------------------------------------------------------------------
    // Balance changes
    // -----------------------------------------------------------------------

    /// Subtract `cost` from the balance in a single statement, flooring at
    /// zero. Returns the new balance.
    pub fn deduct_credits(&self, id: Uuid, cost: u64) -> Result<i64> {
        self.conn()
            .query_row(
                "UPDATE profiles SET credits = MAX(0, credits - ?2)
                 WHERE id = ?1
                 RETURNING credits",
                params![id.to_string(), amount(cost)],
                |row| row.get(0),
            )
            .map_err(StoreError::from_query)
    }

    /// Overwrite the balance.
    pub fn set_credits(&self, id: Uuid, credits: i64) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE profiles SET credits = ?2 WHERE id = ?1",
            params![id.to_string(), credits.max(0)],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Add `credits` to the balance and move the profile to `tier`.
    /// Returns the new balance.
    pub fn top_up(&self, id: Uuid, credits: u64, tier: Tier) -> Result<i64> {
        self.conn()
            .query_row(
                "UPDATE profiles SET credits = credits + ?2, tier = ?3
                 WHERE id = ?1
                 RETURNING credits",
                params![id.to_string(), amount(credits), tier.as_str()],
                |row| row.get(0),
            )
            .map_err(StoreError::from_query)
    }
}

fn row_to_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<Profile> {
    let id: String = row.get(0)?;
    let email: Option<String> = row.get(1)?;
    let tier: String = row.get(2)?;
    let credits: i64 = row.get(3)?;
    let created_at: String = row.get(4)?;

    Ok(Profile {
        id: parse_uuid(0, &id)?,
        email,
        tier: parse_enum(2, &tier)?,
        credits,
        created_at: parse_ts(4, &created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn profile(email: Option<&str>, credits: i64) -> Profile {
        Profile {
            id: Uuid::new_v4(),
            email: email.map(str::to_string),
            tier: Tier::Free,
            credits,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_ensure_profile_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let id = Uuid::new_v4();

        let first = db.ensure_profile(id, 20).unwrap();
        assert_eq!(first.credits, 20);
        assert_eq!(first.tier, Tier::Free);

        db.set_credits(id, 3).unwrap();
        let second = db.ensure_profile(id, 20).unwrap();
        assert_eq!(second.credits, 3);
    }

    #[test]
    fn test_deduct_floors_at_zero() {
        let db = Database::open_in_memory().unwrap();
        let p = profile(None, 10);
        db.insert_profile(&p).unwrap();

        assert_eq!(db.deduct_credits(p.id, 4).unwrap(), 6);
        assert_eq!(db.deduct_credits(p.id, 100).unwrap(), 0);
        assert_eq!(db.get_credits(p.id).unwrap(), 0);
    }

    #[test]
    fn test_deduct_unknown_profile_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.deduct_credits(Uuid::new_v4(), 1),
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            db.set_credits(Uuid::new_v4(), 1),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_top_up_adds_and_sets_tier() {
        let db = Database::open_in_memory().unwrap();
        let p = profile(Some("a@example.com"), 7);
        db.insert_profile(&p).unwrap();

        assert_eq!(db.top_up(p.id, 300, Tier::Starter).unwrap(), 307);
        let stored = db.get_profile(p.id).unwrap();
        assert_eq!(stored.tier, Tier::Starter);
        assert_eq!(stored.credits, 307);
    }

    #[test]
    fn test_find_by_email_ignores_case() {
        let db = Database::open_in_memory().unwrap();
        let p = profile(Some("Designer@Example.com"), 0);
        db.insert_profile(&p).unwrap();

        let found = db.find_profile_by_email("designer@example.com").unwrap();
        assert_eq!(found.map(|f| f.id), Some(p.id));
        assert!(db.find_profile_by_email("nobody@example.com").unwrap().is_none());
    }
}
