use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};

use crate::db::models::UserProfile;

/// Insert a user account. Account management lives elsewhere; this exists for
/// seeding and tests.
pub fn insert_user(
    conn: &Connection,
    id: &str,
    display_name: &str,
    profile_image: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO users (id, display_name, profile_image, is_active, created_at)
         VALUES (?1, ?2, ?3, 1, ?4)",
        rusqlite::params![id, display_name, profile_image, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

pub fn set_user_active(conn: &Connection, id: &str, active: bool) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE users SET is_active = ?2 WHERE id = ?1",
        rusqlite::params![id, active],
    )
}

/// Look up an active account. Deactivated or unknown ids return None.
pub fn find_active_user(conn: &Connection, id: &str) -> rusqlite::Result<Option<UserProfile>> {
    conn.query_row(
        "SELECT id, display_name, profile_image FROM users WHERE id = ?1 AND is_active = 1",
        [id],
        |row| {
            Ok(UserProfile {
                id: row.get(0)?,
                display_name: row.get(1)?,
                profile_image: row.get(2)?,
            })
        },
    )
    .optional()
}
