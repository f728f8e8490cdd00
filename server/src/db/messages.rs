use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::models::{ChatMessage, MessageKind, ReadReceipt};
use crate::error::CoreResult;
use crate::geo::Coordinates;

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub ride_id: String,
    pub sender_id: String,
    pub recipient_ids: Vec<String>,
    pub content: String,
    pub kind: MessageKind,
    pub metadata: Option<serde_json::Value>,
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

/// Persist a message together with its recipient snapshot.
pub fn insert_message(conn: &mut Connection, msg: NewMessage) -> CoreResult<ChatMessage> {
    let id = Uuid::now_v7().to_string();
    let created_at = Utc::now();
    let metadata = msg.metadata.as_ref().map(|m| m.to_string());

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO messages (id, ride_id, sender_id, content, kind, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            id,
            msg.ride_id,
            msg.sender_id,
            msg.content,
            msg.kind.as_str(),
            metadata,
            created_at.to_rfc3339()
        ],
    )?;
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO message_recipients (message_id, user_id) VALUES (?1, ?2)",
        )?;
        for recipient in &msg.recipient_ids {
            stmt.execute(rusqlite::params![id, recipient])?;
        }
    }
    tx.commit()?;

    Ok(ChatMessage {
        id,
        ride_id: msg.ride_id,
        sender_id: msg.sender_id,
        recipient_ids: msg.recipient_ids,
        content: msg.content,
        kind: msg.kind,
        metadata: msg.metadata,
        created_at,
        read_by: Vec::new(),
    })
}

pub fn get_message(conn: &Connection, message_id: &str) -> CoreResult<Option<ChatMessage>> {
    let row = conn
        .query_row(
            "SELECT id, ride_id, sender_id, content, kind, metadata, created_at
             FROM messages WHERE id = ?1",
            [message_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            },
        )
        .optional()?;

    let Some((id, ride_id, sender_id, content, kind, metadata, created_at)) = row else {
        return Ok(None);
    };

    let recipient_ids: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT user_id FROM message_recipients WHERE message_id = ?1 ORDER BY user_id",
        )?;
        let rows = stmt.query_map([&id], |row| row.get::<_, String>(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };

    let read_by: Vec<ReadReceipt> = {
        let mut stmt = conn.prepare(
            "SELECT user_id, read_at FROM message_reads WHERE message_id = ?1 ORDER BY read_at",
        )?;
        let rows = stmt.query_map([&id], |row| {
            let read_at: String = row.get(1)?;
            Ok(ReadReceipt {
                user_id: row.get(0)?,
                read_at: parse_timestamp(&read_at),
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };

    Ok(Some(ChatMessage {
        id,
        ride_id,
        sender_id,
        recipient_ids,
        content,
        kind: MessageKind::parse(&kind).unwrap_or(MessageKind::Text),
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        created_at: parse_timestamp(&created_at),
        read_by,
    }))
}

/// Record a read receipt. Returns the receipt only when this call created it;
/// re-marking an already-read message is a no-op.
pub fn mark_read(
    conn: &Connection,
    message_id: &str,
    user_id: &str,
) -> rusqlite::Result<Option<ReadReceipt>> {
    let read_at = Utc::now();
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![message_id, user_id, read_at.to_rfc3339()],
    )?;
    Ok((inserted == 1).then(|| ReadReceipt {
        user_id: user_id.to_string(),
        read_at,
    }))
}

/// Persist an emergency alert and return its id.
pub fn insert_emergency_alert(
    conn: &Connection,
    ride_id: &str,
    user_id: &str,
    alert_type: &str,
    description: Option<&str>,
    location: Option<Coordinates>,
) -> rusqlite::Result<String> {
    let id = Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO emergency_alerts (id, ride_id, user_id, alert_type, description, lat, lng, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            id,
            ride_id,
            user_id,
            alert_type,
            description,
            location.map(|l| l.lat),
            location.map(|l| l.lng),
            Utc::now().to_rfc3339()
        ],
    )?;
    Ok(id)
}
