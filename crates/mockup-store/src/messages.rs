use rusqlite::params;
use uuid::Uuid;

use crate::convert::{parse_enum, parse_ts, parse_uuid, ts};
use crate::database::Database;
use crate::error::Result;
use crate::models::Message;

impl Database {
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages (id, project_id, role, content, image, kind, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.id.to_string(),
                message.project_id.to_string(),
                message.role.as_str(),
                message.content,
                message.image,
                message.kind.as_str(),
                ts(&message.created_at),
            ],
        )?;
        Ok(())
    }

    /// Transcript of one project, oldest first.
    pub fn list_messages_for_project(&self, project_id: Uuid) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, project_id, role, content, image, kind, created_at
             FROM messages
             WHERE project_id = ?1
             ORDER BY created_at ASC, rowid ASC",
        )?;

        let rows = stmt.query_map(params![project_id.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id: String = row.get(0)?;
    let project_id: String = row.get(1)?;
    let role: String = row.get(2)?;
    let content: String = row.get(3)?;
    let image: Option<String> = row.get(4)?;
    let kind: String = row.get(5)?;
    let created_at: String = row.get(6)?;

    Ok(Message {
        id: parse_uuid(0, &id)?,
        project_id: parse_uuid(1, &project_id)?,
        role: parse_enum(2, &role)?,
        content,
        image,
        kind: parse_enum(5, &kind)?,
        created_at: parse_ts(6, &created_at)?,
    })
}
