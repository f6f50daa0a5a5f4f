use mockup_shared::types::FrameId;
use rusqlite::{params, params_from_iter, Connection};
use uuid::Uuid;

use crate::convert::{parse_enum, parse_ts, parse_uuid, ts};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Frame;

/// Result of replacing a project's frame set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaceOutcome {
    pub kept: usize,
    pub removed: usize,
}

impl Database {
    // -----------------------------------------------------------------------
    // Single frames
    // -----------------------------------------------------------------------

    /// Insert a frame, or overwrite the content and type of an existing one.
    /// The original creation time of an existing frame is kept. Fails with
    /// [`StoreError::FrameConflict`] when the id belongs to another project.
    pub fn upsert_frame(&self, frame: &Frame) -> Result<()> {
        upsert(self.conn(), frame)
    }

    pub fn get_frame(&self, id: &FrameId) -> Result<Frame> {
        self.conn()
            .query_row(
                "SELECT id, project_id, content, type, created_at FROM frames WHERE id = ?1",
                params![id.as_str()],
                row_to_frame,
            )
            .map_err(StoreError::from_query)
    }

    /// Frames of one project, oldest first.
    pub fn list_frames_for_project(&self, project_id: Uuid) -> Result<Vec<Frame>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, project_id, content, type, created_at
             FROM frames
             WHERE project_id = ?1
             ORDER BY created_at ASC, rowid ASC",
        )?;

        let rows = stmt.query_map(params![project_id.to_string()], row_to_frame)?;

        let mut frames = Vec::new();
        for row in rows {
            frames.push(row?);
        }
        Ok(frames)
    }

    // -----------------------------------------------------------------------
    // Whole-set replacement
    // -----------------------------------------------------------------------

    /// Delete every frame of the project whose id is not in `keep`.
    /// Returns the number of rows removed.
    pub fn delete_frames_except(&self, project_id: Uuid, keep: &[FrameId]) -> Result<usize> {
        delete_except(self.conn(), project_id, keep)
    }

    /// Make the stored frame set of `project_id` equal to `frames`: upsert
    /// every given frame and delete the rest, atomically. Nothing changes
    /// if any id is owned by another project.
    pub fn replace_project_frames(
        &mut self,
        project_id: Uuid,
        frames: &[Frame],
    ) -> Result<ReplaceOutcome> {
        let tx = self.conn_mut().transaction()?;

        let mut kept = 0;
        for frame in frames {
            upsert(&tx, frame)?;
            kept += 1;
        }
        let keep: Vec<FrameId> = frames.iter().map(|f| f.id.clone()).collect();
        let removed = delete_except(&tx, project_id, &keep)?;

        tx.commit()?;

        tracing::debug!(
            project = %project_id,
            kept,
            removed,
            "replaced frame set"
        );
        Ok(ReplaceOutcome { kept, removed })
    }
}

fn upsert(conn: &Connection, frame: &Frame) -> Result<()> {
    // The conflict clause skips rows of other projects, which reports zero
    // changes instead of an error.
    let changed = conn.execute(
        "INSERT INTO frames (id, project_id, content, type, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
             content = excluded.content,
             type = excluded.type
         WHERE frames.project_id = excluded.project_id",
        params![
            frame.id.as_str(),
            frame.project_id.to_string(),
            frame.content,
            frame.device.as_str(),
            ts(&frame.created_at),
        ],
    )?;
    if changed == 0 {
        return Err(StoreError::FrameConflict(frame.id.as_str().to_string()));
    }
    Ok(())
}

fn delete_except(conn: &Connection, project_id: Uuid, keep: &[FrameId]) -> Result<usize> {
    let removed = if keep.is_empty() {
        conn.execute(
            "DELETE FROM frames WHERE project_id = ?1",
            params![project_id.to_string()],
        )?
    } else {
        let placeholders = (0..keep.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("DELETE FROM frames WHERE project_id = ?1 AND id NOT IN ({placeholders})");

        let mut values = Vec::with_capacity(keep.len() + 1);
        values.push(project_id.to_string());
        values.extend(keep.iter().map(|id| id.as_str().to_string()));
        conn.execute(&sql, params_from_iter(values))?
    };
    Ok(removed)
}

fn row_to_frame(row: &rusqlite::Row<'_>) -> rusqlite::Result<Frame> {
    let id: String = row.get(0)?;
    let project_id: String = row.get(1)?;
    let content: String = row.get(2)?;
    let device: String = row.get(3)?;
    let created_at: String = row.get(4)?;

    Ok(Frame {
        id: FrameId(id),
        project_id: parse_uuid(1, &project_id)?,
        content,
        device: parse_enum(3, &device)?,
        created_at: parse_ts(4, &created_at)?,
    })
}
