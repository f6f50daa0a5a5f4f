use mockup_shared::constants::DEFAULT_PROJECT_NAME;
use rusqlite::params;
use uuid::Uuid;

use crate::convert::{now, parse_ts, parse_uuid, ts};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Project, ProjectSnapshot};

impl Database {
    pub fn insert_project(&self, project: &Project) -> Result<()> {
        self.conn().execute(
            "INSERT INTO projects (id, user_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                project.id.to_string(),
                project.user_id.to_string(),
                project.name,
                ts(&project.created_at),
            ],
        )?;
        Ok(())
    }

    /// Create a project owned by `user_id`.
    pub fn create_project(&self, user_id: Uuid, name: &str) -> Result<Project> {
        let project = Project {
            id: Uuid::new_v4(),
            user_id,
            name: name.to_string(),
            created_at: now(),
        };
        self.insert_project(&project)?;
        tracing::debug!(project = %project.id, user = %user_id, "created project");
        Ok(project)
    }

    pub fn get_project(&self, id: Uuid) -> Result<Project> {
        self.conn()
            .query_row(
                "SELECT id, user_id, name, created_at FROM projects WHERE id = ?1",
                params![id.to_string()],
                row_to_project,
            )
            .map_err(StoreError::from_query)
    }

    /// Like [`Database::get_project`], but a project owned by someone else
    /// is reported as not found.
    pub fn get_owned_project(&self, id: Uuid, user_id: Uuid) -> Result<Project> {
        self.conn()
            .query_row(
                "SELECT id, user_id, name, created_at FROM projects
                 WHERE id = ?1 AND user_id = ?2",
                params![id.to_string(), user_id.to_string()],
                row_to_project,
            )
            .map_err(StoreError::from_query)
    }

    /// Projects of one user, newest first.
    pub fn list_projects_for_user(&self, user_id: Uuid) -> Result<Vec<Project>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, user_id, name, created_at FROM projects
             WHERE user_id = ?1
             ORDER BY created_at DESC, rowid DESC",
        )?;

        let rows = stmt.query_map(params![user_id.to_string()], row_to_project)?;

        let mut projects = Vec::new();
        for row in rows {
            projects.push(row?);
        }
        Ok(projects)
    }

    pub fn count_projects_for_user(&self, user_id: Uuid) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM projects WHERE user_id = ?1",
            params![user_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// List the user's projects, creating the default one first if the
    /// user has none.
    pub fn ensure_default_project(&self, user_id: Uuid) -> Result<Vec<Project>> {
        let projects = self.list_projects_for_user(user_id)?;
        if !projects.is_empty() {
            return Ok(projects);
        }
        Ok(vec![self.create_project(user_id, DEFAULT_PROJECT_NAME)?])
    }

    /// Rename a project owned by `user_id`.
    pub fn rename_project(&self, id: Uuid, user_id: Uuid, name: &str) -> Result<Project> {
        let affected = self.conn().execute(
            "UPDATE projects SET name = ?3 WHERE id = ?1 AND user_id = ?2",
            params![id.to_string(), user_id.to_string(), name],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_project(id)
    }

    /// Delete a project owned by `user_id` together with its messages and
    /// frames.
    pub fn delete_project(&self, id: Uuid, user_id: Uuid) -> Result<()> {
        let affected = self.conn().execute(
            "DELETE FROM projects WHERE id = ?1 AND user_id = ?2",
            params![id.to_string(), user_id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Project plus its transcript and frames, both oldest first.
    pub fn project_snapshot(&self, id: Uuid, user_id: Uuid) -> Result<ProjectSnapshot> {
        let project = self.get_owned_project(id, user_id)?;
        let messages = self.list_messages_for_project(id)?;
        let frames = self.list_frames_for_project(id)?;
        Ok(ProjectSnapshot {
            project,
            messages,
            frames,
        })
    }
}

fn row_to_project(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
    let id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let name: String = row.get(2)?;
    let created_at: String = row.get(3)?;

    Ok(Project {
        id: parse_uuid(0, &id)?,
        user_id: parse_uuid(1, &user_id)?,
        name,
        created_at: parse_ts(3, &created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_with_user() -> (Database, Uuid) {
        let db = Database::open_in_memory().unwrap();
        let user = Uuid::new_v4();
        db.ensure_profile(user, 20).unwrap();
        (db, user)
    }

    #[test]
    fn test_default_project_created_once() {
        let (db, user) = db_with_user();

        let first = db.ensure_default_project(user).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].name, DEFAULT_PROJECT_NAME);

        let second = db.ensure_default_project(user).unwrap();
        assert_eq!(second, first);
    }

    #[test]
    fn test_list_is_newest_first() {
        let (db, user) = db_with_user();
        let a = db.create_project(user, "App 1").unwrap();
        let b = db.create_project(user, "App 2").unwrap();

        let listed = db.list_projects_for_user(user).unwrap();
        assert_eq!(listed.iter().map(|p| p.id).collect::<Vec<_>>(), vec![b.id, a.id]);
        assert_eq!(db.count_projects_for_user(user).unwrap(), 2);
    }

    #[test]
    fn test_foreign_project_is_not_found() {
        let (db, owner) = db_with_user();
        let other = Uuid::new_v4();
        db.ensure_profile(other, 20).unwrap();

        let project = db.create_project(owner, "Mine").unwrap();
        assert!(db.get_owned_project(project.id, owner).is_ok());
        assert!(matches!(
            db.get_owned_project(project.id, other),
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            db.project_snapshot(project.id, other),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_rename_and_delete_are_owner_scoped() {
        let (db, owner) = db_with_user();
        let stranger = Uuid::new_v4();
        let project = db.create_project(owner, "App 1").unwrap();

        assert!(matches!(
            db.rename_project(project.id, stranger, "Stolen"),
            Err(StoreError::NotFound)
        ));
        let renamed = db.rename_project(project.id, owner, "Travel").unwrap();
        assert_eq!(renamed.name, "Travel");

        assert!(db.delete_project(project.id, stranger).is_err());
        db.delete_project(project.id, owner).unwrap();
        assert!(db.list_projects_for_user(owner).unwrap().is_empty());
    }

    #[test]
    fn test_delete_cascades_to_frames_and_messages() {
        use mockup_shared::types::{DeviceMode, FrameId, Role};

        use crate::models::{Frame, Message};

        let (db, owner) = db_with_user();
        let project = db.create_project(owner, "App 1").unwrap();
        db.insert_message(&Message::new(project.id, Role::User, "hi")).unwrap();
        db.upsert_frame(&Frame {
            id: FrameId::from("f1"),
            project_id: project.id,
            content: String::new(),
            device: DeviceMode::Mobile,
            created_at: now(),
        })
        .unwrap();

        db.delete_project(project.id, owner).unwrap();
        assert!(db.list_messages_for_project(project.id).unwrap().is_empty());
        assert!(matches!(
            db.get_frame(&FrameId::from("f1")),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_project_requires_profile() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.create_project(Uuid::new_v4(), "Orphan").is_err());
    }
}
