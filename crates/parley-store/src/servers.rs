use parley_shared::models::{Category, Member, Membership, Role, Server};
use parley_shared::{ProfileId, RoleId, ServerId};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::Result;
use crate::rows::{fmt_ts, id_col, snapshot_cols, ts_col};

impl Database {
    // -----------------------------------------------------------------------
    // Servers
    // -----------------------------------------------------------------------

    pub fn insert_server(&self, server: &Server) -> Result<()> {
        self.conn().execute(
            "INSERT INTO servers (id, name, icon_url, owner_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                server.id.to_string(),
                server.name,
                server.icon_url,
                server.owner_id.to_string(),
                fmt_ts(&server.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_server(&self, id: ServerId) -> Result<Server> {
        Ok(self.conn().query_row(
            "SELECT id, name, icon_url, owner_id, created_at FROM servers WHERE id = ?1",
            params![id.to_string()],
            row_to_server,
        )?)
    }

    /// Servers the profile holds a membership on, oldest first.
    pub fn list_servers_for_profile(&self, profile: ProfileId) -> Result<Vec<Server>> {
        let mut stmt = self.conn().prepare(
            "SELECT s.id, s.name, s.icon_url, s.owner_id, s.created_at
             FROM servers s
             JOIN memberships m ON m.server_id = s.id
             WHERE m.profile_id = ?1
             ORDER BY s.created_at ASC",
        )?;
        let rows = stmt.query_map(params![profile.to_string()], row_to_server)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Overwrite name and icon.
    pub fn update_server(&self, server: &Server) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE servers SET name = ?2, icon_url = ?3 WHERE id = ?1",
            params![server.id.to_string(), server.name, server.icon_url],
        )?;
        if affected == 0 {
            return Err(crate::StoreError::NotFound);
        }
        Ok(())
    }

    // ON DELETE CASCADE: roles, categories, channels, memberships and channel
    // messages go with it
    pub fn delete_server(&self, id: ServerId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM servers WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }

    // -----------------------------------------------------------------------
    // Roles and categories
    // -----------------------------------------------------------------------

    pub fn insert_role(&self, role: &Role) -> Result<()> {
        self.conn().execute(
            "INSERT INTO roles (id, server_id, name, is_default, position)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                role.id.to_string(),
                role.server_id.to_string(),
                role.name,
                role.is_default,
                role.position,
            ],
        )?;
        Ok(())
    }

    pub fn get_default_role(&self, server: ServerId) -> Result<Role> {
        Ok(self.conn().query_row(
            "SELECT id, server_id, name, is_default, position FROM roles
             WHERE server_id = ?1 AND is_default = 1",
            params![server.to_string()],
            row_to_role,
        )?)
    }

    pub fn list_roles(&self, server: ServerId) -> Result<Vec<Role>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, server_id, name, is_default, position FROM roles
             WHERE server_id = ?1 ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(params![server.to_string()], row_to_role)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn insert_category(&self, category: &Category) -> Result<()> {
        self.conn().execute(
            "INSERT INTO categories (id, server_id, name, position) VALUES (?1, ?2, ?3, ?4)",
            params![
                category.id.to_string(),
                category.server_id.to_string(),
                category.name,
                category.position,
            ],
        )?;
        Ok(())
    }

    pub fn list_categories(&self, server: ServerId) -> Result<Vec<Category>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, server_id, name, position FROM categories
             WHERE server_id = ?1 ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(params![server.to_string()], |row| {
            Ok(Category {
                id: id_col(row, 0)?,
                server_id: id_col(row, 1)?,
                name: row.get(2)?,
                position: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // -----------------------------------------------------------------------
    // Memberships
    // -----------------------------------------------------------------------

    pub fn insert_membership(&self, membership: &Membership) -> Result<()> {
        self.conn().execute(
            "INSERT INTO memberships (id, profile_id, server_id, role_id, joined_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                membership.id.to_string(),
                membership.profile_id.to_string(),
                membership.server_id.to_string(),
                membership.role_id.to_string(),
                fmt_ts(&membership.joined_at),
            ],
        )?;
        Ok(())
    }

    pub fn find_membership(&self, profile: ProfileId, server: ServerId) -> Result<Option<Membership>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT id, profile_id, server_id, role_id, joined_at FROM memberships
                 WHERE profile_id = ?1 AND server_id = ?2",
                params![profile.to_string(), server.to_string()],
                row_to_membership,
            )
            .optional()?)
    }

    pub fn delete_membership(&self, profile: ProfileId, server: ServerId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM memberships WHERE profile_id = ?1 AND server_id = ?2",
            params![profile.to_string(), server.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Members joined with their profiles. Members whose profile has been
    /// removed are listed with a placeholder snapshot.
    pub fn list_members(&self, server: ServerId) -> Result<Vec<Member>> {
        let mut stmt = self.conn().prepare(
            "SELECT m.id, m.profile_id, m.server_id, m.role_id, m.joined_at,
                    p.username, p.display_name, p.avatar_url
             FROM memberships m
             LEFT JOIN profiles p ON p.id = m.profile_id
             WHERE m.server_id = ?1
             ORDER BY m.joined_at ASC",
        )?;
        let rows = stmt.query_map(params![server.to_string()], |row| {
            let membership = row_to_membership(row)?;
            Ok(Member {
                profile: snapshot_cols(row, membership.profile_id, 5)?,
                membership,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn row_to_server(row: &rusqlite::Row<'_>) -> rusqlite::Result<Server> {
    Ok(Server {
        id: id_col(row, 0)?,
        name: row.get(1)?,
        icon_url: row.get(2)?,
        owner_id: id_col(row, 3)?,
        created_at: ts_col(row, 4)?,
    })
}

fn row_to_role(row: &rusqlite::Row<'_>) -> rusqlite::Result<Role> {
    Ok(Role {
        id: id_col::<RoleId>(row, 0)?,
        server_id: id_col(row, 1)?,
        name: row.get(2)?,
        is_default: row.get(3)?,
        position: row.get(4)?,
    })
}

fn row_to_membership(row: &rusqlite::Row<'_>) -> rusqlite::Result<Membership> {
    Ok(Membership {
        id: id_col(row, 0)?,
        profile_id: id_col(row, 1)?,
        server_id: id_col(row, 2)?,
        role_id: id_col(row, 3)?,
        joined_at: ts_col(row, 4)?,
    })
}
