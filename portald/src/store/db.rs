use std::path::Path;
use anyhow::{Context, Result};
use rusqlite::{Connection, params, OptionalExtension};
use shared::types::{InviteToken, NewPortal, PortalId, PortalListing, PortalRecord, VersionedPortal};
use chrono::Utc;
use uuid::Uuid;

const SELECT_PORTAL: &str =
    "SELECT id, name, address, port, scheme, version, created_at FROM portals";

/// Result of a create or update that may collide with a live portal.
#[derive(Debug)]
pub enum WriteOutcome {
    Written(VersionedPortal),
    /// Another portal already owns the (address, port) pair
    Conflict(String),
    /// Update target does not exist
    Missing,
}

pub struct PortalDb {
    conn: Connection,
}

impl PortalDb {
    /// Open or create the SQLite database with WAL mode enabled
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to enable WAL mode")?;

        // seq keeps creation order for listings
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS portals (
                seq        INTEGER PRIMARY KEY AUTOINCREMENT,
                id         TEXT NOT NULL UNIQUE,
                name       TEXT NOT NULL,
                address    TEXT NOT NULL,
                port       INTEGER NOT NULL,
                scheme     TEXT,
                version    INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (address, port)
            );

            CREATE TABLE IF NOT EXISTS invites (
                token      TEXT PRIMARY KEY,
                portal_id  TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS meta (
                key   TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );

            INSERT OR IGNORE INTO meta (key, value) VALUES ('version', 0);
            "#,
        )
        .context("Failed to create database schema")?;

        Ok(Self { conn })
    }

    /// Current global version stamp
    pub fn version(&self) -> Result<u64> {
        let version: i64 = self
            .conn
            .query_row("SELECT value FROM meta WHERE key = 'version'", [], |row| row.get(0))
            .context("Failed to read version stamp")?;
        Ok(version as u64)
    }

    /// Provision a portal under a fresh id
    pub fn create_portal(&self, new: &NewPortal) -> Result<WriteOutcome> {
        if let Some(reason) = self.find_conflict(new, None)? {
            return Ok(WriteOutcome::Conflict(reason));
        }

        let tx = self.conn.unchecked_transaction()
            .context("Failed to begin transaction")?;
        let version = bump_version(&tx)?;
        let id = PortalId(Uuid::new_v4().to_string());
        let created_at = Utc::now();

        tx.execute(
            "INSERT INTO portals (id, name, address, port, scheme, version, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id.as_str(),
                &new.name,
                &new.address,
                new.port,
                &new.scheme,
                version as i64,
                created_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert portal")?;
        tx.commit().context("Failed to commit portal insert")?;

        Ok(WriteOutcome::Written(VersionedPortal {
            record: PortalRecord {
                id,
                name: new.name.clone(),
                address: new.address.clone(),
                port: new.port,
                scheme: new.scheme.clone(),
            },
            version,
            created_at,
        }))
    }

    /// Replace the mutable fields of a portal, keeping its id and position
    pub fn update_portal(&self, id: &PortalId, new: &NewPortal) -> Result<WriteOutcome> {
        let Some(existing) = self.get_portal(id)? else {
            return Ok(WriteOutcome::Missing);
        };
        if let Some(reason) = self.find_conflict(new, Some(id))? {
            return Ok(WriteOutcome::Conflict(reason));
        }

        let unchanged = existing.record.name == new.name
            && existing.record.address == new.address
            && existing.record.port == new.port
            && existing.record.scheme == new.scheme;
        if unchanged {
            return Ok(WriteOutcome::Written(existing));
        }

        let tx = self.conn.unchecked_transaction()
            .context("Failed to begin transaction")?;
        let version = bump_version(&tx)?;
        tx.execute(
            "UPDATE portals SET name = ?1, address = ?2, port = ?3, scheme = ?4, version = ?5
             WHERE id = ?6",
            params![&new.name, &new.address, new.port, &new.scheme, version as i64, id.as_str()],
        )
        .context("Failed to update portal")?;
        tx.commit().context("Failed to commit portal update")?;

        Ok(WriteOutcome::Written(VersionedPortal {
            record: PortalRecord {
                id: id.clone(),
                name: new.name.clone(),
                address: new.address.clone(),
                port: new.port,
                scheme: new.scheme.clone(),
            },
            version,
            created_at: existing.created_at,
        }))
    }

    /// Delete a portal by id. Returns the removal stamp, or None if no
    /// such portal exists.
    pub fn delete_portal(&self, id: &PortalId) -> Result<Option<u64>> {
        let tx = self.conn.unchecked_transaction()
            .context("Failed to begin transaction")?;

        let removed = tx
            .execute("DELETE FROM portals WHERE id = ?1", params![id.as_str()])
            .context("Failed to delete portal")?;
        if removed == 0 {
            return Ok(None);
        }

        let version = bump_version(&tx)?;
        tx.execute("DELETE FROM invites WHERE portal_id = ?1", params![id.as_str()])
            .context("Failed to delete invites")?;
        tx.commit().context("Failed to commit portal delete")?;

        Ok(Some(version))
    }

    /// Full listing in creation order
    pub fn list_portals(&self) -> Result<PortalListing> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} ORDER BY seq", SELECT_PORTAL))
            .context("Failed to prepare query")?;

        let portals = stmt
            .query_map([], Self::row_to_portal)
            .context("Failed to query portals")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect portals")?;

        Ok(PortalListing {
            version: self.version()?,
            portals,
        })
    }

    pub fn get_portal(&self, id: &PortalId) -> Result<Option<VersionedPortal>> {
        let result = self
            .conn
            .query_row(
                &format!("{} WHERE id = ?1", SELECT_PORTAL),
                params![id.as_str()],
                Self::row_to_portal,
            )
            .optional()
            .context("Failed to query portal")?;

        Ok(result)
    }

    /// Mint an invitation for a live portal. None if the portal is gone.
    pub fn create_invite(&self, id: &PortalId) -> Result<Option<InviteToken>> {
        if self.get_portal(id)?.is_none() {
            return Ok(None);
        }

        let invite = InviteToken {
            token: Uuid::new_v4().simple().to_string(),
            portal_id: id.clone(),
            created_at: Utc::now(),
        };
        self.conn.execute(
            "INSERT INTO invites (token, portal_id, created_at) VALUES (?1, ?2, ?3)",
            params![&invite.token, id.as_str(), invite.created_at.to_rfc3339()],
        )
        .context("Failed to insert invite")?;

        Ok(Some(invite))
    }

    fn find_conflict(&self, new: &NewPortal, exclude: Option<&PortalId>) -> Result<Option<String>> {
        let exclude = exclude.map(PortalId::as_str).unwrap_or("");
        let clash: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM portals
                 WHERE address = ?1 AND port = ?2 AND id != ?3
                 LIMIT 1",
                params![&new.address, new.port, exclude],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to check for conflicting portals")?;

        Ok(clash.map(|name| {
            format!("{}:{} is already bound by portal {}", new.address, new.port, name)
        }))
    }

    fn row_to_portal(row: &rusqlite::Row) -> Result<VersionedPortal, rusqlite::Error> {
        let created_at_str: String = row.get(6)?;
        let created_at = chrono::DateTime::parse_from_rfc3339(&created_at_str)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(
                6,
                rusqlite::types::Type::Text,
                Box::new(e),
            ))?
            .with_timezone(&Utc);

        Ok(VersionedPortal {
            record: PortalRecord {
                id: PortalId(row.get(0)?),
                name: row.get(1)?,
                address: row.get(2)?,
                port: row.get::<_, u16>(3)?,
                scheme: row.get(4)?,
            },
            version: row.get::<_, i64>(5)? as u64,
            created_at,
        })
    }
}

fn bump_version(tx: &rusqlite::Transaction<'_>) -> Result<u64> {
    let version: i64 = tx
        .query_row(
            "UPDATE meta SET value = value + 1 WHERE key = 'version' RETURNING value",
            [],
            |row| row.get(0),
        )
        .context("Failed to bump version stamp")?;
    Ok(version as u64)
}
