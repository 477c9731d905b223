//! CRUD operations for [`Report`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;
use rentline_shared::types::UserId;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::{opt_timestamp_at, timestamp_at, uuid_at, Report};

impl Database {
    pub fn create_report(&self, report: &Report) -> Result<()> {
        self.conn().execute(
            "INSERT INTO reports (id, reporter_id, subject, details, resolved, created_at, resolved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                report.id.to_string(),
                report.reporter_id.to_string(),
                report.subject,
                report.details,
                report.resolved,
                report.created_at.to_rfc3339(),
                report.resolved_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn get_report(&self, id: Uuid) -> Result<Report> {
        self.conn()
            .query_row(
                "SELECT id, reporter_id, subject, details, resolved, created_at, resolved_at
                 FROM reports WHERE id = ?1",
                params![id.to_string()],
                row_to_report,
            )
            .map_err(not_found)
    }

    /// Mark a report resolved. Returns `false` if it does not exist or was
    /// already resolved.
    pub fn resolve_report(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE reports SET resolved = 1, resolved_at = ?1
             WHERE id = ?2 AND resolved = 0",
            params![now.to_rfc3339(), id.to_string()],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_report(row: &rusqlite::Row<'_>) -> rusqlite::Result<Report> {
    Ok(Report {
        id: uuid_at(row, 0)?,
        reporter_id: UserId(uuid_at(row, 1)?),
        subject: row.get(2)?,
        details: row.get(3)?,
        resolved: row.get(4)?,
        created_at: timestamp_at(row, 5)?,
        resolved_at: opt_timestamp_at(row, 6)?,
    })
}
