//! SQLite-backed store using sqlx.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use super::Store;
use crate::model::{
    Domain, DomainInfo, DomainStatus, Observation, ObservationKind, Program, ProgramType, Stats, StatusChange,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Schema versions, applied in order and tracked in `PRAGMA user_version`.
const MIGRATIONS: &[&[&str]] = &[
    &[
        r#"
        CREATE TABLE programs (
            handle TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            url TEXT NOT NULL,
            primary_domain TEXT,
            offers_bounties INTEGER NOT NULL DEFAULT 0,
            program_type TEXT NOT NULL,
            last_scanned TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE domains (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            domain TEXT NOT NULL,
            program TEXT NOT NULL,
            status TEXT NOT NULL,
            discovered_at TEXT NOT NULL,
            last_checked TEXT NOT NULL,
            is_new INTEGER NOT NULL DEFAULT 1,
            UNIQUE(domain, program)
        )
        "#,
        r#"
        CREATE TABLE status_changes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            domain TEXT NOT NULL,
            program TEXT NOT NULL,
            old_status TEXT NOT NULL,
            new_status TEXT NOT NULL,
            changed_at TEXT NOT NULL,
            notified INTEGER NOT NULL DEFAULT 0
        )
        "#,
        "CREATE INDEX idx_domains_program ON domains(program)",
        "CREATE INDEX idx_domains_status ON domains(status)",
        "CREATE INDEX idx_domains_is_new ON domains(is_new)",
        "CREATE INDEX idx_domains_discovered_at ON domains(discovered_at)",
        "CREATE INDEX idx_status_changes_notified ON status_changes(notified)",
        "CREATE INDEX idx_programs_type ON programs(program_type)",
        "CREATE INDEX idx_programs_bounties ON programs(offers_bounties)",
    ],
    &[r#"
        CREATE TABLE domain_info (
            domain TEXT NOT NULL,
            program TEXT NOT NULL,
            status TEXT NOT NULL,
            status_code INTEGER,
            title TEXT,
            technologies TEXT NOT NULL DEFAULT '[]',
            server TEXT,
            content_type TEXT,
            content_length INTEGER,
            last_checked TEXT NOT NULL,
            PRIMARY KEY (domain, program)
        )
        "#],
];

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) a database file in WAL mode and bring its schema up to date.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open SQLite database at {}", path.display()))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Private in-memory database. A single connection, kept alive for the pool's lifetime.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("Invalid in-memory SQLite url")?
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory SQLite database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn schema_version(&self) -> Result<i64> {
        sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await
            .context("Failed to read schema version")
    }

    async fn migrate(&self) -> Result<()> {
        let current = self.schema_version().await?;
        for (idx, statements) in MIGRATIONS.iter().enumerate() {
            let version = idx as i64 + 1;
            if version <= current {
                continue;
            }
            let mut tx = self.pool.begin().await?;
            for statement in statements.iter() {
                sqlx::query(statement)
                    .execute(&mut *tx)
                    .await
                    .with_context(|| format!("Failed to apply schema migration {}", version))?;
            }
            sqlx::query(&format!("PRAGMA user_version = {}", version))
                .execute(&mut *tx)
                .await
                .context("Failed to bump schema version")?;
            tx.commit().await?;
            tracing::debug!(version, "applied schema migration");
        }
        Ok(())
    }

    async fn fetch_programs(&self, filter: &str, bind: Option<&str>, limit: usize) -> Result<Vec<Program>> {
        let sql = format!(
            "SELECT handle, name, url, primary_domain, offers_bounties, program_type, last_scanned
             FROM programs {} ORDER BY last_scanned DESC, handle ASC LIMIT ?",
            filter
        );
        let mut query = sqlx::query(&sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        let rows = query
            .bind(clamp_limit(limit))
            .fetch_all(&self.pool)
            .await
            .context("Failed to list programs")?;
        rows.iter().map(program_from_row).collect()
    }

    async fn fetch_domains(&self, filter: &str, bind: Option<&str>, limit: usize) -> Result<Vec<Domain>> {
        let sql = format!(
            "SELECT domain, program, status, discovered_at, last_checked, is_new
             FROM domains {} ORDER BY discovered_at DESC, domain ASC LIMIT ?",
            filter
        );
        let mut query = sqlx::query(&sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        let rows = query
            .bind(clamp_limit(limit))
            .fetch_all(&self.pool)
            .await
            .context("Failed to list domains")?;
        rows.iter().map(domain_from_row).collect()
    }
}

fn clamp_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn program_from_row(row: &SqliteRow) -> Result<Program> {
    Ok(Program {
        handle: row.get("handle"),
        name: row.get("name"),
        url: row.get("url"),
        primary_domain: row.get("primary_domain"),
        offers_bounties: row.get("offers_bounties"),
        program_type: row.get::<String, _>("program_type").parse()?,
        last_scanned: row.get("last_scanned"),
    })
}

fn domain_from_row(row: &SqliteRow) -> Result<Domain> {
    Ok(Domain {
        name: row.get("domain"),
        program: row.get("program"),
        status: row.get::<String, _>("status").parse()?,
        discovered_at: row.get("discovered_at"),
        last_checked: row.get("last_checked"),
        is_new: row.get("is_new"),
    })
}

fn change_from_row(row: &SqliteRow) -> Result<StatusChange> {
    Ok(StatusChange {
        id: row.get("id"),
        domain: row.get("domain"),
        program: row.get("program"),
        old_status: row.get::<String, _>("old_status").parse()?,
        new_status: row.get::<String, _>("new_status").parse()?,
        changed_at: row.get("changed_at"),
        notified: row.get("notified"),
    })
}

fn info_from_row(row: &SqliteRow) -> Result<DomainInfo> {
    let technologies: String = row.get("technologies");
    Ok(DomainInfo {
        domain: row.get("domain"),
        program: row.get("program"),
        status: row.get::<String, _>("status").parse()?,
        status_code: row
            .get::<Option<i64>, _>("status_code")
            .and_then(|c| u16::try_from(c).ok()),
        title: row.get("title"),
        technologies: serde_json::from_str(&technologies).context("Corrupt technologies column")?,
        server: row.get("server"),
        content_type: row.get("content_type"),
        content_length: row
            .get::<Option<i64>, _>("content_length")
            .and_then(|l| u64::try_from(l).ok()),
        last_checked: row.get("last_checked"),
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_program(&self, program: &Program) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO programs (handle, name, url, primary_domain, offers_bounties, program_type, last_scanned)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(handle) DO UPDATE SET
                name = excluded.name,
                url = excluded.url,
                primary_domain = excluded.primary_domain,
                offers_bounties = excluded.offers_bounties,
                program_type = excluded.program_type,
                last_scanned = excluded.last_scanned
            "#,
        )
        .bind(&program.handle)
        .bind(&program.name)
        .bind(&program.url)
        .bind(&program.primary_domain)
        .bind(program.offers_bounties)
        .bind(program.program_type.as_str())
        .bind(program.last_scanned)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert program {}", program.handle))?;
        Ok(())
    }

    async fn record_observation(
        &self,
        domain: &str,
        program: &str,
        status: DomainStatus,
        now: DateTime<Utc>,
    ) -> Result<Observation> {
        let mut tx = self.pool.begin().await?;

        // Leading write: the transaction holds the write lock from here to commit.
        let inserted = sqlx::query(
            r#"
            INSERT INTO domains (domain, program, status, discovered_at, last_checked, is_new)
            VALUES (?, ?, ?, ?, ?, 1)
            ON CONFLICT(domain, program) DO NOTHING
            "#,
        )
        .bind(domain)
        .bind(program)
        .bind(status.as_str())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to record observation for {}", domain))?
        .rows_affected();

        if inserted == 1 {
            tx.commit().await?;
            return Ok(Observation { kind: ObservationKind::Created, transition: None });
        }

        let old_status: DomainStatus = sqlx::query("SELECT status FROM domains WHERE domain = ? AND program = ?")
            .bind(domain)
            .bind(program)
            .fetch_one(&mut *tx)
            .await
            .context("Failed to read current domain status")?
            .get::<String, _>("status")
            .parse()?;

        sqlx::query("UPDATE domains SET status = ?, last_checked = ?, is_new = 0 WHERE domain = ? AND program = ?")
            .bind(status.as_str())
            .bind(now)
            .bind(domain)
            .bind(program)
            .execute(&mut *tx)
            .await
            .context("Failed to update domain")?;

        let transition = if old_status != status {
            let id = sqlx::query(
                r#"
                INSERT INTO status_changes (domain, program, old_status, new_status, changed_at, notified)
                VALUES (?, ?, ?, ?, ?, 0)
                "#,
            )
            .bind(domain)
            .bind(program)
            .bind(old_status.as_str())
            .bind(status.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("Failed to append status change")?
            .last_insert_rowid();

            Some(StatusChange {
                id,
                domain: domain.to_string(),
                program: program.to_string(),
                old_status,
                new_status: status,
                changed_at: now,
                notified: false,
            })
        } else {
            None
        };

        tx.commit().await?;
        Ok(Observation { kind: ObservationKind::Updated, transition })
    }

    async fn list_programs(&self, limit: usize) -> Result<Vec<Program>> {
        self.fetch_programs("", None, limit).await
    }

    async fn list_programs_by_type(&self, program_type: ProgramType, limit: usize) -> Result<Vec<Program>> {
        self.fetch_programs("WHERE program_type = ?", Some(program_type.as_str()), limit)
            .await
    }

    async fn list_bounty_programs(&self, limit: usize) -> Result<Vec<Program>> {
        self.fetch_programs("WHERE offers_bounties = 1", None, limit).await
    }

    async fn list_new_domains(&self, limit: usize) -> Result<Vec<Domain>> {
        self.fetch_domains("WHERE is_new = 1", None, limit).await
    }

    async fn list_domains_by_program(&self, program: &str, limit: usize) -> Result<Vec<Domain>> {
        self.fetch_domains("WHERE program = ?", Some(program), limit).await
    }

    async fn list_status_changes(&self, only_unnotified: bool, limit: usize) -> Result<Vec<StatusChange>> {
        let filter = if only_unnotified { "WHERE notified = 0" } else { "" };
        let sql = format!(
            "SELECT id, domain, program, old_status, new_status, changed_at, notified
             FROM status_changes {} ORDER BY changed_at DESC, id DESC LIMIT ?",
            filter
        );
        let rows = sqlx::query(&sql)
            .bind(clamp_limit(limit))
            .fetch_all(&self.pool)
            .await
            .context("Failed to list status changes")?;
        rows.iter().map(change_from_row).collect()
    }

    async fn mark_notified(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE status_changes SET notified = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to mark status change {} notified", id))?;
        Ok(result.rows_affected() > 0)
    }

    async fn stats(&self) -> Result<Stats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN is_new = 1 THEN 1 ELSE 0 END), 0) AS new,
                COALESCE(SUM(CASE WHEN status = 'up' THEN 1 ELSE 0 END), 0) AS up,
                COALESCE(SUM(CASE WHEN status = 'down' THEN 1 ELSE 0 END), 0) AS down,
                COALESCE(SUM(CASE WHEN status = 'unknown' THEN 1 ELSE 0 END), 0) AS unknown
            FROM domains
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to count domains")?;

        let programs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM programs")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count programs")?;

        let count = |name: &str| row.get::<i64, _>(name).max(0) as u64;
        Ok(Stats {
            total_domains: count("total"),
            new_domains: count("new"),
            up_domains: count("up"),
            down_domains: count("down"),
            unknown_domains: count("unknown"),
            total_programs: programs.max(0) as u64,
        })
    }

    async fn save_domain_info(&self, info: &DomainInfo) -> Result<()> {
        let technologies = serde_json::to_string(&info.technologies)?;
        sqlx::query(
            r#"
            INSERT INTO domain_info (domain, program, status, status_code, title, technologies,
                                     server, content_type, content_length, last_checked)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(domain, program) DO UPDATE SET
                status = excluded.status,
                status_code = excluded.status_code,
                title = excluded.title,
                technologies = excluded.technologies,
                server = excluded.server,
                content_type = excluded.content_type,
                content_length = excluded.content_length,
                last_checked = excluded.last_checked
            "#,
        )
        .bind(&info.domain)
        .bind(&info.program)
        .bind(info.status.as_str())
        .bind(info.status_code.map(i64::from))
        .bind(&info.title)
        .bind(technologies)
        .bind(&info.server)
        .bind(&info.content_type)
        .bind(info.content_length.and_then(|l| i64::try_from(l).ok()))
        .bind(info.last_checked)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save domain info for {}", info.domain))?;
        Ok(())
    }

    async fn get_domain_info(&self, domain: &str, program: &str) -> Result<Option<DomainInfo>> {
        let row = sqlx::query(
            r#"
            SELECT domain, program, status, status_code, title, technologies,
                   server, content_type, content_length, last_checked
            FROM domain_info WHERE domain = ? AND program = ?
            "#,
        )
        .bind(domain)
        .bind(program)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load domain info")?;

        row.as_ref().map(info_from_row).transpose()
    }
}
