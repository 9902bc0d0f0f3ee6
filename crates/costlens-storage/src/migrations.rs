//! Database schema migrations.
//!
//! Applies the cost dashboard schema: projects, resource groups, their cost
//! tables, AI consumption, and the cloud connection registry.

use rusqlite::Connection;
use tracing::info;

use costlens_core::error::CostlensError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), CostlensError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| CostlensError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| CostlensError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: cost_dashboard_schema");
    }

    Ok(())
}

/// Version 1: cost dashboard schema.
fn apply_v1(conn: &Connection) -> Result<(), CostlensError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS project (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            project_name        TEXT NOT NULL,
            project_type        TEXT NOT NULL
                                CHECK (project_type IN ('Internal', 'External', 'Client Demo')),
            member_firm         TEXT NOT NULL,
            deployed_region     TEXT NOT NULL
                                CHECK (deployed_region IN ('US', 'EU', 'APAC')),
            is_active           INTEGER DEFAULT 1,
            description         TEXT,
            engagement_code     TEXT,
            engagement_partner  TEXT,
            opportunity_code    TEXT,
            engagement_manager  TEXT,
            project_startdate   TEXT NOT NULL,
            project_enddate     TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS aiq_consumption (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id          INTEGER NOT NULL REFERENCES project (id),
            aiq_assumption_name TEXT,
            consumption_amount  NUMERIC NOT NULL,
            consumption_day     TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_aiq_consumption_project_day
            ON aiq_consumption (project_id, consumption_day);

        CREATE TABLE IF NOT EXISTS resource_group (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            resource_group_name TEXT NOT NULL,
            project_id          INTEGER NOT NULL REFERENCES project (id),
            status              TEXT
        );

        CREATE TABLE IF NOT EXISTS project_resource_group (
            project_id          INTEGER NOT NULL REFERENCES project (id),
            resource_group_id   INTEGER NOT NULL REFERENCES resource_group (id),
            PRIMARY KEY (project_id, resource_group_id)
        );

        CREATE TABLE IF NOT EXISTS monthly_cost (
            project_id          INTEGER NOT NULL REFERENCES project (id),
            resource_group_id   INTEGER NOT NULL REFERENCES resource_group (id),
            month               TEXT NOT NULL,
            cost                NUMERIC,
            PRIMARY KEY (project_id, resource_group_id, month)
        );

        CREATE TABLE IF NOT EXISTS cost_data (
            key                 TEXT PRIMARY KEY NOT NULL,
            period              TEXT NOT NULL,
            month_year          TEXT NOT NULL,
            resource_group_id   INTEGER REFERENCES resource_group (id),
            cost                NUMERIC
        );

        CREATE TABLE IF NOT EXISTS project_cost_summary (
            project_id                      INTEGER NOT NULL REFERENCES project (id),
            resource_group_id               INTEGER NOT NULL REFERENCES resource_group (id),
            total_cost_to_date              NUMERIC,
            updated_date                    TEXT,
            costs_passed_back_to_date       NUMERIC,
            gpt_costs_to_date               NUMERIC,
            gpt_costs_passed_back_to_date   NUMERIC,
            remarks                         TEXT,
            PRIMARY KEY (project_id, resource_group_id)
        );

        -- Provider credentials. Never described to the assistant.
        CREATE TABLE IF NOT EXISTS cloud_connection (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            name            TEXT NOT NULL,
            provider        TEXT NOT NULL CHECK (provider IN ('aws', 'azure', 'gcp')),
            credentials     TEXT NOT NULL,
            status          TEXT NOT NULL DEFAULT 'inactive'
                            CHECK (status IN ('active', 'inactive', 'error', 'testing')),
            description     TEXT,
            regions         TEXT,
            tags            TEXT,
            last_sync       TEXT,
            sync_frequency  INTEGER DEFAULT 3600,
            auto_sync       TEXT DEFAULT 'true',
            resource_count  INTEGER DEFAULT 0,
            monthly_cost    INTEGER DEFAULT 0,
            created_at      TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'cost_dashboard_schema');
        ",
    )
    .map_err(|e| CostlensError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}
