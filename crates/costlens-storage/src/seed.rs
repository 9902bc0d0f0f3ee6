//! Sample data for demos and local development.
//!
//! Seeding is idempotent: it is skipped when any project already exists.

use chrono::{Duration, Local, NaiveDate};
use rusqlite::{params, Connection};
use tracing::info;

use costlens_core::error::CostlensError;

use crate::db::Database;

/// Row counts written by a seeding run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub projects: usize,
    pub resource_groups: usize,
    pub monthly_costs: usize,
    pub cost_summaries: usize,
    pub aiq_consumption: usize,
    pub cloud_connections: usize,
}

struct SeedProject {
    name: &'static str,
    project_type: &'static str,
    member_firm: &'static str,
    region: &'static str,
    description: &'static str,
    engagement_code: &'static str,
    partner: &'static str,
    opportunity_code: &'static str,
    manager: &'static str,
    start: &'static str,
    end: &'static str,
}

const PROJECTS: [SeedProject; 3] = [
    SeedProject {
        name: "Cloud Migration Initiative",
        project_type: "Internal",
        member_firm: "US Office",
        region: "US",
        description: "Migrating legacy systems to cloud",
        engagement_code: "ENG-001",
        partner: "John Smith",
        opportunity_code: "OPP-001",
        manager: "Jane Doe",
        start: "2024-01-01",
        end: "2024-12-31",
    },
    SeedProject {
        name: "Client Analytics Platform",
        project_type: "Client Demo",
        member_firm: "EU Office",
        region: "EU",
        description: "Data analytics platform for client",
        engagement_code: "ENG-002",
        partner: "Mike Johnson",
        opportunity_code: "OPP-002",
        manager: "Sarah Wilson",
        start: "2024-03-01",
        end: "2025-02-28",
    },
    SeedProject {
        name: "APAC Digital Transformation",
        project_type: "External",
        member_firm: "APAC Office",
        region: "APAC",
        description: "Digital transformation project",
        engagement_code: "ENG-003",
        partner: "David Lee",
        opportunity_code: "OPP-003",
        manager: "Lisa Chen",
        start: "2024-06-01",
        end: "2025-05-31",
    },
];

/// (name, owning project index, monthly base cost, monthly increment)
const RESOURCE_GROUPS: [(&str, usize, f64, f64); 4] = [
    ("rg-migration-prod", 0, 5000.0, 100.0),
    ("rg-migration-dev", 0, 2000.0, 50.0),
    ("rg-analytics-prod", 1, 8000.0, 150.0),
    ("rg-digital-prod", 2, 6000.0, 200.0),
];

/// (total, passed back, gpt total, gpt passed back, remarks), one per resource group.
const SUMMARIES: [(f64, f64, f64, f64, &str); 4] = [
    (72000.0, 65000.0, 5000.0, 4500.0, "On track"),
    (27000.0, 25000.0, 2000.0, 1800.0, "Under budget"),
    (114000.0, 100000.0, 8000.0, 7500.0, "Within budget"),
    (84000.0, 70000.0, 6000.0, 5500.0, "Slightly over budget"),
];

/// (project index, base amount, daily increment)
const AIQ_USAGE: [(usize, f64, f64); 2] = [(0, 150.0, 2.0), (1, 200.0, 3.0)];

const AIQ_DAYS: i64 = 30;
const COST_MONTHS: u32 = 12;

/// Whether the database already holds project data.
pub fn is_seeded(db: &Database) -> Result<bool, CostlensError> {
    db.with_conn(|conn| {
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM project", [], |row| row.get(0))
            .map_err(|e| CostlensError::Storage(format!("Failed to count projects: {}", e)))?;
        Ok(count > 0)
    })
}

/// Seed demo data if the database is empty. Returns `None` when skipped.
pub fn seed_sample_data(db: &Database) -> Result<Option<SeedSummary>, CostlensError> {
    if is_seeded(db)? {
        info!("Database already contains projects, skipping seed");
        return Ok(None);
    }
    let today = Local::now().date_naive();
    let summary = db.with_conn(|conn| seed_all(conn, today))?;
    info!(
        projects = summary.projects,
        resource_groups = summary.resource_groups,
        monthly_costs = summary.monthly_costs,
        cost_summaries = summary.cost_summaries,
        aiq_consumption = summary.aiq_consumption,
        "Sample data seeded"
    );
    Ok(Some(summary))
}

fn seed_all(conn: &Connection, today: NaiveDate) -> Result<SeedSummary, CostlensError> {
    let storage = |e: rusqlite::Error| CostlensError::Storage(format!("Seed failed: {}", e));
    let tx = conn.unchecked_transaction().map_err(storage)?;
    let mut summary = SeedSummary::default();

    let mut project_ids = Vec::with_capacity(PROJECTS.len());
    for p in &PROJECTS {
        tx.execute(
            "INSERT INTO project (project_name, project_type, member_firm, deployed_region,
             is_active, description, engagement_code, engagement_partner, opportunity_code,
             engagement_manager, project_startdate, project_enddate)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                p.name,
                p.project_type,
                p.member_firm,
                p.region,
                p.description,
                p.engagement_code,
                p.partner,
                p.opportunity_code,
                p.manager,
                p.start,
                p.end
            ],
        )
        .map_err(storage)?;
        project_ids.push(tx.last_insert_rowid());
    }
    summary.projects = project_ids.len();

    let mut group_ids = Vec::with_capacity(RESOURCE_GROUPS.len());
    for (name, project, _, _) in &RESOURCE_GROUPS {
        let project_id = project_ids[*project];
        tx.execute(
            "INSERT INTO resource_group (resource_group_name, project_id, status)
             VALUES (?1, ?2, 'Active')",
            params![name, project_id],
        )
        .map_err(storage)?;
        let group_id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO project_resource_group (project_id, resource_group_id) VALUES (?1, ?2)",
            params![project_id, group_id],
        )
        .map_err(storage)?;
        group_ids.push((project_id, group_id));
    }
    summary.resource_groups = group_ids.len();

    for offset in 0..COST_MONTHS {
        let month = month_start(2024, 1 + offset);
        for ((project_id, group_id), (_, _, base, step)) in
            group_ids.iter().zip(RESOURCE_GROUPS.iter())
        {
            tx.execute(
                "INSERT INTO monthly_cost (project_id, resource_group_id, month, cost)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    project_id,
                    group_id,
                    month.format("%Y-%m-%d").to_string(),
                    base + step * f64::from(offset)
                ],
            )
            .map_err(storage)?;
            summary.monthly_costs += 1;
        }
    }

    let updated = today.format("%Y-%m-%d").to_string();
    for ((project_id, group_id), (total, passed, gpt, gpt_passed, remarks)) in
        group_ids.iter().zip(SUMMARIES.iter())
    {
        tx.execute(
            "INSERT INTO project_cost_summary (project_id, resource_group_id, total_cost_to_date,
             updated_date, costs_passed_back_to_date, gpt_costs_to_date,
             gpt_costs_passed_back_to_date, remarks)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![project_id, group_id, total, updated, passed, gpt, gpt_passed, remarks],
        )
        .map_err(storage)?;
        summary.cost_summaries += 1;
    }

    for day in 0..AIQ_DAYS {
        let consumption_day = (today - Duration::days(day)).format("%Y-%m-%d").to_string();
        for (project, base, step) in &AIQ_USAGE {
            tx.execute(
                "INSERT INTO aiq_consumption (project_id, aiq_assumption_name,
                 consumption_amount, consumption_day)
                 VALUES (?1, 'GPT-4 Usage', ?2, ?3)",
                params![project_ids[*project], base + step * day as f64, consumption_day],
            )
            .map_err(storage)?;
            summary.aiq_consumption += 1;
        }
    }

    let credentials = serde_json::json!({ "client_secret": "placeholder" }).to_string();
    tx.execute(
        "INSERT INTO cloud_connection (name, provider, credentials, status, description)
         VALUES ('Demo Azure Subscription', 'azure', ?1, 'inactive', 'Sample connection')",
        params![credentials],
    )
    .map_err(storage)?;
    summary.cloud_connections = 1;

    tx.commit().map_err(storage)?;
    Ok(summary)
}

/// First day of the given month, rolling over into following years.
fn month_start(year: i32, month: u32) -> NaiveDate {
    let zero_based = month - 1;
    let y = year + (zero_based / 12) as i32;
    let m = zero_based % 12 + 1;
    NaiveDate::from_ymd_opt(y, m, 1).unwrap_or_default()
}
