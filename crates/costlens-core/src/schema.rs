//! Static description of the application schema exposed to the SQL assistant.
//!
//! The same description feeds the system prompt and the validator's scope
//! check, so the model is never told about a table it is not allowed to query.

use serde::Serialize;

/// A column documented to the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnSchema {
    pub name: &'static str,
    pub sql_type: &'static str,
    /// Value hints or key relationships, rendered in parentheses.
    pub note: Option<&'static str>,
}

/// A table documented to the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub columns: Vec<ColumnSchema>,
}

/// The fixed set of tables the assistant may read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppSchema {
    tables: Vec<TableSchema>,
}

const fn col(name: &'static str, sql_type: &'static str) -> ColumnSchema {
    ColumnSchema {
        name,
        sql_type,
        note: None,
    }
}

const fn col_note(name: &'static str, sql_type: &'static str, note: &'static str) -> ColumnSchema {
    ColumnSchema {
        name,
        sql_type,
        note: Some(note),
    }
}

impl AppSchema {
    pub fn new(tables: Vec<TableSchema>) -> Self {
        Self { tables }
    }

    /// The cost dashboard schema: projects, resource groups and their costs.
    pub fn cost_dashboard() -> Self {
        Self::new(vec![
            TableSchema {
                name: "project",
                description: "Client and internal projects",
                columns: vec![
                    col("id", "INTEGER PRIMARY KEY"),
                    col("project_name", "TEXT"),
                    col_note(
                        "project_type",
                        "TEXT",
                        "values: 'Internal', 'External', 'Client Demo'",
                    ),
                    col("member_firm", "TEXT"),
                    col_note("deployed_region", "TEXT", "values: 'US', 'EU', 'APAC'"),
                    col_note("is_active", "BOOLEAN", "1 = active, 0 = inactive"),
                    col("description", "TEXT"),
                    col("engagement_code", "TEXT"),
                    col("engagement_partner", "TEXT"),
                    col("opportunity_code", "TEXT"),
                    col("engagement_manager", "TEXT"),
                    col_note("project_startdate", "DATE", "YYYY-MM-DD"),
                    col_note("project_enddate", "DATE", "YYYY-MM-DD"),
                ],
            },
            TableSchema {
                name: "aiq_consumption",
                description: "Daily AI service consumption per project",
                columns: vec![
                    col("id", "INTEGER PRIMARY KEY"),
                    col_note("project_id", "INTEGER", "FK to project.id"),
                    col("aiq_assumption_name", "TEXT"),
                    col("consumption_amount", "NUMERIC"),
                    col_note("consumption_day", "DATE", "YYYY-MM-DD"),
                ],
            },
            TableSchema {
                name: "resource_group",
                description: "Cloud resource groups owned by a project",
                columns: vec![
                    col("id", "INTEGER PRIMARY KEY"),
                    col("resource_group_name", "TEXT"),
                    col_note("project_id", "INTEGER", "FK to project.id"),
                    col("status", "TEXT"),
                ],
            },
            TableSchema {
                name: "project_resource_group",
                description: "Project to resource group links",
                columns: vec![
                    col_note("project_id", "INTEGER", "FK to project.id"),
                    col_note("resource_group_id", "INTEGER", "FK to resource_group.id"),
                ],
            },
            TableSchema {
                name: "monthly_cost",
                description: "Cost per project, resource group and month",
                columns: vec![
                    col_note("project_id", "INTEGER", "FK to project.id"),
                    col_note("resource_group_id", "INTEGER", "FK to resource_group.id"),
                    col_note("month", "DATE", "first day of the month"),
                    col("cost", "NUMERIC"),
                ],
            },
            TableSchema {
                name: "cost_data",
                description: "Billing periods per resource group",
                columns: vec![
                    col("key", "TEXT PRIMARY KEY"),
                    col("period", "DATE"),
                    col_note("month_year", "TEXT", "e.g. 'Jan 2024'"),
                    col_note("resource_group_id", "INTEGER", "FK to resource_group.id"),
                    col("cost", "NUMERIC"),
                ],
            },
            TableSchema {
                name: "project_cost_summary",
                description: "Running cost totals per project and resource group",
                columns: vec![
                    col_note("project_id", "INTEGER", "FK to project.id"),
                    col_note("resource_group_id", "INTEGER", "FK to resource_group.id"),
                    col("total_cost_to_date", "NUMERIC"),
                    col("updated_date", "DATE"),
                    col("costs_passed_back_to_date", "NUMERIC"),
                    col("gpt_costs_to_date", "NUMERIC"),
                    col("gpt_costs_passed_back_to_date", "NUMERIC"),
                    col("remarks", "TEXT"),
                ],
            },
        ])
    }

    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    /// Allowed table names, in declaration order.
    pub fn table_names(&self) -> Vec<&'static str> {
        self.tables.iter().map(|t| t.name).collect()
    }

    /// Case-insensitive membership test against the allowed tables.
    pub fn contains_table(&self, name: &str) -> bool {
        self.tables.iter().any(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Render the schema as prompt text, one numbered line per table.
    pub fn describe(&self) -> String {
        let mut out = String::from("Available Tables and Columns:\n");
        for (i, table) in self.tables.iter().enumerate() {
            let columns: Vec<String> = table
                .columns
                .iter()
                .map(|c| match c.note {
                    Some(note) => format!("{} {} ({})", c.name, c.sql_type, note),
                    None => format!("{} {}", c.name, c.sql_type),
                })
                .collect();
            out.push_str(&format!(
                "{}. {}({}) -- {}\n",
                i + 1,
                table.name,
                columns.join(", "),
                table.description
            ));
        }
        out
    }
}

impl Default for AppSchema {
    fn default() -> Self {
        Self::cost_dashboard()
    }
}
