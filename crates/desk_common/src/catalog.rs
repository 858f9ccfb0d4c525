//! Plan catalog and company support bindings.
//!
//! Two keyed lookups resolve a company's monthly base limit:
//! company -> plan name -> monthly_limit.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::to_sql_timestamp;
use crate::error::{QuotaError, QuotaResult};

/// Support tier with its monthly service-request allowance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportPlan {
    pub name: String,
    pub monthly_limit: u32,
}

/// Company registration: which tier it is on and who manages the account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyBinding {
    pub company: String,
    pub plan_name: String,
    pub account_manager: String,
    pub location: String,
    pub contact_person: String,
    pub contact_mobile: String,
}

impl CompanyBinding {
    fn validate(&self) -> QuotaResult<()> {
        let fields = [
            ("company", &self.company),
            ("plan_name", &self.plan_name),
            ("account_manager", &self.account_manager),
            ("location", &self.location),
            ("contact_person", &self.contact_person),
            ("contact_mobile", &self.contact_mobile),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(QuotaError::InvalidConfig(format!("{} is required", name)));
            }
        }
        Ok(())
    }
}

/// Create a plan or change the limit of an existing one.
pub fn upsert_plan(conn: &Connection, plan: &SupportPlan) -> QuotaResult<()> {
    if plan.name.trim().is_empty() {
        return Err(QuotaError::InvalidConfig("plan name is required".into()));
    }
    conn.execute(
        "INSERT INTO support_plans (name, monthly_limit) VALUES (?1, ?2)
         ON CONFLICT(name) DO UPDATE SET monthly_limit = excluded.monthly_limit",
        params![plan.name, plan.monthly_limit],
    )?;
    info!("Support plan {} set to {} SRs/month", plan.name, plan.monthly_limit);
    Ok(())
}

pub fn get_plan(conn: &Connection, name: &str) -> QuotaResult<Option<SupportPlan>> {
    Ok(conn
        .query_row(
            "SELECT name, monthly_limit FROM support_plans WHERE name = ?1",
            params![name],
            |row| {
                Ok(SupportPlan {
                    name: row.get(0)?,
                    monthly_limit: row.get(1)?,
                })
            },
        )
        .optional()?)
}

pub fn list_plans(conn: &Connection) -> QuotaResult<Vec<SupportPlan>> {
    let mut stmt = conn.prepare("SELECT name, monthly_limit FROM support_plans ORDER BY name")?;
    let plans = stmt
        .query_map([], |row| {
            Ok(SupportPlan {
                name: row.get(0)?,
                monthly_limit: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(plans)
}

/// Register a company. Fails with `Conflict` if already bound and with
/// `NotConfigured` if the plan is not in the catalog.
pub fn register_company(
    conn: &Connection,
    binding: &CompanyBinding,
    now: DateTime<Utc>,
) -> QuotaResult<()> {
    binding.validate()?;

    if get_binding(conn, &binding.company)?.is_some() {
        return Err(QuotaError::Conflict(format!("Company '{}'", binding.company)));
    }
    if get_plan(conn, &binding.plan_name)?.is_none() {
        return Err(QuotaError::NotConfigured(binding.company.clone()));
    }

    conn.execute(
        "INSERT INTO company_support
            (company, plan_name, account_manager, location, contact_person, contact_mobile, registered_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            binding.company,
            binding.plan_name,
            binding.account_manager,
            binding.location,
            binding.contact_person,
            binding.contact_mobile,
            to_sql_timestamp(&now),
        ],
    )?;
    info!(
        "Registered company {} on plan {} (AM: {})",
        binding.company, binding.plan_name, binding.account_manager
    );
    Ok(())
}

fn binding_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CompanyBinding> {
    Ok(CompanyBinding {
        company: row.get(0)?,
        plan_name: row.get(1)?,
        account_manager: row.get(2)?,
        location: row.get(3)?,
        contact_person: row.get(4)?,
        contact_mobile: row.get(5)?,
    })
}

pub fn get_binding(conn: &Connection, company: &str) -> QuotaResult<Option<CompanyBinding>> {
    Ok(conn
        .query_row(
            "SELECT company, plan_name, account_manager, location, contact_person, contact_mobile
             FROM company_support WHERE company = ?1",
            params![company],
            binding_from_row,
        )
        .optional()?)
}

pub fn list_companies(conn: &Connection) -> QuotaResult<Vec<CompanyBinding>> {
    let mut stmt = conn.prepare(
        "SELECT company, plan_name, account_manager, location, contact_person, contact_mobile
         FROM company_support ORDER BY company",
    )?;
    let companies = stmt
        .query_map([], binding_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(companies)
}

/// Base monthly limit for `company`.
pub fn get_monthly_limit(conn: &Connection, company: &str) -> QuotaResult<u32> {
    let limit: Option<u32> = conn
        .query_row(
            "SELECT p.monthly_limit
             FROM company_support c JOIN support_plans p ON p.name = c.plan_name
             WHERE c.company = ?1",
            params![company],
            |row| row.get(0),
        )
        .optional()?;
    limit.ok_or_else(|| QuotaError::NotConfigured(company.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use tempfile::tempdir;

    fn binding(company: &str, plan: &str) -> CompanyBinding {
        CompanyBinding {
            company: company.to_string(),
            plan_name: plan.to_string(),
            account_manager: "Nimal".to_string(),
            location: "Colombo 03".to_string(),
            contact_person: "Ruwan".to_string(),
            contact_mobile: "0771234567".to_string(),
        }
    }

    async fn open() -> (tempfile::TempDir, Database) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("desk.db")).await.unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn test_monthly_limit_lookup() {
        let (_dir, db) = open().await;
        let limit = db
            .execute(|conn| {
                upsert_plan(conn, &SupportPlan { name: "Gold".into(), monthly_limit: 10 })?;
                register_company(conn, &binding("Acme", "Gold"), Utc::now())?;
                get_monthly_limit(conn, "Acme")
            })
            .await
            .unwrap();
        assert_eq!(limit, 10);
    }

    #[tokio::test]
    async fn test_unbound_company_is_not_configured() {
        let (_dir, db) = open().await;
        let err = db
            .execute(|conn| get_monthly_limit(conn, "Nobody"))
            .await
            .unwrap_err();
        assert!(matches!(err, QuotaError::NotConfigured(c) if c == "Nobody"));
    }

    #[tokio::test]
    async fn test_binding_to_missing_plan_is_not_configured() {
        let (_dir, db) = open().await;
        let err = db
            .execute(|conn| {
                // Bypass registration checks to simulate a plan renamed out from under a company
                conn.execute(
                    "INSERT INTO company_support
                        (company, plan_name, account_manager, location, contact_person, contact_mobile, registered_at)
                     VALUES ('Acme', 'Retired', 'Nimal', 'x', 'y', 'z', '2024-01-01T00:00:00.000000Z')",
                    [],
                )?;
                get_monthly_limit(conn, "Acme")
            })
            .await
            .unwrap_err();
        assert!(matches!(err, QuotaError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_register_twice_conflicts() {
        let (_dir, db) = open().await;
        let err = db
            .execute(|conn| {
                upsert_plan(conn, &SupportPlan { name: "Gold".into(), monthly_limit: 10 })?;
                register_company(conn, &binding("Acme", "Gold"), Utc::now())?;
                register_company(conn, &binding("Acme", "Gold"), Utc::now())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, QuotaError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_register_requires_fields() {
        let (_dir, db) = open().await;
        let mut incomplete = binding("Acme", "Gold");
        incomplete.location = "  ".into();
        let err = db
            .execute(move |conn| register_company(conn, &incomplete, Utc::now()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("location"));
    }

    #[tokio::test]
    async fn test_upsert_plan_updates_limit() {
        let (_dir, db) = open().await;
        let plans = db
            .execute(|conn| {
                upsert_plan(conn, &SupportPlan { name: "Gold".into(), monthly_limit: 10 })?;
                upsert_plan(conn, &SupportPlan { name: "Gold".into(), monthly_limit: 12 })?;
                upsert_plan(conn, &SupportPlan { name: "Basic".into(), monthly_limit: 0 })?;
                list_plans(conn)
            })
            .await
            .unwrap();
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].name, "Basic");
        assert_eq!(plans[1].monthly_limit, 12);
    }
}
