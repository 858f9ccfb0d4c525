//! Output formatting - ASCII-only terminal rendering for deskctl.
//!
//! Every renderer returns a `String` so main decides where it goes.

use crate::client::DaemonError;
use desk_common::{CompanyBinding, QuotaStatus, SupportPlan};
use owo_colors::OwoColorize;
use serde_json::Value;

const SEPARATOR: &str = "------------------------------------------------------------";

/// Quota status for one company-month
pub fn render_quota(status: &QuotaStatus) -> String {
    let tag = if status.remaining > 0 {
        "[OK]".bright_green().to_string()
    } else if !status.grace_used {
        "[GRACE]".yellow().to_string()
    } else {
        "[EXHAUSTED]".bright_red().to_string()
    };

    let mut out = String::new();
    out.push_str(&format!(
        "{}  {} {}\n",
        tag,
        status.company.bold(),
        status.month.to_string().cyan()
    ));
    out.push_str(&format!("{}\n", SEPARATOR.dimmed()));
    out.push_str(&format!(
        "  Used:            {} / {}\n",
        status.used, status.total_allowed
    ));
    out.push_str(&format!("  Remaining:       {}\n", status.remaining));
    out.push_str(&format!(
        "  Allowance:       base {} + bundles {} + carried {} + grace {}\n",
        status.base,
        status.manual,
        status.carry,
        u32::from(status.grace_used)
    ));
    out.push_str(&format!(
        "  Extra left:      {}\n",
        status.remaining_additional
    ));

    let a = &status.attribution;
    out.push_str("\n[USAGE]\n");
    out.push_str(&format!("  * plan:          {}\n", a.from_base));
    out.push_str(&format!("  * bundles:       {}\n", a.from_manual));
    out.push_str(&format!("  * carried:       {}\n", a.from_carry));
    out.push_str(&format!("  * grace:         {}\n", a.from_grace));
    if a.over_limit > 0 {
        out.push_str(&format!(
            "\n[WARNING] {} tickets over the current allowance\n",
            a.over_limit.to_string().bright_red()
        ));
    }
    out
}

/// Result of an admin grant or a purchase
pub fn render_bundle(response: &Value) -> String {
    let tickets = response["tickets"].as_u64().unwrap_or(0);
    let company = response["company"].as_str().unwrap_or("?");
    let month = response["month"].as_str().unwrap_or("?");
    let by = response["added_by"].as_str().unwrap_or("?");
    format!(
        "{}  Added {} SR tickets to {} for {} (by {})\n",
        "[OK]".bright_green(),
        tickets,
        company.bold(),
        month.cyan(),
        by
    )
}

pub fn render_plans(plans: &[SupportPlan]) -> String {
    if plans.is_empty() {
        return format!("{} No support plans configured\n", "[NOTE]".yellow());
    }
    let mut out = String::from("[PLANS]\n");
    for plan in plans {
        out.push_str(&format!(
            "  * {:<20} {} SR/month\n",
            plan.name.cyan(),
            plan.monthly_limit
        ));
    }
    out
}

pub fn render_companies(companies: &[CompanyBinding]) -> String {
    if companies.is_empty() {
        return format!("{} No companies registered\n", "[NOTE]".yellow());
    }
    let mut out = String::from("[COMPANIES]\n");
    for c in companies {
        out.push_str(&format!(
            "  * {:<20} plan {}  manager {}  contact {} ({})\n",
            c.company.bold(),
            c.plan_name.cyan(),
            c.account_manager,
            c.contact_person,
            c.contact_mobile
        ));
    }
    out
}

pub fn render_health(health: &Value) -> String {
    format!(
        "{}  deskd {} up {}s\n",
        "[OK]".bright_green(),
        health["version"].as_str().unwrap_or("?"),
        health["uptime_secs"].as_u64().unwrap_or(0)
    )
}

/// Error from the daemon, with a next step when the daemon offers one.
pub fn render_daemon_error(err: &DaemonError) -> String {
    let mut out = format!("[ERROR] {}\n", err.message.red());
    if err.allow_override {
        out.push_str(&format!(
            "{} A one-time grace ticket is available this month. Retry with override to use it.\n",
            "[HINT]".yellow()
        ));
    }
    if err.show_add_bundle_prompt {
        out.push_str(&format!(
            "{} Purchase a bundle: deskctl purchase --tickets 3|5|10\n",
            "[HINT]".yellow()
        ));
    }
    out
}
