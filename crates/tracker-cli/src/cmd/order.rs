use std::path::Path;

use clap::{Args, Subcommand};
use tracker_core::engine::{Engine, ManualTransition, NewOrder};
use tracker_core::order::Order;
use tracker_core::store::OrderFilter;
use tracker_core::types::OrderStatus;

use crate::output::{print_json, print_table, timestamp};

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum OrderSubcommand {
    /// Create a pending order
    Create {
        /// Unique order reference (letters, digits, '.', '_', '-')
        reference: String,
        #[arg(long)]
        student: Option<String>,
        #[arg(long)]
        opportunity: Option<String>,
    },

    /// List orders, newest first
    List {
        /// Only orders in this status
        #[arg(long)]
        status: Option<OrderStatus>,
        /// Case-insensitive match on reference, student or opportunity
        #[arg(long, short = 'q')]
        search: Option<String>,
    },

    /// Show one order (by id or reference)
    Show { order: String },

    /// Show an order's status history
    History { order: String },

    /// Move an order to a new status
    Transition {
        order: String,
        /// Target status: pending, in_progress, completed, cancelled
        to: OrderStatus,
        #[command(flatten)]
        by: ActorArgs,
        /// Refuse unless the order is still at this version
        #[arg(long)]
        expected_version: Option<u64>,
    },

    /// Cancel an order
    Cancel {
        order: String,
        #[command(flatten)]
        by: ActorArgs,
    },

    /// Move several orders to the same status; ineligible ones are skipped
    Bulk {
        to: OrderStatus,
        #[arg(required = true)]
        orders: Vec<String>,
        #[command(flatten)]
        by: ActorArgs,
    },
}

#[derive(Args)]
pub struct ActorArgs {
    /// Who is making the change
    #[arg(long, env = "TRACKER_ACTOR", default_value = "admin")]
    actor: String,
    #[arg(long)]
    notes: Option<String>,
}

impl ActorArgs {
    fn request(self, expected_version: Option<u64>) -> ManualTransition {
        ManualTransition {
            actor: self.actor,
            notes: self.notes,
            expected_version,
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcmd: OrderSubcommand, json: bool) -> anyhow::Result<()> {
    let (_, engine) = super::open_engine(root)?;
    match subcmd {
        OrderSubcommand::Create {
            reference,
            student,
            opportunity,
        } => create(&engine, reference, student, opportunity, json),
        OrderSubcommand::List { status, search } => list(&engine, status, search, json),
        OrderSubcommand::Show { order } => show(&engine, &order, json),
        OrderSubcommand::History { order } => history(&engine, &order, json),
        OrderSubcommand::Transition {
            order,
            to,
            by,
            expected_version,
        } => transition(&engine, &order, to, by.request(expected_version), json),
        OrderSubcommand::Cancel { order, by } => {
            transition(&engine, &order, OrderStatus::Cancelled, by.request(None), json)
        }
        OrderSubcommand::Bulk { to, orders, by } => {
            bulk(&engine, to, &orders, by.request(None), json)
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn create(
    engine: &Engine,
    reference: String,
    student: Option<String>,
    opportunity: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let order = engine.create_order(NewOrder {
        reference,
        student,
        opportunity,
    })?;
    if json {
        print_json(&order)?;
    } else {
        println!("Created order '{}' ({})", order.reference, order.id);
    }
    Ok(())
}

fn list(
    engine: &Engine,
    status: Option<OrderStatus>,
    search: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let orders = engine.list(&OrderFilter {
        status,
        text: search,
    })?;

    if json {
        return print_json(&orders);
    }
    if orders.is_empty() {
        println!("No orders.");
        return Ok(());
    }
    let rows: Vec<Vec<String>> = orders
        .iter()
        .map(|o| {
            vec![
                o.reference.clone(),
                o.status.to_string(),
                o.student.clone().unwrap_or_default(),
                timestamp(o.state_entered_at),
                o.version.to_string(),
            ]
        })
        .collect();
    print_table(&["REFERENCE", "STATUS", "STUDENT", "SINCE", "VER"], &rows);
    Ok(())
}

fn show(engine: &Engine, key: &str, json: bool) -> anyhow::Result<()> {
    let order = engine.find(key)?;
    if json {
        return print_json(&order);
    }
    print_order(&order);
    Ok(())
}

fn print_order(order: &Order) {
    println!("Order:       {}", order.reference);
    println!("Id:          {}", order.id);
    println!("Status:      {} (since {})", order.status, timestamp(order.state_entered_at));
    if let Some(student) = &order.student {
        println!("Student:     {student}");
    }
    if let Some(opportunity) = &order.opportunity {
        println!("Opportunity: {opportunity}");
    }
    println!("Created:     {}", timestamp(order.created_at));
    println!("Version:     {}", order.version);
}

fn history(engine: &Engine, key: &str, json: bool) -> anyhow::Result<()> {
    let history = engine.history(key)?;
    if json {
        return print_json(&history);
    }
    if history.is_empty() {
        println!("No status changes.");
        return Ok(());
    }
    let rows: Vec<Vec<String>> = history
        .iter()
        .map(|h| {
            vec![
                timestamp(h.changed_at),
                h.old_status.to_string(),
                h.new_status.to_string(),
                h.changed_by.to_string(),
                h.notes.clone().unwrap_or_default(),
            ]
        })
        .collect();
    print_table(&["AT", "FROM", "TO", "BY", "NOTES"], &rows);
    Ok(())
}

fn transition(
    engine: &Engine,
    key: &str,
    to: OrderStatus,
    request: ManualTransition,
    json: bool,
) -> anyhow::Result<()> {
    let order = engine.find(key)?;
    let from = order.status;
    let order = engine.transition(order.id, to, request)?;
    if json {
        print_json(&order)?;
    } else {
        println!("Order '{}': {from} → {}", order.reference, order.status);
    }
    Ok(())
}

fn bulk(
    engine: &Engine,
    to: OrderStatus,
    keys: &[String],
    request: ManualTransition,
    json: bool,
) -> anyhow::Result<()> {
    // Unknown keys are reported alongside ineligible orders rather than
    // aborting the batch.
    let mut ids = Vec::with_capacity(keys.len());
    let mut unknown = Vec::new();
    for key in keys {
        match engine.find(key) {
            Ok(order) => ids.push(order.id),
            Err(e) => unknown.push((key.as_str(), e.to_string())),
        }
    }
    let report = engine.bulk_transition(&ids, to, &request);

    if json {
        return print_json(&serde_json::json!({
            "updated": report.updated,
            "skipped": report.skipped,
            "unknown": unknown
                .iter()
                .map(|(key, reason)| serde_json::json!({ "order": key, "reason": reason }))
                .collect::<Vec<_>>(),
        }));
    }
    println!("Moved {} order(s) to {to}", report.updated.len());
    for skip in &report.skipped {
        println!("  skipped {}: {}", skip.id, skip.reason);
    }
    for (key, reason) in &unknown {
        println!("  skipped {key}: {reason}");
    }
    Ok(())
}
