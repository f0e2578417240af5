//! Bootstraps an empty database with a root unit and its first MANAGER.
//!
//! Run with: cargo run --bin seed-data -- --unit-name HQ --manager-email admin@example.org --password ...
//!
//! Nothing is written when any unit already exists.

use anyhow::{bail, Context};
use chrono::Utc;
use clap::Parser;
use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, Set, TransactionTrait};
use tracing::info;
use uuid::Uuid;

use custody_api::{
    auth::password::hash_password,
    config,
    db,
    entities::{unit, user, Role},
};

#[derive(Debug, Parser)]
#[command(name = "seed-data", about = "Create the root unit and first manager")]
struct Args {
    /// Name of the root unit
    #[arg(long)]
    unit_name: String,

    /// Optional short code for the root unit
    #[arg(long)]
    unit_code: Option<String>,

    #[arg(long)]
    manager_email: String,

    /// Initial password for the manager (min 8 characters)
    #[arg(long, env = "SEED_MANAGER_PASSWORD")]
    password: String,

    #[arg(long, default_value = "0001")]
    registration: String,

    #[arg(long, default_value = "Administrator")]
    name: String,

    /// Overrides the configured database URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut cfg = config::load_config().context("failed to load configuration")?;
    config::init_tracing(&cfg.log_level, cfg.log_json);

    if let Some(url) = args.database_url.clone() {
        cfg.database_url = url;
    }
    if args.password.chars().count() < 8 {
        bail!("--password must be at least 8 characters");
    }

    let pool = db::establish_connection_from_app_config(&cfg).await?;
    db::run_migrations(&pool).await?;

    let existing = unit::Entity::find().count(&pool).await?;
    if existing > 0 {
        info!(units = existing, "database already seeded; nothing to do");
        return Ok(());
    }

    let now = Utc::now();
    let unit_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    let password_hash = hash_password(&args.password)?;
    let email = args.manager_email.trim().to_lowercase();

    let txn = pool.begin().await?;
    unit::ActiveModel {
        id: Set(unit_id),
        name: Set(args.unit_name.trim().to_string()),
        code: Set(args.unit_code.map(|c| c.trim().to_string())),
        address: Set(None),
        parent_id: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&txn)
    .await?;

    user::ActiveModel {
        id: Set(user_id),
        registration: Set(args.registration.trim().to_string()),
        name: Set(args.name.trim().to_string()),
        email: Set(email.clone()),
        password_hash: Set(password_hash),
        role: Set(Role::Manager),
        unit_id: Set(unit_id),
        active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&txn)
    .await?;
    txn.commit().await?;

    info!(%unit_id, %user_id, %email, "created root unit and manager");
    info!("log in with POST /auth/login");
    Ok(())
}
