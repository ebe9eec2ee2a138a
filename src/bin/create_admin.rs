//! Out-of-band account provisioning. Signup only ever creates `user`
//! records, so guides and admins are minted here by an operator with
//! database access.

use std::io::{self, Write};

use clap::Parser;
use sqlx::postgres::PgPoolOptions;

use tourbook_api::auth::passwords::PasswordService;
use tourbook_api::auth::responses::Role;

#[derive(Parser, Debug)]
#[command(name = "create_admin", about = "Create a Tourbook account with an elevated role")]
struct Args {
    /// Email address for the account (case insensitive).
    #[arg(long)]
    email: String,

    /// Plaintext password to hash and store for this user.
    #[arg(long)]
    password: String,

    /// Display name to associate with the account.
    #[arg(long)]
    name: String,

    /// Role to assign (`user`, `guide`, `lead-guide`, or `admin`).
    #[arg(long, default_value = "admin")]
    role: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();
    let email = args.email.trim().to_lowercase();

    if !email.contains('@') {
        writeln!(io::stderr(), "error: email must contain '@'")?;
        std::process::exit(1);
    }

    let role = Role::from_str(args.role.trim());
    if role.as_str() != args.role.trim() {
        writeln!(
            io::stderr(),
            "error: unsupported role '{}'. Use 'user', 'guide', 'lead-guide', or 'admin'.",
            args.role
        )?;
        std::process::exit(1);
    }

    let database_url = std::env::var("DATABASE_URL")?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    let existing =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE lower(email) = lower($1)")
            .bind(&email)
            .fetch_one(&pool)
            .await?;

    if existing > 0 {
        writeln!(
            io::stderr(),
            "error: a user with email '{email}' already exists."
        )?;
        std::process::exit(1);
    }

    let password_service = PasswordService::new().map_err(|err| {
        io::Error::new(io::ErrorKind::Other, format!("argon2 init failed: {err}"))
    })?;
    let password_hash = password_service
        .hash_password(&args.password)
        .map_err(|err| {
            io::Error::new(io::ErrorKind::Other, format!("password hash failed: {err}"))
        })?;

    let user_id: uuid::Uuid = sqlx::query_scalar(
        "INSERT INTO users (name, email, role, password_hash) VALUES ($1, lower($2), $3, $4) \
         RETURNING id",
    )
    .bind(&args.name)
    .bind(&email)
    .bind(role.as_str())
    .bind(password_hash)
    .fetch_one(&pool)
    .await?;

    println!("Created {} user '{email}' with id {user_id}", role.as_str());
    Ok(())
}
