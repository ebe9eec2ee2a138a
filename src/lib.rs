#[macro_use]
extern crate rocket;

pub mod auth;
pub mod db;
pub mod request_logger;
pub mod routes;

use crate::auth::AuthState;
use crate::auth::users::UserStore;
use crate::db::TourbookDb;
use crate::request_logger::RequestLogger;
use env_logger::Env;
use rocket::fairing::AdHoc;
use rocket::http::Method;
use rocket::{Build, Rocket};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_db_pools::Database;
use rocket_okapi::{
    openapi_get_routes,
    rapidoc::{GeneralConfig, HideShowConfig, RapiDocConfig, make_rapidoc},
    settings::UrlObject,
    swagger_ui::{SwaggerUIConfig, make_swagger_ui},
};
use std::sync::Once;

static LOGGER: Once = Once::new();

fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,rocket::server=warn,rocket::request=warn"),
        )
        .init();
    });
}

pub fn rocket() -> Rocket<Build> {
    init_logger();

    // Configure CORS
    let cors = CorsOptions::default()
        .allowed_origins(AllowedOrigins::all())
        .allowed_methods(
            vec![
                Method::Get,
                Method::Post,
                Method::Put,
                Method::Delete,
                Method::Patch,
            ]
            .into_iter()
            .map(From::from)
            .collect(),
        )
        .allow_credentials(true)
        .to_cors()
        .expect("Error creating CORS");

    rocket::build()
        .attach(RequestLogger)
        .attach(TourbookDb::init())
        .attach(cors)
        // Run database migrations on startup
        .attach(AdHoc::try_on_ignite("Run Migrations", |rocket| async move {
            match TourbookDb::fetch(&rocket) {
                Some(db) => {
                    let pool = (**db).clone();
                    match db::run_migrations(&pool).await {
                        Ok(_) => {
                            log::info!("database migrations successful");
                            Ok(rocket)
                        }
                        Err(e) => {
                            log::error!("database migrations failed: {}", e);
                            Err(rocket)
                        }
                    }
                }
                None => {
                    log::error!("database pool not available for migrations");
                    Err(rocket)
                }
            }
        }))
        // Clone the pool into plain state and build the session core around it
        .attach(AdHoc::try_on_ignite(
            "Manage Session State",
            |rocket| async move {
                let pool = match TourbookDb::fetch(&rocket) {
                    Some(db) => (**db).clone(),
                    None => {
                        log::error!("database pool not available for session state");
                        return Err(rocket);
                    }
                };

                let auth_state = match AuthState::from_env() {
                    Ok(state) => state,
                    Err(err) => {
                        log::error!("failed to build session state: {}", err);
                        return Err(rocket);
                    }
                };

                let store = UserStore::new(pool);

                Ok(rocket.manage(store).manage(auth_state))
            },
        ))
        .mount(
            "/api/v1",
            openapi_get_routes![
                // Health routes
                routes::health::health_check,
                // Session operations
                auth::routes::signup,
                auth::routes::login,
                auth::routes::logout,
                auth::routes::current_user,
                auth::routes::forgot_password,
                auth::routes::reset_password,
                auth::routes::update_password,
                // Admin routes
                auth::routes::signing_keys,
            ],
        )
        .mount(
            "/api/docs/swagger/",
            make_swagger_ui(&SwaggerUIConfig {
                url: "../../v1/openapi.json".to_owned(),
                ..Default::default()
            }),
        )
        .mount(
            "/api/docs/rapidoc/",
            make_rapidoc(&RapiDocConfig {
                general: GeneralConfig {
                    spec_urls: vec![UrlObject::new("Tourbook API", "../../v1/openapi.json")],
                    ..Default::default()
                },
                hide_show: HideShowConfig {
                    allow_spec_url_load: false,
                    allow_spec_file_load: false,
                    ..Default::default()
                },
                ..Default::default()
            }),
        )
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use std::sync::{Arc, Mutex};

    use rocket::config::LogLevel;
    use rocket::figment::Figment;
    use rocket::local::asynchronous::Client as AsyncClient;
    use rocket::local::blocking::Client;
    use rocket::{Build, Rocket, Route};
    use rocket_db_pools::sqlx::{self, PgPool};

    use crate::auth::users::UserRecord;
    use crate::auth::{AuthError, AuthResult, AuthState, Mailer};

    pub use database::{TestDatabase, TestDatabaseError};

    /// Convenience helpers for seeding credential records in tests.
    pub struct TestFixtures<'a> {
        pool: &'a PgPool,
    }

    impl<'a> TestFixtures<'a> {
        pub fn new(pool: &'a PgPool) -> Self {
            Self { pool }
        }

        /// Insert a user row directly, bypassing the signup pipeline.
        pub async fn insert_user(
            &self,
            name: &str,
            email: &str,
            role: &str,
            password_hash: &str,
        ) -> Result<uuid::Uuid, sqlx::Error> {
            sqlx::query_scalar(
                "INSERT INTO users (name, email, role, password_hash) \
                 VALUES ($1, lower($2), $3, $4) RETURNING id",
            )
            .bind(name)
            .bind(email)
            .bind(role)
            .bind(password_hash)
            .fetch_one(self.pool)
            .await
        }

        /// Flip the soft-delete flag on a record.
        pub async fn deactivate_user(&self, id: uuid::Uuid) -> Result<(), sqlx::Error> {
            sqlx::query("UPDATE users SET active = FALSE WHERE id = $1")
                .bind(id)
                .execute(self.pool)
                .await?;
            Ok(())
        }

        /// Force an outstanding reset secret to look expired.
        pub async fn expire_reset_token(&self, email: &str) -> Result<(), sqlx::Error> {
            sqlx::query(
                "UPDATE users SET password_reset_expires_at = now() - interval '1 minute' \
                 WHERE lower(email) = lower($1)",
            )
            .bind(email)
            .execute(self.pool)
            .await?;
            Ok(())
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SentMail {
        pub to: String,
        pub subject: String,
        pub url: String,
    }

    /// Mailer that records outbound messages for assertions instead of
    /// delivering them. `fail_next` makes the next send report a delivery
    /// error, for exercising the forgot-password rollback path.
    #[derive(Default)]
    pub struct RecordingMailer {
        sent: Mutex<Vec<SentMail>>,
        fail_next: Mutex<bool>,
    }

    impl RecordingMailer {
        pub fn shared() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn sent(&self) -> Vec<SentMail> {
            self.sent.lock().expect("mailer lock").clone()
        }

        pub fn last_url(&self) -> Option<String> {
            self.sent
                .lock()
                .expect("mailer lock")
                .last()
                .map(|mail| mail.url.clone())
        }

        pub fn fail_next(&self) {
            *self.fail_next.lock().expect("mailer lock") = true;
        }

        fn record(&self, to: &str, subject: &str, url: &str) -> AuthResult<()> {
            let mut fail = self.fail_next.lock().expect("mailer lock");
            if *fail {
                *fail = false;
                return Err(AuthError::Delivery("simulated delivery failure".into()));
            }

            self.sent.lock().expect("mailer lock").push(SentMail {
                to: to.to_string(),
                subject: subject.to_string(),
                url: url.to_string(),
            });
            Ok(())
        }
    }

    #[rocket::async_trait]
    impl Mailer for RecordingMailer {
        async fn send_welcome(&self, user: &UserRecord, account_url: &str) -> AuthResult<()> {
            self.record(&user.email, "welcome", account_url)
        }

        async fn send_password_reset(&self, user: &UserRecord, reset_url: &str) -> AuthResult<()> {
            self.record(&user.email, "password reset", reset_url)
        }
    }

    pub mod database {
        use rocket_db_pools::sqlx::postgres::PgPoolOptions;
        use rocket_db_pools::sqlx::{self, PgPool};
        use testcontainers_modules::postgres::Postgres;
        use testcontainers_modules::testcontainers::{
            ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
        };
        use thiserror::Error;

        use crate::db::MIGRATOR;

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("migration error: {0}")]
            Migration(#[from] sqlx::migrate::MigrateError),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
        }

        /// Ephemeral database for integration tests: one disposable
        /// Postgres container per instance, schema applied up front.
        pub struct TestDatabase {
            pool: Option<PgPool>,
            container: Option<ContainerAsync<Postgres>>,
        }

        impl TestDatabase {
            /// Provision a fresh database by launching a disposable
            /// Postgres container and running all migrations against it.
            pub async fn new() -> Result<Self, TestDatabaseError> {
                let container = Postgres::default().start().await?;

                let host = container.get_host().await?.to_string();
                let port = container.get_host_port_ipv4(5432).await?;
                let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect(&url)
                    .await?;

                MIGRATOR.run(&pool).await?;

                Ok(Self {
                    pool: Some(pool),
                    container: Some(container),
                })
            }

            /// Cloneable connection pool for use in tests and Rocket state.
            pub fn pool(&self) -> &PgPool {
                self.pool.as_ref().expect("test database pool is available")
            }

            /// Convenience method returning a clone of the pooled handle.
            pub fn pool_clone(&self) -> PgPool {
                self.pool().clone()
            }

            /// Close pool connections and tear the container down.
            pub async fn close(mut self) -> Result<(), TestDatabaseError> {
                if let Some(pool) = self.pool.take() {
                    pool.close().await;
                }
                if let Some(container) = self.container.take() {
                    container.stop().await?;
                }
                Ok(())
            }
        }
    }

    /// Builder for constructing Rocket instances tailored for integration
    /// tests: no attached database pool fairing, state injected directly.
    #[derive(Default)]
    pub struct TestRocketBuilder {
        figment: Figment,
        mounts: Vec<(String, Vec<Route>)>,
        pg_pool: Option<PgPool>,
        auth_state: Option<AuthState>,
    }

    impl TestRocketBuilder {
        /// Start a builder with sensible defaults: random port, logging off.
        pub fn new() -> Self {
            let figment = rocket::Config::figment()
                .merge(("port", 0))
                .merge(("log_level", LogLevel::Off))
                .merge(("cli_colors", false));

            Self {
                figment,
                mounts: Vec::new(),
                pg_pool: None,
                auth_state: None,
            }
        }

        /// Mount routes under `/api/v1`.
        pub fn mount_api_routes(mut self, routes: Vec<Route>) -> Self {
            self.mounts.push(("/api/v1".to_string(), routes));
            self
        }

        /// Manage a `UserStore` over the given pool for tests that
        /// exercise database-backed routes.
        pub fn manage_pg_pool(mut self, pool: PgPool) -> Self {
            self.pg_pool = Some(pool);
            self
        }

        /// Manage a prebuilt `AuthState` so tests can inject their own
        /// config and mailer.
        pub fn manage_auth_state(mut self, state: AuthState) -> Self {
            self.auth_state = Some(state);
            self
        }

        /// Finish building the Rocket instance.
        pub fn build(self) -> Rocket<Build> {
            let mut rocket = rocket::custom(self.figment);

            for (base, routes) in self.mounts {
                rocket = rocket.mount(base, routes);
            }

            if let Some(pool) = self.pg_pool {
                rocket = rocket.manage(crate::auth::users::UserStore::new(pool));
            }

            if let Some(state) = self.auth_state {
                rocket = rocket.manage(state);
            }

            rocket
        }

        /// Convenience helper to produce a blocking local client.
        pub fn blocking_client(self) -> Client {
            Client::tracked(self.build()).expect("valid Rocket instance")
        }

        /// Convenience helper to produce an asynchronous local client.
        pub async fn async_client(self) -> AsyncClient {
            AsyncClient::tracked(self.build())
                .await
                .expect("valid Rocket instance")
        }
    }
}
