#![allow(dead_code)]

use sqldash::config::Config;
use sqldash::postgres::{self, PgBackend};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_postgres::{Client, NoTls};

pub const URL_ENV: &str = "SQLDASH_TEST_DATABASE_URL";

pub fn database_url() -> Option<String> {
    match std::env::var(URL_ENV) {
        Ok(url) if !url.trim().is_empty() => Some(url),
        _ => {
            eprintln!("skipping: {URL_ENV} is not set");
            None
        }
    }
}

/// A throwaway schema on the test database, plus an autocommit client for
/// setting it up and checking what actually got committed.
pub struct Scratch {
    pub url: String,
    pub schema: String,
    pub admin: Client,
}

impl Scratch {
    pub async fn create() -> anyhow::Result<Option<Self>> {
        let Some(url) = database_url() else {
            return Ok(None);
        };
        let (admin, connection) = tokio_postgres::connect(&url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                eprintln!("admin connection error: {e}");
            }
        });

        let nanos = SystemTime::now().duration_since(UNIX_EPOCH)?.subsec_nanos();
        let schema = format!("sqldash_test_{}_{}", std::process::id(), nanos);
        admin
            .batch_execute(&format!("CREATE SCHEMA {schema}"))
            .await?;
        Ok(Some(Self { url, schema, admin }))
    }

    pub fn table(&self, name: &str) -> String {
        format!("{}.{}", self.schema, name)
    }

    pub async fn backend(&self) -> anyhow::Result<PgBackend> {
        Ok(postgres::connect(&Config::new(self.url.clone())).await?)
    }

    pub async fn backend_with(&self, config: Config) -> anyhow::Result<PgBackend> {
        Ok(postgres::connect(&config).await?)
    }

    pub async fn count(&self, table: &str) -> anyhow::Result<i64> {
        let row = self
            .admin
            .query_one(&format!("SELECT count(*) FROM {}", self.table(table)), &[])
            .await?;
        Ok(row.get(0))
    }

    pub async fn drop(self) -> anyhow::Result<()> {
        self.admin
            .batch_execute(&format!("DROP SCHEMA {} CASCADE", self.schema))
            .await?;
        Ok(())
    }
}

pub fn run_cli(args: &[&str]) -> anyhow::Result<Output> {
    let bin = env!("CARGO_BIN_EXE_sqldash");
    Ok(Command::new(bin).args(args).env("RUST_LOG", "warn").output()?)
}
