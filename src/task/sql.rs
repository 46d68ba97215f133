// src/task/sql.rs

//! The `sql` task: execute a statement batch against a database.

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use anyhow::{Context, bail};
use serde::Deserialize;
use sqlx::any::AnyQueryResult;
use sqlx::{AnyConnection, Connection};
use tracing::{debug, info};

use super::{RunContext, Task, TaskFuture};
use crate::errors::{Result, TaskdagError};

type BatchFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqlParams {
    pub dialect: String,
    pub uri: String,
    pub sql: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            other => Err(format!(
                "unsupported sql dialect: {other} (expected \"sqlite\" or \"postgres\")"
            )),
        }
    }
}

impl Dialect {
    /// Connection URL for `uri`, adding the scheme when it is missing.
    fn connection_url(self, uri: &str) -> String {
        match self {
            Dialect::Sqlite if uri.starts_with("sqlite:") => uri.to_string(),
            Dialect::Sqlite => format!("sqlite:{uri}"),
            Dialect::Postgres
                if uri.starts_with("postgres://") || uri.starts_with("postgresql://") =>
            {
                uri.to_string()
            }
            Dialect::Postgres => format!("postgres://{uri}"),
        }
    }
}

/// Opens one connection per run and executes `sql` as a raw batch.
pub struct SqlTask {
    name: String,
    dialect: Dialect,
    url: String,
    sql: String,
}

impl SqlTask {
    pub fn from_params(name: impl Into<String>, params: SqlParams) -> Result<Self> {
        let name = name.into();
        let dialect = Dialect::from_str(&params.dialect)
            .map_err(|e| TaskdagError::config(format!("task '{name}' (type 'sql'): {e}")))?;
        Ok(Self {
            url: dialect.connection_url(&params.uri),
            dialect,
            sql: params.sql,
            name,
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Connect and run the batch. The future owns its inputs, so it can be
    /// raced against cancellation inside a `Send` task future.
    fn execute(&self) -> BatchFuture {
        let name = self.name.clone();
        let url = self.url.clone();
        let sql = self.sql.clone();

        Box::pin(async move {
            sqlx::any::install_default_drivers();

            let mut conn = AnyConnection::connect(&url)
                .await
                .with_context(|| format!("connecting to database for task '{name}'"))?;

            // Boxed here so the executor's lifetimes stay concrete.
            let batch: Pin<Box<dyn Future<Output = sqlx::Result<AnyQueryResult>> + Send + '_>> =
                sqlx::Executor::execute(&mut conn, sqlx::raw_sql(&sql));
            let done = batch
                .await
                .with_context(|| format!("executing sql of task '{name}'"))?;

            debug!(task = %name, rows = done.rows_affected(), "sql executed");
            conn.close().await?;
            Ok(())
        })
    }
}

impl Task for SqlTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a self, ctx: &'a RunContext) -> TaskFuture<'a> {
        let name = self.name.clone();
        let dialect = self.dialect;
        let cancel = ctx.cancellation_token().clone();
        let execute = self.execute();

        Box::pin(async move {
            info!(task = %name, ?dialect, "running sql task");
            tokio::select! {
                result = execute => result,
                _ = cancel.cancelled_owned() => bail!("sql task '{name}' cancelled"),
            }
        })
    }
}
