// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Testcontainers setup for MySQL and Redis.
//!
//! Provides helpers to spin up the source database and the cursor cache for
//! integration tests.

use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use std::time::Duration;
use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

pub const MYSQL_PASSWORD: &str = "sync";
pub const MYSQL_DATABASE: &str = "sync";

/// Create a vanilla Redis container.
///
/// Uses official redis:7 image. Waits for "Ready to accept connections".
pub fn redis_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    docker.run(image)
}

/// Get the Redis URL for a container.
pub fn redis_url(container: &Container<'_, GenericImage>) -> String {
    let port = container.get_host_port_ipv4(6379);
    format!("redis://127.0.0.1:{}", port)
}

/// Create a MySQL 8 container with an empty `sync` database.
///
/// The entrypoint restarts the server once after initialization, so the log
/// line alone does not mean the port is usable. Use [`connect_mysql`].
pub fn mysql_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("mysql", "8.0")
        .with_env_var("MYSQL_ROOT_PASSWORD", MYSQL_PASSWORD)
        .with_env_var("MYSQL_DATABASE", MYSQL_DATABASE)
        .with_exposed_port(3306)
        .with_wait_for(WaitFor::message_on_stderr("port: 3306  MySQL Community Server"));
    docker.run(image)
}

/// Get the MySQL URL for a container.
pub fn mysql_url(container: &Container<'_, GenericImage>) -> String {
    let port = container.get_host_port_ipv4(3306);
    format!(
        "mysql://root:{}@127.0.0.1:{}/{}",
        MYSQL_PASSWORD, port, MYSQL_DATABASE
    )
}

/// Connect to MySQL, retrying while the server finishes starting.
pub async fn connect_mysql(url: &str) -> MySqlPool {
    let mut last_error = None;
    for _ in 0..60 {
        match MySqlPoolOptions::new().max_connections(2).connect(url).await {
            Ok(pool) => return pool,
            Err(e) => {
                last_error = Some(e);
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }
    panic!("MySQL never became ready: {:?}", last_error);
}

/// Create the change table with the column layout the readers expect.
pub async fn create_change_table(pool: &MySqlPool, table: &str) {
    let ddl = format!(
        "CREATE TABLE {} (
            id       BIGINT PRIMARY KEY,
            data     TEXT NULL,
            createAt DATETIME(6) NOT NULL,
            updateAt DATETIME(6) NULL,
            deleteAt DATETIME(6) NULL
        )",
        table
    );
    sqlx::query(&ddl).execute(pool).await.unwrap();
}

/// Insert one row; `None` timestamps stay NULL.
pub async fn insert_row(
    pool: &MySqlPool,
    table: &str,
    id: i64,
    data: &str,
    create_at: chrono::DateTime<chrono::Utc>,
    update_at: Option<chrono::DateTime<chrono::Utc>>,
    delete_at: Option<chrono::DateTime<chrono::Utc>>,
) {
    let sql = format!(
        "INSERT INTO {} (id, data, createAt, updateAt, deleteAt) VALUES (?, ?, ?, ?, ?)",
        table
    );
    sqlx::query(&sql)
        .bind(id)
        .bind(data)
        .bind(create_at)
        .bind(update_at)
        .bind(delete_at)
        .execute(pool)
        .await
        .unwrap();
}
