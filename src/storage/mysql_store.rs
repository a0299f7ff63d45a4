//! MySQL implementation of [`RemoteStore`]
//!
//! Connect, read and write are bounded by the target's timeout so a stalled
//! server cannot hang the flush scheduler.

use super::remote::{RemoteStore, StagedRow, UploadTarget};
use crate::error::{DaqError, Result};
use mysql::prelude::Queryable;
use mysql::{Conn, OptsBuilder, TxOpts};

/// Timestamp format sent for `DATETIME(6)` columns
const SQL_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Remote store backed by a MySQL server
pub struct MySqlStore {
    target: UploadTarget,
    conn: Option<Conn>,
}

impl MySqlStore {
    /// Create a store for the target; no connection is made yet
    pub fn new(target: UploadTarget) -> Self {
        Self { target, conn: None }
    }

    /// Destination description, without credentials
    pub fn describe(&self) -> String {
        self.target.describe()
    }

    fn opts(&self) -> OptsBuilder {
        let t = &self.target;
        OptsBuilder::new()
            .ip_or_hostname(Some(t.host.clone()))
            .tcp_port(t.port)
            .user(Some(t.user.clone()))
            .pass(Some(t.password.clone()))
            .db_name(Some(t.database.clone()))
            .tcp_connect_timeout(Some(t.timeout))
            .read_timeout(Some(t.timeout))
            .write_timeout(Some(t.timeout))
    }

    fn conn(&mut self) -> Result<&mut Conn> {
        self.conn
            .as_mut()
            .ok_or_else(|| DaqError::Upload("Not connected to the remote store".to_string()))
    }

    /// Drop the connection after a failure so the next attempt reconnects
    fn fail(&mut self, context: &str, err: mysql::Error) -> DaqError {
        self.conn = None;
        DaqError::Upload(format!("{}: {}", context, err))
    }
}

/// DDL for the sample table
pub fn create_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS `{}` (\
            id BIGINT AUTO_INCREMENT PRIMARY KEY, \
            timestamp DATETIME(6) NOT NULL, \
            label VARCHAR(255) NOT NULL, \
            channel_1 DOUBLE NOT NULL, \
            channel_2 DOUBLE NOT NULL, \
            channel_3 DOUBLE NOT NULL, \
            INDEX idx_timestamp (timestamp), \
            INDEX idx_label (label)\
        )",
        table
    )
}

/// Parameterised insert for the sample table
pub fn insert_sql(table: &str) -> String {
    format!(
        "INSERT INTO `{}` (timestamp, label, channel_1, channel_2, channel_3) VALUES (?, ?, ?, ?, ?)",
        table
    )
}

impl RemoteStore for MySqlStore {
    fn connect(&mut self) -> Result<()> {
        self.conn = None;
        let conn = Conn::new(self.opts()).map_err(|e| {
            DaqError::Upload(format!("Failed to connect to {}: {}", self.target.describe(), e))
        })?;
        tracing::debug!("Connected to {}", self.target.describe());
        self.conn = Some(conn);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn disconnect(&mut self) {
        if self.conn.take().is_some() {
            tracing::debug!("Disconnected from {}", self.target.describe());
        }
    }

    fn ensure_table(&mut self, table: &str) -> Result<()> {
        let sql = create_table_sql(table);
        let result = self.conn()?.query_drop(sql);
        result.map_err(|e| self.fail(&format!("Failed to create table {}", table), e))
    }

    fn insert_rows(&mut self, table: &str, label: &str, rows: &[StagedRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let sql = insert_sql(table);
        let params: Vec<_> = rows
            .iter()
            .map(|r| {
                (
                    r.timestamp.format(SQL_TIMESTAMP_FORMAT).to_string(),
                    label,
                    r.channel_1,
                    r.channel_2,
                    r.channel_3,
                )
            })
            .collect();

        let result = (|| {
            let conn = self.conn()?;
            let mut tx = conn
                .start_transaction(TxOpts::default())
                .map_err(|e| DaqError::Upload(format!("Failed to start transaction: {}", e)))?;
            tx.exec_batch(&sql, params)
                .map_err(|e| DaqError::Upload(format!("Insert into {} failed: {}", table, e)))?;
            tx.commit()
                .map_err(|e| DaqError::Upload(format!("Commit to {} failed: {}", table, e)))
        })();

        if result.is_err() {
            self.conn = None;
        }
        result
    }
}
