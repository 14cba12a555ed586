//! SQL access via a registry-held connection/statement pair. Grounded on
//! `rusqlite`'s bundled SQLite; the registry stores the live `Connection`
//! behind a mutex since rusqlite is not `Sync`. A prepared statement cannot
//! itself be stored in the registry — `rusqlite::Statement` borrows from its
//! `Connection`, and the registry's handles must be `'static` — so a
//! `db_statement` handle instead holds the statement's SQL text plus a
//! cursor over rows fetched from it; `db.fetch` re-acquires the owning
//! connection each call and pages through that cursor.

use crate::params::{optional_u64, required_str};
use async_trait::async_trait;
use bridge_config::ResourceKind;
use bridge_core::{registry::PutOptions, BridgeError, HandlerContext, ModuleCatalog, ModuleHandler};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex as StdMutex;

const DEFAULT_FETCH_LIMIT: u64 = 50;

pub fn register(catalog: &mut ModuleCatalog) {
    catalog.register("db", "connect", Connect);
    catalog.register("db", "execute", Execute);
    catalog.register("db", "query", Query);
    catalog.register("db", "prepare", Prepare);
    catalog.register("db", "fetch", Fetch);
    catalog.register("db", "close", Close);
    catalog.register("db", "disconnect", Disconnect);
}

struct PreparedStatement {
    connection_id: String,
    sql: String,
    rows: StdMutex<Option<VecDeque<Value>>>,
}

struct Connect;

#[async_trait]
impl ModuleHandler for Connect {
    fn required_params(&self) -> &[&'static str] {
        &["dsn"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let dsn = required_str(&params, "db", "connect", "dsn")?;
        // Only a local sqlite file path or `:memory:` is supported; remote
        // drivers are out of scope for this broker (see DESIGN.md).
        let conn = Connection::open(dsn)
            .map_err(|e| BridgeError::Handler(format!("failed to open sqlite connection: {e}")))?;
        let handle = ctx
            .registry
            .put(ResourceKind::DbConnection, StdMutex::new(conn), PutOptions::default())
            .await;
        Ok(json!({ "connection_id": handle }))
    }
}

struct Execute;

#[async_trait]
impl ModuleHandler for Execute {
    fn required_params(&self) -> &[&'static str] {
        &["connection_id", "sql"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let handle = required_str(&params, "db", "execute", "connection_id")?;
        let sql = required_str(&params, "db", "execute", "sql")?;
        let value = ctx.registry.get(ResourceKind::DbConnection, handle).await?;
        let conn = value
            .downcast::<StdMutex<Connection>>()
            .map_err(|_| BridgeError::Internal("connection handle type mismatch".to_string()))?;
        let conn = conn.lock().unwrap();
        let rows_affected = conn
            .execute(sql, [])
            .map_err(|e| BridgeError::Handler(format!("sql execute failed: {e}")))?;
        Ok(json!({ "rows_affected": rows_affected }))
    }
}

struct Query;

#[async_trait]
impl ModuleHandler for Query {
    fn required_params(&self) -> &[&'static str] {
        &["connection_id", "sql"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let handle = required_str(&params, "db", "query", "connection_id")?;
        let sql = required_str(&params, "db", "query", "sql")?;
        let value = ctx.registry.get(ResourceKind::DbConnection, handle).await?;
        let conn = value
            .downcast::<StdMutex<Connection>>()
            .map_err(|_| BridgeError::Internal("connection handle type mismatch".to_string()))?;
        let conn = conn.lock().unwrap();
        let out = run_query(&conn, sql)?;
        Ok(json!({ "rows": out }))
    }
}

fn run_query(conn: &Connection, sql: &str) -> Result<Vec<Value>, BridgeError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| BridgeError::Handler(format!("sql prepare failed: {e}")))?;
    let column_count = stmt.column_count();
    let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

    let rows = stmt
        .query_map([], |row| {
            let mut record = serde_json::Map::new();
            for i in 0..column_count {
                let value: rusqlite::types::ValueRef = row.get_ref(i)?;
                record.insert(column_names[i].clone(), sqlite_value_to_json(value));
            }
            Ok(Value::Object(record))
        })
        .map_err(|e| BridgeError::Handler(format!("sql query failed: {e}")))?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| BridgeError::Handler(format!("row decode failed: {e}")))?);
    }
    Ok(out)
}

fn sqlite_value_to_json(v: rusqlite::types::ValueRef) -> Value {
    match v {
        rusqlite::types::ValueRef::Null => Value::Null,
        rusqlite::types::ValueRef::Integer(i) => json!(i),
        rusqlite::types::ValueRef::Real(f) => json!(f),
        rusqlite::types::ValueRef::Text(t) => json!(String::from_utf8_lossy(t)),
        rusqlite::types::ValueRef::Blob(b) => json!(base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            b
        )),
    }
}

struct Prepare;

#[async_trait]
impl ModuleHandler for Prepare {
    fn required_params(&self) -> &[&'static str] {
        &["connection_id", "sql"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let connection_id = required_str(&params, "db", "prepare", "connection_id")?;
        let sql = required_str(&params, "db", "prepare", "sql")?;
        // Fail fast if the connection handle is already gone, rather than
        // minting a statement handle that can never fetch.
        ctx.registry.get(ResourceKind::DbConnection, connection_id).await?;

        let statement = PreparedStatement {
            connection_id: connection_id.to_string(),
            sql: sql.to_string(),
            rows: StdMutex::new(None),
        };
        let handle = ctx.registry.put(ResourceKind::DbStatement, statement, PutOptions::default()).await;
        Ok(json!({ "statement_id": handle }))
    }
}

struct Fetch;

#[async_trait]
impl ModuleHandler for Fetch {
    fn required_params(&self) -> &[&'static str] {
        &["statement_id"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let statement_id = required_str(&params, "db", "fetch", "statement_id")?;
        let limit = optional_u64(&params, "limit").unwrap_or(DEFAULT_FETCH_LIMIT) as usize;

        let value = ctx.registry.get(ResourceKind::DbStatement, statement_id).await?;
        let statement = value
            .downcast::<PreparedStatement>()
            .map_err(|_| BridgeError::Internal("statement handle type mismatch".to_string()))?;

        // Populate the cursor on first fetch. The connection lookup is
        // `.await`ed outside of any std mutex guard, since holding one
        // across an await point would make this future non-`Send`.
        let needs_fetch = statement.rows.lock().unwrap().is_none();
        if needs_fetch {
            let conn_value = ctx.registry.get(ResourceKind::DbConnection, &statement.connection_id).await?;
            let all_rows = {
                let conn = conn_value
                    .downcast::<StdMutex<Connection>>()
                    .map_err(|_| BridgeError::Internal("connection handle type mismatch".to_string()))?;
                let conn = conn.lock().unwrap();
                run_query(&conn, &statement.sql)?
            };
            *statement.rows.lock().unwrap() = Some(all_rows.into());
        }

        let mut rows_guard = statement.rows.lock().unwrap();
        let pending = rows_guard.as_mut().unwrap();
        let batch: Vec<Value> = pending.drain(..limit.min(pending.len())).collect();
        let has_more = !pending.is_empty();
        drop(rows_guard);
        Ok(json!({ "rows": batch, "has_more": has_more }))
    }
}

struct Close;

#[async_trait]
impl ModuleHandler for Close {
    fn required_params(&self) -> &[&'static str] {
        &["statement_id"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let handle = required_str(&params, "db", "close", "statement_id")?;
        ctx.registry.delete(ResourceKind::DbStatement, handle).await?;
        Ok(json!({ "closed": true }))
    }
}

struct Disconnect;

#[async_trait]
impl ModuleHandler for Disconnect {
    fn required_params(&self) -> &[&'static str] {
        &["connection_id"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let handle = required_str(&params, "db", "disconnect", "connection_id")?;
        ctx.registry.delete(ResourceKind::DbConnection, handle).await?;
        Ok(json!({ "disconnected": true }))
    }
}
