//! MySQL connection implementation

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveTime, Timelike};
use dbpool_core::{
    ColumnMeta, Connection, DbPoolError, QueryResult, Result, Row, StatementResult, Value,
};
use mysql_async::{Conn, Opts, Params, Row as MySqlRow, consts::ColumnType, prelude::*};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

/// A single MySQL session.
///
/// One `MySqlConnection` owns exactly one server session; pooling happens a
/// layer above, so no `mysql_async::Pool` is used here.
pub struct MySqlConnection {
    conn: Mutex<Option<Conn>>,
    closed: AtomicBool,
}

impl MySqlConnection {
    /// Open a session with prepared options
    pub async fn connect(opts: Opts) -> Result<Self> {
        let conn = Conn::new(opts)
            .await
            .map_err(|e| DbPoolError::Connection(format!("Failed to connect to MySQL: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            closed: AtomicBool::new(false),
        })
    }

    /// Map a driver error, flagging the session as unusable when the
    /// transport is gone.
    fn map_error(&self, e: mysql_async::Error, action: &str) -> DbPoolError {
        match e {
            mysql_async::Error::Io(_)
            | mysql_async::Error::Driver(mysql_async::DriverError::ConnectionClosed) => {
                self.closed.store(true, Ordering::SeqCst);
                DbPoolError::Connection(format!("MySQL connection lost during {}: {}", action, e))
            }
            other => DbPoolError::Query(format!("Failed to {}: {}", action, other)),
        }
    }
}

/// Convert our Value type into a mysql_async parameter
fn value_to_mysql(value: &Value) -> mysql_async::Value {
    use mysql_async::Value as My;

    match value {
        Value::Null => My::NULL,
        Value::Bool(v) => My::Int(i64::from(*v)),
        Value::Int32(v) => My::Int(i64::from(*v)),
        Value::Int64(v) => My::Int(*v),
        Value::UInt64(v) => My::UInt(*v),
        Value::Float32(v) => My::Float(*v),
        Value::Float64(v) => My::Double(*v),
        Value::Decimal(v) | Value::String(v) => My::Bytes(v.clone().into_bytes()),
        Value::Bytes(v) => My::Bytes(v.clone()),
        Value::Uuid(v) => My::Bytes(v.to_string().into_bytes()),
        Value::Json(v) => My::Bytes(v.to_string().into_bytes()),
        Value::Date(d) => My::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0),
        Value::Time(t) => My::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond() / 1_000,
        ),
        Value::DateTime(dt) => My::Date(
            dt.year() as u16,
            dt.month() as u8,
            dt.day() as u8,
            dt.hour() as u8,
            dt.minute() as u8,
            dt.second() as u8,
            dt.nanosecond() / 1_000,
        ),
        Value::DateTimeUtc(dt) => value_to_mysql(&Value::DateTime(dt.naive_utc())),
    }
}

/// Convert mysql_async Value to our Value type, using column type metadata
/// to interpret byte strings from the text protocol.
fn mysql_value_to_value(val: mysql_async::Value, col_type: ColumnType) -> Value {
    match val {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(s) => match col_type {
                ColumnType::MYSQL_TYPE_TINY
                | ColumnType::MYSQL_TYPE_SHORT
                | ColumnType::MYSQL_TYPE_LONG
                | ColumnType::MYSQL_TYPE_LONGLONG
                | ColumnType::MYSQL_TYPE_INT24
                | ColumnType::MYSQL_TYPE_YEAR => {
                    s.parse::<i64>().map(Value::Int64).unwrap_or(Value::String(s))
                }
                ColumnType::MYSQL_TYPE_FLOAT => {
                    s.parse::<f32>().map(Value::Float32).unwrap_or(Value::String(s))
                }
                ColumnType::MYSQL_TYPE_DOUBLE => {
                    s.parse::<f64>().map(Value::Float64).unwrap_or(Value::String(s))
                }
                ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
                    Value::Decimal(s)
                }
                ColumnType::MYSQL_TYPE_JSON => serde_json::from_str(&s)
                    .map(Value::Json)
                    .unwrap_or(Value::String(s)),
                _ => Value::String(s),
            },
            Err(e) => Value::Bytes(e.into_bytes()),
        },
        mysql_async::Value::Int(i) => Value::Int64(i),
        mysql_async::Value::UInt(u) => Value::UInt64(u),
        mysql_async::Value::Float(f) => Value::Float32(f),
        mysql_async::Value::Double(d) => Value::Float64(d),
        mysql_async::Value::Date(year, month, day, hour, min, sec, micro) => {
            let date = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32);
            if hour == 0 && min == 0 && sec == 0 && micro == 0 {
                date.map(Value::Date).unwrap_or_else(|| {
                    Value::String(format!("{:04}-{:02}-{:02}", year, month, day))
                })
            } else {
                date.and_then(|d| d.and_hms_micro_opt(hour as u32, min as u32, sec as u32, micro))
                    .map(Value::DateTime)
                    .unwrap_or_else(|| {
                        Value::String(format!(
                            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                            year, month, day, hour, min, sec
                        ))
                    })
            }
        }
        mysql_async::Value::Time(negative, days, hours, mins, secs, micros) => {
            // TIME columns can exceed a day or be negative; only plain
            // clock times map onto NaiveTime.
            let clock = (!negative && days == 0)
                .then(|| {
                    NaiveTime::from_hms_micro_opt(hours as u32, mins as u32, secs as u32, micros)
                })
                .flatten();
            clock.map(Value::Time).unwrap_or_else(|| {
                let total_hours = days * 24 + hours as u32;
                let sign = if negative { "-" } else { "" };
                Value::String(format!(
                    "{}{:02}:{:02}:{:02}.{:06}",
                    sign, total_hours, mins, secs, micros
                ))
            })
        }
    }
}

fn positional(params: &[Value]) -> Params {
    if params.is_empty() {
        Params::Empty
    } else {
        Params::Positional(params.iter().map(value_to_mysql).collect())
    }
}

#[async_trait]
impl Connection for MySqlConnection {
    fn driver_name(&self) -> &str {
        "mysql"
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| DbPoolError::Connection("MySQL connection is closed".into()))?;

        let outcome = if params.is_empty() {
            conn.query_drop(sql).await
        } else {
            conn.exec_drop(sql, positional(params)).await
        };
        outcome.map_err(|e| self.map_error(e, "execute statement"))?;

        let result = StatementResult {
            affected_rows: conn.affected_rows(),
            last_insert_id: conn.last_insert_id(),
        };
        tracing::debug!(affected_rows = result.affected_rows, "statement executed");
        Ok(result)
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let start_time = std::time::Instant::now();
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| DbPoolError::Connection("MySQL connection is closed".into()))?;

        let outcome: std::result::Result<Vec<MySqlRow>, _> = if params.is_empty() {
            conn.query(sql).await
        } else {
            conn.exec(sql, positional(params)).await
        };
        let mysql_rows = outcome.map_err(|e| self.map_error(e, "execute query"))?;
        drop(guard);

        let mut columns = Vec::new();
        let mut column_names = Vec::new();
        let mut column_types = Vec::new();
        if let Some(first_row) = mysql_rows.first() {
            for (idx, col) in first_row.columns_ref().iter().enumerate() {
                let name = col.name_str().to_string();
                column_names.push(name.clone());
                column_types.push(col.column_type());
                columns.push(ColumnMeta {
                    name,
                    data_type: format!("{:?}", col.column_type()),
                    ordinal: idx,
                });
            }
        }

        let rows = mysql_rows
            .into_iter()
            .map(|mut mysql_row| {
                let values = column_types
                    .iter()
                    .enumerate()
                    .map(|(idx, col_type)| {
                        let raw = mysql_row
                            .take::<mysql_async::Value, usize>(idx)
                            .unwrap_or(mysql_async::Value::NULL);
                        mysql_value_to_value(raw, *col_type)
                    })
                    .collect();
                Row::new(column_names.clone(), values)
            })
            .collect::<Vec<_>>();

        let mut result = QueryResult::empty();
        result.columns = columns;
        result.rows = rows;
        result.execution_time_ms = start_time.elapsed().as_millis() as u64;
        tracing::debug!(
            rows = result.row_count(),
            elapsed_ms = result.execution_time_ms,
            "query executed"
        );
        Ok(result)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        let conn = self.conn.lock().await.take();
        if let Some(conn) = conn {
            conn.disconnect()
                .await
                .map_err(|e| DbPoolError::Connection(format!("Failed to close MySQL connection: {}", e)))?;
            tracing::debug!("MySQL connection closed");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_protocol_integers() {
        let v = mysql_value_to_value(
            mysql_async::Value::Bytes(b"42".to_vec()),
            ColumnType::MYSQL_TYPE_LONG,
        );
        assert_eq!(v, Value::Int64(42));
    }

    #[test]
    fn test_decimal_keeps_precision() {
        let v = mysql_value_to_value(
            mysql_async::Value::Bytes(b"12345678901234567890.01".to_vec()),
            ColumnType::MYSQL_TYPE_NEWDECIMAL,
        );
        assert_eq!(v, Value::Decimal("12345678901234567890.01".into()));
    }

    #[test]
    fn test_date_and_datetime() {
        let date = mysql_value_to_value(
            mysql_async::Value::Date(2024, 2, 29, 0, 0, 0, 0),
            ColumnType::MYSQL_TYPE_DATE,
        );
        assert_eq!(date, Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()));

        let dt = mysql_value_to_value(
            mysql_async::Value::Date(2024, 2, 29, 13, 5, 9, 0),
            ColumnType::MYSQL_TYPE_DATETIME,
        );
        assert!(matches!(dt, Value::DateTime(_)));
    }

    #[test]
    fn test_long_time_falls_back_to_string() {
        let v = mysql_value_to_value(
            mysql_async::Value::Time(true, 1, 2, 3, 4, 0),
            ColumnType::MYSQL_TYPE_TIME,
        );
        assert_eq!(v, Value::String("-26:03:04.000000".into()));
    }

    #[test]
    fn test_params_conversion() {
        assert_eq!(value_to_mysql(&Value::Bool(true)), mysql_async::Value::Int(1));
        assert_eq!(
            value_to_mysql(&Value::String("x".into())),
            mysql_async::Value::Bytes(b"x".to_vec())
        );
        assert!(matches!(positional(&[]), Params::Empty));
        assert!(matches!(positional(&[Value::Null]), Params::Positional(v) if v.len() == 1));
    }
}
