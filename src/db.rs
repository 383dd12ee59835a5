use crate::entities::{
    Audit, FalconDirection, FalconMessage, Field, Response, Solicitation, SparkId,
    StatisticSample, StatusType,
};
use crate::error::{AuditError, Result as QueryResult};
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use std::path::Path;

// ============================================================================
// COLUMN LISTS & ROW MAPPING
// ============================================================================

pub const AUDIT_COLUMNS: &str = "transaction_datetime, system, token, pid, audit_type, score, pan,
    status, trip, timezone, clock1, clock2, clock3, clock4, clock5, clock6, clock7, clock8,
    clock9, clock10";

pub const STATISTIC_COLUMNS: &str =
    "date, server, agent, sent, received, cpu_total, cpu_eclage, cpu_spark, cpu_ecoage";

pub fn audit_from_row(row: &Row<'_>) -> rusqlite::Result<Audit> {
    Ok(Audit {
        transaction_datetime: row.get(0)?,
        system: row.get(1)?,
        token: row.get(2)?,
        pid: row.get(3)?,
        audit_type: row.get(4)?,
        score: row.get(5)?,
        pan: row.get(6)?,
        status: row.get(7)?,
        trip: row.get(8)?,
        timezone: row.get(9)?,
        clock1: row.get(10)?,
        clock2: row.get(11)?,
        clock3: row.get(12)?,
        clock4: row.get(13)?,
        clock5: row.get(14)?,
        clock6: row.get(15)?,
        clock7: row.get(16)?,
        clock8: row.get(17)?,
        clock9: row.get(18)?,
        clock10: row.get(19)?,
    })
}

pub fn statistic_from_row(row: &Row<'_>) -> rusqlite::Result<StatisticSample> {
    Ok(StatisticSample {
        date: row.get(0)?,
        server: row.get(1)?,
        agent: row.get(2)?,
        sent: row.get(3)?,
        received: row.get(4)?,
        cpu_total: row.get(5)?,
        cpu_eclage: row.get(6)?,
        cpu_spark: row.get(7)?,
        cpu_ecoage: row.get(8)?,
    })
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL lets the server read while an import is running
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    debug!("journal_mode = {mode}");

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS spk_audit (
            transaction_datetime TEXT NOT NULL,
            system TEXT NOT NULL,
            token TEXT NOT NULL,
            pid TEXT,
            audit_type INTEGER,
            score TEXT,
            pan TEXT,
            status INTEGER,
            trip INTEGER,
            timezone TEXT,
            clock1 TEXT, clock2 TEXT, clock3 TEXT, clock4 TEXT, clock5 TEXT,
            clock6 TEXT, clock7 TEXT, clock8 TEXT, clock9 TEXT, clock10 TEXT,
            PRIMARY KEY (transaction_datetime, system, token)
        );

        CREATE TABLE IF NOT EXISTS spk_audit_falcon_in (
            transaction_datetime TEXT NOT NULL,
            system TEXT NOT NULL,
            token TEXT NOT NULL,
            timezone TEXT,
            message TEXT,
            PRIMARY KEY (transaction_datetime, system, token)
        );

        CREATE TABLE IF NOT EXISTS spk_audit_falcon_out (
            transaction_datetime TEXT NOT NULL,
            system TEXT NOT NULL,
            token TEXT NOT NULL,
            timezone TEXT,
            message TEXT,
            PRIMARY KEY (transaction_datetime, system, token)
        );

        CREATE TABLE IF NOT EXISTS spk_audit_response (
            transaction_datetime TEXT NOT NULL,
            system TEXT NOT NULL,
            token TEXT NOT NULL,
            return_code INTEGER,
            reason_code INTEGER,
            score INTEGER,
            score_adapt INTEGER,
            score_reason1 TEXT, score_reason2 TEXT, score_reason3 TEXT,
            score_adapt_r1 TEXT, score_adapt_r2 TEXT, score_adapt_r3 TEXT,
            decline_reason TEXT,
            user_data1 TEXT, user_data2 TEXT, user_data3 TEXT, user_data4 TEXT, user_data5 TEXT,
            PRIMARY KEY (transaction_datetime, system, token)
        );

        CREATE TABLE IF NOT EXISTS spk_audit_solicitation (
            transaction_datetime TEXT NOT NULL,
            system TEXT NOT NULL,
            token TEXT NOT NULL,
            message_length INTEGER,
            exthdr_length INTEGER,
            message_type TEXT,
            app_token TEXT,
            init_time TEXT,
            send_time TEXT,
            wait TEXT,
            wait_interval INTEGER,
            response TEXT,
            source_ip TEXT,
            source_ip_response TEXT,
            source TEXT,
            destination TEXT,
            PRIMARY KEY (transaction_datetime, system, token)
        );

        CREATE TABLE IF NOT EXISTS spk_statistics (
            date TEXT NOT NULL,
            server TEXT NOT NULL,
            agent INTEGER NOT NULL,
            sent INTEGER,
            received INTEGER,
            cpu_total INTEGER,
            cpu_eclage INTEGER,
            cpu_spark INTEGER,
            cpu_ecoage INTEGER,
            PRIMARY KEY (date, server, agent)
        );

        CREATE TABLE IF NOT EXISTS spk_status_type (
            status INTEGER PRIMARY KEY,
            description TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS spk_fields (
            message_type TEXT NOT NULL,
            flow TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            position INTEGER,
            length INTEGER,
            PRIMARY KEY (message_type, flow, name)
        );

        CREATE INDEX IF NOT EXISTS idx_audit_system ON spk_audit(system, transaction_datetime);
        CREATE INDEX IF NOT EXISTS idx_audit_status ON spk_audit(status, transaction_datetime);
        CREATE INDEX IF NOT EXISTS idx_audit_pan ON spk_audit(pan);
        CREATE INDEX IF NOT EXISTS idx_statistics_server ON spk_statistics(server, date);",
    )?;

    Ok(())
}

// ============================================================================
// CSV IMPORT
// ============================================================================

fn load_csv<T: DeserializeOwned>(csv_path: &Path) -> Result<Vec<T>> {
    let mut rdr = csv::Reader::from_path(csv_path)
        .with_context(|| format!("Failed to open CSV file {}", csv_path.display()))?;

    let mut rows = Vec::new();
    for (line, result) in rdr.deserialize().enumerate() {
        // header is line 1
        let row: T = result.with_context(|| format!("Failed to deserialize line {}", line + 2))?;
        rows.push(row);
    }

    Ok(rows)
}

pub fn load_audits_csv(csv_path: &Path) -> Result<Vec<Audit>> {
    load_csv(csv_path)
}

pub fn load_statistics_csv(csv_path: &Path) -> Result<Vec<StatisticSample>> {
    load_csv(csv_path)
}

/// Falcon in and out files share one layout
pub fn load_falcon_messages_csv(csv_path: &Path) -> Result<Vec<FalconMessage>> {
    load_csv(csv_path)
}

pub fn load_responses_csv(csv_path: &Path) -> Result<Vec<Response>> {
    load_csv(csv_path)
}

pub fn load_solicitations_csv(csv_path: &Path) -> Result<Vec<Solicitation>> {
    load_csv(csv_path)
}

pub fn load_status_types_csv(csv_path: &Path) -> Result<Vec<StatusType>> {
    load_csv(csv_path)
}

pub fn load_fields_csv(csv_path: &Path) -> Result<Vec<Field>> {
    load_csv(csv_path)
}

// ============================================================================
// INSERTS
// ============================================================================

/// Run `insert` for every row, counting primary-key duplicates as skipped.
fn insert_all<T>(
    table: &str,
    rows: &[T],
    mut insert: impl FnMut(&T) -> rusqlite::Result<usize>,
) -> Result<usize> {
    let mut inserted = 0;
    let mut duplicates = 0;

    for row in rows {
        match insert(row) {
            Ok(_) => inserted += 1,
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                duplicates += 1;
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to insert into {table}")),
        }
    }

    info!("{table}: inserted {inserted}, skipped {duplicates} duplicates");
    Ok(inserted)
}

pub fn insert_audits(conn: &Connection, audits: &[Audit]) -> Result<usize> {
    let mut stmt = conn.prepare(&format!(
        "INSERT INTO spk_audit ({AUDIT_COLUMNS})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                 ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)"
    ))?;

    insert_all("spk_audit", audits, |a| {
        stmt.execute(params![
            a.transaction_datetime,
            a.system,
            a.token,
            a.pid,
            a.audit_type,
            a.score,
            a.pan,
            a.status,
            a.trip,
            a.timezone,
            a.clock1,
            a.clock2,
            a.clock3,
            a.clock4,
            a.clock5,
            a.clock6,
            a.clock7,
            a.clock8,
            a.clock9,
            a.clock10,
        ])
    })
}

pub fn insert_statistics(conn: &Connection, samples: &[StatisticSample]) -> Result<usize> {
    let mut stmt = conn.prepare(&format!(
        "INSERT INTO spk_statistics ({STATISTIC_COLUMNS})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
    ))?;

    insert_all("spk_statistics", samples, |s| {
        stmt.execute(params![
            s.date,
            s.server,
            s.agent,
            s.sent,
            s.received,
            s.cpu_total,
            s.cpu_eclage,
            s.cpu_spark,
            s.cpu_ecoage,
        ])
    })
}

pub fn insert_falcon_messages(
    conn: &Connection,
    direction: FalconDirection,
    messages: &[FalconMessage],
) -> Result<usize> {
    let table = direction.table();
    let mut stmt = conn.prepare(&format!(
        "INSERT INTO {table} (transaction_datetime, system, token, timezone, message)
         VALUES (?1, ?2, ?3, ?4, ?5)"
    ))?;

    insert_all(table, messages, |m| {
        stmt.execute(params![
            m.transaction_datetime,
            m.system,
            m.token,
            m.timezone,
            m.message,
        ])
    })
}

pub fn insert_responses(conn: &Connection, responses: &[Response]) -> Result<usize> {
    let mut stmt = conn.prepare(
        "INSERT INTO spk_audit_response (
            transaction_datetime, system, token, return_code, reason_code, score, score_adapt,
            score_reason1, score_reason2, score_reason3,
            score_adapt_r1, score_adapt_r2, score_adapt_r3, decline_reason,
            user_data1, user_data2, user_data3, user_data4, user_data5
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                  ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
    )?;

    insert_all("spk_audit_response", responses, |r| {
        stmt.execute(params![
            r.transaction_datetime,
            r.system,
            r.token,
            r.return_code,
            r.reason_code,
            r.score,
            r.score_adapt,
            r.score_reason1,
            r.score_reason2,
            r.score_reason3,
            r.score_adapt_r1,
            r.score_adapt_r2,
            r.score_adapt_r3,
            r.decline_reason,
            r.user_data1,
            r.user_data2,
            r.user_data3,
            r.user_data4,
            r.user_data5,
        ])
    })
}

pub fn insert_solicitations(conn: &Connection, solicitations: &[Solicitation]) -> Result<usize> {
    let mut stmt = conn.prepare(
        "INSERT INTO spk_audit_solicitation (
            transaction_datetime, system, token, message_length, exthdr_length, message_type,
            app_token, init_time, send_time, wait, wait_interval, response,
            source_ip, source_ip_response, source, destination
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
    )?;

    insert_all("spk_audit_solicitation", solicitations, |s| {
        stmt.execute(params![
            s.transaction_datetime,
            s.system,
            s.token,
            s.message_length,
            s.exthdr_length,
            s.message_type,
            s.app_token,
            s.init_time,
            s.send_time,
            s.wait,
            s.wait_interval,
            s.response,
            s.source_ip,
            s.source_ip_response,
            s.source,
            s.destination,
        ])
    })
}

pub fn insert_status_types(conn: &Connection, status_types: &[StatusType]) -> Result<usize> {
    let mut stmt =
        conn.prepare("INSERT INTO spk_status_type (status, description) VALUES (?1, ?2)")?;

    insert_all("spk_status_type", status_types, |s| {
        stmt.execute(params![s.status, s.description])
    })
}

pub fn insert_fields(conn: &Connection, fields: &[Field]) -> Result<usize> {
    let mut stmt = conn.prepare(
        "INSERT INTO spk_fields (message_type, flow, name, description, position, length)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;

    insert_all("spk_fields", fields, |f| {
        stmt.execute(params![
            f.message_type,
            f.flow,
            f.name,
            f.description,
            f.position,
            f.length,
        ])
    })
}

pub fn verify_count(conn: &Connection, table: &str) -> Result<i64> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
        row.get(0)
    })?;
    Ok(count)
}

// ============================================================================
// KEYED LOOKUPS
// ============================================================================

fn not_found(kind: &str, id: &SparkId) -> AuditError {
    AuditError::NotFound(format!(
        "{kind} {} / {} / {}",
        id.transaction_datetime, id.system, id.token
    ))
}

pub fn get_audit(conn: &Connection, id: &SparkId) -> QueryResult<Audit> {
    debug!("get_audit {:?}", id);
    conn.query_row(
        &format!(
            "SELECT {AUDIT_COLUMNS} FROM spk_audit
             WHERE transaction_datetime = ?1 AND system = ?2 AND token = ?3"
        ),
        params![id.transaction_datetime, id.system, id.token],
        audit_from_row,
    )
    .optional()?
    .ok_or_else(|| not_found("audit", id))
}

pub fn get_falcon_message(
    conn: &Connection,
    direction: FalconDirection,
    id: &SparkId,
) -> QueryResult<FalconMessage> {
    conn.query_row(
        &format!(
            "SELECT transaction_datetime, system, token, timezone, message FROM {}
             WHERE transaction_datetime = ?1 AND system = ?2 AND token = ?3",
            direction.table()
        ),
        params![id.transaction_datetime, id.system, id.token],
        |row| {
            Ok(FalconMessage {
                transaction_datetime: row.get(0)?,
                system: row.get(1)?,
                token: row.get(2)?,
                timezone: row.get(3)?,
                message: row.get(4)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| not_found(direction.table(), id))
}

pub fn get_response(conn: &Connection, id: &SparkId) -> QueryResult<Response> {
    conn.query_row(
        "SELECT transaction_datetime, system, token, return_code, reason_code, score, score_adapt,
                score_reason1, score_reason2, score_reason3,
                score_adapt_r1, score_adapt_r2, score_adapt_r3, decline_reason,
                user_data1, user_data2, user_data3, user_data4, user_data5
         FROM spk_audit_response
         WHERE transaction_datetime = ?1 AND system = ?2 AND token = ?3",
        params![id.transaction_datetime, id.system, id.token],
        |row| {
            Ok(Response {
                transaction_datetime: row.get(0)?,
                system: row.get(1)?,
                token: row.get(2)?,
                return_code: row.get(3)?,
                reason_code: row.get(4)?,
                score: row.get(5)?,
                score_adapt: row.get(6)?,
                score_reason1: row.get(7)?,
                score_reason2: row.get(8)?,
                score_reason3: row.get(9)?,
                score_adapt_r1: row.get(10)?,
                score_adapt_r2: row.get(11)?,
                score_adapt_r3: row.get(12)?,
                decline_reason: row.get(13)?,
                user_data1: row.get(14)?,
                user_data2: row.get(15)?,
                user_data3: row.get(16)?,
                user_data4: row.get(17)?,
                user_data5: row.get(18)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| not_found("response", id))
}

pub fn get_solicitation(conn: &Connection, id: &SparkId) -> QueryResult<Solicitation> {
    conn.query_row(
        "SELECT transaction_datetime, system, token, message_length, exthdr_length, message_type,
                app_token, init_time, send_time, wait, wait_interval, response,
                source_ip, source_ip_response, source, destination
         FROM spk_audit_solicitation
         WHERE transaction_datetime = ?1 AND system = ?2 AND token = ?3",
        params![id.transaction_datetime, id.system, id.token],
        |row| {
            Ok(Solicitation {
                transaction_datetime: row.get(0)?,
                system: row.get(1)?,
                token: row.get(2)?,
                message_length: row.get(3)?,
                exthdr_length: row.get(4)?,
                message_type: row.get(5)?,
                app_token: row.get(6)?,
                init_time: row.get(7)?,
                send_time: row.get(8)?,
                wait: row.get(9)?,
                wait_interval: row.get(10)?,
                response: row.get(11)?,
                source_ip: row.get(12)?,
                source_ip_response: row.get(13)?,
                source: row.get(14)?,
                destination: row.get(15)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| not_found("solicitation", id))
}

// ============================================================================
// LISTINGS
// ============================================================================

pub fn latest_audit_time(conn: &Connection) -> QueryResult<Option<NaiveDateTime>> {
    let latest = conn.query_row("SELECT MAX(transaction_datetime) FROM spk_audit", [], |row| {
        row.get::<_, Option<NaiveDateTime>>(0)
    })?;
    Ok(latest)
}

pub fn distinct_systems(conn: &Connection) -> QueryResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT DISTINCT system FROM spk_audit ORDER BY system")?;
    let systems = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(systems)
}

pub fn distinct_statuses(conn: &Connection) -> QueryResult<Vec<i32>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT status FROM spk_audit WHERE status IS NOT NULL ORDER BY status",
    )?;
    let statuses = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i32>>>()?;
    Ok(statuses)
}

/// Distinct transaction instants, oldest first (the "tps" listing)
pub fn transaction_times(conn: &Connection) -> QueryResult<Vec<NaiveDateTime>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT transaction_datetime FROM spk_audit ORDER BY transaction_datetime",
    )?;
    let times = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<NaiveDateTime>>>()?;
    Ok(times)
}

pub fn list_status_types(conn: &Connection) -> QueryResult<Vec<StatusType>> {
    let mut stmt = conn.prepare("SELECT status, description FROM spk_status_type ORDER BY status")?;
    let status_types = stmt
        .query_map([], |row| {
            Ok(StatusType {
                status: row.get(0)?,
                description: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(status_types)
}

pub fn list_fields(conn: &Connection) -> QueryResult<Vec<Field>> {
    let mut stmt = conn.prepare(
        "SELECT message_type, flow, name, description, position, length
         FROM spk_fields
         ORDER BY position ASC",
    )?;
    let fields = stmt
        .query_map([], |row| {
            Ok(Field {
                message_type: row.get(0)?,
                flow: row.get(1)?,
                name: row.get(2)?,
                description: row.get(3)?,
                position: row.get(4)?,
                length: row.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(fields)
}
