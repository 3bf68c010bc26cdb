//! SQLite database for Webhost state persistence

use crate::alloc::{AllocationPolicy, PortRange};
use crate::store::HostingStore;
use crate::types::{Hosting, HostingStatus, NewHosting, Role, User};
use crate::{Error, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// How often `reserve` retries after losing an address/port race.

const HOSTING_COLUMNS: &str =
    "id, user_id, vm_name, ip_address, ssh_port, proxy_path, instance_ref, status, created_at, updated_at";

/// Database wrapper for state persistence
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path.as_ref())?;

        // WAL lets readers proceed while a reservation holds the write lock
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        info!("Opened database at {:?}", path.as_ref());
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                name TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'user',
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS hostings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                vm_name TEXT NOT NULL,
                ip_address TEXT NOT NULL,
                ssh_port INTEGER NOT NULL,
                proxy_path TEXT NOT NULL,
                instance_ref TEXT,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_hostings_vm_name ON hostings(vm_name);

            -- At most one live row per owner, VM name, address and port
            CREATE UNIQUE INDEX IF NOT EXISTS idx_hostings_active_user
                ON hostings(user_id) WHERE status != 'deleted';
            CREATE UNIQUE INDEX IF NOT EXISTS idx_hostings_active_vm_name
                ON hostings(vm_name) WHERE status != 'deleted';
            CREATE UNIQUE INDEX IF NOT EXISTS idx_hostings_active_ip
                ON hostings(ip_address) WHERE status != 'deleted';
            CREATE UNIQUE INDEX IF NOT EXISTS idx_hostings_active_port
                ON hostings(ssh_port) WHERE status != 'deleted';
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    // ========================================================================
    // Users
    // ========================================================================

    pub fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        name: &str,
        role: Role,
    ) -> Result<User> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();

        conn.execute(
            "INSERT INTO users (email, password_hash, name, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![email, password_hash, name, role.to_string(), now],
        )
        .map_err(|e| match unique_violation_column(&e) {
            Some(_) => Error::Conflict(format!("user {} already exists", email)),
            None => Error::Database(e),
        })?;

        debug!("Inserted user {}", email);
        Ok(User {
            id: conn.last_insert_rowid(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            name: name.to_string(),
            role,
            created_at: now,
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                "SELECT id, email, password_hash, name, role, created_at FROM users WHERE email = ?1",
                params![email],
                RawUser::from_row,
            )
            .optional()?;
        raw.map(RawUser::parse).transpose()
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, email, password_hash, name, role, created_at FROM users ORDER BY id",
        )?;
        let rows = stmt.query_map([], RawUser::from_row)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?.parse()?);
        }
        Ok(users)
    }

    pub fn update_user(&self, user: &User) -> Result<()> {
        let conn = self.conn.lock();
        let rows = conn.execute(
            "UPDATE users SET email = ?1, password_hash = ?2, name = ?3, role = ?4 WHERE id = ?5",
            params![
                user.email,
                user.password_hash,
                user.name,
                user.role.to_string(),
                user.id
            ],
        )?;
        if rows == 0 {
            return Err(Error::not_found("user", user.email.clone()));
        }
        Ok(())
    }

    pub fn delete_user(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute("DELETE FROM users WHERE id = ?1", params![id])?;
        if rows > 0 {
            debug!("Deleted user {}", id);
        }
        Ok(rows > 0)
    }

    pub fn count_users(&self) -> Result<i64> {
        let conn = self.conn.lock();
        let count = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count)
    }
}

// ============================================================================
// Hostings
// ============================================================================

impl HostingStore for Database {
    fn create(&self, record: &Hosting) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO hostings (user_id, vm_name, ip_address, ssh_port, proxy_path, instance_ref, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.user_id,
                record.vm_name,
                record.ip_address.to_string(),
                record.ssh_port,
                record.proxy_path,
                record.instance_ref,
                record.status.to_string(),
                record.created_at,
                record.updated_at,
            ],
        )
        .map_err(|e| match unique_violation_column(&e) {
            Some(column) => Error::Conflict(format!(
                "an active hosting already uses this {}",
                column
            )),
            None => Error::Database(e),
        })?;
        Ok(conn.last_insert_rowid())
    }

    fn reserve(&self, new: &NewHosting, policy: &AllocationPolicy) -> Result<Hosting> {
        let mut conn = self.conn.lock();

        // IMMEDIATE takes the write lock up front, so the used sets read below
        // cannot change before the insert commits. The unique indexes back
        // this up; a violation means another writer ignored the lock.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(existing) = query_active_by_owner(&tx, new.user_id)? {
            return Err(Error::Conflict(format!(
                "user already has an active hosting: {}",
                existing.vm_name
            )));
        }

        let used_addresses = query_used_addresses(&tx)?;
        let used_ports = query_used_ports(&tx, &policy.ports)?;
        let (address, port) = policy.allocate(&used_addresses, &used_ports)?;
        let now = chrono::Utc::now().timestamp();

        tx.execute(
            "INSERT INTO hostings (user_id, vm_name, ip_address, ssh_port, proxy_path, instance_ref, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7, ?7)",
            params![
                new.user_id,
                new.vm_name,
                address.to_string(),
                port,
                new.proxy_path,
                HostingStatus::Provisioning.to_string(),
                now,
            ],
        )
        .map_err(|e| match unique_violation_column(&e) {
            Some(column) => Error::Conflict(format!(
                "an active hosting already uses this {}",
                column
            )),
            None => Error::Database(e),
        })?;

        let id = tx.last_insert_rowid();
        tx.commit()?;
        info!(
            "Reserved {} for {} (address {}, ssh port {})",
            id, new.vm_name, address, port
        );
        Ok(Hosting {
            id,
            user_id: new.user_id,
            vm_name: new.vm_name.clone(),
            ip_address: address,
            ssh_port: port,
            proxy_path: new.proxy_path.clone(),
            instance_ref: None,
            status: HostingStatus::Provisioning,
            created_at: now,
            updated_at: now,
        })
    }

    fn complete(&self, id: i64, instance_ref: &str, address: Ipv4Addr) -> Result<Hosting> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();

        let rows = conn
            .execute(
                "UPDATE hostings SET status = ?1, instance_ref = ?2, ip_address = ?3, updated_at = ?4
                 WHERE id = ?5 AND status = ?6",
                params![
                    HostingStatus::Running.to_string(),
                    instance_ref,
                    address.to_string(),
                    now,
                    id,
                    HostingStatus::Provisioning.to_string(),
                ],
            )
            .map_err(|e| match unique_violation_column(&e) {
                Some(column) => Error::Conflict(format!(
                    "provisioned {} {} is already in use",
                    column, address
                )),
                None => Error::Database(e),
            })?;
        if rows == 0 {
            return Err(Error::not_found("hosting reservation", id.to_string()));
        }

        let hosting = query_by_id(&conn, id)?
            .ok_or_else(|| Error::not_found("hosting", id.to_string()))?;
        debug!("Hosting {} is running", hosting.vm_name);
        Ok(hosting)
    }

    fn release(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock();
        let rows = conn.execute(
            "DELETE FROM hostings WHERE id = ?1 AND status = ?2",
            params![id, HostingStatus::Provisioning.to_string()],
        )?;
        if rows > 0 {
            debug!("Released reservation {}", id);
        }
        Ok(())
    }

    fn update_status(&self, vm_name: &str, status: HostingStatus) -> Result<()> {
        let conn = self.conn.lock();
        let current = query_active_by_vm_name(&conn, vm_name)?
            .ok_or_else(|| Error::not_found("hosting", vm_name))?;
        if current.status == status {
            return Ok(());
        }
        current.status.ensure_transition(status)?;

        conn.execute(
            "UPDATE hostings SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.to_string(), chrono::Utc::now().timestamp(), current.id],
        )?;
        debug!("Hosting {} status {} -> {}", vm_name, current.status, status);
        Ok(())
    }

    fn find_by_vm_name(&self, vm_name: &str) -> Result<Option<Hosting>> {
        let conn = self.conn.lock();
        query_active_by_vm_name(&conn, vm_name)
    }

    fn find_active_by_owner(&self, user_id: i64) -> Result<Option<Hosting>> {
        let conn = self.conn.lock();
        query_active_by_owner(&conn, user_id)
    }

    fn list_by_owner(&self, user_id: i64) -> Result<Vec<Hosting>> {
        let conn = self.conn.lock();
        query_hostings(
            &conn,
            &format!(
                "SELECT {} FROM hostings WHERE user_id = ?1 ORDER BY id DESC",
                HOSTING_COLUMNS
            ),
            params![user_id],
        )
    }

    fn list_all(&self) -> Result<Vec<Hosting>> {
        let conn = self.conn.lock();
        query_hostings(
            &conn,
            &format!("SELECT {} FROM hostings ORDER BY id DESC", HOSTING_COLUMNS),
            params![],
        )
    }

    fn list_used_addresses(&self) -> Result<HashSet<Ipv4Addr>> {
        let conn = self.conn.lock();
        query_used_addresses(&conn)
    }

    fn list_used_ports(&self, range: &PortRange) -> Result<HashSet<u16>> {
        let conn = self.conn.lock();
        query_used_ports(&conn, range)
    }

    fn mark_deleted(&self, vm_name: &str) -> Result<()> {
        let conn = self.conn.lock();
        let rows = conn.execute(
            "UPDATE hostings SET status = ?1, updated_at = ?2 WHERE vm_name = ?3 AND status != ?1",
            params![
                HostingStatus::Deleted.to_string(),
                chrono::Utc::now().timestamp(),
                vm_name
            ],
        )?;
        if rows == 0 {
            return Err(Error::not_found("hosting", vm_name));
        }
        info!("Hosting {} marked deleted", vm_name);
        Ok(())
    }
}

fn query_by_id(conn: &Connection, id: i64) -> Result<Option<Hosting>> {
    query_one(
        conn,
        &format!("SELECT {} FROM hostings WHERE id = ?1", HOSTING_COLUMNS),
        params![id],
    )
}

fn query_active_by_vm_name(conn: &Connection, vm_name: &str) -> Result<Option<Hosting>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM hostings WHERE vm_name = ?1 AND status != 'deleted'",
            HOSTING_COLUMNS
        ),
        params![vm_name],
    )
}

fn query_active_by_owner(conn: &Connection, user_id: i64) -> Result<Option<Hosting>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM hostings WHERE user_id = ?1 AND status != 'deleted'",
            HOSTING_COLUMNS
        ),
        params![user_id],
    )
}

fn query_used_addresses(conn: &Connection) -> Result<HashSet<Ipv4Addr>> {
    let mut stmt = conn.prepare("SELECT ip_address FROM hostings WHERE status != 'deleted'")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

    let mut used = HashSet::new();
    for row in rows {
        used.insert(parse_address(&row?)?);
    }
    Ok(used)
}

fn query_used_ports(conn: &Connection, range: &PortRange) -> Result<HashSet<u16>> {
    let mut stmt = conn.prepare(
        "SELECT ssh_port FROM hostings WHERE status != 'deleted' AND ssh_port BETWEEN ?1 AND ?2",
    )?;
    let rows = stmt.query_map(params![range.base, range.max], |row| row.get::<_, u16>(0))?;

    let mut used = HashSet::new();
    for row in rows {
        used.insert(row?);
    }
    Ok(used)
}

fn query_one<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Option<Hosting>> {
    let raw = conn.query_row(sql, params, RawHosting::from_row).optional()?;
    raw.map(RawHosting::parse).transpose()
}

fn query_hostings<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<Hosting>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, RawHosting::from_row)?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?.parse()?);
    }
    Ok(results)
}

fn parse_address(s: &str) -> Result<Ipv4Addr> {
    s.parse()
        .map_err(|_| Error::Internal(format!("stored address is not IPv4: {}", s)))
}

/// Column named by a UNIQUE constraint failure, e.g. `ip_address` from
/// "UNIQUE constraint failed: hostings.ip_address".
fn unique_violation_column(err: &rusqlite::Error) -> Option<String> {
    match err {
        rusqlite::Error::SqliteFailure(e, Some(msg)) if e.code == ErrorCode::ConstraintViolation => msg
            .strip_prefix("UNIQUE constraint failed: ")
            .map(|cols| {
                let first = cols.split(',').next().unwrap_or(cols).trim();
                first.rsplit('.').next().unwrap_or(first).to_string()
            }),
        _ => None,
    }
}

/// Raw database row before parsing
struct RawHosting {
    id: i64,
    user_id: i64,
    vm_name: String,
    ip_address: String,
    ssh_port: u16,
    proxy_path: String,
    instance_ref: Option<String>,
    status: String,
    created_at: i64,
    updated_at: i64,
}

impl RawHosting {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            vm_name: row.get(2)?,
            ip_address: row.get(3)?,
            ssh_port: row.get(4)?,
            proxy_path: row.get(5)?,
            instance_ref: row.get(6)?,
            status: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn parse(self) -> Result<Hosting> {
        Ok(Hosting {
            id: self.id,
            user_id: self.user_id,
            vm_name: self.vm_name,
            ip_address: parse_address(&self.ip_address)?,
            ssh_port: self.ssh_port,
            proxy_path: self.proxy_path,
            instance_ref: self.instance_ref,
            status: self.status.parse()?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct RawUser {
    id: i64,
    email: String,
    password_hash: String,
    name: String,
    role: String,
    created_at: i64,
}

impl RawUser {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            email: row.get(1)?,
            password_hash: row.get(2)?,
            name: row.get(3)?,
            role: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn parse(self) -> Result<User> {
        Ok(User {
            id: self.id,
            email: self.email,
            password_hash: self.password_hash,
            name: self.name,
            role: self.role.parse()?,
            created_at: self.created_at,
        })
    }
}
