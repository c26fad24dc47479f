use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

use crate::error::GatewayError;

/// How a service is backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    /// Content stored by the gateway, returned after settlement.
    Hosted,
    /// Forwarded to a registered upstream endpoint after settlement.
    Proxy,
    /// Listed in the catalog but served by the provider directly.
    Native,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Hosted => "hosted",
            ServiceKind::Proxy => "proxy",
            ServiceKind::Native => "native",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "hosted" => Some(ServiceKind::Hosted),
            "proxy" => Some(ServiceKind::Proxy),
            "native" => Some(ServiceKind::Native),
            _ => None,
        }
    }
}

/// Catalog record, off-chain twin of the registry entry keyed by
/// `keccak256(id)`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Price in token base units, decimal string. Always > 0.
    pub price: String,
    pub kind: ServiceKind,
    /// HOSTED only: the stored content blob (JSON text).
    pub content: Option<String>,
    /// PROXY: upstream URL. HOSTED: self-reference to /gateway/<id>.
    pub endpoint: Option<String>,
    pub provider_address: String,
    pub tags: Option<String>,
    pub active: bool,
    pub created_at: i64,
}

/// Provider mirror record. The claimable truth lives in the escrow contract;
/// these running totals exist for reporting only.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Provider {
    pub address: String,
    pub name: Option<String>,
    pub total_earned: String,
    pub total_claimed: String,
    pub created_at: i64,
}

/// Append-only settlement record.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AccessLog {
    pub id: i64,
    pub service_id: Option<String>,
    pub caller_address: String,
    pub amount: String,
    pub provider_revenue: String,
    pub tx_hash: String,
    pub created_at: i64,
}

fn row_to_service(row: &rusqlite::Row<'_>) -> rusqlite::Result<Service> {
    let kind_raw: String = row.get(4)?;
    Ok(Service {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        price: row.get(3)?,
        kind: ServiceKind::parse(&kind_raw).unwrap_or(ServiceKind::Native),
        content: row.get(5)?,
        endpoint: row.get(6)?,
        provider_address: row.get(7)?,
        tags: row.get(8)?,
        active: row.get::<_, i32>(9)? == 1,
        created_at: row.get(10)?,
    })
}

const SERVICE_COLUMNS: &str =
    "id, name, description, price, kind, content, endpoint, provider_address, tags, active, created_at";

/// Sum two decimal base-unit strings in u128.
fn add_amounts(a: &str, b: &str) -> String {
    let a: u128 = a.parse().unwrap_or(0);
    let b: u128 = b.parse().unwrap_or(0);
    a.saturating_add(b).to_string()
}

/// SQLite ledger mirror.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(path: &str) -> Result<Self, GatewayError> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, GatewayError> {
        self.conn
            .lock()
            .map_err(|_| GatewayError::Internal("database lock poisoned".to_string()))
    }

    fn init_schema(&self) -> Result<(), GatewayError> {
        let conn = self.lock()?;

        // WAL for concurrent readers against the single writer
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS providers (
                address TEXT PRIMARY KEY,
                name TEXT,
                total_earned TEXT NOT NULL DEFAULT '0',
                total_claimed TEXT NOT NULL DEFAULT '0',
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS services (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                price TEXT NOT NULL,
                kind TEXT NOT NULL,
                content TEXT,
                endpoint TEXT,
                provider_address TEXT NOT NULL,
                tags TEXT,
                active INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_services_provider ON services(provider_address);

            CREATE TABLE IF NOT EXISTS access_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                service_id TEXT,
                caller_address TEXT NOT NULL,
                amount TEXT NOT NULL,
                provider_revenue TEXT NOT NULL,
                tx_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_access_logs_service ON access_logs(service_id);
            CREATE INDEX IF NOT EXISTS idx_access_logs_tx ON access_logs(tx_hash);

            CREATE TABLE IF NOT EXISTS claims (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                provider_address TEXT NOT NULL,
                amount TEXT NOT NULL,
                tx_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            "#,
        )?;

        Ok(())
    }

    // -- services --

    pub fn create_service(&self, svc: &Service) -> Result<(), GatewayError> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO services (id, name, description, price, kind, content, endpoint, provider_address, tags, active, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                svc.id,
                svc.name,
                svc.description,
                svc.price,
                svc.kind.as_str(),
                svc.content,
                svc.endpoint,
                svc.provider_address,
                svc.tags,
                svc.active as i32,
                svc.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_service(&self, id: &str) -> Result<Option<Service>, GatewayError> {
        let conn = self.lock()?;
        let svc = conn
            .query_row(
                &format!("SELECT {SERVICE_COLUMNS} FROM services WHERE id = ?1"),
                params![id],
                row_to_service,
            )
            .optional()?;
        Ok(svc)
    }

    /// List active services, optionally filtered by a substring search over
    /// name/description and by tag.
    pub fn list_services(
        &self,
        search: Option<&str>,
        tag: Option<&str>,
    ) -> Result<Vec<Service>, GatewayError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {SERVICE_COLUMNS} FROM services
            WHERE active = 1
              AND (?1 IS NULL OR name LIKE '%' || ?1 || '%' OR description LIKE '%' || ?1 || '%')
              AND (?2 IS NULL OR ',' || COALESCE(tags, '') || ',' LIKE '%,' || ?2 || ',%')
            ORDER BY created_at DESC
            "#
        ))?;
        let services = stmt
            .query_map(params![search, tag], row_to_service)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(services)
    }

    pub fn update_service(
        &self,
        id: &str,
        price: Option<&str>,
        description: Option<&str>,
        active: Option<bool>,
    ) -> Result<Service, GatewayError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            r#"
            UPDATE services SET
                price = COALESCE(?2, price),
                description = COALESCE(?3, description),
                active = COALESCE(?4, active)
            WHERE id = ?1
            "#,
            params![id, price, description, active.map(|a| a as i32)],
        )?;
        if rows == 0 {
            return Err(GatewayError::ServiceNotFound(id.to_string()));
        }
        let svc = conn
            .query_row(
                &format!("SELECT {SERVICE_COLUMNS} FROM services WHERE id = ?1"),
                params![id],
                row_to_service,
            )
            .optional()?
            .ok_or_else(|| GatewayError::ServiceNotFound(id.to_string()))?;
        Ok(svc)
    }

    /// Hard-delete a service row. Used to roll back a DB-first creation whose
    /// on-chain registration failed.
    pub fn delete_service_row(&self, id: &str) -> Result<(), GatewayError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM services WHERE id = ?1", params![id])?;
        Ok(())
    }

    // -- providers --

    pub fn ensure_provider(&self, address: &str, name: Option<&str>) -> Result<(), GatewayError> {
        let conn = self.lock()?;
        let now = chrono::Utc::now().timestamp();
        conn.execute(
            r#"
            INSERT INTO providers (address, name, total_earned, total_claimed, created_at)
            VALUES (?1, ?2, '0', '0', ?3)
            ON CONFLICT(address) DO UPDATE SET name = COALESCE(?2, name)
            "#,
            params![address, name, now],
        )?;
        Ok(())
    }

    pub fn get_provider(&self, address: &str) -> Result<Option<Provider>, GatewayError> {
        let conn = self.lock()?;
        let provider = conn
            .query_row(
                "SELECT address, name, total_earned, total_claimed, created_at FROM providers WHERE address = ?1",
                params![address],
                |row| {
                    Ok(Provider {
                        address: row.get(0)?,
                        name: row.get(1)?,
                        total_earned: row.get(2)?,
                        total_claimed: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(provider)
    }

    // -- settlement ledger --

    /// Record a settled payment: one append-only access log row plus the
    /// provider's earned-total bump. Called iff settlement succeeded.
    pub fn record_settlement(
        &self,
        service_id: Option<&str>,
        caller_address: &str,
        provider_address: &str,
        amount: &str,
        provider_revenue: &str,
        tx_hash: &str,
    ) -> Result<(), GatewayError> {
        let mut conn = self.lock()?;
        let now = chrono::Utc::now().timestamp();

        let tx = conn.transaction()?;
        tx.execute(
            r#"
            INSERT INTO access_logs (service_id, caller_address, amount, provider_revenue, tx_hash, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![service_id, caller_address, amount, provider_revenue, tx_hash, now],
        )?;
        // Totals are 1e18-scale, beyond SQLite's INTEGER. Add in u128.
        let current: String = tx
            .query_row(
                "SELECT total_earned FROM providers WHERE address = ?1",
                params![provider_address],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or_else(|| "0".to_string());
        let updated = add_amounts(&current, provider_revenue);
        tx.execute(
            r#"
            INSERT INTO providers (address, total_earned, total_claimed, created_at)
            VALUES (?1, ?2, '0', ?3)
            ON CONFLICT(address) DO UPDATE SET total_earned = ?2
            "#,
            params![provider_address, updated, now],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Record a completed withdrawal and bump the claimed total.
    pub fn record_claim(
        &self,
        provider_address: &str,
        amount: &str,
        tx_hash: &str,
    ) -> Result<(), GatewayError> {
        let mut conn = self.lock()?;
        let now = chrono::Utc::now().timestamp();

        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO claims (provider_address, amount, tx_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![provider_address, amount, tx_hash, now],
        )?;
        let current: String = tx
            .query_row(
                "SELECT total_claimed FROM providers WHERE address = ?1",
                params![provider_address],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or_else(|| "0".to_string());
        let updated = add_amounts(&current, amount);
        tx.execute(
            r#"
            INSERT INTO providers (address, total_earned, total_claimed, created_at)
            VALUES (?1, '0', ?2, ?3)
            ON CONFLICT(address) DO UPDATE SET total_claimed = ?2
            "#,
            params![provider_address, updated, now],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn access_log_by_tx(&self, tx_hash: &str) -> Result<Option<AccessLog>, GatewayError> {
        let conn = self.lock()?;
        let log = conn
            .query_row(
                r#"
                SELECT id, service_id, caller_address, amount, provider_revenue, tx_hash, created_at
                FROM access_logs WHERE tx_hash = ?1
                "#,
                params![tx_hash],
                |row| {
                    Ok(AccessLog {
                        id: row.get(0)?,
                        service_id: row.get(1)?,
                        caller_address: row.get(2)?,
                        amount: row.get(3)?,
                        provider_revenue: row.get(4)?,
                        tx_hash: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(log)
    }

    pub fn recent_access_logs(
        &self,
        service_id: &str,
        limit: u32,
    ) -> Result<Vec<AccessLog>, GatewayError> {
        let limit = limit.clamp(1, 500);
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, service_id, caller_address, amount, provider_revenue, tx_hash, created_at
            FROM access_logs
            WHERE service_id = ?1
            ORDER BY id DESC
            LIMIT ?2
            "#,
        )?;
        let logs = stmt
            .query_map(params![service_id, limit], |row| {
                Ok(AccessLog {
                    id: row.get(0)?,
                    service_id: row.get(1)?,
                    caller_address: row.get(2)?,
                    amount: row.get(3)?,
                    provider_revenue: row.get(4)?,
                    tx_hash: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_service(id: &str, kind: ServiceKind) -> Service {
        Service {
            id: id.to_string(),
            name: format!("Service {id}"),
            description: "test".to_string(),
            price: "1000000000000000000".to_string(),
            kind,
            content: match kind {
                ServiceKind::Hosted => Some(r#"{"x":42}"#.to_string()),
                _ => None,
            },
            endpoint: match kind {
                ServiceKind::Proxy => Some("https://upstream.example.com/foo".to_string()),
                ServiceKind::Hosted => Some(format!("http://localhost:4021/gateway/{id}")),
                ServiceKind::Native => None,
            },
            provider_address: "0x1111111111111111111111111111111111111111".to_string(),
            tags: Some("data,test".to_string()),
            active: true,
            created_at: 1_700_000_000,
        }
    }

    #[test]
    fn create_and_get_service() {
        let db = Database::new(":memory:").unwrap();
        db.create_service(&sample_service("svc-1", ServiceKind::Hosted))
            .unwrap();

        let fetched = db.get_service("svc-1").unwrap().unwrap();
        assert_eq!(fetched.kind, ServiceKind::Hosted);
        assert_eq!(fetched.price, "1000000000000000000");
        assert!(fetched.content.is_some());
    }

    #[test]
    fn duplicate_service_id_conflicts() {
        let db = Database::new(":memory:").unwrap();
        db.create_service(&sample_service("svc-1", ServiceKind::Hosted))
            .unwrap();
        let err = db
            .create_service(&sample_service("svc-1", ServiceKind::Proxy))
            .unwrap_err();
        assert!(matches!(err, GatewayError::ServiceExists(_)));
    }

    #[test]
    fn list_filters_by_search_and_tag() {
        let db = Database::new(":memory:").unwrap();
        let mut weather = sample_service("weather-api", ServiceKind::Proxy);
        weather.name = "Weather Data".to_string();
        weather.tags = Some("weather,data".to_string());
        db.create_service(&weather).unwrap();
        db.create_service(&sample_service("gold-price", ServiceKind::Hosted))
            .unwrap();

        assert_eq!(db.list_services(None, None).unwrap().len(), 2);
        assert_eq!(db.list_services(Some("Weather"), None).unwrap().len(), 1);
        assert_eq!(db.list_services(None, Some("weather")).unwrap().len(), 1);
        assert_eq!(db.list_services(Some("nothing"), None).unwrap().len(), 0);
    }

    #[test]
    fn inactive_services_hidden_from_listing() {
        let db = Database::new(":memory:").unwrap();
        db.create_service(&sample_service("svc-1", ServiceKind::Hosted))
            .unwrap();
        db.update_service("svc-1", None, None, Some(false)).unwrap();

        assert!(db.list_services(None, None).unwrap().is_empty());
        // Still fetchable directly, flagged inactive.
        assert!(!db.get_service("svc-1").unwrap().unwrap().active);
    }

    #[test]
    fn delete_rolls_back_creation() {
        let db = Database::new(":memory:").unwrap();
        db.create_service(&sample_service("svc-1", ServiceKind::Hosted))
            .unwrap();
        db.delete_service_row("svc-1").unwrap();
        assert!(db.get_service("svc-1").unwrap().is_none());
    }

    #[test]
    fn settlement_appends_log_and_bumps_earned() {
        let db = Database::new(":memory:").unwrap();
        let provider = "0x1111111111111111111111111111111111111111";

        db.record_settlement(
            Some("svc-1"),
            "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
            provider,
            "1000000000000000000",
            "950000000000000000",
            "0xdeadbeef",
        )
        .unwrap();

        let log = db.access_log_by_tx("0xdeadbeef").unwrap().unwrap();
        assert_eq!(log.provider_revenue, "950000000000000000");
        assert_eq!(log.service_id.as_deref(), Some("svc-1"));

        let p = db.get_provider(provider).unwrap().unwrap();
        assert_eq!(p.total_earned, "950000000000000000");
        assert_eq!(p.total_claimed, "0");
    }

    #[test]
    fn claim_bumps_claimed_total() {
        let db = Database::new(":memory:").unwrap();
        let provider = "0x1111111111111111111111111111111111111111";

        db.record_settlement(Some("svc-1"), "0xaaa", provider, "100", "95", "0x01")
            .unwrap();
        db.record_claim(provider, "95", "0x02").unwrap();

        let p = db.get_provider(provider).unwrap().unwrap();
        assert_eq!(p.total_earned, "95");
        assert_eq!(p.total_claimed, "95");
    }

    #[test]
    fn recent_logs_are_newest_first() {
        let db = Database::new(":memory:").unwrap();
        let provider = "0x1111111111111111111111111111111111111111";
        db.record_settlement(Some("svc-1"), "0xaaa", provider, "1", "1", "0x01")
            .unwrap();
        db.record_settlement(Some("svc-1"), "0xaaa", provider, "2", "2", "0x02")
            .unwrap();

        let logs = db.recent_access_logs("svc-1", 10).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].tx_hash, "0x02");
    }
}
