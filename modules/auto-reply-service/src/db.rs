//! SQLite database operations for the auto-reply service.
//!
//! The store owns four pipeline tables (processed messages, daily
//! analytics, delivery failures) plus the account/config/rule tables the
//! dashboard writes through the RPC surface. The pipeline itself only ever
//! reads accounts, configs and rules.

use auto_reply_types::*;
use rusqlite::{Connection, Result as SqliteResult};
use std::sync::Mutex;

pub struct Db {
    conn: Mutex<Connection>,
}

/// Joined account + config row used by the handlers. The access token and
/// LLM credentials ride along so one lookup covers the whole event.
#[derive(Debug, Clone)]
pub struct ResolvedTenant {
    pub config_id: i64,
    pub ig_account_id: String,
    pub ig_access_token: String,
    pub llm_provider: String,
    pub llm_model: String,
    pub llm_api_key: String,
    pub system_prompt: String,
    pub comment_auto_reply_enabled: bool,
}

/// Per-post gating settings resolved alongside the tenant.
#[derive(Debug, Clone)]
pub struct PostRuleSettings {
    pub keyword_triggers: Vec<String>,
    pub reply_to_all_comments: bool,
}

/// Columns for a new processed-message row. `auto_reply_sent` is implied:
/// rows are only written after a successful dispatch.
#[derive(Debug)]
pub struct NewProcessedMessage<'a> {
    pub automation_config_id: i64,
    pub ig_message_id: &'a str,
    pub message_type: &'a str,
    pub sender_id: &'a str,
    pub sender_username: Option<&'a str>,
    pub content: &'a str,
    pub post_id: Option<&'a str>,
    pub comment_id: Option<&'a str>,
    pub conversation_id: Option<&'a str>,
    pub auto_reply_content: &'a str,
    pub ai_model_used: &'a str,
    pub processing_time_ms: i64,
}

/// Result of a processed-message insert. The UNIQUE index on
/// `ig_message_id` is the authoritative dedup backstop; a constraint
/// violation means another delivery won the race.
#[derive(Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(i64),
    Duplicate,
}

/// Which counters a recorded event bumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Dm,
    Comment,
}

impl Db {
    pub fn open(path: &str) -> SqliteResult<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.create_tables()?;
        Ok(db)
    }

    fn create_tables(&self) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS instagram_accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ig_account_id TEXT NOT NULL UNIQUE,
                ig_username TEXT NOT NULL,
                ig_access_token TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS automation_configs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                instagram_account_id INTEGER NOT NULL UNIQUE,
                llm_provider TEXT NOT NULL,
                llm_model TEXT NOT NULL,
                llm_api_key TEXT NOT NULL,
                system_prompt TEXT NOT NULL DEFAULT '',
                dm_auto_reply_enabled INTEGER NOT NULL DEFAULT 0,
                comment_auto_reply_enabled INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                FOREIGN KEY (instagram_account_id) REFERENCES instagram_accounts(id) ON DELETE CASCADE
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS post_rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                automation_config_id INTEGER NOT NULL,
                instagram_post_id TEXT NOT NULL UNIQUE,
                is_enabled INTEGER NOT NULL DEFAULT 1,
                keyword_triggers TEXT NOT NULL DEFAULT '[]',
                reply_to_all_comments INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                FOREIGN KEY (automation_config_id) REFERENCES automation_configs(id) ON DELETE CASCADE
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS processed_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                automation_config_id INTEGER NOT NULL,
                ig_message_id TEXT NOT NULL UNIQUE,
                message_type TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                sender_username TEXT,
                content TEXT NOT NULL,
                post_id TEXT,
                comment_id TEXT,
                conversation_id TEXT,
                auto_reply_sent INTEGER NOT NULL DEFAULT 0,
                auto_reply_content TEXT,
                ai_model_used TEXT,
                processing_time_ms INTEGER,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                FOREIGN KEY (automation_config_id) REFERENCES automation_configs(id) ON DELETE CASCADE
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_config_time
             ON processed_messages(automation_config_id, created_at DESC)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS daily_analytics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                automation_config_id INTEGER NOT NULL,
                date TEXT NOT NULL,
                dm_received INTEGER NOT NULL DEFAULT 0,
                dm_auto_replied INTEGER NOT NULL DEFAULT 0,
                comments_received INTEGER NOT NULL DEFAULT 0,
                comments_auto_replied INTEGER NOT NULL DEFAULT 0,
                ai_api_calls INTEGER NOT NULL DEFAULT 0,
                ai_api_cost_usd REAL NOT NULL DEFAULT 0.0,
                FOREIGN KEY (automation_config_id) REFERENCES automation_configs(id) ON DELETE CASCADE,
                UNIQUE(automation_config_id, date)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS delivery_failures (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ig_event_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                stage TEXT NOT NULL,
                error TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            [],
        )?;

        Ok(())
    }

    // =====================================================
    // Account Operations
    // =====================================================

    pub fn upsert_account(
        &self,
        ig_account_id: &str,
        ig_username: &str,
        ig_access_token: &str,
    ) -> SqliteResult<LinkedAccount> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO instagram_accounts (ig_account_id, ig_username, ig_access_token, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(ig_account_id) DO UPDATE SET
                ig_username = ?2, ig_access_token = ?3, is_active = 1, updated_at = ?4",
            rusqlite::params![ig_account_id, ig_username, ig_access_token, now],
        )?;

        conn.query_row(
            "SELECT id, ig_account_id, ig_username, ig_access_token, is_active, created_at, updated_at
             FROM instagram_accounts WHERE ig_account_id = ?1",
            [ig_account_id],
            |row| row_to_account(row),
        )
    }

    pub fn list_accounts(&self) -> SqliteResult<Vec<LinkedAccount>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, ig_account_id, ig_username, ig_access_token, is_active, created_at, updated_at
             FROM instagram_accounts ORDER BY created_at ASC",
        )?;
        let entries = stmt
            .query_map([], |row| row_to_account(row))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(entries)
    }

    // =====================================================
    // Config Operations
    // =====================================================

    /// Upsert the automation config for a linked account. The UNIQUE
    /// constraint on `instagram_account_id` keeps the 1:1 invariant.
    /// Returns None when the account has not been linked.
    pub fn upsert_config(
        &self,
        req: &UpsertConfigRequest,
    ) -> SqliteResult<Option<AutomationConfig>> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();

        let account_id: Option<i64> = conn
            .query_row(
                "SELECT id FROM instagram_accounts WHERE ig_account_id = ?1",
                [req.ig_account_id.as_str()],
                |row| row.get(0),
            )
            .ok();
        let Some(account_id) = account_id else {
            return Ok(None);
        };

        conn.execute(
            "INSERT INTO automation_configs (
                instagram_account_id, llm_provider, llm_model, llm_api_key,
                system_prompt, dm_auto_reply_enabled, comment_auto_reply_enabled,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            ON CONFLICT(instagram_account_id) DO UPDATE SET
                llm_provider = ?2, llm_model = ?3, llm_api_key = ?4,
                system_prompt = ?5, dm_auto_reply_enabled = ?6,
                comment_auto_reply_enabled = ?7, updated_at = ?8",
            rusqlite::params![
                account_id,
                req.llm_provider,
                req.llm_model,
                req.llm_api_key,
                req.system_prompt,
                req.dm_auto_reply_enabled,
                req.comment_auto_reply_enabled,
                now
            ],
        )?;

        conn.query_row(
            "SELECT id, instagram_account_id, llm_provider, llm_model, llm_api_key,
                    system_prompt, dm_auto_reply_enabled, comment_auto_reply_enabled,
                    created_at, updated_at
             FROM automation_configs WHERE instagram_account_id = ?1",
            [account_id],
            |row| row_to_config(row),
        )
        .map(Some)
    }

    pub fn list_configs(&self) -> SqliteResult<Vec<AutomationConfig>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, instagram_account_id, llm_provider, llm_model, llm_api_key,
                    system_prompt, dm_auto_reply_enabled, comment_auto_reply_enabled,
                    created_at, updated_at
             FROM automation_configs ORDER BY created_at ASC",
        )?;
        let entries = stmt
            .query_map([], |row| row_to_config(row))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(entries)
    }

    /// Tenant lookup for the DM pipeline: linked active account with DM
    /// auto-reply switched on.
    pub fn resolve_dm_config(&self, ig_account_id: &str) -> SqliteResult<Option<ResolvedTenant>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT c.id, a.ig_account_id, a.ig_access_token, c.llm_provider,
                    c.llm_model, c.llm_api_key, c.system_prompt, c.comment_auto_reply_enabled
             FROM automation_configs c
             JOIN instagram_accounts a ON c.instagram_account_id = a.id
             WHERE a.ig_account_id = ?1 AND a.is_active = 1 AND c.dm_auto_reply_enabled = 1
             LIMIT 1",
        )?;
        let mut rows = stmt.query_map([ig_account_id], |row| row_to_tenant(row))?;
        Ok(rows.next().and_then(|r| r.ok()))
    }

    // =====================================================
    // Post Rule Operations
    // =====================================================

    pub fn upsert_post_rule(&self, req: &UpsertPostRuleRequest) -> SqliteResult<PostRule> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        let triggers_json =
            serde_json::to_string(&req.keyword_triggers).unwrap_or_else(|_| "[]".to_string());

        conn.execute(
            "INSERT INTO post_rules (
                automation_config_id, instagram_post_id, is_enabled,
                keyword_triggers, reply_to_all_comments, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            ON CONFLICT(instagram_post_id) DO UPDATE SET
                automation_config_id = ?1, is_enabled = ?3,
                keyword_triggers = ?4, reply_to_all_comments = ?5, updated_at = ?6",
            rusqlite::params![
                req.config_id,
                req.instagram_post_id,
                req.is_enabled,
                triggers_json,
                req.reply_to_all_comments,
                now
            ],
        )?;

        conn.query_row(
            "SELECT id, automation_config_id, instagram_post_id, is_enabled,
                    keyword_triggers, reply_to_all_comments, created_at, updated_at
             FROM post_rules WHERE instagram_post_id = ?1",
            [req.instagram_post_id.as_str()],
            |row| row_to_post_rule(row),
        )
    }

    pub fn list_post_rules(&self) -> SqliteResult<Vec<PostRule>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, automation_config_id, instagram_post_id, is_enabled,
                    keyword_triggers, reply_to_all_comments, created_at, updated_at
             FROM post_rules ORDER BY created_at ASC",
        )?;
        let entries = stmt
            .query_map([], |row| row_to_post_rule(row))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(entries)
    }

    /// Joint lookup for the comment pipeline: enabled rule for the post plus
    /// its tenant. The comment-enabled flag is returned, not filtered on, so
    /// the handler can distinguish "no rule" from "rule but replies off".
    pub fn resolve_post_rule(
        &self,
        instagram_post_id: &str,
    ) -> SqliteResult<Option<(PostRuleSettings, ResolvedTenant)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT r.keyword_triggers, r.reply_to_all_comments,
                    c.id, a.ig_account_id, a.ig_access_token, c.llm_provider,
                    c.llm_model, c.llm_api_key, c.system_prompt, c.comment_auto_reply_enabled
             FROM post_rules r
             JOIN automation_configs c ON r.automation_config_id = c.id
             JOIN instagram_accounts a ON c.instagram_account_id = a.id
             WHERE r.instagram_post_id = ?1 AND r.is_enabled = 1 AND a.is_active = 1
             LIMIT 1",
        )?;
        let mut rows = stmt.query_map([instagram_post_id], |row| {
            let triggers_json: String = row.get(0)?;
            let settings = PostRuleSettings {
                keyword_triggers: serde_json::from_str(&triggers_json).unwrap_or_default(),
                reply_to_all_comments: row.get(1)?,
            };
            let tenant = ResolvedTenant {
                config_id: row.get(2)?,
                ig_account_id: row.get(3)?,
                ig_access_token: row.get(4)?,
                llm_provider: row.get(5)?,
                llm_model: row.get(6)?,
                llm_api_key: row.get(7)?,
                system_prompt: row.get(8)?,
                comment_auto_reply_enabled: row.get(9)?,
            };
            Ok((settings, tenant))
        })?;
        Ok(rows.next().and_then(|r| r.ok()))
    }

    // =====================================================
    // Processed Message Operations
    // =====================================================

    pub fn is_event_processed(&self, ig_message_id: &str) -> SqliteResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM processed_messages WHERE ig_message_id = ?1",
            [ig_message_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn insert_processed_message(
        &self,
        msg: &NewProcessedMessage<'_>,
    ) -> SqliteResult<InsertOutcome> {
        let conn = self.conn.lock().unwrap();
        let result = conn.execute(
            "INSERT INTO processed_messages (
                automation_config_id, ig_message_id, message_type, sender_id,
                sender_username, content, post_id, comment_id, conversation_id,
                auto_reply_sent, auto_reply_content, ai_model_used, processing_time_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10, ?11, ?12)",
            rusqlite::params![
                msg.automation_config_id,
                msg.ig_message_id,
                msg.message_type,
                msg.sender_id,
                msg.sender_username,
                msg.content,
                msg.post_id,
                msg.comment_id,
                msg.conversation_id,
                msg.auto_reply_content,
                msg.ai_model_used,
                msg.processing_time_ms
            ],
        );

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted(conn.last_insert_rowid())),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Ok(InsertOutcome::Duplicate)
            }
            Err(e) => Err(e),
        }
    }

    pub fn query_messages(
        &self,
        filter: &MessageFilter,
    ) -> SqliteResult<(Vec<ProcessedMessage>, i64)> {
        let conn = self.conn.lock().unwrap();
        let mut conditions = vec!["1=1".to_string()];
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        let mut param_idx = 1u32;

        if let Some(cid) = filter.config_id {
            conditions.push(format!("m.automation_config_id = ?{}", param_idx));
            params.push(Box::new(cid));
            param_idx += 1;
        }
        if let Some(ref mt) = filter.message_type {
            conditions.push(format!("m.message_type = ?{}", param_idx));
            params.push(Box::new(mt.clone()));
            param_idx += 1;
        }
        if let Some(ref since) = filter.since {
            conditions.push(format!("m.created_at >= ?{}", param_idx));
            params.push(Box::new(since.clone()));
            param_idx += 1;
        }
        if let Some(ref until) = filter.until {
            conditions.push(format!("m.created_at <= ?{}", param_idx));
            params.push(Box::new(until.clone()));
            param_idx += 1;
        }
        let _ = param_idx;

        let where_clause = conditions.join(" AND ");
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let total: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM processed_messages m WHERE {}",
                where_clause
            ),
            param_refs.as_slice(),
            |row| row.get(0),
        )?;

        let limit = filter.limit.unwrap_or(20).min(100);
        let offset = filter.offset.unwrap_or(0);
        let sql = format!(
            "SELECT m.id, m.automation_config_id, m.ig_message_id, m.message_type,
                    m.sender_id, m.sender_username, m.content, m.post_id, m.comment_id,
                    m.conversation_id, m.auto_reply_sent, m.auto_reply_content,
                    m.ai_model_used, m.processing_time_ms, m.created_at
             FROM processed_messages m
             WHERE {}
             ORDER BY m.created_at DESC
             LIMIT {} OFFSET {}",
            where_clause, limit, offset
        );

        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(param_refs.as_slice(), |row| row_to_message(row))?
            .filter_map(|r| r.ok())
            .collect();
        Ok((entries, total))
    }

    // =====================================================
    // Analytics Operations
    // =====================================================

    /// Record one handled event in the daily rollup. A single atomic upsert:
    /// concurrent deliveries for the same tenant and day cannot lose
    /// increments, and `(automation_config_id, date)` stays unique.
    pub fn record_event(
        &self,
        config_id: i64,
        date: &str,
        kind: EventKind,
        cost_usd: f64,
    ) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        let (dm, comment) = match kind {
            EventKind::Dm => (1i64, 0i64),
            EventKind::Comment => (0i64, 1i64),
        };
        conn.execute(
            "INSERT INTO daily_analytics (
                automation_config_id, date, dm_received, dm_auto_replied,
                comments_received, comments_auto_replied, ai_api_calls, ai_api_cost_usd
            ) VALUES (?1, ?2, ?3, ?3, ?4, ?4, 1, ?5)
            ON CONFLICT(automation_config_id, date) DO UPDATE SET
                dm_received = dm_received + ?3,
                dm_auto_replied = dm_auto_replied + ?3,
                comments_received = comments_received + ?4,
                comments_auto_replied = comments_auto_replied + ?4,
                ai_api_calls = ai_api_calls + 1,
                ai_api_cost_usd = ai_api_cost_usd + ?5",
            rusqlite::params![config_id, date, dm, comment, cost_usd],
        )?;
        Ok(())
    }

    pub fn query_analytics(
        &self,
        config_id: i64,
        since: Option<&str>,
        until: Option<&str>,
    ) -> SqliteResult<Vec<DailyAnalytics>> {
        let conn = self.conn.lock().unwrap();
        let mut conditions = vec!["automation_config_id = ?1".to_string()];
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(config_id)];
        let mut param_idx = 2u32;

        if let Some(since) = since {
            conditions.push(format!("date >= ?{}", param_idx));
            params.push(Box::new(since.to_string()));
            param_idx += 1;
        }
        if let Some(until) = until {
            conditions.push(format!("date <= ?{}", param_idx));
            params.push(Box::new(until.to_string()));
            param_idx += 1;
        }
        let _ = param_idx;

        let sql = format!(
            "SELECT id, automation_config_id, date, dm_received, dm_auto_replied,
                    comments_received, comments_auto_replied, ai_api_calls, ai_api_cost_usd
             FROM daily_analytics
             WHERE {}
             ORDER BY date ASC",
            conditions.join(" AND ")
        );

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(param_refs.as_slice(), |row| row_to_analytics(row))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(entries)
    }

    // =====================================================
    // Dead-Letter Operations
    // =====================================================

    pub fn insert_delivery_failure(
        &self,
        ig_event_id: &str,
        event_type: &str,
        stage: &str,
        error: &str,
    ) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO delivery_failures (ig_event_id, event_type, stage, error)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![ig_event_id, event_type, stage, error],
        )?;
        Ok(())
    }

    pub fn list_failures(&self, limit: usize) -> SqliteResult<Vec<DeliveryFailure>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, ig_event_id, event_type, stage, error, created_at
             FROM delivery_failures ORDER BY created_at DESC LIMIT ?1",
        )?;
        let entries = stmt
            .query_map([limit.min(500) as i64], |row| row_to_failure(row))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(entries)
    }

    // =====================================================
    // Status
    // =====================================================

    pub fn status_counts(&self) -> SqliteResult<(i64, i64, i64, i64, i64)> {
        let conn = self.conn.lock().unwrap();
        let linked_accounts: i64 = conn
            .query_row("SELECT COUNT(*) FROM instagram_accounts", [], |row| {
                row.get(0)
            })
            .unwrap_or(0);
        let active_configs: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM automation_configs
                 WHERE dm_auto_reply_enabled = 1 OR comment_auto_reply_enabled = 1",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);
        let messages_processed: i64 = conn
            .query_row("SELECT COUNT(*) FROM processed_messages", [], |row| {
                row.get(0)
            })
            .unwrap_or(0);
        let replies_sent: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM processed_messages WHERE auto_reply_sent = 1",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);
        let failures: i64 = conn
            .query_row("SELECT COUNT(*) FROM delivery_failures", [], |row| {
                row.get(0)
            })
            .unwrap_or(0);
        Ok((
            linked_accounts,
            active_configs,
            messages_processed,
            replies_sent,
            failures,
        ))
    }
}

// =====================================================
// Row Mapping Functions
// =====================================================

fn row_to_tenant(row: &rusqlite::Row) -> rusqlite::Result<ResolvedTenant> {
    Ok(ResolvedTenant {
        config_id: row.get(0)?,
        ig_account_id: row.get(1)?,
        ig_access_token: row.get(2)?,
        llm_provider: row.get(3)?,
        llm_model: row.get(4)?,
        llm_api_key: row.get(5)?,
        system_prompt: row.get(6)?,
        comment_auto_reply_enabled: row.get(7)?,
    })
}

fn row_to_account(row: &rusqlite::Row) -> rusqlite::Result<LinkedAccount> {
    Ok(LinkedAccount {
        id: row.get(0)?,
        ig_account_id: row.get(1)?,
        ig_username: row.get(2)?,
        ig_access_token: row.get(3)?,
        is_active: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn row_to_config(row: &rusqlite::Row) -> rusqlite::Result<AutomationConfig> {
    Ok(AutomationConfig {
        id: row.get(0)?,
        instagram_account_id: row.get(1)?,
        llm_provider: row.get(2)?,
        llm_model: row.get(3)?,
        llm_api_key: row.get(4)?,
        system_prompt: row.get(5)?,
        dm_auto_reply_enabled: row.get(6)?,
        comment_auto_reply_enabled: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn row_to_post_rule(row: &rusqlite::Row) -> rusqlite::Result<PostRule> {
    let triggers_json: String = row.get(4)?;
    Ok(PostRule {
        id: row.get(0)?,
        automation_config_id: row.get(1)?,
        instagram_post_id: row.get(2)?,
        is_enabled: row.get(3)?,
        keyword_triggers: serde_json::from_str(&triggers_json).unwrap_or_default(),
        reply_to_all_comments: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<ProcessedMessage> {
    Ok(ProcessedMessage {
        id: row.get(0)?,
        automation_config_id: row.get(1)?,
        ig_message_id: row.get(2)?,
        message_type: row.get(3)?,
        sender_id: row.get(4)?,
        sender_username: row.get(5)?,
        content: row.get(6)?,
        post_id: row.get(7)?,
        comment_id: row.get(8)?,
        conversation_id: row.get(9)?,
        auto_reply_sent: row.get(10)?,
        auto_reply_content: row.get(11)?,
        ai_model_used: row.get(12)?,
        processing_time_ms: row.get(13)?,
        created_at: row.get(14)?,
    })
}

fn row_to_analytics(row: &rusqlite::Row) -> rusqlite::Result<DailyAnalytics> {
    Ok(DailyAnalytics {
        id: row.get(0)?,
        automation_config_id: row.get(1)?,
        date: row.get(2)?,
        dm_received: row.get(3)?,
        dm_auto_replied: row.get(4)?,
        comments_received: row.get(5)?,
        comments_auto_replied: row.get(6)?,
        ai_api_calls: row.get(7)?,
        ai_api_cost_usd: row.get(8)?,
    })
}

fn row_to_failure(row: &rusqlite::Row) -> rusqlite::Result<DeliveryFailure> {
    Ok(DeliveryFailure {
        id: row.get(0)?,
        ig_event_id: row.get(1)?,
        event_type: row.get(2)?,
        stage: row.get(3)?,
        error: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Db {
        Db::open(":memory:").expect("in-memory db")
    }

    fn seed_tenant(db: &Db) -> i64 {
        db.upsert_account("acct1", "shopowner", "token-1").unwrap();
        let config = db
            .upsert_config(&UpsertConfigRequest {
                ig_account_id: "acct1".to_string(),
                llm_provider: "gemini".to_string(),
                llm_model: "gemini-2.0-flash-exp".to_string(),
                llm_api_key: "key-1".to_string(),
                system_prompt: "Be helpful".to_string(),
                dm_auto_reply_enabled: true,
                comment_auto_reply_enabled: true,
            })
            .unwrap()
            .expect("account exists");
        config.id
    }

    #[test]
    fn config_upsert_is_one_to_one() {
        let db = test_db();
        let first = seed_tenant(&db);
        let second = db
            .upsert_config(&UpsertConfigRequest {
                ig_account_id: "acct1".to_string(),
                llm_provider: "claude".to_string(),
                llm_model: "claude-3-5-haiku-20241022".to_string(),
                llm_api_key: "key-2".to_string(),
                system_prompt: "Terse".to_string(),
                dm_auto_reply_enabled: false,
                comment_auto_reply_enabled: true,
            })
            .unwrap()
            .unwrap();
        assert_eq!(first, second.id);
        assert_eq!(db.list_configs().unwrap().len(), 1);
        assert_eq!(second.llm_provider, "claude");
    }

    #[test]
    fn upsert_config_without_account_returns_none() {
        let db = test_db();
        let result = db
            .upsert_config(&UpsertConfigRequest {
                ig_account_id: "ghost".to_string(),
                llm_provider: "gemini".to_string(),
                llm_model: "gemini-1.5-pro".to_string(),
                llm_api_key: "k".to_string(),
                system_prompt: String::new(),
                dm_auto_reply_enabled: true,
                comment_auto_reply_enabled: false,
            })
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn resolve_dm_config_respects_enabled_flag() {
        let db = test_db();
        seed_tenant(&db);
        assert!(db.resolve_dm_config("acct1").unwrap().is_some());
        assert!(db.resolve_dm_config("other").unwrap().is_none());

        db.upsert_config(&UpsertConfigRequest {
            ig_account_id: "acct1".to_string(),
            llm_provider: "gemini".to_string(),
            llm_model: "gemini-2.0-flash-exp".to_string(),
            llm_api_key: "key-1".to_string(),
            system_prompt: String::new(),
            dm_auto_reply_enabled: false,
            comment_auto_reply_enabled: true,
        })
        .unwrap();
        assert!(db.resolve_dm_config("acct1").unwrap().is_none());
    }

    #[test]
    fn resolve_post_rule_roundtrips_triggers() {
        let db = test_db();
        let config_id = seed_tenant(&db);
        db.upsert_post_rule(&UpsertPostRuleRequest {
            config_id,
            instagram_post_id: "p1".to_string(),
            is_enabled: true,
            keyword_triggers: vec!["price".to_string(), "buy".to_string()],
            reply_to_all_comments: false,
        })
        .unwrap();

        let (settings, tenant) = db.resolve_post_rule("p1").unwrap().expect("rule");
        assert_eq!(settings.keyword_triggers, vec!["price", "buy"]);
        assert!(!settings.reply_to_all_comments);
        assert!(tenant.comment_auto_reply_enabled);
        assert_eq!(tenant.ig_account_id, "acct1");

        assert!(db.resolve_post_rule("p2").unwrap().is_none());
    }

    #[test]
    fn disabled_post_rule_does_not_resolve() {
        let db = test_db();
        let config_id = seed_tenant(&db);
        db.upsert_post_rule(&UpsertPostRuleRequest {
            config_id,
            instagram_post_id: "p1".to_string(),
            is_enabled: false,
            keyword_triggers: vec![],
            reply_to_all_comments: true,
        })
        .unwrap();
        assert!(db.resolve_post_rule("p1").unwrap().is_none());
    }

    fn new_message<'a>(config_id: i64, mid: &'a str) -> NewProcessedMessage<'a> {
        NewProcessedMessage {
            automation_config_id: config_id,
            ig_message_id: mid,
            message_type: "dm",
            sender_id: "u1",
            sender_username: None,
            content: "hello",
            post_id: None,
            comment_id: None,
            conversation_id: Some("u1_acct1"),
            auto_reply_content: "hi there",
            ai_model_used: "gemini-2.0-flash-exp",
            processing_time_ms: 12,
        }
    }

    #[test]
    fn duplicate_message_insert_reports_duplicate() {
        let db = test_db();
        let config_id = seed_tenant(&db);

        let first = db.insert_processed_message(&new_message(config_id, "m1")).unwrap();
        assert!(matches!(first, InsertOutcome::Inserted(_)));
        assert!(db.is_event_processed("m1").unwrap());

        let second = db.insert_processed_message(&new_message(config_id, "m1")).unwrap();
        assert_eq!(second, InsertOutcome::Duplicate);

        let (messages, total) = db.query_messages(&MessageFilter::default()).unwrap();
        assert_eq!(total, 1);
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn record_event_seeds_then_increments_one_row() {
        let db = test_db();
        let config_id = seed_tenant(&db);

        db.record_event(config_id, "2026-08-08", EventKind::Dm, 0.002).unwrap();
        let rows = db.query_analytics(config_id, None, None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].dm_received, 1);
        assert_eq!(rows[0].dm_auto_replied, 1);
        assert_eq!(rows[0].comments_received, 0);
        assert_eq!(rows[0].ai_api_calls, 1);

        db.record_event(config_id, "2026-08-08", EventKind::Comment, 0.001).unwrap();
        let rows = db.query_analytics(config_id, None, None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].dm_received, 1);
        assert_eq!(rows[0].comments_received, 1);
        assert_eq!(rows[0].comments_auto_replied, 1);
        assert_eq!(rows[0].ai_api_calls, 2);
        assert!((rows[0].ai_api_cost_usd - 0.003).abs() < 1e-9);
    }

    #[test]
    fn record_event_separates_days() {
        let db = test_db();
        let config_id = seed_tenant(&db);
        db.record_event(config_id, "2026-08-07", EventKind::Dm, 0.0).unwrap();
        db.record_event(config_id, "2026-08-08", EventKind::Dm, 0.0).unwrap();
        let rows = db.query_analytics(config_id, None, None).unwrap();
        assert_eq!(rows.len(), 2);

        let recent = db
            .query_analytics(config_id, Some("2026-08-08"), None)
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].date, "2026-08-08");
    }

    #[test]
    fn query_messages_filters_by_type() {
        let db = test_db();
        let config_id = seed_tenant(&db);
        db.insert_processed_message(&new_message(config_id, "m1")).unwrap();
        let mut comment = new_message(config_id, "c1");
        comment.message_type = "comment";
        comment.post_id = Some("p1");
        comment.comment_id = Some("c1");
        db.insert_processed_message(&comment).unwrap();

        let filter = MessageFilter {
            message_type: Some("comment".to_string()),
            ..Default::default()
        };
        let (messages, total) = db.query_messages(&filter).unwrap();
        assert_eq!(total, 1);
        assert_eq!(messages[0].ig_message_id, "c1");
    }

    #[test]
    fn dead_letter_roundtrip() {
        let db = test_db();
        db.insert_delivery_failure("m9", "dm", "generate", "provider timeout")
            .unwrap();
        let failures = db.list_failures(10).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].stage, "generate");
    }
}
