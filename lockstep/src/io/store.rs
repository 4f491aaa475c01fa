//! Embedded SQLite store shared by the CLI and the service.
//!
//! The CLI keeps a local copy of the challenges it works on (tests arrive
//! batch by batch with expected output withheld) plus its login tokens; the
//! service holds the authoritative copy. Both use the same schema.
//!
//! Line lists are stored newline-joined. `olines` NULL means the expected
//! output is not known to this store.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::core::types::{AttemptState, Challenge, TestDescription, TestId, ValidationRule};

pub const DEFAULT_DB_FILE: &str = ".lockstep.sdb";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sql(#[from] rusqlite::Error),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} already exists")]
    Duplicate(String),
    #[error("{0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Store path: `LOCKSTEP_DB` if set, else `~/.lockstep.sdb`.
pub fn default_db_path() -> PathBuf {
    if let Some(path) = std::env::var_os("LOCKSTEP_DB").filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(DEFAULT_DB_FILE)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRow {
    pub id: i64,
    pub code: String,
    pub uid: Option<i64>,
    pub chid: i64,
    pub state: AttemptState,
    pub focus: Option<TestId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeSummary {
    pub name: String,
    pub title: String,
}

/// The logged-in user for one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Whoami {
    pub uid: i64,
    pub username: String,
    pub jwt: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptStatus {
    pub server: String,
    pub challenge: String,
    pub state: AttemptState,
    pub focus: Option<String>,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty())
            && !parent.exists()
        {
            return Err(StoreError::NotFound(format!(
                "store directory {}",
                parent.display()
            )));
        }
        let fresh = !path.exists();
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        if fresh {
            info!(path = %path.display(), "creating store");
        }
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS servers (
                id INTEGER PRIMARY KEY,
                url TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                sid INTEGER NOT NULL REFERENCES servers(id),
                authid TEXT NOT NULL,
                username TEXT NOT NULL,
                UNIQUE (sid, authid)
            );

            CREATE TABLE IF NOT EXISTS tokens (
                id INTEGER PRIMARY KEY,
                uid INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                jwt TEXT NOT NULL UNIQUE,
                ts TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS challenges (
                id INTEGER PRIMARY KEY,
                sid INTEGER NOT NULL REFERENCES servers(id),
                name TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                UNIQUE (sid, name)
            );

            CREATE TABLE IF NOT EXISTS tests (
                id INTEGER PRIMARY KEY,
                chid INTEGER NOT NULL REFERENCES challenges(id) ON DELETE CASCADE,
                grp INTEGER NOT NULL DEFAULT 0,
                ord INTEGER NOT NULL DEFAULT 0,
                name TEXT NOT NULL,
                head TEXT NOT NULL DEFAULT '',
                body TEXT NOT NULL DEFAULT '',
                ilines TEXT NOT NULL DEFAULT '',
                olines TEXT,
                UNIQUE (chid, name)
            );

            CREATE TABLE IF NOT EXISTS attempts (
                id INTEGER PRIMARY KEY,
                code TEXT NOT NULL UNIQUE,
                uid INTEGER REFERENCES users(id),
                chid INTEGER NOT NULL REFERENCES challenges(id) ON DELETE CASCADE,
                state TEXT NOT NULL DEFAULT 'start',
                focus INTEGER REFERENCES tests(id) ON DELETE SET NULL
            );

            CREATE TABLE IF NOT EXISTS progress (
                id INTEGER PRIMARY KEY,
                aid INTEGER NOT NULL REFERENCES attempts(id) ON DELETE CASCADE,
                tid INTEGER NOT NULL REFERENCES tests(id) ON DELETE CASCADE,
                ts TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (aid, tid)
            );

            CREATE INDEX IF NOT EXISTS idx_tests_chid_grp ON tests(chid, grp);
            CREATE INDEX IF NOT EXISTS idx_progress_aid ON progress(aid);
            "#,
        )?;
        Ok(())
    }

    // -- servers and users ------------------------------------------------

    pub fn server_id(&self, url: &str) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row("SELECT id FROM servers WHERE url = ?1", [url], |r| r.get(0))
            .optional()?)
    }

    pub fn ensure_server(&self, url: &str) -> Result<i64> {
        self.conn
            .execute("INSERT OR IGNORE INTO servers (url) VALUES (?1)", [url])?;
        self.server_id(url)?
            .ok_or_else(|| StoreError::NotFound(format!("server {url:?}")))
    }

    /// Find or register the user a login belongs to.
    pub fn user_from_tokendata(&self, sid: i64, authid: &str, username: &str) -> Result<i64> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM users WHERE sid = ?1 AND authid = ?2",
                params![sid, authid],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(uid) = existing {
            return Ok(uid);
        }
        self.conn.execute(
            "INSERT INTO users (sid, authid, username) VALUES (?1, ?2, ?3)",
            params![sid, authid, username],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_token(&self, uid: i64, jwt: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO tokens (uid, jwt) VALUES (?1, ?2)",
            params![uid, jwt],
        )?;
        Ok(())
    }

    pub fn delete_token(&self, jwt: &str) -> Result<bool> {
        Ok(self.conn.execute("DELETE FROM tokens WHERE jwt = ?1", [jwt])? > 0)
    }

    pub fn uid_for_token(&self, jwt: &str) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row("SELECT uid FROM tokens WHERE jwt = ?1", [jwt], |r| r.get(0))
            .optional()?)
    }

    /// The user logged in to `server_url`, if any.
    ///
    /// More than one token means this is a service store, not a client one.
    pub fn whoami(&self, server_url: &str) -> Result<Option<Whoami>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT u.id, u.username, t.jwt
               FROM tokens t
               JOIN users u ON t.uid = u.id
               JOIN servers s ON u.sid = s.id
               WHERE s.url = ?1"#,
        )?;
        let rows = stmt
            .query_map([server_url], |r| {
                Ok(Whoami {
                    uid: r.get(0)?,
                    username: r.get(1)?,
                    jwt: r.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        if rows.len() > 1 {
            return Err(StoreError::Corrupt(
                "multiple tokens found; this looks like a server store".to_string(),
            ));
        }
        Ok(rows.into_iter().next())
    }

    // -- challenges -------------------------------------------------------

    pub fn challenges(&self) -> Result<Vec<ChallengeSummary>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, title FROM challenges ORDER BY name")?;
        let rows = stmt
            .query_map([], |r| {
                Ok(ChallengeSummary {
                    name: r.get(0)?,
                    title: r.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn challenge_id(&self, name: &str) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row("SELECT id FROM challenges WHERE name = ?1", [name], |r| {
                r.get(0)
            })
            .optional()?)
    }

    /// Import a parsed challenge and all of its tests in one transaction.
    pub fn import_challenge(&self, sid: i64, challenge: &Challenge) -> Result<i64> {
        let exists: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM challenges WHERE sid = ?1 AND name = ?2",
                params![sid, challenge.name],
                |r| r.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(StoreError::Duplicate(format!(
                "challenge {:?}",
                challenge.name
            )));
        }

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO challenges (sid, name, title) VALUES (?1, ?2, ?3)",
            params![sid, challenge.name, challenge.title],
        )?;
        let chid = tx.last_insert_rowid();
        for test in &challenge.tests {
            insert_test(&tx, chid, test, false)?;
        }
        tx.commit()?;
        debug!(chid, tests = challenge.tests.len(), name = %challenge.name, "imported challenge");
        Ok(chid)
    }

    /// Register a challenge known only by name (client side, before any tests).
    pub fn ensure_challenge(&self, sid: i64, name: &str, title: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT OR IGNORE INTO challenges (sid, name, title) VALUES (?1, ?2, ?3)",
            params![sid, name, title],
        )?;
        self.conn
            .query_row(
                "SELECT id FROM challenges WHERE sid = ?1 AND name = ?2",
                params![sid, name],
                |r| r.get(0),
            )
            .map_err(StoreError::from)
    }

    /// Delete a challenge with its tests, attempts and progress.
    pub fn delete_challenge(&self, name: &str) -> Result<bool> {
        let n = self
            .conn
            .execute("DELETE FROM challenges WHERE name = ?1", [name])?;
        Ok(n > 0)
    }

    /// Add tests fetched from a server. Already-known tests are left alone.
    pub fn insert_tests(&self, chid: i64, tests: &[TestDescription]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for test in tests {
            insert_test(&tx, chid, test, true)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn fetch_challenge(&self, chid: i64) -> Result<Challenge> {
        let mut challenge = self
            .conn
            .query_row(
                r#"SELECT c.id, s.url, c.name, c.title
                   FROM challenges c JOIN servers s ON c.sid = s.id
                   WHERE c.id = ?1"#,
                [chid],
                |r| {
                    Ok(Challenge {
                        id: r.get(0)?,
                        server: r.get(1)?,
                        name: r.get(2)?,
                        title: r.get(3)?,
                        tests: Vec::new(),
                    })
                },
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("challenge {chid}")))?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TEST_COLUMNS} FROM tests WHERE chid = ?1 ORDER BY grp, ord, id"
        ))?;
        challenge.tests = stmt
            .query_map([chid], test_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(challenge)
    }

    pub fn challenge_from_attempt(&self, code: &str) -> Result<Challenge> {
        let attempt = self.require_attempt(code)?;
        self.fetch_challenge(attempt.chid)
    }

    // -- attempts ---------------------------------------------------------

    pub fn create_attempt(&self, code: &str, uid: Option<i64>, chid: i64) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO attempts (code, uid, chid) VALUES (?1, ?2, ?3)",
            params![code, uid, chid],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn attempt(&self, code: &str) -> Result<Option<AttemptRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, code, uid, chid, state, focus FROM attempts WHERE code = ?1",
                [code],
                |r| {
                    Ok((
                        r.get::<_, i64>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, Option<i64>>(2)?,
                        r.get::<_, i64>(3)?,
                        r.get::<_, String>(4)?,
                        r.get::<_, Option<i64>>(5)?,
                    ))
                },
            )
            .optional()?;
        let Some((id, code, uid, chid, state, focus)) = row else {
            return Ok(None);
        };
        let state = state
            .parse::<AttemptState>()
            .map_err(StoreError::Corrupt)?;
        Ok(Some(AttemptRow {
            id,
            code,
            uid,
            chid,
            state,
            focus,
        }))
    }

    pub fn require_attempt(&self, code: &str) -> Result<AttemptRow> {
        self.attempt(code)?
            .ok_or_else(|| StoreError::NotFound(format!("attempt {code:?}")))
    }

    pub fn set_attempt_state(
        &self,
        aid: i64,
        state: AttemptState,
        focus: Option<TestId>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE attempts SET state = ?1, focus = ?2 WHERE id = ?3",
            params![state.as_str(), focus, aid],
        )?;
        Ok(())
    }

    pub fn status(&self, code: &str) -> Result<AttemptStatus> {
        let row = self
            .conn
            .query_row(
                r#"SELECT s.url, c.name, a.state, t.name
                   FROM attempts a
                   JOIN challenges c ON a.chid = c.id
                   JOIN servers s ON c.sid = s.id
                   LEFT JOIN tests t ON a.focus = t.id
                   WHERE a.code = ?1"#,
                [code],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("attempt {code:?}")))?;
        Ok(AttemptStatus {
            server: row.0,
            challenge: row.1,
            state: row.2.parse().map_err(StoreError::Corrupt)?,
            focus: row.3,
        })
    }

    /// The lowest-numbered group with no progress for the attempt.
    pub fn next_batch(&self, aid: i64) -> Result<Vec<TestDescription>> {
        let sql = format!(
            r#"SELECT {TEST_COLUMNS} FROM tests
               WHERE chid = (SELECT chid FROM attempts WHERE id = ?1)
                 AND grp = (
                   SELECT t.grp FROM tests t
                   JOIN attempts a ON a.chid = t.chid
                   LEFT JOIN progress p ON p.aid = a.id AND p.tid = t.id
                   WHERE a.id = ?1
                   GROUP BY t.grp
                   HAVING COUNT(p.id) = 0
                   ORDER BY t.grp
                   LIMIT 1)
               ORDER BY ord, id"#
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([aid], test_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn attempt_test(&self, aid: i64, name: &str) -> Result<Option<TestDescription>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    r#"SELECT {TEST_COLUMNS} FROM tests
                       WHERE chid = (SELECT chid FROM attempts WHERE id = ?1)
                         AND name = ?2"#
                ),
                params![aid, name],
                test_from_row,
            )
            .optional()?)
    }

    pub fn test_name(&self, tid: TestId) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT name FROM tests WHERE id = ?1", [tid], |r| r.get(0))
            .optional()?)
    }

    // -- progress ---------------------------------------------------------

    pub fn save_progress(&self, aid: i64, tid: TestId) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO progress (aid, tid) VALUES (?1, ?2)",
            params![aid, tid],
        )?;
        Ok(())
    }

    pub fn has_progress(&self, aid: i64, tid: TestId) -> Result<bool> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM progress WHERE aid = ?1 AND tid = ?2",
            params![aid, tid],
            |r| r.get(0),
        )?;
        Ok(n > 0)
    }

    /// Persist a rule a judge revealed, so later runs can judge locally.
    pub fn save_rule(&self, tid: TestId, rule: &ValidationRule) -> Result<()> {
        match rule {
            ValidationRule::LineMatch(lines) => {
                self.conn.execute(
                    "UPDATE tests SET olines = ?1 WHERE id = ?2",
                    params![lines.join("\n"), tid],
                )?;
            }
        }
        Ok(())
    }
}

const TEST_COLUMNS: &str = "id, chid, grp, ord, name, head, body, ilines, olines";

fn insert_test(
    conn: &Connection,
    chid: i64,
    test: &TestDescription,
    ignore_existing: bool,
) -> rusqlite::Result<()> {
    let verb = if ignore_existing {
        "INSERT OR IGNORE"
    } else {
        "INSERT"
    };
    conn.execute(
        &format!(
            "{verb} INTO tests (chid, grp, ord, name, head, body, ilines, olines)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
        ),
        params![
            chid,
            test.grp,
            test.ord,
            test.name,
            test.head,
            test.body,
            test.ilines.join("\n"),
            test.olines.as_ref().map(|lines| lines.join("\n")),
        ],
    )?;
    Ok(())
}

fn split_lines(joined: &str) -> Vec<String> {
    if joined.is_empty() {
        Vec::new()
    } else {
        joined.split('\n').map(str::to_string).collect()
    }
}

fn test_from_row(r: &Row<'_>) -> rusqlite::Result<TestDescription> {
    let ilines: String = r.get(7)?;
    let olines: Option<String> = r.get(8)?;
    Ok(TestDescription {
        id: r.get(0)?,
        chid: r.get(1)?,
        grp: r.get(2)?,
        ord: r.get(3)?,
        name: r.get(4)?,
        head: r.get(5)?,
        body: r.get(6)?,
        ilines: split_lines(&ilines),
        olines: olines.as_deref().map(split_lines),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{challenge, test_case};

    fn seeded() -> (Store, i64, i64) {
        let store = Store::open_in_memory().expect("open");
        let sid = store.ensure_server("http://local/").expect("server");
        let ch = challenge(
            "demo",
            vec![
                test_case("a", 0, &["x"], Some(&["1"])),
                test_case("b", 1, &["y"], Some(&["2"])),
                test_case("c", 1, &[], None),
            ],
        );
        let chid = store.import_challenge(sid, &ch).expect("import");
        let aid = store.create_attempt("code1", None, chid).expect("attempt");
        (store, chid, aid)
    }

    #[test]
    fn import_preserves_lines_and_null_olines() {
        let (store, chid, _) = seeded();
        let ch = store.fetch_challenge(chid).expect("fetch");
        assert_eq!(ch.server, "http://local/");
        let names: Vec<_> = ch.tests.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(ch.tests[0].olines, Some(vec!["1".to_string()]));
        assert_eq!(ch.tests[2].ilines, Vec::<String>::new());
        assert_eq!(ch.tests[2].olines, None);
    }

    #[test]
    fn duplicate_import_is_rejected() {
        let (store, _, _) = seeded();
        let sid = store.ensure_server("http://local/").expect("server");
        let err = store
            .import_challenge(sid, &challenge("demo", Vec::new()))
            .expect_err("duplicate");
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[test]
    fn next_batch_is_lowest_group_without_progress() {
        let (store, _, aid) = seeded();
        let first = store.next_batch(aid).expect("batch");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].name, "a");

        store.save_progress(aid, first[0].id).expect("progress");
        let second = store.next_batch(aid).expect("batch");
        let names: Vec<_> = second.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);

        store.save_progress(aid, second[0].id).expect("progress");
        assert!(store.next_batch(aid).expect("batch").is_empty());
    }

    #[test]
    fn progress_is_idempotent_and_queryable() {
        let (store, _, aid) = seeded();
        let t = store.attempt_test(aid, "a").expect("query").expect("test");
        assert!(!store.has_progress(aid, t.id).expect("has"));
        store.save_progress(aid, t.id).expect("save");
        store.save_progress(aid, t.id).expect("save twice");
        assert!(store.has_progress(aid, t.id).expect("has"));
    }

    #[test]
    fn save_rule_reveals_expected_output() {
        let (store, _, aid) = seeded();
        let t = store.attempt_test(aid, "c").expect("query").expect("test");
        store
            .save_rule(t.id, &ValidationRule::LineMatch(vec!["ok".to_string()]))
            .expect("save");
        let t = store.attempt_test(aid, "c").expect("query").expect("test");
        assert_eq!(t.olines, Some(vec!["ok".to_string()]));
    }

    #[test]
    fn attempt_state_round_trips_with_focus_name() {
        let (store, _, aid) = seeded();
        let t = store.attempt_test(aid, "b").expect("query").expect("test");
        store
            .set_attempt_state(aid, AttemptState::Fix, Some(t.id))
            .expect("set");
        let row = store.require_attempt("code1").expect("attempt");
        assert_eq!(row.state, AttemptState::Fix);
        assert_eq!(row.focus, Some(t.id));
        let status = store.status("code1").expect("status");
        assert_eq!(status.challenge, "demo");
        assert_eq!(status.focus.as_deref(), Some("b"));
    }

    #[test]
    fn delete_challenge_cascades_to_attempts() {
        let (store, _, _) = seeded();
        assert!(store.delete_challenge("demo").expect("delete"));
        assert!(store.attempt("code1").expect("query").is_none());
        assert!(!store.delete_challenge("demo").expect("delete again"));
    }

    #[test]
    fn whoami_finds_single_token_per_server() {
        let store = Store::open_in_memory().expect("open");
        let sid = store.ensure_server("http://s/").expect("server");
        assert!(store.whoami("http://s/").expect("whoami").is_none());
        let uid = store.user_from_tokendata(sid, "auth1", "ann").expect("user");
        assert_eq!(
            store.user_from_tokendata(sid, "auth1", "ann").expect("user"),
            uid
        );
        store.insert_token(uid, "tok").expect("token");
        let who = store.whoami("http://s/").expect("whoami").expect("some");
        assert_eq!(who.username, "ann");
        assert_eq!(store.uid_for_token("tok").expect("lookup"), Some(uid));

        store.insert_token(uid, "tok2").expect("token");
        assert!(matches!(
            store.whoami("http://s/"),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn open_creates_schema_on_disk() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("db.sdb");
        Store::open(&path).expect("create");
        let store = Store::open(&path).expect("reopen");
        assert!(store.challenges().expect("list").is_empty());
    }
}
