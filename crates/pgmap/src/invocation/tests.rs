use super::*;
use crate::config::Config;
use crate::monitor::{HookAction, QueryContext, QueryHook};
use crate::testing::{Note, Ticket, User, Widget};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Records each statement and aborts it before it reaches the database.
#[derive(Default)]
struct Capture {
    seen: Mutex<Vec<(Option<String>, String, usize)>>,
}

impl Capture {
    fn last(&self) -> (Option<String>, String, usize) {
        self.seen.lock().unwrap().last().cloned().expect("no statement captured")
    }

    fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

impl QueryHook for Capture {
    fn before_query(&self, ctx: &QueryContext) -> HookAction {
        self.seen.lock().unwrap().push((
            ctx.label.clone(),
            ctx.exec_sql.clone(),
            ctx.param_count,
        ));
        HookAction::Abort("captured".to_string())
    }
}

fn capturing_connection() -> (Connection, Arc<Capture>) {
    let config = Config::new().dsn("postgres://app@localhost/app");
    let pool = crate::pool::create_pool(config.dsn_or_none().unwrap()).unwrap();
    let capture = Arc::new(Capture::default());
    let conn = Connection::from_pool(pool, config).with_hook_arc(capture.clone());
    (conn, capture)
}

fn assert_captured(err: OrmError) {
    assert!(
        matches!(&err, OrmError::Validation(m) if m.contains("captured")),
        "{err:?}"
    );
}

#[test]
fn placeholder_helpers() {
    assert_eq!(param_tokens(1, 3), "$1,$2,$3");
    assert_eq!(param_tokens(4, 1), "$4");
    assert_eq!(param_tokens(1, 0), "");

    let cols = crate::meta_cache::columns::<Widget>();
    assert_eq!(make_where_clause(cols.primary_keys(), 3), "id = $3");
    assert_eq!(
        make_where_clause(cols.not_read_only(), 1),
        "id = $1 AND created_utc = $2 AND name = $3 AND prefs = $4"
    );
}

#[test]
fn insert_shapes() {
    let cols = crate::meta_cache::columns::<Widget>();
    let mut buf = String::new();
    generate::insert(
        &mut buf,
        "widgets",
        cols.insert_columns(),
        2,
        Conflict::None,
        &ColumnCollection::new(),
    );
    assert_eq!(
        buf,
        "INSERT INTO widgets (created_utc,name,prefs) VALUES ($1,$2,$3),($4,$5,$6)"
    );

    buf.clear();
    let set = ColumnCollection::new();
    generate::insert(
        &mut buf,
        "widgets",
        cols.insert_columns(),
        1,
        Conflict::DoUpdate {
            target: cols.unique_keys(),
            set: &set,
        },
        cols.autos(),
    );
    assert_eq!(
        buf,
        "INSERT INTO widgets (created_utc,name,prefs) VALUES ($1,$2,$3) ON CONFLICT (name) DO NOTHING RETURNING id"
    );

    buf.clear();
    generate::insert(
        &mut buf,
        "counters",
        &ColumnCollection::new(),
        1,
        Conflict::DoNothing(&ColumnCollection::new()),
        cols.autos(),
    );
    assert_eq!(buf, "INSERT INTO counters DEFAULT VALUES RETURNING id");
}

#[tokio::test]
async fn get_selects_writable_columns_by_key() {
    let (conn, capture) = capturing_connection();
    let mut widget = Widget::default();
    let err = conn.get(&mut widget, &[&7_i64]).await.unwrap_err();
    assert_captured(err);
    assert_eq!(
        capture.last(),
        (
            Some("widgets_get".to_string()),
            "SELECT id,created_utc,name,prefs FROM widgets WHERE id = $1".to_string(),
            1
        )
    );
}

#[tokio::test]
async fn get_all_selects_everything() {
    let (conn, capture) = capturing_connection();
    let mut users: Vec<User> = Vec::new();
    assert_captured(conn.get_all(&mut users).await.unwrap_err());
    assert_eq!(capture.last().1, "SELECT id,name FROM users");
    assert!(users.is_empty());
}

#[tokio::test]
async fn create_omits_autos_and_returns_them() {
    let (conn, capture) = capturing_connection();
    assert_captured(conn.create(&mut User::default()).await.unwrap_err());
    assert_eq!(
        capture.last(),
        (
            Some("users_create".to_string()),
            "INSERT INTO users (name) VALUES ($1) RETURNING id".to_string(),
            1
        )
    );

    assert_captured(conn.create_if_not_exists(&mut User::default()).await.unwrap_err());
    assert_eq!(
        capture.last().1,
        "INSERT INTO users (name) VALUES ($1) ON CONFLICT (id) DO NOTHING RETURNING id"
    );
}

#[tokio::test]
async fn create_without_primary_key_is_a_plain_insert() {
    let (conn, capture) = capturing_connection();
    let mut note = Note {
        body: "hi".to_string(),
    };
    assert_captured(conn.create_if_not_exists(&mut note).await.unwrap_err());
    assert_eq!(capture.last().1, "INSERT INTO notes (body) VALUES ($1)");
}

#[tokio::test]
async fn create_many_numbers_placeholders_across_rows() {
    let (conn, capture) = capturing_connection();
    let users = vec![User::default(), User::default(), User::default()];
    assert_captured(conn.create_many(&users).await.unwrap_err());
    let (label, sql, params) = capture.last();
    assert_eq!(label, None);
    assert_eq!(sql, "INSERT INTO users (name) VALUES ($1),($2),($3)");
    assert_eq!(params, 3);
}

#[tokio::test]
async fn create_many_of_nothing_is_a_no_op() {
    let (conn, capture) = capturing_connection();
    assert_eq!(conn.create_many::<User>(&[]).await.unwrap(), 0);
    assert_eq!(conn.upsert_many::<User>(&[]).await.unwrap(), 0);
    assert_eq!(capture.count(), 0);
}

#[tokio::test]
async fn upsert_many_conflicts_on_unique_keys() {
    let (conn, capture) = capturing_connection();
    assert_captured(conn.upsert_many(&[Widget::default()]).await.unwrap_err());
    assert_eq!(
        capture.last().1,
        "INSERT INTO widgets (created_utc,name,prefs) VALUES ($1,$2,$3) \
         ON CONFLICT (name) DO UPDATE SET created_utc = EXCLUDED.created_utc, prefs = EXCLUDED.prefs"
    );

    assert_captured(conn.upsert_many(&[User::default()]).await.unwrap_err());
    assert_eq!(
        capture.last().1,
        "INSERT INTO users (name) VALUES ($1) ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name"
    );
}

#[tokio::test]
async fn update_numbers_where_after_set() {
    let (conn, capture) = capturing_connection();
    assert_captured(conn.update(&Widget::default()).await.unwrap_err());
    assert_eq!(
        capture.last(),
        (
            Some("widgets_update".to_string()),
            "UPDATE widgets SET created_utc = $1, name = $2, prefs = $3 WHERE id = $4".to_string(),
            4
        )
    );
}

#[tokio::test]
async fn upsert_writes_autos_only_when_set() {
    let (conn, capture) = capturing_connection();
    assert_captured(conn.upsert(&mut User::default()).await.unwrap_err());
    assert_eq!(
        capture.last(),
        (
            Some("users_upsert".to_string()),
            "INSERT INTO users (name) VALUES ($1) ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name RETURNING id".to_string(),
            1
        )
    );

    let mut user = User {
        id: 42,
        name: "ada".to_string(),
    };
    assert_captured(conn.upsert(&mut user).await.unwrap_err());
    assert_eq!(
        capture.last(),
        (
            Some("users_upsert_with_id".to_string()),
            "INSERT INTO users (id,name) VALUES ($1,$2) ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name RETURNING id".to_string(),
            2
        )
    );
}

#[tokio::test]
async fn upsert_never_overwrites_autos_on_conflict() {
    let (conn, capture) = capturing_connection();
    let mut ticket = Ticket {
        id: 1,
        seq: 5,
        title: "triage".to_string(),
    };
    assert_captured(conn.upsert(&mut ticket).await.unwrap_err());
    assert_eq!(
        capture.last(),
        (
            Some("tickets_upsert_with_seq".to_string()),
            "INSERT INTO tickets (id,seq,title) VALUES ($1,$2,$3) ON CONFLICT (id) DO UPDATE SET title = EXCLUDED.title RETURNING seq".to_string(),
            3
        )
    );

    ticket.seq = 0;
    assert_captured(conn.upsert(&mut ticket).await.unwrap_err());
    assert_eq!(
        capture.last(),
        (
            Some("tickets_upsert".to_string()),
            "INSERT INTO tickets (id,title) VALUES ($1,$2) ON CONFLICT (id) DO UPDATE SET title = EXCLUDED.title RETURNING seq".to_string(),
            2
        )
    );
}

#[tokio::test]
async fn exists_delete_truncate_shapes() {
    let (conn, capture) = capturing_connection();
    let user = User::default();

    assert_captured(conn.exists(&user).await.unwrap_err());
    assert_eq!(capture.last().1, "SELECT 1 FROM users WHERE id = $1");

    assert_captured(conn.delete(&user).await.unwrap_err());
    assert_eq!(
        capture.last(),
        (
            Some("users_delete".to_string()),
            "DELETE FROM users WHERE id = $1".to_string(),
            1
        )
    );

    assert_captured(conn.truncate::<User>().await.unwrap_err());
    assert_eq!(
        capture.last(),
        (
            Some("users_truncate".to_string()),
            "TRUNCATE users".to_string(),
            0
        )
    );
}

#[tokio::test]
async fn labels_can_be_overridden() {
    let (conn, capture) = capturing_connection();
    let err = conn
        .invoke()
        .with_label("user_by_id")
        .get(&mut User::default(), &[&1_i64])
        .await
        .unwrap_err();
    assert_captured(err);
    assert_eq!(capture.last().0.as_deref(), Some("user_by_id"));

    assert_captured(conn.exec("SELECT 1", &[]).await.unwrap_err());
    assert_eq!(capture.last().0, None);
}

#[tokio::test]
async fn key_operations_require_a_primary_key() {
    let (conn, capture) = capturing_connection();
    let mut note = Note::default();
    assert!(conn.get(&mut note, &[&1_i64]).await.unwrap_err().is_no_primary_key());
    assert!(conn.exists(&note).await.unwrap_err().is_no_primary_key());
    assert!(conn.delete(&note).await.unwrap_err().is_no_primary_key());
    assert!(conn.update(&note).await.unwrap_err().is_no_primary_key());
    assert_eq!(capture.count(), 0);
}

#[tokio::test]
async fn get_validates_key_values() {
    let (conn, _capture) = capturing_connection();
    let mut user = User::default();
    assert!(conn.get(&mut user, &[]).await.unwrap_err().is_invalid_ids());
    assert!(
        conn.get(&mut user, &[&1_i64, &2_i64])
            .await
            .unwrap_err()
            .is_invalid_ids()
    );
}

#[tokio::test]
async fn on_finish_runs_once_on_every_path() {
    let (conn, _capture) = capturing_connection();
    let calls = AtomicUsize::new(0);
    let bump = || {
        calls.fetch_add(1, Ordering::SeqCst);
    };

    // aborted by the hook
    let _ = conn.invoke().on_finish(bump).exec("SELECT 1", &[]).await;
    // rejected before any statement is built
    let _ = conn
        .invoke()
        .on_finish(bump)
        .exists(&Note::default())
        .await;
    // no-op
    conn.invoke()
        .on_finish(bump)
        .create_many::<User>(&[])
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn closed_connections_fail_before_the_hook() {
    let capture = Arc::new(Capture::default());
    let conn = Connection::new(Config::new()).with_hook_arc(capture.clone());
    let err = conn.exec("SELECT 1", &[]).await.unwrap_err();
    assert!(err.is_connection_closed(), "{err:?}");
    assert_eq!(capture.count(), 0);
}

#[tokio::test]
async fn cancelled_invocations_fail_fast() {
    let pool = crate::pool::create_pool("postgres://app@localhost/app").unwrap();
    let conn = Connection::from_pool(pool, Config::new());
    let handle = CancelHandle::new();
    handle.cancel();
    let err = conn
        .invoke()
        .with_cancel(handle.signal())
        .exec("SELECT pg_sleep(10)", &[])
        .await
        .unwrap_err();
    assert!(err.is_cancelled(), "{err:?}");
}
