use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use classbook::institution::InstitutionRegistry;
use classbook::wire;

const PASSWORD: &str = "classbook";

// 2024-03-04 09:00 and 10:00 UTC.
const NINE: i64 = 1_709_542_800_000;
const TEN: i64 = 1_709_546_400_000;
const WEEK: i64 = 604_800_000;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("classbook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let registry = Arc::new(InstitutionRegistry::new(dir, 1000));

    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            let registry = registry.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, registry, PASSWORD.to_string(), None).await;
            });
        }
    });

    addr
}

async fn connect(addr: SocketAddr, dbname: &str) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(dbname)
        .user("registrar")
        .password(PASSWORD);

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(connection);
    client
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

/// SQLSTATE and message of a failing statement.
async fn failure(client: &Client, sql: &str) -> (String, String) {
    let err = client.simple_query(sql).await.err().unwrap();
    let db = err.as_db_error().unwrap();
    (db.code().code().to_string(), db.message().to_string())
}

async fn add_classroom(client: &Client, name: &str) -> Ulid {
    let id = Ulid::new();
    client
        .simple_query(&format!(
            "INSERT INTO classrooms (id, name, capacity) VALUES ('{id}', '{name}', 30)"
        ))
        .await
        .unwrap();
    id
}

async fn add_reservation(client: &Client, room: Ulid, start: i64, end: i64) -> Result<Ulid, tokio_postgres::Error> {
    let id = Ulid::new();
    client
        .simple_query(&format!(
            "INSERT INTO reservations (id, classroom_id, user_id, start, \"end\", course) \
             VALUES ('{id}', '{room}', '{}', {start}, {end}, 'math101')",
            Ulid::new()
        ))
        .await?;
    Ok(id)
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn classroom_lifecycle() {
    let addr = start_test_server().await;
    let client = connect(addr, "uni").await;

    let room = add_classroom(&client, "A-101").await;
    client
        .simple_query(&format!("UPDATE classrooms SET capacity = 45 WHERE id = '{room}'"))
        .await
        .unwrap();

    let listed = rows(&client, "SELECT * FROM classrooms").await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get("name"), Some("A-101"));
    assert_eq!(listed[0].get("capacity"), Some("45"));

    let (code, _) = failure(
        &client,
        &format!("INSERT INTO classrooms (id, name, capacity) VALUES ('{room}', 'again', 10)"),
    )
    .await;
    assert_eq!(code, "23505");

    client
        .simple_query(&format!("DELETE FROM classrooms WHERE id = '{room}'"))
        .await
        .unwrap();
    assert!(rows(&client, "SELECT * FROM classrooms").await.is_empty());

    let audit = rows(&client, &format!("SELECT * FROM audit_log WHERE entity_id = '{room}'")).await;
    let actions: Vec<_> = audit.iter().map(|r| r.get("action").unwrap().to_string()).collect();
    assert_eq!(actions, ["create", "update", "delete"]);
    assert!(audit.iter().all(|r| r.get("actor") == Some("registrar")));
}

#[tokio::test]
async fn overlapping_reservation_is_a_conflict() {
    let addr = start_test_server().await;
    let client = connect(addr, "uni").await;
    let room = add_classroom(&client, "A-101").await;

    add_reservation(&client, room, NINE, TEN).await.unwrap();
    // Touching intervals do not overlap.
    add_reservation(&client, room, TEN, TEN + 3_600_000).await.unwrap();

    let (code, message) = failure(
        &client,
        &format!(
            "INSERT INTO reservations (id, classroom_id, user_id, start, \"end\", course) \
             VALUES ('{}', '{room}', '{}', {}, {}, 'phys')",
            Ulid::new(),
            Ulid::new(),
            NINE + 1_800_000,
            TEN + 1_800_000,
        ),
    )
    .await;
    assert_eq!(code, "23P01");
    assert!(message.starts_with("conflict: {"), "{message}");
    assert!(message.contains("startTime"), "{message}");

    let listed = rows(&client, &format!("SELECT * FROM reservations WHERE classroom_id = '{room}'")).await;
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].get("course"), Some("MATH101"));
}

#[tokio::test]
async fn reservation_request_reports_each_week() {
    let addr = start_test_server().await;
    let client = connect(addr, "uni").await;
    let room = add_classroom(&client, "A-101").await;
    add_reservation(&client, room, NINE + WEEK, TEN + WEEK).await.unwrap();

    let outcome = rows(
        &client,
        &format!(
            "INSERT INTO reservation_requests \
             (classroom_id, user_id, date, start_hour, end_hour, utc_offset, repeat_on_weeks, course) \
             VALUES ('{room}', '{}', '2024-03-04', '09:00', '10:00', '+00:00', '1,2,3', 'chem')",
            Ulid::new()
        ),
    )
    .await;

    assert_eq!(outcome.len(), 3);
    let weeks: Vec<_> = outcome.iter().map(|r| r.get("week").unwrap().to_string()).collect();
    assert_eq!(weeks, ["1", "2", "3"]);
    assert_eq!(outcome[0].get("start"), Some(NINE.to_string().as_str()));
    assert!(outcome[0].get("reservation_id").is_some());
    assert_eq!(outcome[1].get("reservation_id"), None);
    assert_eq!(outcome[1].get("error_kind"), Some("conflict"));
    assert!(outcome[2].get("error_kind").is_none());

    let listed = rows(&client, &format!("SELECT * FROM reservations WHERE classroom_id = '{room}'")).await;
    assert_eq!(listed.len(), 3);
}

#[tokio::test]
async fn atomic_request_rolls_back() {
    let addr = start_test_server().await;
    let client = connect(addr, "uni").await;
    let room = add_classroom(&client, "A-101").await;
    add_reservation(&client, room, NINE + WEEK, TEN + WEEK).await.unwrap();

    let (code, _) = failure(
        &client,
        &format!(
            "INSERT INTO reservation_requests \
             (classroom_id, user_id, date, start_hour, end_hour, repeat_on_weeks, course, atomic) \
             VALUES ('{room}', '{}', '2024-03-04', '09:00', '10:00', '1,2', 'chem', true)",
            Ulid::new()
        ),
    )
    .await;
    assert_eq!(code, "23P01");

    let listed = rows(&client, &format!("SELECT * FROM reservations WHERE classroom_id = '{room}'")).await;
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn invalid_request_names_the_field() {
    let addr = start_test_server().await;
    let client = connect(addr, "uni").await;
    let room = add_classroom(&client, "A-101").await;

    let (code, message) = failure(
        &client,
        &format!(
            "INSERT INTO reservation_requests \
             (classroom_id, user_id, date, start_hour, end_hour, course) \
             VALUES ('{room}', '{}', '2024-03-04', '22:00', '01:00', 'chem')",
            Ulid::new()
        ),
    )
    .await;
    assert_eq!(code, "22023");
    assert!(message.contains("endTime"), "{message}");
}

#[tokio::test]
async fn availability_subtracts_reservations() {
    let addr = start_test_server().await;
    let client = connect(addr, "uni").await;
    let room = add_classroom(&client, "A-101").await;
    add_reservation(&client, room, NINE, TEN).await.unwrap();

    let day_start = NINE - 9 * 3_600_000;
    let day_end = day_start + 24 * 3_600_000;
    let slots = rows(
        &client,
        &format!(
            "SELECT * FROM availability WHERE classroom_id = '{room}' \
             AND start >= {day_start} AND \"end\" <= {day_end}"
        ),
    )
    .await;
    let spans: Vec<(String, String)> = slots
        .iter()
        .map(|r| (r.get("start").unwrap().into(), r.get("end").unwrap().into()))
        .collect();
    assert_eq!(
        spans,
        [
            (day_start.to_string(), NINE.to_string()),
            (TEN.to_string(), day_end.to_string()),
        ]
    );
}

#[tokio::test]
async fn classroom_with_reservations_cannot_be_deleted() {
    let addr = start_test_server().await;
    let client = connect(addr, "uni").await;
    let room = add_classroom(&client, "A-101").await;
    let booking = add_reservation(&client, room, NINE, TEN).await.unwrap();

    let (code, _) = failure(&client, &format!("DELETE FROM classrooms WHERE id = '{room}'")).await;
    assert_eq!(code, "23503");

    client
        .simple_query(&format!("DELETE FROM reservations WHERE id = '{booking}'"))
        .await
        .unwrap();
    client
        .simple_query(&format!("DELETE FROM classrooms WHERE id = '{room}'"))
        .await
        .unwrap();
}

#[tokio::test]
async fn databases_are_separate_institutions() {
    let addr = start_test_server().await;
    let north = connect(addr, "north").await;
    let south = connect(addr, "south").await;

    add_classroom(&north, "N-1").await;
    assert_eq!(rows(&north, "SELECT * FROM classrooms").await.len(), 1);
    assert!(rows(&south, "SELECT * FROM classrooms").await.is_empty());
}

#[tokio::test]
async fn bad_sql_is_a_syntax_error() {
    let addr = start_test_server().await;
    let client = connect(addr, "uni").await;
    let (code, _) = failure(&client, "SELEC nonsense").await;
    assert_eq!(code, "42601");
    let (code, _) = failure(&client, "SELECT * FROM students").await;
    assert_eq!(code, "42601");
}
