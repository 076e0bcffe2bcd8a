use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tokio::net::TcpListener;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

use stayd::tenant::TenantManager;
use stayd::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("stayd_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(dir, 1000));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, "stayd".to_string(), None).await;
            });
        }
    });

    addr
}

fn config(addr: SocketAddr, user: &str) -> Config {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("test")
        .user(user)
        .password("stayd");
    config
}

async fn connect(addr: SocketAddr, user: Ulid) -> Client {
    let (client, connection) = config(addr, &user.to_string())
        .connect(NoTls)
        .await
        .unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

fn ahead(days: u64) -> NaiveDate {
    Utc::now().date_naive() + chrono::Days::new(days)
}

async fn create_place(owner: &Client, max_guests: u32) -> Ulid {
    let id = Ulid::new();
    owner
        .batch_execute(&format!(
            "INSERT INTO places (id, title, address, description, perks, extra_info, check_in, check_out, max_guests, price) \
             VALUES ('{id}', 'Lake house', '4 Shore Drive', 'Wooden house by the lake', '[\"wifi\", \"sauna\"]', 'No parties', 15, 11, {max_guests}, 150)"
        ))
        .await
        .unwrap();
    id
}

fn insert_booking(id: Ulid, place: Ulid, from: u64, to: u64, guests: u32) -> String {
    format!(
        "INSERT INTO bookings (id, place_id, check_in, check_out, guests, name, phone, price) \
         VALUES ('{id}', '{place}', '{}', '{}', {guests}, 'Ada Lovelace', '+44 20 7946 0958', 450)",
        ahead(from),
        ahead(to)
    )
}

/// Data rows of a simple query, each as a list of text columns.
async fn rows(client: &Client, sql: &str) -> Vec<Vec<Option<String>>> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|msg| match msg {
            SimpleQueryMessage::Row(row) => Some(
                (0..row.len())
                    .map(|i| row.get(i).map(str::to_string))
                    .collect(),
            ),
            _ => None,
        })
        .collect()
}

fn code(err: &tokio_postgres::Error) -> Option<&SqlState> {
    err.code()
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn place_roundtrip_over_wire() {
    let addr = start_test_server().await;
    let owner_id = Ulid::new();
    let owner = connect(addr, owner_id).await;
    let place = create_place(&owner, 4).await;

    let found = rows(&owner, &format!("SELECT * FROM places WHERE id = '{place}'")).await;
    assert_eq!(found.len(), 1);
    let row = &found[0];
    assert_eq!(row[0].as_deref(), Some(place.to_string().as_str()));
    assert_eq!(row[1].as_deref(), Some(owner_id.to_string().as_str()));
    assert_eq!(row[2].as_deref(), Some("Lake house"));
    assert_eq!(row[5].as_deref(), Some(r#"["wifi","sauna"]"#));
    assert_eq!(row[6].as_deref(), Some("No parties"));
    assert_eq!(row[9].as_deref(), Some("4"));

    owner
        .batch_execute(&format!(
            "UPDATE places SET title = 'Lake house with sauna', max_guests = 6 WHERE id = '{place}'"
        ))
        .await
        .unwrap();
    owner
        .batch_execute(&format!(
            "INSERT INTO photos (place_id, url) VALUES ('{place}', 'https://img.example/1.jpg'), ('{place}', 'https://img.example/2.jpg')"
        ))
        .await
        .unwrap();

    let mine = rows(&owner, &format!("SELECT * FROM places WHERE owner_id = '{owner_id}'")).await;
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0][2].as_deref(), Some("Lake house with sauna"));
    assert_eq!(mine[0][9].as_deref(), Some("6"));
    assert_eq!(
        mine[0][11].as_deref(),
        Some(r#"["https://img.example/1.jpg","https://img.example/2.jpg"]"#)
    );
}

#[tokio::test]
async fn only_owner_may_update_place() {
    let addr = start_test_server().await;
    let owner = connect(addr, Ulid::new()).await;
    let stranger = connect(addr, Ulid::new()).await;
    let place = create_place(&owner, 4).await;

    let err = stranger
        .batch_execute(&format!("UPDATE places SET price = 1 WHERE id = '{place}'"))
        .await
        .unwrap_err();
    assert_eq!(code(&err), Some(&SqlState::INSUFFICIENT_PRIVILEGE));

    let err = owner
        .batch_execute(&format!("UPDATE places SET price = 1 WHERE id = '{}'", Ulid::new()))
        .await
        .unwrap_err();
    assert_eq!(code(&err), Some(&SqlState::NO_DATA_FOUND));
}

#[tokio::test]
async fn overlapping_booking_is_exclusion_violation() {
    let addr = start_test_server().await;
    let owner = connect(addr, Ulid::new()).await;
    let place = create_place(&owner, 4).await;
    let u1 = connect(addr, Ulid::new()).await;
    let u2 = connect(addr, Ulid::new()).await;

    u1.batch_execute(&insert_booking(Ulid::new(), place, 10, 15, 2))
        .await
        .unwrap();

    let err = u2
        .batch_execute(&insert_booking(Ulid::new(), place, 12, 18, 2))
        .await
        .unwrap_err();
    assert_eq!(code(&err), Some(&SqlState::EXCLUSION_VIOLATION));
    let msg = err.as_db_error().unwrap().message().to_string();
    assert!(msg.contains("already booked"), "{msg}");

    // Back-to-back with the existing stay is fine.
    u2.batch_execute(&insert_booking(Ulid::new(), place, 15, 18, 2))
        .await
        .unwrap();
}

#[tokio::test]
async fn booking_rejections_map_to_sqlstates() {
    let addr = start_test_server().await;
    let owner = connect(addr, Ulid::new()).await;
    let place = create_place(&owner, 2).await;
    let guest = connect(addr, Ulid::new()).await;

    let err = owner
        .batch_execute(&insert_booking(Ulid::new(), place, 3, 5, 1))
        .await
        .unwrap_err();
    assert_eq!(code(&err), Some(&SqlState::INVALID_PARAMETER_VALUE));

    let err = guest
        .batch_execute(&insert_booking(Ulid::new(), place, 5, 5, 1))
        .await
        .unwrap_err();
    assert_eq!(code(&err), Some(&SqlState::INVALID_PARAMETER_VALUE));

    let err = guest
        .batch_execute(&insert_booking(Ulid::new(), place, 3, 5, 3))
        .await
        .unwrap_err();
    assert_eq!(code(&err), Some(&SqlState::INVALID_PARAMETER_VALUE));

    let err = guest
        .batch_execute(&insert_booking(Ulid::new(), Ulid::new(), 3, 5, 1))
        .await
        .unwrap_err();
    assert_eq!(code(&err), Some(&SqlState::NO_DATA_FOUND));

    let id = Ulid::new();
    guest
        .batch_execute(&insert_booking(id, place, 3, 5, 2))
        .await
        .unwrap();
    let err = guest
        .batch_execute(&insert_booking(id, place, 8, 9, 2))
        .await
        .unwrap_err();
    assert_eq!(code(&err), Some(&SqlState::UNIQUE_VIOLATION));
}

#[tokio::test]
async fn bookings_visible_only_to_their_user() {
    let addr = start_test_server().await;
    let owner = connect(addr, Ulid::new()).await;
    let place = create_place(&owner, 4).await;
    let guest_id = Ulid::new();
    let guest = connect(addr, guest_id).await;
    let other = connect(addr, Ulid::new()).await;

    let booking = Ulid::new();
    guest
        .batch_execute(&insert_booking(booking, place, 20, 23, 2))
        .await
        .unwrap();
    guest
        .batch_execute(&insert_booking(Ulid::new(), place, 30, 31, 1))
        .await
        .unwrap();

    let one = rows(&guest, &format!("SELECT * FROM bookings WHERE id = '{booking}'")).await;
    assert_eq!(one.len(), 1);
    assert_eq!(one[0][2].as_deref(), Some(guest_id.to_string().as_str()));
    assert_eq!(one[0][3].as_deref(), Some(ahead(20).to_string().as_str()));
    assert_eq!(one[0][4].as_deref(), Some(ahead(23).to_string().as_str()));

    let err = other
        .simple_query(&format!("SELECT * FROM bookings WHERE id = '{booking}'"))
        .await
        .unwrap_err();
    assert_eq!(code(&err), Some(&SqlState::INSUFFICIENT_PRIVILEGE));

    assert_eq!(rows(&guest, "SELECT * FROM bookings").await.len(), 2);
    assert_eq!(rows(&guest, "SELECT * FROM bookings LIMIT 1").await.len(), 1);
    assert!(rows(&other, "SELECT * FROM bookings").await.is_empty());
}

#[tokio::test]
async fn pagination_and_syntax_errors() {
    let addr = start_test_server().await;
    let client = connect(addr, Ulid::new()).await;

    let err = client
        .simple_query("SELECT * FROM places LIMIT 51")
        .await
        .unwrap_err();
    assert_eq!(code(&err), Some(&SqlState::INVALID_PARAMETER_VALUE));

    let err = client.simple_query("SELECT * FROM users").await.unwrap_err();
    assert_eq!(code(&err), Some(&SqlState::SYNTAX_ERROR));
}

#[tokio::test]
async fn extended_query_parameters() {
    let addr = start_test_server().await;
    let owner = connect(addr, Ulid::new()).await;
    let place = create_place(&owner, 4).await;
    let guest = connect(addr, Ulid::new()).await;

    let id = Ulid::new().to_string();
    let place_str = place.to_string();
    let check_in = ahead(7).to_string();
    let check_out = ahead(9).to_string();
    let inserted = guest
        .execute(
            "INSERT INTO bookings (id, place_id, check_in, check_out, guests, name, phone, price) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            &[
                &id,
                &place_str,
                &check_in,
                &check_out,
                &"2",
                &"Grace O'Malley",
                &"0123456789",
                &"300",
            ],
        )
        .await
        .unwrap();
    assert_eq!(inserted, 1);

    let found = rows(&guest, &format!("SELECT * FROM bookings WHERE id = '{id}'")).await;
    assert_eq!(found[0][6].as_deref(), Some("Grace O'Malley"));
}

#[tokio::test]
async fn non_ulid_user_is_refused() {
    let addr = start_test_server().await;
    let result = config(addr, "postgres").connect(NoTls).await;
    let err = result.err().expect("login must fail");
    if let Some(c) = code(&err) {
        assert_eq!(c, &SqlState::INVALID_AUTHORIZATION_SPECIFICATION);
    }
}

#[tokio::test]
async fn tenants_do_not_share_places() {
    let addr = start_test_server().await;
    let user = Ulid::new();
    let owner = connect(addr, user).await;
    let place = create_place(&owner, 4).await;

    let mut other_db = config(addr, &user.to_string());
    other_db.dbname("other");
    let (client, connection) = other_db.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });

    let err = client
        .simple_query(&format!("SELECT * FROM places WHERE id = '{place}'"))
        .await
        .unwrap_err();
    assert_eq!(code(&err), Some(&SqlState::NO_DATA_FOUND));
}
