use std::fmt::Debug;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::{self, StaydAuthSource};
use crate::engine::{Engine, EngineError, Rejection};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;

pub struct StaydHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<StaydQueryParser>,
}

impl StaydHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(StaydQueryParser),
        }
    }

    /// The tenant is the database named at startup.
    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))
    }

    fn resolve_user<C: ClientInfo>(&self, client: &C) -> PgWireResult<Ulid> {
        auth::user_id(client.metadata().get("user").map(String::as_str))
    }

    /// Parse, execute and record metrics for one statement.
    async fn run<C: ClientInfo>(&self, client: &C, query: &str) -> PgWireResult<Response> {
        let engine = self.resolve_engine(client)?;
        let user = self.resolve_user(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;

        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(&engine, user, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        user: Ulid,
        cmd: Command,
    ) -> PgWireResult<Response> {
        match cmd {
            Command::InsertPlace { id, place } => {
                engine.create_place(id, user, place).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdatePlace { id, patch } => {
                engine.update_place(user, id, patch).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::InsertPhotos { place_id, urls } => {
                let count = urls.len();
                engine
                    .add_photos(user, place_id, urls)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(count)))
            }
            Command::InsertBooking { id, booking } => {
                engine
                    .create_booking(id, user, booking)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::SelectPlace { id } => {
                let place = engine
                    .get_place(id)
                    .await
                    .ok_or(EngineError::NotFound(id))
                    .map_err(engine_err)?;
                place_rows(vec![place])
            }
            Command::SelectPlaces { owner_id, page } => {
                let paged = match owner_id {
                    Some(owner) => engine.list_places_by_owner(owner, page).await,
                    None => engine.list_places(page).await,
                };
                tracing::debug!(
                    "places page offset={} limit={} total={}",
                    paged.offset,
                    paged.limit,
                    paged.total
                );
                place_rows(paged.items)
            }
            Command::SelectBooking { id } => {
                let booking = engine.get_booking(user, id).await.map_err(engine_err)?;
                booking_rows(vec![booking])
            }
            Command::SelectBookings { page } => {
                let paged = engine.list_user_bookings(user, page).await;
                booking_rows(paged.items)
            }
        }
    }
}

// ── Result sets ──────────────────────────────────────────────────

fn text_field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn place_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("owner_id", Type::VARCHAR),
        text_field("title", Type::VARCHAR),
        text_field("address", Type::VARCHAR),
        text_field("description", Type::VARCHAR),
        text_field("perks", Type::VARCHAR),
        text_field("extra_info", Type::VARCHAR),
        text_field("check_in", Type::INT4),
        text_field("check_out", Type::INT4),
        text_field("max_guests", Type::INT4),
        text_field("price", Type::FLOAT8),
        text_field("photos", Type::VARCHAR),
        text_field("created_at", Type::INT8),
    ]
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("place_id", Type::VARCHAR),
        text_field("user_id", Type::VARCHAR),
        text_field("check_in", Type::VARCHAR),
        text_field("check_out", Type::VARCHAR),
        text_field("guests", Type::INT8),
        text_field("name", Type::VARCHAR),
        text_field("phone", Type::VARCHAR),
        text_field("price", Type::FLOAT8),
        text_field("created_at", Type::INT8),
    ]
}

/// Schema a statement will return, judged from its text before execution.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.trim_start().to_uppercase();
    if !upper.starts_with("SELECT") {
        return vec![];
    }
    if upper.contains("PLACES") {
        place_schema()
    } else if upper.contains("BOOKINGS") {
        booking_schema()
    } else {
        vec![]
    }
}

fn json_list(items: &[String]) -> PgWireResult<String> {
    serde_json::to_string(items).map_err(|e| PgWireError::ApiError(Box::new(e)))
}

fn place_rows(places: Vec<Place>) -> PgWireResult<Response> {
    let schema = Arc::new(place_schema());
    let rows: Vec<PgWireResult<_>> = places
        .into_iter()
        .map(|p| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&p.id.to_string())?;
            encoder.encode_field(&p.owner_id.to_string())?;
            encoder.encode_field(&p.title)?;
            encoder.encode_field(&p.address)?;
            encoder.encode_field(&p.description)?;
            encoder.encode_field(&json_list(&p.perks)?)?;
            encoder.encode_field(&p.extra_info)?;
            encoder.encode_field(&i32::from(p.check_in_hour))?;
            encoder.encode_field(&i32::from(p.check_out_hour))?;
            encoder.encode_field(&(p.max_guests as i32))?;
            encoder.encode_field(&p.price)?;
            encoder.encode_field(&json_list(&p.photos)?)?;
            encoder.encode_field(&p.created_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn booking_rows(bookings: Vec<Booking>) -> PgWireResult<Response> {
    let schema = Arc::new(booking_schema());
    let rows: Vec<PgWireResult<_>> = bookings
        .into_iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id.to_string())?;
            encoder.encode_field(&b.place_id.to_string())?;
            encoder.encode_field(&b.user_id.to_string())?;
            encoder.encode_field(&b.stay.check_in.to_string())?;
            encoder.encode_field(&b.stay.check_out.to_string())?;
            encoder.encode_field(&i64::from(b.guests))?;
            encoder.encode_field(&b.name)?;
            encoder.encode_field(&b.phone)?;
            encoder.encode_field(&b.price)?;
            encoder.encode_field(&b.created_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

#[async_trait]
impl SimpleQueryHandler for StaydHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(client, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct StaydQueryParser;

#[async_trait]
impl QueryParser for StaydQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for StaydHandler {
    type Statement = String;
    type QueryParser = StaydQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
        self.run(client, &sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the SQL string.
/// Call `on_param(range, n)` for every `$n` placeholder outside a quoted
/// literal, left to right.
fn for_each_placeholder(sql: &str, mut on_param: impl FnMut(Range<usize>, usize)) {
    let bytes = sql.as_bytes();
    let mut in_quote = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                in_quote = !in_quote;
                i += 1;
            }
            b'$' if !in_quote => {
                let start = i;
                i += 1;
                let digits = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if let Ok(n) = sql[digits..i].parse::<usize>() {
                    on_param(start..i, n);
                }
            }
            _ => i += 1,
        }
    }
}

fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    for_each_placeholder(sql, |_, n| max = max.max(n));
    max
}

fn quote_param(param: &Option<Bytes>) -> String {
    match param {
        Some(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            format!("'{}'", text.replace('\'', "''"))
        }
        None => "NULL".to_string(),
    }
}

/// Replace `$1`, `$2`, ... with bound text parameters as quoted literals.
/// A single pass over the statement, so bound values are never rescanned.
fn substitute_params(sql: &str, params: &[Option<Bytes>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    for_each_placeholder(sql, |range, n| {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            return;
        };
        out.push_str(&sql[copied..range.start]);
        out.push_str(&quote_param(param));
        copied = range.end;
    });
    out.push_str(&sql[copied..]);
    out
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

/// SQLSTATE reported for each engine failure.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::Forbidden(_) => "42501",
        EngineError::Rejected(r) if r.is_conflict() => "23P01",
        EngineError::Rejected(Rejection::PlaceNotFound) => "P0002",
        EngineError::Rejected(_) | EngineError::Invalid(_) => "22023",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if let EngineError::WalError(ref msg) = e {
        tracing::error!("storage failure: {msg}");
    }
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = match e {
        SqlError::InvalidPagination => "22023",
        _ => "42601",
    };
    user_error(code, e.to_string())
}

// ── Factory ──────────────────────────────────────────────────────

pub struct StaydFactory {
    handler: Arc<StaydHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<StaydAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl StaydFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        Self {
            handler: Arc::new(StaydHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                StaydAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for StaydFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(StaydFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}
