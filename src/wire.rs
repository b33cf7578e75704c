use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{
    AuthSource, DefaultServerParameterProvider, LoginInfo, Password, StartupHandler,
};
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
use pgwire::messages::data::DataRow;
use tokio::net::TcpStream;

use crate::availability::AvailabilityResult;
use crate::engine::EngineError;
use crate::model::*;
use crate::observability;
use crate::registry::AppRegistry;
use crate::rules;
use crate::sql::{self, Command, SqlError};
use crate::stats::ClientStatsUpdater;
use crate::store::StoreError;

pub struct ReservdHandler {
    registry: AppRegistry,
    query_parser: Arc<ReservdQueryParser>,
}

impl ReservdHandler {
    pub fn new(registry: AppRegistry) -> Self {
        Self {
            registry,
            query_parser: Arc::new(ReservdQueryParser),
        }
    }

    async fn run(&self, query: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = self.registry.engine();
        match cmd {
            Command::InsertReservation { new } => {
                let created = engine
                    .create_reservation(new, Utc::now())
                    .await
                    .map_err(engine_err)?;
                tracing::info!(id = %created.id, space_type = %created.space_type, "reservation created");
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateReservation { id, patch } => {
                engine
                    .update_reservation(id, patch, Utc::now())
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteReservation { id } => {
                engine.delete_reservation(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectReservations { filter } => {
                let rows = engine.select_reservations(&filter).await;
                Ok(vec![reservations_response(&rows)?])
            }
            Command::SelectAvailability {
                space_type,
                start,
                end,
            } => {
                let result = self
                    .registry
                    .checker()
                    .check_availability(&space_type, start, end)
                    .await;
                Ok(vec![availability_response(&result)?])
            }
            Command::SelectSpaceAvailability { space_type, date } => {
                let today = date.unwrap_or_else(|| Utc::now().date_naive());
                let slugs: Vec<String> = match space_type {
                    Some(slug) => vec![slug],
                    None => SpaceType::ALL.iter().map(|t| t.as_str().to_string()).collect(),
                };
                let checker = self.registry.checker();
                let mut rows = Vec::with_capacity(slugs.len());
                for slug in slugs {
                    let result = checker.check_general_availability(&slug, today).await;
                    rows.push((slug, result));
                }
                Ok(vec![space_availability_response(&rows)?])
            }
            Command::SelectSpaces => Ok(vec![spaces_response(&self.registry)?]),
            Command::SelectClientStats { email } => {
                let stats = self.registry.stats();
                let rows = match email {
                    Some(email) => {
                        stats.recompute(&email).await.map_err(store_err)?;
                        stats.get(&email).into_iter().collect()
                    }
                    None => {
                        stats.rebuild().await.map_err(store_err)?;
                        stats.all()
                    }
                };
                Ok(vec![client_stats_response(&rows)?])
            }
            Command::ApplyReservationRules => {
                let result = rules::run_lifecycle_pass(self.registry.store().as_ref(), Utc::now())
                    .await
                    .map_err(store_err)?;
                let schema = Arc::new(rules_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&(result.updated as i64))?;
                encoder.encode_field(&(result.cancelled as i64))?;
                encoder.encode_field(&(result.completed as i64))?;
                encoder.encode_field(&(result.errors.len() as i64))?;
                encoder.encode_field(&to_json(&result.errors)?)?;
                encoder.encode_field(&to_json(&result.pending_timeouts)?)?;
                encoder.encode_field(&to_json(&result.completions)?)?;
                encoder.encode_field(&to_json(&result.expirations)?)?;
                Ok(vec![query_response(rules_schema(), vec![Ok(encoder.take_row())])])
            }
            Command::ReapCashReservations => {
                let report = self
                    .registry
                    .reaper()
                    .reap(Utc::now())
                    .await
                    .map_err(store_err)?;
                let schema = Arc::new(reaper_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&(report.scanned as i64))?;
                encoder.encode_field(&(report.cancelled.len() as i64))?;
                encoder.encode_field(&(report.errors.len() as i64))?;
                encoder.encode_field(&to_json(&report.cancelled)?)?;
                Ok(vec![query_response(reaper_schema(), vec![Ok(encoder.take_row())])])
            }
        }
    }
}

// ── Result sets ──────────────────────────────────────────────────

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn boolean(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("space_type"),
        int8("occupants"),
        text("start_date"),
        text("end_date"),
        text("status"),
        text("payment_method"),
        text("subscription_type"),
        int8("amount"),
        text("full_name"),
        text("email"),
        text("phone"),
        text("company"),
        text("activity"),
        text("address"),
        text("admin_notes"),
        text("created_at"),
        text("updated_at"),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        boolean("is_available"),
        text("message"),
        text("suggested_dates"),
        text("conflicts"),
        boolean("degraded"),
    ]
}

fn space_availability_schema() -> Vec<FieldInfo> {
    vec![
        text("space_type"),
        boolean("is_available"),
        int8("occupied"),
        text("message"),
        boolean("degraded"),
    ]
}

fn spaces_schema() -> Vec<FieldInfo> {
    vec![
        text("space_type"),
        text("label"),
        int8("max_concurrent"),
        int8("max_occupants"),
        int8("daily_price"),
        int8("monthly_price"),
        int8("yearly_price"),
        boolean("priced_per_occupant"),
    ]
}

fn client_stats_schema() -> Vec<FieldInfo> {
    vec![
        text("email"),
        text("full_name"),
        int8("total_reservations"),
        int8("active_reservations"),
        int8("completed_reservations"),
        int8("cancelled_reservations"),
        int8("total_spent"),
        text("last_reservation_at"),
    ]
}

fn rules_schema() -> Vec<FieldInfo> {
    vec![
        int8("updated"),
        int8("cancelled"),
        int8("completed"),
        int8("error_count"),
        text("errors"),
        text("pending_timeouts"),
        text("completions"),
        text("expirations"),
    ]
}

fn reaper_schema() -> Vec<FieldInfo> {
    vec![
        int8("scanned"),
        int8("cancelled"),
        int8("error_count"),
        text("reaped"),
    ]
}

/// Result columns for a statement, derived from its table or procedure name.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    if lower.contains("from space_availability") {
        space_availability_schema()
    } else if lower.contains("from availability") {
        availability_schema()
    } else if lower.contains("from client_stats") {
        client_stats_schema()
    } else if lower.contains("from spaces") {
        spaces_schema()
    } else if lower.trim_start().starts_with("select") && lower.contains("from reservations") {
        reservation_schema()
    } else if lower.contains("apply_reservation_rules") {
        rules_schema()
    } else if lower.contains("reap_cash_reservations") {
        reaper_schema()
    } else {
        vec![]
    }
}

fn query_response(schema: Vec<FieldInfo>, rows: Vec<PgWireResult<DataRow>>) -> Response {
    Response::Query(QueryResponse::new(Arc::new(schema), stream::iter(rows)))
}

fn reservations_response(reservations: &[Reservation]) -> PgWireResult<Response> {
    let schema = Arc::new(reservation_schema());
    let rows: Vec<PgWireResult<_>> = reservations
        .iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.space_type.as_str())?;
            encoder.encode_field(&i64::from(r.occupants))?;
            encoder.encode_field(&r.start_date.to_string())?;
            encoder.encode_field(&r.end_date.to_string())?;
            encoder.encode_field(&r.status.as_str())?;
            encoder.encode_field(&r.payment_method.as_str())?;
            encoder.encode_field(&r.subscription_type.as_str())?;
            encoder.encode_field(&r.amount)?;
            encoder.encode_field(&r.contact.full_name)?;
            encoder.encode_field(&r.contact.email)?;
            encoder.encode_field(&r.contact.phone)?;
            encoder.encode_field(&r.contact.company)?;
            encoder.encode_field(&r.contact.activity)?;
            encoder.encode_field(&r.contact.address)?;
            encoder.encode_field(&r.admin_notes)?;
            encoder.encode_field(&r.created_at.to_rfc3339())?;
            encoder.encode_field(&r.updated_at.to_rfc3339())?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(query_response(reservation_schema(), rows))
}

fn availability_response(result: &AvailabilityResult) -> PgWireResult<Response> {
    let schema = Arc::new(availability_schema());
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&result.is_available)?;
    encoder.encode_field(&result.message)?;
    encoder.encode_field(&to_json(&result.suggested_dates)?)?;
    encoder.encode_field(&to_json(&result.conflicts)?)?;
    encoder.encode_field(&result.degraded)?;
    Ok(query_response(availability_schema(), vec![Ok(encoder.take_row())]))
}

fn space_availability_response(rows: &[(String, AvailabilityResult)]) -> PgWireResult<Response> {
    let schema = Arc::new(space_availability_schema());
    let rows: Vec<PgWireResult<_>> = rows
        .iter()
        .map(|(slug, result)| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(slug)?;
            encoder.encode_field(&result.is_available)?;
            encoder.encode_field(&(result.conflicts.len() as i64))?;
            encoder.encode_field(&result.message)?;
            encoder.encode_field(&result.degraded)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(query_response(space_availability_schema(), rows))
}

fn spaces_response(registry: &AppRegistry) -> PgWireResult<Response> {
    let catalog = registry.catalog();
    let schema = Arc::new(spaces_schema());
    let rows: Vec<PgWireResult<_>> = SpaceType::ALL
        .iter()
        .filter_map(|t| catalog.spec(*t))
        .map(|spec| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&spec.space_type.as_str())?;
            encoder.encode_field(&spec.label)?;
            encoder.encode_field(&i64::from(spec.max_concurrent))?;
            encoder.encode_field(&i64::from(spec.max_occupants))?;
            encoder.encode_field(&spec.daily_price)?;
            encoder.encode_field(&spec.monthly_price)?;
            encoder.encode_field(&spec.yearly_price)?;
            encoder.encode_field(&spec.priced_per_occupant)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(query_response(spaces_schema(), rows))
}

fn client_stats_response(stats: &[crate::stats::ClientStats]) -> PgWireResult<Response> {
    let schema = Arc::new(client_stats_schema());
    let rows: Vec<PgWireResult<_>> = stats
        .iter()
        .map(|s| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&s.email)?;
            encoder.encode_field(&s.full_name)?;
            encoder.encode_field(&i64::from(s.total_reservations))?;
            encoder.encode_field(&i64::from(s.active_reservations))?;
            encoder.encode_field(&i64::from(s.completed_reservations))?;
            encoder.encode_field(&i64::from(s.cancelled_reservations))?;
            encoder.encode_field(&s.total_spent)?;
            encoder.encode_field(&s.last_reservation_at.map(|t| t.to_rfc3339()))?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(query_response(client_stats_schema(), rows))
}

fn to_json<T: serde::Serialize>(value: &T) -> PgWireResult<String> {
    serde_json::to_string(value).map_err(|e| PgWireError::ApiError(Box::new(e)))
}

#[async_trait]
impl SimpleQueryHandler for ReservdHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ReservdQueryParser;

#[async_trait]
impl QueryParser for ReservdQueryParser {
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
impl ExtendedQueryHandler for ReservdHandler {
    type Statement = String;
    type QueryParser = ReservdQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        let mut responses = self.run(&sql).await?;
        if responses.is_empty() {
            return Ok(Response::EmptyQuery);
        }
        Ok(responses.remove(0))
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

/// Split `sql` into text and `$N` placeholders, skipping quoted literals.
fn placeholders(sql: &str) -> Vec<(std::ops::Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut in_literal = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            // `''` inside a literal closes and reopens it, which nets out
            b'\'' => {
                in_literal = !in_literal;
                i += 1;
            }
            b'$' if !in_literal => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if let Ok(n) = sql[start + 1..i].parse::<usize>()
                    && n > 0
                {
                    found.push((start..i, n));
                }
            }
            _ => i += 1,
        }
    }
    found
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    substitute(&portal.statement.statement, &portal.parameters)
}

/// One pass over the original statement, so bound values are never rescanned.
fn substitute<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut last = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = params.get(n - 1) else {
            continue;
        };
        result.push_str(&sql[last..range.start]);
        match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
            }
            None => result.push_str("NULL"),
        }
        last = range.end;
    }
    result.push_str(&sql[last..]);
    result
}

// ── Auth ─────────────────────────────────────────────────────────

/// Single shared admin password, any user name.
#[derive(Debug)]
pub struct ReservdAuthSource {
    password: String,
}

impl ReservdAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for ReservdAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ReservdFactory {
    handler: Arc<ReservdHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<ReservdAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl ReservdFactory {
    pub fn new(registry: AppRegistry, password: String) -> Self {
        let auth_source = ReservdAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(ReservdHandler::new(registry)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ReservdFactory {
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
    registry: AppRegistry,
    password: String,
) -> std::io::Result<()> {
    let factory = ReservdFactory::new(registry, password);
    pgwire::tokio::process_socket(socket, None, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Conflict { .. } | EngineError::CapacityExceeded { .. } => "23P01",
        EngineError::StatusMismatch { .. } => "40001",
        EngineError::NotFound(_) => "02000",
        _ => "P0001",
    }
}

fn store_sqlstate(e: &StoreError) -> &'static str {
    match e {
        StoreError::CapacityExceeded { .. } => "23P01",
        StoreError::StatusMismatch { .. } => "40001",
        StoreError::NotFound(_) => "02000",
        _ => "P0001",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(engine_sqlstate(&e), e.to_string())
}

fn store_err(e: StoreError) -> PgWireError {
    user_error(store_sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
