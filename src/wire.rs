use std::fmt::Debug;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
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
use tracing::{debug, warn};

use crate::auth::ClassbookAuthSource;
use crate::engine::{Engine, EngineError, ErrorKind, InstanceOutcome, RecurrencePolicy};
use crate::institution::InstitutionRegistry;
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, ReservationRow};

const DEFAULT_INSTITUTION: &str = "default";
const ANONYMOUS_ACTOR: &str = "anonymous";

/// Failure while executing a parsed command. Engine errors stay typed until
/// they have been counted.
enum CommandError {
    Engine(EngineError),
    Wire(PgWireError),
}

impl From<EngineError> for CommandError {
    fn from(e: EngineError) -> Self {
        CommandError::Engine(e)
    }
}

impl From<PgWireError> for CommandError {
    fn from(e: PgWireError) -> Self {
        CommandError::Wire(e)
    }
}

type CommandResult = Result<Vec<Response>, CommandError>;

pub struct ClassbookHandler {
    registry: Arc<InstitutionRegistry>,
    query_parser: Arc<ClassbookQueryParser>,
}

impl ClassbookHandler {
    pub fn new(registry: Arc<InstitutionRegistry>) -> Self {
        Self {
            registry,
            query_parser: Arc::new(ClassbookQueryParser),
        }
    }

    /// Institution = database name from the startup packet.
    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let institution = client
            .metadata()
            .get("database")
            .map(String::as_str)
            .unwrap_or(DEFAULT_INSTITUTION);
        self.registry
            .get_or_create(institution)
            .map_err(|e| user_error("08006", format!("institution error: {e}")))
    }

    /// Parse, execute and account for one statement.
    async fn run<C: ClientInfo>(&self, client: &C, query: &str) -> PgWireResult<Vec<Response>> {
        let engine = self.resolve_engine(client)?;
        let actor = client
            .metadata()
            .get("user")
            .cloned()
            .unwrap_or_else(|| ANONYMOUS_ACTOR.to_string());

        let cmd = sql::parse_sql(query).map_err(|e| {
            metrics::counter!(observability::QUERIES_TOTAL, "command" => "unparsed", "status" => "error")
                .increment(1);
            sql_err(e)
        })?;
        let label = observability::command_label(&cmd);
        debug!("{label} by {actor}");

        let started = Instant::now();
        let result = self.execute_command(&engine, &actor, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);

        result.map_err(|e| match e {
            CommandError::Engine(e) => {
                record_engine_error(label, &e);
                engine_err(e)
            }
            CommandError::Wire(e) => e,
        })
    }

    async fn execute_command(&self, engine: &Engine, actor: &str, cmd: Command) -> CommandResult {
        match cmd {
            Command::InsertClassroom { id, name, capacity } => {
                engine.create_classroom(id, &name, capacity, actor).await?;
                Ok(vec![execution("INSERT", 1)])
            }
            Command::UpdateClassroom { id, name, capacity } => {
                let current = engine.get_classroom(id).await?;
                engine
                    .update_classroom(
                        id,
                        name.as_deref().unwrap_or(&current.name),
                        capacity.unwrap_or(current.capacity),
                        actor,
                    )
                    .await?;
                Ok(vec![execution("UPDATE", 1)])
            }
            Command::DeleteClassroom { id } => {
                engine.delete_classroom(id, actor).await?;
                Ok(vec![execution("DELETE", 1)])
            }
            Command::InsertReservation { row } => {
                let id = row.id;
                engine.create_reservation(id, row_to_draft(row), actor).await?;
                Ok(vec![execution("INSERT", 1)])
            }
            Command::BatchInsertReservations { rows } => {
                let batch: Vec<_> = rows.into_iter().map(|row| (row.id, row_to_draft(row))).collect();
                let created = engine.create_reservations_atomic(batch, actor).await?;
                Ok(vec![execution("INSERT", created.len())])
            }
            Command::UpdateReservation { id, changes } => {
                let current = engine.get_reservation(id).await?;
                let draft = ReservationDraft {
                    classroom_id: changes.classroom_id.unwrap_or(current.classroom_id),
                    user_id: changes.user_id.unwrap_or(current.user_id),
                    span: Span {
                        start: changes.start.unwrap_or(current.span.start),
                        end: changes.end.unwrap_or(current.span.end),
                    },
                    course: changes.course.unwrap_or(current.course),
                    description: changes.description.unwrap_or(current.description),
                };
                engine.update_reservation(id, draft, actor).await?;
                Ok(vec![execution("UPDATE", 1)])
            }
            Command::DeleteReservation { id } => {
                engine.delete_reservation(id, actor).await?;
                Ok(vec![execution("DELETE", 1)])
            }
            Command::RequestReservations { form, atomic } => {
                let request = form.parse()?;
                let policy = if atomic {
                    RecurrencePolicy::Atomic
                } else {
                    RecurrencePolicy::PerInstance
                };
                let outcomes = engine.request_reservations(&request, policy, actor).await?;
                for outcome in &outcomes {
                    if let Err(e) = &outcome.result {
                        record_engine_error("request_reservations_instance", e);
                    }
                }
                Ok(vec![rows_response(request_schema(), outcomes, encode_outcome)])
            }
            Command::InsertPeriod {
                id,
                name,
                start_date,
                end_date,
            } => {
                let span = DateSpan {
                    start: start_date,
                    end: end_date,
                };
                engine.create_period(id, &name, span, actor).await?;
                Ok(vec![execution("INSERT", 1)])
            }
            Command::UpdatePeriod {
                id,
                name,
                start_date,
                end_date,
            } => {
                let current = engine.get_period(id).await?;
                let span = DateSpan {
                    start: start_date.unwrap_or(current.span.start),
                    end: end_date.unwrap_or(current.span.end),
                };
                engine
                    .update_period(id, name.as_deref().unwrap_or(&current.name), span, actor)
                    .await?;
                Ok(vec![execution("UPDATE", 1)])
            }
            Command::DeletePeriod { id } => {
                engine.delete_period(id, actor).await?;
                Ok(vec![execution("DELETE", 1)])
            }
            Command::SelectClassrooms { id } => {
                let classrooms = match id {
                    Some(id) => vec![engine.get_classroom(id).await?],
                    None => engine.list_classrooms().await,
                };
                Ok(vec![rows_response(classroom_schema(), classrooms, encode_classroom)])
            }
            Command::SelectReservations {
                id,
                classroom_id,
                window,
            } => {
                let mut reservations = match (classroom_id, window) {
                    (Some(cid), Some((start, end))) => {
                        engine.reservations_in_window(cid, start, end).await?
                    }
                    (Some(cid), None) => engine.list_reservations(cid).await?,
                    (None, _) => engine.list_all_reservations().await,
                };
                if let Some(id) = id {
                    reservations.retain(|r| r.id == id);
                }
                Ok(vec![rows_response(reservation_schema(), reservations, encode_reservation)])
            }
            Command::SelectPeriods { id, date } => {
                let mut periods = match date {
                    Some(date) => engine.period_containing(date).await.into_iter().collect(),
                    None => engine.list_periods().await,
                };
                if let Some(id) = id {
                    periods.retain(|p| p.id == id);
                }
                Ok(vec![rows_response(period_schema(), periods, encode_period)])
            }
            Command::SelectAuditLog { entity_id } => {
                let entries = engine.audit_log(entity_id).await;
                Ok(vec![rows_response(audit_schema(), entries, encode_audit)])
            }
            Command::SelectAvailability {
                classroom_id,
                start,
                end,
                min_duration,
            } => {
                let slots = engine
                    .free_slots(classroom_id, start, end, min_duration)
                    .await?;
                let cid = classroom_id.to_string();
                Ok(vec![rows_response(availability_schema(), slots, |encoder, slot| {
                    encoder.encode_field(&cid)?;
                    encoder.encode_field(&slot.start)?;
                    encoder.encode_field(&slot.end)
                })])
            }
        }
    }
}

fn row_to_draft(row: ReservationRow) -> ReservationDraft {
    ReservationDraft {
        classroom_id: row.classroom_id,
        user_id: row.user_id,
        span: Span {
            start: row.start,
            end: row.end,
        },
        course: row.course,
        description: row.description,
    }
}

fn execution(tag: &str, rows: usize) -> Response {
    Response::Execution(Tag::new(tag).with_rows(rows))
}

fn rows_response<T, F>(schema: Vec<FieldInfo>, items: Vec<T>, encode: F) -> Response
where
    F: Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
{
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

// ── Result schemas ───────────────────────────────────────────────

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn classroom_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("name"),
        int8("capacity"),
        int8("created_at"),
        int8("updated_at"),
    ]
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("classroom_id"),
        text("user_id"),
        int8("start"),
        int8("end"),
        text("course"),
        text("description"),
        int8("created_at"),
        int8("updated_at"),
    ]
}

fn request_schema() -> Vec<FieldInfo> {
    vec![
        int8("week"),
        int8("start"),
        int8("end"),
        text("reservation_id"),
        text("error_kind"),
        text("errors"),
    ]
}

fn period_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("name"),
        text("start_date"),
        text("end_date"),
        int8("created_at"),
        int8("updated_at"),
    ]
}

fn audit_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        int8("at"),
        text("actor"),
        text("action"),
        text("entity"),
        text("entity_id"),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![text("classroom_id"), int8("start"), int8("end")]
}

fn encode_classroom(encoder: &mut DataRowEncoder, c: ClassroomInfo) -> PgWireResult<()> {
    encoder.encode_field(&c.id.to_string())?;
    encoder.encode_field(&c.name)?;
    encoder.encode_field(&i64::from(c.capacity))?;
    encoder.encode_field(&c.created_at)?;
    encoder.encode_field(&c.updated_at)
}

fn encode_reservation(encoder: &mut DataRowEncoder, r: Reservation) -> PgWireResult<()> {
    encoder.encode_field(&r.id.to_string())?;
    encoder.encode_field(&r.classroom_id.to_string())?;
    encoder.encode_field(&r.user_id.to_string())?;
    encoder.encode_field(&r.span.start)?;
    encoder.encode_field(&r.span.end)?;
    encoder.encode_field(&r.course)?;
    encoder.encode_field(&r.description)?;
    encoder.encode_field(&r.created_at)?;
    encoder.encode_field(&r.updated_at)
}

fn encode_outcome(encoder: &mut DataRowEncoder, o: InstanceOutcome) -> PgWireResult<()> {
    encoder.encode_field(&i64::from(o.week))?;
    encoder.encode_field(&o.span.start)?;
    encoder.encode_field(&o.span.end)?;
    let (id, kind, errors) = match &o.result {
        Ok(r) => (Some(r.id.to_string()), None, None),
        Err(e) => (
            None,
            Some(e.kind().as_str().to_string()),
            Some(
                e.field_errors()
                    .map(|f| f.to_json())
                    .unwrap_or_else(|| e.to_string()),
            ),
        ),
    };
    encoder.encode_field(&id)?;
    encoder.encode_field(&kind)?;
    encoder.encode_field(&errors)
}

fn encode_period(encoder: &mut DataRowEncoder, p: AcademicPeriod) -> PgWireResult<()> {
    encoder.encode_field(&p.id.to_string())?;
    encoder.encode_field(&p.name)?;
    encoder.encode_field(&p.span.start.to_string())?;
    encoder.encode_field(&p.span.end.to_string())?;
    encoder.encode_field(&p.created_at)?;
    encoder.encode_field(&p.updated_at)
}

fn encode_audit(encoder: &mut DataRowEncoder, e: AuditEntry) -> PgWireResult<()> {
    encoder.encode_field(&e.id.to_string())?;
    encoder.encode_field(&e.at)?;
    encoder.encode_field(&e.actor)?;
    encoder.encode_field(&e.action.as_str())?;
    encoder.encode_field(&e.entity.as_str())?;
    encoder.encode_field(&e.entity_id.to_string())
}

/// Row description for a statement, inferred from its target table.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let normalized = sql
        .to_lowercase()
        .replace('"', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if normalized.starts_with("insert into reservation_requests") {
        return request_schema();
    }
    if !normalized.starts_with("select") {
        return vec![];
    }
    let tables: [(&str, fn() -> Vec<FieldInfo>); 5] = [
        ("availability", availability_schema),
        ("audit_log", audit_schema),
        ("periods", period_schema),
        ("reservations", reservation_schema),
        ("classrooms", classroom_schema),
    ];
    tables
        .into_iter()
        .find(|(table, _)| normalized.contains(&format!("from {table}")))
        .map(|(_, schema)| schema())
        .unwrap_or_default()
}

#[async_trait]
impl SimpleQueryHandler for ClassbookHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(client, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ClassbookQueryParser;

#[async_trait]
impl QueryParser for ClassbookQueryParser {
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
impl ExtendedQueryHandler for ClassbookHandler {
    type Statement = String;
    type QueryParser = ClassbookQueryParser;

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
        let sql = substitute_params(portal);
        self.run(client, &sql)
            .await?
            .pop()
            .ok_or_else(|| user_error("XX000", "statement produced no result".into()))
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

/// `$N` placeholders outside quoted literals and identifiers, as
/// `(byte range, N)` in statement order.
fn placeholders(sql: &str) -> Vec<(Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == b'$' => {
                let digits = i + 1;
                let mut j = digits;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                if let Ok(n) = sql[digits..j].parse::<usize>() {
                    found.push((i..j, n));
                    i = j;
                    continue;
                }
            }
            None => {}
        }
        i += 1;
    }
    found
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

/// Inline bound text parameters as quoted literals in one pass over the
/// statement, so text inside a bound value is never rescanned.
fn bind_params<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        out.push_str(&sql[copied..range.start]);
        match param {
            Some(bytes) => {
                out.push('\'');
                out.push_str(&String::from_utf8_lossy(bytes.as_ref()).replace('\'', "''"));
                out.push('\'');
            }
            None => out.push_str("NULL"),
        }
        copied = range.end;
    }
    out.push_str(&sql[copied..]);
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ClassbookFactory {
    handler: Arc<ClassbookHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<ClassbookAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl ClassbookFactory {
    pub fn new(registry: Arc<InstitutionRegistry>, password: String) -> Self {
        Self {
            handler: Arc::new(ClassbookHandler::new(registry)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                ClassbookAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ClassbookFactory {
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
    registry: Arc<InstitutionRegistry>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(ClassbookFactory::new(registry, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn sqlstate(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Validation => "22023",
        ErrorKind::Conflict => "23P01",
        ErrorKind::NotFound => "P0002",
        ErrorKind::AlreadyExists => "23505",
        ErrorKind::HasReservations => "23503",
        ErrorKind::LimitExceeded => "54000",
        ErrorKind::Internal => "58030",
    }
}

fn record_engine_error(label: &'static str, e: &EngineError) {
    match e.kind() {
        ErrorKind::Conflict => {
            metrics::counter!(observability::CONFLICTS_TOTAL, "command" => label).increment(1);
        }
        ErrorKind::Validation => {
            metrics::counter!(observability::VALIDATION_FAILURES_TOTAL, "command" => label)
                .increment(1);
        }
        ErrorKind::Internal => warn!("{label}: {e}"),
        _ => {}
    }
}

/// Field-level errors travel as JSON after the kind, e.g.
/// `conflict: {"startTime":"..."}`.
fn engine_message(e: &EngineError) -> String {
    match e.field_errors() {
        Some(fields) => format!("{}: {}", e.kind().as_str(), fields.to_json()),
        None => e.to_string(),
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(e.kind()), engine_message(&e))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Field, FieldErrors};
    use ulid::Ulid;

    #[test]
    fn conflict_carries_field_json() {
        let mut fields = FieldErrors::new();
        fields.insert(Field::StartTime, "taken");
        let err = EngineError::Conflict(fields);
        assert_eq!(sqlstate(err.kind()), "23P01");
        assert_eq!(engine_message(&err), r#"conflict: {"startTime":"taken"}"#);
    }

    #[test]
    fn sqlstate_per_kind() {
        let id = Ulid::new();
        let cases = [
            (EngineError::validation(Field::Course, "required"), "22023"),
            (EngineError::NotFound(id), "P0002"),
            (EngineError::AlreadyExists(id), "23505"),
            (EngineError::HasReservations(id), "23503"),
            (EngineError::LimitExceeded("too many"), "54000"),
            (EngineError::WalError("disk".into()), "58030"),
        ];
        for (err, code) in cases {
            assert_eq!(sqlstate(err.kind()), code);
        }
    }

    #[test]
    fn params_counted_by_highest_index() {
        assert_eq!(count_params("SELECT * FROM classrooms"), 0);
        assert_eq!(count_params("UPDATE periods SET name = $2 WHERE id = $1"), 2);
        assert_eq!(count_params("VALUES ($1, $10, $3)"), 10);
        assert_eq!(count_params("SELECT '$' FROM x"), 0);
    }

    #[test]
    fn params_bound_in_one_pass() {
        let sql = "INSERT INTO classrooms VALUES ($1, $2, $10)";
        let mut params: Vec<Option<&[u8]>> = vec![None; 10];
        params[0] = Some(b"$2 and $10".as_slice());
        params[1] = Some(b"O'Neil".as_slice());
        params[9] = Some(b"30".as_slice());
        assert_eq!(
            bind_params(sql, &params),
            "INSERT INTO classrooms VALUES ('$2 and $10', 'O''Neil', '30')"
        );
    }

    #[test]
    fn quoted_dollars_left_alone() {
        let params = [Some(b"x".as_slice())];
        assert_eq!(
            bind_params("SELECT '$1', \"$1\" FROM t WHERE id = $1", &params),
            "SELECT '$1', \"$1\" FROM t WHERE id = 'x'"
        );
        assert_eq!(count_params("SELECT '$3' FROM t WHERE id = $1"), 1);
        let none: [Option<&[u8]>; 1] = [None];
        assert_eq!(bind_params("DELETE FROM t WHERE id = $1", &none), "DELETE FROM t WHERE id = NULL");
    }

    #[test]
    fn schema_follows_target_table() {
        assert_eq!(result_schema("SELECT * FROM availability WHERE classroom_id = $1").len(), 3);
        assert_eq!(result_schema("select *\n  from  \"reservations\"").len(), 9);
        assert_eq!(result_schema("SELECT * FROM audit_log").len(), 6);
        assert_eq!(
            result_schema("INSERT INTO reservation_requests VALUES ($1)")[0].name(),
            "week"
        );
        assert!(result_schema("INSERT INTO reservations VALUES ($1)").is_empty());
    }
}
