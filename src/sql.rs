use chrono::{DateTime, NaiveDate};
use sqlparser::ast::{
    self, Assignment, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr,
    Statement, TableFactor, TableObject, TableWithJoins, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::ReservationForm;
use crate::model::*;

/// Tables exposed over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Classrooms,
    Reservations,
    ReservationRequests,
    Periods,
    AuditLog,
    Availability,
}

impl Table {
    fn from_name(name: String) -> Result<Self, SqlError> {
        match name.as_str() {
            "classrooms" => Ok(Table::Classrooms),
            "reservations" => Ok(Table::Reservations),
            "reservation_requests" => Ok(Table::ReservationRequests),
            "periods" => Ok(Table::Periods),
            "audit_log" => Ok(Table::AuditLog),
            "availability" => Ok(Table::Availability),
            _ => Err(SqlError::UnknownTable(name)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Classrooms => "classrooms",
            Table::Reservations => "reservations",
            Table::ReservationRequests => "reservation_requests",
            Table::Periods => "periods",
            Table::AuditLog => "audit_log",
            Table::Availability => "availability",
        }
    }

    /// Writable columns, in positional order for column-less INSERTs.
    fn columns(&self) -> &'static [&'static str] {
        match self {
            Table::Classrooms => &["id", "name", "capacity"],
            Table::Reservations => &[
                "id",
                "classroom_id",
                "user_id",
                "start",
                "end",
                "course",
                "description",
            ],
            Table::ReservationRequests => &[
                "classroom_id",
                "user_id",
                "date",
                "start_hour",
                "end_hour",
                "utc_offset",
                "repeat_on_weeks",
                "course",
                "description",
                "atomic",
            ],
            Table::Periods => &["id", "name", "start_date", "end_date"],
            Table::AuditLog | Table::Availability => &[],
        }
    }

    /// Columns accepted in a SELECT's WHERE clause.
    fn filter_columns(&self) -> &'static [&'static str] {
        match self {
            Table::Classrooms => &["id"],
            Table::Reservations => &["id", "classroom_id", "start", "end"],
            Table::Periods => &["id", "date"],
            Table::AuditLog => &["entity_id"],
            Table::Availability => &["classroom_id", "start", "end", "min_duration"],
            Table::ReservationRequests => &[],
        }
    }
}

/// One row of `INSERT INTO reservations`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservationRow {
    pub id: Ulid,
    pub classroom_id: Ulid,
    pub user_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub course: String,
    pub description: Option<String>,
}

/// `UPDATE reservations SET ...`; unset columns keep their current value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReservationChanges {
    pub classroom_id: Option<Ulid>,
    pub user_id: Option<Ulid>,
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    pub course: Option<String>,
    /// `Some(None)` clears the description.
    pub description: Option<Option<String>>,
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertClassroom {
        id: Ulid,
        name: String,
        capacity: u32,
    },
    UpdateClassroom {
        id: Ulid,
        name: Option<String>,
        capacity: Option<u32>,
    },
    DeleteClassroom {
        id: Ulid,
    },
    InsertReservation {
        row: ReservationRow,
    },
    /// All rows commit or none do.
    BatchInsertReservations {
        rows: Vec<ReservationRow>,
    },
    UpdateReservation {
        id: Ulid,
        changes: ReservationChanges,
    },
    DeleteReservation {
        id: Ulid,
    },
    RequestReservations {
        form: ReservationForm,
        atomic: bool,
    },
    InsertPeriod {
        id: Ulid,
        name: String,
        start_date: NaiveDate,
        end_date: NaiveDate,
    },
    UpdatePeriod {
        id: Ulid,
        name: Option<String>,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    },
    DeletePeriod {
        id: Ulid,
    },
    SelectClassrooms {
        id: Option<Ulid>,
    },
    SelectReservations {
        id: Option<Ulid>,
        classroom_id: Option<Ulid>,
        /// `(start, end)` window; requires `classroom_id`.
        window: Option<(Ms, Ms)>,
    },
    SelectPeriods {
        id: Option<Ulid>,
        /// Period containing this date.
        date: Option<NaiveDate>,
    },
    SelectAuditLog {
        entity_id: Option<Ulid>,
    },
    SelectAvailability {
        classroom_id: Ulid,
        start: Ms,
        end: Ms,
        min_duration: Option<Ms>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// Cells of one row keyed by lowercase column name.
struct Row<'a> {
    table: Table,
    cells: Vec<(String, &'a Expr)>,
}

impl<'a> Row<'a> {
    fn get(&self, column: &str) -> Option<&'a Expr> {
        self.cells
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, e)| *e)
    }

    fn require(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column)
            .ok_or(SqlError::MissingColumn(self.table.as_str(), column))
    }

    fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

fn check_columns<'c>(table: Table, columns: impl IntoIterator<Item = &'c String>) -> Result<(), SqlError> {
    for column in columns {
        if !table.columns().contains(&column.as_str()) {
            return Err(SqlError::UnknownColumn(table.as_str(), column.clone()));
        }
    }
    Ok(())
}

/// Rows of an INSERT keyed by column. Without an explicit column list, values
/// map onto the table's columns in order and trailing columns may be omitted.
fn insert_rows<'a>(insert: &'a ast::Insert, table: Table) -> Result<Vec<Row<'a>>, SqlError> {
    let explicit = !insert.columns.is_empty();
    let columns: Vec<String> = if explicit {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    } else {
        table.columns().iter().map(|c| c.to_string()).collect()
    };
    check_columns(table, &columns)?;

    insert_values(insert)?
        .iter()
        .map(|values| {
            if values.len() > columns.len() || (explicit && values.len() != columns.len()) {
                return Err(SqlError::WrongArity(table.as_str(), columns.len(), values.len()));
            }
            Ok(Row {
                table,
                cells: columns.iter().cloned().zip(values.iter()).collect(),
            })
        })
        .collect()
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = Table::from_name(insert_table_name(insert)?)?;
    let rows = insert_rows(insert, table)?;

    match table {
        Table::Classrooms => {
            let row = single_row(table, &rows)?;
            Ok(Command::InsertClassroom {
                id: parse_ulid_expr(row.require("id")?)?,
                name: parse_text(row.require("name")?)?,
                capacity: parse_u32(row.require("capacity")?)?,
            })
        }
        Table::Reservations => {
            let mut parsed = rows
                .iter()
                .enumerate()
                .map(|(i, row)| {
                    reservation_row(row).map_err(|e| match rows.len() {
                        1 => e,
                        _ => SqlError::Parse(format!("row {i}: {e}")),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            match parsed.len() {
                1 => Ok(Command::InsertReservation {
                    row: parsed.remove(0),
                }),
                _ => Ok(Command::BatchInsertReservations { rows: parsed }),
            }
        }
        Table::ReservationRequests => {
            let row = single_row(table, &rows)?;
            let form = ReservationForm {
                classroom_id: parse_text(row.require("classroom_id")?)?,
                user_id: parse_text(row.require("user_id")?)?,
                date: parse_text(row.require("date")?)?,
                start_hour: parse_text(row.require("start_hour")?)?,
                end_hour: parse_text(row.require("end_hour")?)?,
                utc_offset: row.get("utc_offset").map(parse_text_or_null).transpose()?.flatten(),
                repeat_on_weeks: row
                    .get("repeat_on_weeks")
                    .map(parse_week_list)
                    .transpose()?
                    .unwrap_or_default(),
                course: parse_text(row.require("course")?)?,
                description: row.get("description").map(parse_text_or_null).transpose()?.flatten(),
            };
            let atomic = row.get("atomic").map(parse_bool).transpose()?.unwrap_or(false);
            Ok(Command::RequestReservations { form, atomic })
        }
        Table::Periods => {
            let row = single_row(table, &rows)?;
            Ok(Command::InsertPeriod {
                id: parse_ulid_expr(row.require("id")?)?,
                name: parse_text(row.require("name")?)?,
                start_date: parse_date(row.require("start_date")?)?,
                end_date: parse_date(row.require("end_date")?)?,
            })
        }
        Table::AuditLog | Table::Availability => {
            Err(SqlError::Unsupported(format!("INSERT INTO {}", table.as_str())))
        }
    }
}

fn single_row<'r, 'a>(table: Table, rows: &'r [Row<'a>]) -> Result<&'r Row<'a>, SqlError> {
    match rows {
        [row] => Ok(row),
        _ => Err(SqlError::Unsupported(format!(
            "multi-row INSERT INTO {}",
            table.as_str()
        ))),
    }
}

fn reservation_row(row: &Row<'_>) -> Result<ReservationRow, SqlError> {
    Ok(ReservationRow {
        id: parse_ulid_expr(row.require("id")?)?,
        classroom_id: parse_ulid_expr(row.require("classroom_id")?)?,
        user_id: parse_ulid_expr(row.require("user_id")?)?,
        start: parse_instant(row.require("start")?)?,
        end: parse_instant(row.require("end")?)?,
        course: parse_text(row.require("course")?)?,
        description: row.get("description").map(parse_text_or_null).transpose()?.flatten(),
    })
}

// ── UPDATE / DELETE ───────────────────────────────────────────

fn parse_update(
    target: &TableWithJoins,
    assignments: &[Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = Table::from_name(table_factor_name(&target.relation)?)?;
    let id = extract_where_id(selection)?;

    let mut cells = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => {
                object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))?
            }
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        if column == "id" {
            return Err(SqlError::Unsupported("changing id".into()));
        }
        cells.push((column, &assignment.value));
    }
    check_columns(table, cells.iter().map(|(c, _)| c))?;
    let set = Row { table, cells };
    if set.is_empty() {
        return Err(SqlError::Parse("UPDATE without SET".into()));
    }

    match table {
        Table::Classrooms => Ok(Command::UpdateClassroom {
            id,
            name: set.get("name").map(parse_text).transpose()?,
            capacity: set.get("capacity").map(parse_u32).transpose()?,
        }),
        Table::Reservations => Ok(Command::UpdateReservation {
            id,
            changes: ReservationChanges {
                classroom_id: set.get("classroom_id").map(parse_ulid_expr).transpose()?,
                user_id: set.get("user_id").map(parse_ulid_expr).transpose()?,
                start: set.get("start").map(parse_instant).transpose()?,
                end: set.get("end").map(parse_instant).transpose()?,
                course: set.get("course").map(parse_text).transpose()?,
                description: set.get("description").map(parse_text_or_null).transpose()?,
            },
        }),
        Table::Periods => Ok(Command::UpdatePeriod {
            id,
            name: set.get("name").map(parse_text).transpose()?,
            start_date: set.get("start_date").map(parse_date).transpose()?,
            end_date: set.get("end_date").map(parse_date).transpose()?,
        }),
        other => Err(SqlError::Unsupported(format!("UPDATE {}", other.as_str()))),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = Table::from_name(delete_table_name(delete)?)?;
    let id = extract_where_id(&delete.selection)?;

    match table {
        Table::Classrooms => Ok(Command::DeleteClassroom { id }),
        Table::Reservations => Ok(Command::DeleteReservation { id }),
        Table::Periods => Ok(Command::DeletePeriod { id }),
        other => Err(SqlError::Unsupported(format!("DELETE FROM {}", other.as_str()))),
    }
}

// ── SELECT ────────────────────────────────────────────────────

/// `column op value` conditions of a conjunctive WHERE clause.
struct Filters<'a>(Vec<(String, &'a BinaryOperator, &'a Expr)>);

impl<'a> Filters<'a> {
    fn collect(table: Table, selection: Option<&'a Expr>) -> Result<Self, SqlError> {
        let mut out = Vec::new();
        if let Some(expr) = selection {
            flatten_and(expr, &mut out)?;
        }
        for (column, _, _) in &out {
            if !table.filter_columns().contains(&column.as_str()) {
                return Err(SqlError::UnknownColumn(table.as_str(), column.clone()));
            }
        }
        Ok(Self(out))
    }

    fn find(&self, column: &str, op: BinaryOperator) -> Option<&'a Expr> {
        self.0
            .iter()
            .find(|(c, o, _)| c == column && **o == op)
            .map(|(_, _, e)| *e)
    }

    fn eq(&self, column: &str) -> Option<&'a Expr> {
        self.find(column, BinaryOperator::Eq)
    }
}

fn flatten_and<'a>(
    expr: &'a Expr,
    out: &mut Vec<(String, &'a BinaryOperator, &'a Expr)>,
) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            flatten_and(left, out)?;
            flatten_and(right, out)
        }
        Expr::BinaryOp { left, op, right } => {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push((column, op, right));
            Ok(())
        }
        Expr::Nested(inner) => flatten_and(inner, out),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = Table::from_name(table_factor_name(&from.relation)?)?;
    let filters = Filters::collect(table, select.selection.as_ref())?;
    let ulid_eq = |column: &str| filters.eq(column).map(parse_ulid_expr).transpose();

    match table {
        Table::Classrooms => Ok(Command::SelectClassrooms { id: ulid_eq("id")? }),
        Table::Reservations => {
            let classroom_id = ulid_eq("classroom_id")?;
            let start = filters.find("start", BinaryOperator::GtEq).map(parse_instant).transpose()?;
            let end = filters.find("end", BinaryOperator::LtEq).map(parse_instant).transpose()?;
            let window = match (start, end) {
                (None, None) => None,
                (Some(start), Some(end)) => {
                    if classroom_id.is_none() {
                        return Err(SqlError::MissingFilter("classroom_id"));
                    }
                    Some((start, end))
                }
                (None, Some(_)) => return Err(SqlError::MissingFilter("start")),
                (Some(_), None) => return Err(SqlError::MissingFilter("end")),
            };
            Ok(Command::SelectReservations {
                id: ulid_eq("id")?,
                classroom_id,
                window,
            })
        }
        Table::Periods => Ok(Command::SelectPeriods {
            id: ulid_eq("id")?,
            date: filters.eq("date").map(parse_date).transpose()?,
        }),
        Table::AuditLog => Ok(Command::SelectAuditLog {
            entity_id: ulid_eq("entity_id")?,
        }),
        Table::Availability => Ok(Command::SelectAvailability {
            classroom_id: ulid_eq("classroom_id")?.ok_or(SqlError::MissingFilter("classroom_id"))?,
            start: filters
                .find("start", BinaryOperator::GtEq)
                .map(parse_instant)
                .transpose()?
                .ok_or(SqlError::MissingFilter("start"))?,
            end: filters
                .find("end", BinaryOperator::LtEq)
                .map(parse_instant)
                .transpose()?
                .ok_or(SqlError::MissingFilter("end"))?,
            min_duration: filters.eq("min_duration").map(parse_i64_expr).transpose()?,
        }),
        Table::ReservationRequests => Err(SqlError::Unsupported(
            "SELECT FROM reservation_requests".into(),
        )),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn insert_values(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let source = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match source.body.as_ref() {
        SetExpr::Values(values) if values.rows.is_empty() => {
            Err(SqlError::Parse("empty VALUES".into()))
        }
        SetExpr::Values(values) => Ok(&values.rows),
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    match selection {
        Some(Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        }) if expr_column_name(left).as_deref() == Some("id") => parse_ulid_expr(right),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64_expr(expr)?);
    }
    match extract_value(expr) {
        Some(Value::Number(s, _) | Value::SingleQuotedString(s)) => s
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

/// Unix milliseconds, or an RFC 3339 timestamp string.
fn parse_instant(expr: &Expr) -> Result<Ms, SqlError> {
    if let Some(Value::SingleQuotedString(s)) = extract_value(expr)
        && s.parse::<i64>().is_err()
    {
        return DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.timestamp_millis())
            .map_err(|e| SqlError::Parse(format!("bad timestamp {s:?}: {e}")));
    }
    parse_i64_expr(expr)
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_text(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        Ok(None)
    } else {
        parse_text(expr).map(Some)
    }
}

/// `'1,3'`, `ARRAY[1, 3]` or NULL, flattened to the comma form.
fn parse_week_list(expr: &Expr) -> Result<String, SqlError> {
    match expr {
        Expr::Array(array) => array
            .elem
            .iter()
            .map(parse_text)
            .collect::<Result<Vec<_>, _>>()
            .map(|weeks| weeks.join(",")),
        _ => Ok(parse_text_or_null(expr)?.unwrap_or_default()),
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::Null) => Ok(false),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str, &'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected at most {expected} values, got {got}")
            }
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing column {c}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
