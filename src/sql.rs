use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement,
    TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertReservation {
        new: NewReservation,
    },
    UpdateReservation {
        id: Ulid,
        patch: ReservationPatch,
    },
    DeleteReservation {
        id: Ulid,
    },
    SelectReservations {
        filter: ReservationFilter,
    },
    SelectAvailability {
        space_type: String,
        start: NaiveDate,
        end: NaiveDate,
    },
    /// Occupancy on one day, today when `date` is absent.
    SelectSpaceAvailability {
        space_type: Option<String>,
        date: Option<NaiveDate>,
    },
    SelectSpaces,
    SelectClientStats {
        email: Option<String>,
    },
    ApplyReservationRules,
    ReapCashReservations,
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
        } => parse_update(&table.relation, assignments, selection.as_ref()),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        Statement::Call(func) => parse_call(&func.name),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    if table != "reservations" {
        return Err(SqlError::UnknownTable(table));
    }
    if insert.columns.is_empty() {
        return Err(SqlError::Parse(
            "INSERT INTO reservations needs an explicit column list".into(),
        ));
    }
    let values = extract_insert_values(insert)?;
    if values.len() != insert.columns.len() {
        return Err(SqlError::WrongArity(
            "reservations",
            insert.columns.len(),
            values.len(),
        ));
    }

    let mut row = InsertRow::default();
    for (col, expr) in insert.columns.iter().zip(&values) {
        row.set(&col.value.to_lowercase(), expr)?;
    }
    Ok(Command::InsertReservation { new: row.finish()? })
}

/// Column values of one `INSERT INTO reservations` row, collected by name.
#[derive(Default)]
struct InsertRow {
    id: Option<Ulid>,
    space_type: Option<SpaceType>,
    occupants: Option<u32>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    payment_method: Option<PaymentMethod>,
    subscription_type: Option<SubscriptionType>,
    amount: Option<i64>,
    status: Option<ReservationStatus>,
    admin_notes: Option<String>,
    contact: Contact,
    has_name: bool,
    has_email: bool,
}

impl InsertRow {
    fn set(&mut self, col: &str, expr: &Expr) -> Result<(), SqlError> {
        match col {
            "id" => self.id = parse_ulid_or_null(expr)?,
            "space_type" => self.space_type = Some(parse_enum(expr, "space_type")?),
            "occupants" => self.occupants = Some(parse_u32(expr)?),
            "start_date" => self.start_date = Some(parse_date(expr)?),
            "end_date" => self.end_date = Some(parse_date(expr)?),
            "payment_method" => self.payment_method = Some(parse_enum(expr, "payment_method")?),
            "subscription_type" => {
                self.subscription_type = Some(parse_enum(expr, "subscription_type")?)
            }
            "amount" => self.amount = parse_i64_or_null(expr)?,
            "status" => self.status = Some(parse_enum(expr, "status")?),
            "admin_notes" => self.admin_notes = parse_string_or_null(expr)?,
            "full_name" => {
                self.contact.full_name = parse_string(expr)?;
                self.has_name = true;
            }
            "email" => {
                self.contact.email = parse_string(expr)?.trim().to_string();
                self.has_email = true;
            }
            "phone" => self.contact.phone = parse_string(expr)?,
            "company" => self.contact.company = parse_string_or_null(expr)?,
            "activity" => self.contact.activity = parse_string_or_null(expr)?,
            "address" => self.contact.address = parse_string_or_null(expr)?,
            other => return Err(SqlError::UnknownColumn(other.to_string())),
        }
        Ok(())
    }

    fn finish(self) -> Result<NewReservation, SqlError> {
        if !self.has_name {
            return Err(SqlError::MissingColumn("full_name"));
        }
        if !self.has_email {
            return Err(SqlError::MissingColumn("email"));
        }
        Ok(NewReservation {
            id: self.id,
            space_type: self.space_type.ok_or(SqlError::MissingColumn("space_type"))?,
            occupants: self.occupants.unwrap_or(1),
            start_date: self.start_date.ok_or(SqlError::MissingColumn("start_date"))?,
            end_date: self.end_date.ok_or(SqlError::MissingColumn("end_date"))?,
            payment_method: self
                .payment_method
                .ok_or(SqlError::MissingColumn("payment_method"))?,
            subscription_type: self
                .subscription_type
                .ok_or(SqlError::MissingColumn("subscription_type"))?,
            contact: self.contact,
            amount: self.amount,
            status: self.status,
            admin_notes: self.admin_notes,
        })
    }
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: Option<&Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    if table != "reservations" {
        return Err(SqlError::UnknownTable(table));
    }

    let mut patch = ReservationPatch::default();
    for assignment in assignments {
        let col = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        let expr = &assignment.value;
        match col.as_str() {
            "status" => patch.status = Some(parse_enum(expr, "status")?),
            "start_date" => patch.start_date = Some(parse_date(expr)?),
            "end_date" => patch.end_date = Some(parse_date(expr)?),
            "occupants" => patch.occupants = Some(parse_u32(expr)?),
            "amount" => patch.amount = Some(parse_i64_expr(expr)?),
            "payment_method" => patch.payment_method = Some(parse_enum(expr, "payment_method")?),
            "subscription_type" => {
                patch.subscription_type = Some(parse_enum(expr, "subscription_type")?)
            }
            "admin_notes" => patch.admin_notes = Some(parse_string(expr)?),
            other => return Err(SqlError::UnknownColumn(other.to_string())),
        }
    }

    let mut id = None;
    for (col, op, value) in conjuncts(selection)? {
        match (col.as_str(), op) {
            ("id", BinaryOperator::Eq) => id = Some(parse_ulid_expr(value)?),
            ("status", BinaryOperator::Eq) => {
                patch.expected_status = Some(parse_enum(value, "status")?)
            }
            _ => return Err(SqlError::UnsupportedFilter(col)),
        }
    }
    Ok(Command::UpdateReservation {
        id: id.ok_or(SqlError::MissingFilter("id"))?,
        patch,
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "reservations" {
        return Err(SqlError::UnknownTable(table));
    }
    let id = extract_where_id(delete.selection.as_ref())?;
    Ok(Command::DeleteReservation { id })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filters = conjuncts(select.selection.as_ref())?;

    match table.as_str() {
        "reservations" => parse_reservation_filter(filters),
        "availability" => {
            let (mut space_type, mut start, mut end) = (None, None, None);
            for (col, op, value) in filters {
                match (col.as_str(), op) {
                    ("space_type", BinaryOperator::Eq) => space_type = Some(parse_string(value)?),
                    ("start_date", BinaryOperator::Eq | BinaryOperator::GtEq) => {
                        start = Some(parse_date(value)?)
                    }
                    ("end_date", BinaryOperator::Eq | BinaryOperator::LtEq) => {
                        end = Some(parse_date(value)?)
                    }
                    _ => return Err(SqlError::UnsupportedFilter(col)),
                }
            }
            Ok(Command::SelectAvailability {
                space_type: space_type.ok_or(SqlError::MissingFilter("space_type"))?,
                start: start.ok_or(SqlError::MissingFilter("start_date"))?,
                end: end.ok_or(SqlError::MissingFilter("end_date"))?,
            })
        }
        "space_availability" => {
            let (mut space_type, mut date) = (None, None);
            for (col, op, value) in filters {
                match (col.as_str(), op) {
                    ("space_type", BinaryOperator::Eq) => space_type = Some(parse_string(value)?),
                    ("date", BinaryOperator::Eq) => date = Some(parse_date(value)?),
                    _ => return Err(SqlError::UnsupportedFilter(col)),
                }
            }
            Ok(Command::SelectSpaceAvailability { space_type, date })
        }
        "spaces" => {
            if let Some((col, ..)) = filters.into_iter().next() {
                return Err(SqlError::UnsupportedFilter(col));
            }
            Ok(Command::SelectSpaces)
        }
        "client_stats" => {
            let mut email = None;
            for (col, op, value) in filters {
                match (col.as_str(), op) {
                    ("email", BinaryOperator::Eq) => email = Some(parse_string(value)?),
                    _ => return Err(SqlError::UnsupportedFilter(col)),
                }
            }
            Ok(Command::SelectClientStats { email })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_reservation_filter(filters: Vec<(String, BinaryOperator, &Expr)>) -> Result<Command, SqlError> {
    let mut filter = ReservationFilter::all();
    for (col, op, value) in filters {
        filter = match (col.as_str(), op) {
            ("space_type", BinaryOperator::Eq) => filter.space_type(parse_enum(value, "space_type")?),
            ("status", BinaryOperator::Eq) => filter.status(parse_enum(value, "status")?),
            ("status", BinaryOperator::NotEq) => filter.not_status(parse_enum(value, "status")?),
            ("payment_method", BinaryOperator::Eq) => {
                filter.payment_method(parse_enum(value, "payment_method")?)
            }
            ("email", BinaryOperator::Eq) => filter.email(parse_string(value)?),
            ("created_at", BinaryOperator::Lt) => filter.created_before(parse_timestamp(value)?),
            ("end_date", BinaryOperator::LtEq) => filter.end_on_or_before(parse_date(value)?),
            _ => return Err(SqlError::UnsupportedFilter(col)),
        };
    }
    Ok(Command::SelectReservations { filter })
}

fn parse_call(name: &ast::ObjectName) -> Result<Command, SqlError> {
    let procedure = object_name_last(name).ok_or_else(|| SqlError::Parse("empty procedure".into()))?;
    match procedure.as_str() {
        "apply_reservation_rules" => Ok(Command::ApplyReservationRules),
        "reap_cash_reservations" => Ok(Command::ReapCashReservations),
        _ => Err(SqlError::UnknownProcedure(procedure)),
    }
}

// ── Helpers ───────────────────────────────────────────────────

/// Flatten `a = 1 AND b <= 2 AND ...` into `(column, op, value)` triples.
fn conjuncts(selection: Option<&Expr>) -> Result<Vec<(String, BinaryOperator, &Expr)>, SqlError> {
    let mut out = Vec::new();
    if let Some(expr) = selection {
        collect_conjuncts(expr, &mut out)?;
    }
    Ok(out)
}

fn collect_conjuncts<'a>(
    expr: &'a Expr,
    out: &mut Vec<(String, BinaryOperator, &'a Expr)>,
) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_conjuncts(inner, out),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_conjuncts(left, out)?;
            collect_conjuncts(right, out)
        }
        Expr::BinaryOp { left, op, right } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Parse(format!("expected column on the left of {op}")))?;
            out.push((col, op.clone(), right.as_ref()));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
    }
}

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
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
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

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            rows => Err(SqlError::Unsupported(format!(
                "multi-row INSERT ({} rows); insert reservations one at a time",
                rows.len()
            ))),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: Option<&Expr>) -> Result<Ulid, SqlError> {
    let mut id = None;
    for (col, op, value) in conjuncts(selection)? {
        match (col.as_str(), op) {
            ("id", BinaryOperator::Eq) => id = Some(parse_ulid_expr(value)?),
            _ => return Err(SqlError::UnsupportedFilter(col)),
        }
    }
    id.ok_or(SqlError::MissingFilter("id"))
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

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string(expr).map(Some),
    }
}

fn parse_enum<T>(expr: &Expr, column: &'static str) -> Result<T, SqlError>
where
    T: std::str::FromStr<Err = ParseEnumError>,
{
    parse_string(expr)?
        .parse()
        .map_err(|e: ParseEnumError| SqlError::BadValue(column, e.to_string()))
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

/// RFC 3339, or `YYYY-MM-DD HH:MM:SS` read as UTC.
fn parse_timestamp(expr: &Expr) -> Result<DateTime<Utc>, SqlError> {
    let s = parse_string(expr)?;
    let s = s.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|t| t.and_utc())
        .map_err(|e| SqlError::Parse(format!("bad timestamp {s:?}: {e}")))
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_ulid_expr(expr).map(Some),
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_i64_expr(expr).map(Some),
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    UnknownProcedure(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
    UnsupportedFilter(String),
    BadValue(&'static str, String),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::UnknownProcedure(p) => write!(f, "unknown procedure: {p}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::UnsupportedFilter(col) => write!(f, "unsupported filter on {col}"),
            SqlError::BadValue(col, msg) => write!(f, "bad value for {col}: {msg}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{day, instant};

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    #[test]
    fn parse_insert_reservation_by_column_name() {
        let sql = "INSERT INTO reservations \
            (email, full_name, phone, space_type, start_date, end_date, payment_method, subscription_type, occupants, company) \
            VALUES ('awa@example.com', 'Awa Koné', '+225 07', 'bureau-prive', '2024-03-01', '2024-03-05', 'especes', 'daily', 2, NULL)";
        let cmd = parse_sql(sql).unwrap();
        match cmd {
            Command::InsertReservation { new } => {
                assert_eq!(new.space_type, SpaceType::PrivateOffice);
                assert_eq!(new.start_date, day("2024-03-01"));
                assert_eq!(new.end_date, day("2024-03-05"));
                assert_eq!(new.payment_method, PaymentMethod::Cash);
                assert_eq!(new.subscription_type, SubscriptionType::Daily);
                assert_eq!(new.occupants, 2);
                assert_eq!(new.contact.full_name, "Awa Koné");
                assert_eq!(new.contact.company, None);
                assert_eq!(new.id, None);
                assert_eq!(new.amount, None);
                assert_eq!(new.status, None);
            }
            _ => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_with_id_amount_status() {
        let sql = format!(
            "INSERT INTO reservations (id, email, full_name, phone, space_type, start_date, end_date, \
             payment_method, subscription_type, amount, status) VALUES ('{ID}', 'a@b.c', 'A', '1', \
             'coworking', '2024-03-01', '2024-03-02', 'wave', 'daily', 7500, 'confirmed')"
        );
        let Command::InsertReservation { new } = parse_sql(&sql).unwrap() else {
            panic!("expected InsertReservation");
        };
        assert_eq!(new.id.unwrap().to_string(), ID);
        assert_eq!(new.amount, Some(7500));
        assert_eq!(new.status, Some(ReservationStatus::Confirmed));
        assert_eq!(new.occupants, 1);
    }

    #[test]
    fn parse_insert_missing_column() {
        let sql = "INSERT INTO reservations (email, full_name, phone, start_date, end_date, payment_method, subscription_type) \
                   VALUES ('a@b.c', 'A', '1', '2024-03-01', '2024-03-02', 'cash', 'daily')";
        assert!(matches!(
            parse_sql(sql),
            Err(SqlError::MissingColumn("space_type"))
        ));
    }

    #[test]
    fn parse_insert_unknown_column_and_arity() {
        let sql = "INSERT INTO reservations (email, colour) VALUES ('a@b.c', 'red')";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownColumn(c)) if c == "colour"));
        let sql = "INSERT INTO reservations (email, full_name) VALUES ('a@b.c')";
        assert!(matches!(
            parse_sql(sql),
            Err(SqlError::WrongArity("reservations", 2, 1))
        ));
    }

    #[test]
    fn parse_insert_bad_enum_value() {
        let sql = "INSERT INTO reservations (email, full_name, phone, space_type, start_date, end_date, payment_method, subscription_type) \
                   VALUES ('a@b.c', 'A', '1', 'salle', '2024-03-01', '2024-03-02', 'cash', 'daily')";
        assert!(matches!(parse_sql(sql), Err(SqlError::BadValue("space_type", _))));
    }

    #[test]
    fn parse_update_with_compare_and_set() {
        let sql = format!(
            "UPDATE reservations SET status = 'confirmed', admin_notes = 'paid at desk' \
             WHERE id = '{ID}' AND status = 'pending'"
        );
        match parse_sql(&sql).unwrap() {
            Command::UpdateReservation { id, patch } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(patch.expected_status, Some(ReservationStatus::Pending));
                assert_eq!(patch.status, Some(ReservationStatus::Confirmed));
                assert_eq!(patch.admin_notes.as_deref(), Some("paid at desk"));
            }
            other => panic!("expected UpdateReservation, got {other:?}"),
        }
    }

    #[test]
    fn parse_update_dates_without_cas() {
        let sql = format!(
            "UPDATE reservations SET start_date = '2024-05-01', end_date = '2024-05-03', occupants = 3 WHERE id = '{ID}'"
        );
        let Command::UpdateReservation { patch, .. } = parse_sql(&sql).unwrap() else {
            panic!("expected UpdateReservation");
        };
        assert_eq!(patch.expected_status, None);
        assert_eq!(patch.start_date, Some(day("2024-05-01")));
        assert_eq!(patch.end_date, Some(day("2024-05-03")));
        assert_eq!(patch.occupants, Some(3));
    }

    #[test]
    fn parse_update_requires_id() {
        let sql = "UPDATE reservations SET status = 'cancelled' WHERE status = 'pending'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn parse_delete_reservation() {
        let sql = format!("DELETE FROM reservations WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::DeleteReservation { id } => assert_eq!(id.to_string(), ID),
            other => panic!("expected DeleteReservation, got {other:?}"),
        }
    }

    #[test]
    fn parse_select_reservations_filters() {
        let sql = "SELECT * FROM reservations WHERE payment_method = 'cash' AND status = 'pending' \
                   AND created_at < '2024-03-05T00:00:00Z' AND end_date <= '2024-04-01'";
        let Command::SelectReservations { filter } = parse_sql(sql).unwrap() else {
            panic!("expected SelectReservations");
        };
        assert_eq!(filter.payment_method, Some(PaymentMethod::Cash));
        assert_eq!(filter.statuses, Some(vec![ReservationStatus::Pending]));
        assert_eq!(filter.created_before, Some(instant("2024-03-05T00:00:00Z")));
        assert_eq!(filter.end_on_or_before, Some(day("2024-04-01")));
    }

    #[test]
    fn parse_select_all_reservations() {
        let cmd = parse_sql("SELECT * FROM reservations").unwrap();
        assert_eq!(
            cmd,
            Command::SelectReservations {
                filter: ReservationFilter::all()
            }
        );
    }

    #[test]
    fn parse_select_availability() {
        let sql = "SELECT * FROM availability WHERE space_type = 'coworking' \
                   AND start_date = '2024-04-01' AND end_date = '2024-04-03'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectAvailability {
                space_type: "coworking".into(),
                start: day("2024-04-01"),
                end: day("2024-04-03"),
            }
        );
    }

    #[test]
    fn parse_select_availability_range_operators() {
        let sql = "SELECT * FROM availability WHERE space_type = 'bureau' \
                   AND start_date >= '2024-04-01' AND end_date <= '2024-04-03'";
        assert!(matches!(
            parse_sql(sql).unwrap(),
            Command::SelectAvailability { .. }
        ));
    }

    #[test]
    fn parse_select_availability_missing_dates() {
        let sql = "SELECT * FROM availability WHERE space_type = 'coworking'";
        assert!(matches!(
            parse_sql(sql),
            Err(SqlError::MissingFilter("start_date"))
        ));
    }

    #[test]
    fn parse_space_availability_and_stats() {
        assert_eq!(
            parse_sql("SELECT * FROM space_availability").unwrap(),
            Command::SelectSpaceAvailability {
                space_type: None,
                date: None
            }
        );
        assert_eq!(
            parse_sql("SELECT * FROM space_availability WHERE space_type = 'bureau-prive' AND date = '2024-03-02'")
                .unwrap(),
            Command::SelectSpaceAvailability {
                space_type: Some("bureau-prive".into()),
                date: Some(day("2024-03-02")),
            }
        );
        assert_eq!(parse_sql("SELECT * FROM spaces").unwrap(), Command::SelectSpaces);
        assert_eq!(
            parse_sql("SELECT * FROM client_stats WHERE email = 'awa@example.com'").unwrap(),
            Command::SelectClientStats {
                email: Some("awa@example.com".into())
            }
        );
    }

    #[test]
    fn parse_call_procedures() {
        assert_eq!(
            parse_sql("CALL apply_reservation_rules()").unwrap(),
            Command::ApplyReservationRules
        );
        assert_eq!(
            parse_sql("CALL reap_cash_reservations()").unwrap(),
            Command::ReapCashReservations
        );
        assert!(matches!(
            parse_sql("CALL drop_everything()"),
            Err(SqlError::UnknownProcedure(_))
        ));
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("DELETE FROM bookings WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(t)) if t == "bookings"));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
