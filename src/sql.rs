use chrono::{DateTime, NaiveDate, Utc};
use sqlparser::ast::{
    self, AssignmentTarget, Expr, Ident, LimitClause, ObjectNamePart, SetExpr, Statement,
    TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertPlace {
        id: Ulid,
        place: NewPlace,
    },
    UpdatePlace {
        id: Ulid,
        patch: PlacePatch,
    },
    InsertPhotos {
        place_id: Ulid,
        urls: Vec<String>,
    },
    InsertBooking {
        id: Ulid,
        booking: NewBooking,
    },
    SelectPlace {
        id: Ulid,
    },
    /// All places, or only those of `owner_id`, newest first.
    SelectPlaces {
        owner_id: Option<Ulid>,
        page: Page,
    },
    SelectBooking {
        id: Ulid,
    },
    /// The connection user's bookings, newest first.
    SelectBookings {
        page: Page,
    },
}

const PLACE_COLUMNS: &[&str] = &[
    "id",
    "title",
    "address",
    "description",
    "perks",
    "extra_info",
    "check_in",
    "check_out",
    "max_guests",
    "price",
    "photos",
];
const PHOTO_COLUMNS: &[&str] = &["place_id", "url"];
const BOOKING_COLUMNS: &[&str] = &[
    "id",
    "place_id",
    "check_in",
    "check_out",
    "guests",
    "name",
    "phone",
    "price",
];

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
        } => parse_update(&table.relation, assignments, selection),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = extract_all_insert_rows(insert)?;

    match table.as_str() {
        "places" => {
            let row = single_row("places", &rows)?;
            let fields = Fields::new("places", &insert.columns, PLACE_COLUMNS, row)?;
            let place = NewPlace {
                title: parse_string(fields.require("title")?)?,
                address: parse_string(fields.require("address")?)?,
                description: parse_string(fields.require("description")?)?,
                perks: fields.get("perks").map(parse_json_list).transpose()?.unwrap_or_default(),
                extra_info: fields.get("extra_info").map(parse_string_or_null).transpose()?.flatten(),
                check_in_hour: parse_u8(fields.require("check_in")?)?,
                check_out_hour: parse_u8(fields.require("check_out")?)?,
                max_guests: parse_u32(fields.require("max_guests")?)?,
                price: parse_f64(fields.require("price")?)?,
                photos: fields.get("photos").map(parse_json_list).transpose()?.unwrap_or_default(),
            };
            Ok(Command::InsertPlace {
                id: parse_ulid_expr(fields.require("id")?)?,
                place,
            })
        }
        "photos" => {
            let mut place_id = None;
            let mut urls = Vec::with_capacity(rows.len());
            for (i, row) in rows.iter().enumerate() {
                let fields = Fields::new("photos", &insert.columns, PHOTO_COLUMNS, row)?;
                let row_place = parse_ulid_expr(fields.require("place_id")?)
                    .map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?;
                match place_id {
                    None => place_id = Some(row_place),
                    Some(p) if p != row_place => {
                        return Err(SqlError::Unsupported(
                            "photos for more than one place in one INSERT".into(),
                        ));
                    }
                    Some(_) => {}
                }
                urls.push(parse_string(fields.require("url")?)?);
            }
            let place_id = place_id.ok_or_else(|| SqlError::Parse("empty VALUES".into()))?;
            Ok(Command::InsertPhotos { place_id, urls })
        }
        "bookings" => {
            let row = single_row("bookings", &rows)?;
            let fields = Fields::new("bookings", &insert.columns, BOOKING_COLUMNS, row)?;
            let booking = NewBooking {
                place_id: parse_ulid_expr(fields.require("place_id")?)?,
                stay: Stay::new(
                    parse_date(fields.require("check_in")?)?,
                    parse_date(fields.require("check_out")?)?,
                ),
                guests: parse_u32(fields.require("guests")?)?,
                name: parse_string(fields.require("name")?)?,
                phone: parse_string(fields.require("phone")?)?,
                price: parse_f64(fields.require("price")?)?,
            };
            Ok(Command::InsertBooking {
                id: parse_ulid_expr(fields.require("id")?)?,
                booking,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    if table != "places" {
        return Err(SqlError::UnknownTable(table));
    }
    let id = extract_where_id(selection)?;

    let mut patch = PlacePatch::default();
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        let value = &assignment.value;
        match column.as_str() {
            "title" => patch.title = Some(parse_string(value)?),
            "address" => patch.address = Some(parse_string(value)?),
            "description" => patch.description = Some(parse_string(value)?),
            "perks" => patch.perks = Some(parse_json_list(value)?),
            "extra_info" => patch.extra_info = Some(parse_string_or_null(value)?.unwrap_or_default()),
            "check_in" => patch.check_in_hour = Some(parse_u8(value)?),
            "check_out" => patch.check_out_hour = Some(parse_u8(value)?),
            "max_guests" => patch.max_guests = Some(parse_u32(value)?),
            "price" => patch.price = Some(parse_f64(value)?),
            other => return Err(SqlError::Unsupported(format!("cannot update column {other}"))),
        }
    }
    Ok(Command::UpdatePlace { id, patch })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let from = select
        .from
        .first()
        .ok_or_else(|| SqlError::Parse("SELECT without FROM".into()))?;
    let table = table_factor_name(&from.relation)?;
    let filter = extract_where_eq(&select.selection)?;
    let page = extract_page(query)?;

    match table.as_str() {
        "places" => match filter {
            None => Ok(Command::SelectPlaces {
                owner_id: None,
                page,
            }),
            Some(("id", value)) => Ok(Command::SelectPlace {
                id: parse_ulid_expr(value)?,
            }),
            Some(("owner_id", value)) => Ok(Command::SelectPlaces {
                owner_id: Some(parse_ulid_expr(value)?),
                page,
            }),
            Some(_) => Err(SqlError::MissingFilter("id or owner_id")),
        },
        "bookings" => match filter {
            None => Ok(Command::SelectBookings { page }),
            Some(("id", value)) => Ok(Command::SelectBooking {
                id: parse_ulid_expr(value)?,
            }),
            Some(_) => Err(SqlError::MissingFilter("id")),
        },
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Helpers ───────────────────────────────────────────────────

/// Column name to value for one VALUES row. Without an explicit column list
/// the row is read positionally against `defaults`.
struct Fields<'a> {
    table: &'static str,
    pairs: Vec<(String, &'a Expr)>,
}

impl<'a> Fields<'a> {
    fn new(
        table: &'static str,
        columns: &[Ident],
        defaults: &[&str],
        row: &'a [Expr],
    ) -> Result<Self, SqlError> {
        let names: Vec<String> = if columns.is_empty() {
            defaults.iter().map(|c| c.to_string()).collect()
        } else {
            columns.iter().map(|c| c.value.to_lowercase()).collect()
        };
        if row.len() > names.len() || (!columns.is_empty() && row.len() != names.len()) {
            return Err(SqlError::WrongArity(table, names.len(), row.len()));
        }
        if let Some(unknown) = names.iter().find(|n| !defaults.contains(&n.as_str())) {
            return Err(SqlError::Parse(format!("{table}: unknown column {unknown}")));
        }
        Ok(Self {
            table,
            pairs: names.into_iter().zip(row.iter()).collect(),
        })
    }

    fn get(&self, column: &str) -> Option<&'a Expr> {
        self.pairs
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, expr)| *expr)
    }

    fn require(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column)
            .ok_or_else(|| SqlError::Parse(format!("{}: missing column {column}", self.table)))
    }
}

fn single_row<'a>(table: &'static str, rows: &'a [Vec<Expr>]) -> Result<&'a [Expr], SqlError> {
    match rows {
        [row] => Ok(row),
        _ => Err(SqlError::Unsupported(format!(
            "{table}: one row per INSERT, got {}",
            rows.len()
        ))),
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

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

/// A single `column = value` filter, if any.
fn extract_where_eq(selection: &Option<Expr>) -> Result<Option<(&str, &Expr)>, SqlError> {
    let Some(sel) = selection else {
        return Ok(None);
    };
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => match expr_column_name(left).as_deref() {
            Some("id") => Ok(Some(("id", right.as_ref()))),
            Some("owner_id") => Ok(Some(("owner_id", right.as_ref()))),
            _ => Err(SqlError::Unsupported(format!("filter {sel}"))),
        },
        _ => Err(SqlError::Unsupported(format!("filter {sel}"))),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    match extract_where_eq(selection) {
        Ok(Some(("id", value))) => parse_ulid_expr(value),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn extract_page(query: &ast::Query) -> Result<Page, SqlError> {
    let default = Page::default();
    let (limit, offset) = match &query.limit_clause {
        None => (None, None),
        Some(LimitClause::LimitOffset { limit, offset, .. }) => {
            (limit.as_ref(), offset.as_ref().map(|o| &o.value))
        }
        Some(LimitClause::OffsetCommaLimit { offset, limit }) => (Some(limit), Some(offset)),
    };
    let limit = match limit {
        Some(expr) => parse_i64_expr(expr)?,
        None => default.limit as i64,
    };
    let offset = match offset {
        Some(expr) => parse_i64_expr(expr)?,
        None => 0,
    };
    let limit = usize::try_from(limit).map_err(|_| SqlError::InvalidPagination)?;
    let offset = usize::try_from(offset).map_err(|_| SqlError::InvalidPagination)?;
    Page::new(limit, offset).ok_or(SqlError::InvalidPagination)
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

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string(expr).map(Some),
    }
}

/// A JSON array of strings, e.g. `'["wifi", "parking"]'`. NULL is empty.
fn parse_json_list(expr: &Expr) -> Result<Vec<String>, SqlError> {
    match parse_string_or_null(expr)? {
        None => Ok(Vec::new()),
        Some(s) => serde_json::from_str(&s)
            .map_err(|e| SqlError::Parse(format!("expected JSON string array: {e}"))),
    }
}

/// `'YYYY-MM-DD'`, or an RFC 3339 timestamp truncated to its UTC date.
fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    if let Ok(date) = NaiveDate::parse_from_str(&s, "%Y-%m-%d") {
        return Ok(date);
    }
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc).date_naive())
        .map_err(|_| SqlError::Parse(format!("bad date: {s}")))
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_f64(expr: &Expr) -> Result<f64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad number: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_f64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u8(expr: &Expr) -> Result<u8, SqlError> {
    let v = parse_i64_expr(expr)?;
    u8::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u8 range")))
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
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    InvalidPagination,
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::InvalidPagination => write!(
                f,
                "LIMIT must be between 1 and {} and OFFSET must not be negative",
                crate::limits::MAX_PAGE_LIMIT
            ),
        }
    }
}

impl std::error::Error for SqlError {}
