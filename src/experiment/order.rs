//! `order_by` clauses for run search
//!
//! Clauses use the tracking service's SQL-like syntax:
//!
//! - `metrics.rmse ASC`
//! - ``params.`max depth` DESC``
//! - `tags.model`
//! - `attributes.start_time DESC` (or bare `start_time`)
//!
//! Parsing goes through sqlparser by embedding the clause in a `SELECT`
//! statement, then reading back the single ORDER BY expression.
//!
//! References:
//! - sqlparser-rs: <https://docs.rs/sqlparser>

use sqlparser::ast::{Expr, SetExpr, Statement};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::{Error, Result};

/// Sort order direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    /// Ascending order (smallest first)
    Asc,
    /// Descending order (largest first)
    Desc,
}

/// What a clause sorts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderKey {
    /// Latest value of a metric
    Metric(String),
    /// Param value (string comparison)
    Param(String),
    /// Tag value (string comparison)
    Tag(String),
    /// Run start time
    StartTime,
    /// Run end time
    EndTime,
    /// Run identifier
    RunId,
    /// Run status
    Status,
}

/// One parsed `order_by` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderClause {
    /// Sort key
    pub key: OrderKey,
    /// Direction (ascending when omitted)
    pub direction: OrderDirection,
}

impl OrderClause {
    /// Parse one clause, e.g. `metrics.test_rmse ASC`.
    ///
    /// # Errors
    /// Returns [`Error::ParseError`] if the clause is not a single ORDER BY
    /// expression over a supported key.
    pub fn parse(clause: &str) -> Result<Self> {
        let clause = clause.trim();
        if clause.is_empty() {
            return Err(Error::ParseError("empty order_by clause".to_string()));
        }

        let sql = format!("SELECT * FROM runs ORDER BY {clause}");
        let statements = Parser::parse_sql(&GenericDialect {}, &sql)
            .map_err(|e| Error::ParseError(format!("invalid order_by clause {clause:?}: {e}")))?;

        let [Statement::Query(query)] = statements.as_slice() else {
            return Err(Error::ParseError(format!(
                "invalid order_by clause {clause:?}"
            )));
        };
        if !matches!(query.body.as_ref(), SetExpr::Select(_)) || query.limit.is_some() {
            return Err(Error::ParseError(format!(
                "invalid order_by clause {clause:?}"
            )));
        }

        let exprs = query.order_by.as_ref().map(|ob| ob.exprs.as_slice()).unwrap_or_default();
        let [order_expr] = exprs else {
            return Err(Error::ParseError(format!(
                "order_by clause {clause:?} must name exactly one key"
            )));
        };

        let key = Self::extract_key(&order_expr.expr)?;
        let direction = if order_expr.asc.unwrap_or(true) {
            OrderDirection::Asc
        } else {
            OrderDirection::Desc
        };

        Ok(Self { key, direction })
    }

    fn extract_key(expr: &Expr) -> Result<OrderKey> {
        match expr {
            Expr::Identifier(ident) => Self::attribute(&ident.value),
            Expr::CompoundIdentifier(parts) if parts.len() == 2 => {
                let name = parts[1].value.clone();
                match parts[0].value.to_lowercase().as_str() {
                    "metrics" | "metric" => Ok(OrderKey::Metric(name)),
                    "params" | "param" | "parameters" | "parameter" => Ok(OrderKey::Param(name)),
                    "tags" | "tag" => Ok(OrderKey::Tag(name)),
                    "attributes" | "attribute" | "attr" | "run" => Self::attribute(&name),
                    other => Err(Error::ParseError(format!(
                        "unsupported order_by entity type {other:?}"
                    ))),
                }
            }
            other => Err(Error::ParseError(format!(
                "unsupported order_by expression {other}"
            ))),
        }
    }

    fn attribute(name: &str) -> Result<OrderKey> {
        match name {
            "start_time" => Ok(OrderKey::StartTime),
            "end_time" => Ok(OrderKey::EndTime),
            "run_id" => Ok(OrderKey::RunId),
            "status" => Ok(OrderKey::Status),
            other => Err(Error::ParseError(format!(
                "unsupported order_by attribute {other:?}"
            ))),
        }
    }
}

impl std::fmt::Display for OrderClause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let key = match &self.key {
            OrderKey::Metric(name) => format!("metrics.`{name}`"),
            OrderKey::Param(name) => format!("params.`{name}`"),
            OrderKey::Tag(name) => format!("tags.`{name}`"),
            OrderKey::StartTime => "attributes.start_time".to_string(),
            OrderKey::EndTime => "attributes.end_time".to_string(),
            OrderKey::RunId => "attributes.run_id".to_string(),
            OrderKey::Status => "attributes.status".to_string(),
        };
        let dir = match self.direction {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        };
        write!(f, "{key} {dir}")
    }
}

impl std::str::FromStr for OrderClause {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
