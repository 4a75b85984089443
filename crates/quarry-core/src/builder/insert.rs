//! INSERT and REPLACE assembly.

use super::{render_table, SetValue, StatementKind, StatementState};
use crate::binder::Bindings;
use crate::connection::{quote_identifier, Escape};
use crate::error::{QueryError, Result};

pub(super) fn render(
    state: &StatementState,
    escape: &dyn Escape,
    bindings: &mut Bindings,
) -> Result<String> {
    let table = render_table(state, escape, bindings)?;
    if state.data.is_empty() {
        return Err(QueryError::MissingData(state.kind));
    }

    let verb = if state.kind == StatementKind::Replace {
        "REPLACE"
    } else {
        "INSERT"
    };
    let columns: Vec<String> = state
        .data
        .iter()
        .map(|(c, _)| quote_identifier(escape, c))
        .collect();
    let values: Vec<String> = state
        .data
        .iter()
        .map(|(_, v)| match v {
            SetValue::Value(v) => bindings.bind(v).to_string(),
            SetValue::Expr(expr) => {
                bindings.extend(expr.bindings());
                expr.sql().to_string()
            }
        })
        .collect();

    let mut sql = format!(
        "{verb} INTO {table} ({}) VALUES ({})",
        columns.join(", "),
        values.join(", ")
    );

    if state.kind == StatementKind::Insert && !state.duplicate_update.is_empty() {
        let updates: Vec<String> = state
            .duplicate_update
            .iter()
            .map(|c| {
                let c = quote_identifier(escape, c);
                format!("{c} = VALUES({c})")
            })
            .collect();
        sql.push_str(" ON DUPLICATE KEY UPDATE ");
        sql.push_str(&updates.join(", "));
    }
    Ok(sql)
}
