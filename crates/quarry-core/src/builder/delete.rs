//! DELETE assembly.

use super::{
    check_modify_clauses, render_conditions, render_joins, render_limit, render_order,
    render_table, Source, StatementState,
};
use crate::binder::Bindings;
use crate::connection::{quote_identifier, Escape};
use crate::error::Result;

pub(super) fn render(
    state: &StatementState,
    escape: &dyn Escape,
    bindings: &mut Bindings,
) -> Result<String> {
    let table = render_table(state, escape, bindings)?;
    check_modify_clauses(state)?;

    if state.joins.is_empty() {
        let mut sql = format!("DELETE FROM {table}");
        sql.push_str(&render_conditions("WHERE", &state.wheres, escape, bindings));
        sql.push_str(&render_order(state, escape, bindings));
        sql.push_str(&render_limit(state.limit));
        return Ok(sql);
    }

    // Multi-table form deletes from the primary table only.
    let target = match &state.source {
        Some(Source::Table {
            alias: Some(alias), ..
        }) => quote_identifier(escape, alias),
        Some(Source::Table { name, .. }) => quote_identifier(escape, name),
        _ => table.clone(),
    };
    let mut sql = format!("DELETE {target} FROM {table}");
    sql.push_str(&render_joins(state, escape, bindings));
    sql.push_str(&render_conditions("WHERE", &state.wheres, escape, bindings));
    Ok(sql)
}
