//! UPDATE assembly.

use super::{
    check_modify_clauses, render_assignments, render_conditions, render_joins, render_limit,
    render_order, render_table, StatementState,
};
use crate::binder::Bindings;
use crate::connection::Escape;
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
    check_modify_clauses(state)?;

    let mut sql = format!("UPDATE {table}");
    sql.push_str(&render_joins(state, escape, bindings));
    sql.push_str(" SET ");
    sql.push_str(&render_assignments(&state.data, escape, bindings));
    sql.push_str(&render_conditions("WHERE", &state.wheres, escape, bindings));
    sql.push_str(&render_order(state, escape, bindings));
    sql.push_str(&render_limit(state.limit));
    Ok(sql)
}
