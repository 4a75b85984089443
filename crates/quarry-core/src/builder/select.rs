//! SELECT assembly.

use super::{
    render_column, render_conditions, render_joins, render_limit, render_order, Form, LockMode,
    StatementState,
};
use crate::binder::Bindings;
use crate::condition::render_key;
use crate::connection::Escape;

pub(super) fn render(
    state: &StatementState,
    escape: &dyn Escape,
    lock: Option<LockMode>,
    form: Form,
    bindings: &mut Bindings,
) -> String {
    let mut sql = match form {
        Form::Plain => {
            let columns = column_list(state, escape);
            body(state, escape, &columns, true, bindings)
        }
        Form::Exists => {
            let mut sql = body(state, escape, "1", false, bindings);
            sql.push_str(" LIMIT 1");
            sql
        }
        Form::Count if state.distinct || !state.groups.is_empty() => {
            let columns = column_list(state, escape);
            let inner = body(state, escape, &columns, false, bindings);
            format!("SELECT COUNT(*) AS `count` FROM ({inner}) AS `counted`")
        }
        Form::Count => body(state, escape, "COUNT(*) AS `count`", false, bindings),
    };
    if let Some(mode) = lock {
        sql.push(' ');
        sql.push_str(mode.as_sql());
    }
    sql
}

fn column_list(state: &StatementState, escape: &dyn Escape) -> String {
    if state.columns.is_empty() {
        return String::from("*");
    }
    state
        .columns
        .iter()
        .map(|c| render_column(escape, c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn body(
    state: &StatementState,
    escape: &dyn Escape,
    columns: &str,
    with_tail: bool,
    bindings: &mut Bindings,
) -> String {
    let mut sql = String::from("SELECT ");
    if state.distinct {
        sql.push_str("DISTINCT ");
    }
    sql.push_str(columns);

    if let Some(source) = &state.source {
        sql.push_str(" FROM ");
        sql.push_str(&source.render(escape, bindings));
    }
    sql.push_str(&render_joins(state, escape, bindings));
    sql.push_str(&render_conditions("WHERE", &state.wheres, escape, bindings));

    if !state.groups.is_empty() {
        let groups: Vec<String> = state.groups.iter().map(|g| render_key(escape, g)).collect();
        sql.push_str(" GROUP BY ");
        sql.push_str(&groups.join(", "));
    }
    sql.push_str(&render_conditions("HAVING", &state.havings, escape, bindings));

    if with_tail {
        sql.push_str(&render_order(state, escape, bindings));
        sql.push_str(&render_limit(state.limit));
    }
    sql
}
