use sqlparser::ast::{
    Expr, GroupByExpr, ObjectName, OrderBy, OrderByKind, Query, SelectItem, SetExpr, Statement,
    TableFactor, Visit, Visitor,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::collections::HashSet;
use std::ops::ControlFlow;

use crate::models::RejectionReason;

/// Column and relation names a generated SQL statement refers to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlReferences {
    /// Bare identifiers and the last part of compound identifiers, in AST order.
    /// Output-column aliases used in GROUP BY and ORDER BY are left out.
    pub columns: Vec<String>,
    /// Relations in FROM/JOIN, excluding CTE names
    pub relations: Vec<String>,
    /// Qualifiers of compound identifiers (`x` in `x.amount`) that name
    /// neither a relation nor a relation alias of the statement
    pub unresolved_qualifiers: Vec<String>,
}

/// SQL validation for generated queries: read-only and parseable
pub struct SqlValidator;

impl SqlValidator {
    /// Parse generated SQL and collect the names it references.
    ///
    /// Total: parse failures and non-query statements come back as rejection
    /// reasons, never as panics.
    pub fn analyze(sql: &str) -> Result<SqlReferences, RejectionReason> {
        let dialect = PostgreSqlDialect {};
        let statements = Parser::parse_sql(&dialect, sql)
            .map_err(|e| RejectionReason::Unparseable(format!("sql: {}", e)))?;

        if statements.is_empty() {
            return Err(RejectionReason::Unparseable("sql: no statement".to_string()));
        }

        Self::validate_select_only(&statements)?;

        let mut collector = ReferenceCollector::default();
        let _ = statements.visit(&mut collector);
        Ok(collector.finish())
    }

    /// Every statement must be a query
    fn validate_select_only(statements: &[Statement]) -> Result<(), RejectionReason> {
        for stmt in statements {
            let kind = match stmt {
                Statement::Query(_) => continue,
                Statement::Insert { .. } => "INSERT",
                Statement::Update { .. } => "UPDATE",
                Statement::Delete { .. } => "DELETE",
                Statement::Drop { .. } => "DROP",
                Statement::CreateTable { .. } => "CREATE TABLE",
                Statement::AlterTable { .. } => "ALTER TABLE",
                Statement::Truncate { .. } => "TRUNCATE",
                _ => "non-query statement",
            };
            return Err(RejectionReason::NotReadOnly(kind.to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
struct ReferenceCollector {
    columns: Vec<String>,
    relations: Vec<String>,
    cte_names: HashSet<String>,
    /// Table names and aliases that may qualify a column
    qualifiers: HashSet<String>,
    qualified: Vec<String>,
    /// GROUP BY / ORDER BY identifiers that name an output column
    alias_uses: HashSet<*const Expr>,
}

impl ReferenceCollector {
    fn finish(self) -> SqlReferences {
        let qualifiers = &self.qualifiers;
        let unresolved_qualifiers = self
            .qualified
            .iter()
            .filter(|q| {
                !qualifiers.contains(&q.to_lowercase()) && !qualifiers.contains(&bare_relation_name(q))
            })
            .cloned()
            .collect();

        SqlReferences {
            columns: self.columns,
            relations: self
                .relations
                .into_iter()
                .filter(|r| !self.cte_names.contains(&bare_relation_name(r)))
                .collect(),
            unresolved_qualifiers,
        }
    }
}

impl Visitor for ReferenceCollector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.cte_names.insert(cte.alias.name.value.to_lowercase());
            }
        }

        let mut aliases = HashSet::new();
        collect_aliases(&query.body, &mut aliases);
        mark_group_by_aliases(&query.body, &mut self.alias_uses);

        if let Some(OrderBy { kind: OrderByKind::Expressions(exprs), .. }) = &query.order_by {
            for order in exprs {
                mark_alias_use(&order.expr, &aliases, &mut self.alias_uses);
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
        self.relations.push(relation.to_string());
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<Self::Break> {
        let alias = match factor {
            TableFactor::Table { name, alias, .. } => {
                let name = name.to_string();
                self.qualifiers.insert(bare_relation_name(&name));
                self.qualifiers.insert(name.replace('"', "").to_lowercase());
                alias
            }
            TableFactor::Derived { alias, .. } => alias,
            _ => return ControlFlow::Continue(()),
        };
        if let Some(alias) = alias {
            self.qualifiers.insert(alias.name.value.to_lowercase());
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        if self.alias_uses.contains(&(expr as *const Expr)) {
            return ControlFlow::Continue(());
        }
        match expr {
            Expr::Identifier(ident) => self.columns.push(ident.value.clone()),
            Expr::CompoundIdentifier(parts) => {
                if let Some((last, qualifier)) = parts.split_last() {
                    self.columns.push(last.value.clone());
                    if !qualifier.is_empty() {
                        let qualifier: Vec<&str> = qualifier.iter().map(|p| p.value.as_str()).collect();
                        self.qualified.push(qualifier.join("."));
                    }
                }
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

/// Output-column names of a query body (`AS month`)
fn collect_aliases(body: &SetExpr, names: &mut HashSet<String>) {
    match body {
        SetExpr::Select(select) => {
            for item in &select.projection {
                if let SelectItem::ExprWithAlias { alias, .. } = item {
                    names.insert(alias.value.to_lowercase());
                }
            }
        }
        SetExpr::SetOperation { left, right, .. } => {
            collect_aliases(left, names);
            collect_aliases(right, names);
        }
        SetExpr::Query(query) => collect_aliases(&query.body, names),
        _ => {}
    }
}

/// `GROUP BY month` may name an output column of the same SELECT.
/// WHERE, HAVING and the projection itself cannot see those names.
fn mark_group_by_aliases(body: &SetExpr, uses: &mut HashSet<*const Expr>) {
    match body {
        SetExpr::Select(select) => {
            if let GroupByExpr::Expressions(exprs, _) = &select.group_by {
                let mut aliases = HashSet::new();
                collect_aliases(body, &mut aliases);
                for expr in exprs {
                    mark_alias_use(expr, &aliases, uses);
                }
            }
        }
        SetExpr::SetOperation { left, right, .. } => {
            mark_group_by_aliases(left, uses);
            mark_group_by_aliases(right, uses);
        }
        _ => {}
    }
}

fn mark_alias_use(expr: &Expr, aliases: &HashSet<String>, uses: &mut HashSet<*const Expr>) {
    if let Expr::Identifier(ident) = expr {
        if aliases.contains(&ident.value.to_lowercase()) {
            uses.insert(expr as *const Expr);
        }
    }
}

/// `public."Transactions"` -> `transactions`
pub fn bare_relation_name(relation: &str) -> String {
    relation
        .rsplit('.')
        .next()
        .unwrap_or(relation)
        .trim_matches(|c| c == '"' || c == '`')
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_select_only() {
        assert!(SqlValidator::analyze("SELECT * FROM transactions").is_ok());

        assert_eq!(
            SqlValidator::analyze("INSERT INTO transactions VALUES (1)"),
            Err(RejectionReason::NotReadOnly("INSERT".to_string()))
        );
        assert_eq!(
            SqlValidator::analyze("UPDATE transactions SET amount = 0"),
            Err(RejectionReason::NotReadOnly("UPDATE".to_string()))
        );
        assert_eq!(
            SqlValidator::analyze("DELETE FROM transactions"),
            Err(RejectionReason::NotReadOnly("DELETE".to_string()))
        );
        assert!(matches!(
            SqlValidator::analyze("SELECT 1; DROP TABLE transactions"),
            Err(RejectionReason::NotReadOnly(_))
        ));
    }

    #[test]
    fn test_unparseable_sql() {
        assert!(matches!(
            SqlValidator::analyze("SELEKT amount FRM transactions"),
            Err(RejectionReason::Unparseable(_))
        ));
        assert!(matches!(
            SqlValidator::analyze("SELECT (amount FROM transactions"),
            Err(RejectionReason::Unparseable(_))
        ));
    }

    #[test]
    fn test_extracts_columns_and_relations() {
        let refs = SqlValidator::analyze(
            "SELECT t.amount, fraud_flag FROM public.transactions t WHERE amount > 100 ORDER BY t.amount",
        )
        .unwrap();
        assert_eq!(refs.columns, vec!["amount", "fraud_flag", "amount", "amount"]);
        assert_eq!(refs.relations, vec!["public.transactions"]);
    }

    #[test]
    fn test_aliases_are_not_columns() {
        let refs = SqlValidator::analyze(
            "SELECT fraud_flag AS flagged, SUM(amount) AS total FROM transactions GROUP BY flagged ORDER BY total DESC",
        )
        .unwrap();
        assert_eq!(refs.columns, vec!["fraud_flag", "amount"]);
    }

    #[test]
    fn test_aliases_are_not_visible_outside_group_and_order_by() {
        let refs = SqlValidator::analyze("SELECT amount AS ghost, ghost FROM transactions").unwrap();
        assert_eq!(refs.columns, vec!["amount", "ghost"]);

        let refs = SqlValidator::analyze(
            "SELECT SUM(amount) AS total FROM transactions WHERE total > 5 HAVING total > 1",
        )
        .unwrap();
        assert_eq!(refs.columns, vec!["amount", "total", "total"]);
    }

    #[test]
    fn test_qualifiers_resolve_against_from_clause() {
        let refs = SqlValidator::analyze(
            "SELECT t.amount, transactions.fraud_flag FROM public.transactions t WHERE public.transactions.amount > 0",
        )
        .unwrap();
        assert!(refs.unresolved_qualifiers.is_empty());

        let refs = SqlValidator::analyze("SELECT x.amount FROM transactions t").unwrap();
        assert_eq!(refs.unresolved_qualifiers, vec!["x"]);
    }

    #[test]
    fn test_cte_names_are_local() {
        let refs = SqlValidator::analyze(
            "WITH flagged AS (SELECT amount FROM transactions WHERE fraud_flag = 1) SELECT SUM(amount) FROM flagged",
        )
        .unwrap();
        assert_eq!(refs.relations, vec!["transactions"]);
        assert!(refs.columns.iter().all(|c| c == "amount" || c == "fraud_flag"));
    }

    #[test]
    fn test_bare_relation_name() {
        assert_eq!(bare_relation_name("public.\"Transactions\""), "transactions");
        assert_eq!(bare_relation_name("transactions"), "transactions");
    }
}
