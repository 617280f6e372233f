//! Consumer and producer predicates, and the contradiction test between them.

use std::fmt;

use gridreg_core::ColumnType;

use crate::ast::{BinaryOp, Expr, Literal, Query, SelectItem};
use crate::error::{NotSimpleReason, PredicateError, PredicateResult};
use crate::parser::Parser;

const AGGREGATES: [&str; 5] = ["AVG", "MIN", "MAX", "COUNT", "SUM"];

/// Comparison operators a predicate column can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Like,
}

impl Operator {
    fn from_binary(op: BinaryOp) -> Option<Self> {
        match op {
            BinaryOp::Eq => Some(Self::Eq),
            BinaryOp::Ne => Some(Self::Ne),
            BinaryOp::Gt => Some(Self::Gt),
            BinaryOp::Ge => Some(Self::Ge),
            BinaryOp::Lt => Some(Self::Lt),
            BinaryOp::Le => Some(Self::Le),
            _ => None,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Like => "LIKE",
        };
        f.write_str(s)
    }
}

/// One `column OP literal` term. Column names are lower-cased.
#[derive(Debug, Clone, PartialEq)]
pub struct PredicateColumn {
    pub name: String,
    pub op: Operator,
    pub value: Literal,
}

impl PredicateColumn {
    pub fn new(name: &str, op: Operator, value: Literal) -> Self {
        Self {
            name: name.to_lowercase(),
            op,
            value,
        }
    }

    /// Whether a producer whose `column = producer_value` is fixed can never
    /// produce a row satisfying this constraint.
    ///
    /// Anything that cannot be decided (LIKE, unparsable numbers, NULLs)
    /// is reported as not contradicted.
    pub fn is_contradicted_by(&self, producer_value: &Literal, ty: ColumnType) -> bool {
        if self.op == Operator::Like {
            return false;
        }
        if ty.is_numeric() {
            let (Some(p), Some(c)) = (producer_value.as_f64(), self.value.as_f64()) else {
                return false;
            };
            let holds = match self.op {
                Operator::Eq => p == c,
                Operator::Ne => p != c,
                Operator::Gt => p > c,
                Operator::Ge => p >= c,
                Operator::Lt => p < c,
                Operator::Le => p <= c,
                Operator::Like => true,
            };
            !holds
        } else {
            let (Some(p), Some(c)) = (producer_value.as_text(), self.value.as_text()) else {
                return false;
            };
            match self.op {
                Operator::Eq => p != c,
                Operator::Ne => p == c,
                _ => false,
            }
        }
    }
}

impl fmt::Display for PredicateColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.op, self.value)
    }
}

/// Type to compare a column with when no schema type is known: string if
/// either side is a quoted literal, numeric otherwise.
pub fn infer_column_type(a: &Literal, b: &Literal) -> ColumnType {
    if a.is_string() || b.is_string() {
        ColumnType::Varchar
    } else {
        ColumnType::Real
    }
}

// ── Consumer predicates ────────────────────────────────────────────

/// A consumer predicate (or query) broken into comparable columns.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPredicate {
    query: Query,
    columns: Vec<PredicateColumn>,
    has_complex_operator: bool,
}

impl ParsedPredicate {
    /// Parse a WHERE fragment or SELECT statement. Unsupported operators do
    /// not fail here; they only make [`check_simple`](Self::check_simple)
    /// fail.
    pub fn parse(text: &str) -> PredicateResult<Self> {
        let query = Parser::parse_query(text)?;
        let mut columns = Vec::new();
        let mut has_complex_operator = false;
        if let Some(expr) = &query.where_clause {
            collect_columns(expr, &mut columns, &mut has_complex_operator);
        }
        Ok(Self {
            query,
            columns,
            has_complex_operator,
        })
    }

    pub fn columns(&self) -> &[PredicateColumn] {
        &self.columns
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn has_complex_operator(&self) -> bool {
        self.has_complex_operator
    }

    /// No WHERE clause: matches everything.
    pub fn is_empty(&self) -> bool {
        self.query.where_clause.is_none()
    }

    /// Reject anything other than a single-table conjunction of comparisons.
    pub fn check_simple(&self) -> PredicateResult<()> {
        self.not_simple_reason()
            .map_or(Ok(()), |reason| Err(PredicateError::NotSimple(reason)))
    }

    pub fn is_simple(&self) -> bool {
        self.not_simple_reason().is_none()
    }

    fn not_simple_reason(&self) -> Option<NotSimpleReason> {
        let q = &self.query;
        if q.from.len() > 1 {
            return Some(NotSimpleReason::Join(q.from.len()));
        }
        if q.distinct {
            return Some(NotSimpleReason::Distinct);
        }
        if !q.group_by.is_empty() {
            return Some(NotSimpleReason::GroupBy);
        }
        if q.having.is_some() {
            return Some(NotSimpleReason::Having);
        }
        if !q.order_by.is_empty() {
            return Some(NotSimpleReason::OrderBy);
        }
        for item in &q.items {
            if let SelectItem::Expr { expr, .. } = item {
                if let Some(name) = find_aggregate(expr) {
                    return Some(NotSimpleReason::Aggregate(name));
                }
            }
        }
        if self.has_complex_operator {
            return Some(NotSimpleReason::ComplexOperator);
        }
        None
    }
}

fn collect_columns(expr: &Expr, out: &mut Vec<PredicateColumn>, complex: &mut bool) {
    match expr {
        Expr::Binary {
            op: BinaryOp::And,
            lhs,
            rhs,
        } => {
            collect_columns(lhs, out, complex);
            collect_columns(rhs, out, complex);
        }
        Expr::Binary { op, lhs, rhs } => match Operator::from_binary(*op) {
            Some(operator) => match (column_name(lhs), literal(rhs), column_name(rhs), literal(lhs)) {
                (Some(name), Some(value), _, _) => {
                    out.push(PredicateColumn::new(name, operator, value.clone()))
                }
                (_, _, Some(name), Some(value)) => {
                    let flipped = Operator::from_binary(op.flipped()).unwrap_or(operator);
                    out.push(PredicateColumn::new(name, flipped, value.clone()))
                }
                _ => *complex = true,
            },
            None => *complex = true,
        },
        Expr::Like {
            expr,
            pattern,
            negated: false,
        } => match (column_name(expr), literal(pattern)) {
            (Some(name), Some(value)) => {
                out.push(PredicateColumn::new(name, Operator::Like, value.clone()))
            }
            _ => *complex = true,
        },
        _ => *complex = true,
    }
}

fn column_name(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Column { name, .. } => Some(name),
        _ => None,
    }
}

fn literal(expr: &Expr) -> Option<&Literal> {
    match expr {
        Expr::Literal(lit) if *lit != Literal::Null => Some(lit),
        _ => None,
    }
}

fn find_aggregate(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Function { name, args, .. } => {
            let upper = name.to_uppercase();
            if AGGREGATES.contains(&upper.as_str()) {
                Some(upper)
            } else {
                args.iter().find_map(find_aggregate)
            }
        }
        Expr::Binary { lhs, rhs, .. } => find_aggregate(lhs).or_else(|| find_aggregate(rhs)),
        Expr::Negate(inner) | Expr::Not(inner) => find_aggregate(inner),
        _ => None,
    }
}

// ── Producer predicates ────────────────────────────────────────────

/// A producer predicate: a conjunction of `column = literal` facts.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProducerPredicate {
    columns: Vec<PredicateColumn>,
}

impl ProducerPredicate {
    pub fn parse(text: &str) -> PredicateResult<Self> {
        let parsed = ParsedPredicate::parse(text)?;
        if parsed.query.is_select() {
            return Err(PredicateError::NotProducerPredicate(
                "a SELECT statement is not a predicate".to_string(),
            ));
        }
        if parsed.has_complex_operator || !parsed.query.group_by.is_empty() || !parsed.query.order_by.is_empty() {
            return Err(PredicateError::NotProducerPredicate(text.trim().to_string()));
        }
        if let Some(bad) = parsed.columns.iter().find(|c| c.op != Operator::Eq) {
            return Err(PredicateError::NotProducerPredicate(format!(
                "operator {} on column {}",
                bad.op, bad.name
            )));
        }
        Ok(Self {
            columns: parsed.columns,
        })
    }

    pub fn columns(&self) -> &[PredicateColumn] {
        &self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// The fixed value of a column, if the predicate names it.
    pub fn value_of(&self, column: &str) -> Option<&Literal> {
        let column = column.to_lowercase();
        self.columns
            .iter()
            .find(|c| c.name == column)
            .map(|c| &c.value)
    }
}

/// Conservative contradiction test.
///
/// Returns `true` only when some column named by both sides carries a
/// consumer constraint that the producer's fixed value cannot satisfy.
/// `column_type` supplies schema types; unknown columns are typed from the
/// literals involved.
pub fn contradicts(
    consumer: &[PredicateColumn],
    producer: &[PredicateColumn],
    column_type: impl Fn(&str) -> Option<ColumnType>,
) -> bool {
    consumer.iter().any(|c| {
        producer
            .iter()
            .filter(|p| p.name == c.name)
            .any(|p| {
                let ty = column_type(&c.name).unwrap_or_else(|| infer_column_type(&c.value, &p.value));
                c.is_contradicted_by(&p.value, ty)
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn untyped(_: &str) -> Option<ColumnType> {
        None
    }

    fn consumer(text: &str) -> ParsedPredicate {
        ParsedPredicate::parse(text).unwrap()
    }

    fn producer(text: &str) -> ProducerPredicate {
        ProducerPredicate::parse(text).unwrap()
    }

    #[test]
    fn simple_conjunction_yields_columns() {
        let p = consumer("site = 'RAL' AND value > 10");
        assert!(p.is_simple());
        assert_eq!(
            p.columns(),
            &[
                PredicateColumn::new("site", Operator::Eq, Literal::String("RAL".into())),
                PredicateColumn::new("value", Operator::Gt, Literal::Integer(10)),
            ]
        );
    }

    #[test]
    fn hostile_nesting_is_rejected_not_fatal() {
        let text = format!("{}a = 1{}", "(".repeat(20_000), ")".repeat(20_000));
        assert!(matches!(ParsedPredicate::parse(&text), Err(PredicateError::Parse { .. })));
        assert!(ProducerPredicate::parse(&text).is_err());
    }

    #[test]
    fn literal_on_the_left_is_flipped() {
        let p = consumer("10 < value");
        assert_eq!(
            p.columns(),
            &[PredicateColumn::new("value", Operator::Gt, Literal::Integer(10))]
        );
    }

    #[test]
    fn or_marks_complex_but_keeps_columns() {
        let p = consumer("site = 'RAL' AND (a = 1 OR b = 2)");
        assert!(p.has_complex_operator());
        assert_eq!(p.columns().len(), 1);
        assert_eq!(
            p.check_simple(),
            Err(PredicateError::NotSimple(NotSimpleReason::ComplexOperator))
        );
    }

    #[test]
    fn complex_constructs_are_not_simple() {
        for text in [
            "site IN ('RAL', 'CERN')",
            "value BETWEEN 1 AND 3",
            "NOT site = 'RAL'",
            "site NOT LIKE 'R%'",
            "site IS NULL",
            "a = b",
            "site IN (SELECT site FROM s)",
        ] {
            assert!(!consumer(text).is_simple(), "{text} should not be simple");
        }
    }

    #[test]
    fn like_is_a_simple_operator() {
        let p = consumer("site LIKE 'R%'");
        assert!(p.is_simple());
        assert_eq!(p.columns()[0].op, Operator::Like);
    }

    #[test]
    fn select_level_rejections() {
        let cases = [
            ("SELECT * FROM a, b", NotSimpleReason::Join(2)),
            ("SELECT DISTINCT site FROM a", NotSimpleReason::Distinct),
            ("SELECT site FROM a GROUP BY site", NotSimpleReason::GroupBy),
            ("SELECT * FROM a ORDER BY site", NotSimpleReason::OrderBy),
            ("SELECT AVG(value) FROM a", NotSimpleReason::Aggregate("AVG".into())),
            ("SELECT 1 + count(*) FROM a", NotSimpleReason::Aggregate("COUNT".into())),
        ];
        for (text, reason) in cases {
            assert_eq!(
                consumer(text).check_simple(),
                Err(PredicateError::NotSimple(reason)),
                "{text}"
            );
        }
        assert!(consumer("SELECT * FROM a WHERE site = 'RAL'").is_simple());
    }

    #[test]
    fn empty_predicate_is_simple_and_empty() {
        let p = consumer("");
        assert!(p.is_empty());
        assert!(p.is_simple());
        assert!(p.columns().is_empty());
    }

    #[test]
    fn producer_predicate_accepts_equalities_only() {
        let p = producer("WHERE site = 'RAL' AND cores = 8");
        assert_eq!(p.value_of("SITE"), Some(&Literal::String("RAL".into())));
        assert_eq!(p.value_of("cores"), Some(&Literal::Integer(8)));
        assert!(producer("").is_empty());
        assert!(matches!(
            ProducerPredicate::parse("value > 3"),
            Err(PredicateError::NotProducerPredicate(_))
        ));
        assert!(matches!(
            ProducerPredicate::parse("a = 1 OR b = 2"),
            Err(PredicateError::NotProducerPredicate(_))
        ));
        assert!(matches!(
            ProducerPredicate::parse("site = "),
            Err(PredicateError::Parse { .. })
        ));
    }

    #[test]
    fn string_contradictions() {
        let p = producer("site = 'RAL'");
        assert!(!contradicts(consumer("site = 'RAL'").columns(), p.columns(), untyped));
        assert!(contradicts(consumer("site = 'CERN'").columns(), p.columns(), untyped));
        assert!(contradicts(consumer("site <> 'RAL'").columns(), p.columns(), untyped));
        assert!(!contradicts(consumer("site <> 'CERN'").columns(), p.columns(), untyped));
        assert!(!contradicts(consumer("site LIKE 'X%'").columns(), p.columns(), untyped));
        assert!(!contradicts(consumer("site > 'Z'").columns(), p.columns(), untyped));
    }

    #[test]
    fn numeric_contradictions_compare_producer_against_consumer() {
        let p = producer("value = 12");
        assert!(!contradicts(consumer("value > 10").columns(), p.columns(), untyped));
        assert!(contradicts(consumer("value < 10").columns(), p.columns(), untyped));
        assert!(!contradicts(consumer("value >= 12").columns(), p.columns(), untyped));
        assert!(contradicts(consumer("value <> 12.0").columns(), p.columns(), untyped));
        assert!(!contradicts(consumer("10 < value").columns(), p.columns(), untyped));
    }

    #[test]
    fn schema_type_overrides_inference() {
        let p = producer("cores = '8'");
        let typed = |c: &str| (c == "cores").then_some(ColumnType::Integer);
        assert!(!contradicts(consumer("cores = 8.0").columns(), p.columns(), typed));
        assert!(contradicts(consumer("cores > 8").columns(), p.columns(), typed));
    }

    #[test]
    fn unparsable_numbers_never_contradict() {
        let p = producer("cores = 'many'");
        let typed = |_: &str| Some(ColumnType::Integer);
        assert!(!contradicts(consumer("cores < 2").columns(), p.columns(), typed));
    }

    #[test]
    fn disjoint_columns_never_contradict() {
        let p = producer("site = 'RAL'");
        assert!(!contradicts(consumer("value > 10").columns(), p.columns(), untyped));
        assert!(!contradicts(&[], p.columns(), untyped));
    }

    #[test]
    fn column_names_match_case_insensitively() {
        let p = producer("SITE = 'RAL'");
        assert!(contradicts(consumer("Site = 'CERN'").columns(), p.columns(), untyped));
    }

    /// Any consumer comparison whose bound equals the producer's value,
    /// with an operator that admits equality, must not be contradicted.
    #[test]
    fn satisfiable_combinations_are_never_contradicted() {
        let p = producer("value = 5 AND site = 'RAL'");
        let satisfiable = [
            "value = 5",
            "value >= 5",
            "value <= 5",
            "value > 4",
            "value < 6",
            "value <> 4",
            "site = 'RAL' AND value >= 5 AND value <= 5",
            "other = 'anything'",
        ];
        for text in satisfiable {
            assert!(!contradicts(consumer(text).columns(), p.columns(), untyped), "{text}");
        }
    }
}
