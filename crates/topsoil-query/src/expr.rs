//! Comparisons and their SQL rendering.
//!
//! A predicate is a flat list of comparisons joined by `AND`/`OR`. It is
//! folded strictly left to right, each step wrapping what came before in
//! parentheses: `a AND b OR c AND d` renders as `((a AND b) OR c) AND d`.

use topsoil_core::{Value, quote_ident};
use topsoil_schema::RelationTable;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Equal,
    NotEqual,
    Like,
    NotLike,
    In,
    NotIn,
    IsNull,
    IsNotNull,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
}

impl ComparisonOp {
    /// Get the SQL representation of this operator.
    pub const fn as_str(self) -> &'static str {
        match self {
            ComparisonOp::Equal => "=",
            ComparisonOp::NotEqual => "<>",
            ComparisonOp::Like => "LIKE",
            ComparisonOp::NotLike => "NOT LIKE",
            ComparisonOp::In => "IN",
            ComparisonOp::NotIn => "NOT IN",
            ComparisonOp::IsNull => "IS NULL",
            ComparisonOp::IsNotNull => "IS NOT NULL",
            ComparisonOp::GreaterThan => ">",
            ComparisonOp::GreaterThanOrEqual => ">=",
            ComparisonOp::LessThan => "<",
            ComparisonOp::LessThanOrEqual => "<=",
        }
    }

    /// The positive form of a negated operator.
    const fn positive(self) -> Option<Self> {
        match self {
            ComparisonOp::NotEqual => Some(ComparisonOp::Equal),
            ComparisonOp::NotLike => Some(ComparisonOp::Like),
            ComparisonOp::NotIn => Some(ComparisonOp::In),
            _ => None,
        }
    }
}

/// How a comparison joins the predicate built so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connective {
    And,
    Or,
}

impl Connective {
    pub const fn as_str(self) -> &'static str {
        match self {
            Connective::And => "AND",
            Connective::Or => "OR",
        }
    }
}

/// What a comparison looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A column of the queried table
    Column(String),
    /// Membership in a relation's join table
    Relation(RelationTable),
}

/// One comparison in a predicate chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub target: Target,
    pub op: ComparisonOp,
    pub values: Vec<Value>,
}

impl Comparison {
    pub fn new(target: Target, op: ComparisonOp, values: Vec<Value>) -> Self {
        Self { target, op, values }
    }

    /// Render the comparison, appending its parameters to `params`.
    pub fn build(&self, params: &mut Vec<Value>) -> String {
        match &self.target {
            Target::Column(column) => self.build_column(&quote_ident(column), self.op, params),
            Target::Relation(relation) => self.build_relation(relation, params),
        }
    }

    fn build_column(&self, column: &str, op: ComparisonOp, params: &mut Vec<Value>) -> String {
        match op {
            ComparisonOp::IsNull | ComparisonOp::IsNotNull => format!("{} {}", column, op.as_str()),
            ComparisonOp::In | ComparisonOp::NotIn => {
                let placeholders = vec!["?"; self.values.len()].join(", ");
                params.extend(self.values.iter().cloned());
                format!("{} {} ({})", column, op.as_str(), placeholders)
            }
            // NULL never compares equal; a detached model or a `None`
            // argument means "is (not) null".
            ComparisonOp::Equal | ComparisonOp::NotEqual if self.is_null_argument() => {
                let op = if op == ComparisonOp::Equal {
                    ComparisonOp::IsNull
                } else {
                    ComparisonOp::IsNotNull
                };
                format!("{} {}", column, op.as_str())
            }
            _ => {
                params.extend(self.values.iter().take(1).cloned());
                format!("{} {} ?", column, op.as_str())
            }
        }
    }

    fn is_null_argument(&self) -> bool {
        self.values.first().is_none_or(Value::is_null)
    }

    fn build_relation(&self, relation: &RelationTable, params: &mut Vec<Value>) -> String {
        let id = quote_ident("id");
        let members = format!(
            "SELECT {} FROM {}",
            quote_ident(&relation.self_column),
            quote_ident(&relation.table)
        );
        match self.op {
            ComparisonOp::IsNull => format!("{} NOT IN ({})", id, members),
            ComparisonOp::IsNotNull => format!("{} IN ({})", id, members),
            op => {
                let (negated, op) = match op.positive() {
                    Some(positive) => (true, positive),
                    None => (false, op),
                };
                let inner = self.build_column(&quote_ident(&relation.other_column), op, params);
                let membership = if negated { "NOT IN" } else { "IN" };
                format!("{} {} ({} WHERE {})", id, membership, members, inner)
            }
        }
    }
}

/// Fold a chain of comparisons left-associatively.
///
/// The connective of the first link is ignored.
pub fn fold(links: &[(Connective, &Comparison)], params: &mut Vec<Value>) -> String {
    let mut sql = String::new();
    for (i, (connective, comparison)) in links.iter().enumerate() {
        let rendered = comparison.build(params);
        sql = match i {
            0 => rendered,
            1 => format!("{} {} {}", sql, connective.as_str(), rendered),
            _ => format!("({}) {} {}", sql, connective.as_str(), rendered),
        };
    }
    sql
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, op: ComparisonOp, values: Vec<Value>) -> Comparison {
        Comparison::new(Target::Column(name.to_string()), op, values)
    }

    fn friends() -> RelationTable {
        RelationTable {
            table: "Person_friends_list_table".to_string(),
            owner_table: "Person_table".to_string(),
            other_table: "Person_table".to_string(),
            self_column: "fk_self_Person_table_id".to_string(),
            other_column: "fk_Person_table_id".to_string(),
        }
    }

    #[test]
    fn test_column_comparisons() {
        let mut params = Vec::new();
        let sql = column("age", ComparisonOp::GreaterThan, vec![Value::Int(3)]).build(&mut params);
        assert_eq!(sql, "\"age\" > ?");
        assert_eq!(params, vec![Value::Int(3)]);

        let mut params = Vec::new();
        let sql = column(
            "name",
            ComparisonOp::NotIn,
            vec![Value::Text("a".into()), Value::Text("b".into())],
        )
        .build(&mut params);
        assert_eq!(sql, "\"name\" NOT IN (?, ?)");
        assert_eq!(params.len(), 2);

        let mut params = Vec::new();
        let sql = column("name", ComparisonOp::IsNull, vec![]).build(&mut params);
        assert_eq!(sql, "\"name\" IS NULL");
        assert!(params.is_empty());
    }

    #[test]
    fn test_equal_null_becomes_is_null() {
        let mut params = Vec::new();
        let sql =
            column("fk_address_id", ComparisonOp::Equal, vec![Value::Null]).build(&mut params);
        assert_eq!(sql, "\"fk_address_id\" IS NULL");
        let sql =
            column("fk_address_id", ComparisonOp::NotEqual, vec![Value::Null]).build(&mut params);
        assert_eq!(sql, "\"fk_address_id\" IS NOT NULL");
        assert!(params.is_empty());
    }

    #[test]
    fn test_relation_comparisons() {
        let mut params = Vec::new();
        let sql = Comparison::new(
            Target::Relation(friends()),
            ComparisonOp::Equal,
            vec![Value::BigInt(7)],
        )
        .build(&mut params);
        assert_eq!(
            sql,
            "\"id\" IN (SELECT \"fk_self_Person_table_id\" FROM \"Person_friends_list_table\" WHERE \"fk_Person_table_id\" = ?)"
        );
        assert_eq!(params, vec![Value::BigInt(7)]);

        let sql = Comparison::new(
            Target::Relation(friends()),
            ComparisonOp::NotEqual,
            vec![Value::BigInt(7)],
        )
        .build(&mut params);
        assert!(sql.starts_with("\"id\" NOT IN (SELECT"));
        assert!(sql.ends_with("\"fk_Person_table_id\" = ?)"));

        let sql = Comparison::new(Target::Relation(friends()), ComparisonOp::IsNull, vec![])
            .build(&mut params);
        assert_eq!(
            sql,
            "\"id\" NOT IN (SELECT \"fk_self_Person_table_id\" FROM \"Person_friends_list_table\")"
        );
    }

    #[test]
    fn test_fold_is_left_associative() {
        let a = column("a", ComparisonOp::Equal, vec![Value::Int(1)]);
        let b = column("b", ComparisonOp::Equal, vec![Value::Int(2)]);
        let c = column("c", ComparisonOp::Equal, vec![Value::Int(3)]);
        let d = column("d", ComparisonOp::Equal, vec![Value::Int(4)]);

        let mut params = Vec::new();
        assert_eq!(fold(&[(Connective::And, &a)], &mut params), "\"a\" = ?");

        let mut params = Vec::new();
        let sql = fold(
            &[
                (Connective::And, &a),
                (Connective::And, &b),
                (Connective::Or, &c),
                (Connective::And, &d),
            ],
            &mut params,
        );
        assert_eq!(
            sql,
            "((\"a\" = ? AND \"b\" = ?) OR \"c\" = ?) AND \"d\" = ?"
        );
        assert_eq!(
            params,
            vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)]
        );
    }
}
