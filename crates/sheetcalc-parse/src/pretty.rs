//! Canonical formula rendering.
//!
//! Produces `=`-prefixed text with references in normalised form and only
//! the parentheses that precedence requires.

use crate::parser::{ASTNode, ASTNodeType};
use sheetcalc_common::LiteralValue;

fn binary_precedence(op: &str) -> u8 {
    match op {
        "^" => 5,
        "*" | "/" => 4,
        "+" | "-" => 3,
        "&" => 2,
        _ => 1,
    }
}

const POSTFIX_PRECEDENCE: u8 = 6;
const PREFIX_PRECEDENCE: u8 = 7;
const ATOM_PRECEDENCE: u8 = 9;

fn node_precedence(node: &ASTNode) -> u8 {
    match &node.node_type {
        ASTNodeType::BinaryOp { op, .. } => binary_precedence(op),
        ASTNodeType::UnaryOp { op, .. } if op == "%" => POSTFIX_PRECEDENCE,
        ASTNodeType::UnaryOp { .. } => PREFIX_PRECEDENCE,
        _ => ATOM_PRECEDENCE,
    }
}

fn render_literal(value: &LiteralValue, out: &mut String) {
    match value {
        LiteralValue::Text(s) => {
            out.push('"');
            out.push_str(&s.replace('"', "\"\""));
            out.push('"');
        }
        LiteralValue::Array(rows) => {
            out.push('{');
            for (r, row) in rows.iter().enumerate() {
                if r > 0 {
                    out.push(';');
                }
                for (c, v) in row.iter().enumerate() {
                    if c > 0 {
                        out.push(',');
                    }
                    render_literal(v, out);
                }
            }
            out.push('}');
        }
        other => out.push_str(&other.to_string()),
    }
}

fn render_child(node: &ASTNode, min_precedence: u8, out: &mut String) {
    if node_precedence(node) < min_precedence {
        out.push('(');
        render_node(node, out);
        out.push(')');
    } else {
        render_node(node, out);
    }
}

fn render_node(node: &ASTNode, out: &mut String) {
    match &node.node_type {
        ASTNodeType::Literal(value) => render_literal(value, out),
        ASTNodeType::Reference { reference, .. } => out.push_str(&reference.to_string()),
        ASTNodeType::UnaryOp { op, expr } if op == "%" => {
            render_child(expr, POSTFIX_PRECEDENCE, out);
            out.push('%');
        }
        ASTNodeType::UnaryOp { op, expr } => {
            out.push_str(op);
            render_child(expr, PREFIX_PRECEDENCE, out);
        }
        ASTNodeType::BinaryOp { op, left, right } => {
            let prec = binary_precedence(op);
            render_child(left, prec, out);
            out.push_str(op);
            // operators are left-associative: an equal-precedence right operand needs parens
            render_child(right, prec + 1, out);
        }
        ASTNodeType::Function { name, args } => {
            out.push_str(name);
            out.push('(');
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                render_node(arg, out);
            }
            out.push(')');
        }
        ASTNodeType::Array(rows) => {
            out.push('{');
            for (r, row) in rows.iter().enumerate() {
                if r > 0 {
                    out.push(';');
                }
                for (c, item) in row.iter().enumerate() {
                    if c > 0 {
                        out.push(',');
                    }
                    render_node(item, out);
                }
            }
            out.push('}');
        }
    }
}

/// Render an AST back to formula text, `=` included.
pub fn render_formula(ast: &ASTNode) -> String {
    let mut out = String::from("=");
    render_node(ast, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    fn roundtrip(src: &str) -> String {
        render_formula(&parse(src).unwrap())
    }

    #[test]
    fn canonical_references_and_spacing() {
        assert_eq!(roundtrip("=SUM( a1 : b2 , 3 )"), "=SUM(A1:B2,3)");
        assert_eq!(roundtrip("='Sheet 2'!$b$3"), "='Sheet 2'!$B$3");
    }

    #[test]
    fn keeps_only_required_parentheses() {
        assert_eq!(roundtrip("=(1+2)*3"), "=(1+2)*3");
        assert_eq!(roundtrip("=((1))+(2*3)"), "=1+2*3");
        assert_eq!(roundtrip("=1-(2-3)"), "=1-(2-3)");
        assert_eq!(roundtrip("=(1-2)-3"), "=1-2-3");
        assert_eq!(roundtrip("=-(A1+1)"), "=-(A1+1)");
        assert_eq!(roundtrip("=(A1+B1)%"), "=(A1+B1)%");
    }

    #[test]
    fn literals_render_in_source_form() {
        assert_eq!(roundtrip("=\"a\"\"b\"&TRUE"), "=\"a\"\"b\"&TRUE");
        assert_eq!(roundtrip("=SUM(#REF)"), "=SUM(#REF)");
        assert_eq!(roundtrip("={1,2;3,4}"), "={1,2;3,4}");
        assert_eq!(roundtrip("=IF(A1,,2)"), "=IF(A1,,2)");
    }
}
