use crate::builtins::utils::{coerce_num, coerce_text};
use crate::function::ComputedFormat;
use crate::traits::{ArgumentHandle, EvaluationContext};
use sheetcalc_common::{ExcelError, ExcelErrorKind, LiteralValue};
use sheetcalc_parse::parser::{ASTNode, ASTNodeType, ReferenceType};

/// Walks one formula AST against an evaluation context.
pub struct Interpreter<'a> {
    pub(crate) context: &'a dyn EvaluationContext,
    current_sheet: &'a str,
}

impl<'a> Interpreter<'a> {
    pub fn new(context: &'a dyn EvaluationContext, current_sheet: &'a str) -> Self {
        Self {
            context,
            current_sheet,
        }
    }

    pub fn current_sheet(&self) -> &'a str {
        self.current_sheet
    }

    pub fn evaluate_ast(&self, node: &ASTNode) -> Result<LiteralValue, ExcelError> {
        match &node.node_type {
            ASTNodeType::Literal(v) => Ok(v.clone()),
            ASTNodeType::Reference { reference, .. } => self.eval_reference(reference),
            ASTNodeType::UnaryOp { op, expr } => self.eval_unary(op, expr),
            ASTNodeType::BinaryOp { op, left, right } => self.eval_binary(op, left, right),
            ASTNodeType::Function { name, args } => self.eval_function(name, args),
            ASTNodeType::Array(rows) => self.eval_array_literal(rows),
        }
    }

    /* ===================  reference  =================== */
    fn eval_reference(&self, reference: &ReferenceType) -> Result<LiteralValue, ExcelError> {
        match reference {
            ReferenceType::Cell { .. } => {
                match self.context.resolve_zone(reference, self.current_sheet) {
                    Ok(zone) => Ok(self.context.cell_value(zone.top_left())),
                    Err(e) => Ok(LiteralValue::Error(e)),
                }
            }
            ReferenceType::Range { .. } => {
                match self
                    .context
                    .resolve_range_like(reference, self.current_sheet)
                {
                    Ok(range) => {
                        let data = range.materialise().into_owned();
                        if data.len() == 1 && data[0].len() == 1 {
                            Ok(data[0][0].clone())
                        } else {
                            Ok(LiteralValue::Array(data))
                        }
                    }
                    Err(e) => Ok(LiteralValue::Error(e)),
                }
            }
        }
    }

    /* ===================  unary ops  =================== */
    fn eval_unary(&self, op: &str, expr: &ASTNode) -> Result<LiteralValue, ExcelError> {
        let v = self.evaluate_ast(expr)?;
        match v {
            LiteralValue::Array(arr) => {
                Ok(self.map_array(arr, |cell| self.eval_unary_scalar(op, cell)))
            }
            other => Ok(self.eval_unary_scalar(op, other)),
        }
    }

    fn eval_unary_scalar(&self, op: &str, v: LiteralValue) -> LiteralValue {
        match op {
            "+" => self.apply_number_unary(v, |n| n),
            "-" => self.apply_number_unary(v, |n| -n),
            "%" => self.apply_number_unary(v, |n| n / 100.0),
            _ => LiteralValue::Error(
                ExcelError::new(ExcelErrorKind::Error).with_message(format!("Unary op '{op}'")),
            ),
        }
    }

    fn apply_number_unary<F>(&self, v: LiteralValue, f: F) -> LiteralValue
    where
        F: Fn(f64) -> f64,
    {
        match coerce_num(&v) {
            Ok(n) => sanitize(f(n)),
            Err(e) => LiteralValue::Error(e),
        }
    }

    /* ===================  binary ops  =================== */
    fn eval_binary(
        &self,
        op: &str,
        left: &ASTNode,
        right: &ASTNode,
    ) -> Result<LiteralValue, ExcelError> {
        let l = self.evaluate_ast(left)?;
        let r = self.evaluate_ast(right)?;

        if matches!(op, "=" | "<>" | ">" | "<" | ">=" | "<=") {
            return Ok(self.broadcast_apply(l, r, |a, b| compare(op, a, b)));
        }

        let out = match op {
            "+" => self.broadcast_apply(l, r, |a, b| numeric(a, b, |x, y| x + y)),
            "-" => self.broadcast_apply(l, r, |a, b| numeric(a, b, |x, y| x - y)),
            "*" => self.broadcast_apply(l, r, |a, b| numeric(a, b, |x, y| x * y)),
            "/" => self.broadcast_apply(l, r, divide),
            "^" => self.broadcast_apply(l, r, power),
            "&" => self.broadcast_apply(l, r, concat),
            _ => LiteralValue::Error(
                ExcelError::new(ExcelErrorKind::Error).with_message(format!("Binary op '{op}'")),
            ),
        };
        Ok(out)
    }

    /* ===================  function calls  =================== */
    fn eval_function(&self, name: &str, args: &[ASTNode]) -> Result<LiteralValue, ExcelError> {
        let Some(fun) = self.context.get_function("", name) else {
            return Err(ExcelError::new(ExcelErrorKind::Name)
                .with_message(format!("Invalid formula: unknown function {name}")));
        };
        let handles: Vec<ArgumentHandle> =
            args.iter().map(|n| ArgumentHandle::new(n, self)).collect();
        fun.dispatch(&handles, self.context)
    }

    fn eval_array_literal(&self, rows: &[Vec<ASTNode>]) -> Result<LiteralValue, ExcelError> {
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut r = Vec::with_capacity(row.len());
            for cell in row {
                r.push(self.evaluate_ast(cell)?);
            }
            out.push(r);
        }
        Ok(LiteralValue::Array(out))
    }

    /* ===================  formats  =================== */

    /// Format that goes with the value of `node`. Never evaluates values, so
    /// function bodies are not invoked.
    pub fn evaluate_format(&self, node: &ASTNode) -> ComputedFormat {
        match &node.node_type {
            ASTNodeType::Literal(_) | ASTNodeType::Array(_) => ComputedFormat::none(),
            ASTNodeType::Reference { reference, .. } => {
                let Ok(zone) = self.context.resolve_zone(reference, self.current_sheet) else {
                    return ComputedFormat::none();
                };
                if zone.is_single() {
                    return ComputedFormat::Scalar(self.context.cell_format(zone.top_left()));
                }
                match self
                    .context
                    .resolve_range_like(reference, self.current_sheet)
                {
                    Ok(range) => ComputedFormat::Matrix(range.formats()),
                    Err(_) => ComputedFormat::none(),
                }
            }
            ASTNodeType::UnaryOp { op, .. } if op == "%" => ComputedFormat::none(),
            ASTNodeType::UnaryOp { expr, .. } => self.evaluate_format(expr),
            ASTNodeType::BinaryOp { op, left, right } => {
                if !matches!(op.as_str(), "+" | "-" | "*" | "/" | "^") {
                    return ComputedFormat::none();
                }
                match (self.evaluate_format(left), self.evaluate_format(right)) {
                    (ComputedFormat::Scalar(a), ComputedFormat::Scalar(b)) => {
                        ComputedFormat::Scalar(a.or(b))
                    }
                    (ComputedFormat::Matrix(m), ComputedFormat::Scalar(None))
                    | (ComputedFormat::Scalar(None), ComputedFormat::Matrix(m)) => {
                        ComputedFormat::Matrix(m)
                    }
                    _ => ComputedFormat::none(),
                }
            }
            ASTNodeType::Function { name, args } => match self.context.get_function("", name) {
                Some(fun) => {
                    let handles: Vec<ArgumentHandle> =
                        args.iter().map(|n| ArgumentHandle::new(n, self)).collect();
                    fun.compute_format(&handles)
                }
                None => ComputedFormat::none(),
            },
        }
    }

    /* ===================  helpers  =================== */
    fn map_array<F>(&self, arr: Vec<Vec<LiteralValue>>, f: F) -> LiteralValue
    where
        F: Fn(LiteralValue) -> LiteralValue,
    {
        LiteralValue::Array(
            arr.into_iter()
                .map(|row| row.into_iter().map(&f).collect())
                .collect(),
        )
    }

    /// Apply `f` element-wise. Scalars act as 1x1 matrices; a dimension of 1
    /// stretches to match the other operand.
    fn broadcast_apply<F>(&self, left: LiteralValue, right: LiteralValue, f: F) -> LiteralValue
    where
        F: Fn(LiteralValue, LiteralValue) -> LiteralValue,
    {
        use LiteralValue::Array;
        match (left, right) {
            (Array(l), Array(r)) => combine_arrays(l, r, f),
            (Array(l), v) => combine_arrays(l, vec![vec![v]], f),
            (v, Array(r)) => combine_arrays(vec![vec![v]], r, f),
            (l, r) => f(l, r),
        }
    }
}

fn shape(m: &[Vec<LiteralValue>]) -> (usize, usize) {
    (m.len(), m.first().map_or(0, Vec::len))
}

fn broadcast_dim(a: usize, b: usize) -> Option<usize> {
    if a == b || b == 1 {
        Some(a)
    } else if a == 1 {
        Some(b)
    } else {
        None
    }
}

fn combine_arrays<F>(l: Vec<Vec<LiteralValue>>, r: Vec<Vec<LiteralValue>>, f: F) -> LiteralValue
where
    F: Fn(LiteralValue, LiteralValue) -> LiteralValue,
{
    let (lr, lc) = shape(&l);
    let (rr, rc) = shape(&r);
    let (Some(rows), Some(cols)) = (broadcast_dim(lr, rr), broadcast_dim(lc, rc)) else {
        return LiteralValue::Error(
            ExcelError::new(ExcelErrorKind::Value)
                .with_message("Array arguments are of different size."),
        );
    };
    let pick = |m: &[Vec<LiteralValue>], (h, w): (usize, usize), i: usize, j: usize| {
        let ri = if h == 1 { 0 } else { i };
        let cj = if w == 1 { 0 } else { j };
        m.get(ri)
            .and_then(|row| row.get(cj))
            .cloned()
            .unwrap_or(LiteralValue::Empty)
    };
    let out = (0..rows)
        .map(|i| {
            (0..cols)
                .map(|j| f(pick(&l, (lr, lc), i, j), pick(&r, (rr, rc), i, j)))
                .collect()
        })
        .collect();
    LiteralValue::Array(out)
}

fn sanitize(n: f64) -> LiteralValue {
    if n.is_finite() {
        LiteralValue::Number(n)
    } else {
        LiteralValue::Error(ExcelError::new(ExcelErrorKind::Num))
    }
}

fn numeric<F>(a: LiteralValue, b: LiteralValue, f: F) -> LiteralValue
where
    F: Fn(f64, f64) -> f64,
{
    match (coerce_num(&a), coerce_num(&b)) {
        (Ok(x), Ok(y)) => sanitize(f(x, y)),
        (Err(e), _) | (_, Err(e)) => LiteralValue::Error(e),
    }
}

fn divide(a: LiteralValue, b: LiteralValue) -> LiteralValue {
    match (coerce_num(&a), coerce_num(&b)) {
        (Ok(_), Ok(y)) if y == 0.0 => LiteralValue::Error(
            ExcelError::new(ExcelErrorKind::Div).with_message("Division by zero."),
        ),
        (Ok(x), Ok(y)) => sanitize(x / y),
        (Err(e), _) | (_, Err(e)) => LiteralValue::Error(e),
    }
}

fn power(a: LiteralValue, b: LiteralValue) -> LiteralValue {
    match (coerce_num(&a), coerce_num(&b)) {
        // negative base with a fractional exponent has no real result
        (Ok(x), Ok(y)) if x < 0.0 && y.fract() != 0.0 => {
            LiteralValue::Error(ExcelError::new(ExcelErrorKind::Num))
        }
        (Ok(x), Ok(y)) => sanitize(x.powf(y)),
        (Err(e), _) | (_, Err(e)) => LiteralValue::Error(e),
    }
}

fn concat(a: LiteralValue, b: LiteralValue) -> LiteralValue {
    match (coerce_text(&a), coerce_text(&b)) {
        (Ok(x), Ok(y)) => LiteralValue::Text(x + &y),
        (Err(e), _) | (_, Err(e)) => LiteralValue::Error(e),
    }
}

fn compare(op: &str, left: LiteralValue, right: LiteralValue) -> LiteralValue {
    use LiteralValue::*;
    if let Error(e) = &left {
        return Error(e.clone());
    }
    if let Error(e) = &right {
        return Error(e.clone());
    }
    let ord = match (&left, &right) {
        (Text(a), Text(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
        (Boolean(a), Boolean(b)) => a.cmp(b),
        // numbers sort before text, text before booleans
        (Text(_), Boolean(_)) => std::cmp::Ordering::Less,
        (Boolean(_), Text(_)) => std::cmp::Ordering::Greater,
        (Text(a), Empty) => a.as_str().cmp(""),
        (Empty, Text(b)) => "".cmp(b.as_str()),
        (Text(_), _) => std::cmp::Ordering::Greater,
        (_, Text(_)) => std::cmp::Ordering::Less,
        (Boolean(_), Number(_) | Int(_)) => std::cmp::Ordering::Greater,
        (Number(_) | Int(_), Boolean(_)) => std::cmp::Ordering::Less,
        (a, b) => {
            let x = coerce_num(a).unwrap_or(0.0);
            let y = coerce_num(b).unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal)
        }
    };
    let res = match op {
        "=" => ord.is_eq(),
        "<>" => ord.is_ne(),
        ">" => ord.is_gt(),
        "<" => ord.is_lt(),
        ">=" => ord.is_ge(),
        _ => ord.is_le(),
    };
    Boolean(res)
}
