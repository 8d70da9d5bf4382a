use crate::test_utils::*;
use sheetcalc_common::{ExcelErrorKind, LiteralValue};

fn numbers() -> crate::engine::Engine {
    let mut e = engine();
    set(&mut e, "A1", "4");
    set(&mut e, "A2", "1");
    set(&mut e, "A3", "text");
    set(&mut e, "A4", "TRUE");
    set(&mut e, "A5", "7");
    e
}

#[test]
fn aggregates_skip_text_in_ranges() {
    let mut e = numbers();
    set(&mut e, "B1", "=SUM(A1:A5)");
    set(&mut e, "B2", "=AVERAGE(A1:A5)");
    set(&mut e, "B3", "=MIN(A1:A5)");
    set(&mut e, "B4", "=MAX(A1:A5, 10)");
    set(&mut e, "B5", "=MEDIAN(A1:A5)");
    set(&mut e, "B6", "=COUNT(A1:A5, \"3\")");
    assert_eq!(value(&e, "B1"), num(12.0));
    assert_eq!(value(&e, "B2"), num(4.0));
    assert_eq!(value(&e, "B3"), num(1.0));
    assert_eq!(value(&e, "B4"), num(10.0));
    assert_eq!(value(&e, "B5"), num(4.0));
    assert_eq!(value(&e, "B6"), num(4.0));
}

#[test]
fn aggregates_of_nothing() {
    let mut e = engine();
    set(&mut e, "B1", "=AVERAGE(A1:A3)");
    set(&mut e, "B2", "=MAX(A1:A3)");
    set(&mut e, "B3", "=MEDIAN(A1:A3)");
    assert_eq!(error_at(&e, "B1").kind, ExcelErrorKind::Div);
    assert_eq!(value(&e, "B2"), num(0.0));
    assert_eq!(error_at(&e, "B3").message(), "MEDIAN has no valid input data.");
}

#[test]
fn errors_in_ranges_propagate() {
    let mut e = engine();
    set(&mut e, "A1", "=1/0");
    set(&mut e, "A2", "3");
    set(&mut e, "B1", "=SUM(A1:A2)");
    assert_eq!(error_at(&e, "B1").kind, ExcelErrorKind::Div);
}

#[test]
fn if_evaluates_one_branch() {
    let mut e = engine();
    let calls = with_counter(&mut e);
    set(&mut e, "A1", "=IF(TRUE, 1, COUNTED(1))");
    set(&mut e, "A2", "=IF(0, 1)");
    set(&mut e, "A3", "=IF(1,,2)");
    assert_eq!(value(&e, "A1"), num(1.0));
    assert_eq!(value(&e, "A2"), LiteralValue::Boolean(false));
    assert_eq!(value(&e, "A3"), num(0.0));
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[test]
fn logical_functions() {
    let mut e = engine();
    set(&mut e, "A1", "TRUE");
    set(&mut e, "A2", "0");
    set(&mut e, "A3", "word");
    set(&mut e, "B1", "=AND(A1:A3)");
    set(&mut e, "B2", "=OR(A1:A3)");
    set(&mut e, "B3", "=NOT(A2)");
    set(&mut e, "B4", "=AND(A3:A3)");
    assert_eq!(value(&e, "B1"), LiteralValue::Boolean(false));
    assert_eq!(value(&e, "B2"), LiteralValue::Boolean(true));
    assert_eq!(value(&e, "B3"), LiteralValue::Boolean(true));
    assert_eq!(error_at(&e, "B4").kind, ExcelErrorKind::Value);
}

#[test]
fn concat_flattens_ranges() {
    let mut e = engine();
    set(&mut e, "A1", "a");
    set(&mut e, "B1", "b");
    set(&mut e, "A2", "1");
    set(&mut e, "C1", "=CONCAT(A1:B2, \"!\")");
    assert_eq!(value(&e, "C1"), LiteralValue::Text("ab1!".into()));
}

#[test]
fn transpose_spills_the_swapped_matrix() {
    let mut e = engine();
    set(&mut e, "A1", "=MATRIX(2,3)");
    set(&mut e, "A4", "=TRANSPOSE(A1:C2)");
    assert_eq!(value(&e, "A4"), num(1.0));
    assert_eq!(value(&e, "B4"), num(4.0));
    assert_eq!(value(&e, "A6"), num(3.0));
    assert_eq!(value(&e, "B6"), num(6.0));
}

#[test]
fn engine_functions_shadow_builtins() {
    use crate::function::Function;
    use crate::traits::{ArgumentHandle, EvaluationContext};
    use sheetcalc_common::ExcelError;

    #[derive(Debug)]
    struct FortyTwo;
    impl Function for FortyTwo {
        fn name(&self) -> &'static str {
            "SUM"
        }
        fn variadic(&self) -> bool {
            true
        }
        fn eval<'a, 'b>(
            &self,
            _args: &'a [ArgumentHandle<'a, 'b>],
            _ctx: &dyn EvaluationContext,
        ) -> Result<LiteralValue, ExcelError> {
            Ok(LiteralValue::Number(42.0))
        }
    }

    let mut e = engine();
    e.register_function(std::sync::Arc::new(FortyTwo));
    set(&mut e, "A1", "=SUM(1)");
    assert_eq!(value(&e, "A1"), num(42.0));

    let other = engine();
    assert!(crate::function_registry::get("", "SUM").is_some());
    assert_eq!(other.config().default_rows, 100);
}

#[test]
fn declared_scalar_arguments_are_settled_before_eval() {
    use crate::function::{ArgSpec, Function};
    use crate::traits::{ArgumentHandle, EvaluationContext};
    use sheetcalc_common::ExcelError;

    static ONE: [ArgSpec; 1] = [ArgSpec::scalar("value")];

    /// Hands back whatever it receives, arrays included.
    #[derive(Debug)]
    struct Echo;
    impl Function for Echo {
        fn name(&self) -> &'static str {
            "ECHO"
        }
        fn min_args(&self) -> usize {
            1
        }
        fn arg_schema(&self) -> &'static [ArgSpec] {
            &ONE
        }
        fn eval<'a, 'b>(
            &self,
            args: &'a [ArgumentHandle<'a, 'b>],
            _ctx: &dyn EvaluationContext,
        ) -> Result<LiteralValue, ExcelError> {
            Ok(args[0].value()?.into_owned())
        }
    }

    let mut e = engine();
    let calls = with_counter(&mut e);
    e.register_function(std::sync::Arc::new(Echo));

    set(&mut e, "A1", "=ECHO(MFILL(2,2,1))");
    let err = error_at(&e, "A1");
    assert_eq!(err.kind, ExcelErrorKind::Error);
    assert_eq!(err.message(), "Expected a single value, got a 2x2 array.");
    assert_eq!(value(&e, "B2"), LiteralValue::Empty);

    set(&mut e, "A3", "=ECHO(MFILL(1,1,5))");
    assert_eq!(value(&e, "A3"), num(5.0));

    // the argument is evaluated once
    set(&mut e, "A4", "=ECHO(COUNTED(2))");
    assert_eq!(value(&e, "A4"), num(2.0));
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}
