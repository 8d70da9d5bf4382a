use crate::test_utils::*;
use sheetcalc_common::{ExcelErrorExtra, ExcelErrorKind, LiteralValue};

#[test]
fn matrix_result_fills_its_zone() {
    let mut e = engine();
    set(&mut e, "A1", "=MFILL(2,2,42)");
    for a1 in ["A1", "A2", "B1", "B2"] {
        assert_eq!(value(&e, a1), num(42.0), "{a1}");
    }
    assert_eq!(value(&e, "C1"), LiteralValue::Empty);
    assert_eq!(value(&e, "A3"), LiteralValue::Empty);
}

#[test]
fn blocked_spill_cites_the_occupied_cell_and_respills_when_cleared() {
    let mut e = engine();
    set(&mut e, "B2", "kikou");
    set(&mut e, "A1", "=MFILL(2,2,42)");

    let err = error_at(&e, "A1");
    assert_eq!(err.kind, ExcelErrorKind::Spill);
    assert_eq!(
        err.message(),
        "Array result was not expanded because it would overwrite data in B2."
    );
    assert_eq!(value(&e, "A2"), LiteralValue::Empty);
    assert_eq!(value(&e, "B1"), LiteralValue::Empty);
    assert_eq!(value(&e, "B2"), LiteralValue::Text("kikou".into()));

    set(&mut e, "B2", "");
    for a1 in ["A1", "A2", "B1", "B2"] {
        assert_eq!(value(&e, a1), num(42.0), "{a1}");
    }
}

#[test]
fn collision_names_first_row_major_cell() {
    let mut e = engine();
    set(&mut e, "C1", "x");
    set(&mut e, "A3", "y");
    set(&mut e, "A1", "=MFILL(3,3,1)");
    assert_eq!(
        error_at(&e, "A1").message(),
        "Array result was not expanded because it would overwrite data in C1."
    );
}

#[test]
fn writing_into_a_spill_blocks_the_anchor() {
    let mut e = engine();
    set(&mut e, "A1", "=MFILL(1,3,7)");
    assert_eq!(value(&e, "A3"), num(7.0));

    set(&mut e, "A3", "9");
    assert_eq!(error_at(&e, "A1").kind, ExcelErrorKind::Spill);
    assert_eq!(value(&e, "A2"), LiteralValue::Empty);
    assert_eq!(value(&e, "A3"), num(9.0));

    set(&mut e, "A3", "");
    assert_eq!(value(&e, "A3"), num(7.0));
}

#[test]
fn sheet_bounds_report_missing_axes() {
    let mut e = small_engine(3, 3);
    set(&mut e, "B1", "=MFILL(3,4,42)");
    let err = error_at(&e, "B1");
    assert_eq!(
        err.message(),
        "Result couldn't be automatically expanded. Please insert more columns and rows."
    );
    assert_eq!(
        err.extra,
        ExcelErrorExtra::Spill {
            expected_rows: 4,
            expected_cols: 3
        }
    );

    e.insert_columns(0, 3, 1).unwrap();
    assert_eq!(
        error_at(&e, "B1").message(),
        "Result couldn't be automatically expanded. Please insert more rows."
    );

    e.insert_rows(0, 3, 1).unwrap();
    assert_eq!(value(&e, "B1"), num(42.0));
    assert_eq!(value(&e, "D4"), num(42.0));
}

#[test]
fn too_wide_only_asks_for_columns() {
    let mut e = small_engine(3, 3);
    set(&mut e, "B1", "=MFILL(3,3,42)");
    assert_eq!(
        error_at(&e, "B1").message(),
        "Result couldn't be automatically expanded. Please insert more columns."
    );
    e.insert_columns(0, 3, 1).unwrap();
    assert_eq!(value(&e, "D3"), num(42.0));
}

#[test]
fn first_spill_keeps_contested_cells() {
    let mut e = engine();
    set(&mut e, "B1", "=MFILL(2,2,1)");
    set(&mut e, "A2", "=MFILL(2,1,2)");
    assert_eq!(value(&e, "B2"), num(1.0));
    assert_eq!(
        error_at(&e, "A2").message(),
        "Array result was not expanded because it would overwrite data in B2."
    );

    set(&mut e, "B1", "");
    assert_eq!(value(&e, "A2"), num(2.0));
    assert_eq!(value(&e, "B2"), num(2.0));
    assert_eq!(value(&e, "C2"), LiteralValue::Empty);
}

#[test]
fn overlap_outcome_depends_on_entry_order() {
    let mut e = engine();
    set(&mut e, "A2", "=MFILL(2,1,2)");
    set(&mut e, "B1", "=MFILL(2,2,1)");
    assert_eq!(value(&e, "B2"), num(2.0));
    assert_eq!(error_at(&e, "B1").kind, ExcelErrorKind::Spill);
}

#[test]
fn readers_of_a_spill_see_derived_values() {
    let mut e = engine();
    set(&mut e, "D1", "=SUM(A1:B2)");
    set(&mut e, "D2", "=B2");
    assert_eq!(value(&e, "D1"), num(0.0));

    set(&mut e, "A1", "=MFILL(2,2,42)");
    assert_eq!(value(&e, "D1"), num(168.0));
    assert_eq!(value(&e, "D2"), num(42.0));

    set(&mut e, "A1", "=MFILL(2,2,1)");
    assert_eq!(value(&e, "D1"), num(4.0));

    set(&mut e, "A1", "5");
    assert_eq!(value(&e, "D1"), num(5.0));
    assert_eq!(value(&e, "D2"), num(0.0));
}

#[test]
fn spill_shrinks_when_result_shrinks() {
    let mut e = engine();
    set(&mut e, "B1", "3");
    set(&mut e, "A1", "=MFILL(1,B1,1)");
    assert_eq!(value(&e, "A3"), num(1.0));

    set(&mut e, "B1", "2");
    assert_eq!(value(&e, "A2"), num(1.0));
    assert_eq!(value(&e, "A3"), LiteralValue::Empty);

    set(&mut e, "B1", "1");
    assert_eq!(value(&e, "A1"), num(1.0));
    assert_eq!(value(&e, "A2"), LiteralValue::Empty);
}

#[test]
fn spill_chain_through_another_spill() {
    let mut e = engine();
    set(&mut e, "A1", "=MFILL(1,2,3)");
    set(&mut e, "C1", "=TRANSPOSE(A1:A2)");
    assert_eq!(value(&e, "C1"), num(3.0));
    assert_eq!(value(&e, "D1"), num(3.0));
}

#[test]
fn a_bare_range_is_not_a_result() {
    let mut e = engine();
    set(&mut e, "A1", "1");
    set(&mut e, "A2", "2");
    set(&mut e, "C1", "=A1:A2");
    assert_eq!(error_at(&e, "C1").kind, ExcelErrorKind::Error);
    set(&mut e, "C2", "=A1:A1");
    assert_eq!(value(&e, "C2"), num(1.0));
}

#[test]
fn growing_spill_takes_a_later_spills_cells() {
    let mut e = engine();
    set(&mut e, "A1", "1");
    set(&mut e, "B1", "=MFILL(1,A1+1,42)");
    set(&mut e, "A3", "=TRANSPOSE(B1:B2)");
    assert_eq!(value(&e, "B2"), num(42.0));
    assert_eq!(value(&e, "A3"), num(42.0));
    assert_eq!(value(&e, "B3"), num(42.0));

    set(&mut e, "A1", "2");
    for a1 in ["B1", "B2", "B3"] {
        assert_eq!(value(&e, a1), num(42.0), "{a1}");
    }
    assert_eq!(error_at(&e, "A3").kind, ExcelErrorKind::Spill);
}

#[test]
fn anchors_feeding_each_other_stop_at_the_round_limit() {
    let mut e = engine();
    set(&mut e, "A1", "=MFILL(2,1,D1+1)");
    set(&mut e, "C1", "=MFILL(2,1,B1+1)");
    assert_eq!(value(&e, "A1"), num(31.0));
    assert_eq!(value(&e, "B1"), num(31.0));
    assert_eq!(value(&e, "C1"), num(32.0));
    assert_eq!(value(&e, "D1"), num(32.0));

    // another push iterates again instead of reporting a cycle
    e.mark_dirty(&[pos("A1")]);
    let a1 = value(&e, "A1");
    assert!(matches!(a1, LiteralValue::Number(n) if n > 31.0), "{a1:?}");
    assert_eq!(value(&e, "B1"), a1);
    assert!(matches!(value(&e, "C1"), LiteralValue::Number(_)));
}

#[test]
fn feedback_follows_the_configured_round_limit() {
    let mut e = engine_with(crate::engine::EvalConfig {
        max_recompute_rounds: 4,
        ..Default::default()
    });
    set(&mut e, "A1", "=MFILL(2,1,D1+1)");
    set(&mut e, "C1", "=MFILL(2,1,B1+1)");
    assert_eq!(value(&e, "A1"), num(5.0));
    assert_eq!(value(&e, "C1"), num(6.0));
}
