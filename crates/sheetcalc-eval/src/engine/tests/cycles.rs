use crate::test_utils::*;
use sheetcalc_common::ExcelErrorKind;

#[test]
fn two_cell_cycle_is_reported_on_both() {
    let mut e = engine();
    set(&mut e, "A1", "=B1");
    set(&mut e, "B1", "=A1");
    assert_eq!(error_at(&e, "A1").kind, ExcelErrorKind::Circ);
    assert_eq!(error_at(&e, "B1").kind, ExcelErrorKind::Circ);
    assert_eq!(text(&e, "A1"), "#CIRC!");
}

#[test]
fn self_reference_is_a_cycle() {
    let mut e = engine();
    set(&mut e, "A1", "=A1+1");
    assert_eq!(error_at(&e, "A1").kind, ExcelErrorKind::Circ);
}

#[test]
fn breaking_the_cycle_recovers() {
    let mut e = engine();
    set(&mut e, "A1", "=B1");
    set(&mut e, "B1", "=A1");
    set(&mut e, "B1", "3");
    assert_eq!(value(&e, "A1"), num(3.0));
}

#[test]
fn downstream_of_a_cycle_sees_the_error() {
    let mut e = engine();
    set(&mut e, "C1", "=A1*2");
    set(&mut e, "D1", "5");
    set(&mut e, "E1", "=D1+1");
    set(&mut e, "A1", "=B1");
    set(&mut e, "B1", "=A1");
    assert_eq!(error_at(&e, "C1").kind, ExcelErrorKind::Circ);
    assert_eq!(value(&e, "E1"), num(6.0));
}

#[test]
fn range_cycle_through_sum() {
    let mut e = engine();
    set(&mut e, "A1", "1");
    set(&mut e, "A3", "=SUM(A1:A2)");
    assert_eq!(value(&e, "A3"), num(1.0));
    set(&mut e, "A2", "=A3");
    assert_eq!(error_at(&e, "A2").kind, ExcelErrorKind::Circ);
    assert_eq!(error_at(&e, "A3").kind, ExcelErrorKind::Circ);
}

#[test]
fn reading_its_own_spill_is_not_a_cycle() {
    let mut e = engine();
    set(&mut e, "A1", "=MFILL(1,2,SUM(A2)+1)");
    assert_eq!(value(&e, "A1"), num(1.0));
    assert_eq!(value(&e, "A2"), num(1.0));
}
