use crate::test_utils::*;
use sheetcalc_common::{ExcelErrorKind, LiteralValue};

#[test]
fn inserted_rows_shift_references() {
    let mut e = engine();
    set(&mut e, "B5", "3");
    set(&mut e, "A1", "=B5");
    e.insert_rows(0, 2, 1).unwrap();
    assert_eq!(content(&e, "A1"), "=B6");
    assert_eq!(value(&e, "B6"), num(3.0));
    assert_eq!(value(&e, "A1"), num(3.0));
    assert_eq!(e.sheet_dimensions(0), Some((101, 26)));
}

#[test]
fn deleted_target_becomes_ref_and_copy_keeps_it() {
    let mut e = engine();
    set(&mut e, "A1", "1");
    set(&mut e, "A3", "=A1");
    e.delete_rows(0, &[0]).unwrap();
    assert_eq!(content(&e, "A2"), "=#REF");
    assert_eq!(error_at(&e, "A2").kind, ExcelErrorKind::Ref);

    e.copy(&[zone("A2")]).unwrap();
    e.paste(&[zone("B5")], crate::engine::PasteMode::All).unwrap();
    assert_eq!(content(&e, "B5"), "=#REF");
    assert_eq!(error_at(&e, "B5").kind, ExcelErrorKind::Ref);
}

#[test]
fn deleting_inside_a_range_shrinks_it() {
    let mut e = engine();
    set(&mut e, "B2", "1");
    set(&mut e, "B3", "2");
    set(&mut e, "B4", "3");
    set(&mut e, "A1", "=SUM(B2:B4)");
    e.delete_rows(0, &[2]).unwrap();
    assert_eq!(content(&e, "A1"), "=SUM(B2:B3)");
    assert_eq!(value(&e, "A1"), num(4.0));
}

#[test]
fn scattered_rows_are_deleted_together() {
    let mut e = engine();
    for (i, a1) in ["A1", "A2", "A3", "A4", "A5", "A6"].iter().enumerate() {
        set(&mut e, a1, &(i + 1).to_string());
    }
    set(&mut e, "C1", "=SUM(A1:A6)");
    e.delete_rows(0, &[4, 1, 3]).unwrap();
    assert_eq!(value(&e, "A1"), num(1.0));
    assert_eq!(value(&e, "A2"), num(3.0));
    assert_eq!(value(&e, "A3"), num(6.0));
    assert_eq!(value(&e, "A4"), LiteralValue::Empty);
    assert_eq!(content(&e, "C1"), "=SUM(A1:A3)");
    assert_eq!(value(&e, "C1"), num(10.0));
}

#[test]
fn deleted_columns_shift_left() {
    let mut e = engine();
    set(&mut e, "C1", "1");
    set(&mut e, "D1", "2");
    set(&mut e, "A1", "=C1+D1");
    e.delete_columns(0, &[1]).unwrap();
    assert_eq!(content(&e, "A1"), "=B1+C1");
    assert_eq!(value(&e, "A1"), num(3.0));
}

#[test]
fn spill_is_recomputed_after_insert() {
    let mut e = engine();
    set(&mut e, "A1", "=MFILL(2,1,5)");
    set(&mut e, "D1", "=B1");
    assert_eq!(value(&e, "D1"), num(5.0));

    e.insert_columns(0, 1, 1).unwrap();
    assert_eq!(value(&e, "B1"), num(5.0));
    assert_eq!(value(&e, "C1"), LiteralValue::Empty);
    assert_eq!(content(&e, "E1"), "=C1");
    assert_eq!(value(&e, "E1"), num(0.0));
}

#[test]
fn fixed_axes_still_follow_structural_edits() {
    let mut e = engine();
    set(&mut e, "B2", "8");
    set(&mut e, "A1", "=$B$2");
    e.insert_rows(0, 0, 2).unwrap();
    assert_eq!(content(&e, "A3"), "=$B$4");
    assert_eq!(value(&e, "A3"), num(8.0));
}

#[test]
fn invalid_indices_are_rejected() {
    let mut e = small_engine(3, 3);
    assert!(e.insert_rows(0, 4, 1).is_err());
    assert!(e.delete_columns(0, &[3]).is_err());
    assert!(e.delete_rows(0, &[0, 1, 2]).is_err());
    assert!(e.insert_rows(7, 0, 1).is_err());
}

#[test]
fn oversized_insert_leaves_the_sheet_untouched() {
    let mut e = small_engine(3, 3);
    set(&mut e, "A2", "5");
    set(&mut e, "B1", "=A2");
    assert!(e.insert_rows(0, 0, u32::MAX).is_err());
    assert!(e.insert_columns(0, 0, u32::MAX).is_err());
    assert!(e.insert_rows(0, u32::MAX, 1).is_err());
    assert_eq!(e.sheet_dimensions(0), Some((3, 3)));
    assert_eq!(content(&e, "B1"), "=A2");
    assert_eq!(value(&e, "B1"), num(5.0));
}
