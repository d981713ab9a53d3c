//! 工作表的端到端行为：赋值、改名、删除、撤销/重做、环检测、持久化

use geosheet_core::prelude::*;

fn sheet(commands: &[&str]) -> Worksheet {
    let mut sheet = Worksheet::new();
    for command in commands {
        if let Err(err) = sheet.execute(command) {
            panic!("{:?} failed: {}", command, err);
        }
    }
    sheet
}

fn xy(sheet: &Worksheet, name: &str) -> (f64, f64) {
    let p = sheet
        .get(name)
        .unwrap()
        .value
        .as_ref()
        .and_then(Shape::as_point)
        .unwrap();
    (p.x, p.y)
}

#[test]
fn set_then_get() {
    let sheet = sheet(&["A = (1,5)", "B = (-2,3)", "k = 2.5", "u = (1, 2)"]);
    assert_eq!(xy(&sheet, "A"), (1.0, 5.0));
    assert_eq!(xy(&sheet, "B"), (-2.0, 3.0));
    assert_eq!(sheet.get("k").unwrap().category(), Category::Variable);
    assert_eq!(sheet.get("u").unwrap().category(), Category::Vector);
    assert!(matches!(sheet.get("Z"), Err(SheetError::NotFound(_))));
}

#[test]
fn redefining_keeps_dependents() {
    let mut sheet = sheet(&["A = (0, 0)", "B = (3, 4)", "s = [A B]"]);
    assert_eq!(sheet.execute("s.length").unwrap(), "5");
    sheet.execute("B = (6, 8)").unwrap();
    assert_eq!(sheet.execute("s.length").unwrap(), "10");
}

#[test]
fn rename_preserves_identity() {
    let mut sheet = sheet(&["A = (0, 0)", "B = (3, 4)", "s = Segment(A, B)"]);
    let id = sheet.get("A").unwrap().id;
    sheet.execute("A.rename(\"P\")").unwrap();
    assert_eq!(sheet.get("P").unwrap().id, id);
    assert!(sheet.get("s").unwrap().parents.contains(&id));
    sheet.execute("P.x = -3").unwrap();
    assert!(sheet.save().ends_with("s = Segment(P, B)"));
    assert!((sheet.execute("s.length").unwrap().parse::<f64>().unwrap() - 52f64.sqrt()).abs() < 1e-9);
}

#[test]
fn delete_checks_surviving_dependents() {
    let mut sheet = sheet(&["A = (0, 0)", "B = (1, 0)", "s = Segment(A, B)", "d = Line(A, B)"]);
    assert!(matches!(
        sheet.execute("del A"),
        Err(SheetError::DependentsRemain { .. })
    ));
    assert!(sheet.contains("A"));
    assert!(matches!(
        sheet.execute("del A, B, s"),
        Err(SheetError::DependentsRemain { .. })
    ));
    assert_eq!(sheet.registry().len(), 4);
    sheet.execute("del d, s, A, B").unwrap();
    assert!(sheet.registry().is_empty());
}

#[test]
fn undo_restores_byte_identical_text() {
    let mut sheet = sheet(&["A = (1, 5)"]);
    let mut states = vec![sheet.save()];
    for command in ["B = (2, 2)", "A.x = 7", "c = Circle(A, B)", "c.color = \"blue\""] {
        sheet.execute(command).unwrap();
        states.push(sheet.save());
    }
    for expected in states.iter().rev().skip(1) {
        assert!(sheet.undo().unwrap());
        assert_eq!(&sheet.save(), expected);
    }
    for expected in states.iter().skip(1) {
        assert!(sheet.redo().unwrap());
        assert_eq!(&sheet.save(), expected);
    }
}

#[test]
fn consecutive_zooms_make_one_history_entry() {
    let mut sheet = sheet(&["A = (1, 5)"]);
    let before = sheet.history().len();
    sheet.zoom(2.0).unwrap();
    sheet.zoom(1.5).unwrap();
    sheet.zoom(0.5).unwrap();
    assert_eq!(sheet.history().len(), before + 1);
    sheet.execute("B = (0, 0)").unwrap();
    sheet.zoom(2.0).unwrap();
    assert_eq!(sheet.history().len(), before + 3);
}

#[test]
fn circular_definition_is_rejected() {
    let mut sheet = sheet(&["k = 1", "A = Point(k, 2)"]);
    let before = sheet.save();
    let result = sheet.execute("k = \"A.x + 1\"");
    assert!(
        matches!(result, Err(SheetError::CircularDependency { .. })),
        "{:?}",
        result
    );
    assert_eq!(sheet.save(), before);
    assert_eq!(sheet.execute("k").unwrap(), "1");
}

#[test]
fn variables_follow_their_formula() {
    let mut sheet = sheet(&["k = 2", "m = \"3 * k\""]);
    assert_eq!(sheet.execute("m").unwrap(), "6");
    sheet.execute("k = 5").unwrap();
    assert_eq!(sheet.execute("m").unwrap(), "15");
}

#[test]
fn equations_become_shapes() {
    let mut sheet = Worksheet::new();
    sheet.execute("y = 2x + 1").unwrap();
    sheet.execute("x^2 + y^2 = 4").unwrap();
    let categories: Vec<Category> = sheet
        .registry()
        .ordered()
        .into_iter()
        .map(|e| e.category())
        .collect();
    assert_eq!(categories, vec![Category::Line, Category::Circle]);
    assert_eq!(sheet.execute("c1.radius").unwrap(), "2");
}

#[test]
fn forbidden_keywords_are_rejected() {
    let mut sheet = Worksheet::new();
    assert!(matches!(
        sheet.execute("import os"),
        Err(SheetError::Forbidden(_))
    ));
    assert!(matches!(
        sheet.execute("A.__class__"),
        Err(SheetError::Forbidden(_))
    ));
}

#[test]
fn failed_construction_leaves_nothing_behind() {
    let mut sheet = sheet(&["A = (1, 1)"]);
    let before = sheet.save();
    assert!(sheet.execute("d = Line(A, A, B)").is_err());
    assert!(sheet.execute("s = Segment(A, Z)").is_err());
    assert_eq!(sheet.save(), before);
    assert_eq!(sheet.history().len(), 2);
}

#[test]
fn degenerate_entities_do_not_exist() {
    let mut sheet = sheet(&["A = (1, 1)", "B = (2, 2)", "d = Line(A, B)"]);
    sheet.execute("B.xy = (1, 1)").unwrap();
    assert!(!sheet.get("d").unwrap().exists());
    assert_eq!(sheet.execute("d").unwrap(), "d (does not exist)");
    sheet.execute("B.x = 3").unwrap();
    assert!(sheet.get("d").unwrap().exists());
}

#[test]
fn save_then_load_round_trip() {
    let original = sheet(&[
        "window = (-4, 4, -3, 3)",
        "A = (1, 5)",
        "B = (-2, 3)",
        "k = 2",
        "c = Circle(A, k)",
        "g = Function(\"k * x + 1\")",
        "txt = `hello`",
        "B.hide()",
    ]);
    let text = original.save();
    let mut copy = Worksheet::new();
    copy.load(&text).unwrap();
    assert_eq!(copy.save(), text);
    assert_eq!(copy.view().window, (-4.0, 4.0, -3.0, 3.0));
    assert!(!copy.is_modified());
    assert!(!copy.history().can_undo());
}

#[test]
fn macro_runs_as_one_command() {
    let mut sheet = Worksheet::new();
    sheet.add_macro(
        "points",
        Macro::new("for i in range(4):\n    _ = Point(i, i ** 2)"),
    );
    sheet.run_macro("points").unwrap();
    assert_eq!(sheet.registry().len(), 4);
    assert_eq!(xy(&sheet, "M4"), (3.0, 9.0));
    // 整个宏是一条历史记录
    assert!(sheet.undo().unwrap());
    assert!(sheet.registry().is_empty());
}

#[test]
fn inventory_and_cleanup() {
    let mut sheet = sheet(&["A = (0, 0)", "_B = (1, 1)", "_C = (2, 2)", "s = Segment(A, _C)"]);
    assert_eq!(
        sheet.inventory(),
        vec!["A (point)", "_B (point invisible)", "_C (point invisible)", "s (segment)"]
    );
    assert_eq!(sheet.cleanup(), vec!["_B".to_string()]);
    assert!(sheet.contains("_C"));
}
