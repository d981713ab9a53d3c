//! 旧文档与用户报告的问题

use geosheet_core::prelude::*;

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

fn scalar(sheet: &Worksheet, name: &str) -> f64 {
    sheet
        .get(name)
        .unwrap()
        .value
        .as_ref()
        .and_then(Shape::as_scalar)
        .unwrap()
}

fn close(a: (f64, f64), b: (f64, f64)) -> bool {
    (a.0 - b.0).abs() < 1e-9 && (a.1 - b.1).abs() < 1e-9
}

#[test]
fn decorated_name_collision_is_a_name_error() {
    let mut sheet = Worksheet::new();
    sheet.execute("c = Cercle").unwrap();
    let result = sheet.execute("C_' = _");
    assert!(matches!(result, Err(SheetError::Name { .. })), "{:?}", result);
    assert!(sheet.contains("c"));
}

#[test]
fn batch_delete_of_dependent_entities() {
    let mut sheet = Worksheet::new();
    sheet.execute("A = Point()").unwrap();
    sheet.execute("B = Point()").unwrap();
    sheet.execute("s = Segment(A, B)").unwrap();
    sheet.execute("del A, B, s").unwrap();
    for name in ["A", "B", "s"] {
        assert!(!sheet.contains(name));
    }
}

#[test]
fn renamed_vertices_survive_undo_redo() {
    let mut sheet = Worksheet::new();
    sheet.execute("F = (1;0)").unwrap();
    sheet.execute("O = (0;0)").unwrap();
    sheet
        .execute("ABCDEF = Polygone_regulier_centre(n=6,centre=O,sommet=F)")
        .unwrap();
    // 重复创建同名多边形被拒绝，且不留下任何东西
    let entities = sheet.registry().len();
    assert!(sheet
        .execute("ABCDEF = Polygone_regulier_centre(n=6,centre=O,sommet=F)")
        .is_err());
    assert_eq!(sheet.registry().len(), entities);

    for (vertex, name) in [("S5", "A"), ("S4", "B"), ("S3", "C"), ("S2", "D"), ("S1", "E")] {
        sheet
            .execute(&format!("{}.renommer(\"{}\", afficher_nom=True)", vertex, name))
            .unwrap();
    }
    for n in 1..=5 {
        assert!(!sheet.contains(&format!("S{}", n)));
    }

    sheet.execute("O = (-1;0)").unwrap();
    let after = sheet.save();
    assert!(sheet.undo().unwrap());
    assert!(close(xy(&sheet, "O"), (0.0, 0.0)));
    assert!(sheet.contains("A") && !sheet.contains("S5"));
    assert!(sheet.redo().unwrap());
    assert_eq!(sheet.save(), after);
    assert!(close(xy(&sheet, "O"), (-1.0, 0.0)));
}

#[test]
fn renaming_a_vertex_twice() {
    let mut sheet = Worksheet::new();
    sheet.execute("F = (1;0)").unwrap();
    sheet.execute("O = (0;0)").unwrap();
    sheet
        .execute("ABCDEF = Polygone_regulier_centre(n=6,centre=O,sommet=F)")
        .unwrap();
    sheet.execute("S5.renommer(\"A\", afficher_nom=True)").unwrap();
    sheet.execute("A.renommer(\"B\", afficher_nom=True)").unwrap();
    assert!(!sheet.contains("S5"));
    assert!(!sheet.contains("A"));
    assert!(sheet.contains("B"));
}

#[test]
fn comma_is_a_pair_or_a_decimal_separator() {
    let mut sheet = Worksheet::new();
    sheet.execute("A=(1,5)").unwrap();
    sheet.execute("B = (-2,3)").unwrap();
    assert_eq!(xy(&sheet, "A"), (1.0, 5.0));
    assert_eq!(xy(&sheet, "B"), (-2.0, 3.0));

    sheet.execute("g = Fonction(\"2x+3\")").unwrap();
    sheet.execute("a = g(5,3)").unwrap();
    assert!((scalar(&sheet, "a") - 13.6).abs() < 1e-9);
    sheet.execute("=Point(1,5 ; g(1,5))").unwrap();
    assert!(close(xy(&sheet, "M1"), (1.5, 6.0)));

    sheet.execute("g2 = Fonction(\"3x+1\")").unwrap();
    sheet.execute("a = g2(-1,2)").unwrap();
    assert!((scalar(&sheet, "a") + 2.6).abs() < 1e-9);
    sheet.execute("=Point(-1,5 ; g2(-1,5))").unwrap();
    assert!(close(xy(&sheet, "M2"), (-1.5, -3.5)));
}

#[test]
fn apostrophe_inside_backquoted_text() {
    let mut sheet = Worksheet::new();
    sheet.execute("txt=`prix unitaire en milliers d'euros`").unwrap();
    assert_eq!(
        sheet.execute("txt.text").unwrap(),
        "prix unitaire en milliers d'euros"
    );
}

#[test]
fn huge_ranges_are_rejected() {
    let mut sheet = Worksheet::new();
    for command in ["len(range(1e30))", "range(1e400)", "for i in range(1e12): pass"] {
        assert!(
            matches!(sheet.execute(command), Err(SheetError::InvalidParameter(_))),
            "{}",
            command
        );
    }
    assert_eq!(sheet.execute("len(range(10))").unwrap(), "10");
}

#[test]
fn deeply_nested_input_is_a_syntax_error() {
    let mut sheet = Worksheet::new();
    let deep = format!("{}1{}", "(".repeat(5000), ")".repeat(5000));
    assert!(matches!(sheet.execute(&deep), Err(SheetError::Syntax { .. })));
    let long_sum = vec!["1"; 5000].join("+");
    assert!(matches!(sheet.execute(&long_sum), Err(SheetError::Syntax { .. })));
    assert_eq!(sheet.execute("((2)) * (3 + (4))").unwrap(), "14");
}

#[test]
fn oversized_regular_polygon_creates_nothing() {
    let mut sheet = Worksheet::new();
    sheet.execute("O = (0, 0)").unwrap();
    sheet.execute("A = (1, 0)").unwrap();
    assert!(sheet.execute("p = RegularPolygon(O, A, 1e15)").is_err());
    assert_eq!(sheet.registry().len(), 2);
    sheet.execute("p = RegularPolygon(O, A, 6)").unwrap();
    assert_eq!(sheet.registry().len(), 2 + 1 + 5);
}
