use mutator::catalog::{Catalog, MutationKind, MutationRule, Operation, RuleTarget};
use mutator::syntax::Span;

fn method_op(name: &str, arg_count: usize) -> Operation<'_> {
    Operation {
        target: RuleTarget::Method,
        name,
        name_span: Span::new(5, 5 + name.len(), 1, 6),
        arg_count,
    }
}

fn operator_op(name: &str) -> Operation<'_> {
    Operation { target: RuleTarget::Operator, name, name_span: Span::new(2, 2 + name.len(), 1, 3), arg_count: 0 }
}

#[test]
fn first_or_default_maps_to_first() {
    let catalog = Catalog::standard();
    let op = method_op("FirstOrDefault", 0);
    let rules: Vec<_> = catalog.lookup(&op).collect();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].to, "First");
    assert_eq!(rules[0].display_name(), "Linq method mutation (FirstOrDefault() to First())");
}

#[test]
fn lookup_is_keyed_on_target() {
    let catalog = Catalog::standard();
    // `true` is a literal rule, never a method
    assert_eq!(catalog.lookup(&method_op("true", 0)).count(), 0);
    assert_eq!(catalog.lookup(&method_op("Unknown", 1)).count(), 0);
}

#[test]
fn comparison_produces_boundary_and_negate() {
    let catalog = Catalog::standard();
    let rules: Vec<_> = catalog.lookup(&operator_op(">")).collect();
    assert_eq!(rules.len(), 2);
    assert_eq!((rules[0].kind, rules[0].to), (MutationKind::Boundary, ">="));
    assert_eq!((rules[1].kind, rules[1].to), (MutationKind::NegateComparison, "<="));
    assert_eq!(rules[0].display_name(), "Boundary mutation (> to >=)");
}

#[test]
fn requires_arguments_guard() {
    let catalog = Catalog::standard();
    let any = catalog.lookup(&method_op("Any", 0)).next().unwrap();
    assert!(any.recognizes(&method_op("Any", 0)));
    assert!(!any.guard_allows(&method_op("Any", 0)));
    assert!(!any.applies(&method_op("Any", 0)));
    assert!(any.applies(&method_op("Any", 1)));

    let all = catalog.lookup(&method_op("All", 0)).next().unwrap();
    assert!(all.applies(&method_op("All", 0)));
}

#[test]
fn transform_substitutes_name_inside_node() {
    let rule = MutationRule::method(MutationKind::Linq, "First", "FirstOrDefault");
    let node_text = "list.First()";
    let node_span = Span::new(0, node_text.len(), 1, 1);
    let op = Operation { target: RuleTarget::Method, name: "First", name_span: Span::new(5, 10, 1, 6), arg_count: 0 };
    let replacement = rule.transform(&op, node_text, node_span).unwrap();
    assert_eq!(replacement.fragment, "list.FirstOrDefault()");
    assert_eq!(replacement.display_name, "Linq method mutation (First() to FirstOrDefault())");
}

#[test]
fn transform_rejects_name_outside_node() {
    let rule = MutationRule::method(MutationKind::Linq, "First", "Last");
    let op = Operation { target: RuleTarget::Method, name: "First", name_span: Span::new(20, 25, 2, 1), arg_count: 0 };
    assert!(rule.transform(&op, "list.First()", Span::new(0, 12, 1, 1)).is_none());
}

#[test]
fn without_kinds_drops_rules() {
    let catalog = Catalog::standard();
    let trimmed = catalog.without_kinds(&[MutationKind::Boundary]);
    assert!(trimmed.len() < catalog.len());
    assert!(trimmed.rules().iter().all(|r| r.kind != MutationKind::Boundary));
    let rules: Vec<_> = trimmed.lookup(&operator_op(">")).collect();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].kind, MutationKind::NegateComparison);
}

#[test]
fn kinds_parse_from_their_names() {
    for kind in MutationKind::ALL {
        assert_eq!(kind.as_str().parse::<MutationKind>(), Ok(kind));
    }
    let err = "nope".parse::<MutationKind>().unwrap_err();
    assert!(err.contains("unknown mutation kind"));
}

#[test]
fn custom_catalog_keeps_registration_order() {
    let catalog = Catalog::new([
        MutationRule::method(MutationKind::Linq, "Min", "Max"),
        MutationRule::method(MutationKind::Linq, "Min", "Sum"),
    ]);
    let targets: Vec<_> = catalog.lookup(&method_op("Min", 0)).map(|r| r.to).collect();
    assert_eq!(targets, vec!["Max", "Sum"]);
}
