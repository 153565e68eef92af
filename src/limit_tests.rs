use crate::artifact::{compile, CompileFailure, CompileOptions};
use crate::parse::parse;
use crate::validate::{validate, LimitMetric, Limits};

fn repeated_components(n: usize) -> String {
    (0..n)
        .map(|i| format!("<Text>block {}</Text>", i))
        .collect::<Vec<_>>()
        .join("\n")
}

#[test]
fn test_exactly_at_limit_passes() {
    let limits = Limits {
        max_components: 10,
        ..Limits::default()
    };
    let ast = parse(&repeated_components(10), "t").unwrap();
    assert!(validate(&ast, &limits).is_ok());
}

#[test]
fn test_one_over_limit_fails_naming_the_metric() {
    let limits = Limits {
        max_components: 10,
        ..Limits::default()
    };
    let ast = parse(&repeated_components(11), "t").unwrap();
    let err = validate(&ast, &limits).unwrap_err();
    assert_eq!(err.metric, LimitMetric::Components);
    assert_eq!(err.actual, 11);
    assert_eq!(err.ceiling, 10);
    assert!(!err.suggestion.is_empty());
}

#[test]
fn test_size_ceiling() {
    let limits = Limits {
        max_size_bytes: 64,
        ..Limits::default()
    };
    let source = format!("<Text>{}</Text>", "x".repeat(100));
    let ast = parse(&source, "t").unwrap();
    let err = validate(&ast, &limits).unwrap_err();
    assert_eq!(err.metric, LimitMetric::SizeBytes);
}

#[test]
fn test_island_ceiling_counts_hydrating_components() {
    let limits = Limits {
        max_islands: 2,
        ..Limits::default()
    };
    // Three hydrating tags: Var, OnClick, Increment.
    let source = r#"
        <Var name="n" value="0"/>
        <Card><OnClick><Increment target="n"/></OnClick></Card>
    "#;
    let ast = parse(source, "t").unwrap();
    let err = validate(&ast, &limits).unwrap_err();
    assert_eq!(err.metric, LimitMetric::Islands);
    assert_eq!(err.actual, 3);
}

#[test]
fn test_computed_var_ceiling() {
    let limits = Limits {
        max_computed_vars: 1,
        ..Limits::default()
    };
    let source = r#"
        <Var name="a" value="1"/>
        <Var name="b" value="{2 + 3}"/>
        <Var name="c" value="{session.visits}"/>
    "#;
    let ast = parse(source, "t").unwrap();
    // a and b are statically computable; c depends on runtime data.
    let err = validate(&ast, &limits).unwrap_err();
    assert_eq!(err.metric, LimitMetric::ComputedVars);
    assert_eq!(err.actual, 2);
}

#[test]
fn test_soft_warning_below_ceiling() {
    let limits = Limits {
        max_components: 10,
        warn_ratio: 0.8,
        ..Limits::default()
    };
    let ast = parse(&repeated_components(8), "t").unwrap();
    let warnings = validate(&ast, &limits).unwrap();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].metric, LimitMetric::Components);
    assert_eq!(warnings[0].actual, 8);

    // Well under the threshold: no warning.
    let ast = parse(&repeated_components(3), "t").unwrap();
    assert!(validate(&ast, &limits).unwrap().is_empty());
}

#[test]
fn test_compile_fails_without_partial_artifact() {
    let options = CompileOptions {
        limits: Limits {
            max_components: 1,
            ..Limits::default()
        },
    };
    let err = compile("t", "<Card><Text>x</Text></Card>", &options).unwrap_err();
    assert!(matches!(err, CompileFailure::Limit(_)));
}

#[test]
fn test_warnings_survive_compilation() {
    let options = CompileOptions {
        limits: Limits {
            max_components: 10,
            warn_ratio: 0.5,
            ..Limits::default()
        },
    };
    let result = compile("t", &repeated_components(6), &options).unwrap();
    assert_eq!(result.warnings.len(), 1);
}
