use crate::parse::parse;
use crate::validate::{
    AttributeValue, TemplateNode, ERR_EXPR_SYNTAX, ERR_ORPHAN_BRANCH, ERR_ORPHAN_CASE,
    ERR_ORPHAN_LOOP_CONTROL, ERR_UNKNOWN_COMPONENT,
};
use crate::vocabulary::TagCategory;

fn component(node: &TemplateNode) -> &crate::validate::ComponentNode {
    match node {
        TemplateNode::Component(c) => c,
        other => panic!("expected component, got {:?}", other),
    }
}

#[test]
fn test_parse_nested_template() {
    let source = r#"
        <Card>
            <Heading>My corner of the web</Heading>
            <Text>{visits + 1} visits</Text>
            <Divider/>
        </Card>
    "#;
    let ast = parse(source, "profile").unwrap();
    assert_eq!(ast.nodes.len(), 1);

    let card = component(&ast.nodes[0]);
    assert_eq!(card.tag, "Card");
    assert_eq!(card.category, TagCategory::Layout);
    assert_eq!(card.children.len(), 3);

    let heading = component(&card.children[0]);
    assert_eq!(heading.tag, "Heading");

    // The Text child holds a binding followed by literal text.
    let text = component(&card.children[1]);
    assert!(matches!(&text.children[0], TemplateNode::Expression(_)));
    assert!(matches!(&text.children[1], TemplateNode::Text(t) if t.value.contains("visits")));

    let divider = component(&card.children[2]);
    assert!(divider.children.is_empty());
}

#[test]
fn test_self_closing_does_not_swallow_siblings() {
    let source = r#"<Var name="n" value="0"/><Text>after</Text>"#;
    let ast = parse(source, "t").unwrap();
    assert_eq!(ast.nodes.len(), 2);
    assert_eq!(component(&ast.nodes[0]).tag, "Var");
    assert_eq!(component(&ast.nodes[1]).tag, "Text");
}

#[test]
fn test_tag_casing_is_restored() {
    // html5ever lowercases tag names; the marker pass restores them.
    let ast = parse("<ForEach source=\"[1]\"><Text>x</Text></ForEach>", "t").unwrap();
    assert_eq!(component(&ast.nodes[0]).tag, "ForEach");
}

#[test]
fn test_html_special_names_keep_their_children() {
    // Table and TextArea would trip the HTML parser's special handling
    // (foster parenting, RCDATA) without the neutral-element rewrite.
    let source = r#"
        <Table>
            <TableRow><TableCell><Text>a</Text></TableCell></TableRow>
        </Table>
        <TextArea rows="4"><Text>seed</Text></TextArea>
    "#;
    let ast = parse(source, "t").unwrap();
    assert_eq!(ast.nodes.len(), 2);
    let table = component(&ast.nodes[0]);
    assert_eq!(table.tag, "Table");
    let row = component(&table.children[0]);
    assert_eq!(row.tag, "TableRow");
    assert_eq!(component(&row.children[0]).tag, "TableCell");

    let textarea = component(&ast.nodes[1]);
    assert_eq!(textarea.tag, "TextArea");
    assert_eq!(component(&textarea.children[0]).tag, "Text");
}

#[test]
fn test_unknown_component_is_rejected_with_span() {
    let source = "<Card>\n  <Blink>old web</Blink>\n</Card>";
    let errors = parse(source, "t").unwrap_err();
    let err = errors
        .iter()
        .find(|d| d.code == ERR_UNKNOWN_COMPONENT)
        .expect("unknown component diagnostic");
    assert!(err.message.contains("Blink"));
    assert_eq!(err.span.line, 2);
    assert_eq!(err.span.column, 3);
}

#[test]
fn test_lowercase_html_is_not_in_the_vocabulary() {
    let errors = parse("<div>plain html</div>", "t").unwrap_err();
    assert!(errors.iter().any(|d| d.code == ERR_UNKNOWN_COMPONENT));
}

#[test]
fn test_all_errors_reported_at_once() {
    let source = r#"
        <Blink>one</Blink>
        <Text>{count +}</Text>
        <Else><Text>orphan</Text></Else>
    "#;
    let errors = parse(source, "t").unwrap_err();
    assert!(errors.iter().any(|d| d.code == ERR_UNKNOWN_COMPONENT));
    assert!(errors.iter().any(|d| d.code == ERR_EXPR_SYNTAX));
    assert!(errors.iter().any(|d| d.code == ERR_ORPHAN_BRANCH));
    assert!(errors.len() >= 3);
}

#[test]
fn test_expression_error_location() {
    let errors = parse("<Text>{1 +}</Text>", "t").unwrap_err();
    let err = &errors[0];
    assert_eq!(err.code, ERR_EXPR_SYNTAX);
    // The caret lands on the offending position inside the binding.
    assert_eq!(err.span.line, 1);
    assert!(err.span.column > 7);
}

#[test]
fn test_orphan_structure_diagnostics() {
    let errors = parse("<Break/>", "t").unwrap_err();
    assert!(errors.iter().any(|d| d.code == ERR_ORPHAN_LOOP_CONTROL));

    let errors = parse("<Case value=\"1\"><Text>x</Text></Case>", "t").unwrap_err();
    assert!(errors.iter().any(|d| d.code == ERR_ORPHAN_CASE));

    // Break nested under an If inside a loop is legal.
    let source = r#"
        <ForEach source="[1,2,3]">
            <If when="{item == 2}"><Break/></If>
            <Text>{item}</Text>
        </ForEach>
    "#;
    assert!(parse(source, "t").is_ok());
}

#[test]
fn test_whitespace_only_text_is_discarded() {
    let ast = parse("<Card>\n\n    <Text>x</Text>   \n</Card>", "t").unwrap();
    let card = component(&ast.nodes[0]);
    assert_eq!(card.children.len(), 1);
}

#[test]
fn test_attribute_bindings() {
    let ast = parse(r#"<Image src="cat.gif" width="{w * 2}"/>"#, "t").unwrap();
    let image = component(&ast.nodes[0]);
    assert!(matches!(
        image.attribute("src"),
        Some(AttributeValue::Static(s)) if s == "cat.gif"
    ));
    assert!(matches!(
        image.attribute("width"),
        Some(AttributeValue::Dynamic(_))
    ));
}

#[test]
fn test_mixed_attribute_becomes_concatenation() {
    let ast = parse(r#"<Link href="/posts/{slug}"/>"#, "t").unwrap();
    let link = component(&ast.nodes[0]);
    match link.attribute("href") {
        Some(AttributeValue::Dynamic(expr)) => {
            assert_eq!(expr.deps(), vec!["slug".to_string()]);
        }
        other => panic!("expected dynamic href, got {:?}", other),
    }
}

#[test]
fn test_conditional_chain_parses() {
    let source = r#"
        <If when="{mood == 'happy'}"><Text>:)</Text></If>
        <ElseIf when="{mood == 'sad'}"><Text>:(</Text></ElseIf>
        <Else><Text>:|</Text></Else>
    "#;
    let ast = parse(source, "t").unwrap();
    assert_eq!(ast.nodes.len(), 3);
    assert_eq!(component(&ast.nodes[0]).tag, "If");
    assert_eq!(component(&ast.nodes[1]).tag, "ElseIf");
    assert_eq!(component(&ast.nodes[2]).tag, "Else");
}
