use crate::artifact::{compile, CompileOptions};
use crate::islands::{detect, SkeletonNode};
use crate::parse::parse;

fn islands_of(source: &str) -> crate::islands::Detection {
    detect(&parse(source, "t").unwrap())
}

#[test]
fn test_fully_static_template_has_zero_islands() {
    let source = r#"
        <Page>
            <Heading>Welcome</Heading>
            <Card><Text>Nothing here moves.</Text></Card>
            <Image src="cat.gif"/>
        </Page>
    "#;
    let detection = islands_of(source);
    assert!(detection.islands.is_empty());
    assert_eq!(detection.skeleton.len(), 1);
}

#[test]
fn test_two_sibling_dynamic_subtrees_are_two_islands() {
    let source = r#"
        <Section>
            <Card><OnClick><Set target="x" value="1"/></OnClick></Card>
            <Card><OnClick><Set target="y" value="1"/></OnClick></Card>
        </Section>
    "#;
    let detection = islands_of(source);
    assert_eq!(detection.islands.len(), 2);
    assert_ne!(detection.islands[0].id, detection.islands[1].id);
}

#[test]
fn test_static_siblings_are_hoisted() {
    let source = r#"
        <Card>
            <Heading>static</Heading>
            <Text>{count}</Text>
            <Divider/>
        </Card>
    "#;
    let detection = islands_of(source);
    assert_eq!(detection.islands.len(), 1);
    assert_eq!(detection.islands[0].component_name, "Text");

    // The Card shell stays in the skeleton with the static children around
    // an island slot.
    match &detection.skeleton[0] {
        SkeletonNode::Element { tag, children, .. } => {
            assert_eq!(tag, "Card");
            assert_eq!(children.len(), 3);
            assert!(matches!(children[0], SkeletonNode::Element { .. }));
            assert!(matches!(children[1], SkeletonNode::IslandSlot { .. }));
            assert!(matches!(children[2], SkeletonNode::Element { .. }));
        }
        other => panic!("expected element, got {:?}", other),
    }
}

#[test]
fn test_leading_var_joins_the_next_island() {
    let source = r#"
        <Var name="count" value="0"/>
        <ForEach source="[1,2,3]"><Increment target="count"/></ForEach>
    "#;
    let detection = islands_of(source);
    assert_eq!(detection.islands.len(), 1);
    let island = &detection.islands[0];
    assert_eq!(island.component_name, "ForEach");
    assert_eq!(island.nodes.len(), 2);
}

#[test]
fn test_dynamic_conditional_chain_is_one_island() {
    let source = r#"
        <If when="{mood == 'happy'}"><Text>:)</Text></If>
        <Else><Text>:|</Text></Else>
    "#;
    let detection = islands_of(source);
    assert_eq!(detection.islands.len(), 1);
    assert_eq!(detection.islands[0].component_name, "If");
    assert_eq!(detection.islands[0].nodes.len(), 2);
}

#[test]
fn test_constant_conditional_folds_into_skeleton() {
    let source = r#"
        <If when="{1 > 2}"><Text>impossible</Text></If>
        <Else><Text>always</Text></Else>
    "#;
    let detection = islands_of(source);
    assert!(detection.islands.is_empty());
    match &detection.skeleton[0] {
        SkeletonNode::Element { tag, children, .. } => {
            assert_eq!(tag, "Text");
            assert!(matches!(&children[0], SkeletonNode::Text { value } if value == "always"));
        }
        other => panic!("expected folded Else branch, got {:?}", other),
    }
}

#[test]
fn test_constant_loop_unrolls_into_skeleton() {
    let source = r#"<Repeat count="3"><Divider/></Repeat>"#;
    let detection = islands_of(source);
    assert!(detection.islands.is_empty());
    assert_eq!(detection.skeleton.len(), 3);
}

#[test]
fn test_constant_attribute_binding_stays_static() {
    let source = r#"<Image width="{160 * 2}" src="banner.png"/>"#;
    let detection = islands_of(source);
    assert!(detection.islands.is_empty());
    match &detection.skeleton[0] {
        SkeletonNode::Element { attributes, .. } => {
            assert!(attributes.contains(&("width".to_string(), "320".to_string())));
        }
        other => panic!("expected element, got {:?}", other),
    }
}

#[test]
fn test_compilation_is_deterministic() {
    let source = r#"
        <Var name="likes" value="0"/>
        <Card pad="{4 + 4}">
            <Text>{likes} likes</Text>
            <OnClick><Increment target="likes"/></OnClick>
        </Card>
        <Footer><Text>bye</Text></Footer>
    "#;
    let a = compile("page", source, &CompileOptions::default()).unwrap();
    let b = compile("page", source, &CompileOptions::default()).unwrap();
    assert_eq!(a.artifact.to_json(), b.artifact.to_json());
    assert_eq!(a.content_hash, b.content_hash);
}

#[test]
fn test_island_ids_are_stable_for_untouched_subtrees() {
    let before = r#"
        <Card><OnClick><Set target="x" value="1"/></OnClick></Card>
        <Text>version one</Text>
    "#;
    let after = r#"
        <Card><OnClick><Set target="x" value="1"/></OnClick></Card>
        <Text>version two, edited</Text>
    "#;
    let a = islands_of(before);
    let b = islands_of(after);
    assert_eq!(a.islands.len(), 1);
    assert_eq!(b.islands.len(), 1);
    // Editing a static sibling leaves the island's identity alone.
    assert_eq!(a.islands[0].id, b.islands[0].id);
}

#[test]
fn test_precomputed_props_and_descriptors() {
    let source = r#"<Gallery columns="{2 + 1}" items="{photos}"><OnClick><Set target="open" value="true"/></OnClick></Gallery>"#;
    let result = compile("g", source, &CompileOptions::default()).unwrap();
    assert_eq!(result.artifact.islands.len(), 1);
    let island = &result.artifact.islands[0];
    assert_eq!(island.component_name, "Gallery");
    assert_eq!(
        island.precomputed_props.get("columns"),
        Some(&serde_json::json!(3))
    );
    assert_eq!(island.prop_descriptors.len(), 1);
    assert_eq!(island.prop_descriptors[0].name, "items");
    assert_eq!(island.prop_descriptors[0].deps, vec!["photos".to_string()]);
}

#[test]
fn test_limits_snapshot_counts_islands() {
    let source = r#"
        <Card><OnClick><Set target="x" value="1"/></OnClick></Card>
        <Text>static</Text>
    "#;
    let result = compile("t", source, &CompileOptions::default()).unwrap();
    assert_eq!(result.artifact.limits.island_count, 1);
    assert!(result.artifact.limits.component_count >= 4);
}
