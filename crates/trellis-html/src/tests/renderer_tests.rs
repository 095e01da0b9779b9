use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};

fn attr_values<'a>(markup: &'a str, name: &str) -> Vec<&'a str> {
    let needle = format!(" {name}=\"");
    markup
        .match_indices(&needle)
        .map(|(start, _)| {
            let rest = &markup[start + needle.len()..];
            &rest[..rest.find('"').unwrap_or(rest.len())]
        })
        .collect()
}

fn three_buttons(hits: &Arc<AtomicUsize>) -> ViewNode {
    let mut row = ViewNode::element("div").attr("class", "row");
    for weight in [1, 10, 100] {
        let hits = Arc::clone(hits);
        row = row.child(
            ViewNode::element("button")
                .on_click(move || {
                    hits.fetch_add(weight, Ordering::SeqCst);
                })
                .child(format!("+{weight}")),
        );
    }
    row.into()
}

#[test]
fn plain_render_writes_attributes_in_order() {
    let tree: ViewNode = ViewNode::element("div")
        .id("app")
        .attr("class", "shell")
        .attr("lang", "en")
        .child(ViewNode::element("p").child("hello"))
        .into();
    assert_eq!(
        HtmlRenderer::new().render(&tree).as_str(),
        r#"<div id="app" class="shell" lang="en"><p>hello</p></div>"#
    );
}

#[test]
fn plain_render_drops_handlers_and_hydration_ids() {
    let tree: ViewNode = ViewNode::element("button").on_click(|| {}).child("go").into();
    assert_eq!(HtmlRenderer::new().render(&tree).as_str(), "<button>go</button>");
}

#[test]
fn text_and_attributes_are_escaped() {
    let tree: ViewNode = ViewNode::element("p")
        .attr("title", r#"say "hi" & 'bye'"#)
        .child("<script>alert(1)</script> & more")
        .into();
    assert_eq!(
        HtmlRenderer::new().render(&tree).as_str(),
        "<p title=\"say &quot;hi&quot; &amp; &#39;bye&#39;\">\
         &lt;script&gt;alert(1)&lt;/script&gt; &amp; more</p>"
    );
}

#[test]
fn attribute_names_that_break_the_tag_are_dropped() {
    let tree: ViewNode = ViewNode::element("a")
        .attr("href", "/home")
        .attr("onclick=\"steal()\" x", "1")
        .attr("a b", "1")
        .attr("><script", "1")
        .attr("", "1")
        .attr("data-role", "link")
        .child("home")
        .into();
    assert_eq!(
        HtmlRenderer::new().render(&tree).as_str(),
        r#"<a href="/home" data-role="link">home</a>"#
    );
}

#[test]
fn void_elements_have_no_closing_tag() {
    let tree: ViewNode = ViewNode::element("form")
        .child(ViewNode::element("input").attr("name", "q"))
        .child(ViewNode::element("br"))
        .into();
    assert_eq!(
        HtmlRenderer::new().render(&tree).as_str(),
        r#"<form><input name="q"><br></form>"#
    );
}

#[test]
fn hydration_ids_follow_element_positions() {
    let registry = Arc::new(CallbackRegistry::new());
    let tree: ViewNode = ViewNode::element("div")
        .child("intro")
        .child(ViewNode::element("span"))
        .child(ViewNode::element("div").child(ViewNode::element("span")))
        .child(ViewNode::element("span").id("explicit"))
        .into();
    let document = HtmlRenderer::new()
        .render_with_hydration(&tree, &registry, HydrationState::new())
        .expect("render");
    assert_eq!(
        attr_values(document.markup().as_str(), "data-hid"),
        vec!["div-1", "div-1-span-1", "div-1-div-2", "div-1-div-2-span-1", "explicit"]
    );
    assert!(document.markup().as_str().contains(r#"<span id="explicit" data-hid="explicit">"#));
}

#[test]
fn same_shape_renders_identical_ids() {
    let registry = Arc::new(CallbackRegistry::new());
    let build = || -> ViewNode {
        ViewNode::element("ul")
            .children((0..3).map(|n| ViewNode::element("li").child(n.to_string())))
            .into()
    };
    let renderer = HtmlRenderer::new();
    let first = renderer
        .render_with_hydration(&build(), &registry, HydrationState::new())
        .expect("first");
    let second = renderer
        .render_with_hydration(&build(), &registry, HydrationState::new())
        .expect("second");
    assert_eq!(first.markup(), second.markup());
}

#[test]
fn three_buttons_register_three_callbacks() {
    let registry = Arc::new(CallbackRegistry::new());
    let hits = Arc::new(AtomicUsize::new(0));
    let mut document = HtmlRenderer::new()
        .render_with_hydration(&three_buttons(&hits), &registry, HydrationState::new())
        .expect("render");

    let markup = document.markup().as_str().to_string();
    let in_markup = attr_values(&markup, "data-onclick-id");
    assert_eq!(in_markup.len(), 3);
    assert_eq!(
        in_markup.iter().collect::<std::collections::HashSet<_>>().len(),
        3
    );
    assert_eq!(document.payload().callbacks, in_markup);
    assert_eq!(registry.size(), 0);

    registry.retain(document.take_callbacks());
    for id in &in_markup {
        assert!(registry.has_callback(id));
    }
    for id in &in_markup {
        assert!(registry.execute_callback(id));
        assert!(!registry.has_callback(id));
    }
    assert_eq!(hits.load(Ordering::SeqCst), 111);
}

#[test]
fn sequential_renders_leave_the_registry_empty() {
    let registry = Arc::new(CallbackRegistry::new());
    let hits = Arc::new(AtomicUsize::new(0));
    let renderer = HtmlRenderer::new();
    let mut seen = std::collections::HashSet::new();
    for _ in 0..100 {
        let document = renderer
            .render_with_hydration(&three_buttons(&hits), &registry, HydrationState::new())
            .expect("render");
        assert_eq!(registry.size(), 0);
        assert_eq!(document.callbacks().len(), 3);
        seen.extend(document.payload().callbacks.iter().cloned());
    }
    assert_eq!(seen.len(), 300);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[test]
fn payload_script_embeds_state_and_callbacks() {
    let registry = Arc::new(CallbackRegistry::new());
    let mut state = HydrationState::new();
    state.insert("count", &3).expect("count");
    state.insert("label", "</script>").expect("label");
    let tree: ViewNode = ViewNode::element("button").on_click(|| {}).into();
    let document = HtmlRenderer::new()
        .render_with_hydration(&tree, &registry, state)
        .expect("render");

    let id = &document.payload().callbacks[0];
    let script = document.script();
    assert!(script.starts_with(r#"<script type="application/json" id="__trellis_hydration">"#));
    assert!(script.ends_with("</script>"));
    assert!(!script[..script.len() - "</script>".len()].contains("</script>"));
    assert!(script.contains(&format!(r#""callbacks":["{id}"]"#)));
    assert!(script.contains(r#""count":3"#));
    assert!(script.contains(r#""label":"\u003c/script>""#));

    let html = document.html();
    assert!(html.starts_with(document.markup().as_str()));
    assert!(html.ends_with(script));
}

#[test]
fn payload_serializes_state_before_callbacks() {
    let payload = HydrationPayload {
        state: Map::new(),
        callbacks: vec!["a-1".to_string()],
    };
    assert_eq!(
        serde_json::to_string(&payload).expect("json"),
        r#"{"state":{},"callbacks":["a-1"]}"#
    );
}

#[test]
fn hydration_without_handlers_has_empty_callbacks() {
    let registry = Arc::new(CallbackRegistry::new());
    let tree: ViewNode = ViewNode::element("main").child("static").into();
    let document = HtmlRenderer::new()
        .render_with_hydration(&tree, &registry, HydrationState::new())
        .expect("render");
    assert!(document.payload().callbacks.is_empty());
    assert!(document.callbacks().is_empty());
    assert_eq!(
        document.markup().as_str(),
        r#"<main data-hid="main-1">static</main>"#
    );
}
