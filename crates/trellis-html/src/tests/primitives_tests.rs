use super::*;
use crate::{HtmlComposition, HtmlRenderer};
use std::cell::Cell;
use trellis_core::{remember, use_state, MutableState};

fn markup(composition: &HtmlComposition) -> String {
    let tree = composition.tree().expect("tree").expect("root");
    HtmlRenderer::new().render(&tree).into_string()
}

#[test]
fn nested_elements_form_a_tree() {
    let mut composition = HtmlComposition::new();
    composition
        .render(|| {
            Element("section", Attributes::new().attr("class", "card"), || {
                Element("h1", Attributes::new(), || {
                    Text("Title");
                });
                Text("body");
            });
        })
        .expect("render");
    assert_eq!(
        markup(&composition),
        r#"<section class="card"><h1>Title</h1>body</section>"#
    );
}

#[test]
fn button_carries_its_handler_and_label() {
    let mut composition = HtmlComposition::new();
    composition
        .render(|| {
            Button(Attributes::new().id("go"), "Go", || {});
        })
        .expect("render");
    let tree = composition.tree().expect("tree").expect("root");
    let button = tree.as_element().expect("element");
    assert_eq!(button.tag, "button");
    assert!(button.is_interactive());
    assert_eq!(tree.text_content(), "Go");
    assert_eq!(button.attrs.explicit_id(), Some("go"));
}

#[test]
fn state_write_recomposes_only_the_reading_element() {
    let mut composition = HtmlComposition::new();
    let counter: Rc<Cell<Option<MutableState<i32>>>> = Rc::default();
    let sibling_runs = Rc::new(Cell::new(0));
    let sibling_inits = Rc::new(Cell::new(0));

    let counter_in = Rc::clone(&counter);
    let runs = Rc::clone(&sibling_runs);
    let inits = Rc::clone(&sibling_inits);
    composition
        .render(move || {
            let count = use_state(|| 0);
            counter_in.set(Some(count.clone()));
            let runs = Rc::clone(&runs);
            let inits = Rc::clone(&inits);
            Element("div", Attributes::new(), move || {
                let count = count.clone();
                Element("p", Attributes::new(), move || {
                    Text(format!("count {}", count.get()));
                });
                let runs = Rc::clone(&runs);
                let inits = Rc::clone(&inits);
                Element("aside", Attributes::new(), move || {
                    runs.set(runs.get() + 1);
                    let inits = Rc::clone(&inits);
                    remember(move || inits.set(inits.get() + 1));
                    Text("static");
                });
            });
        })
        .expect("render");
    assert_eq!(markup(&composition), "<div><p>count 0</p><aside>static</aside></div>");
    assert_eq!(sibling_runs.get(), 1);

    let count = counter.take().expect("state captured");
    assert!(count.set(1));
    assert_eq!(composition.recompose(), Ok(true));

    assert_eq!(markup(&composition), "<div><p>count 1</p><aside>static</aside></div>");
    assert_eq!(sibling_runs.get(), 1);
    assert_eq!(sibling_inits.get(), 1);
}

#[test]
fn nodes_keep_identity_across_recomposition() {
    let mut composition = HtmlComposition::new();
    let label: Rc<Cell<Option<MutableState<String>>>> = Rc::default();
    let label_in = Rc::clone(&label);
    composition
        .render(move || {
            let text = use_state(|| "first".to_string());
            label_in.set(Some(text.clone()));
            Element("span", Attributes::new(), move || {
                Text(text.get());
            });
        })
        .expect("render");
    let root = composition.root();

    let text = label.take().expect("state captured");
    text.set("second".to_string());
    composition.recompose().expect("recompose");

    assert_eq!(composition.root(), root);
    assert_eq!(markup(&composition), "<span>second</span>");
}

#[test]
fn conditional_children_are_removed() {
    let mut composition = HtmlComposition::new();
    let flag: Rc<Cell<Option<MutableState<bool>>>> = Rc::default();
    let flag_in = Rc::clone(&flag);
    composition
        .render(move || {
            let show = use_state(|| true);
            flag_in.set(Some(show.clone()));
            Element("ul", Attributes::new(), move || {
                Element("li", Attributes::new(), || {
                    Text("always");
                });
                if show.get() {
                    Element("li", Attributes::new(), || {
                        Text("sometimes");
                    });
                }
            });
        })
        .expect("render");
    assert_eq!(markup(&composition), "<ul><li>always</li><li>sometimes</li></ul>");

    flag.take().expect("state captured").set(false);
    composition.recompose().expect("recompose");
    assert_eq!(markup(&composition), "<ul><li>always</li></ul>");
}
