use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use trellis_html::{
    composable, Attributes, Button, CallbackRegistry, Element, HtmlComposition, HtmlRenderer,
    HydrationState, Text, ViewNode,
};

const ROW_SAMPLES: &[usize] = &[16, 128, 1024];

#[composable]
fn table_content(rows: usize) {
    Element("table", Attributes::new().attr("class", "grid"), move || {
        for row in 0..rows {
            Element("tr", Attributes::new(), move || {
                Element("td", Attributes::new(), move || {
                    Text(format!("Row {row}"));
                });
                Element("td", Attributes::new(), move || {
                    Button(Attributes::new(), "Select", move || {
                        black_box(row);
                    });
                });
            });
        }
    });
}

fn compose_tree(rows: usize) -> ViewNode {
    let mut composition = HtmlComposition::new();
    if let Err(err) = composition.render(move || table_content(rows)) {
        panic!("compose failed: {err}");
    }
    match composition.tree() {
        Ok(Some(tree)) => tree,
        other => panic!("no tree: {other:?}"),
    }
}

fn bench_compose(c: &mut Criterion) {
    let mut group = c.benchmark_group("compose");
    for &rows in ROW_SAMPLES {
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, &rows| {
            b.iter(|| black_box(compose_tree(rows)));
        });
    }
    group.finish();
}

fn bench_render(c: &mut Criterion) {
    let renderer = HtmlRenderer::new();
    let mut group = c.benchmark_group("render");
    for &rows in ROW_SAMPLES {
        let tree = compose_tree(rows);
        group.bench_with_input(BenchmarkId::new("plain", rows), &tree, |b, tree| {
            b.iter(|| black_box(renderer.render(tree)));
        });
        let registry = Arc::new(CallbackRegistry::new());
        group.bench_with_input(BenchmarkId::new("hydrated", rows), &tree, |b, tree| {
            b.iter(|| {
                let document = renderer.render_with_hydration(tree, &registry, HydrationState::new());
                black_box(document.map(|document| document.html()))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compose, bench_render);
criterion_main!(benches);
