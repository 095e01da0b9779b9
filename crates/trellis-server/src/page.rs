//! The demo page: a counter with increment, decrement and reset buttons.
#![allow(non_snake_case)]

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use trellis_html::{composable, Attributes, Button, Element, Text};

/// Counter shared by every rendered page. Two handles are equal when they
/// point at the same counter.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicI64>);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn add(&self, delta: i64) -> i64 {
        self.0.fetch_add(delta, Ordering::SeqCst) + delta
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::SeqCst);
    }
}

impl PartialEq for Counter {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[composable]
pub fn CounterPage(count: i64, counter: Counter) {
    Element("main", Attributes::new().id("counter-app"), move || {
        Element("h1", Attributes::new(), || {
            Text("Trellis counter");
        });
        Element(
            "p",
            Attributes::new().id("count").attr("aria-live", "polite"),
            move || {
                Text(count.to_string());
            },
        );
        let counter = counter.clone();
        Element("div", Attributes::new().attr("class", "controls"), move || {
            let down = counter.clone();
            Button(Attributes::new().attr("aria-label", "decrement"), "-", move || {
                down.add(-1);
            });
            let up = counter.clone();
            Button(Attributes::new().attr("aria-label", "increment"), "+", move || {
                up.add(1);
            });
            let reset = counter.clone();
            Button(Attributes::new().attr("class", "reset"), "Reset", move || {
                reset.reset();
            });
        });
    });
}

/// Wraps rendered body markup in a complete HTML document.
pub fn document(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"utf-8\">\
         <title>{title}</title></head><body>{body}</body></html>"
    )
}

#[cfg(test)]
#[path = "tests/page_tests.rs"]
mod tests;
