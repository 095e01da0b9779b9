use super::*;

fn value_at<T: Clone + 'static>(table: &SlotTable, index: usize) -> T {
    table.value::<T>(index).cloned().expect("value slot")
}

/// Opens `key`, reuses or inserts one `i32` value and closes the group.
fn group_with_value(table: &mut SlotTable, key: Key, value: i32) -> Vec<Slot> {
    table.begin_group(key);
    match table.probe_value::<i32>(None) {
        ValueProbe::Matches => {
            table.advance();
        }
        _ => {
            table.insert_value(Box::new(value), None);
        }
    }
    table.end_group()
}

#[test]
fn first_pass_inserts_groups_and_values() {
    let mut table = SlotTable::new();
    table.reset();
    let group = table.begin_group(7);
    assert!(group.inserted);
    assert_eq!(table.probe_value::<i32>(None), ValueProbe::Missing);
    let index = table.insert_value(Box::new(5i32), None);
    assert!(table.end_group().is_empty());
    assert!(table.finish_pass().is_empty());

    assert_eq!(table.len(), 2);
    assert_eq!(value_at::<i32>(&table, index), 5);
    assert_eq!(table.debug_dump_groups(), vec![(0, 7, None, 1)]);
}

#[test]
fn second_pass_reuses_matching_slots() {
    let mut table = SlotTable::new();
    table.reset();
    group_with_value(&mut table, 1, 10);
    table.finish_pass();

    table.reset();
    let group = table.begin_group(1);
    assert!(!group.inserted);
    assert_eq!(table.probe_value::<i32>(None), ValueProbe::Matches);
    let index = table.advance();
    table.end_group();
    table.finish_pass();

    assert_eq!(value_at::<i32>(&table, index), 10);
    assert_eq!(table.len(), 2);
}

#[test]
fn type_change_is_reported_as_mismatch() {
    let mut table = SlotTable::new();
    table.reset();
    group_with_value(&mut table, 1, 10);
    table.finish_pass();

    table.reset();
    table.begin_group(1);
    assert_eq!(table.probe_value::<String>(None), ValueProbe::TypeMismatch);
    let (index, old) = table.replace_value(Box::new(String::from("x")), None);
    assert_eq!(old.kind(), SlotKind::Value);
    table.end_group();
    table.finish_pass();
    assert_eq!(value_at::<String>(&table, index), "x");
}

#[test]
fn tagged_value_from_another_call_site_is_a_mismatch() {
    let mut table = SlotTable::new();
    table.reset();
    table.begin_group(1);
    table.insert_value(Box::new(1i32), Some(11));
    table.end_group();
    table.finish_pass();

    table.reset();
    table.begin_group(1);
    assert_eq!(table.probe_value::<i32>(Some(11)), ValueProbe::Matches);
    assert_eq!(table.probe_value::<i32>(None), ValueProbe::Matches);
    assert_eq!(table.probe_value::<i32>(Some(12)), ValueProbe::KeyMismatch);
    let (index, old) = table.replace_value(Box::new(2i32), Some(12));
    assert_eq!(old.kind(), SlotKind::Value);
    table.end_group();
    table.finish_pass();
    assert_eq!(value_at::<i32>(&table, index), 2);
}

#[test]
fn keyed_group_moves_to_cursor() {
    let mut table = SlotTable::new();
    table.reset();
    group_with_value(&mut table, 1, 100);
    group_with_value(&mut table, 2, 200);
    table.finish_pass();

    table.reset();
    let second = table.begin_group(2);
    assert!(!second.inserted);
    assert_eq!(second.index, 0);
    assert_eq!(table.probe_value::<i32>(None), ValueProbe::Matches);
    let index = table.advance();
    assert_eq!(value_at::<i32>(&table, index), 200);
    table.end_group();
    let first = table.begin_group(1);
    assert!(!first.inserted);
    table.advance();
    table.end_group();
    assert!(table.finish_pass().is_empty());

    let keys: Vec<Key> = table
        .debug_dump_groups()
        .into_iter()
        .map(|(_, key, _, _)| key)
        .collect();
    assert_eq!(keys, vec![2, 1]);
}

#[test]
fn unvisited_children_are_returned_from_end_group() {
    let mut table = SlotTable::new();
    table.reset();
    table.begin_group(1);
    group_with_value(&mut table, 2, 1);
    group_with_value(&mut table, 3, 2);
    table.end_group();
    table.finish_pass();
    assert_eq!(table.len(), 5);

    table.reset();
    table.begin_group(1);
    group_with_value(&mut table, 2, 1);
    let removed = table.end_group();
    table.finish_pass();

    assert_eq!(removed.len(), 2);
    assert_eq!(removed[0].kind(), SlotKind::Group);
    assert_eq!(table.len(), 3);
    assert_eq!(table.debug_dump_groups()[0], (0, 1, None, 2));
}

#[test]
fn unvisited_root_slots_are_returned_from_finish_pass() {
    let mut table = SlotTable::new();
    table.reset();
    group_with_value(&mut table, 1, 1);
    group_with_value(&mut table, 2, 2);
    table.finish_pass();

    table.reset();
    group_with_value(&mut table, 1, 1);
    let removed = table.finish_pass();
    assert_eq!(removed.len(), 2);
    assert_eq!(table.len(), 2);
}

#[test]
fn skip_current_group_keeps_contents() {
    let mut table = SlotTable::new();
    table.reset();
    table.begin_group(1);
    table.insert_value(Box::new(1i32), None);
    table.insert_node(4);
    table.end_group();
    table.finish_pass();

    table.reset();
    table.begin_group(1);
    assert_eq!(table.nodes_in_current_group(), vec![4]);
    table.skip_current_group();
    assert!(table.end_group().is_empty());
    assert!(table.finish_pass().is_empty());
    assert_eq!(table.len(), 3);
}

#[test]
fn node_slot_where_value_expected_is_kind_mismatch() {
    let mut table = SlotTable::new();
    table.reset();
    table.begin_group(1);
    table.insert_node(9);
    table.end_group();
    table.finish_pass();

    table.reset();
    table.begin_group(1);
    assert_eq!(
        table.probe_value::<i32>(None),
        ValueProbe::KindMismatch(SlotKind::Node)
    );
    assert_eq!(table.probe_node(), NodeProbe::Existing(9));
}

#[test]
fn recompose_at_scope_reopens_nested_group() {
    let mut table = SlotTable::new();
    table.reset();
    table.begin_group(1);
    let inner = table.begin_group(2);
    table.set_group_scope(inner.index, 42);
    table.insert_value(Box::new(1i32), None);
    table.end_group();
    table.insert_value(Box::new(2i32), None);
    table.end_group();
    table.finish_pass();
    assert_eq!(table.len(), 4);

    assert!(table.begin_recompose_at_scope(42));
    assert_eq!(table.cursor(), inner.index + 1);
    assert_eq!(table.probe_value::<i32>(None), ValueProbe::Matches);
    table.advance();
    // The body now stores one more value.
    table.insert_value(Box::new(3i32), None);
    assert!(table.end_recompose().is_empty());

    assert_eq!(table.len(), 5);
    let groups = table.debug_dump_groups();
    assert_eq!(groups[0], (0, 1, None, 4));
    assert_eq!(groups[1], (1, 2, Some(42), 2));
    assert_eq!(value_at::<i32>(&table, 4), 2);
}

#[test]
fn recompose_at_unknown_scope_fails() {
    let mut table = SlotTable::new();
    table.reset();
    group_with_value(&mut table, 1, 1);
    table.finish_pass();
    assert!(!table.begin_recompose_at_scope(99));
}

#[test]
fn take_all_empties_the_table() {
    let mut table = SlotTable::new();
    table.reset();
    group_with_value(&mut table, 1, 1);
    table.finish_pass();
    let all = table.take_all();
    assert_eq!(all.len(), 2);
    assert!(table.is_empty());
}
