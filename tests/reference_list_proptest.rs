use proptest::prelude::*;
use std::sync::Arc;
use weak_registry::ReferenceList;

const ITEMS: usize = 6;

#[derive(Clone, Debug)]
enum Op {
    Add(usize),
    Remove(usize),
    // Drop the caller's Arc so the list only holds a reclaimed slot.
    Release(usize),
    Iterate,
    // Add during a pass, after the first item was yielded.
    AddMidPass(usize),
    // Remove the first yielded item during the pass.
    RemoveFirstMidPass,
    Clear,
}

fn arb_op() -> impl Strategy<Value = Op> {
    let idx = 0..ITEMS;
    prop_oneof![
        3 => idx.clone().prop_map(Op::Add),
        2 => idx.clone().prop_map(Op::Remove),
        1 => idx.clone().prop_map(Op::Release),
        2 => Just(Op::Iterate),
        1 => idx.prop_map(Op::AddMidPass),
        1 => Just(Op::RemoveFirstMidPass),
        1 => Just(Op::Clear),
    ]
}

fn item(pool: &mut [Option<Arc<usize>>], i: usize) -> Arc<usize> {
    pool[i].get_or_insert_with(|| Arc::new(i)).clone()
}

fn pass(list: &ReferenceList<usize>) -> Vec<usize> {
    list.iter().unwrap().map(|v| *v).collect()
}

fn newest_first(model: &[usize]) -> Vec<usize> {
    model.iter().rev().copied().collect()
}

// Model ReferenceList as a Vec of ids (oldest first) holding only items
// whose Arc is still alive in the pool.
proptest! {
    #[test]
    fn prop_reference_list_matches_model(ops in proptest::collection::vec(arb_op(), 1..80)) {
        let list: ReferenceList<usize> = ReferenceList::new();
        let mut pool: Vec<Option<Arc<usize>>> = vec![None; ITEMS];
        let mut model: Vec<usize> = Vec::new();

        for op in ops {
            match op {
                Op::Add(i) => {
                    let it = item(&mut pool, i);
                    let expected = !model.contains(&i);
                    prop_assert_eq!(list.add(&it), expected);
                    if expected {
                        model.push(i);
                    }
                }
                Op::Remove(i) => {
                    let it = item(&mut pool, i);
                    let expected = model.contains(&i);
                    prop_assert_eq!(list.remove(&it), expected);
                    model.retain(|&m| m != i);
                }
                Op::Release(i) => {
                    pool[i] = None;
                    model.retain(|&m| m != i);
                }
                Op::Iterate => {
                    prop_assert_eq!(pass(&list), newest_first(&model));
                }
                Op::AddMidPass(i) => {
                    let it = item(&mut pool, i);
                    let before = newest_first(&model);
                    let mut seen = Vec::new();
                    for (n, v) in list.iter().unwrap().enumerate() {
                        if n == 0 {
                            list.add(&it);
                        }
                        seen.push(*v);
                    }
                    if before.is_empty() {
                        // No item yielded, so no add happened.
                        prop_assert!(seen.is_empty());
                    } else {
                        prop_assert_eq!(&seen, &before);
                        if !model.contains(&i) {
                            model.push(i);
                        }
                    }
                }
                Op::RemoveFirstMidPass => {
                    let before = newest_first(&model);
                    let mut seen = Vec::new();
                    for (n, v) in list.iter().unwrap().enumerate() {
                        if n == 0 {
                            prop_assert!(list.remove(&v));
                        }
                        seen.push(*v);
                    }
                    prop_assert_eq!(&seen, &before);
                    if let Some(first) = before.first() {
                        model.retain(|m| m != first);
                    }
                }
                Op::Clear => {
                    list.clear();
                    model.clear();
                }
            }

            prop_assert_eq!(list.len(), model.len());
            prop_assert_eq!(list.is_empty(), model.is_empty());
        }

        prop_assert_eq!(pass(&list), newest_first(&model));
    }
}
