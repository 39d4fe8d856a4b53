use crate::core::types::Extent;
use crate::gcl::list::ExtentList;
use crate::gcl::operators::{AndList, CachedList, OrList, SequenceList};
use crate::gcl::posting_list::PostingList;

/// Lists smaller than this many extents are worth materializing once
/// instead of re-evaluating lazily on every probe.
pub const MERGE_LISTS_THRESHOLD: u64 = 256 * 1024;

/// Rewrites an operator tree into a cheaper equivalent: nested ORs and
/// ANDs are flattened, empty branches are pruned, and small ORs,
/// sequences and from-to lists are evaluated immediately.
pub fn simplify(list: ExtentList) -> ExtentList {
    match list {
        ExtentList::Or(or) => simplify_or(or),
        ExtentList::And(and) => simplify_and(and),
        ExtentList::Sequence(sequence) => simplify_sequence(sequence),
        ExtentList::FromTo(mut from_to) => {
            // From-to lists are cheap to evaluate and materializing them
            // restores strict concordance order.
            let mut sizes = 0;
            sizes += from_to.from.len();
            sizes += from_to.to.len();
            if sizes <= MERGE_LISTS_THRESHOLD {
                let mut wrapped = ExtentList::FromTo(from_to);
                materialize(&mut wrapped)
            } else {
                ExtentList::FromTo(from_to)
            }
        }
        other => other,
    }
}

fn simplify_or(or: OrList) -> ExtentList {
    let mut children = Vec::with_capacity(or.children.len());
    for child in or.children {
        match simplify(child) {
            ExtentList::Empty => {}
            ExtentList::Or(nested) => children.extend(nested.children),
            other => children.push(other),
        }
    }
    match children.len() {
        0 => ExtentList::Empty,
        1 => children.into_iter().next().unwrap(),
        _ => {
            // All-postings unions below the threshold collapse into one
            // materialized posting list.
            let flat = children
                .iter()
                .all(|c| matches!(c, ExtentList::Postings(_)));
            if flat {
                let total: u64 = children
                    .iter_mut()
                    .map(|c| c.len())
                    .sum();
                if total <= MERGE_LISTS_THRESHOLD {
                    let mut merged = Vec::with_capacity(total as usize);
                    for child in &children {
                        if let ExtentList::Postings(list) = child {
                            merged.extend_from_slice(list.postings());
                        }
                    }
                    merged.sort_unstable();
                    merged.dedup();
                    return ExtentList::Postings(PostingList::new(merged));
                }
            }
            ExtentList::Or(OrList { children })
        }
    }
}

fn simplify_and(and: AndList) -> ExtentList {
    let mut children = Vec::with_capacity(and.children.len());
    for child in and.children {
        match simplify(child) {
            ExtentList::Empty => return ExtentList::Empty,
            ExtentList::And(nested) => children.extend(nested.children),
            other => children.push(other),
        }
    }
    match children.len() {
        0 => ExtentList::Empty,
        1 => children.into_iter().next().unwrap(),
        _ => ExtentList::And(AndList { children }),
    }
}

fn simplify_sequence(sequence: SequenceList) -> ExtentList {
    let mut children: Vec<ExtentList> =
        sequence.children.into_iter().map(simplify).collect();
    if children.iter_mut().any(|c| c.is_empty()) {
        return ExtentList::Empty;
    }
    if children.len() == 1 {
        return children.into_iter().next().unwrap();
    }
    let total: u64 = children.iter_mut().map(|c| c.len()).sum();
    let mut wrapped = ExtentList::Sequence(SequenceList { children });
    if total <= MERGE_LISTS_THRESHOLD {
        materialize(&mut wrapped)
    } else {
        wrapped
    }
}

/// Evaluates a list eagerly into a CachedList (or Empty).
fn materialize(list: &mut ExtentList) -> ExtentList {
    let extents: Vec<Extent> = list.all_extents();
    if extents.is_empty() {
        ExtentList::Empty
    } else {
        ExtentList::Cached(CachedList::from_extents(extents))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn postings(values: Vec<u64>) -> ExtentList {
        ExtentList::Postings(PostingList::new(values))
    }

    #[test]
    fn test_or_of_postings_materializes() {
        let or = ExtentList::Or(OrList {
            children: vec![postings(vec![3, 7]), postings(vec![1, 7, 9])],
        });
        let mut simplified = simplify(or);
        assert!(matches!(simplified, ExtentList::Postings(_)));
        let starts: Vec<u64> = simplified.all_extents().iter().map(|e| e.start).collect();
        assert_eq!(starts, vec![1, 3, 7, 9]);
    }

    #[test]
    fn test_nested_ops_flatten() {
        let inner = ExtentList::And(AndList {
            children: vec![postings(vec![1]), postings(vec![2])],
        });
        let outer = ExtentList::And(AndList {
            children: vec![inner, postings(vec![3])],
        });
        match simplify(outer) {
            ExtentList::And(and) => assert_eq!(and.children.len(), 3),
            _ => panic!("expected AND"),
        }
    }

    #[test]
    fn test_empty_branches_prune() {
        let or = ExtentList::Or(OrList {
            children: vec![ExtentList::Empty, postings(vec![5])],
        });
        let mut simplified = simplify(or);
        assert_eq!(simplified.all_extents().len(), 1);

        let and = ExtentList::And(AndList {
            children: vec![ExtentList::Empty, postings(vec![5])],
        });
        assert!(matches!(simplify(and), ExtentList::Empty));
    }

    #[test]
    fn test_sequence_materializes() {
        let sequence = ExtentList::Sequence(SequenceList {
            children: vec![postings(vec![1, 4]), postings(vec![2, 5])],
        });
        let mut simplified = simplify(sequence);
        assert!(matches!(simplified, ExtentList::Cached(_)));
        assert_eq!(
            simplified.all_extents(),
            vec![Extent::new(1, 2), Extent::new(4, 5)]
        );
    }
}
