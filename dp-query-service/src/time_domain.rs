use dp_query_types::{CorrelatedBlock, SuperDomain};

/// A zero-sample Correlated Block (e.g. a `Clocked` provenance with
/// `count == 0`, or an empty `TmsList`) has no `time_range()` at all — it is
/// spec-legal but degenerate, and intersects nothing by definition rather
/// than panicking on a range that doesn't exist.
fn intersects(a: &CorrelatedBlock, b: &CorrelatedBlock) -> bool {
    match (a.time_range(), b.time_range()) {
        (Some(ra), Some(rb)) => ra.intersects(&rb),
        _ => false,
    }
}

/// Partitions a start-time-sorted set of Correlated Blocks into
/// pairwise-disjoint blocks `D` (input order preserved) and an ordered list
/// of Super Domains `G` (§4.5).
///
/// The source algorithm mutates its working list while scanning it
/// (`indexOf`/`remove` inside a `for`, design note §9's second open
/// question). This instead tracks liveness with a parallel `alive` vector
/// over the original, never-reordered `blocks` vector: "removing" an
/// element just flips its flag, and "the element now at position i" (the
/// pseudocode's "do not advance i" step) is simply the next alive index at
/// or after `i`.
pub fn partition(blocks: Vec<CorrelatedBlock>) -> (Vec<CorrelatedBlock>, Vec<SuperDomain>) {
    let len = blocks.len();
    let mut alive = vec![true; len];
    let mut supers = Vec::new();

    let next_alive = |alive: &[bool], from: usize| -> Option<usize> {
        (from..len).find(|&k| alive[k])
    };

    let mut cursor = next_alive(&alive, 0);
    while let Some(i) = cursor {
        let seeds_a_domain = (i + 1..len)
            .filter(|&j| alive[j])
            .any(|j| intersects(&blocks[i], &blocks[j]));

        if !seeds_a_domain {
            cursor = next_alive(&alive, i + 1);
            continue;
        }

        let mut members = vec![i];
        alive[i] = false;
        loop {
            let mut grew = false;
            for j in i..len {
                if !alive[j] {
                    continue;
                }
                let intersects_member = members.iter().any(|&m| intersects(&blocks[m], &blocks[j]));
                if intersects_member {
                    members.push(j);
                    alive[j] = false;
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }

        let domain_blocks = members.into_iter().map(|idx| blocks[idx].clone()).collect();
        supers.push(SuperDomain::new(domain_blocks).expect("seeded with at least one member"));

        // "do not advance i": re-examine whatever now occupies slot i.
        cursor = next_alive(&alive, i);
    }

    let disjoint = blocks
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| alive[*idx])
        .map(|(_, block)| block)
        .collect();

    (disjoint, supers)
}
