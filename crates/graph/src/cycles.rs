//! Simple-cycle enumeration over index adjacency.

/// Enumerate simple cycles of a directed graph given as forward adjacency,
/// up to `cap` cycles. Each cycle is reported exactly once, rooted at its
/// smallest node index; nodes below the current root are never revisited,
/// which is the standard de-duplication for simple-cycle search.
pub fn find_cycles(adjacency: &[Vec<usize>], cap: usize) -> Vec<Vec<usize>> {
    let n = adjacency.len();
    let mut cycles = Vec::new();
    let mut on_path = vec![false; n];
    let mut path = Vec::new();

    for root in 0..n {
        if cycles.len() >= cap {
            break;
        }
        dfs(root, root, adjacency, &mut on_path, &mut path, &mut cycles, cap);
    }

    cycles
}

fn dfs(
    node: usize,
    root: usize,
    adjacency: &[Vec<usize>],
    on_path: &mut [bool],
    path: &mut Vec<usize>,
    cycles: &mut Vec<Vec<usize>>,
    cap: usize,
) {
    if cycles.len() >= cap {
        return;
    }

    on_path[node] = true;
    path.push(node);

    for &next in &adjacency[node] {
        if next == root {
            cycles.push(path.clone());
            if cycles.len() >= cap {
                break;
            }
        } else if next > root && !on_path[next] {
            dfs(next, root, adjacency, on_path, path, cycles, cap);
        }
    }

    path.pop();
    on_path[node] = false;
}

/// True when the adjacency contains at least one cycle (Kahn's check).
pub fn has_cycle(adjacency: &[Vec<usize>]) -> bool {
    let n = adjacency.len();
    let mut out_degree = vec![0usize; n];
    let mut dependents = vec![Vec::new(); n];
    for (i, deps) in adjacency.iter().enumerate() {
        out_degree[i] = deps.len();
        for &d in deps {
            dependents[d].push(i);
        }
    }

    let mut queue: Vec<usize> = (0..n).filter(|&i| out_degree[i] == 0).collect();
    let mut processed = 0;

    while let Some(node) = queue.pop() {
        processed += 1;
        for &dep in &dependents[node] {
            out_degree[dep] -= 1;
            if out_degree[dep] == 0 {
                queue.push(dep);
            }
        }
    }

    processed != n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_cycles_in_chain() {
        // 0 -> 1 -> 2
        let adjacency = vec![vec![1], vec![2], vec![]];
        assert!(find_cycles(&adjacency, 100).is_empty());
        assert!(!has_cycle(&adjacency));
    }

    #[test]
    fn finds_two_cycle() {
        // 0 <-> 1
        let adjacency = vec![vec![1], vec![0]];
        let cycles = find_cycles(&adjacency, 100);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].len(), 2);
        assert!(has_cycle(&adjacency));
    }

    #[test]
    fn finds_overlapping_cycles_once_each() {
        // 0 -> 1 -> 2 -> 0 and 1 -> 0
        let adjacency = vec![vec![1], vec![2, 0], vec![0]];
        let cycles = find_cycles(&adjacency, 100);
        assert_eq!(cycles.len(), 2);
        assert!(has_cycle(&adjacency));
    }

    #[test]
    fn respects_cap() {
        // complete digraph on 4 nodes has many simple cycles
        let adjacency: Vec<Vec<usize>> = (0..4)
            .map(|i| (0..4).filter(|&j| j != i).collect())
            .collect();
        let cycles = find_cycles(&adjacency, 5);
        assert_eq!(cycles.len(), 5);
    }
}
