//! Evaluation order of the control blocks.

use std::collections::BTreeSet;

/// Result of ordering the control blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationOrder {
    /// Block indices in evaluation order
    pub order: Vec<usize>,
    /// Blocks left on algebraic loops, appended to `order` in declaration order
    pub looped: Vec<usize>,
}

/// Topologically sort blocks given, per block, the blocks it reads at the
/// same step.
///
/// Kahn's algorithm with the lowest declaration index taken first among the
/// ready blocks, so independent blocks keep their declaration order.
pub fn evaluation_order(feeds: &[Vec<usize>]) -> EvaluationOrder {
    let n = feeds.len();
    let mut pending = vec![0usize; n];
    let mut readers: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (block, sources) in feeds.iter().enumerate() {
        for &src in sources {
            pending[block] += 1;
            readers[src].push(block);
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&b| pending[b] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(block) = ready.pop_first() {
        order.push(block);
        for &reader in &readers[block] {
            pending[reader] -= 1;
            if pending[reader] == 0 {
                ready.insert(reader);
            }
        }
    }

    let looped: Vec<usize> = (0..n).filter(|&b| pending[b] > 0).collect();
    order.extend(&looped);
    EvaluationOrder { order, looped }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_sorted_regardless_of_declaration() {
        // 0 reads 2, 2 reads 1
        let result = evaluation_order(&[vec![2], vec![], vec![1]]);
        assert_eq!(result.order, vec![1, 2, 0]);
        assert!(result.looped.is_empty());
    }

    #[test]
    fn test_ties_keep_declaration_order() {
        let result = evaluation_order(&[vec![], vec![], vec![0, 1], vec![]]);
        assert_eq!(result.order, vec![0, 1, 3, 2]);
    }

    #[test]
    fn test_loop_appended_in_declaration_order() {
        // 1 and 2 read each other, 3 reads 2
        let result = evaluation_order(&[vec![], vec![2], vec![1, 0], vec![2]]);
        assert_eq!(result.order, vec![0, 1, 2, 3]);
        assert_eq!(result.looped, vec![1, 2, 3]);
    }
}
