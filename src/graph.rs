use std::collections::HashSet;
use std::hash::Hash;

/// Returns true when adding an edge `from -> to` would close a cycle in the
/// processing graph described by `neighbors`. Self edges always count.
pub fn would_create_cycle<Node, Neighbors, Iter>(
    from: &Node,
    to: &Node,
    mut neighbors: Neighbors,
) -> bool
where
    Node: Clone + Eq + Hash,
    Neighbors: FnMut(&Node) -> Iter,
    Iter: IntoIterator<Item = Node>,
{
    if from == to {
        return true;
    }
    // The new edge closes a cycle exactly when `from` is already
    // reachable from `to`.
    let mut visited = HashSet::new();
    let mut stack = vec![to.clone()];
    while let Some(node) = stack.pop() {
        if node == *from {
            return true;
        }
        if !visited.insert(node.clone()) {
            continue;
        }
        stack.extend(neighbors(&node));
    }
    false
}
