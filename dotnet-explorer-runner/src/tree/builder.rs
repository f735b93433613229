// Copyright (c) The dotnet-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::TreeNode;
use crate::test_name::ParsedTestName;
use indexmap::IndexMap;

/// Builds a trie of namespace segments from parsed test names.
///
/// Each name becomes a path from the root; the node where a name ends is marked as a test.
/// Children keep insertion order.
pub fn build_tree<'a>(names: impl IntoIterator<Item = &'a ParsedTestName>) -> TreeNode {
    let mut root = TreeNode::root();
    for name in names {
        insert(&mut root, name.segments());
    }
    root
}

fn insert(root: &mut TreeNode, segments: &[String]) {
    let mut node = root;
    let mut path = String::new();
    for segment in segments {
        let parent_path = path.clone();
        if !path.is_empty() {
            path.push('.');
        }
        path.push_str(segment);

        node = node
            .children
            .entry(segment.clone())
            .or_insert_with(|| TreeNode::new(segment.clone(), parent_path));
    }
    // An empty segment list names the root, which is never a test.
    if !node.is_root() {
        node.is_test = true;
    }
}

/// Builds a single-level tree: every name is a leaf directly below the root.
pub fn build_flat<'a>(names: impl IntoIterator<Item = &'a ParsedTestName>) -> TreeNode {
    let mut root = TreeNode::root();
    for name in names {
        let full_name = name.full_name().to_owned();
        root.children
            .entry(full_name.clone())
            .or_insert_with(|| TreeNode::new(full_name, String::new()))
            .is_test = true;
    }
    root
}

/// Collapses chains of single-child folders: `A` → `B` → {tests} becomes `A.B` → {tests}.
///
/// A folder is merged with its only child when it is not itself a test and the child is a
/// folder. Leaves are never absorbed, and the root is never merged. Applying this to an already
/// merged tree returns it unchanged.
pub fn merge_single_child_chains(mut root: TreeNode) -> TreeNode {
    root.children = merge_children(std::mem::take(&mut root.children));
    root
}

fn merge_children(children: IndexMap<String, TreeNode>) -> IndexMap<String, TreeNode> {
    children
        .into_values()
        .map(|child| {
            let merged = merge_node(child);
            (merged.name.clone(), merged)
        })
        .collect()
}

fn merge_node(mut node: TreeNode) -> TreeNode {
    node.children = merge_children(std::mem::take(&mut node.children));

    while !node.is_test && node.children.len() == 1 {
        let Some((_, child)) = node.children.pop() else {
            break;
        };
        if child.children.is_empty() {
            node.children.insert(child.name.clone(), child);
            break;
        }
        // The child's children already carry `parent_path.name.child` as their parent path,
        // which is exactly the merged node's full name.
        node.name = format!("{}.{}", node.name, child.name);
        node.children = child.children;
        node.is_test = child.is_test;
        node.test_status = child.test_status;
    }

    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn parse_all(names: &[&str]) -> Vec<ParsedTestName> {
        names.iter().map(|name| ParsedTestName::new(*name)).collect()
    }

    fn shape(node: &TreeNode) -> Vec<(String, bool)> {
        node.iter()
            .skip(1)
            .map(|node| (node.full_name(), node.is_folder()))
            .collect()
    }

    #[test]
    fn builds_trie() {
        let names = parse_all(&["N.C.A", "N.C.B(System.Int32)", "N.D.E"]);
        let root = build_tree(&names);

        assert_eq!(
            shape(&root),
            vec![
                ("N".to_owned(), true),
                ("N.C".to_owned(), true),
                ("N.C.A".to_owned(), false),
                ("N.C.B(System.Int32)".to_owned(), false),
                ("N.D".to_owned(), true),
                ("N.D.E".to_owned(), false),
            ]
        );

        let leaf = root
            .child("N")
            .and_then(|n| n.child("C"))
            .and_then(|c| c.child("B(System.Int32)"))
            .expect("leaf exists");
        assert_eq!(leaf.display_name(), "B");
        assert_eq!(leaf.parent_path(), "N.C");
        assert!(leaf.is_test());
    }

    #[test]
    fn name_ending_where_another_passes_through() {
        let names = parse_all(&["N.C", "N.C.M"]);
        let root = build_tree(&names);
        let c = root.child("N").and_then(|n| n.child("C")).unwrap();
        assert!(c.is_test());
        assert!(c.is_folder());
        assert_eq!(c.children().len(), 1);
    }

    #[test]
    fn duplicate_names_are_one_leaf() {
        let names = parse_all(&["N.C.M", "N.C.M"]);
        let root = build_tree(&names);
        assert_eq!(root.tests().count(), 1);
    }

    #[test]
    fn flat_tree() {
        let names = parse_all(&["N.C.M", "N.D.M"]);
        let root = build_flat(&names);
        assert_eq!(
            shape(&root),
            vec![("N.C.M".to_owned(), false), ("N.D.M".to_owned(), false)]
        );
    }

    #[test]
    fn merge_collapses_chains() {
        let names = parse_all(&["A.B.C.T1", "A.B.C.T2", "A.X.T3"]);
        let merged = merge_single_child_chains(build_tree(&names));

        assert_eq!(
            shape(&merged),
            vec![
                ("A".to_owned(), true),
                ("A.B.C".to_owned(), true),
                ("A.B.C.T1".to_owned(), false),
                ("A.B.C.T2".to_owned(), false),
                ("A.X".to_owned(), true),
                ("A.X.T3".to_owned(), false),
            ]
        );
        let bc = merged.child("A").and_then(|a| a.child("B.C")).unwrap();
        assert_eq!(bc.name(), "B.C");
        assert_eq!(bc.parent_path(), "A");
    }

    #[test]
    fn merge_never_absorbs_leaf() {
        let names = parse_all(&["A.B.T"]);
        let merged = merge_single_child_chains(build_tree(&names));
        assert_eq!(
            shape(&merged),
            vec![("A.B".to_owned(), true), ("A.B.T".to_owned(), false)]
        );
    }

    #[test]
    fn merge_keeps_test_folders() {
        let names = parse_all(&["A.B", "A.B.C.T"]);
        let merged = merge_single_child_chains(build_tree(&names));
        // A absorbs B, but B is a test so the chain stops there.
        let ab = merged.child("A.B").expect("A and B are merged");
        assert!(ab.is_test());
        assert_eq!(ab.full_name(), "A.B");
        let c = ab.child("C").expect("C is below the test folder");
        assert_eq!(c.full_name(), "A.B.C");
    }

    #[test]
    fn merge_is_idempotent() {
        let names = parse_all(&["A.B.C.T1", "A.B.D.T2", "E.F.G.H", "E.I"]);
        let once = merge_single_child_chains(build_tree(&names));
        let twice = merge_single_child_chains(once.clone());
        assert_eq!(once, twice);
    }

    proptest! {
        #[test]
        fn merge_is_idempotent_prop(
            names in prop::collection::vec("[a-c](\\.[a-c]){0,4}", 1..12),
        ) {
            let parsed: Vec<_> = names.iter().map(|n| ParsedTestName::new(n.as_str())).collect();
            let tree = build_tree(&parsed);
            let leaves_before: Vec<_> = tree.iter().filter(|n| n.is_test()).map(|n| n.full_name()).collect();

            let once = merge_single_child_chains(tree);
            let twice = merge_single_child_chains(once.clone());
            prop_assert_eq!(&once, &twice);

            let mut leaves_after: Vec<_> = once.iter().filter(|n| n.is_test()).map(|n| n.full_name()).collect();
            let mut leaves_before = leaves_before;
            leaves_before.sort();
            leaves_after.sort();
            prop_assert_eq!(leaves_before, leaves_after);
        }
    }
}
